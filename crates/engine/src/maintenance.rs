//! Scheduled maintenance loops (C11).
//!
//! Clock-driven recurring jobs, exclusive within a process:
//!
//! - nightly expired-grants sweep at 02:00 (also run once 10 seconds after
//!   boot);
//! - weekly check-log cleanup (logs older than 30 days);
//! - hourly matrix refresh and hourly expired-row cleanup;
//! - daily expiring-grants notice at 09:00 (one digest per user for grants
//!   expiring within 7 days).
//!
//! A multi-replica deployment either elects a leader in the host runtime or
//! tolerates duplicate runs; every job here is idempotent.

use crate::invalidation::InvalidationFabric;
use crate::matrix::PermissionMatrixService;
use crate::notify::{ExpiringGrantNotice, NotificationSink};
use crate::repository::AuthzRepository;
use authz_core::Result;
use chrono::{Duration as ChronoDuration, Local, NaiveTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{interval, sleep, Duration, MissedTickBehavior};
use tracing::{error, info};
use uuid::Uuid;

const CHECK_LOG_RETENTION_DAYS: i64 = 30;
const EXPIRING_NOTICE_WINDOW_DAYS: i64 = 7;
const STARTUP_SWEEP_DELAY_SECS: u64 = 10;

pub struct MaintenanceScheduler {
    jobs: MaintenanceJobs,
    shutdown_tx: Option<watch::Sender<bool>>,
}

impl MaintenanceScheduler {
    pub fn new(
        repository: AuthzRepository,
        matrix: PermissionMatrixService,
        fabric: InvalidationFabric,
        notifications: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            jobs: MaintenanceJobs::new(repository, matrix, fabric, notifications),
            shutdown_tx: None,
        }
    }

    /// Spawn all maintenance loops. Non-blocking.
    pub fn start(&mut self) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.shutdown_tx = Some(shutdown_tx);

        // Startup sweep shortly after boot
        {
            let jobs = self.jobs.clone();
            tokio::spawn(async move {
                sleep(Duration::from_secs(STARTUP_SWEEP_DELAY_SECS)).await;
                if let Err(e) = jobs.expired_grants_sweep().await {
                    error!(error = %e, "Startup expired-grants sweep failed");
                }
            });
        }

        // Nightly sweep at 02:00
        {
            let jobs = self.jobs.clone();
            let mut shutdown = shutdown_rx.clone();
            tokio::spawn(async move {
                loop {
                    let wait = duration_until(NaiveTime::from_hms_opt(2, 0, 0).unwrap());
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = sleep(wait) => {
                            if let Err(e) = jobs.expired_grants_sweep().await {
                                error!(error = %e, "Nightly expired-grants sweep failed");
                            }
                        }
                    }
                }
            });
        }

        // Daily 09:00 expiring-grants notice
        {
            let jobs = self.jobs.clone();
            let mut shutdown = shutdown_rx.clone();
            tokio::spawn(async move {
                loop {
                    let wait = duration_until(NaiveTime::from_hms_opt(9, 0, 0).unwrap());
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = sleep(wait) => {
                            if let Err(e) = jobs.expiring_grants_notice().await {
                                error!(error = %e, "Expiring-grants notice failed");
                            }
                        }
                    }
                }
            });
        }

        // Hourly matrix refresh + expired-row cleanup
        {
            let jobs = self.jobs.clone();
            let mut shutdown = shutdown_rx.clone();
            tokio::spawn(async move {
                let mut tick = interval(Duration::from_secs(3600));
                tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
                tick.tick().await; // the first tick fires immediately
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = tick.tick() => {
                            if let Err(e) = jobs.matrix.refresh_batch().await {
                                error!(error = %e, "Hourly matrix refresh failed");
                            }
                            if let Err(e) = jobs
                                .repository
                                .delete_expired_matrix_rows(Utc::now())
                                .await
                            {
                                error!(error = %e, "Hourly matrix cleanup failed");
                            }
                        }
                    }
                }
            });
        }

        // Daily matrix deep cleanup + tracker reset
        {
            let jobs = self.jobs.clone();
            let mut shutdown = shutdown_rx.clone();
            tokio::spawn(async move {
                let mut tick = interval(Duration::from_secs(24 * 3600));
                tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
                tick.tick().await;
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = tick.tick() => {
                            if let Err(e) = jobs.matrix.cleanup_expired().await {
                                error!(error = %e, "Daily matrix cleanup failed");
                            }
                        }
                    }
                }
            });
        }

        // Weekly check-log cleanup
        {
            let jobs = self.jobs.clone();
            let mut shutdown = shutdown_rx;
            tokio::spawn(async move {
                let mut tick = interval(Duration::from_secs(7 * 24 * 3600));
                tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
                tick.tick().await;
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = tick.tick() => {
                            if let Err(e) = jobs.check_log_cleanup().await {
                                error!(error = %e, "Weekly check-log cleanup failed");
                            }
                        }
                    }
                }
            });
        }

        info!("Maintenance scheduler started");
    }

    pub fn stop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(true);
            info!("Maintenance scheduler stopping");
        }
    }

    pub fn jobs(&self) -> &MaintenanceJobs {
        &self.jobs
    }
}

/// The actual job bodies, shared by the scheduler and tests.
#[derive(Clone)]
pub struct MaintenanceJobs {
    repository: AuthzRepository,
    matrix: PermissionMatrixService,
    fabric: InvalidationFabric,
    notifications: Arc<dyn NotificationSink>,
}

impl MaintenanceJobs {
    pub fn new(
        repository: AuthzRepository,
        matrix: PermissionMatrixService,
        fabric: InvalidationFabric,
        notifications: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            repository,
            matrix,
            fabric,
            notifications,
        }
    }

    /// Expire temporal grants: flip expired direct grants and role
    /// assignments, drop expired policy assignments, then invalidate every
    /// affected user.
    pub async fn expired_grants_sweep(&self) -> Result<()> {
        let now = Utc::now();
        let mut tx = self.repository.db().begin().await?;

        let mut affected = self.repository.expire_user_permissions(&mut tx, now).await?;
        affected.extend(self.repository.expire_user_roles(&mut tx, now).await?);
        let dropped_assignments = self
            .repository
            .delete_expired_policy_assignments(&mut tx, now)
            .await?;

        tx.commit().await?;

        affected.sort();
        affected.dedup();

        if !affected.is_empty() || dropped_assignments > 0 {
            info!(
                users = affected.len(),
                policy_assignments = dropped_assignments,
                "Expired-grants sweep applied"
            );
            self.fabric.invalidate_users(&affected).await;
        }

        Ok(())
    }

    /// Delete check logs older than the retention window.
    pub async fn check_log_cleanup(&self) -> Result<()> {
        let cutoff = Utc::now() - ChronoDuration::days(CHECK_LOG_RETENTION_DAYS);
        let deleted = self.repository.delete_check_logs_older_than(cutoff).await?;
        if deleted > 0 {
            info!(deleted = deleted, "Check-log cleanup completed");
        }
        Ok(())
    }

    /// Group soon-expiring temporary grants by user and emit one digest
    /// notification per user.
    pub async fn expiring_grants_notice(&self) -> Result<()> {
        let expiring = self
            .repository
            .get_expiring_temporary_grants(ChronoDuration::days(EXPIRING_NOTICE_WINDOW_DAYS))
            .await?;

        let mut by_user: BTreeMap<Uuid, Vec<ExpiringGrantNotice>> = BTreeMap::new();
        for (user_id, code, valid_until) in expiring {
            by_user.entry(user_id).or_default().push(ExpiringGrantNotice {
                permission_code: code,
                valid_until,
            });
        }

        let users = by_user.len();
        for (user_id, grants) in by_user {
            if let Err(e) = self
                .notifications
                .notify_expiring_grants(user_id, &grants)
                .await
            {
                error!(user_id = %user_id, error = %e, "Expiring-grants notice delivery failed");
            }
        }

        if users > 0 {
            info!(users = users, "Expiring-grants notices sent");
        }
        Ok(())
    }
}

/// Time until the next local occurrence of `target`.
fn duration_until(target: NaiveTime) -> Duration {
    let now = Local::now();
    let today_target = now.date_naive().and_time(target);
    let next = if now.naive_local() < today_target {
        today_target
    } else {
        today_target + ChronoDuration::days(1)
    };

    let wait = next - now.naive_local();
    Duration::from_secs(wait.num_seconds().max(1) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_until_is_always_forward() {
        let wait = duration_until(NaiveTime::from_hms_opt(2, 0, 0).unwrap());
        assert!(wait.as_secs() >= 1);
        assert!(wait.as_secs() <= 24 * 3600);
    }
}
