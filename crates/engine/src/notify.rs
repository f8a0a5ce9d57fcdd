//! Notification sink boundary.
//!
//! The notification backend is an external collaborator; this core only
//! hands it structured payloads. The default implementation logs through
//! tracing, which is also what test environments use.

use async_trait::async_trait;
use authz_core::Result;
use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

/// One expiring grant in a user's digest.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ExpiringGrantNotice {
    pub permission_code: String,
    pub valid_until: DateTime<Utc>,
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Deliver one digest of soon-expiring grants to a user.
    async fn notify_expiring_grants(
        &self,
        user_profile_id: Uuid,
        grants: &[ExpiringGrantNotice],
    ) -> Result<()>;
}

/// Sink that records notifications in the structured log.
pub struct TracingNotificationSink;

#[async_trait]
impl NotificationSink for TracingNotificationSink {
    async fn notify_expiring_grants(
        &self,
        user_profile_id: Uuid,
        grants: &[ExpiringGrantNotice],
    ) -> Result<()> {
        info!(
            user_id = %user_profile_id,
            expiring = grants.len(),
            codes = ?grants.iter().map(|g| g.permission_code.as_str()).collect::<Vec<_>>(),
            "Expiring-grants notice"
        );
        Ok(())
    }
}
