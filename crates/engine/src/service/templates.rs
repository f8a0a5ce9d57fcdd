use crate::dto::{ApplyTemplateRequest, CreateTemplateRequest};
use crate::invalidation::InvalidationFabric;
use crate::models::{PermissionTemplate, TemplateApplication};
use crate::repository::AuthzRepository;
use authz_core::audit::EventType;
use authz_core::{AuditLogger, Error, ErrorCode, RequestContext, Result};
use tracing::info;
use uuid::Uuid;

#[derive(Clone)]
pub struct TemplateService {
    repository: AuthzRepository,
    fabric: InvalidationFabric,
    audit: AuditLogger,
}

impl TemplateService {
    pub fn new(
        repository: AuthzRepository,
        fabric: InvalidationFabric,
        audit: AuditLogger,
    ) -> Self {
        Self {
            repository,
            fabric,
            audit,
        }
    }

    pub async fn get_template(&self, template_id: Uuid) -> Result<PermissionTemplate> {
        self.repository
            .get_template_by_id(template_id)
            .await?
            .ok_or_else(|| Error::new(ErrorCode::PermissionNotFound, "Template not found"))
    }

    pub async fn list_templates(&self, limit: i64, offset: i64) -> Result<Vec<PermissionTemplate>> {
        self.repository
            .list_templates(limit.clamp(1, 500), offset.max(0))
            .await
    }

    pub async fn create_template(
        &self,
        actor: &RequestContext,
        request: CreateTemplateRequest,
    ) -> Result<PermissionTemplate> {
        if self
            .repository
            .get_template_by_code(&request.code)
            .await?
            .is_some()
        {
            return Err(Error::new(
                ErrorCode::PermissionAlreadyExists,
                format!("Template code '{}' already exists", request.code),
            ));
        }

        // Every referenced permission code must exist
        for code in &request.permissions {
            if self.repository.get_permission_by_code(code).await?.is_none() {
                return Err(Error::new(
                    ErrorCode::PermissionCodeNotFound,
                    format!("Permission code '{}' does not exist", code),
                ));
            }
        }

        let mut tx = self.repository.db().begin().await?;
        let template = self
            .repository
            .insert_template(
                &mut tx,
                &request.code,
                &request.name,
                request.description.as_deref(),
                &request.permissions,
            )
            .await?;
        tx.commit().await?;

        info!(template_id = %template.id, code = %template.code, "Template created");
        Ok(template)
    }

    /// Apply a template to a user: one application row plus a direct grant
    /// per code the user does not already hold.
    pub async fn apply_template(
        &self,
        actor: &RequestContext,
        template_id: Uuid,
        request: ApplyTemplateRequest,
    ) -> Result<TemplateApplication> {
        let template = self.get_template(template_id).await?;
        self.repository
            .get_user_profile(request.user_id)
            .await?
            .ok_or_else(|| Error::new(ErrorCode::UserNotFound, "User profile not found"))?;

        let codes: Vec<String> =
            serde_json::from_value(template.permissions.clone()).unwrap_or_default();
        let grant_reason = format!("template:{}", template.code);

        let mut tx = self.repository.db().begin().await?;
        let application = self
            .repository
            .insert_template_application(
                &mut tx,
                template_id,
                request.user_id,
                Some(actor.profile_id),
            )
            .await?;

        for code in &codes {
            let permission = match self.repository.get_permission_by_code(code).await? {
                Some(permission) => permission,
                None => continue,
            };
            let existing = self
                .repository
                .get_user_permission(request.user_id, permission.id)
                .await?;
            if existing.as_ref().map(|row| row.is_granted).unwrap_or(false) {
                continue;
            }

            match existing {
                Some(row) => {
                    self.repository
                        .reactivate_user_permission(
                            &mut tx,
                            row.id,
                            None,
                            None,
                            None,
                            100,
                            false,
                            Some(grant_reason.as_str()),
                            Some(actor.profile_id),
                        )
                        .await?;
                }
                None => {
                    self.repository
                        .insert_user_permission(
                            &mut tx,
                            request.user_id,
                            permission.id,
                            None,
                            None,
                            None,
                            100,
                            false,
                            Some(grant_reason.as_str()),
                            Some(actor.profile_id),
                        )
                        .await?;
                }
            }
        }

        self.repository
            .append_history(
                &mut tx,
                "template_application",
                application.id,
                "grant",
                None,
                Some(&serde_json::to_value(&application)?),
                Some(actor.profile_id),
                Some(&serde_json::json!({ "template_code": template.code })),
                true,
            )
            .await?;
        tx.commit().await?;

        self.fabric.on_user_mutation(request.user_id).await;

        self.audit
            .log_grant_change(
                EventType::BulkGrant,
                &actor.profile_id.to_string(),
                &request.user_id.to_string(),
                &format!("template '{}' applied", template.code),
                None,
                Some(serde_json::to_value(&application)?),
            )
            .await;

        Ok(application)
    }
}
