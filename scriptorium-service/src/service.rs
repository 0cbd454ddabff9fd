//! Service coordinator: the seam between HTTP handlers, the database, the
//! blob store, and the extraction pipeline.

mod images;
mod jobs;
mod projects;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tracing::info;

use crate::config::StaticConfig;
use crate::db::{Database, Project, Role, User};
use crate::error::{ServiceError, ServiceResult};
use crate::extraction::DocumentImageExtractor;

/// Main service coordinator
pub struct ScriptoriumService {
    pub config: StaticConfig,
    pub db: Arc<Database>,
    pub extractor: DocumentImageExtractor,
    /// Project ids with an extraction currently executing, with start time.
    /// Surfaced through the health endpoint.
    pub active_extractions: DashMap<String, Instant>,
}

impl ScriptoriumService {
    pub fn new(db: Arc<Database>, config: StaticConfig) -> ServiceResult<Arc<Self>> {
        info!("Initializing scriptorium service");

        let extractor = DocumentImageExtractor::new(
            config.extraction.clone(),
            config.storage.data_dir.clone(),
        );

        let service = Arc::new(Self {
            config,
            db,
            extractor,
            active_extractions: DashMap::new(),
        });

        service.ensure_default_coordinator()?;

        Ok(service)
    }

    /// Resolve the acting user for a request. There are no sessions; the
    /// caller names the account it acts as.
    pub fn resolve_actor(&self, user_id: Option<&str>) -> ServiceResult<User> {
        let user_id = user_id.ok_or_else(|| ServiceError::InvalidRequest {
            message: "Missing user_id".to_string(),
        })?;

        self.db
            .get_user(user_id)?
            .ok_or_else(|| ServiceError::UserNotFound {
                user_id: user_id.to_string(),
            })
    }

    /// Fetch a project the actor is allowed to see, or fail with 403/404.
    pub fn get_project_authorized(&self, actor: &User, project_id: &str) -> ServiceResult<Project> {
        let project =
            self.db
                .get_project(project_id)?
                .ok_or_else(|| ServiceError::ProjectNotFound {
                    project_id: project_id.to_string(),
                })?;

        if !actor.role.can_access(&actor.id, &project.owner_id) {
            return Err(ServiceError::Forbidden {
                message: "Project belongs to another faculty member".to_string(),
            });
        }

        Ok(project)
    }

    /// Create a bootstrap coordinator account when the user table is empty,
    /// so a fresh install has an account to act as.
    fn ensure_default_coordinator(&self) -> ServiceResult<()> {
        if !self.db.list_users()?.is_empty() {
            return Ok(());
        }

        let user = User {
            id: "coordinator".to_string(),
            display_name: "Main Coordinator".to_string(),
            email: "coordinator@localhost".to_string(),
            role: Role::MainCoordinator,
            created_at: chrono::Utc::now(),
        };
        self.db.insert_user(&user)?;

        info!(user_id = %user.id, "Created bootstrap coordinator account");
        Ok(())
    }

    pub(crate) fn documents_dir(&self) -> PathBuf {
        self.config.storage.data_dir.join("documents")
    }

    pub(crate) fn images_dir(&self, project_id: &str) -> PathBuf {
        self.config.storage.data_dir.join("images").join(project_id)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::tests::insert_test_user;

    /// Service over an in-memory database and a temp blob directory
    pub(crate) fn test_service() -> (Arc<ScriptoriumService>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mut config: StaticConfig = serde_json::from_str("{}").unwrap();
        config.storage.data_dir = dir.path().to_path_buf();

        let db = Arc::new(Database::open_in_memory().unwrap());
        let service = ScriptoriumService::new(db, config).unwrap();
        (service, dir)
    }

    pub(crate) fn faculty(service: &ScriptoriumService, id: &str) -> User {
        insert_test_user(&service.db, id, Role::Faculty);
        service.db.get_user(id).unwrap().unwrap()
    }

    pub(crate) fn coordinator(service: &ScriptoriumService) -> User {
        service.db.get_user("coordinator").unwrap().unwrap()
    }

    #[test]
    fn test_bootstrap_coordinator_created_once() {
        let (service, _dir) = test_service();
        let users = service.db.list_users().unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].role, Role::MainCoordinator);

        // Re-running the bootstrap is a no-op
        service.ensure_default_coordinator().unwrap();
        assert_eq!(service.db.list_users().unwrap().len(), 1);
    }

    #[test]
    fn test_resolve_actor_requires_known_user() {
        let (service, _dir) = test_service();

        assert!(matches!(
            service.resolve_actor(None),
            Err(ServiceError::InvalidRequest { .. })
        ));
        assert!(matches!(
            service.resolve_actor(Some("ghost")),
            Err(ServiceError::UserNotFound { .. })
        ));
        assert!(service.resolve_actor(Some("coordinator")).is_ok());
    }
}
