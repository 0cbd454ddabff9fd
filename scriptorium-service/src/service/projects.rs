//! Project lifecycle: creation, editing, document upload, publishing
//! workflow, deletion, and CSV export.

use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::{ExtractionJob, Project, ProjectStatus, User};
use crate::error::{ProcessingError, ServiceError, ServiceResult};
use crate::service::ScriptoriumService;

impl ScriptoriumService {
    /// Create a project record (metadata only; the document comes later)
    pub fn create_project(
        &self,
        actor: &User,
        title: &str,
        abstract_text: Option<String>,
        author_name: Option<String>,
    ) -> ServiceResult<Project> {
        if title.trim().is_empty() {
            return Err(ServiceError::InvalidRequest {
                message: "Project title must not be empty".to_string(),
            });
        }

        let now = Utc::now();
        let project = Project {
            id: Uuid::new_v4().to_string(),
            title: title.trim().to_string(),
            slug: None,
            abstract_text,
            author_name: author_name.or_else(|| Some(actor.display_name.clone())),
            owner_id: actor.id.clone(),
            status: ProjectStatus::Draft,
            document_path: None,
            document_filename: None,
            document_content_type: None,
            document_size: None,
            document_checksum: None,
            view_count: 0,
            download_count: 0,
            created_at: now,
            updated_at: now,
        };

        self.db.insert_project(&project)?;

        info!(project_id = %project.id, owner = %actor.id, "Project created");
        Ok(project)
    }

    /// List projects visible to the actor
    pub fn list_projects(&self, actor: &User) -> ServiceResult<Vec<Project>> {
        self.db.list_projects(&actor.id, actor.role)
    }

    /// Update project metadata
    pub fn update_project(
        &self,
        actor: &User,
        project_id: &str,
        title: &str,
        abstract_text: Option<&str>,
        author_name: Option<&str>,
    ) -> ServiceResult<Project> {
        self.get_project_authorized(actor, project_id)?;

        if title.trim().is_empty() {
            return Err(ServiceError::InvalidRequest {
                message: "Project title must not be empty".to_string(),
            });
        }

        self.db
            .update_project(project_id, title.trim(), abstract_text, author_name)?;

        self.db
            .get_project(project_id)?
            .ok_or_else(|| ServiceError::ProjectNotFound {
                project_id: project_id.to_string(),
            })
    }

    /// Delete a project, its attachments, and its stored blobs
    pub fn delete_project(&self, actor: &User, project_id: &str) -> ServiceResult<bool> {
        let project = self.get_project_authorized(actor, project_id)?;

        let image_paths: Vec<String> = self
            .db
            .get_project_images(project_id)?
            .into_iter()
            .map(|i| i.internal_path)
            .collect();

        let deleted = self.db.delete_project(project_id)?;
        if !deleted {
            return Ok(false);
        }

        for path in image_paths {
            if let Err(e) = std::fs::remove_file(&path) {
                warn!(path = %path, error = %e, "Failed to delete image file");
            }
        }
        if let Some(doc_path) = project.document_path {
            if let Err(e) = std::fs::remove_file(&doc_path) {
                warn!(path = %doc_path, error = %e, "Failed to delete document file");
            }
        }
        let _ = std::fs::remove_dir(self.images_dir(project_id));

        info!(project_id = %project_id, "Project deleted");
        Ok(true)
    }

    /// Store an uploaded document blob and queue extraction.
    ///
    /// The HTTP response reports that extraction was scheduled, not that it
    /// finished; the background worker picks the job up. Re-uploading the
    /// same bytes does not queue a second run.
    pub fn upload_document(
        &self,
        actor: &User,
        project_id: &str,
        content: &[u8],
        filename: &str,
        content_type: &str,
        extract_tables: bool,
    ) -> ServiceResult<(Project, Option<ExtractionJob>)> {
        self.get_project_authorized(actor, project_id)?;

        let max_size = self.config.limits.max_document_size_bytes;
        if content.len() as u64 > max_size {
            return Err(ServiceError::Processing(ProcessingError::FileTooLarge {
                size: content.len() as u64,
                max: max_size,
            }));
        }

        let checksum = sha256_hex(content);

        let docs_dir = self.documents_dir();
        std::fs::create_dir_all(&docs_dir)
            .map_err(|e| ServiceError::Processing(ProcessingError::Io(e)))?;

        let stored_path = docs_dir.join(format!("{}_{}", project_id, sanitize_filename(filename)));
        std::fs::write(&stored_path, content)
            .map_err(|e| ServiceError::Processing(ProcessingError::Io(e)))?;

        self.db.update_project_document(
            project_id,
            &stored_path.to_string_lossy(),
            filename,
            content_type,
            content.len() as u64,
            &checksum,
        )?;

        let job = self
            .db
            .queue_extraction_job(project_id, &checksum, extract_tables, false)?;

        info!(
            project_id = %project_id,
            filename = %filename,
            size = content.len(),
            queued = job.is_some(),
            "Document uploaded"
        );

        let project =
            self.db
                .get_project(project_id)?
                .ok_or_else(|| ServiceError::ProjectNotFound {
                    project_id: project_id.to_string(),
                })?;

        Ok((project, job))
    }

    /// Publish a project, assigning its slug on first publication
    pub fn publish_project(&self, actor: &User, project_id: &str) -> ServiceResult<Project> {
        let project = self.get_project_authorized(actor, project_id)?;

        let slug = match project.slug {
            Some(slug) => slug,
            None => self.db.resolve_unique_slug(&project.title, project_id)?,
        };

        self.db
            .set_project_status(project_id, ProjectStatus::Published, Some(&slug))?;

        info!(project_id = %project_id, slug = %slug, "Project published");

        self.db
            .get_project(project_id)?
            .ok_or_else(|| ServiceError::ProjectNotFound {
                project_id: project_id.to_string(),
            })
    }

    /// Take a project back to draft. The slug is kept so republishing does
    /// not change public URLs.
    pub fn unpublish_project(&self, actor: &User, project_id: &str) -> ServiceResult<Project> {
        self.get_project_authorized(actor, project_id)?;

        self.db
            .set_project_status(project_id, ProjectStatus::Draft, None)?;

        info!(project_id = %project_id, "Project unpublished");

        self.db
            .get_project(project_id)?
            .ok_or_else(|| ServiceError::ProjectNotFound {
                project_id: project_id.to_string(),
            })
    }

    /// Export the actor's visible projects as CSV
    pub fn export_projects_csv(&self, actor: &User) -> ServiceResult<String> {
        let projects = self.list_projects(actor)?;

        let mut writer = csv::Writer::from_writer(Vec::new());
        writer
            .write_record([
                "id",
                "title",
                "slug",
                "status",
                "author",
                "owner_id",
                "views",
                "downloads",
                "images",
                "created_at",
                "updated_at",
            ])
            .map_err(|e| ServiceError::Internal {
                message: format!("CSV write failed: {}", e),
            })?;

        for project in projects {
            let image_count = self.db.get_image_count(&project.id)?;
            let record = [
                project.id.clone(),
                project.title.clone(),
                project.slug.clone().unwrap_or_default(),
                project.status.as_str().to_string(),
                project.author_name.clone().unwrap_or_default(),
                project.owner_id.clone(),
                project.view_count.to_string(),
                project.download_count.to_string(),
                image_count.to_string(),
                project.created_at.to_rfc3339(),
                project.updated_at.to_rfc3339(),
            ];
            writer
                .write_record(&record)
                .map_err(|e| ServiceError::Internal {
                    message: format!("CSV write failed: {}", e),
                })?;
        }

        let bytes = writer.into_inner().map_err(|e| ServiceError::Internal {
            message: format!("CSV write failed: {}", e),
        })?;

        String::from_utf8(bytes).map_err(|e| ServiceError::Internal {
            message: format!("CSV encoding failed: {}", e),
        })
    }
}

/// Hex-encoded SHA-256 digest
pub(crate) fn sha256_hex(content: &[u8]) -> String {
    let digest = Sha256::digest(content);
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Sanitize an uploaded filename for use on disk
fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_whitespace() => '_',
            c => c,
        })
        .collect::<String>()
        .trim_matches('_')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::JobStatus;
    use crate::service::tests::{coordinator, faculty, test_service};

    #[test]
    fn test_sha256_hex() {
        // Known digest of the empty input
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("my thesis.pdf"), "my_thesis.pdf");
        assert_eq!(sanitize_filename("a/b:c.pdf"), "a_b_c.pdf");
    }

    #[test]
    fn test_faculty_cannot_touch_foreign_project() {
        let (service, _dir) = test_service();
        let owner = faculty(&service, "owner");
        let intruder = faculty(&service, "intruder");

        let project = service
            .create_project(&owner, "Private Work", None, None)
            .unwrap();

        let result = service.update_project(&intruder, &project.id, "Stolen", None, None);
        assert!(matches!(result, Err(ServiceError::Forbidden { .. })));

        let coord = coordinator(&service);
        assert!(service
            .update_project(&coord, &project.id, "Renamed", None, None)
            .is_ok());
    }

    #[test]
    fn test_upload_document_queues_once_per_checksum() {
        let (service, _dir) = test_service();
        let owner = faculty(&service, "owner");
        let project = service
            .create_project(&owner, "With Document", None, None)
            .unwrap();

        let bytes = b"%PDF-1.4 fake document";
        let (updated, job) = service
            .upload_document(&owner, &project.id, bytes, "paper.pdf", "application/pdf", true)
            .unwrap();

        assert!(updated.has_document());
        assert_eq!(updated.document_checksum.as_deref(), Some(&sha256_hex(bytes)[..]));
        let job = job.expect("first upload queues extraction");
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.extract_tables);

        // Same bytes again: scheduled nothing new
        let (_, job2) = service
            .upload_document(&owner, &project.id, bytes, "paper.pdf", "application/pdf", true)
            .unwrap();
        assert!(job2.is_none());

        // Different bytes queue a fresh job
        let (_, job3) = service
            .upload_document(&owner, &project.id, b"%PDF-1.4 v2", "paper.pdf", "application/pdf", true)
            .unwrap();
        assert!(job3.is_some());
    }

    #[test]
    fn test_upload_document_enforces_size_limit() {
        let (service, _dir) = test_service();
        let owner = faculty(&service, "owner");
        let project = service.create_project(&owner, "Too Big", None, None).unwrap();

        let oversized = vec![0u8; (service.config.limits.max_document_size_bytes + 1) as usize];
        let result = service.upload_document(
            &owner,
            &project.id,
            &oversized,
            "huge.pdf",
            "application/pdf",
            false,
        );
        assert!(matches!(
            result,
            Err(ServiceError::Processing(ProcessingError::FileTooLarge { .. }))
        ));
    }

    #[test]
    fn test_publish_assigns_slug_once() {
        let (service, _dir) = test_service();
        let owner = faculty(&service, "owner");
        let project = service
            .create_project(&owner, "Soil Moisture Study", None, None)
            .unwrap();

        let published = service.publish_project(&owner, &project.id).unwrap();
        assert_eq!(published.slug.as_deref(), Some("soil-moisture-study"));
        assert_eq!(published.status, ProjectStatus::Published);

        // Unpublish keeps the slug; republish does not mint a new one
        let draft = service.unpublish_project(&owner, &project.id).unwrap();
        assert_eq!(draft.status, ProjectStatus::Draft);
        assert_eq!(draft.slug.as_deref(), Some("soil-moisture-study"));

        let republished = service.publish_project(&owner, &project.id).unwrap();
        assert_eq!(republished.slug.as_deref(), Some("soil-moisture-study"));
    }

    #[test]
    fn test_csv_export_contains_projects() {
        let (service, _dir) = test_service();
        let owner = faculty(&service, "owner");
        service.create_project(&owner, "Alpha Study", None, None).unwrap();
        service.create_project(&owner, "Beta Study", None, None).unwrap();

        let csv = service.export_projects_csv(&owner).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("id,title,slug,status"));
        assert!(csv.contains("Alpha Study"));
        assert!(csv.contains("Beta Study"));
    }

    #[test]
    fn test_delete_project_removes_rows(){
        let (service, _dir) = test_service();
        let owner = faculty(&service, "owner");
        let project = service.create_project(&owner, "Doomed", None, None).unwrap();

        assert!(service.delete_project(&owner, &project.id).unwrap());
        assert!(service.db.get_project(&project.id).unwrap().is_none());
        assert!(matches!(
            service.delete_project(&owner, &project.id),
            Err(ServiceError::ProjectNotFound { .. })
        ));
    }
}
