//! Project CRUD operations, slug assignment, and counters.

use rusqlite::{OptionalExtension, params};

use super::Database;
use super::models::{Project, ProjectStatus, Role};
use crate::error::{DatabaseError, ServiceResult};

const PROJECT_COLUMNS: &str = "id, title, slug, abstract_text, author_name, owner_id, status, \
     document_path, document_filename, document_content_type, document_size, document_checksum, \
     view_count, download_count, created_at, updated_at";

impl Database {
    /// Insert a project
    pub fn insert_project(&self, project: &Project) -> ServiceResult<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            r#"
            INSERT INTO projects (id, title, slug, abstract_text, author_name, owner_id, status,
                document_path, document_filename, document_content_type, document_size,
                document_checksum, view_count, download_count, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
            "#,
            params![
                project.id,
                project.title,
                project.slug,
                project.abstract_text,
                project.author_name,
                project.owner_id,
                project.status.as_str(),
                project.document_path,
                project.document_filename,
                project.document_content_type,
                project.document_size.map(|v| v as i64),
                project.document_checksum,
                project.view_count,
                project.download_count,
                project.created_at.to_rfc3339(),
                project.updated_at.to_rfc3339(),
            ],
        )
        .map_err(DatabaseError::Query)?;

        Ok(())
    }

    /// Get a project by ID
    pub fn get_project(&self, id: &str) -> ServiceResult<Option<Project>> {
        let conn = self.conn.lock().unwrap();

        conn.query_row(
            &format!("SELECT {} FROM projects WHERE id = ?1", PROJECT_COLUMNS),
            params![id],
            Project::from_row,
        )
        .optional()
        .map_err(DatabaseError::Query)
        .map_err(Into::into)
    }

    /// Get a published project by slug
    pub fn get_published_project_by_slug(&self, slug: &str) -> ServiceResult<Option<Project>> {
        let conn = self.conn.lock().unwrap();

        conn.query_row(
            &format!(
                "SELECT {} FROM projects WHERE slug = ?1 AND status = 'published'",
                PROJECT_COLUMNS
            ),
            params![slug],
            Project::from_row,
        )
        .optional()
        .map_err(DatabaseError::Query)
        .map_err(Into::into)
    }

    /// List projects visible to the given user. Faculty see only their own
    /// projects; the main coordinator sees all.
    pub fn list_projects(&self, user_id: &str, role: Role) -> ServiceResult<Vec<Project>> {
        let conn = self.conn.lock().unwrap();

        let (sql, has_owner_param) = match role {
            Role::MainCoordinator => (
                format!(
                    "SELECT {} FROM projects ORDER BY updated_at DESC",
                    PROJECT_COLUMNS
                ),
                false,
            ),
            Role::Faculty => (
                format!(
                    "SELECT {} FROM projects WHERE owner_id = ?1 ORDER BY updated_at DESC",
                    PROJECT_COLUMNS
                ),
                true,
            ),
        };

        let mut stmt = conn.prepare(&sql).map_err(DatabaseError::Query)?;
        let rows = if has_owner_param {
            stmt.query_map(params![user_id], Project::from_row)
        } else {
            stmt.query_map([], Project::from_row)
        }
        .map_err(DatabaseError::Query)?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(DatabaseError::Query)
            .map_err(Into::into)
    }

    /// List published projects, most recently updated first
    pub fn list_published_projects(&self, limit: usize) -> ServiceResult<Vec<Project>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM projects WHERE status = 'published' \
                 ORDER BY updated_at DESC LIMIT ?1",
                PROJECT_COLUMNS
            ))
            .map_err(DatabaseError::Query)?;

        let rows = stmt
            .query_map(params![limit as i64], Project::from_row)
            .map_err(DatabaseError::Query)?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(DatabaseError::Query)
            .map_err(Into::into)
    }

    /// Update project metadata (title, abstract, author)
    pub fn update_project(
        &self,
        id: &str,
        title: &str,
        abstract_text: Option<&str>,
        author_name: Option<&str>,
    ) -> ServiceResult<bool> {
        let conn = self.conn.lock().unwrap();

        let rows = conn
            .execute(
                "UPDATE projects SET title = ?1, abstract_text = ?2, author_name = ?3, \
                 updated_at = ?4 WHERE id = ?5",
                params![
                    title,
                    abstract_text,
                    author_name,
                    chrono::Utc::now().to_rfc3339(),
                    id
                ],
            )
            .map_err(DatabaseError::Query)?;

        Ok(rows > 0)
    }

    /// Record document blob metadata after an upload
    pub fn update_project_document(
        &self,
        id: &str,
        path: &str,
        filename: &str,
        content_type: &str,
        size: u64,
        checksum: &str,
    ) -> ServiceResult<bool> {
        let conn = self.conn.lock().unwrap();

        let rows = conn
            .execute(
                "UPDATE projects SET document_path = ?1, document_filename = ?2, \
                 document_content_type = ?3, document_size = ?4, document_checksum = ?5, \
                 updated_at = ?6 WHERE id = ?7",
                params![
                    path,
                    filename,
                    content_type,
                    size as i64,
                    checksum,
                    chrono::Utc::now().to_rfc3339(),
                    id
                ],
            )
            .map_err(DatabaseError::Query)?;

        Ok(rows > 0)
    }

    /// Set publication status, assigning a slug on first publication
    pub fn set_project_status(
        &self,
        id: &str,
        status: ProjectStatus,
        slug: Option<&str>,
    ) -> ServiceResult<bool> {
        let conn = self.conn.lock().unwrap();

        let rows = match slug {
            Some(slug) => conn
                .execute(
                    "UPDATE projects SET status = ?1, slug = ?2, updated_at = ?3 WHERE id = ?4",
                    params![status.as_str(), slug, chrono::Utc::now().to_rfc3339(), id],
                )
                .map_err(DatabaseError::Query)?,
            None => conn
                .execute(
                    "UPDATE projects SET status = ?1, updated_at = ?2 WHERE id = ?3",
                    params![status.as_str(), chrono::Utc::now().to_rfc3339(), id],
                )
                .map_err(DatabaseError::Query)?,
        };

        Ok(rows > 0)
    }

    /// Delete a project (images and jobs cascade)
    pub fn delete_project(&self, id: &str) -> ServiceResult<bool> {
        let conn = self.conn.lock().unwrap();

        let rows = conn
            .execute("DELETE FROM projects WHERE id = ?1", params![id])
            .map_err(DatabaseError::Query)?;

        Ok(rows > 0)
    }

    /// Increment the public view counter
    pub fn increment_view_count(&self, id: &str) -> ServiceResult<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            "UPDATE projects SET view_count = view_count + 1 WHERE id = ?1",
            params![id],
        )
        .map_err(DatabaseError::Query)?;

        Ok(())
    }

    /// Increment the public download counter
    pub fn increment_download_count(&self, id: &str) -> ServiceResult<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            "UPDATE projects SET download_count = download_count + 1 WHERE id = ?1",
            params![id],
        )
        .map_err(DatabaseError::Query)?;

        Ok(())
    }

    /// Derive a unique slug from a title, resolving collisions with a
    /// numeric suffix (`thesis`, `thesis-2`, `thesis-3`, ...).
    pub fn resolve_unique_slug(&self, title: &str, project_id: &str) -> ServiceResult<String> {
        let base = slugify(title);
        let conn = self.conn.lock().unwrap();

        let mut candidate = base.clone();
        let mut suffix = 2;
        loop {
            let taken: Option<String> = conn
                .query_row(
                    "SELECT id FROM projects WHERE slug = ?1 AND id != ?2",
                    params![candidate, project_id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(DatabaseError::Query)?;

            if taken.is_none() {
                return Ok(candidate);
            }

            candidate = format!("{}-{}", base, suffix);
            suffix += 1;
        }
    }
}

/// Lowercase a title into a URL slug: alphanumerics preserved, runs of
/// anything else collapsed to single hyphens.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut last_was_hyphen = true;

    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_was_hyphen = false;
        } else if !last_was_hyphen {
            slug.push('-');
            last_was_hyphen = true;
        }
    }

    let slug = slug.trim_end_matches('-').to_string();
    if slug.is_empty() {
        "untitled".to_string()
    } else {
        slug
    }
}
