//! Database module for SQLite operations.
//!
//! This module provides the `Database` struct and all database operations
//! organized into submodules by domain.

mod images;
mod jobs;
mod migrations;
pub mod models;
mod projects;
mod users;

pub use models::{
    ExtractionJob, ImageOrigin, JobStatus, Project, ProjectImage, ProjectStatus, Role, User,
};

use rusqlite::Connection;
use std::path::Path;
use std::sync::Mutex;

use crate::error::{DatabaseError, ServiceResult};

/// Database manager for SQLite operations
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create the database at the given path
    pub fn open(path: &Path) -> ServiceResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Connection(rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
            })?;
        }

        let conn = Connection::open(path).map_err(DatabaseError::Connection)?;

        // Enable WAL mode for better concurrency
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(DatabaseError::Query)?;

        migrations::run_migrations(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database. Test-only.
    #[cfg(test)]
    pub fn open_in_memory() -> ServiceResult<Self> {
        let conn = Connection::open_in_memory().map_err(DatabaseError::Connection)?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(DatabaseError::Query)?;
        migrations::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::models::{Project, ProjectStatus, Role, User};
    use super::Database;

    pub(crate) fn insert_test_user(db: &Database, id: &str, role: Role) {
        let user = User {
            id: id.to_string(),
            display_name: format!("User {}", id),
            email: format!("{}@example.edu", id),
            role,
            created_at: Utc::now(),
        };
        db.insert_user(&user).unwrap();
    }

    pub(crate) fn insert_test_project(db: &Database, owner_id: &str, title: &str) -> String {
        let now = Utc::now();
        let project = Project {
            id: Uuid::new_v4().to_string(),
            title: title.to_string(),
            slug: None,
            abstract_text: None,
            author_name: None,
            owner_id: owner_id.to_string(),
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
        db.insert_project(&project).unwrap();
        project.id
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.conn.lock().unwrap();
        super::migrations::run_migrations(&conn).unwrap();
    }
}
