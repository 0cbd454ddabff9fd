//! Database schema migrations.
//!
//! This module contains all database migrations and schema setup.

use rusqlite::Connection;

use crate::error::{DatabaseError, ServiceResult};

/// Run all database migrations.
///
/// This function is called during database initialization to ensure
/// the schema is up to date.
pub(super) fn run_migrations(conn: &Connection) -> ServiceResult<()> {
    conn.execute_batch(
        r#"
        -- Accounts
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            display_name TEXT NOT NULL,
            email TEXT NOT NULL UNIQUE,
            role TEXT NOT NULL DEFAULT 'faculty',
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Research project records
        CREATE TABLE IF NOT EXISTS projects (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            slug TEXT UNIQUE,
            abstract_text TEXT,
            author_name TEXT,
            owner_id TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'draft',
            document_path TEXT,
            document_filename TEXT,
            document_content_type TEXT,
            document_size INTEGER,
            document_checksum TEXT,
            view_count INTEGER NOT NULL DEFAULT 0,
            download_count INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            FOREIGN KEY (owner_id) REFERENCES users(id)
        );

        CREATE INDEX IF NOT EXISTS idx_projects_owner ON projects(owner_id);
        CREATE INDEX IF NOT EXISTS idx_projects_status ON projects(status);

        -- Ordered image attachments
        CREATE TABLE IF NOT EXISTS project_images (
            id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL,
            internal_path TEXT NOT NULL,
            content_type TEXT NOT NULL DEFAULT 'image/png',
            order_index INTEGER NOT NULL,
            is_featured INTEGER NOT NULL DEFAULT 0,
            width INTEGER,
            height INTEGER,
            origin TEXT NOT NULL DEFAULT 'uploaded',
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            FOREIGN KEY (project_id) REFERENCES projects(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_project_images_project
            ON project_images(project_id, order_index);

        -- Extraction jobs, keyed by project + document checksum so that a
        -- document is extracted at most once unless explicitly re-queued
        CREATE TABLE IF NOT EXISTS extraction_jobs (
            id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL,
            document_checksum TEXT NOT NULL,
            extract_tables INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'pending',
            images_extracted INTEGER NOT NULL DEFAULT 0,
            error TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(project_id, document_checksum),
            FOREIGN KEY (project_id) REFERENCES projects(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_extraction_jobs_status
            ON extraction_jobs(status, created_at);
    "#,
    )
    .map_err(|e| DatabaseError::Migration {
        message: e.to_string(),
    })?;

    Ok(())
}
