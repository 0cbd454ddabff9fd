//! Database model structs.
//!
//! This module contains the data structures for database records.

use chrono::{DateTime, Utc};
use rusqlite::Row;
use serde::{Deserialize, Serialize};

/// Account role. Faculty members see and edit only their own projects;
/// the main coordinator sees and edits everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Faculty,
    MainCoordinator,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Faculty => "faculty",
            Role::MainCoordinator => "main_coordinator",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "main_coordinator" => Role::MainCoordinator,
            _ => Role::Faculty,
        }
    }

    /// Whether an account with this role may see or edit a project owned by
    /// `owner_id`.
    pub fn can_access(&self, user_id: &str, owner_id: &str) -> bool {
        match self {
            Role::MainCoordinator => true,
            Role::Faculty => user_id == owner_id,
        }
    }
}

/// Publication status for projects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Draft,
    Published,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Draft => "draft",
            ProjectStatus::Published => "published",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "published" => ProjectStatus::Published,
            _ => ProjectStatus::Draft,
        }
    }
}

/// What produced an image attachment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageOrigin {
    /// Uploaded directly through the admin API
    #[default]
    Uploaded,
    /// Figure harvested from an uploaded document
    Figure,
    /// Table detected in an uploaded document and rendered to a raster
    Table,
}

impl ImageOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageOrigin::Uploaded => "uploaded",
            ImageOrigin::Figure => "figure",
            ImageOrigin::Table => "table",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "figure" => ImageOrigin::Figure,
            "table" => ImageOrigin::Table,
            _ => ImageOrigin::Uploaded,
        }
    }

    /// Whether this image was produced by the extraction pipeline.
    pub fn is_extracted(&self) -> bool {
        matches!(self, ImageOrigin::Figure | ImageOrigin::Table)
    }
}

/// Extraction job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "pending" => JobStatus::Pending,
            "running" => JobStatus::Running,
            "failed" => JobStatus::Failed,
            _ => JobStatus::Completed,
        }
    }
}

/// Research project record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub title: String,
    /// Unique URL slug derived from the title. Assigned on publication.
    pub slug: Option<String>,
    pub abstract_text: Option<String>,
    pub author_name: Option<String>,
    pub owner_id: String,
    pub status: ProjectStatus,
    /// Stored document blob, when one has been uploaded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_path: Option<String>,
    pub document_filename: Option<String>,
    pub document_content_type: Option<String>,
    pub document_size: Option<u64>,
    pub document_checksum: Option<String>,
    pub view_count: i64,
    pub download_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    pub(crate) fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let status_str: String = row.get(6)?;
        let created_at_str: String = row.get(14)?;
        let updated_at_str: String = row.get(15)?;

        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            slug: row.get(2)?,
            abstract_text: row.get(3)?,
            author_name: row.get(4)?,
            owner_id: row.get(5)?,
            status: ProjectStatus::from_str(&status_str),
            document_path: row.get(7)?,
            document_filename: row.get(8)?,
            document_content_type: row.get(9)?,
            document_size: row.get::<_, Option<i64>>(10)?.map(|v| v as u64),
            document_checksum: row.get(11)?,
            view_count: row.get(12)?,
            download_count: row.get(13)?,
            created_at: parse_timestamp(&created_at_str),
            updated_at: parse_timestamp(&updated_at_str),
        })
    }

    pub fn has_document(&self) -> bool {
        self.document_path.is_some()
    }
}

/// Ordered image attachment of a project
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectImage {
    pub id: String,
    pub project_id: String,
    pub internal_path: String,
    pub content_type: String,
    /// Display order within the project. The extraction pipeline appends
    /// after existing images with contiguous values.
    pub order_index: i32,
    pub is_featured: bool,
    pub width: Option<u32>,
    pub height: Option<u32>,
    #[serde(default)]
    pub origin: ImageOrigin,
    pub created_at: DateTime<Utc>,
}

impl ProjectImage {
    pub(crate) fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let origin_str: String = row.get(8)?;
        let created_at_str: String = row.get(9)?;

        Ok(Self {
            id: row.get(0)?,
            project_id: row.get(1)?,
            internal_path: row.get(2)?,
            content_type: row.get(3)?,
            order_index: row.get(4)?,
            is_featured: row.get(5)?,
            width: row.get::<_, Option<i32>>(6)?.map(|v| v as u32),
            height: row.get::<_, Option<i32>>(7)?.map(|v| v as u32),
            origin: ImageOrigin::from_str(&origin_str),
            created_at: parse_timestamp(&created_at_str),
        })
    }
}

/// Account record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub display_name: String,
    pub email: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub(crate) fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let role_str: String = row.get(3)?;
        let created_at_str: String = row.get(4)?;

        Ok(Self {
            id: row.get(0)?,
            display_name: row.get(1)?,
            email: row.get(2)?,
            role: Role::from_str(&role_str),
            created_at: parse_timestamp(&created_at_str),
        })
    }
}

/// Extraction job record. Keyed by (project, document checksum) so that
/// triggering extraction twice for the same document runs once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionJob {
    pub id: String,
    pub project_id: String,
    pub document_checksum: String,
    pub extract_tables: bool,
    pub status: JobStatus,
    pub images_extracted: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExtractionJob {
    pub(crate) fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let status_str: String = row.get(4)?;
        let created_at_str: String = row.get(7)?;
        let updated_at_str: String = row.get(8)?;

        Ok(Self {
            id: row.get(0)?,
            project_id: row.get(1)?,
            document_checksum: row.get(2)?,
            extract_tables: row.get(3)?,
            status: JobStatus::from_str(&status_str),
            images_extracted: row.get(5)?,
            error: row.get(6)?,
            created_at: parse_timestamp(&created_at_str),
            updated_at: parse_timestamp(&updated_at_str),
        })
    }
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trip() {
        assert_eq!(Role::from_str(Role::Faculty.as_str()), Role::Faculty);
        assert_eq!(
            Role::from_str(Role::MainCoordinator.as_str()),
            Role::MainCoordinator
        );
        // Unknown strings default to the least-privileged role
        assert_eq!(Role::from_str("dean"), Role::Faculty);
    }

    #[test]
    fn test_role_access() {
        assert!(Role::MainCoordinator.can_access("u1", "u2"));
        assert!(Role::Faculty.can_access("u1", "u1"));
        assert!(!Role::Faculty.can_access("u1", "u2"));
    }

    #[test]
    fn test_image_origin_classification() {
        assert!(ImageOrigin::Figure.is_extracted());
        assert!(ImageOrigin::Table.is_extracted());
        assert!(!ImageOrigin::Uploaded.is_extracted());
    }

    #[test]
    fn test_job_status_round_trip() {
        for status in [
            JobStatus::Pending,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(JobStatus::from_str(status.as_str()), status);
        }
    }
}
