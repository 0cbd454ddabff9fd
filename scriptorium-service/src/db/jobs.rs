//! Extraction job queue operations.
//!
//! Jobs are keyed by (project, document checksum): queueing is an upsert, so
//! a document already extracted (or queued) is not picked up again unless the
//! caller forces a re-run.

use chrono::Utc;
use rusqlite::{OptionalExtension, params};
use uuid::Uuid;

use super::Database;
use super::models::{ExtractionJob, JobStatus};
use crate::error::{DatabaseError, ServiceResult};

const JOB_COLUMNS: &str = "id, project_id, document_checksum, extract_tables, status, \
     images_extracted, error, created_at, updated_at";

impl Database {
    /// Queue an extraction job for a project document. Returns the job if it
    /// was newly queued, `None` when a job for the same checksum already
    /// exists and `force` is false. With `force`, an existing job is reset to
    /// pending.
    pub fn queue_extraction_job(
        &self,
        project_id: &str,
        document_checksum: &str,
        extract_tables: bool,
        force: bool,
    ) -> ServiceResult<Option<ExtractionJob>> {
        let conn = self.conn.lock().unwrap();

        let existing: Option<String> = conn
            .query_row(
                "SELECT id FROM extraction_jobs \
                 WHERE project_id = ?1 AND document_checksum = ?2",
                params![project_id, document_checksum],
                |row| row.get(0),
            )
            .optional()
            .map_err(DatabaseError::Query)?;

        let now = Utc::now();
        match existing {
            Some(job_id) if force => {
                conn.execute(
                    "UPDATE extraction_jobs SET status = 'pending', extract_tables = ?1, \
                     images_extracted = 0, error = NULL, updated_at = ?2 WHERE id = ?3",
                    params![extract_tables, now.to_rfc3339(), job_id],
                )
                .map_err(DatabaseError::Query)?;

                conn.query_row(
                    &format!("SELECT {} FROM extraction_jobs WHERE id = ?1", JOB_COLUMNS),
                    params![job_id],
                    ExtractionJob::from_row,
                )
                .optional()
                .map_err(DatabaseError::Query)
                .map_err(Into::into)
            }
            Some(_) => Ok(None),
            None => {
                let job = ExtractionJob {
                    id: Uuid::new_v4().to_string(),
                    project_id: project_id.to_string(),
                    document_checksum: document_checksum.to_string(),
                    extract_tables,
                    status: JobStatus::Pending,
                    images_extracted: 0,
                    error: None,
                    created_at: now,
                    updated_at: now,
                };

                conn.execute(
                    r#"
                    INSERT INTO extraction_jobs (id, project_id, document_checksum,
                        extract_tables, status, images_extracted, error, created_at, updated_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                    "#,
                    params![
                        job.id,
                        job.project_id,
                        job.document_checksum,
                        job.extract_tables,
                        job.status.as_str(),
                        job.images_extracted,
                        job.error,
                        job.created_at.to_rfc3339(),
                        job.updated_at.to_rfc3339(),
                    ],
                )
                .map_err(DatabaseError::Query)?;

                Ok(Some(job))
            }
        }
    }

    /// Pop the oldest pending job and mark it running
    pub fn get_next_pending_job(&self) -> ServiceResult<Option<ExtractionJob>> {
        let conn = self.conn.lock().unwrap();

        let job = conn
            .query_row(
                &format!(
                    "SELECT {} FROM extraction_jobs WHERE status = 'pending' \
                     ORDER BY created_at LIMIT 1",
                    JOB_COLUMNS
                ),
                [],
                ExtractionJob::from_row,
            )
            .optional()
            .map_err(DatabaseError::Query)?;

        if let Some(ref job) = job {
            conn.execute(
                "UPDATE extraction_jobs SET status = 'running', updated_at = ?1 WHERE id = ?2",
                params![Utc::now().to_rfc3339(), job.id],
            )
            .map_err(DatabaseError::Query)?;
        }

        Ok(job)
    }

    /// Record a job outcome
    pub fn finish_extraction_job(
        &self,
        job_id: &str,
        status: JobStatus,
        images_extracted: i64,
        error: Option<&str>,
    ) -> ServiceResult<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            "UPDATE extraction_jobs SET status = ?1, images_extracted = ?2, error = ?3, \
             updated_at = ?4 WHERE id = ?5",
            params![
                status.as_str(),
                images_extracted,
                error,
                Utc::now().to_rfc3339(),
                job_id
            ],
        )
        .map_err(DatabaseError::Query)?;

        Ok(())
    }

    /// List jobs for a project, newest first
    pub fn list_extraction_jobs(&self, project_id: &str) -> ServiceResult<Vec<ExtractionJob>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM extraction_jobs WHERE project_id = ?1 ORDER BY created_at DESC",
                JOB_COLUMNS
            ))
            .map_err(DatabaseError::Query)?;

        let rows = stmt
            .query_map(params![project_id], ExtractionJob::from_row)
            .map_err(DatabaseError::Query)?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(DatabaseError::Query)
            .map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use crate::db::Database;
    use crate::db::models::{JobStatus, Role};
    use crate::db::tests::{insert_test_project, insert_test_user};

    fn setup() -> (Database, String) {
        let db = Database::open_in_memory().unwrap();
        insert_test_user(&db, "u1", Role::Faculty);
        let project_id = insert_test_project(&db, "u1", "Queued");
        (db, project_id)
    }

    #[test]
    fn test_duplicate_queue_is_ignored() {
        let (db, project_id) = setup();

        let first = db
            .queue_extraction_job(&project_id, "abc123", true, false)
            .unwrap();
        assert!(first.is_some());

        // Triggering again for the same document is a no-op
        let second = db
            .queue_extraction_job(&project_id, "abc123", true, false)
            .unwrap();
        assert!(second.is_none());

        // A new document version (different checksum) queues normally
        let third = db
            .queue_extraction_job(&project_id, "def456", true, false)
            .unwrap();
        assert!(third.is_some());
    }

    #[test]
    fn test_force_resets_completed_job() {
        let (db, project_id) = setup();

        let job = db
            .queue_extraction_job(&project_id, "abc123", false, false)
            .unwrap()
            .unwrap();
        db.finish_extraction_job(&job.id, JobStatus::Completed, 4, None)
            .unwrap();

        let requeued = db
            .queue_extraction_job(&project_id, "abc123", true, true)
            .unwrap()
            .unwrap();
        assert_eq!(requeued.id, job.id);
        assert_eq!(requeued.status, JobStatus::Pending);
        assert!(requeued.extract_tables);
        assert_eq!(requeued.images_extracted, 0);
    }

    #[test]
    fn test_pending_pop_marks_running() {
        let (db, project_id) = setup();
        db.queue_extraction_job(&project_id, "abc123", false, false)
            .unwrap();

        let popped = db.get_next_pending_job().unwrap().unwrap();
        assert_eq!(popped.project_id, project_id);

        // Already running, so nothing further is pending
        assert!(db.get_next_pending_job().unwrap().is_none());

        let jobs = db.list_extraction_jobs(&project_id).unwrap();
        assert_eq!(jobs[0].status, JobStatus::Running);
    }

    #[test]
    fn test_failed_job_records_error() {
        let (db, project_id) = setup();
        let job = db
            .queue_extraction_job(&project_id, "abc123", false, false)
            .unwrap()
            .unwrap();

        db.finish_extraction_job(&job.id, JobStatus::Failed, 0, Some("corrupt document"))
            .unwrap();

        let jobs = db.list_extraction_jobs(&project_id).unwrap();
        assert_eq!(jobs[0].status, JobStatus::Failed);
        assert_eq!(jobs[0].error.as_deref(), Some("corrupt document"));
    }
}
