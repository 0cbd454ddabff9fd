//! Extraction job orchestration and the background worker.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info, warn};

use crate::db::{ExtractionJob, JobStatus, User};
use crate::error::{ServiceError, ServiceResult, format_error_chain};
use crate::service::ScriptoriumService;

impl ScriptoriumService {
    /// Re-run extraction over a project's stored document.
    ///
    /// Previously extracted images are replaced: figure/table attachments
    /// are dropped before the job is queued, while directly uploaded images
    /// stay in place. The run itself happens in the background worker.
    pub fn reextract_document_images(
        &self,
        actor: &User,
        project_id: &str,
        extract_tables: bool,
    ) -> ServiceResult<ExtractionJob> {
        let project = self.get_project_authorized(actor, project_id)?;

        let checksum = project.document_checksum.clone().ok_or_else(|| {
            ServiceError::InvalidRequest {
                message: "Project has no uploaded document to extract from".to_string(),
            }
        })?;

        let document_path = project.document_path.as_deref().unwrap_or_default();
        if !Path::new(document_path).exists() {
            return Err(ServiceError::InvalidRequest {
                message: "Stored document file is missing; re-upload the document".to_string(),
            });
        }

        let removed = self.remove_extracted_images(project_id)?;

        let job = self
            .db
            .queue_extraction_job(project_id, &checksum, extract_tables, true)?
            .ok_or_else(|| ServiceError::Internal {
                message: "Forced re-queue did not produce a job".to_string(),
            })?;

        info!(
            project_id = %project_id,
            job_id = %job.id,
            replaced_images = removed,
            "Queued document re-extraction"
        );

        Ok(job)
    }

    /// List extraction jobs for a project
    pub fn list_extraction_jobs(
        &self,
        actor: &User,
        project_id: &str,
    ) -> ServiceResult<Vec<ExtractionJob>> {
        self.get_project_authorized(actor, project_id)?;
        self.db.list_extraction_jobs(project_id)
    }

    /// Start the extraction worker.
    /// This should be called once on server startup.
    pub fn start_extraction_worker(service: Arc<ScriptoriumService>) {
        tokio::spawn(async move {
            info!("Extraction worker started");
            loop {
                match service.db.get_next_pending_job() {
                    Ok(Some(job)) => {
                        info!(
                            job_id = %job.id,
                            project_id = %job.project_id,
                            "Processing queued extraction job"
                        );

                        let runner = service.clone();
                        let result = tokio::task::spawn_blocking(move || {
                            runner.run_extraction_job(&job);
                        })
                        .await;

                        if let Err(e) = result {
                            error!(error = %e, "Extraction task panicked");
                        }
                    }
                    Ok(None) => {
                        tokio::time::sleep(std::time::Duration::from_secs(2)).await;
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to poll for pending extraction jobs");
                        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                    }
                }
            }
        });
    }

    /// Execute one extraction job synchronously.
    ///
    /// Nothing propagates out of here: a document that cannot be processed
    /// marks the job failed with zero extracted items, and the worker moves
    /// on.
    pub(crate) fn run_extraction_job(&self, job: &ExtractionJob) {
        let started = Instant::now();
        self.active_extractions
            .insert(job.project_id.clone(), started);

        let outcome = self.execute_extraction(job);

        self.active_extractions.remove(&job.project_id);

        match outcome {
            Ok(count) => {
                if let Err(e) =
                    self.db
                        .finish_extraction_job(&job.id, JobStatus::Completed, count as i64, None)
                {
                    error!(job_id = %job.id, error = %e, "Failed to mark job completed");
                }
                metrics::counter!("scriptorium_extraction_jobs_total", "outcome" => "completed")
                    .increment(1);
                info!(
                    job_id = %job.id,
                    project_id = %job.project_id,
                    images = count,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Extraction job complete"
                );
            }
            Err(e) => {
                let message = format_error_chain(&e);
                warn!(
                    job_id = %job.id,
                    project_id = %job.project_id,
                    error = %message,
                    "Extraction job failed"
                );
                metrics::counter!("scriptorium_extraction_jobs_total", "outcome" => "failed")
                    .increment(1);
                if let Err(update_err) =
                    self.db
                        .finish_extraction_job(&job.id, JobStatus::Failed, 0, Some(&message))
                {
                    error!(
                        job_id = %job.id,
                        original_error = %message,
                        update_error = %update_err,
                        "Failed to mark job failed"
                    );
                }
            }
        }
    }

    fn execute_extraction(&self, job: &ExtractionJob) -> ServiceResult<usize> {
        let project = self
            .db
            .get_project(&job.project_id)?
            .ok_or_else(|| ServiceError::ProjectNotFound {
                project_id: job.project_id.clone(),
            })?;

        let document_path = project
            .document_path
            .as_deref()
            .ok_or_else(|| ServiceError::InvalidRequest {
                message: "Project has no stored document".to_string(),
            })?;
        let filename = project
            .document_filename
            .as_deref()
            .unwrap_or("document.pdf");

        self.extractor.extract_document_images(
            &self.db,
            &job.project_id,
            Path::new(document_path),
            filename,
            job.extract_tables,
        )
    }
}
