//! Admin project endpoints: CRUD, document upload, extraction, publishing,
//! and CSV export.

use axum::{
    Json,
    extract::{Multipart, Path, Query, State},
    http::header,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::db::{ExtractionJob, Project, User};
use crate::error::{ServiceError, ServiceResult};

use super::AppState;

/// The acting account, named explicitly on every admin request
#[derive(Deserialize)]
pub struct ActorParams {
    pub user_id: Option<String>,
}

impl AppState {
    pub(super) fn actor(&self, params: &ActorParams) -> ServiceResult<User> {
        self.service.resolve_actor(params.user_id.as_deref())
    }
}

/// Request to create a project
#[derive(Deserialize)]
pub struct CreateProjectRequest {
    pub title: String,
    pub abstract_text: Option<String>,
    pub author_name: Option<String>,
}

/// Request to update project metadata
#[derive(Deserialize)]
pub struct UpdateProjectRequest {
    pub title: String,
    pub abstract_text: Option<String>,
    pub author_name: Option<String>,
}

/// Request for document re-extraction
#[derive(Deserialize)]
pub struct ReextractRequest {
    #[serde(default)]
    pub extract_tables: bool,
}

/// Response for delete operations
#[derive(Serialize)]
pub struct DeleteResponse {
    pub success: bool,
    pub message: String,
}

/// Response after a document upload: extraction is scheduled, not done
#[derive(Serialize)]
pub struct UploadDocumentResponse {
    pub project: Project,
    pub extraction_queued: bool,
    pub message: String,
}

/// Response after queueing a re-extraction
#[derive(Serialize)]
pub struct ReextractResponse {
    pub job: ExtractionJob,
    pub message: String,
}

/// List projects visible to the acting user
pub async fn list_projects_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ActorParams>,
) -> Result<Json<Vec<Project>>, ServiceError> {
    let actor = state.actor(&params)?;
    let projects = state.service.list_projects(&actor)?;
    Ok(Json(projects))
}

/// Create a project record
pub async fn create_project_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ActorParams>,
    Json(request): Json<CreateProjectRequest>,
) -> Result<Json<Project>, ServiceError> {
    let actor = state.actor(&params)?;
    let project = state.service.create_project(
        &actor,
        &request.title,
        request.abstract_text,
        request.author_name,
    )?;
    Ok(Json(project))
}

/// Get a specific project by ID
pub async fn get_project_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<ActorParams>,
) -> Result<Json<Project>, ServiceError> {
    let actor = state.actor(&params)?;
    let project = state.service.get_project_authorized(&actor, &id)?;
    Ok(Json(project))
}

/// Update project metadata
pub async fn update_project_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<ActorParams>,
    Json(request): Json<UpdateProjectRequest>,
) -> Result<Json<Project>, ServiceError> {
    let actor = state.actor(&params)?;
    let project = state.service.update_project(
        &actor,
        &id,
        &request.title,
        request.abstract_text.as_deref(),
        request.author_name.as_deref(),
    )?;
    Ok(Json(project))
}

/// Delete a project
pub async fn delete_project_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<ActorParams>,
) -> Result<Json<DeleteResponse>, ServiceError> {
    let actor = state.actor(&params)?;
    let deleted = state.service.delete_project(&actor, &id)?;

    if deleted {
        Ok(Json(DeleteResponse {
            success: true,
            message: "Project deleted".to_string(),
        }))
    } else {
        Err(ServiceError::ProjectNotFound { project_id: id })
    }
}

/// Upload a project document (multipart: `file`, optional `extract_tables`)
pub async fn upload_document_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<ActorParams>,
    mut multipart: Multipart,
) -> Result<Json<UploadDocumentResponse>, ServiceError> {
    let actor = state.actor(&params)?;

    let mut file: Option<(Vec<u8>, String, String)> = None;
    let mut extract_tables = false;

    while let Ok(Some(field)) = multipart.next_field().await {
        let name = field.name().unwrap_or("").to_string();

        match name.as_str() {
            "file" => {
                let filename = field.file_name().unwrap_or("document").to_string();
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ServiceError::InvalidRequest {
                        message: e.to_string(),
                    })?;
                file = Some((data.to_vec(), filename, content_type));
            }
            "extract_tables" => {
                let value = field.text().await.map_err(|e| ServiceError::InvalidRequest {
                    message: e.to_string(),
                })?;
                extract_tables = matches!(value.as_str(), "true" | "1" | "on");
            }
            _ => {}
        }
    }

    let (data, filename, content_type) = file.ok_or_else(|| ServiceError::InvalidRequest {
        message: "No file provided".to_string(),
    })?;

    let (project, job) = state.service.upload_document(
        &actor,
        &id,
        &data,
        &filename,
        &content_type,
        extract_tables,
    )?;

    let extraction_queued = job.is_some();
    let message = if extraction_queued {
        "Document stored; extraction scheduled".to_string()
    } else {
        "Document stored; identical content was already extracted".to_string()
    };

    Ok(Json(UploadDocumentResponse {
        project,
        extraction_queued,
        message,
    }))
}

/// Queue re-extraction over the stored document
pub async fn reextract_document_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<ActorParams>,
    Json(request): Json<ReextractRequest>,
) -> Result<Json<ReextractResponse>, ServiceError> {
    let actor = state.actor(&params)?;
    let job = state
        .service
        .reextract_document_images(&actor, &id, request.extract_tables)?;

    Ok(Json(ReextractResponse {
        job,
        message: "Re-extraction queued".to_string(),
    }))
}

/// List extraction jobs for a project
pub async fn list_jobs_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<ActorParams>,
) -> Result<Json<Vec<ExtractionJob>>, ServiceError> {
    let actor = state.actor(&params)?;
    let jobs = state.service.list_extraction_jobs(&actor, &id)?;
    Ok(Json(jobs))
}

/// Publish a project
pub async fn publish_project_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<ActorParams>,
) -> Result<Json<Project>, ServiceError> {
    let actor = state.actor(&params)?;
    let project = state.service.publish_project(&actor, &id)?;
    Ok(Json(project))
}

/// Take a project back to draft
pub async fn unpublish_project_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<ActorParams>,
) -> Result<Json<Project>, ServiceError> {
    let actor = state.actor(&params)?;
    let project = state.service.unpublish_project(&actor, &id)?;
    Ok(Json(project))
}

/// Export visible projects as CSV
pub async fn export_projects_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ActorParams>,
) -> Result<Response, ServiceError> {
    let actor = state.actor(&params)?;
    let csv = state.service.export_projects_csv(&actor)?;

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"projects.csv\"",
            ),
        ],
        csv,
    )
        .into_response())
}
