//! Public read-only endpoints serving published projects.
//!
//! No account context here: only published records are visible, and reads
//! maintain the view/download counters.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::header,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::db::{Project, ProjectImage};
use crate::error::{ProcessingError, ServiceError};

use super::AppState;

/// Public listing query parameters
#[derive(Deserialize)]
pub struct PublicListParams {
    pub limit: Option<usize>,
}

/// Published project summary
#[derive(Serialize)]
pub struct PublicProjectDto {
    pub title: String,
    pub slug: String,
    pub abstract_text: Option<String>,
    pub author_name: Option<String>,
    pub view_count: i64,
    pub download_count: i64,
    pub has_document: bool,
    pub created_at: String,
}

impl From<&Project> for PublicProjectDto {
    fn from(project: &Project) -> Self {
        Self {
            title: project.title.clone(),
            slug: project.slug.clone().unwrap_or_default(),
            abstract_text: project.abstract_text.clone(),
            author_name: project.author_name.clone(),
            view_count: project.view_count,
            download_count: project.download_count,
            has_document: project.has_document(),
            created_at: project.created_at.to_rfc3339(),
        }
    }
}

/// Image metadata exposed publicly; bytes come from the data endpoint
#[derive(Serialize)]
pub struct PublicImageDto {
    pub id: String,
    pub project_id: String,
    pub content_type: String,
    pub order_index: i32,
    pub is_featured: bool,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl From<ProjectImage> for PublicImageDto {
    fn from(image: ProjectImage) -> Self {
        Self {
            id: image.id,
            project_id: image.project_id,
            content_type: image.content_type,
            order_index: image.order_index,
            is_featured: image.is_featured,
            width: image.width,
            height: image.height,
        }
    }
}

/// Published project detail with its image listing
#[derive(Serialize)]
pub struct PublicProjectDetail {
    #[serde(flatten)]
    pub project: PublicProjectDto,
    pub images: Vec<PublicImageDto>,
}

/// List published projects, most recent first
pub async fn public_list_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PublicListParams>,
) -> Result<Json<Vec<PublicProjectDto>>, ServiceError> {
    let limit = params.limit.unwrap_or(50).min(200);
    let projects = state.service.db.list_published_projects(limit)?;

    Ok(Json(projects.iter().map(PublicProjectDto::from).collect()))
}

/// Get a published project by slug. Counts as a view.
pub async fn public_project_handler(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
) -> Result<Json<PublicProjectDetail>, ServiceError> {
    let project = state
        .service
        .db
        .get_published_project_by_slug(&slug)?
        .ok_or_else(|| ServiceError::ProjectNotFound {
            project_id: slug.clone(),
        })?;

    state.service.db.increment_view_count(&project.id)?;

    let images = state.service.db.get_project_images(&project.id)?;

    let mut dto = PublicProjectDto::from(&project);
    dto.view_count += 1;

    Ok(Json(PublicProjectDetail {
        project: dto,
        images: images.into_iter().map(PublicImageDto::from).collect(),
    }))
}

/// Download a published project's document. Counts as a download.
pub async fn public_document_handler(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
) -> Result<Response, ServiceError> {
    let project = state
        .service
        .db
        .get_published_project_by_slug(&slug)?
        .ok_or_else(|| ServiceError::ProjectNotFound {
            project_id: slug.clone(),
        })?;

    let document_path =
        project
            .document_path
            .as_deref()
            .ok_or_else(|| ServiceError::ProjectNotFound {
                project_id: slug.clone(),
            })?;

    let data = std::fs::read(document_path)
        .map_err(|e| ServiceError::Processing(ProcessingError::Io(e)))?;

    state.service.db.increment_download_count(&project.id)?;

    let content_type = project
        .document_content_type
        .unwrap_or_else(|| mime::APPLICATION_OCTET_STREAM.to_string());
    let filename = project
        .document_filename
        .unwrap_or_else(|| "document".to_string());

    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename.replace('"', "")),
            ),
        ],
        data,
    )
        .into_response())
}

/// Raw image bytes by project ID + image ID
pub async fn public_image_data_handler(
    State(state): State<Arc<AppState>>,
    Path((project_id, image_id)): Path<(String, String)>,
) -> Result<Response, ServiceError> {
    let project = state
        .service
        .db
        .get_project(&project_id)?
        .filter(|p| p.status == crate::db::ProjectStatus::Published)
        .ok_or_else(|| ServiceError::ProjectNotFound {
            project_id: project_id.clone(),
        })?;

    let image = state
        .service
        .db
        .get_project_image(&project.id, &image_id)?
        .ok_or_else(|| ServiceError::ImageNotFound {
            image_id: image_id.clone(),
        })?;

    let data = std::fs::read(&image.internal_path)
        .map_err(|e| ServiceError::Processing(ProcessingError::Io(e)))?;

    Ok(([(header::CONTENT_TYPE, image.content_type)], data).into_response())
}

/// Featured image bytes by slug, a shortcut for listing thumbnails
pub async fn public_featured_image_handler(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
) -> Result<Response, ServiceError> {
    let project = state
        .service
        .db
        .get_published_project_by_slug(&slug)?
        .ok_or_else(|| ServiceError::ProjectNotFound {
            project_id: slug.clone(),
        })?;

    // Fall back to the first image when none is flagged
    let image = match state.service.db.get_featured_image(&project.id)? {
        Some(image) => image,
        None => state
            .service
            .db
            .get_project_images(&project.id)?
            .into_iter()
            .next()
            .ok_or_else(|| ServiceError::ImageNotFound {
                image_id: format!("featured:{}", slug),
            })?,
    };

    let data = std::fs::read(&image.internal_path)
        .map_err(|e| ServiceError::Processing(ProcessingError::Io(e)))?;

    Ok(([(header::CONTENT_TYPE, image.content_type)], data).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::AppState;
    use crate::service::tests::{faculty, test_service};
    use std::time::Instant;

    fn state() -> (Arc<AppState>, tempfile::TempDir) {
        let (service, dir) = test_service();
        (
            Arc::new(AppState {
                service,
                start_time: Instant::now(),
                metrics: None,
            }),
            dir,
        )
    }

    #[test]
    fn test_unknown_slug_is_not_found() {
        let (state, _dir) = state();
        let result = tokio_test::block_on(public_project_handler(
            State(state),
            Path("no-such-slug".to_string()),
        ));
        assert!(matches!(result, Err(ServiceError::ProjectNotFound { .. })));
    }

    #[test]
    fn test_draft_projects_are_invisible_publicly() {
        let (state, _dir) = state();
        let owner = faculty(&state.service, "owner");
        state
            .service
            .create_project(&owner, "Hidden Draft", None, None)
            .unwrap();

        let listed =
            tokio_test::block_on(public_list_handler(
                State(state.clone()),
                Query(PublicListParams { limit: None }),
            ))
            .unwrap();
        assert!(listed.0.is_empty());
    }

    #[test]
    fn test_public_view_increments_counter() {
        let (state, _dir) = state();
        let owner = faculty(&state.service, "owner");
        let project = state
            .service
            .create_project(&owner, "Visible Study", None, None)
            .unwrap();
        state.service.publish_project(&owner, &project.id).unwrap();

        for _ in 0..2 {
            let detail = tokio_test::block_on(public_project_handler(
                State(state.clone()),
                Path("visible-study".to_string()),
            ))
            .unwrap();
            assert_eq!(detail.0.project.slug, "visible-study");
        }

        let stored = state.service.db.get_project(&project.id).unwrap().unwrap();
        assert_eq!(stored.view_count, 2);
    }
}
