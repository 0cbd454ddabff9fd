//! Admin image endpoints: upload, ordering, featured flag, deletion.

use axum::{
    Json,
    extract::{Multipart, Path, Query, State},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::db::ProjectImage;
use crate::error::ServiceError;

use super::AppState;
use super::projects::{ActorParams, DeleteResponse};

/// Request to reorder a project's images
#[derive(Deserialize)]
pub struct ReorderRequest {
    pub image_ids: Vec<String>,
}

/// Response for bulk image deletion
#[derive(Serialize)]
pub struct DeleteImagesResponse {
    pub success: bool,
    pub deleted_count: usize,
    pub message: String,
}

/// List a project's images in display order
pub async fn list_images_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<ActorParams>,
) -> Result<Json<Vec<ProjectImage>>, ServiceError> {
    let actor = state.actor(&params)?;
    let images = state.service.list_project_images(&actor, &id)?;
    Ok(Json(images))
}

/// Upload an image attachment (multipart: `file`)
pub async fn upload_image_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<ActorParams>,
    mut multipart: Multipart,
) -> Result<Json<ProjectImage>, ServiceError> {
    let actor = state.actor(&params)?;

    let mut file: Option<Vec<u8>> = None;
    while let Ok(Some(field)) = multipart.next_field().await {
        if field.name() == Some("file") {
            let data = field
                .bytes()
                .await
                .map_err(|e| ServiceError::InvalidRequest {
                    message: e.to_string(),
                })?;
            file = Some(data.to_vec());
        }
    }

    let data = file.ok_or_else(|| ServiceError::InvalidRequest {
        message: "No file provided".to_string(),
    })?;

    let image = state.service.upload_image(&actor, &id, &data)?;
    Ok(Json(image))
}

/// Apply an explicit display order
pub async fn reorder_images_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<ActorParams>,
    Json(request): Json<ReorderRequest>,
) -> Result<Json<Vec<ProjectImage>>, ServiceError> {
    let actor = state.actor(&params)?;
    let images = state
        .service
        .reorder_images(&actor, &id, &request.image_ids)?;
    Ok(Json(images))
}

/// Designate the featured image
pub async fn set_featured_image_handler(
    State(state): State<Arc<AppState>>,
    Path((id, image_id)): Path<(String, String)>,
    Query(params): Query<ActorParams>,
) -> Result<Json<ProjectImage>, ServiceError> {
    let actor = state.actor(&params)?;
    let image = state.service.set_featured_image(&actor, &id, &image_id)?;
    Ok(Json(image))
}

/// Delete a single image
pub async fn delete_image_handler(
    State(state): State<Arc<AppState>>,
    Path((id, image_id)): Path<(String, String)>,
    Query(params): Query<ActorParams>,
) -> Result<Json<DeleteResponse>, ServiceError> {
    let actor = state.actor(&params)?;
    let deleted = state.service.delete_image(&actor, &id, &image_id)?;

    if deleted {
        Ok(Json(DeleteResponse {
            success: true,
            message: "Image deleted".to_string(),
        }))
    } else {
        Err(ServiceError::ImageNotFound { image_id })
    }
}

/// Delete all extraction-derived images, keeping uploads
pub async fn delete_extracted_images_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<ActorParams>,
) -> Result<Json<DeleteImagesResponse>, ServiceError> {
    let actor = state.actor(&params)?;
    let count = state.service.delete_extracted_images(&actor, &id)?;

    Ok(Json(DeleteImagesResponse {
        success: true,
        deleted_count: count,
        message: format!("Deleted {} extracted images", count),
    }))
}
