//! HTTP API for the scriptorium service.
//!
//! Two surfaces share one router:
//! - `/api/admin`: the management API (project records, uploads, extraction,
//!   publishing, image curation, CSV export)
//! - `/api/public`: the read-only API serving published records
//!
//! Built front-end bundles are served statically when their directories are
//! configured.

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, State},
    http::{HeaderValue, StatusCode, header},
    response::IntoResponse,
    routing::{delete, get, post, put},
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::db::User;
use crate::service::ScriptoriumService;

pub mod images;
pub mod projects;
pub mod public;

use images::{
    delete_extracted_images_handler, delete_image_handler, list_images_handler,
    reorder_images_handler, set_featured_image_handler, upload_image_handler,
};
use projects::{
    create_project_handler, delete_project_handler, export_projects_handler, get_project_handler,
    list_jobs_handler, list_projects_handler, publish_project_handler,
    reextract_document_handler, unpublish_project_handler, update_project_handler,
    upload_document_handler,
};
use public::{
    public_document_handler, public_featured_image_handler, public_image_data_handler,
    public_list_handler, public_project_handler,
};

/// Application state
pub struct AppState {
    pub service: Arc<ScriptoriumService>,
    pub start_time: Instant,
    pub metrics: Option<PrometheusHandle>,
}

/// Build the API router
pub fn router(service: Arc<ScriptoriumService>, metrics: Option<PrometheusHandle>) -> Router {
    let state = Arc::new(AppState {
        service: service.clone(),
        start_time: Instant::now(),
        metrics,
    });

    let cors = build_cors(&service);

    let max_document = service.config.limits.max_document_size_bytes as usize;
    let max_image = service.config.limits.max_image_size_bytes as usize;

    let admin_routes = Router::new()
        .route("/projects", get(list_projects_handler))
        .route("/projects", post(create_project_handler))
        .route("/projects/export", get(export_projects_handler))
        .route("/projects/{id}", get(get_project_handler))
        .route("/projects/{id}", put(update_project_handler))
        .route("/projects/{id}", delete(delete_project_handler))
        .route(
            "/projects/{id}/document",
            post(upload_document_handler)
                // Multipart framing needs headroom beyond the payload cap
                .layer(DefaultBodyLimit::max(max_document + 1_048_576)),
        )
        .route("/projects/{id}/extract", post(reextract_document_handler))
        .route("/projects/{id}/jobs", get(list_jobs_handler))
        .route("/projects/{id}/publish", post(publish_project_handler))
        .route("/projects/{id}/unpublish", post(unpublish_project_handler))
        .route("/projects/{id}/images", get(list_images_handler))
        .route(
            "/projects/{id}/images",
            post(upload_image_handler).layer(DefaultBodyLimit::max(max_image + 1_048_576)),
        )
        .route("/projects/{id}/images/order", put(reorder_images_handler))
        .route(
            "/projects/{id}/images/extracted",
            delete(delete_extracted_images_handler),
        )
        .route(
            "/projects/{id}/images/{image_id}/featured",
            put(set_featured_image_handler),
        )
        .route(
            "/projects/{id}/images/{image_id}",
            delete(delete_image_handler),
        )
        .route("/users", get(list_users_handler));

    let public_routes = Router::new()
        .route("/projects", get(public_list_handler))
        .route("/projects/{slug}", get(public_project_handler))
        .route("/projects/{slug}/document", get(public_document_handler))
        .route(
            "/projects/{slug}/featured-image",
            get(public_featured_image_handler),
        )
        .route(
            "/projects/{project_id}/images/{image_id}/data",
            get(public_image_data_handler),
        );

    let mut app = Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .nest("/api/admin", admin_routes)
        .nest("/api/public", public_routes);

    if let Some(dir) = &service.config.storage.admin_assets_dir {
        if dir.is_dir() {
            app = app.nest_service("/admin", ServeDir::new(dir));
        } else {
            warn!(path = %dir.display(), "Admin assets directory not found");
        }
    }
    if let Some(dir) = &service.config.storage.public_assets_dir {
        if dir.is_dir() {
            app = app.fallback_service(ServeDir::new(dir));
        } else {
            warn!(path = %dir.display(), "Public assets directory not found");
        }
    }

    app.layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn build_cors(service: &ScriptoriumService) -> CorsLayer {
    let origins = &service.config.cors.allowed_origins;

    if origins.is_empty() {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }

    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring unparsable CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(parsed)
        .allow_methods(Any)
        .allow_headers(Any)
}

// === Health & Metrics ===

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: String,
    uptime_seconds: u64,
    active_extractions: usize,
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        active_extractions: state.service.active_extractions.len(),
    })
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let body = state
        .metrics
        .as_ref()
        .map(|handle| handle.render())
        .unwrap_or_default();

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
}

// === Users ===

async fn list_users_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<User>>, crate::error::ServiceError> {
    let users = state.service.db.list_users()?;
    Ok(Json(users))
}
