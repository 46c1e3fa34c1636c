// Dossier HTTP routes

use std::path::PathBuf;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::warn;
use utoipa::ToSchema;

use scribe_storage::{CreateDossier, Database, DocumentRow, DossierRow};

use crate::common::http_error;
use crate::identity::CallerIdentity;

/// App state
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub chunks_dir: PathBuf,
}

/// Request to create a dossier
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateDossierRequest {
    pub title: Option<String>,
}

/// Dossier with its ingested documents
#[derive(Debug, Serialize, ToSchema)]
pub struct DossierResponse {
    #[schema(value_type = Object)]
    pub dossier: DossierRow,
    #[schema(value_type = Vec<Object>)]
    pub documents: Vec<DocumentRow>,
}

/// Create dossier routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/dossiers", post(create_dossier))
        .route("/v1/dossiers/:dossier_id", get(get_dossier).delete(delete_dossier))
        .with_state(state)
}

/// POST /v1/dossiers - Create a dossier
#[utoipa::path(
    post,
    path = "/v1/dossiers",
    request_body = CreateDossierRequest,
    responses(
        (status = 201, description = "Dossier created"),
        (status = 401, description = "Missing caller identity")
    ),
    tag = "dossiers"
)]
pub async fn create_dossier(
    State(state): State<AppState>,
    CallerIdentity(caller): CallerIdentity,
    Json(request): Json<CreateDossierRequest>,
) -> Result<(StatusCode, Json<DossierRow>), StatusCode> {
    let dossier = state
        .db
        .create_dossier(CreateDossier {
            id: scribe_core::mint_id(),
            owner_id: caller.owner_id,
            title: request.title,
        })
        .await
        .map_err(http_error)?;

    Ok((StatusCode::CREATED, Json(dossier)))
}

/// GET /v1/dossiers/:id - Fetch a dossier and its documents
#[utoipa::path(
    get,
    path = "/v1/dossiers/{dossier_id}",
    params(("dossier_id" = String, Path, description = "Dossier id")),
    responses(
        (status = 200, description = "Dossier found", body = DossierResponse),
        (status = 403, description = "Owned by someone else"),
        (status = 404, description = "Unknown dossier")
    ),
    tag = "dossiers"
)]
pub async fn get_dossier(
    State(state): State<AppState>,
    CallerIdentity(caller): CallerIdentity,
    Path(dossier_id): Path<String>,
) -> Result<Json<DossierResponse>, StatusCode> {
    let dossier = state
        .db
        .get_dossier(&dossier_id)
        .await
        .map_err(http_error)?
        .ok_or(StatusCode::NOT_FOUND)?;
    caller.check_owner(&dossier.owner_id).map_err(http_error)?;

    let documents = state
        .db
        .list_documents(&dossier_id)
        .await
        .map_err(http_error)?;

    Ok(Json(DossierResponse { dossier, documents }))
}

/// DELETE /v1/dossiers/:id - Delete a dossier and its blobs
#[utoipa::path(
    delete,
    path = "/v1/dossiers/{dossier_id}",
    params(("dossier_id" = String, Path, description = "Dossier id")),
    responses(
        (status = 204, description = "Dossier deleted"),
        (status = 403, description = "Owned by someone else"),
        (status = 404, description = "Unknown dossier")
    ),
    tag = "dossiers"
)]
pub async fn delete_dossier(
    State(state): State<AppState>,
    CallerIdentity(caller): CallerIdentity,
    Path(dossier_id): Path<String>,
) -> Result<StatusCode, StatusCode> {
    let dossier = state
        .db
        .get_dossier(&dossier_id)
        .await
        .map_err(http_error)?
        .ok_or(StatusCode::NOT_FOUND)?;
    caller.check_owner(&dossier.owner_id).map_err(http_error)?;

    state
        .db
        .delete_dossier(&dossier_id)
        .await
        .map_err(http_error)?;

    // Blob subtree goes after the database cascade
    let subtree = state.chunks_dir.join(&dossier_id);
    if let Err(e) = tokio::fs::remove_dir_all(&subtree).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(%dossier_id, "Failed to remove blob subtree: {}", e);
        }
    }

    Ok(StatusCode::NO_CONTENT)
}
