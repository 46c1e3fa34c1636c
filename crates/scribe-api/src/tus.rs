// Resumable upload endpoints (tus 1.0.0 subset: core + creation)
//
// OPTIONS /ingest/tus      capability discovery
// POST    /ingest/tus      create (Upload-Length required)
// HEAD    /ingest/tus/:id  offset for resume
// PATCH   /ingest/tus/:id  append bytes; final patch returns the ingest
//                          descriptor as JSON

use axum::{
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{head, options},
    Json, Router,
};
use futures::TryStreamExt;
use tokio_util::io::StreamReader;
use tracing::debug;

use scribe_ingest::{IngestController, UploadManager};

use crate::common::http_error;
use crate::identity::CallerIdentity;

const TUS_VERSION: &str = "1.0.0";

/// App state
#[derive(Clone)]
pub struct AppState {
    pub manager: UploadManager,
    pub controller: IngestController,
}

/// Create tus routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/ingest/tus", options(tus_options).post(create_upload))
        .route("/ingest/tus/:upload_id", head(head_upload).patch(patch_upload))
        .with_state(state)
}

/// OPTIONS /ingest/tus - protocol capabilities
async fn tus_options(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::NO_CONTENT,
        [
            ("tus-resumable", TUS_VERSION.to_string()),
            ("tus-version", TUS_VERSION.to_string()),
            ("tus-extension", "creation".to_string()),
            ("tus-max-size", state.manager.max_upload_size().to_string()),
        ],
    )
}

/// POST /ingest/tus - create an upload
async fn create_upload(
    State(state): State<AppState>,
    CallerIdentity(caller): CallerIdentity,
    headers: HeaderMap,
) -> Result<Response, StatusCode> {
    let total_size: i64 = headers
        .get("upload-length")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .ok_or(StatusCode::BAD_REQUEST)?;

    let explicit_dossier = headers
        .get("x-dossier-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty());

    let dossier = state
        .controller
        .resolve_dossier(&caller, explicit_dossier, None)
        .await
        .map_err(http_error)?;

    let upload = state
        .manager
        .create(&caller, &dossier.id, total_size)
        .await
        .map_err(http_error)?;

    debug!(upload_id = %upload.id, dossier_id = %dossier.id, "tus upload created");

    Ok((
        StatusCode::CREATED,
        [
            ("tus-resumable", TUS_VERSION.to_string()),
            ("location", format!("/ingest/tus/{}", upload.id)),
            ("upload-offset", "0".to_string()),
        ],
    )
        .into_response())
}

/// HEAD /ingest/tus/:id - current offset
async fn head_upload(
    State(state): State<AppState>,
    CallerIdentity(caller): CallerIdentity,
    Path(upload_id): Path<String>,
) -> Result<Response, StatusCode> {
    let (offset, total) = state
        .manager
        .offset(&caller, &upload_id)
        .await
        .map_err(http_error)?;

    Ok((
        StatusCode::OK,
        [
            ("tus-resumable", TUS_VERSION.to_string()),
            ("upload-offset", offset.to_string()),
            ("upload-length", total.to_string()),
            ("cache-control", "no-store".to_string()),
        ],
    )
        .into_response())
}

/// PATCH /ingest/tus/:id - append bytes at the declared offset
async fn patch_upload(
    State(state): State<AppState>,
    CallerIdentity(caller): CallerIdentity,
    Path(upload_id): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, StatusCode> {
    let client_offset: i64 = headers
        .get("upload-offset")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .ok_or(StatusCode::BAD_REQUEST)?;

    let reader = StreamReader::new(
        body.into_data_stream()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)),
    );

    let outcome = state
        .manager
        .patch(&caller, &upload_id, client_offset, reader)
        .await
        .map_err(http_error)?;

    if !outcome.is_final() {
        return Ok((
            StatusCode::NO_CONTENT,
            [
                ("tus-resumable", TUS_VERSION.to_string()),
                ("upload-offset", outcome.new_offset.to_string()),
            ],
        )
            .into_response());
    }

    // Final patch: complete, dedup, and hand off to the workflow chain
    let completed = state
        .manager
        .complete(&caller, &upload_id)
        .await
        .map_err(http_error)?;
    let receipt = state
        .controller
        .ingest_completed(&caller, &completed)
        .await
        .map_err(http_error)?;

    Ok((
        StatusCode::OK,
        [
            ("tus-resumable", TUS_VERSION.to_string()),
            ("upload-offset", outcome.new_offset.to_string()),
        ],
        Json(receipt),
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use std::sync::Arc;
    use tower::ServiceExt;

    use scribe_durable::{InMemoryJobStore, JobState, JobStore};
    use scribe_ingest::STEP_PDF_TO_IMAGES;
    use scribe_storage::{CreateDossier, Database, ObservabilityStore};

    struct TestApp {
        router: Router,
        queue: Arc<InMemoryJobStore>,
        _tmp: tempfile::TempDir,
    }

    async fn app() -> TestApp {
        let tmp = tempfile::TempDir::new().expect("tempdir");
        let db = Database::from_url("sqlite::memory:").await.expect("main db");
        let observability = ObservabilityStore::from_url("sqlite::memory:")
            .await
            .expect("observability db");
        let queue = Arc::new(InMemoryJobStore::new());

        db.create_dossier(CreateDossier {
            id: "d1".into(),
            owner_id: "alice".into(),
            title: None,
        })
        .await
        .expect("dossier");

        let manager = UploadManager::new(db.clone(), tmp.path().join("chunks"), 1024 * 1024);
        // No worker here: submitted jobs stay observable in the queue
        let controller = IngestController::new(db, queue.clone(), observability);

        TestApp {
            router: routes(AppState {
                manager,
                controller,
            }),
            queue,
            _tmp: tmp,
        }
    }

    fn authed(request: axum::http::request::Builder) -> axum::http::request::Builder {
        request
            .header("X-Owner-Id", "alice")
            .header("Authorization", "Bearer token-alice")
    }

    async fn create(router: &Router, len: usize) -> String {
        let response = router
            .clone()
            .oneshot(
                authed(Request::post("/ingest/tus"))
                    .header("Upload-Length", len.to_string())
                    .header("X-Dossier-Id", "d1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(header(&response, "upload-offset"), "0");

        let location = header(&response, "location");
        location.rsplit('/').next().unwrap().to_string()
    }

    fn header(response: &Response, name: &str) -> String {
        response
            .headers()
            .get(name)
            .expect(name)
            .to_str()
            .unwrap()
            .to_string()
    }

    #[tokio::test]
    async fn test_options_advertises_protocol() {
        let app = app().await;
        let response = app
            .router
            .oneshot(
                Request::options("/ingest/tus")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(header(&response, "tus-resumable"), "1.0.0");
        assert_eq!(header(&response, "tus-version"), "1.0.0");
        assert_eq!(header(&response, "tus-extension"), "creation");
        assert_eq!(header(&response, "tus-max-size"), (1024 * 1024).to_string());
    }

    #[tokio::test]
    async fn test_create_requires_upload_length() {
        let app = app().await;
        let response = app
            .router
            .oneshot(
                authed(Request::post("/ingest/tus"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_create_requires_identity() {
        let app = app().await;
        let response = app
            .router
            .oneshot(
                Request::post("/ingest/tus")
                    .header("Upload-Length", "10")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_full_upload_submits_workflow_root() {
        let app = app().await;
        let body = b"%PDF-1.7 via http".to_vec();
        let upload_id = create(&app.router, body.len()).await;

        let response = app
            .router
            .clone()
            .oneshot(
                authed(Request::patch(format!("/ingest/tus/{upload_id}")))
                    .header("Upload-Offset", "0")
                    .body(Body::from(body.clone()))
                    .unwrap(),
            )
            .await
            .unwrap();

        // Final patch: 200 with the ingest descriptor
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header(&response, "upload-offset"), body.len().to_string());

        let bytes = axum::body::to_bytes(response.into_body(), 1 << 20)
            .await
            .unwrap();
        let receipt: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(receipt["deduplicated"], false);
        assert!(receipt["run_id"].is_string());
        assert!(receipt["content_hash"].is_string());

        // The root job landed in the queue with the caller's token
        let pending = app.queue.ids_in_state(STEP_PDF_TO_IMAGES, JobState::Pending);
        assert_eq!(pending.len(), 1);
        let job = app.queue.get(pending[0]).await.unwrap();
        assert_eq!(job.payload["owner_id"], "alice");
        assert_eq!(job.payload["original_token"], "Bearer token-alice");
    }

    #[tokio::test]
    async fn test_partial_patch_then_head_then_resume() {
        let app = app().await;
        let body = b"%PDF-1.7 twelve byte tail".to_vec();
        let upload_id = create(&app.router, body.len()).await;
        let split = 9;

        let response = app
            .router
            .clone()
            .oneshot(
                authed(Request::patch(format!("/ingest/tus/{upload_id}")))
                    .header("Upload-Offset", "0")
                    .body(Body::from(body[..split].to_vec()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(header(&response, "upload-offset"), split.to_string());

        let response = app
            .router
            .clone()
            .oneshot(
                authed(Request::head(format!("/ingest/tus/{upload_id}")))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header(&response, "upload-offset"), split.to_string());
        assert_eq!(header(&response, "upload-length"), body.len().to_string());

        let response = app
            .router
            .clone()
            .oneshot(
                authed(Request::patch(format!("/ingest/tus/{upload_id}")))
                    .header("Upload-Offset", split.to_string())
                    .body(Body::from(body[split..].to_vec()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_offset_mismatch_is_conflict() {
        let app = app().await;
        let upload_id = create(&app.router, 100).await;

        let response = app
            .router
            .clone()
            .oneshot(
                authed(Request::patch(format!("/ingest/tus/{upload_id}")))
                    .header("Upload-Offset", "40")
                    .body(Body::from(vec![0u8; 10]))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_cross_owner_is_forbidden_unknown_is_not_found() {
        let app = app().await;
        let upload_id = create(&app.router, 10).await;

        let response = app
            .router
            .clone()
            .oneshot(
                Request::head(format!("/ingest/tus/{upload_id}"))
                    .header("X-Owner-Id", "mallory")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = app
            .router
            .clone()
            .oneshot(
                authed(Request::head("/ingest/tus/nope"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
