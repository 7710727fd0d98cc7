//! REST endpoints for ingestion and bulk parsing operations.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tracing::error;

use crate::error::PipelineError;
use crate::ingest::Ingestor;
use crate::pipeline::orchestrator::EmailParser;
use crate::pipeline::{backfill_deal, reparse_all};

/// Shared state for pipeline routes.
#[derive(Clone)]
pub struct AppState {
    pub parser: Arc<EmailParser>,
    pub ingestor: Arc<Ingestor>,
}

impl AppState {
    pub fn new(parser: Arc<EmailParser>) -> Self {
        let ingestor = Arc::new(Ingestor::new(Arc::clone(&parser)));
        Self { parser, ingestor }
    }
}

/// Build the pipeline REST routes.
pub fn pipeline_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/api/orgs/{org_id}/deals/{deal_id}/backfill",
            post(post_backfill),
        )
        .route("/api/orgs/{org_id}/reparse", post(post_reparse))
        .route("/api/orgs/{org_id}/ingest", post(post_ingest))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// GET /health
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

/// POST /api/orgs/{org_id}/deals/{deal_id}/backfill
///
/// Re-runs parsing over the org's stored emails so the named deal picks
/// up historical matches. Returns the backfill summary.
async fn post_backfill(
    State(state): State<AppState>,
    Path((org_id, deal_id)): Path<(String, String)>,
) -> Response {
    match backfill_deal(&state.parser, &org_id, &deal_id).await {
        Ok(summary) => Json(summary).into_response(),
        Err(e) => error_response(e),
    }
}

/// POST /api/orgs/{org_id}/reparse
///
/// Reparses every email whose current result is stale (simple-parsed or
/// failed). Returns the reparse summary.
async fn post_reparse(State(state): State<AppState>, Path(org_id): Path<String>) -> Response {
    match reparse_all(&state.parser, &org_id).await {
        Ok(summary) => Json(summary).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
struct IngestRequest {
    account_id: String,
    /// Raw RFC 5322 messages, one string per email.
    messages: Vec<String>,
}

/// POST /api/orgs/{org_id}/ingest
async fn post_ingest(
    State(state): State<AppState>,
    Path(org_id): Path<String>,
    Json(request): Json<IngestRequest>,
) -> Response {
    let messages: Vec<Vec<u8>> = request.messages.into_iter().map(String::into_bytes).collect();
    match state
        .ingestor
        .ingest_batch(&org_id, &request.account_id, &messages)
        .await
    {
        Ok(summary) => Json(summary).into_response(),
        Err(e) => error_response(e),
    }
}

fn error_response(e: PipelineError) -> Response {
    let status = match &e {
        PipelineError::DealNotFound { .. } | PipelineError::EmailNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        PipelineError::MalformedEmail(_) => StatusCode::BAD_REQUEST,
        _ => {
            error!(error = %e, "Pipeline request failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, Json(serde_json::json!({"error": e.to_string()}))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use crate::config::PipelineConfig;
    use crate::store::{EmailStore, LibSqlBackend};

    async fn test_app() -> Router {
        let store: Arc<dyn EmailStore> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let parser = Arc::new(EmailParser::new(store, None, PipelineConfig::default()));
        pipeline_routes(AppState::new(parser))
    }

    #[tokio::test]
    async fn health_returns_ok() {
        let app = test_app().await;
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn backfill_of_unknown_deal_is_404() {
        let app = test_app().await;
        let response = app
            .oneshot(
                Request::post("/api/orgs/org-1/deals/nope/backfill")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn reparse_on_empty_org_returns_summary() {
        let app = test_app().await;
        let response = app
            .oneshot(
                Request::post("/api/orgs/org-1/reparse")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let v: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(v["total"], 0);
    }

    #[tokio::test]
    async fn ingest_accepts_raw_mime_payload() {
        let app = test_app().await;
        let body = serde_json::json!({
            "account_id": "acct-1",
            "messages": [
                "From: jane@acmecap.com\r\nSubject: hello\r\nMessage-ID: <m@x>\r\n\r\nhi"
            ]
        });
        let response = app
            .oneshot(
                Request::post("/api/orgs/org-1/ingest")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let v: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(v["received"], 1);
        assert_eq!(v["stored"], 1);
        assert_eq!(v["parsed"], 1);
    }
}
