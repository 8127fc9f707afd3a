//! Application setup and router construction.

use std::sync::Arc;

use axum::{
    http::{header::CONTENT_TYPE, Method},
    routing::{get, post},
    Router,
};
use sqlx::PgPool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use pipeline::CompetitorPipeline;

use crate::routes::{get_analysis, health_handler, submit_analysis};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<CompetitorPipeline>,
    /// None when running against the in-memory store.
    pub db_pool: Option<PgPool>,
}

pub fn build_app(pipeline: Arc<CompetitorPipeline>, db_pool: Option<PgPool>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([CONTENT_TYPE])
        .allow_origin(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/analyses", post(submit_analysis))
        .route("/api/analyses/:id", get(get_analysis))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(AppState { pipeline, db_pool })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use pipeline::testing::{MockInsightGenerator, MockScraper};
    use pipeline::{MemoryStatusStore, PipelineConfig};
    use std::time::Duration;
    use tower::ServiceExt;

    fn test_app() -> Router {
        let pipeline = Arc::new(CompetitorPipeline::new(
            Arc::new(MemoryStatusStore::new()),
            Arc::new(MockScraper::new()),
            Arc::new(MockInsightGenerator::new()),
            PipelineConfig::compressed(Duration::from_secs(5)),
        ));
        build_app(pipeline, None)
    }

    #[tokio::test]
    async fn health_is_ok_without_a_database() {
        let response = test_app()
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn submit_returns_accepted_with_an_id() {
        let body = serde_json::json!({
            "requester_id": uuid::Uuid::new_v4(),
            "targets": ["rival.com"],
        });
        let response = test_app()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/analyses")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn empty_targets_is_a_bad_request() {
        let body = serde_json::json!({
            "requester_id": uuid::Uuid::new_v4(),
            "targets": [],
        });
        let response = test_app()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/analyses")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_analysis_is_not_found() {
        let response = test_app()
            .oneshot(
                Request::builder()
                    .uri(format!("/api/analyses/{}", uuid::Uuid::new_v4()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
