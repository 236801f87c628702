//! HTTP Endpoints
//!
//! Health, generation session inspection and cancellation, metrics, and the
//! client WebSocket upgrade.

use axum::{
    extract::{Path, State},
    http::{HeaderValue, Method, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::metrics::metrics_handler;
use crate::state::AppState;
use crate::websocket::ws_handler;
use crate::ServerError;

const FALLBACK_ORIGIN: &str = "http://localhost:3000";

/// Create the application router
pub fn create_router(state: AppState) -> Router {
    let cors_layer = build_cors_layer(&state.config.server.cors_origins, state.config.server.cors_enabled);

    Router::new()
        // Generation sessions
        .route("/api/generation", get(list_sessions))
        .route("/api/generation/:id", get(get_session).delete(cancel_session))
        // Health check
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics_handler))
        // WebSocket
        .route("/ws", get(ws_handler))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer)
        .with_state(state)
}

/// Build CORS layer from configured origins
///
/// - Disabled: permissive (development only)
/// - No valid origins: `http://localhost:3000`
fn build_cors_layer(origins: &[String], enabled: bool) -> CorsLayer {
    if !enabled {
        tracing::warn!("CORS is disabled - allowing all origins");
        return CorsLayer::permissive();
    }

    let parsed_origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| {
            origin.parse::<HeaderValue>().ok().or_else(|| {
                tracing::warn!("Invalid CORS origin: {}", origin);
                None
            })
        })
        .collect();

    if parsed_origins.is_empty() {
        tracing::info!("No usable CORS origins configured, defaulting to {}", FALLBACK_ORIGIN);
        return CorsLayer::new()
            .allow_origin(HeaderValue::from_static(FALLBACK_ORIGIN))
            .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
            .allow_headers(Any);
    }

    tracing::info!("CORS configured with {} origins", parsed_origins.len());
    CorsLayer::new()
        .allow_origin(parsed_origins)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any)
        .allow_credentials(true)
}

/// List generation sessions
async fn list_sessions(State(state): State<AppState>) -> Json<serde_json::Value> {
    let sessions = state.generation.list();
    Json(serde_json::json!({
        "sessions": sessions,
        "count": sessions.len(),
    }))
}

/// Get one generation session
async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let snapshot = state
        .generation
        .status(&id)
        .ok_or_else(|| ServerError::SessionNotFound(id.clone()))?;

    Ok(Json(serde_json::json!(snapshot)))
}

/// Cancel a running generation session
async fn cancel_session(State(state): State<AppState>, Path(id): Path<String>) -> StatusCode {
    if state.generation.cancel(&id).await {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::from(ServerError::SessionNotFound(id))
    }
}

/// Health check
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Readiness check
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ready",
        "client_connected": state.clients.is_connected(),
        "active_generations": state.generation.active_count(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use std::path::PathBuf;
    use std::sync::Arc;
    use tower::ServiceExt;

    use specflow_config::Settings;
    use specflow_core::Specification;
    use specflow_generation::{
        ArtifactStore, BackendError, BackendOutput, CancelSignal, GenerationBackend, GenerationCallbacks,
        GenerationRequest,
    };

    use crate::agent_link::{AgentConnector, AgentLink, AgentLinkError};

    struct IdleBackend;

    #[async_trait]
    impl GenerationBackend for IdleBackend {
        async fn generate(
            &self,
            _request: GenerationRequest,
            _callbacks: &dyn GenerationCallbacks,
            mut cancel: CancelSignal,
        ) -> Result<BackendOutput, BackendError> {
            cancel.cancelled().await;
            Err(BackendError::Incomplete)
        }
    }

    struct NullArtifacts;

    #[async_trait]
    impl ArtifactStore for NullArtifacts {
        fn location(&self, session_id: &str) -> PathBuf {
            PathBuf::from(session_id)
        }

        async fn remove(&self, _session_id: &str) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct RefusingConnector;

    #[async_trait]
    impl AgentConnector for RefusingConnector {
        async fn connect(&self) -> Result<AgentLink, AgentLinkError> {
            Err(AgentLinkError::MissingCredentials)
        }
    }

    fn test_state() -> AppState {
        AppState::with_components(
            Settings::default(),
            Arc::new(IdleBackend),
            Arc::new(NullArtifacts),
            Arc::new(RefusingConnector),
        )
    }

    fn specification() -> Specification {
        Specification::from_value(serde_json::json!({
            "name": "Todo",
            "description": "A todo list",
            "users": "individuals",
            "goal": "track tasks",
            "features": ["add", "remove"],
            "tech_stack": "react",
            "ui_style": "minimal",
        }))
        .unwrap()
    }

    async fn send(router: Router, method: Method, uri: &str) -> (StatusCode, Vec<u8>) {
        let response = router
            .oneshot(Request::builder().method(method).uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    #[test]
    fn test_router_creation() {
        let _ = create_router(test_state());
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = send(create_router(test_state()), Method::GET, "/health").await;
        assert_eq!(status, StatusCode::OK);
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_unknown_session_is_not_found() {
        let state = test_state();
        let (status, _) = send(create_router(state.clone()), Method::GET, "/api/generation/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(create_router(state), Method::DELETE, "/api/generation/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_session_status_and_cancel() {
        let state = test_state();
        state.generation.register(specification(), "gen-1").unwrap();

        let (status, body) = send(create_router(state.clone()), Method::GET, "/api/generation/gen-1").await;
        assert_eq!(status, StatusCode::OK);
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["sessionId"], "gen-1");
        assert_eq!(body["status"], "starting");

        let (status, body) = send(create_router(state.clone()), Method::GET, "/api/generation").await;
        assert_eq!(status, StatusCode::OK);
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["count"], 1);

        let (status, _) = send(create_router(state.clone()), Method::DELETE, "/api/generation/gen-1").await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        // Second cancel is a no-op
        let (status, _) = send(create_router(state), Method::DELETE, "/api/generation/gen-1").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
