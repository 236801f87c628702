//! Specflow Server
//!
//! Provides the client WebSocket relay and the HTTP surface (health,
//! generation session status and cancellation, Prometheus metrics).

pub mod agent_link;
pub mod clients;
pub mod http;
pub mod metrics;
pub mod relay;
pub mod state;
pub mod websocket;

pub use agent_link::{AgentConnector, AgentInbound, AgentLink, AgentLinkError, AgentOutbound, WsAgentConnector};
pub use clients::{ClientLease, ClientRegistry};
pub use http::create_router;
pub use crate::metrics::{init_metrics, metrics_handler};
pub use relay::{ClientInbound, ClientOutbound, Relay, RelayExit};
pub use state::AppState;

use thiserror::Error;

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Generation session not found: {0}")]
    SessionNotFound(String),

    #[error("Upstream agent error: {0}")]
    Agent(#[from] AgentLinkError),

    #[error("Generation backend error: {0}")]
    Backend(#[from] specflow_generation::BackendError),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ServerError> for axum::http::StatusCode {
    fn from(err: ServerError) -> Self {
        match err {
            ServerError::SessionNotFound(_) => axum::http::StatusCode::NOT_FOUND,
            ServerError::Agent(_) => axum::http::StatusCode::BAD_GATEWAY,
            ServerError::Backend(_) => axum::http::StatusCode::BAD_GATEWAY,
            ServerError::WebSocket(_) => axum::http::StatusCode::BAD_REQUEST,
            ServerError::InvalidRequest(_) => axum::http::StatusCode::BAD_REQUEST,
            ServerError::Internal(_) => axum::http::StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
