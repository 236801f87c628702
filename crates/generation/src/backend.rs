//! Generation backend interface
//!
//! The backend is an external collaborator: it receives a validated
//! specification and streams progress back through [`GenerationCallbacks`].
//! Error and completion are mutually exclusive and terminal; no other
//! ordering between callbacks is assumed.

use async_trait::async_trait;
use serde::Serialize;

use specflow_core::{FileNode, SessionStatus, Specification};

use crate::error::BackendError;
use crate::session::CancelSignal;

/// Streaming progress callbacks
pub trait GenerationCallbacks: Send + Sync {
    fn on_log(&self, chunk: &str);
    fn on_file_tree(&self, tree: &FileNode);
    fn on_preview_ready(&self, url: &str);
    fn on_error(&self, message: &str);
}

/// Callbacks plus session lifecycle notifications
///
/// Implemented by the relay to turn progress into client events.
pub trait GenerationObserver: GenerationCallbacks {
    /// Specification passed the pre-generation schema check
    fn on_validation_passed(&self) {}

    /// Session status changed
    fn on_status_changed(&self, _status: SessionStatus) {}
}

/// Observer that discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl GenerationCallbacks for NoopObserver {
    fn on_log(&self, _chunk: &str) {}
    fn on_file_tree(&self, _tree: &FileNode) {}
    fn on_preview_ready(&self, _url: &str) {}
    fn on_error(&self, _message: &str) {}
}

impl GenerationObserver for NoopObserver {}

/// Request handed to the backend
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub session_id: String,
    pub specification: Specification,
    /// Directory the backend should write into
    pub workspace: String,
}

/// Successful backend result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendOutput {
    pub artifact_path: String,
    pub preview_url: Option<String>,
}

/// Code generation backend
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Run one generation to completion
    ///
    /// Cancellation is cooperative: implementations should observe `cancel`
    /// and may finish in-flight work before returning.
    async fn generate(
        &self,
        request: GenerationRequest,
        callbacks: &dyn GenerationCallbacks,
        cancel: CancelSignal,
    ) -> Result<BackendOutput, BackendError>;
}
