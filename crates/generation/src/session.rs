//! Generation session state and cancellation

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;
use tokio::time::Instant;

use specflow_core::{SessionStatus, Specification};

/// Owned cancellation handle
///
/// Fires at most once; later calls return `false` and do nothing.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
    fired: AtomicBool,
}

impl CancelHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            tx,
            fired: AtomicBool::new(false),
        }
    }

    /// Signal cancellation; true only on the first call
    pub fn cancel(&self) -> bool {
        if self.fired.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.tx.send_replace(true);
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Receiver side handed to the backend
    pub fn signal(&self) -> CancelSignal {
        CancelSignal(self.tx.subscribe())
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Cooperative cancellation signal observed by a backend
#[derive(Debug, Clone)]
pub struct CancelSignal(watch::Receiver<bool>);

impl CancelSignal {
    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once cancellation is signalled; never resolves otherwise
    pub async fn cancelled(&mut self) {
        while !*self.0.borrow_and_update() {
            if self.0.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// One generation attempt for one approved specification
#[derive(Debug)]
pub struct GenerationSession {
    pub id: String,
    pub specification: Specification,
    /// Monotonic start, used for staleness and durations
    pub started_at: Instant,
    /// Wall-clock start, reported to clients
    pub created_at: DateTime<Utc>,
    status: RwLock<SessionStatus>,
    artifact_path: RwLock<Option<String>>,
    preview_endpoint: RwLock<Option<String>>,
    cancel: CancelHandle,
}

impl GenerationSession {
    pub fn new(id: impl Into<String>, specification: Specification) -> Self {
        Self {
            id: id.into(),
            specification,
            started_at: Instant::now(),
            created_at: Utc::now(),
            status: RwLock::new(SessionStatus::Starting),
            artifact_path: RwLock::new(None),
            preview_endpoint: RwLock::new(None),
            cancel: CancelHandle::new(),
        }
    }

    pub fn status(&self) -> SessionStatus {
        *self.status.read()
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    /// Move to `status` unless already terminal
    ///
    /// Returns false when the session had already settled, which is how
    /// a late backend result loses the race against a cancellation.
    pub fn set_status(&self, status: SessionStatus) -> bool {
        let mut current = self.status.write();
        if current.is_terminal() {
            return false;
        }
        *current = status;
        true
    }

    /// Move `from → to` only if the session is currently in `from`
    pub fn advance(&self, from: SessionStatus, to: SessionStatus) -> bool {
        let mut current = self.status.write();
        if *current != from {
            return false;
        }
        *current = to;
        true
    }

    pub fn artifact_path(&self) -> Option<String> {
        self.artifact_path.read().clone()
    }

    pub fn preview_endpoint(&self) -> Option<String> {
        self.preview_endpoint.read().clone()
    }

    pub(crate) fn set_artifacts(&self, artifact_path: String, preview_endpoint: Option<String>) {
        *self.artifact_path.write() = Some(artifact_path);
        if preview_endpoint.is_some() {
            *self.preview_endpoint.write() = preview_endpoint;
        }
    }

    pub(crate) fn set_preview_endpoint(&self, url: &str) {
        *self.preview_endpoint.write() = Some(url.to_string());
    }

    pub fn cancel_handle(&self) -> &CancelHandle {
        &self.cancel
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.id.clone(),
            name: self.specification.name().map(str::to_string),
            status: self.status(),
            started_at: self.created_at,
            elapsed_ms: self.started_at.elapsed().as_millis() as u64,
            artifact_path: self.artifact_path(),
            preview_endpoint: self.preview_endpoint(),
        }
    }
}

/// Point-in-time view of a session for the HTTP API
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: String,
    pub name: Option<String>,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub artifact_path: Option<String>,
    pub preview_endpoint: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn session() -> GenerationSession {
        GenerationSession::new("s-1", Specification::from_value(json!({"name": "A"})).unwrap())
    }

    #[test]
    fn test_cancel_fires_once() {
        let handle = CancelHandle::new();
        let signal = handle.signal();
        assert!(!signal.is_cancelled());
        assert!(handle.cancel());
        assert!(!handle.cancel());
        assert!(signal.is_cancelled());
    }

    #[tokio::test]
    async fn test_signal_resolves_after_cancel() {
        let handle = CancelHandle::new();
        let mut signal = handle.signal();
        let waiter = tokio::spawn(async move { signal.cancelled().await });
        handle.cancel();
        waiter.await.unwrap();
    }

    #[test]
    fn test_terminal_status_is_sticky() {
        let session = session();
        assert_eq!(session.status(), SessionStatus::Starting);
        assert!(session.set_status(SessionStatus::Generating));
        assert!(session.set_status(SessionStatus::Cancelled));
        assert!(!session.set_status(SessionStatus::Ready));
        assert_eq!(session.status(), SessionStatus::Cancelled);
    }

    #[test]
    fn test_advance_requires_source_status() {
        let session = session();
        assert!(!session.advance(SessionStatus::Generating, SessionStatus::Building));
        session.set_status(SessionStatus::Generating);
        assert!(session.advance(SessionStatus::Generating, SessionStatus::Building));
        assert!(!session.advance(SessionStatus::Generating, SessionStatus::Building));
    }

    #[test]
    fn test_snapshot_wire_shape() {
        let session = session();
        session.set_artifacts("/tmp/s-1".to_string(), Some("http://localhost:5173".to_string()));
        let value = serde_json::to_value(session.snapshot()).unwrap();
        assert_eq!(value["sessionId"], "s-1");
        assert_eq!(value["name"], "A");
        assert_eq!(value["status"], "starting");
        assert_eq!(value["artifactPath"], "/tmp/s-1");
        assert_eq!(value["previewEndpoint"], "http://localhost:5173");
    }
}
