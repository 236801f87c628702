//! Generation session lifecycle
//!
//! Features:
//! - One supervised generation per session identifier
//! - Pre-generation specification validation with field-level errors
//! - Cooperative cancellation, per-session timeout and staleness sweeps
//! - Artifact cleanup on every non-success exit
//! - HTTP backend client reading an NDJSON progress stream

pub mod artifacts;
pub mod backend;
pub mod error;
pub mod http_backend;
pub mod manager;
pub mod session;

pub use artifacts::{ArtifactStore, FsArtifactStore};
pub use backend::{
    BackendOutput, GenerationBackend, GenerationCallbacks, GenerationObserver, GenerationRequest,
    NoopObserver,
};
pub use error::{BackendError, GenerationError};
pub use http_backend::{parse_backend_line, BackendEvent, HttpGenerationBackend};
pub use manager::{GenerationManager, GenerationOutcome};
pub use session::{CancelHandle, CancelSignal, GenerationSession, SessionSnapshot};
