//! Per-session artifact storage
//!
//! Each session owns one directory under the workspace root, removed
//! wholesale on error, cancellation or eviction.

use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Directory owned by `session_id`
    fn location(&self, session_id: &str) -> PathBuf;

    /// Remove everything the session wrote; absent directories are not an error
    async fn remove(&self, session_id: &str) -> io::Result<()>;
}

/// Filesystem store rooted at `generation.workspace_root`
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    fn location(&self, session_id: &str) -> PathBuf {
        self.root.join(session_id)
    }

    async fn remove(&self, session_id: &str) -> io::Result<()> {
        if session_id.is_empty()
            || session_id.contains(['/', '\\'])
            || session_id == "."
            || session_id == ".."
        {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("refusing to remove artifacts for session id {:?}", session_id),
            ));
        }

        match tokio::fs::remove_dir_all(self.location(session_id)).await {
            Ok(()) => {
                tracing::debug!(session_id = %session_id, "Removed session artifacts");
                Ok(())
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}
