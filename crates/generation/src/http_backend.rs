//! HTTP generation backend
//!
//! POSTs the request to `{backend_url}/generate` and reads the response body
//! as newline-delimited JSON events:
//!
//! ```text
//! {"type":"log","chunk":"npm install"}
//! {"type":"file_tree","tree":{"name":"app","path":"app","type":"directory","children":[]}}
//! {"type":"preview_ready","url":"http://localhost:5173"}
//! {"type":"error","message":"build failed"}
//! {"type":"complete","artifactPath":"generated/s-1","previewUrl":"http://localhost:5173"}
//! ```
//!
//! Cancellation POSTs `{backend_url}/cancel/{session_id}` once, then keeps
//! draining the stream until the backend closes it.

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use std::time::Duration;

use specflow_core::FileNode;

use crate::backend::{BackendOutput, GenerationBackend, GenerationCallbacks, GenerationRequest};
use crate::error::BackendError;
use crate::session::CancelSignal;

/// One line of the backend event stream
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendEvent {
    Log { chunk: String },
    FileTree { tree: FileNode },
    PreviewReady { url: String },
    Error { message: String },
    #[serde(rename_all = "camelCase")]
    Complete {
        artifact_path: String,
        #[serde(default)]
        preview_url: Option<String>,
    },
}

/// Decode one line; blank lines yield `None`
pub fn parse_backend_line(line: &[u8]) -> Option<Result<BackendEvent, serde_json::Error>> {
    let line = trim_ascii(line);
    if line.is_empty() {
        return None;
    }
    Some(serde_json::from_slice(line))
}

fn trim_ascii(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &bytes[start..end]
}

/// Folds decoded events into callbacks and a final result
#[derive(Debug, Default)]
struct EventFold {
    pending: Vec<u8>,
    output: Option<BackendOutput>,
    failure: Option<String>,
}

impl EventFold {
    fn feed(&mut self, bytes: &[u8], callbacks: &dyn GenerationCallbacks) {
        self.pending.extend_from_slice(bytes);
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            self.apply_line(&line, callbacks);
        }
    }

    fn finish(mut self, callbacks: &dyn GenerationCallbacks) -> Result<BackendOutput, BackendError> {
        let rest = std::mem::take(&mut self.pending);
        self.apply_line(&rest, callbacks);

        if let Some(message) = self.failure {
            return Err(BackendError::Reported(message));
        }
        self.output.ok_or(BackendError::Incomplete)
    }

    fn apply_line(&mut self, line: &[u8], callbacks: &dyn GenerationCallbacks) {
        let event = match parse_backend_line(line) {
            None => return,
            Some(Ok(event)) => event,
            Some(Err(e)) => {
                tracing::warn!(error = %e, "Skipping malformed backend event");
                return;
            },
        };

        if self.output.is_some() || self.failure.is_some() {
            tracing::debug!("Ignoring backend event after terminal event");
            return;
        }

        match event {
            BackendEvent::Log { chunk } => callbacks.on_log(&chunk),
            BackendEvent::FileTree { tree } => callbacks.on_file_tree(&tree),
            BackendEvent::PreviewReady { url } => callbacks.on_preview_ready(&url),
            BackendEvent::Error { message } => {
                callbacks.on_error(&message);
                self.failure = Some(message);
            },
            BackendEvent::Complete {
                artifact_path,
                preview_url,
            } => {
                self.output = Some(BackendOutput {
                    artifact_path,
                    preview_url,
                });
            },
        }
    }
}

/// Backend reached over HTTP with an NDJSON progress stream
#[derive(Debug, Clone)]
pub struct HttpGenerationBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpGenerationBackend {
    pub fn new(base_url: impl Into<String>) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn request_cancel(&self, session_id: &str) {
        let url = format!("{}/cancel/{}", self.base_url, session_id);
        match self.client.post(&url).send().await {
            Ok(response) if response.status().is_success() => {
                tracing::info!(session_id = %session_id, "Cancellation sent to backend");
            },
            Ok(response) => {
                tracing::warn!(
                    session_id = %session_id,
                    status = %response.status(),
                    "Backend rejected cancellation"
                );
            },
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "Failed to send cancellation");
            },
        }
    }
}

#[async_trait]
impl GenerationBackend for HttpGenerationBackend {
    async fn generate(
        &self,
        request: GenerationRequest,
        callbacks: &dyn GenerationCallbacks,
        mut cancel: CancelSignal,
    ) -> Result<BackendOutput, BackendError> {
        let url = format!("{}/generate", self.base_url);
        let response = self.client.post(&url).json(&request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let mut stream = Box::pin(response.bytes_stream());
        let mut fold = EventFold::default();
        let mut cancel_sent = false;

        loop {
            tokio::select! {
                chunk = stream.next() => match chunk {
                    Some(Ok(bytes)) => fold.feed(&bytes, callbacks),
                    Some(Err(e)) => return Err(e.into()),
                    None => break,
                },
                _ = cancel.cancelled(), if !cancel_sent => {
                    cancel_sent = true;
                    self.request_cancel(&request.session_id).await;
                }
            }
        }

        fold.finish(callbacks)
    }
}
