//! Stream Relay
//!
//! Bridges one client connection and one upstream agent connection.
//!
//! - Binary audio is forwarded verbatim in both directions and dropped when
//!   the destination is closed or backed up.
//! - Assistant text runs through the conversation pipeline; specification
//!   text is withheld from the client.
//! - User text runs through approval detection; an approval with a confirmed
//!   specification binds a generation session and starts it in the
//!   background, streaming its progress back as client events.
//!
//! The relay owns the conversation state outright: nothing else mutates it,
//! and generation progress reaches it over a channel.

use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use specflow_agent::{ApprovalOutcome, ConversationPipeline, PhaseTransition};
use specflow_config::ConversationConfig;
use specflow_core::{
    AgentCommand, AgentEvent, ClientEvent, ConversationRole, EventEnvelope, FileNode, Phase, SessionStatus,
    Specification,
};
use specflow_generation::{
    GenerationCallbacks, GenerationError, GenerationManager, GenerationObserver, GenerationOutcome,
};

use crate::agent_link::{AgentInbound, AgentLink, AgentOutbound};
use crate::metrics::{self, Direction};

/// Frame received from the client
#[derive(Debug, Clone, PartialEq)]
pub enum ClientInbound {
    Audio(Vec<u8>),
    Text(String),
}

/// Frame for the client
#[derive(Debug, Clone, PartialEq)]
pub enum ClientOutbound {
    Audio(Vec<u8>),
    Event(EventEnvelope),
    Close,
}

/// Why the relay stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayExit {
    ClientClosed,
    AgentClosed,
    /// A newer client took the slot
    Replaced,
}

/// JSON text frames from the client
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ClientMessage {
    Text { content: String },
    Cancel,
    Ping,
}

/// Generation progress, tagged with the session it belongs to
#[derive(Debug)]
struct GenerationUpdate {
    session_id: String,
    kind: UpdateKind,
}

#[derive(Debug)]
enum UpdateKind {
    ValidationPassed,
    Status(SessionStatus),
    Log(String),
    FileTree(FileNode),
    PreviewReady(String),
    BackendError(String),
    Finished(GenerationOutcome),
}

/// Observer handed to the generation manager
struct RelayObserver {
    session_id: String,
    tx: mpsc::UnboundedSender<GenerationUpdate>,
}

impl RelayObserver {
    fn send(&self, kind: UpdateKind) {
        let _ = self.tx.send(GenerationUpdate {
            session_id: self.session_id.clone(),
            kind,
        });
    }
}

impl GenerationCallbacks for RelayObserver {
    fn on_log(&self, chunk: &str) {
        self.send(UpdateKind::Log(chunk.to_string()));
    }

    fn on_file_tree(&self, tree: &FileNode) {
        self.send(UpdateKind::FileTree(tree.clone()));
    }

    fn on_preview_ready(&self, url: &str) {
        self.send(UpdateKind::PreviewReady(url.to_string()));
    }

    fn on_error(&self, message: &str) {
        self.send(UpdateKind::BackendError(message.to_string()));
    }
}

impl GenerationObserver for RelayObserver {
    fn on_validation_passed(&self) {
        self.send(UpdateKind::ValidationPassed);
    }

    fn on_status_changed(&self, status: SessionStatus) {
        self.send(UpdateKind::Status(status));
    }
}

/// Per-connection relay
pub struct Relay {
    conversation_id: String,
    pipeline: ConversationPipeline,
    generation: Arc<GenerationManager>,
    specification_required_message: String,
    client_tx: mpsc::Sender<ClientOutbound>,
    agent_tx: mpsc::Sender<AgentOutbound>,
    updates_tx: mpsc::UnboundedSender<GenerationUpdate>,
    updates_rx: mpsc::UnboundedReceiver<GenerationUpdate>,
    /// Last session that reached `ready` for this conversation
    ready_session: Option<String>,
    /// Typed client text the agent may echo back as a user transcript
    pending_echo: Option<String>,
}

impl Relay {
    pub fn new(
        conversation_id: impl Into<String>,
        config: &ConversationConfig,
        generation: Arc<GenerationManager>,
        client_tx: mpsc::Sender<ClientOutbound>,
        agent_tx: mpsc::Sender<AgentOutbound>,
    ) -> Self {
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        Self {
            conversation_id: conversation_id.into(),
            pipeline: ConversationPipeline::new(config),
            generation,
            specification_required_message: config.specification_required_message.clone(),
            client_tx,
            agent_tx,
            updates_tx,
            updates_rx,
            ready_session: None,
            pending_echo: None,
        }
    }

    /// Current conversation phase
    pub fn phase(&self) -> Phase {
        self.pipeline.phase()
    }

    /// Pump until either peer goes away or the client is replaced
    pub async fn run(
        mut self,
        mut client_rx: mpsc::Receiver<ClientInbound>,
        agent: AgentLink,
        mut evicted: watch::Receiver<bool>,
    ) -> RelayExit {
        let mut agent_rx = agent.inbound;
        // The link's sender is already held as `agent_tx`
        drop(agent.outbound);
        let mut watch_eviction = true;

        let exit = loop {
            tokio::select! {
                changed = evicted.changed(), if watch_eviction => match changed {
                    Ok(()) if *evicted.borrow() => {
                        let _ = self.client_tx.send(ClientOutbound::Close).await;
                        break RelayExit::Replaced;
                    },
                    Ok(()) => {},
                    Err(_) => watch_eviction = false,
                },
                inbound = client_rx.recv() => match inbound {
                    Some(message) => self.on_client(message).await,
                    None => break RelayExit::ClientClosed,
                },
                inbound = agent_rx.recv() => match inbound {
                    Some(message) => self.on_agent(message).await,
                    None => {
                        tracing::info!(conversation_id = %self.conversation_id, "Upstream agent disconnected, closing client");
                        let _ = self.client_tx.send(ClientOutbound::Close).await;
                        break RelayExit::AgentClosed;
                    },
                },
                Some(update) = self.updates_rx.recv() => self.on_generation(update).await,
            }
        };

        self.teardown(exit).await;
        exit
    }

    async fn teardown(&mut self, exit: RelayExit) {
        if let Some(session_id) = self.pipeline.session_id().map(str::to_string) {
            if self.generation.cancel(&session_id).await {
                tracing::info!(session_id = %session_id, exit = ?exit, "Cancelled generation on disconnect");
            }
        }
        if let Some(session_id) = self.ready_session.take() {
            if self.generation.release(&session_id) {
                tracing::info!(session_id = %session_id, exit = ?exit, "Released ready session on disconnect");
            }
        }
        tracing::info!(conversation_id = %self.conversation_id, exit = ?exit, "Relay stopped");
    }

    // ---- client → relay ----

    async fn on_client(&mut self, message: ClientInbound) {
        match message {
            ClientInbound::Audio(bytes) => self.forward_to_agent(bytes),
            ClientInbound::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(ClientMessage::Text { content }) => {
                    self.pending_echo = Some(content.trim().to_string());
                    self.send_agent(AgentCommand::InjectUserMessage {
                        content: content.clone(),
                    })
                    .await;
                    self.on_user_utterance(&content).await;
                },
                Ok(ClientMessage::Cancel) => self.cancel_generation().await,
                Ok(ClientMessage::Ping) => self.emit(ClientEvent::Pong).await,
                Err(e) => {
                    tracing::warn!(error = %e, "Ignoring malformed client message");
                },
            },
        }
    }

    async fn cancel_generation(&mut self) {
        let Some(session_id) = self.pipeline.session_id().map(str::to_string) else {
            tracing::debug!("Cancel requested with no generation bound");
            return;
        };
        if !self.generation.cancel(&session_id).await {
            return;
        }
        self.emit_for(&session_id, ClientEvent::CodegenCancelled).await;
        if let Some(transition) = self.pipeline.generation_cancelled() {
            self.emit_transition(&session_id, &transition).await;
        }
    }

    // ---- agent → relay ----

    async fn on_agent(&mut self, message: AgentInbound) {
        match message {
            AgentInbound::Audio(bytes) => self.forward_to_client(bytes),
            AgentInbound::Event(event) => self.on_agent_event(event).await,
        }
    }

    async fn on_agent_event(&mut self, event: AgentEvent) {
        match event {
            AgentEvent::Welcome { request_id } => {
                tracing::debug!(request_id = ?request_id, "Agent welcome");
            },
            AgentEvent::SettingsApplied {} => self.emit(ClientEvent::AgentReady).await,
            AgentEvent::ConversationText { role, content } => match role {
                ConversationRole::Assistant => self.on_assistant_text(content).await,
                ConversationRole::User => {
                    // Typed text was already routed through approval
                    let echoed = self.pending_echo.take().is_some_and(|typed| typed == content.trim());
                    self.emit(ClientEvent::Text {
                        role,
                        content: content.clone(),
                    })
                    .await;
                    if !echoed {
                        self.on_user_utterance(&content).await;
                    }
                },
                ConversationRole::System => {
                    tracing::trace!("Ignoring system conversation text");
                },
            },
            // Surfaced only; generation state is owned by the manager
            AgentEvent::Error { description, code } => {
                tracing::warn!(code = ?code, error = %description, "Upstream agent error");
                self.emit(ClientEvent::Error { message: description }).await;
            },
            AgentEvent::Other => {},
        }
    }

    async fn on_assistant_text(&mut self, content: String) {
        let outcome = self.pipeline.on_agent_text(&content);
        if outcome.specification_extracted {
            metrics::record_specification_extracted();
        }
        if !outcome.withheld {
            self.emit(ClientEvent::Text {
                role: ConversationRole::Assistant,
                content,
            })
            .await;
        }
        if let Some(transition) = outcome.transition {
            self.emit(ClientEvent::PhaseTransition { phase: transition.to }).await;
        }
    }

    async fn on_user_utterance(&mut self, content: &str) {
        let outcome = self.pipeline.on_user_text(content);
        if outcome != ApprovalOutcome::NotApproval {
            metrics::record_approval(outcome.label());
        }

        match outcome {
            ApprovalOutcome::Approved {
                session_id,
                specification,
                ..
            } => self.begin_generation(session_id, specification).await,
            ApprovalOutcome::SpecificationMissing => {
                let message = self.specification_required_message.clone();
                self.emit(ClientEvent::SpecificationRequired {
                    message: message.clone(),
                })
                .await;
                self.send_agent(AgentCommand::InjectAgentMessage { message }).await;
            },
            ApprovalOutcome::Ignored(reason) => {
                tracing::debug!(reason = ?reason, "Approval ignored");
            },
            ApprovalOutcome::NotApproval => {},
        }
    }

    // ---- generation ----

    async fn begin_generation(&mut self, session_id: String, specification: Specification) {
        if let Some(previous) = self.ready_session.take() {
            self.generation.release(&previous);
        }

        let session = match self.generation.register(specification, &session_id) {
            Ok(session) => session,
            Err(error) => {
                tracing::error!(session_id = %session_id, error = %error, "Failed to register generation session");
                self.fail_generation(&session_id, &error, 0).await;
                return;
            },
        };

        let transition = match self.pipeline.begin_generating() {
            Ok(transition) => transition,
            Err(e) => {
                tracing::error!(session_id = %session_id, error = %e, "Phase machine refused generation");
                self.generation.cancel(&session_id).await;
                if let Some(transition) = self.pipeline.generation_failed() {
                    self.emit_transition(&session_id, &transition).await;
                }
                return;
            },
        };

        // Client learns about the phase change before the backend call resolves
        self.emit_transition(&session_id, &transition).await;
        self.emit_for(&session_id, ClientEvent::CodegenStart).await;

        let manager = self.generation.clone();
        let observer = RelayObserver {
            session_id: session_id.clone(),
            tx: self.updates_tx.clone(),
        };
        tokio::spawn(async move {
            let outcome = manager.run(session, &observer).await;
            observer.send(UpdateKind::Finished(outcome));
        });
    }

    async fn on_generation(&mut self, update: GenerationUpdate) {
        if self.pipeline.session_id() != Some(update.session_id.as_str()) {
            tracing::trace!(session_id = %update.session_id, "Dropping update for unbound session");
            return;
        }
        let session_id = update.session_id;

        match update.kind {
            UpdateKind::ValidationPassed => {
                self.emit_for(&session_id, ClientEvent::CodegenValidationPassed).await;
            },
            UpdateKind::Status(status) => {
                tracing::debug!(session_id = %session_id, status = %status, "Generation status");
            },
            UpdateKind::Log(chunk) => self.emit_for(&session_id, ClientEvent::CodegenLog { chunk }).await,
            UpdateKind::FileTree(tree) => {
                self.emit_for(&session_id, ClientEvent::CodegenFileTree { tree }).await;
            },
            UpdateKind::PreviewReady(url) => {
                self.emit_for(&session_id, ClientEvent::CodegenPreviewReady { url }).await;
            },
            UpdateKind::BackendError(message) => {
                tracing::warn!(session_id = %session_id, error = %message, "Generation backend reported an error");
            },
            UpdateKind::Finished(outcome) => self.on_generation_finished(&session_id, outcome).await,
        }
    }

    async fn on_generation_finished(&mut self, session_id: &str, outcome: GenerationOutcome) {
        let duration_ms = outcome.duration().as_millis() as u64;
        match outcome {
            GenerationOutcome::Ready {
                artifact_path,
                preview_url,
                ..
            } => {
                self.ready_session = Some(session_id.to_string());
                self.pipeline.generation_completed();
                self.emit_for(
                    session_id,
                    ClientEvent::CodegenComplete {
                        url: preview_url,
                        artifact_path,
                        duration_ms,
                    },
                )
                .await;
            },
            GenerationOutcome::Failed { error, .. } => {
                self.fail_generation(session_id, &error, duration_ms).await;
            },
            GenerationOutcome::Cancelled { .. } => {
                self.emit_for(session_id, ClientEvent::CodegenCancelled).await;
                if let Some(transition) = self.pipeline.generation_cancelled() {
                    self.emit_transition(session_id, &transition).await;
                }
            },
        }
    }

    async fn fail_generation(&mut self, session_id: &str, error: &GenerationError, duration_ms: u64) {
        if let GenerationError::Validation(errors) = error {
            self.emit_for(
                session_id,
                ClientEvent::CodegenValidationFailed {
                    errors: errors.clone(),
                },
            )
            .await;
            self.send_agent(AgentCommand::InjectAgentMessage {
                message: error.to_string(),
            })
            .await;
        }

        self.emit_for(
            session_id,
            ClientEvent::CodegenError {
                error: error.to_string(),
                duration_ms,
            },
        )
        .await;

        if let Some(transition) = self.pipeline.generation_failed() {
            self.emit_transition(session_id, &transition).await;
        }
    }

    // ---- outbound ----

    fn forward_to_agent(&self, bytes: Vec<u8>) {
        match self.agent_tx.try_send(AgentOutbound::Audio(bytes)) {
            Ok(()) => metrics::record_audio_frame(Direction::ClientToAgent),
            Err(_) => metrics::record_dropped_frame(Direction::ClientToAgent),
        }
    }

    fn forward_to_client(&self, bytes: Vec<u8>) {
        match self.client_tx.try_send(ClientOutbound::Audio(bytes)) {
            Ok(()) => metrics::record_audio_frame(Direction::AgentToClient),
            Err(_) => metrics::record_dropped_frame(Direction::AgentToClient),
        }
    }

    async fn send_agent(&self, command: AgentCommand) {
        if self.agent_tx.send(AgentOutbound::Command(command)).await.is_err() {
            tracing::debug!("Agent link closed, command dropped");
        }
    }

    async fn emit_transition(&self, session_id: &str, transition: &PhaseTransition) {
        self.emit_for(session_id, ClientEvent::PhaseTransition { phase: transition.to })
            .await;
    }

    /// Emit stamped with the bound session, or the conversation id before one exists
    async fn emit(&self, event: ClientEvent) {
        let id = self
            .pipeline
            .session_id()
            .unwrap_or(self.conversation_id.as_str())
            .to_string();
        self.emit_for(&id, event).await;
    }

    async fn emit_for(&self, session_id: &str, event: ClientEvent) {
        let envelope = EventEnvelope::new(session_id, event);
        if self.client_tx.send(ClientOutbound::Event(envelope)).await.is_err() {
            tracing::debug!("Client closed, event dropped");
        }
    }
}
