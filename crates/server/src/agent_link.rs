//! Upstream agent connection
//!
//! The relay talks to the conversational agent through an [`AgentLink`]: a
//! pair of channels carrying decoded events and raw audio. The WebSocket
//! connector owns the socket, performs the settings handshake and keeps the
//! connection alive during silence. Dropping the link's sender closes the
//! upstream socket; the link's receiver ending means upstream disconnected.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue};
use tokio_tungstenite::tungstenite::Message;

use specflow_config::AgentConfig;
use specflow_core::{AgentCommand, AgentEvent};

/// Channel depth between the relay and the socket pumps
const LINK_CAPACITY: usize = 256;

#[derive(Error, Debug)]
pub enum AgentLinkError {
    #[error("Agent API key is not configured")]
    MissingCredentials,

    #[error("Invalid agent endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Timed out connecting to agent after {0:?}")]
    Timeout(Duration),

    #[error("Agent connection failed: {0}")]
    Connect(String),

    #[error("Agent handshake failed: {0}")]
    Handshake(String),
}

/// Message from the upstream agent
#[derive(Debug, Clone, PartialEq)]
pub enum AgentInbound {
    Event(AgentEvent),
    Audio(Vec<u8>),
}

/// Message for the upstream agent
#[derive(Debug, Clone, PartialEq)]
pub enum AgentOutbound {
    Audio(Vec<u8>),
    Command(AgentCommand),
}

/// Channel pair bound to one upstream connection
#[derive(Debug)]
pub struct AgentLink {
    pub outbound: mpsc::Sender<AgentOutbound>,
    pub inbound: mpsc::Receiver<AgentInbound>,
}

impl AgentLink {
    /// Build a link over caller-provided channels
    pub fn new(outbound: mpsc::Sender<AgentOutbound>, inbound: mpsc::Receiver<AgentInbound>) -> Self {
        Self { outbound, inbound }
    }
}

/// Opens upstream agent connections
#[async_trait]
pub trait AgentConnector: Send + Sync {
    async fn connect(&self) -> Result<AgentLink, AgentLinkError>;
}

/// Settings handshake sent right after the socket opens
pub fn settings_message(config: &AgentConfig) -> serde_json::Value {
    json!({
        "type": "Settings",
        "audio": {
            "input": {
                "encoding": config.audio.input_encoding,
                "sample_rate": config.audio.input_sample_rate,
            },
            "output": {
                "encoding": config.audio.output_encoding,
                "sample_rate": config.audio.output_sample_rate,
                "container": "none",
            },
        },
        "agent": {
            "listen": {
                "provider": { "type": config.listen_provider, "model": config.listen_model },
            },
            "think": {
                "provider": { "type": config.think_provider, "model": config.think_model },
                "prompt": config.instructions,
            },
            "speak": {
                "provider": { "type": config.speak_provider, "model": config.speak_model },
            },
            "greeting": config.greeting,
        },
    })
}

/// WebSocket connector for the hosted voice agent
#[derive(Debug, Clone)]
pub struct WsAgentConnector {
    config: AgentConfig,
}

impl WsAgentConnector {
    pub fn new(config: AgentConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl AgentConnector for WsAgentConnector {
    async fn connect(&self) -> Result<AgentLink, AgentLinkError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or(AgentLinkError::MissingCredentials)?;

        let mut request = self
            .config
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| AgentLinkError::InvalidEndpoint(e.to_string()))?;
        let token = HeaderValue::from_str(&format!("Token {}", api_key))
            .map_err(|e| AgentLinkError::InvalidEndpoint(e.to_string()))?;
        request.headers_mut().insert(AUTHORIZATION, token);

        let connect_timeout = Duration::from_secs(self.config.connect_timeout_secs);
        let (socket, _response) = tokio::time::timeout(connect_timeout, tokio_tungstenite::connect_async(request))
            .await
            .map_err(|_| AgentLinkError::Timeout(connect_timeout))?
            .map_err(|e| AgentLinkError::Connect(e.to_string()))?;

        let (mut sink, mut stream) = socket.split();

        let handshake = settings_message(&self.config).to_string();
        sink.send(Message::Text(handshake))
            .await
            .map_err(|e| AgentLinkError::Handshake(e.to_string()))?;
        tracing::info!(url = %self.config.url, "Connected to upstream agent");

        let (out_tx, mut out_rx) = mpsc::channel::<AgentOutbound>(LINK_CAPACITY);
        let (in_tx, in_rx) = mpsc::channel::<AgentInbound>(LINK_CAPACITY);
        let keep_alive = Duration::from_secs(self.config.keep_alive_secs.max(1));

        // Writer: relay → agent, plus keep-alives
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(keep_alive);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await;

            loop {
                let message = tokio::select! {
                    outbound = out_rx.recv() => match outbound {
                        Some(AgentOutbound::Audio(bytes)) => Message::Binary(bytes),
                        Some(AgentOutbound::Command(command)) => match command.to_json() {
                            Ok(text) => Message::Text(text),
                            Err(e) => {
                                tracing::warn!(error = %e, "Failed to encode agent command");
                                continue;
                            },
                        },
                        None => {
                            let _ = sink.close().await;
                            tracing::debug!("Agent link released, upstream socket closed");
                            break;
                        },
                    },
                    _ = ticker.tick() => match AgentCommand::KeepAlive.to_json() {
                        Ok(text) => Message::Text(text),
                        Err(_) => continue,
                    },
                };

                if let Err(e) = sink.send(message).await {
                    tracing::warn!(error = %e, "Upstream agent write failed");
                    break;
                }
            }
        });

        // Reader: agent → relay
        tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                let inbound = match frame {
                    Ok(Message::Text(text)) => match AgentEvent::parse(&text) {
                        Ok(event) => AgentInbound::Event(event),
                        Err(e) => {
                            tracing::warn!(error = %e, "Undecodable agent event");
                            continue;
                        },
                    },
                    Ok(Message::Binary(bytes)) => AgentInbound::Audio(bytes),
                    Ok(Message::Close(frame)) => {
                        tracing::info!(frame = ?frame, "Upstream agent closed the connection");
                        break;
                    },
                    Ok(_) => continue,
                    Err(e) => {
                        tracing::warn!(error = %e, "Upstream agent read failed");
                        break;
                    },
                };

                if in_tx.send(inbound).await.is_err() {
                    break;
                }
            }
        });

        Ok(AgentLink::new(out_tx, in_rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_message_shape() {
        let config = AgentConfig::default();
        let message = settings_message(&config);

        assert_eq!(message["type"], "Settings");
        assert_eq!(message["audio"]["input"]["encoding"], "linear16");
        assert_eq!(message["audio"]["input"]["sample_rate"], 16000);
        assert_eq!(message["audio"]["output"]["sample_rate"], 24000);
        assert_eq!(message["agent"]["listen"]["provider"]["model"], "nova-3");
        assert_eq!(message["agent"]["think"]["prompt"], config.instructions.as_str());
        assert_eq!(message["agent"]["greeting"], config.greeting.as_str());
    }

    #[tokio::test]
    async fn test_connect_requires_api_key() {
        let connector = WsAgentConnector::new(AgentConfig::default());
        assert!(matches!(
            connector.connect().await,
            Err(AgentLinkError::MissingCredentials)
        ));
    }
}
