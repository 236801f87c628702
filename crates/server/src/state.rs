//! Application State
//!
//! Shared state across all handlers.

use std::sync::Arc;

use specflow_config::Settings;
use specflow_generation::{
    ArtifactStore, FsArtifactStore, GenerationBackend, GenerationManager, HttpGenerationBackend,
};

use crate::agent_link::{AgentConnector, WsAgentConnector};
use crate::clients::ClientRegistry;
use crate::ServerError;

/// Application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Settings>,
    /// Generation session registry
    pub generation: Arc<GenerationManager>,
    /// Single-client slot
    pub clients: Arc<ClientRegistry>,
    /// Opens the upstream agent connection for each client
    pub connector: Arc<dyn AgentConnector>,
}

impl AppState {
    /// Wire the production components from settings
    pub fn new(config: Settings) -> Result<Self, ServerError> {
        let backend: Arc<dyn GenerationBackend> = Arc::new(HttpGenerationBackend::new(
            config.generation.backend_url.clone(),
        )?);
        let artifacts: Arc<dyn ArtifactStore> =
            Arc::new(FsArtifactStore::new(config.generation.workspace_root.clone()));
        let connector: Arc<dyn AgentConnector> = Arc::new(WsAgentConnector::new(config.agent.clone()));

        Ok(Self::with_components(config, backend, artifacts, connector))
    }

    /// Build state around caller-provided collaborators
    pub fn with_components(
        config: Settings,
        backend: Arc<dyn GenerationBackend>,
        artifacts: Arc<dyn ArtifactStore>,
        connector: Arc<dyn AgentConnector>,
    ) -> Self {
        let generation = Arc::new(GenerationManager::new(
            &config.generation,
            config.conversation.required_keys.clone(),
            backend,
            artifacts,
        ));

        Self {
            config: Arc::new(config),
            generation,
            clients: Arc::new(ClientRegistry::new()),
            connector,
        }
    }
}
