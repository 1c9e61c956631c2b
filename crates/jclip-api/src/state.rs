//! Application state.

use std::sync::Arc;

use jclip_worker::{JobResult, Orchestrator, OrchestratorConfig};

use crate::config::ApiConfig;
use crate::session::SessionStore;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub orchestrator: Arc<Orchestrator>,
    pub sessions: Arc<SessionStore>,
}

impl AppState {
    /// Start an FFmpeg-backed orchestrator and wrap it.
    pub async fn new(config: ApiConfig, orchestrator_config: OrchestratorConfig) -> JobResult<Self> {
        let orchestrator = Orchestrator::with_ffmpeg(orchestrator_config).await?;
        Ok(Self::with_orchestrator(config, Arc::new(orchestrator)))
    }

    pub fn with_orchestrator(config: ApiConfig, orchestrator: Arc<Orchestrator>) -> Self {
        let sessions = Arc::new(SessionStore::new(config.session_ttl));
        Self {
            config,
            orchestrator,
            sessions,
        }
    }
}
