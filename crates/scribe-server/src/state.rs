//! Shared application state.

use crate::config::Config;
use crate::forwarder::{CaptureForwarder, DeliveryTarget};
use crate::gateway::IngestGateway;
use scribe_core::{IngestStore, ProcessSupervisor};
use std::sync::Arc;

/// Shared application state, built once at startup and injected into
/// every handler.
pub struct AppState {
    pub supervisor: Arc<ProcessSupervisor>,
    pub gateway: Arc<IngestGateway>,
    pub config: Config,
}

impl AppState {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let store = Arc::new(IngestStore::open(&config.db_path)?);
        let gateway = Arc::new(IngestGateway::new(store));
        let supervisor = Arc::new(ProcessSupervisor::new(config.cli_path.clone()));

        Ok(Self {
            supervisor,
            gateway,
            config,
        })
    }

    /// Start the forwarder loop that delivers finalized sessions to the
    /// gateway, either in-process or to a configured remote.
    pub fn spawn_forwarder(self: &Arc<Self>) {
        let target = match &self.config.forward_url {
            Some(url) => DeliveryTarget::Remote {
                client: reqwest::Client::new(),
                url: url.clone(),
                auth_token: self.config.auth_token.clone(),
            },
            None => DeliveryTarget::Local(self.gateway.clone()),
        };
        let forwarder = CaptureForwarder::new(self.config.spool_dir.clone(), target);
        let events = self.supervisor.subscribe();
        tokio::spawn(forwarder.run(events));
    }
}
