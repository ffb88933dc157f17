use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::{Config, GatewaySettings, HubSettings};
use crate::device::{DeckConnector, DeckProbe};
use crate::messages::RegistryEvent;
use crate::model::AppState;
use crate::operations::Operations;
use crate::services::hub::{self, HubBackend};
use crate::services::{
    Gateway, GatewayHandle, HubHandle, HubTimings, LinkState, Reconciler, ReconcilerHandle,
};
use crate::store::{Registry, persist};

/// The running coordinator: the registry, its operations, and every background service
pub struct App {
    ops: Arc<Operations>,
    state_path: PathBuf,
    reconciler: ReconcilerHandle,
    gateway: GatewayHandle,
    hub: HubHandle,
    tasks: Vec<JoinHandle<()>>,
}

impl App {
    pub async fn start(config: &Config) -> Result<Self> {
        let state_path = config.state_path()?;
        Self::start_at(config, state_path).await
    }

    pub async fn start_at(config: &Config, state_path: PathBuf) -> Result<Self> {
        let (state, migrated) = persist::load(&state_path).await;
        if migrated {
            persist::save(&state_path, &state)
                .await
                .context("Failed to write migrated state")?;
        }

        let gateway_settings = state.gateway.clone();
        let hub_settings = state.hub.clone();
        let registry = Arc::new(Registry::new(state));
        let decks = DeckConnector::new(
            config.device_port,
            config.control_timeout(),
            config.list_timeout(),
        );
        let ops = Arc::new(Operations::new(registry.clone(), decks.clone()));
        let mut tasks = Vec::new();

        tasks.push(persist::spawn_persister(registry.clone(), state_path.clone()));

        // Status reconciler
        let (reconciler_tx, reconciler_rx) = mpsc::channel(8);
        let deadline = decks.refresh_deadline();
        let probe: Arc<dyn DeckProbe> = Arc::new(decks);
        let reconciler = Reconciler::new(
            registry.clone(),
            probe,
            config.status_interval(),
            deadline,
            reconciler_rx,
        );
        tasks.push(tokio::spawn(reconciler.run()));

        // Show-control gateway
        let (gateway_tx, gateway_rx) = mpsc::channel(8);
        let gateway = Gateway::new(
            registry.clone(),
            gateway_settings,
            gateway_rx,
            config.announce_delay(),
            config.announce_interval(),
        );
        tasks.push(tokio::spawn(gateway.run()));

        // Monitoring hub bridge
        let backend: Arc<dyn HubBackend> = ops.clone();
        let (bridge, hub) = hub::bridge(backend, hub_settings, HubTimings::default());
        tasks.push(tokio::spawn(bridge.run()));

        tracing::info!(state = ?state_path, "Coordinator started");

        Ok(Self {
            ops,
            state_path,
            reconciler: ReconcilerHandle::new(reconciler_tx),
            gateway: GatewayHandle::new(gateway_tx),
            hub,
            tasks,
        })
    }

    pub fn operations(&self) -> &Arc<Operations> {
        &self.ops
    }

    pub fn registry(&self) -> &Arc<Registry> {
        self.ops.registry()
    }

    pub fn subscribe_snapshots(&self) -> watch::Receiver<Arc<AppState>> {
        self.registry().subscribe_snapshots()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<RegistryEvent> {
        self.registry().subscribe()
    }

    pub fn hub_state(&self) -> LinkState {
        self.hub.state()
    }

    pub async fn set_gateway_settings(&self, settings: GatewaySettings) -> Result<GatewaySettings> {
        let stored = self.registry().set_gateway_settings(settings).await?;
        self.gateway.reconfigure(stored.clone()).await?;
        Ok(stored)
    }

    pub async fn set_hub_settings(&self, settings: HubSettings) -> Result<HubSettings> {
        let stored = self.registry().set_hub_settings(settings).await?;
        self.hub.reconfigure(stored.clone()).await?;
        Ok(stored)
    }

    pub async fn export_show(&self, path: &Path) -> Result<()> {
        let state = self.registry().snapshot().await;
        persist::export_show(path, &state).await
    }

    /// Replace the whole show from a file, then refresh every deck right away.
    pub async fn import_show(&self, path: &Path) -> Result<()> {
        let state = persist::import_show(path).await?;
        let gateway_settings = state.gateway.clone();
        let hub_settings = state.hub.clone();
        self.registry().replace(state).await;

        self.gateway.reconfigure(gateway_settings).await?;
        self.hub.reconfigure(hub_settings).await?;
        self.reconciler.refresh_now().await
    }

    pub async fn new_show(&self) {
        self.registry().new_show().await;
    }

    /// Stop every service and write the aggregate one last time.
    pub async fn shutdown(self) -> Result<()> {
        for task in &self.tasks {
            task.abort();
        }
        let state = self.registry().snapshot().await;
        persist::save(&self.state_path, &state).await?;
        tracing::info!("Coordinator stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Recorder;
    use std::time::Duration;
    use tokio::time::{sleep, timeout};

    /// A state document with both network links switched off.
    async fn quiet_state(dir: &Path) -> PathBuf {
        let path = dir.join("state.json");
        let mut state = AppState::default();
        state.gateway.enabled = false;
        state.gateway.listener_enabled = false;
        state.hub.enabled = false;
        persist::save(&path, &state).await.unwrap();
        path
    }

    async fn read_state(path: &Path) -> AppState {
        let contents = tokio::fs::read_to_string(path).await.unwrap();
        serde_json::from_str(&contents).unwrap()
    }

    #[tokio::test]
    async fn test_missing_state_is_created_with_node_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");

        let app = App::start_at(&Config::default(), path.clone()).await.unwrap();
        let saved = read_state(&path).await;
        assert!(saved.hub.node_id.is_some());
        assert_eq!(saved.templates.len(), 3);
        app.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_mutations_are_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = quiet_state(dir.path()).await;
        let app = App::start_at(&Config::default(), path.clone()).await.unwrap();

        app.operations().set_show_name("DEMO").await;
        app.registry()
            .add_recorder(Recorder::new("r1", "A", ""))
            .await
            .unwrap();

        timeout(Duration::from_secs(5), async {
            loop {
                let saved = read_state(&path).await;
                if saved.show_name == "DEMO" && saved.recorders.len() == 1 {
                    break;
                }
                sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap();
        app.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_export_import_and_new_show() {
        let dir = tempfile::tempdir().unwrap();
        let path = quiet_state(dir.path()).await;
        let show = dir.path().join("show.json");
        let app = App::start_at(&Config::default(), path).await.unwrap();

        app.operations().set_show_name("DEMO").await;
        app.registry()
            .add_recorder(Recorder::new("r1", "A", ""))
            .await
            .unwrap();
        app.export_show(&show).await.unwrap();

        app.new_show().await;
        let cleared = app.registry().snapshot().await;
        assert!(cleared.recorders.is_empty());
        assert!(cleared.show_name.is_empty());
        assert_eq!(cleared.templates.len(), 3);
        assert!(!cleared.gateway.enabled);

        app.import_show(&show).await.unwrap();
        let restored = app.registry().snapshot().await;
        assert_eq!(restored.show_name, "DEMO");
        assert_eq!(restored.recorders[0].id, "r1");
        app.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_settings_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = quiet_state(dir.path()).await;
        let app = App::start_at(&Config::default(), path).await.unwrap();

        let mut settings = app.registry().snapshot().await.hub;
        settings.hub_url = "http://hub.local".to_string();
        assert!(app.set_hub_settings(settings).await.is_err());
        assert_eq!(app.hub_state(), LinkState::Disconnected);
        app.shutdown().await.unwrap();
    }
}
