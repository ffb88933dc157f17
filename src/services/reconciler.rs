use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::time::{MissedTickBehavior, interval, timeout};

use crate::device::{DeckProbe, DeviceStatus};
use crate::messages::ReconcilerCommand;
use crate::store::Registry;

/// Outcome of one reconciliation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub checked: usize,
    pub online: usize,
}

/// Periodically refreshes every recorder's device-derived fields
///
/// This service:
/// - Probes all recorders concurrently on each tick
/// - Writes each recorder's result as soon as its own probe chain resolves
/// - Folds a chain that outlives its deadline as offline
/// - Publishes the aggregate once the pass is complete
pub struct Reconciler {
    registry: Arc<Registry>,
    probe: Arc<dyn DeckProbe>,
    period: Duration,
    deadline: Duration,
    cmd_rx: mpsc::Receiver<ReconcilerCommand>,
}

impl Reconciler {
    pub fn new(
        registry: Arc<Registry>,
        probe: Arc<dyn DeckProbe>,
        period: Duration,
        deadline: Duration,
        cmd_rx: mpsc::Receiver<ReconcilerCommand>,
    ) -> Self {
        Self {
            registry,
            probe,
            period,
            deadline,
            cmd_rx,
        }
    }

    pub async fn run(mut self) {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(ReconcilerCommand::RefreshNow) => {
                        tracing::debug!("Immediate status refresh requested");
                        ticker.reset();
                    }
                    None => {
                        tracing::debug!("Reconciler command channel closed");
                        return;
                    }
                },
            }

            let summary = run_pass(&self.registry, self.probe.as_ref(), self.deadline).await;
            tracing::debug!(
                checked = summary.checked,
                online = summary.online,
                "Status pass complete"
            );
        }
    }
}

/// Refresh every recorder once
pub async fn run_pass(registry: &Registry, probe: &dyn DeckProbe, deadline: Duration) -> PassSummary {
    let targets: Vec<(String, String)> = registry
        .read(|state| {
            state
                .recorders
                .iter()
                .map(|r| (r.id.clone(), r.address.clone()))
                .collect()
        })
        .await;

    let refreshes = targets.iter().map(|(id, address)| async move {
        let status = match timeout(deadline, probe_chain(probe, address)).await {
            Ok(status) => status,
            Err(_) => {
                tracing::warn!(recorder = %id, address = %address, "Status refresh exceeded its deadline");
                DeviceStatus::offline()
            }
        };
        let online = status.online;
        if !registry.apply_device_status(id, status).await {
            tracing::debug!(recorder = %id, "Recorder removed during status pass");
        }
        online
    });

    let results = join_all(refreshes).await;
    registry.publish().await;

    PassSummary {
        checked: results.len(),
        online: results.into_iter().filter(|online| *online).count(),
    }
}

/// Online check, then codec, then transport; each step waits for the one before.
async fn probe_chain(probe: &dyn DeckProbe, address: &str) -> DeviceStatus {
    if !probe.check_online(address).await {
        return DeviceStatus::offline();
    }

    let codec = probe.query_codec(address).await;
    let transport = probe.query_transport_info(address).await;
    DeviceStatus {
        online: true,
        codec,
        transport,
    }
}

#[derive(Clone)]
pub struct ReconcilerHandle {
    tx: mpsc::Sender<ReconcilerCommand>,
}

impl ReconcilerHandle {
    pub fn new(tx: mpsc::Sender<ReconcilerCommand>) -> Self {
        Self { tx }
    }

    pub async fn refresh_now(&self) -> Result<()> {
        self.tx
            .send(ReconcilerCommand::RefreshNow)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to request status refresh: {}", e))
    }
}
