mod commands;
mod frames;
mod link;

pub use commands::HubCommand;
pub use frames::{ClientFrame, HubFrame};
pub use link::{HubLink, HubTimings, LinkAction, LinkState};

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use futures::{Sink, SinkExt, StreamExt};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior, interval, interval_at, sleep, timeout};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{WebSocketStream, connect_async};

use crate::config::HubSettings;
use crate::error::OpError;
use crate::messages::HubControl;
use crate::model::FleetMetrics;

/// What the bridge needs from the rest of the coordinator
#[async_trait]
pub trait HubBackend: Send + Sync {
    async fn execute(&self, command: HubCommand) -> Result<Value, OpError>;

    async fn metrics(&self) -> FleetMetrics;
}

/// How a settings change affects the link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
    Keep,
    Connect,
    Disconnect,
    Redial(Duration),
}

enum SessionEnd {
    /// Remote close or error; reconnect per the link
    Dropped,
    /// Settings closed the session; wait this long (if at all) before dialing again
    Reconfigured(Option<Duration>),
    Shutdown,
}

/// Outbound link to the monitoring hub
///
/// This service:
/// - Dials the hub while enabled and authenticates on open
/// - Sends heartbeats and metrics while authenticated
/// - Executes hub commands and echoes each outcome under its correlation id
/// - Reconnects after any disconnect while enabled
pub struct HubBridge {
    backend: Arc<dyn HubBackend>,
    settings: HubSettings,
    link: HubLink,
    cmd_rx: mpsc::Receiver<HubControl>,
    state_tx: watch::Sender<LinkState>,
}

impl HubBridge {
    pub fn new(
        backend: Arc<dyn HubBackend>,
        settings: HubSettings,
        timings: HubTimings,
        cmd_rx: mpsc::Receiver<HubControl>,
        state_tx: watch::Sender<LinkState>,
    ) -> Self {
        Self {
            link: HubLink::new(settings.enabled, timings),
            backend,
            settings,
            cmd_rx,
            state_tx,
        }
    }

    fn node_id(&self) -> String {
        self.settings.node_id.clone().unwrap_or_default()
    }

    fn publish_state(&self) {
        self.state_tx.send_replace(self.link.state());
    }

    pub async fn run(mut self) {
        let mut delay: Option<Duration> = None;

        loop {
            if !self.link.is_enabled() {
                match self.cmd_rx.recv().await {
                    Some(HubControl::Reconfigure(settings)) => {
                        delay = self.wait_delay(settings, delay);
                        continue;
                    }
                    None => return,
                }
            }

            if let Some(wait) = delay.take() {
                tokio::select! {
                    _ = sleep(wait) => {}
                    cmd = self.cmd_rx.recv() => match cmd {
                        Some(HubControl::Reconfigure(settings)) => {
                            delay = self.wait_delay(settings, Some(wait));
                            continue;
                        }
                        None => return,
                    },
                }
            }

            if !self.link.connect() {
                continue;
            }
            self.publish_state();

            let url = self.settings.hub_url.clone();
            tracing::info!(url = %url, "Connecting to hub");
            let connect_timeout = self.link.timings().connect_timeout;
            let attempt = timeout(connect_timeout, connect_async(url.as_str()));
            tokio::pin!(attempt);

            // Settings changes apply while the handshake is still in flight
            let end = loop {
                tokio::select! {
                    result = &mut attempt => break match result {
                        Ok(Ok((stream, _))) => {
                            tracing::info!(url = %url, "Hub connection open");
                            self.session(stream).await
                        }
                        Ok(Err(e)) => {
                            tracing::warn!(url = %url, "Hub connection failed: {}", e);
                            SessionEnd::Dropped
                        }
                        Err(_) => {
                            tracing::warn!(url = %url, "Hub connection timed out");
                            SessionEnd::Dropped
                        }
                    },
                    cmd = self.cmd_rx.recv() => match cmd {
                        Some(HubControl::Reconfigure(settings)) => match self.reconfigure(settings) {
                            Transition::Keep | Transition::Connect => continue,
                            Transition::Disconnect => break self.abandon(None),
                            Transition::Redial(wait) => break self.abandon(Some(wait)),
                        },
                        None => break self.shut_down(),
                    },
                }
            };

            delay = match end {
                SessionEnd::Dropped => self.dropped(),
                SessionEnd::Reconfigured(wait) => wait,
                SessionEnd::Shutdown => return,
            };
        }
    }

    /// Drop the current attempt or session because settings changed.
    fn abandon(&mut self, wait: Option<Duration>) -> SessionEnd {
        self.link.closed();
        self.publish_state();
        SessionEnd::Reconfigured(wait)
    }

    fn shut_down(&mut self) -> SessionEnd {
        self.link.set_enabled(false);
        self.link.closed();
        self.publish_state();
        SessionEnd::Shutdown
    }

    /// Apply settings while no session is open, returning the next dial delay.
    fn wait_delay(&mut self, settings: HubSettings, pending: Option<Duration>) -> Option<Duration> {
        match self.reconfigure(settings) {
            Transition::Keep => pending,
            Transition::Connect | Transition::Disconnect => None,
            Transition::Redial(wait) => Some(wait),
        }
    }

    fn reconfigure(&mut self, settings: HubSettings) -> Transition {
        let was_enabled = self.settings.enabled;
        let url_changed = settings.hub_url != self.settings.hub_url;
        self.settings = settings;
        self.link.set_enabled(self.settings.enabled);

        let transition = match (was_enabled, self.settings.enabled) {
            (_, false) => Transition::Disconnect,
            (false, true) => Transition::Connect,
            (true, true) if url_changed => Transition::Redial(self.link.timings().url_change),
            (true, true) => Transition::Keep,
        };
        tracing::info!(
            enabled = self.settings.enabled,
            url = %self.settings.hub_url,
            transition = ?transition,
            "Hub settings changed"
        );
        transition
    }

    fn dropped(&mut self) -> Option<Duration> {
        let mut delay = None;
        for action in self.link.closed() {
            if let LinkAction::Reconnect(wait) = action {
                tracing::info!("Reconnecting to hub in {}s", wait.as_secs_f32());
                delay = Some(wait);
            }
        }
        self.publish_state();
        delay
    }

    async fn session<S>(&mut self, stream: WebSocketStream<S>) -> SessionEnd
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (mut write, mut read) = stream.split();
        let node_id = self.node_id();
        let timings = *self.link.timings();

        for action in self.link.opened() {
            if action == LinkAction::SendAuth {
                let auth = ClientFrame::auth(&node_id, self.settings.show_id.clone(), &self.settings.metadata);
                if let Err(e) = send_frame(&mut write, &auth).await {
                    tracing::warn!("Failed to send hub auth: {:#}", e);
                    return SessionEnd::Dropped;
                }
            }
        }
        self.publish_state();

        let (result_tx, mut result_rx) = mpsc::channel::<ClientFrame>(32);
        let mut heartbeat: Option<Interval> = None;
        let mut metrics: Option<Interval> = None;

        loop {
            tokio::select! {
                message = read.next() => match message {
                    Some(Ok(Message::Text(text))) => match HubFrame::parse(text.as_str()) {
                        Ok(HubFrame::AuthOk { message }) => {
                            tracing::info!("Authenticated with hub: {}", message);
                            for action in self.link.authenticated() {
                                if action == LinkAction::StartTimers {
                                    let mut beat = interval_at(Instant::now() + timings.heartbeat, timings.heartbeat);
                                    beat.set_missed_tick_behavior(MissedTickBehavior::Delay);
                                    let mut report = interval(timings.metrics);
                                    report.set_missed_tick_behavior(MissedTickBehavior::Delay);
                                    heartbeat = Some(beat);
                                    metrics = Some(report);
                                }
                            }
                            self.publish_state();
                        }
                        Ok(HubFrame::Command { command, command_id, params }) => {
                            tracing::info!(command = %command, command_id = %command_id, "Hub command received");
                            let backend = self.backend.clone();
                            let results = result_tx.clone();
                            let node_id = node_id.clone();
                            tokio::spawn(async move {
                                let outcome = match HubCommand::parse(&command, &params) {
                                    Ok(parsed) => backend.execute(parsed).await,
                                    Err(e) => Err(e),
                                };
                                if let Err(e) = &outcome {
                                    tracing::warn!(command = %command, "Hub command failed: {}", e);
                                }
                                let _ = results
                                    .send(ClientFrame::command_result(command_id, &node_id, outcome))
                                    .await;
                            });
                        }
                        Ok(HubFrame::Unknown) => {
                            tracing::debug!("Ignoring hub frame: {}", text.as_str());
                        }
                        Err(e) => {
                            tracing::warn!("Malformed hub frame: {}", e);
                        }
                    },
                    Some(Ok(Message::Close(frame))) => {
                        tracing::info!(frame = ?frame, "Hub closed the connection");
                        return SessionEnd::Dropped;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!("Hub connection error: {}", e);
                        return SessionEnd::Dropped;
                    }
                    None => {
                        tracing::info!("Hub connection ended");
                        return SessionEnd::Dropped;
                    }
                },
                Some(frame) = result_rx.recv() => {
                    if let Err(e) = send_frame(&mut write, &frame).await {
                        tracing::warn!("Failed to send hub command result: {:#}", e);
                        return SessionEnd::Dropped;
                    }
                }
                _ = tick(&mut heartbeat) => {
                    if let Err(e) = send_frame(&mut write, &ClientFrame::heartbeat(&node_id)).await {
                        tracing::warn!("Failed to send hub heartbeat: {:#}", e);
                        return SessionEnd::Dropped;
                    }
                }
                _ = tick(&mut metrics) => {
                    let snapshot = self.backend.metrics().await;
                    if let Err(e) = send_frame(&mut write, &ClientFrame::metrics(&node_id, snapshot)).await {
                        tracing::warn!("Failed to send hub metrics: {:#}", e);
                        return SessionEnd::Dropped;
                    }
                }
                cmd = self.cmd_rx.recv() => {
                    let transition = match cmd {
                        Some(HubControl::Reconfigure(settings)) => self.reconfigure(settings),
                        None => {
                            let _ = write.close().await;
                            return self.shut_down();
                        }
                    };
                    let wait = match transition {
                        Transition::Keep | Transition::Connect => continue,
                        Transition::Disconnect => None,
                        Transition::Redial(wait) => Some(wait),
                    };
                    let _ = write.close().await;
                    return self.abandon(wait);
                }
            }
        }
    }
}

async fn send_frame<W>(write: &mut W, frame: &ClientFrame) -> Result<()>
where
    W: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let text = serde_json::to_string(frame)?;
    write.send(Message::text(text)).await?;
    Ok(())
}

/// Next tick of an optional timer; pending forever while it is off.
async fn tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[derive(Clone)]
pub struct HubHandle {
    tx: mpsc::Sender<HubControl>,
    state: watch::Receiver<LinkState>,
}

impl HubHandle {
    pub fn new(tx: mpsc::Sender<HubControl>, state: watch::Receiver<LinkState>) -> Self {
        Self { tx, state }
    }

    pub fn state(&self) -> LinkState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<LinkState> {
        self.state.clone()
    }

    pub async fn reconfigure(&self, settings: HubSettings) -> Result<()> {
        self.tx
            .send(HubControl::Reconfigure(settings))
            .await
            .map_err(|e| anyhow::anyhow!("Failed to reconfigure hub bridge: {}", e))
    }
}

/// Create the bridge and its handle
pub fn bridge(
    backend: Arc<dyn HubBackend>,
    settings: HubSettings,
    timings: HubTimings,
) -> (HubBridge, HubHandle) {
    let (tx, rx) = mpsc::channel(8);
    let (state_tx, state_rx) = watch::channel(LinkState::Disconnected);
    let bridge = HubBridge::new(backend, settings, timings, rx, state_tx);
    (bridge, HubHandle::new(tx, state_rx))
}
