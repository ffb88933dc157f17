use std::io;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep};

use crate::config::GatewaySettings;
use crate::messages::{GatewayControl, RegistryEvent, TakeAnnouncement};
use crate::osc::{self, OscArg, OscMessage};
use crate::store::Registry;
use crate::template::sanitize;

const LISTENER_RESTART_DELAY: Duration = Duration::from_secs(5);
const MAX_DATAGRAM: usize = 65_536;

/// Trigger requested by the show-control surface
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCommand {
    /// Trigger the recorder with this sanitized name
    SetTake(String),
    /// Trigger every enabled recorder
    SetAll,
}

impl GatewayCommand {
    /// Parse `<prefix><target>/<action>`. Anything else is not for us.
    pub fn parse(prefix: &str, address: &str) -> Option<Self> {
        let rest = address.strip_prefix(prefix)?;
        let (target, action) = rest.split_once('/')?;
        if target.is_empty() || action.contains('/') {
            return None;
        }
        match (target, action) {
            ("all", "setAll" | "setTake") => Some(Self::SetAll),
            (target, "setTake") => Some(Self::SetTake(target.to_string())),
            _ => None,
        }
    }
}

/// Take broadcast: `<prefix><sanitizedName>` with `[take, shot, take number, display name]`
pub fn encode_announcement(prefix: &str, announcement: &TakeAnnouncement) -> Bytes {
    OscMessage::new(format!(
        "{}{}",
        prefix,
        sanitize(&announcement.display_name)
    ))
    .with_arg(OscArg::Str(announcement.take_name.clone()))
    .with_arg(OscArg::Int(announcement.shot_number.max(1) as i32))
    .with_arg(OscArg::Int(announcement.take_number.max(1) as i32))
    .with_arg(OscArg::Str(announcement.display_name.clone()))
    .encode()
}

/// Apply one inbound message to the registry
pub async fn handle_message(registry: &Registry, prefix: &str, message: &OscMessage) {
    match GatewayCommand::parse(prefix, &message.address) {
        Some(GatewayCommand::SetAll) => {
            registry.trigger_all().await;
        }
        Some(GatewayCommand::SetTake(token)) => {
            if let Err(e) = registry.trigger_by_token(&token).await {
                tracing::warn!(token = %token, "Show-control trigger failed: {}", e);
            }
        }
        None => {
            tracing::debug!(address = %message.address, "Ignoring show-control message");
        }
    }
}

/// Bidirectional show-control link
///
/// This service:
/// - Runs the UDP listener and restarts it when settings change
/// - Sends a take broadcast for every committed or announced take
/// - Re-announces every recorder's current take on a timer
pub struct Gateway {
    registry: Arc<Registry>,
    settings: GatewaySettings,
    cmd_rx: mpsc::Receiver<GatewayControl>,
    announce_delay: Duration,
    announce_interval: Duration,
    socket: Option<UdpSocket>,
}

impl Gateway {
    pub fn new(
        registry: Arc<Registry>,
        settings: GatewaySettings,
        cmd_rx: mpsc::Receiver<GatewayControl>,
        announce_delay: Duration,
        announce_interval: Duration,
    ) -> Self {
        Self {
            registry,
            settings,
            cmd_rx,
            announce_delay,
            announce_interval,
            socket: None,
        }
    }

    pub async fn run(mut self) {
        let mut events = self.registry.subscribe();
        let mut listener = spawn_listener(self.registry.clone(), &self.settings);
        let mut announce = interval_at(
            Instant::now() + self.announce_delay,
            self.announce_interval,
        );
        announce.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(GatewayControl::Reconfigure(settings)) => {
                        tracing::info!(
                            listener = %format!("{}:{}", settings.listener_host, settings.listener_port),
                            destination = %format!("{}:{}", settings.send_host, settings.send_port),
                            enabled = settings.enabled,
                            "Show-control settings changed"
                        );
                        if let Some(handle) = listener.take() {
                            handle.abort();
                        }
                        self.settings = settings;
                        listener = spawn_listener(self.registry.clone(), &self.settings);
                    }
                    None => break,
                },
                event = events.recv() => match event {
                    Ok(RegistryEvent::TakeCommitted(announcement) | RegistryEvent::RecorderAnnounced(announcement)) => {
                        self.send(&announcement).await;
                    }
                    Ok(RegistryEvent::Triggered(_)) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped = skipped, "Show-control sender fell behind registry events");
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = announce.tick() => {
                    for announcement in self.registry.announcements().await {
                        self.send(&announcement).await;
                    }
                }
            }
        }

        if let Some(handle) = listener {
            handle.abort();
        }
        tracing::info!("Show-control gateway stopped");
    }

    /// Fire-and-forget; errors are logged and the socket is rebuilt on next use.
    async fn send(&mut self, announcement: &TakeAnnouncement) {
        if !self.settings.enabled {
            return;
        }

        if self.socket.is_none() {
            match UdpSocket::bind(("0.0.0.0", 0)).await {
                Ok(socket) => self.socket = Some(socket),
                Err(e) => {
                    tracing::error!("Failed to open show-control send socket: {}", e);
                    return;
                }
            }
        }
        let Some(socket) = &self.socket else {
            return;
        };

        let packet = encode_announcement(&self.settings.address_prefix, announcement);
        let destination = (self.settings.send_host.as_str(), self.settings.send_port);
        match socket.send_to(&packet, destination).await {
            Ok(_) => tracing::debug!(
                recorder = %announcement.recorder_id,
                take = %announcement.take_name,
                "Sent take broadcast"
            ),
            Err(e) => {
                tracing::warn!(
                    destination = %format!("{}:{}", self.settings.send_host, self.settings.send_port),
                    "Failed to send take broadcast: {}",
                    e
                );
                self.socket = None;
            }
        }
    }
}

fn spawn_listener(registry: Arc<Registry>, settings: &GatewaySettings) -> Option<JoinHandle<()>> {
    if !settings.listener_enabled {
        tracing::info!("Show-control listener disabled");
        return None;
    }
    Some(tokio::spawn(run_listener(registry, settings.clone())))
}

/// Bind, serve until an error, wait, repeat. Only aborting the task stops it.
async fn run_listener(registry: Arc<Registry>, settings: GatewaySettings) {
    loop {
        let bind_addr = (settings.listener_host.as_str(), settings.listener_port);
        match UdpSocket::bind(bind_addr).await {
            Ok(socket) => {
                tracing::info!(
                    "Show-control listener on {}:{}",
                    settings.listener_host,
                    settings.listener_port
                );
                if let Err(e) = serve(&registry, &socket, &settings.address_prefix).await {
                    tracing::error!("Show-control listener error: {}", e);
                }
            }
            Err(e) => {
                tracing::error!(
                    "Failed to bind show-control listener on {}:{}: {}",
                    settings.listener_host,
                    settings.listener_port,
                    e
                );
            }
        }

        tracing::info!(
            "Restarting show-control listener in {}s",
            LISTENER_RESTART_DELAY.as_secs()
        );
        sleep(LISTENER_RESTART_DELAY).await;
    }
}

async fn serve(registry: &Registry, socket: &UdpSocket, prefix: &str) -> io::Result<()> {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        let (len, peer) = socket.recv_from(&mut buf).await?;
        match osc::decode(&buf[..len]) {
            Ok(packet) => {
                for message in packet.into_messages() {
                    tracing::debug!(peer = %peer, address = %message.address, "Show-control message");
                    handle_message(registry, prefix, &message).await;
                }
            }
            Err(e) => {
                tracing::warn!(peer = %peer, "Dropping malformed show-control packet: {}", e);
            }
        }
    }
}

#[derive(Clone)]
pub struct GatewayHandle {
    tx: mpsc::Sender<GatewayControl>,
}

impl GatewayHandle {
    pub fn new(tx: mpsc::Sender<GatewayControl>) -> Self {
        Self { tx }
    }

    pub async fn reconfigure(&self, settings: GatewaySettings) -> Result<()> {
        self.tx
            .send(GatewayControl::Reconfigure(settings))
            .await
            .map_err(|e| anyhow::anyhow!("Failed to reconfigure show-control gateway: {}", e))
    }
}
