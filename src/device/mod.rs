mod client;
pub mod protocol;

pub use client::DeckClient;
pub use protocol::{Codec, TransportCommand, VideoInput};

#[cfg(test)]
pub(crate) use client::fake::FakeDeck;

use async_trait::async_trait;
use std::time::Duration;

use crate::model::TransportStatus;

/// Result of a transport info query; absent fields were not reported.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransportInfo {
    pub status: Option<TransportStatus>,
    pub timecode: Option<String>,
}

/// One refresh of a recorder's device-derived fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceStatus {
    pub online: bool,
    pub codec: Option<String>,
    pub transport: TransportInfo,
}

impl DeviceStatus {
    pub fn offline() -> Self {
        Self::default()
    }

    pub fn online() -> Self {
        Self {
            online: true,
            ..Self::default()
        }
    }
}

/// Read-only device queries used by the status reconciler.
#[async_trait]
pub trait DeckProbe: Send + Sync {
    async fn check_online(&self, address: &str) -> bool;

    async fn query_codec(&self, address: &str) -> Option<String>;

    async fn query_transport_info(&self, address: &str) -> TransportInfo;
}

/// Builds deck clients with the configured port and timeouts.
#[derive(Debug, Clone)]
pub struct DeckConnector {
    port: u16,
    control_timeout: Duration,
    list_timeout: Duration,
}

impl DeckConnector {
    pub fn new(port: u16, control_timeout: Duration, list_timeout: Duration) -> Self {
        Self {
            port,
            control_timeout,
            list_timeout,
        }
    }

    pub fn client(&self, address: &str) -> DeckClient {
        DeckClient::new(address)
            .with_port(self.port)
            .with_timeouts(self.control_timeout, self.list_timeout)
    }

    /// Upper bound for one online check plus both queries, with slack.
    pub fn refresh_deadline(&self) -> Duration {
        self.control_timeout * 3 + Duration::from_secs(1)
    }
}

impl Default for DeckConnector {
    fn default() -> Self {
        Self::new(
            protocol::DEFAULT_PORT,
            Duration::from_secs(3),
            Duration::from_secs(5),
        )
    }
}

#[async_trait]
impl DeckProbe for DeckConnector {
    async fn check_online(&self, address: &str) -> bool {
        self.client(address).check_online().await
    }

    async fn query_codec(&self, address: &str) -> Option<String> {
        self.client(address).query_codec().await
    }

    async fn query_transport_info(&self, address: &str) -> TransportInfo {
        self.client(address).query_transport_info().await
    }
}
