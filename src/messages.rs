use crate::config::{GatewaySettings, HubSettings};

/// What the show-control surface is told about one recorder's take.
#[derive(Clone, Debug, PartialEq)]
pub struct TakeAnnouncement {
    pub recorder_id: String,
    /// Display name, falling back to the recorder id.
    pub display_name: String,
    pub take_name: String,
    pub shot_number: u32,
    pub take_number: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TriggerTarget {
    All,
    Recorder(String),
}

/// Registry notifications (observable via broadcast channel)
#[derive(Clone, Debug, PartialEq)]
pub enum RegistryEvent {
    /// A take was committed from any source
    TakeCommitted(TakeAnnouncement),
    /// A recorder was added and should be announced to the show-control surface
    RecorderAnnounced(TakeAnnouncement),
    /// A show-control trigger was applied
    Triggered(TriggerTarget),
}

/// Commands for the status reconciler service
#[derive(Debug)]
pub enum ReconcilerCommand {
    /// Run a pass now instead of waiting for the next tick
    RefreshNow,
}

/// Commands for the show-control gateway service
#[derive(Debug)]
pub enum GatewayControl {
    Reconfigure(GatewaySettings),
}

/// Commands for the hub bridge service
#[derive(Debug)]
pub enum HubControl {
    Reconfigure(HubSettings),
}
