//! Hub connection state machine
//!
//! ```text
//! Disconnected -> Connecting -> Authenticating -> Authenticated
//!       ^              |               |                |
//!       +--------------+---------------+----------------+  (close / error)
//! ```
//! There is no terminal failure state: every disconnect while enabled schedules a
//! reconnect. The machine only decides; the bridge performs the returned actions.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Authenticating,
    Authenticated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkAction {
    SendAuth,
    StartTimers,
    StopTimers,
    Reconnect(Duration),
}

/// Periods and delays used by the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubTimings {
    pub heartbeat: Duration,
    pub metrics: Duration,
    pub reconnect: Duration,
    /// Pause between dropping the old link and dialing a changed URL
    pub url_change: Duration,
    pub connect_timeout: Duration,
}

impl Default for HubTimings {
    fn default() -> Self {
        Self {
            heartbeat: Duration::from_secs(30),
            metrics: Duration::from_secs(30),
            reconnect: Duration::from_secs(5),
            url_change: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug)]
pub struct HubLink {
    state: LinkState,
    enabled: bool,
    timers_running: bool,
    timings: HubTimings,
}

impl HubLink {
    pub fn new(enabled: bool, timings: HubTimings) -> Self {
        Self {
            state: LinkState::Disconnected,
            enabled,
            timers_running: false,
            timings,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn timers_running(&self) -> bool {
        self.timers_running
    }

    pub fn timings(&self) -> &HubTimings {
        &self.timings
    }

    /// Begin dialing. False when disabled or already connected.
    pub fn connect(&mut self) -> bool {
        if !self.enabled || self.state != LinkState::Disconnected {
            return false;
        }
        self.state = LinkState::Connecting;
        true
    }

    pub fn opened(&mut self) -> Vec<LinkAction> {
        if self.state != LinkState::Connecting {
            return Vec::new();
        }
        self.state = LinkState::Authenticating;
        vec![LinkAction::SendAuth]
    }

    pub fn authenticated(&mut self) -> Vec<LinkAction> {
        if self.state != LinkState::Authenticating {
            return Vec::new();
        }
        self.state = LinkState::Authenticated;
        self.timers_running = true;
        vec![LinkAction::StartTimers]
    }

    /// The socket closed, errored, or never opened.
    pub fn closed(&mut self) -> Vec<LinkAction> {
        let mut actions = Vec::new();
        if self.timers_running {
            self.timers_running = false;
            actions.push(LinkAction::StopTimers);
        }
        self.state = LinkState::Disconnected;
        if self.enabled {
            actions.push(LinkAction::Reconnect(self.timings.reconnect));
        }
        actions
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_handshake() {
        let mut link = HubLink::new(true, HubTimings::default());
        assert!(link.connect());
        assert_eq!(link.state(), LinkState::Connecting);
        assert_eq!(link.opened(), vec![LinkAction::SendAuth]);
        assert_eq!(link.state(), LinkState::Authenticating);
        assert!(!link.timers_running());
        assert_eq!(link.authenticated(), vec![LinkAction::StartTimers]);
        assert_eq!(link.state(), LinkState::Authenticated);
        assert!(link.timers_running());
    }

    #[test]
    fn test_close_stops_timers_and_schedules_reconnect() {
        let mut link = HubLink::new(true, HubTimings::default());
        link.connect();
        link.opened();
        link.authenticated();

        assert_eq!(
            link.closed(),
            vec![
                LinkAction::StopTimers,
                LinkAction::Reconnect(Duration::from_secs(5))
            ]
        );
        assert_eq!(link.state(), LinkState::Disconnected);
        assert!(!link.timers_running());
    }

    #[test]
    fn test_close_before_auth_only_reconnects() {
        let mut link = HubLink::new(true, HubTimings::default());
        link.connect();
        link.opened();
        assert_eq!(
            link.closed(),
            vec![LinkAction::Reconnect(Duration::from_secs(5))]
        );
    }

    #[test]
    fn test_disabled_link_never_reconnects() {
        let mut link = HubLink::new(false, HubTimings::default());
        assert!(!link.connect());

        link.set_enabled(true);
        link.connect();
        link.opened();
        link.authenticated();
        link.set_enabled(false);
        assert_eq!(link.closed(), vec![LinkAction::StopTimers]);
    }

    #[test]
    fn test_out_of_order_events_are_ignored() {
        let mut link = HubLink::new(true, HubTimings::default());
        assert!(link.authenticated().is_empty());
        assert!(link.opened().is_empty());
        link.connect();
        assert!(!link.connect());
        assert!(link.authenticated().is_empty());
    }
}
