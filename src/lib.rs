//! Broadcast recorder coordinator
//!
//! Tracks take metadata for a fleet of recording decks, drives the decks over their
//! TCP control protocol, and keeps a show-control surface (OSC over UDP) and an
//! optional monitoring hub (WebSocket) in sync. [`app::App`] wires the services
//! together; [`operations::Operations`] is the surface a UI calls into.

pub mod app;
pub mod config;
pub mod device;
pub mod error;
pub mod messages;
pub mod model;
pub mod operations;
pub mod osc;
pub mod services;
pub mod store;
pub mod template;
