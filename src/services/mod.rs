pub mod gateway;
pub mod hub;
pub mod reconciler;

pub use gateway::{Gateway, GatewayHandle};
pub use hub::{HubBridge, HubHandle, HubTimings, LinkState};
pub use reconciler::{Reconciler, ReconcilerHandle};
