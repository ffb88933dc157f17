pub mod persist;
mod registry;

pub use registry::{RecorderUpdate, Registry};
