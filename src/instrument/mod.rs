//! Instrument identification and discovery

pub mod discovery;
pub mod identity;

pub use discovery::{discover, discover_attached, DiscoveredDevice};
pub use identity::{model_number, Identity};
