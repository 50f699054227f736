pub mod broadcast;
pub mod client;
pub mod protocol;
pub mod registry;
pub mod service;

pub use client::StrategyClient;
pub use protocol::{Frame, QuantEvent};
pub use service::FleetService;
