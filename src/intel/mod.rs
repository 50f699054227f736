pub mod client;
pub mod commands;
pub mod filter;
pub mod service;
pub mod types;

pub use client::IntelClient;
pub use filter::FilterStore;
pub use service::IntelService;
pub use types::{Intel, IntelMenu};
