pub mod service;
pub mod uploader;

pub use service::{serve_static, FileService};
pub use uploader::Uploader;
