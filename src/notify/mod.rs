pub mod notice;
pub mod sender;
pub mod service;

pub use notice::{Notice, NoticeLevel, CONTENT_MAX_LENGTH};
pub use service::{NotifyService, SYSTEM_SENDER};
