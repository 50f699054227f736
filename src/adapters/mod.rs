pub mod dingbot;
pub mod dingtalk;
pub mod kv;

pub use dingbot::DingUserMsg;
pub use dingtalk::{DingNotifier, MessageHandle, MessageStatus};
pub use kv::{KeyValueStore, MemoryStore, RedisStore};
