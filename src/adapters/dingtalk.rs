//! DingTalk work-message notifications
//!
//! Thin adapter over the chat platform's corp messaging API. Sends never
//! block the caller: each send spawns the HTTP call and hands back a
//! [`MessageHandle`] the engines poll for a terminal status.

use reqwest::Client;
use serde_json::json;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use tracing::{debug, error};

use crate::config::DingConfig;

const SEND_ATTEMPTS: u32 = 3;

/// Delivery state of one outbound chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageStatus {
    Pending,
    Finished,
    Failed,
}

struct MessageState {
    status: AtomicU8,
    error_count: AtomicU32,
}

/// Poll handle for one outbound chat message
#[derive(Clone)]
pub struct MessageHandle {
    id: u64,
    state: Arc<MessageState>,
}

impl MessageHandle {
    fn new(id: u64) -> Self {
        Self {
            id,
            state: Arc::new(MessageState {
                status: AtomicU8::new(0),
                error_count: AtomicU32::new(0),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn status(&self) -> MessageStatus {
        match self.state.status.load(Ordering::Acquire) {
            0 => MessageStatus::Pending,
            1 => MessageStatus::Finished,
            _ => MessageStatus::Failed,
        }
    }

    pub fn error_count(&self) -> u32 {
        self.state.error_count.load(Ordering::Acquire)
    }

    fn set_status(&self, status: MessageStatus) {
        let v = match status {
            MessageStatus::Pending => 0,
            MessageStatus::Finished => 1,
            MessageStatus::Failed => 2,
        };
        self.state.status.store(v, Ordering::Release);
    }

    fn add_error(&self) {
        self.state.error_count.fetch_add(1, Ordering::AcqRel);
    }
}

/// DingTalk notification client
pub struct DingNotifier {
    client: Client,
    cfg: DingConfig,
    next_id: AtomicU64,
}

impl DingNotifier {
    pub fn new(cfg: DingConfig) -> Arc<Self> {
        Arc::new(Self {
            client: Client::new(),
            cfg,
            next_id: AtomicU64::new(0),
        })
    }

    /// Send a text message addressed by mobile numbers
    pub fn send_text_to_mobiles(&self, text: &str, mobiles: &[String]) -> MessageHandle {
        if mobiles.is_empty() {
            let handle = MessageHandle::new(self.next_id.fetch_add(1, Ordering::AcqRel));
            handle.set_status(MessageStatus::Finished);
            return handle;
        }
        let payload = json!({
            "agent_id": self.cfg.agent_id,
            "to_mobiles": mobiles,
            "msgtype": "text",
            "text": { "content": text },
        });
        self.dispatch(payload)
    }

    /// Send a text message addressed by platform user ids
    pub fn send_text_to_users(&self, text: &str, uids: &[String]) -> MessageHandle {
        if uids.is_empty() {
            let handle = MessageHandle::new(self.next_id.fetch_add(1, Ordering::AcqRel));
            handle.set_status(MessageStatus::Finished);
            return handle;
        }
        let payload = json!({
            "agent_id": self.cfg.agent_id,
            "to_users": uids,
            "msgtype": "text",
            "text": { "content": text },
        });
        self.dispatch(payload)
    }

    /// Send a link card addressed by mobile numbers
    pub fn send_link_to_mobiles(
        &self,
        url: &str,
        pic_id: &str,
        title: &str,
        text: &str,
        mobiles: &[String],
    ) -> MessageHandle {
        if mobiles.is_empty() {
            let handle = MessageHandle::new(self.next_id.fetch_add(1, Ordering::AcqRel));
            handle.set_status(MessageStatus::Finished);
            return handle;
        }
        let payload = json!({
            "agent_id": self.cfg.agent_id,
            "to_mobiles": mobiles,
            "msgtype": "link",
            "link": { "messageUrl": url, "picUrl": pic_id, "title": title, "text": text },
        });
        self.dispatch(payload)
    }

    /// Send a link card addressed by platform user ids
    pub fn send_link_to_users(
        &self,
        url: &str,
        pic_id: &str,
        title: &str,
        text: &str,
        uids: &[String],
    ) -> MessageHandle {
        if uids.is_empty() {
            let handle = MessageHandle::new(self.next_id.fetch_add(1, Ordering::AcqRel));
            handle.set_status(MessageStatus::Finished);
            return handle;
        }
        let payload = json!({
            "agent_id": self.cfg.agent_id,
            "to_users": uids,
            "msgtype": "link",
            "link": { "messageUrl": url, "picUrl": pic_id, "title": title, "text": text },
        });
        self.dispatch(payload)
    }

    fn dispatch(&self, payload: serde_json::Value) -> MessageHandle {
        let handle = MessageHandle::new(self.next_id.fetch_add(1, Ordering::AcqRel));
        let client = self.client.clone();
        let url = format!("{}/message/corpconversation/send", self.cfg.api_url);
        let key = self.cfg.key.clone();
        let secret = self.cfg.secret.clone();
        let h = handle.clone();

        tokio::spawn(async move {
            for attempt in 1..=SEND_ATTEMPTS {
                let res = client
                    .post(&url)
                    .query(&[("appkey", key.as_str()), ("appsecret", secret.as_str())])
                    .json(&payload)
                    .send()
                    .await;
                match res {
                    Ok(resp) if resp.status().is_success() => {
                        debug!("ding message {} sent", h.id());
                        h.set_status(MessageStatus::Finished);
                        return;
                    }
                    Ok(resp) => {
                        h.add_error();
                        error!(
                            "ding message {} rejected (attempt {}): HTTP {}",
                            h.id(),
                            attempt,
                            resp.status()
                        );
                    }
                    Err(e) => {
                        h.add_error();
                        error!("ding message {} failed (attempt {}): {}", h.id(), attempt, e);
                    }
                }
            }
            h.set_status(MessageStatus::Failed);
        });

        handle
    }
}
