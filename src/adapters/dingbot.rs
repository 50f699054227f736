//! Inbound chat-bot webhooks
//!
//! The chat platform POSTs user messages to the hub with a `Timestamp`
//! header and an HMAC-SHA256 `Sign` header. Replies go back through the
//! per-conversation session webhook carried in the message.

use axum::http::HeaderMap;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::Local;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;
use tracing::{error, info};

type HmacSha256 = Hmac<Sha256>;

pub const CONVERSATION_SINGLE: &str = "1";

/// A user message relayed by the chat bot
#[derive(Debug, Clone, Deserialize)]
pub struct DingUserMsg {
    #[serde(rename = "senderNick", default)]
    pub sender_nick: String,
    #[serde(rename = "senderStaffId", default)]
    pub sender_user_id: String,
    #[serde(rename = "conversationType", default)]
    pub conversation_type: String,
    #[serde(rename = "sessionWebhook", default)]
    pub webhook: String,
    #[serde(default)]
    pub text: DingMsgText,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DingMsgText {
    #[serde(default)]
    pub content: String,
}

/// Compute the webhook signature over `timestamp + "\n" + secret`
pub fn sign(content: &str, secret: &str) -> Result<String, crate::error::HubError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| crate::error::HubError::Signature(format!("HMAC init failed: {}", e)))?;
    mac.update(content.as_bytes());
    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

/// Verify headers and parse the message body. On failure returns the
/// plain-text body the endpoint must reply with.
pub fn parse_ding_message(
    headers: &HeaderMap,
    body: &[u8],
    secret: &str,
) -> std::result::Result<DingUserMsg, &'static str> {
    let ts = headers
        .get("Timestamp")
        .and_then(|v| v.to_str().ok())
        .ok_or("sign failed!")?;
    let client_sign = headers
        .get("Sign")
        .and_then(|v| v.to_str().ok())
        .ok_or("sign failed!")?;

    let calculated = match sign(&format!("{}\n{}", ts, secret), secret) {
        Ok(s) => s,
        Err(e) => {
            error!("generate sign str failed, err={}", e);
            return Err("internal error");
        }
    };
    if calculated != client_sign {
        error!("webhook sign failed!");
        return Err("sign failed!");
    }

    match serde_json::from_slice::<DingUserMsg>(body) {
        Ok(msg) => Ok(msg),
        Err(e) => {
            error!("parse webhook body error, err={}", e);
            Err("internal error")
        }
    }
}

/// Reply a text message through the session webhook, prefixed with the
/// server time so operators can correlate with logs
pub fn reply_text(webhook: &str, content: &str) {
    let body = format!("{}\n{}", Local::now().format("%Y-%m-%d %H:%M:%S"), content);
    post_webhook_text(webhook, body);
}

fn post_webhook_text(webhook: &str, content: String) {
    if webhook.is_empty() {
        return;
    }
    let webhook = webhook.to_string();
    tokio::spawn(async move {
        let payload = json!({ "text": { "content": content }, "msgtype": "text" });
        match reqwest::Client::new().post(&webhook).json(&payload).send().await {
            Ok(resp) => info!("webhook reply sent, status={}", resp.status()),
            Err(e) => error!("webhook reply failed: {}", e),
        }
    });
}
