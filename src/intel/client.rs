//! Producer-side helper for publishing intel to the hub.

use chrono::Utc;
use reqwest::Client;
use tracing::{error, info};

use crate::error::Result;
use crate::intel::types::{Intel, IntelMenu, DING_TYPE_TEXT};

pub struct IntelClient {
    url: String,
    client: Client,
}

impl IntelClient {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }

    fn intel_url(&self) -> String {
        format!("{}/intel/new", self.url)
    }

    fn menu_url(&self) -> String {
        format!("{}/intel/menu", self.url)
    }

    pub async fn send_menu(&self, menu: &IntelMenu) -> Result<()> {
        info!("sending intel menu for [{}]", menu.main_type);
        let resp = self.client.post(self.menu_url()).json(menu).send().await?;
        if !resp.status().is_success() {
            error!("menu post rejected: HTTP {}", resp.status());
        }
        Ok(())
    }

    pub async fn send_intel(&self, intel: &Intel) -> Result<()> {
        let resp = self.client.post(self.intel_url()).json(intel).send().await?;
        if !resp.status().is_success() {
            error!("intel post rejected: HTTP {}", resp.status());
        }
        Ok(())
    }

    /// Shorthand for plain text intel; the main type doubles as the title
    pub async fn send_text_intel(
        &self,
        level: i32,
        main_type: &str,
        sub_type: &str,
        content: &str,
        to_chat: bool,
    ) -> Result<()> {
        self.send_intel(&Intel {
            seq: 0,
            time: Utc::now(),
            level,
            main_type: main_type.to_string(),
            sub_type: sub_type.to_string(),
            ding_type: if to_chat {
                DING_TYPE_TEXT.to_string()
            } else {
                String::new()
            },
            title: main_type.to_string(),
            content: content.to_string(),
            tts: String::new(),
            url: String::new(),
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_urls() {
        let client = IntelClient::new("http://hub:8200/");
        assert_eq!(client.intel_url(), "http://hub:8200/intel/new");
        assert_eq!(client.menu_url(), "http://hub:8200/intel/menu");
    }
}
