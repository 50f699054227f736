//! Client-side reporter for the stuck detector.

use reqwest::Client;
use tracing::warn;

use crate::error::Result;

pub struct StatusReporter {
    url: String,
    client: Client,
}

impl StatusReporter {
    pub fn new(url: &str) -> Self {
        let url = if url.starts_with("http") {
            url.to_string()
        } else {
            format!("http://{}", url)
        };
        Self {
            url: url.trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }

    pub async fn update(&self, guid: &str, name: &str, code: i64, max_stuck_secs: i64) -> Result<()> {
        let url = format!("{}/active_status/update", self.url);
        let res = self
            .client
            .get(&url)
            .query(&[
                ("guid", guid),
                ("name", name),
                ("code", &code.to_string()),
                ("max_stuck", &max_stuck_secs.to_string()),
            ])
            .send()
            .await;
        if let Err(e) = &res {
            warn!("active_status update failed: {}", e);
        }
        res?;
        Ok(())
    }

    pub async fn quit(&self, guid: &str) -> Result<()> {
        let url = format!("{}/active_status/quit", self.url);
        let res = self.client.get(&url).query(&[("guid", guid)]).send().await;
        if let Err(e) = &res {
            warn!("active_status quit failed: {}", e);
        }
        res?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheme_prefixing() {
        let r = StatusReporter::new("hub.internal:8200");
        assert_eq!(r.url, "http://hub.internal:8200");
        let r = StatusReporter::new("https://hub.internal:8200/");
        assert_eq!(r.url, "https://hub.internal:8200");
    }
}
