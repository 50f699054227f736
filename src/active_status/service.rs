//! Stuck-subsystem detection. Subsystems report a monotonically increasing
//! activity code; a code that stops advancing past its declared tolerance
//! raises an admin alert, at most three times, five minutes apart.

use chrono::{DateTime, Local};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::info;

use crate::adapters::dingtalk::DingNotifier;

const SWEEP_PERIOD: Duration = Duration::from_secs(1);
/// Spacing between repeated notices for the same stuck status
const NOTICE_GAP_SECS: i64 = 300;
/// Notices per (guid, status) before the entry is dropped
const MAX_NOTICES: u32 = 3;

#[derive(Debug, Clone)]
pub struct ActiveStatus {
    pub code: i64,
    pub active_at: DateTime<Local>,
    pub max_stuck_secs: i64,
    pub last_notice: Option<DateTime<Local>>,
    pub notice_count: u32,
}

impl ActiveStatus {
    fn status_line(&self, now: DateTime<Local>) -> String {
        format!(
            "code:{}\tactiveAt:{}sec\tmaxStuck:{}sec\tlastNotice:{}\tnoticeCount:{}",
            self.code,
            (now - self.active_at).num_seconds(),
            self.max_stuck_secs,
            self.last_notice
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "-".to_string()),
            self.notice_count
        )
    }

    /// True when the code has been stale past its tolerance and the last
    /// notice is old enough to repeat
    fn due_for_notice(&self, now: DateTime<Local>) -> bool {
        if self.notice_count >= MAX_NOTICES {
            return false;
        }
        if (now - self.active_at).num_seconds() <= self.max_stuck_secs {
            return false;
        }
        self.last_notice
            .map(|t| (now - t).num_seconds() > NOTICE_GAP_SECS)
            .unwrap_or(true)
    }
}

pub struct ActiveStatusService {
    // guid -> status name -> status
    statuses: Mutex<HashMap<String, HashMap<String, ActiveStatus>>>,
    ding: Arc<DingNotifier>,
    admin_mob: String,
}

impl ActiveStatusService {
    pub fn new(ding: Arc<DingNotifier>, admin_mob: &str) -> Arc<Self> {
        Arc::new(Self {
            statuses: Mutex::new(HashMap::new()),
            ding,
            admin_mob: admin_mob.to_string(),
        })
    }

    pub fn spawn_loops(self: &Arc<Self>) {
        let svc = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_PERIOD);
            loop {
                ticker.tick().await;
                svc.sweep_once(Local::now()).await;
            }
        });
        info!("active-status service started");
    }

    /// GET /active_status/update — only an advancing code refreshes the
    /// activity time; the tolerance is always replaced.
    pub async fn refresh(&self, guid: &str, name: &str, code: i64, max_stuck_secs: i64) {
        let mut statuses = self.statuses.lock().await;
        let per_guid = statuses.entry(guid.to_string()).or_default();
        match per_guid.get_mut(name) {
            Some(status) => {
                if code > status.code {
                    status.active_at = Local::now();
                    status.notice_count = 0;
                    status.code = code;
                }
                status.max_stuck_secs = max_stuck_secs;
            }
            None => {
                per_guid.insert(
                    name.to_string(),
                    ActiveStatus {
                        code,
                        active_at: Local::now(),
                        max_stuck_secs,
                        last_notice: None,
                        notice_count: 0,
                    },
                );
            }
        }
    }

    /// GET /active_status/quit — drop everything under a guid
    pub async fn clear(&self, guid: &str) {
        let mut statuses = self.statuses.lock().await;
        statuses.remove(guid);
    }

    /// GET /active_status/list
    pub async fn list_dump(&self) -> String {
        let now = Local::now();
        let statuses = self.statuses.lock().await;
        let mut out = format!("active status entities: {}\n", statuses.len());
        let mut items: Vec<(String, String, String)> = Vec::new();
        for (guid, per_guid) in statuses.iter() {
            for (name, status) in per_guid.iter() {
                items.push((guid.clone(), name.clone(), status.status_line(now)));
            }
        }
        items.sort();
        for (i, (guid, name, line)) in items.iter().enumerate() {
            out.push_str(&format!("{}. guid:{}\tstatus:{}\t{}\n", i + 1, guid, name, line));
        }
        out
    }

    pub(crate) async fn sweep_once(&self, now: DateTime<Local>) {
        let mut notices: Vec<String> = Vec::new();
        {
            let mut statuses = self.statuses.lock().await;
            for (guid, per_guid) in statuses.iter_mut() {
                per_guid.retain(|name, status| {
                    if status.notice_count >= MAX_NOTICES {
                        return false;
                    }
                    if status.due_for_notice(now) {
                        notices.push(format!(
                            "[{}] status [{}] stuck for {}s",
                            guid,
                            name,
                            (now - status.active_at).num_seconds()
                        ));
                        status.last_notice = Some(now);
                        status.notice_count += 1;
                    }
                    true
                });
            }
            statuses.retain(|_, per_guid| !per_guid.is_empty());
        }
        for text in notices {
            info!("{}", text);
            self.ding
                .send_text_to_mobiles(&text, &[self.admin_mob.clone()]);
        }
    }

    #[cfg(test)]
    pub(crate) async fn get(&self, guid: &str, name: &str) -> Option<ActiveStatus> {
        let statuses = self.statuses.lock().await;
        statuses.get(guid).and_then(|m| m.get(name)).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DingConfig;

    fn service() -> Arc<ActiveStatusService> {
        let ding = DingNotifier::new(DingConfig {
            agent_id: 1,
            key: "k".to_string(),
            secret: "s".to_string(),
            api_url: "http://127.0.0.1:1".to_string(),
        });
        ActiveStatusService::new(ding, "13800000000")
    }

    #[tokio::test]
    async fn test_only_advancing_code_refreshes() {
        let svc = service();
        svc.refresh("g1", "loop", 5, 60).await;
        let first = svc.get("g1", "loop").await.unwrap();

        // same code: activity not refreshed, tolerance replaced
        svc.refresh("g1", "loop", 5, 30).await;
        let second = svc.get("g1", "loop").await.unwrap();
        assert_eq!(second.active_at, first.active_at);
        assert_eq!(second.max_stuck_secs, 30);

        // lower code: ignored for activity too
        svc.refresh("g1", "loop", 3, 30).await;
        let third = svc.get("g1", "loop").await.unwrap();
        assert_eq!(third.code, 5);
        assert_eq!(third.active_at, first.active_at);

        // advancing code refreshes and resets the notice counter
        svc.refresh("g1", "loop", 6, 30).await;
        let fourth = svc.get("g1", "loop").await.unwrap();
        assert_eq!(fourth.code, 6);
        assert!(fourth.active_at >= first.active_at);
    }

    #[tokio::test]
    async fn test_notice_schedule_and_removal() {
        let svc = service();
        svc.refresh("g1", "loop", 1, 5).await;
        let start = svc.get("g1", "loop").await.unwrap().active_at;

        // inside tolerance: nothing due
        svc.sweep_once(start + chrono::Duration::seconds(4)).await;
        assert_eq!(svc.get("g1", "loop").await.unwrap().notice_count, 0);

        // first notice right past the tolerance
        svc.sweep_once(start + chrono::Duration::seconds(6)).await;
        assert_eq!(svc.get("g1", "loop").await.unwrap().notice_count, 1);

        // within the 5-minute gap: no repeat
        svc.sweep_once(start + chrono::Duration::seconds(60)).await;
        assert_eq!(svc.get("g1", "loop").await.unwrap().notice_count, 1);

        // after the gap: second and third notices
        svc.sweep_once(start + chrono::Duration::seconds(6 + 301)).await;
        assert_eq!(svc.get("g1", "loop").await.unwrap().notice_count, 2);
        svc.sweep_once(start + chrono::Duration::seconds(6 + 602)).await;
        assert_eq!(svc.get("g1", "loop").await.unwrap().notice_count, 3);

        // the exhausted entry is dropped on the next sweep
        svc.sweep_once(start + chrono::Duration::seconds(6 + 903)).await;
        assert!(svc.get("g1", "loop").await.is_none());
    }

    #[tokio::test]
    async fn test_quit_clears_guid() {
        let svc = service();
        svc.refresh("g1", "a", 1, 60).await;
        svc.refresh("g1", "b", 1, 60).await;
        svc.refresh("g2", "a", 1, 60).await;
        svc.clear("g1").await;
        assert!(svc.get("g1", "a").await.is_none());
        assert!(svc.get("g2", "a").await.is_some());
    }

    #[tokio::test]
    async fn test_list_dump_sorted() {
        let svc = service();
        svc.refresh("g2", "b", 1, 60).await;
        svc.refresh("g1", "a", 1, 60).await;
        let dump = svc.list_dump().await;
        assert!(dump.contains("active status entities: 2"));
        let g1 = dump.find("guid:g1").unwrap();
        let g2 = dump.find("guid:g2").unwrap();
        assert!(g1 < g2);
    }
}
