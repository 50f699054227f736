//! Notification engine: submit pipeline, recipient resolution, disk record,
//! fatal resend loop, liveness sweep, night digest and message tracking.

use chrono::{DateTime, Local, TimeZone, Timelike};
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::adapters::dingtalk::{DingNotifier, MessageHandle, MessageStatus};
use crate::adapters::kv::KeyValueStore;
use crate::notify::notice::{next_notice_id, Notice, NoticeLevel, CONTENT_MAX_LENGTH};
use crate::notify::sender::{
    is_night_hour, FreqDecision, SenderState, ALIVE_WINDOW_SECS, KEEP_WINDOW_SECS,
};

/// Reserved producer name for the hub itself
pub const SYSTEM_SENDER: &str = "System";
/// Where the per-recipient notification history lands
pub const RECORD_ROOT: &str = "./notify_record";

const KV_STRATEGY_CONFIG: &str = "strategy_config";
const KV_DING_CONFIG: &str = "dingding_cfg";
const KV_ERROR_LOCK: &str = "strategy_error";
const KV_DING_USER_LIST: &str = "user_list";

/// Minimum spacing between Error deliveries under an error-lock
const ERROR_RESEND_SECS: i64 = 180;
/// Minimum spacing between Fatal (re)deliveries under an error-lock
const FATAL_RESEND_SECS: i64 = 60;

const SWEEP_PERIOD: Duration = Duration::from_secs(5);
const TRACK_PERIOD: Duration = Duration::from_secs(1);

#[derive(Debug, Deserialize)]
struct StrategyConfig {
    #[serde(rename = "dingding_users", default)]
    dingding_users: String,
}

#[derive(Debug, Clone, Deserialize)]
struct PersonConfig {
    #[serde(default)]
    name: String,
    #[serde(default)]
    mob: String,
    /// Anything but "0" marks an admin
    #[serde(default)]
    forever: String,
}

impl PersonConfig {
    fn is_admin(&self) -> bool {
        self.forever != "0"
    }
}

/// The notification engine
pub struct NotifyService {
    kv: Arc<dyn KeyValueStore>,
    ding: Arc<DingNotifier>,
    mirror_url: String,
    record_root: PathBuf,
    senders: Mutex<HashMap<String, SenderState>>,
    messages: Mutex<HashMap<u64, MessageHandle>>,
}

impl NotifyService {
    pub fn new(
        kv: Arc<dyn KeyValueStore>,
        ding: Arc<DingNotifier>,
        mirror_url: String,
        record_root: impl Into<PathBuf>,
    ) -> Arc<Self> {
        let mut sys = SenderState::new(SYSTEM_SENDER, "");
        sys.started = true;
        let mut senders = HashMap::new();
        senders.insert(SYSTEM_SENDER.to_string(), sys);
        Arc::new(Self {
            kv,
            ding,
            mirror_url,
            record_root: record_root.into(),
            senders: Mutex::new(senders),
            messages: Mutex::new(HashMap::new()),
        })
    }

    pub fn spawn_loops(self: &Arc<Self>) {
        let svc = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_PERIOD);
            let mut last = Local::now();
            loop {
                ticker.tick().await;
                let now = Local::now();
                svc.sweep_once(last, now).await;
                last = now;
            }
        });

        let svc = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(TRACK_PERIOD);
            loop {
                ticker.tick().await;
                svc.track_messages_once().await;
            }
        });
        info!("notify service started");
    }

    // #region web operations

    /// /ant/notify/start and /ant/notify/alive
    pub async fn start_or_alive(&self, name: &str, spec_mob: &str) -> String {
        if name.is_empty() {
            return "missing name".to_string();
        }
        let mut senders = self.senders.lock().await;
        let snd = senders
            .entry(name.to_string())
            .or_insert_with(|| {
                info!("created sender [{}]", name);
                SenderState::new(name, spec_mob)
            });
        snd.last_alive = Local::now();
        snd.started = true;
        "ok".to_string()
    }

    /// /ant/notify/stop
    pub async fn stop(&self, name: &str) -> String {
        if name.is_empty() {
            return "missing name".to_string();
        }
        let mut senders = self.senders.lock().await;
        match senders.get_mut(name) {
            Some(snd) => {
                snd.started = false;
                "ok".to_string()
            }
            None => format!("invalid sender name {}", name),
        }
    }

    /// /ant/notify/status
    pub async fn status_dump(&self, kv_addr: &str) -> String {
        let now = Local::now();
        let mut out = String::new();
        out.push_str("====== notify hub ======\n");
        out.push_str(&format!("server time: {}\n", now.format("%Y-%m-%d %H:%M:%S")));
        out.push_str(&format!("kv store: {}\n", kv_addr));
        out.push_str(&format!("records: {}\n\n", self.mirror_url));

        let mut senders = self.senders.lock().await;
        out.push_str(&format!("senders: {}\n", senders.len()));
        let mut names: Vec<String> = senders.keys().cloned().collect();
        names.sort();
        for name in names {
            if let Some(snd) = senders.get_mut(&name) {
                out.push_str(&snd.status_string(now));
                out.push('\n');
            }
        }
        out
    }

    /// /ant/notify/send — process one notice, returns the status string
    pub async fn submit(&self, mut ntf: Notice) -> String {
        ntf.id = next_notice_id();
        self.submit_at(ntf, Local::now()).await
    }

    pub(crate) async fn submit_at(&self, mut ntf: Notice, now: DateTime<Local>) -> String {
        info!("{} processing...", ntf.log_prefix());

        if !self.senders.lock().await.contains_key(&ntf.name) {
            self.inner_error_alert(&format!("{} no such sender", ntf.log_prefix()))
                .await;
            return format!("no such sender:{}", ntf.name);
        }

        let mobs = self.resolve_mobiles(&mut ntf).await;
        if mobs.is_empty() {
            self.inner_error_alert(&format!("{} unable to locate recipient", ntf.log_prefix()))
                .await;
            return format!("no receiver mobs for sender:{}", ntf.name);
        }

        self.record_to_disk(&ntf, &mobs).await;

        let decision = {
            let mut senders = self.senders.lock().await;
            match senders.get_mut(&ntf.name) {
                Some(snd) => {
                    let d = snd.feed_freq();
                    if matches!(d, FreqDecision::Block { .. }) {
                        snd.blocked_count += 1;
                    }
                    d
                }
                None => return format!("no such sender:{}", ntf.name),
            }
        };

        let freq = match decision {
            FreqDecision::Block { freq } => {
                let msg = format!("freq too high: {}", freq);
                info!("{} {}", ntf.log_prefix(), msg);
                return msg;
            }
            FreqDecision::Deliver { freq, warn } => {
                if let Some(w) = warn {
                    ntf.extra_lines.push(w);
                }
                freq
            }
        };

        let prefix = ntf.log_prefix();
        let msg = match ntf.level {
            NoticeLevel::Normal => self.process_normal(ntf, &mobs, now).await,
            NoticeLevel::Error => self.process_error(ntf, &mobs, now).await,
            NoticeLevel::Fatal => self.process_fatal(ntf, &mobs, now).await,
        };
        info!("{} {}", prefix, msg);
        format!("{} (freq={})", msg, freq)
    }

    // #endregion

    // #region level policies

    async fn process_normal(
        &self,
        mut ntf: Notice,
        mobs: &[String],
        now: DateTime<Local>,
    ) -> String {
        if is_night_hour(now.hour()) {
            let mut senders = self.senders.lock().await;
            if let Some(snd) = senders.get_mut(&ntf.name) {
                snd.unread_night += 1;
            }
            "normal notify block by night".to_string()
        } else {
            self.send_resolved(&mut ntf, mobs).await
        }
    }

    async fn process_error(&self, mut ntf: Notice, mobs: &[String], now: DateTime<Local>) -> String {
        let locked = self.has_error_lock(&ntf.name).await;
        let can_send = if !locked {
            self.set_error_lock(&ntf.name).await;
            true
        } else {
            let senders = self.senders.lock().await;
            senders
                .get(&ntf.name)
                .map(|snd| {
                    snd.last_error_send
                        .map(|t| (now - t).num_seconds() > ERROR_RESEND_SECS)
                        .unwrap_or(true)
                })
                .unwrap_or(false)
        };

        if can_send {
            let msg = self.send_resolved(&mut ntf, mobs).await;
            let mut senders = self.senders.lock().await;
            if let Some(snd) = senders.get_mut(&ntf.name) {
                snd.last_error_send = Some(now);
            }
            msg
        } else {
            let mut senders = self.senders.lock().await;
            if let Some(snd) = senders.get_mut(&ntf.name) {
                snd.blocked_count += 1;
            }
            "error-lock blocked".to_string()
        }
    }

    async fn process_fatal(&self, mut ntf: Notice, mobs: &[String], now: DateTime<Local>) -> String {
        let locked = self.has_error_lock(&ntf.name).await;
        let can_send = if !locked {
            self.set_error_lock(&ntf.name).await;
            true
        } else {
            let senders = self.senders.lock().await;
            senders
                .get(&ntf.name)
                .map(|snd| {
                    snd.last_fatal_send
                        .map(|t| (now - t).num_seconds() > FATAL_RESEND_SECS)
                        .unwrap_or(true)
                })
                .unwrap_or(false)
        };

        if can_send {
            let msg = self.send_resolved(&mut ntf, mobs).await;
            let mut senders = self.senders.lock().await;
            if let Some(snd) = senders.get_mut(&ntf.name) {
                snd.last_fatal_send = Some(now);
                snd.latest_fatal = Some(ntf);
            }
            msg
        } else {
            let mut senders = self.senders.lock().await;
            if let Some(snd) = senders.get_mut(&ntf.name) {
                snd.blocked_count += 1;
                // the resend loop always carries the newest fatal
                snd.latest_fatal = Some(ntf);
            }
            "error-lock blocked".to_string()
        }
    }

    // #endregion

    // #region delivery

    /// Resolve recipients and send; used by the sweep paths which bypass
    /// the frequency and level gates.
    async fn deliver_now(&self, mut ntf: Notice) {
        let mobs = self.resolve_mobiles(&mut ntf).await;
        if mobs.is_empty() {
            warn!("{} no recipients, dropped", ntf.log_prefix());
            return;
        }
        self.record_to_disk(&ntf, &mobs).await;
        self.send_resolved(&mut ntf, &mobs).await;
    }

    async fn send_resolved(&self, ntf: &mut Notice, mobs: &[String]) -> String {
        {
            let mut senders = self.senders.lock().await;
            if let Some(snd) = senders.get_mut(&ntf.name) {
                if snd.blocked_count > 0 {
                    ntf.extra_lines.push(format!(
                        "[unread] {} unread messages, see {}",
                        snd.blocked_count, self.mirror_url
                    ));
                    snd.blocked_count = 0;
                }
            }
        }

        let handle = self
            .ding
            .send_text_to_mobiles(&ntf.render(CONTENT_MAX_LENGTH), mobs);
        info!("{} sent to mobs: {:?}", ntf.log_prefix(), mobs);
        self.messages.lock().await.insert(ntf.id, handle);
        "ok".to_string()
    }

    /// Work out who this notice goes to; appends the locate-failure
    /// annotation when falling back to admins.
    async fn resolve_mobiles(&self, ntf: &mut Notice) -> Vec<String> {
        let mut mobs: BTreeSet<String> = BTreeSet::new();

        if !ntf.name.is_empty() {
            if let Some(users) = self.strategy_users(&ntf.name).await {
                for pc in self.person_configs(&users).await {
                    mobs.insert(pc.mob);
                }
            }
        }

        {
            let senders = self.senders.lock().await;
            if let Some(snd) = senders.get(&ntf.name) {
                if snd.spec_mob.len() == 13 && snd.spec_mob.bytes().all(|b| b.is_ascii_digit()) {
                    mobs.insert(snd.spec_mob.clone());
                }
            }
        }

        if ntf.name == SYSTEM_SENDER {
            for mob in self.admin_mobiles().await {
                mobs.insert(mob);
            }
        }

        if mobs.is_empty() {
            for mob in self.admin_mobiles().await {
                mobs.insert(mob);
            }
            ntf.extra_lines.push("[unable to locate recipient]".to_string());
        }

        mobs.into_iter().collect()
    }

    async fn strategy_users(&self, name: &str) -> Option<Vec<String>> {
        let raw = self.kv.hget(KV_STRATEGY_CONFIG, name).await.ok()??;
        let sc: StrategyConfig = serde_json::from_str(&raw).ok()?;
        Some(
            sc.dingding_users
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(ToString::to_string)
                .collect(),
        )
    }

    async fn person_configs(&self, names: &[String]) -> Vec<PersonConfig> {
        match self.user_list().await {
            Some(list) => list
                .into_iter()
                .filter(|pc| names.iter().any(|n| *n == pc.name))
                .collect(),
            None => Vec::new(),
        }
    }

    async fn admin_mobiles(&self) -> Vec<String> {
        match self.user_list().await {
            Some(list) => list
                .into_iter()
                .filter(PersonConfig::is_admin)
                .map(|pc| pc.mob)
                .collect(),
            None => {
                error!("read ding person config failed");
                Vec::new()
            }
        }
    }

    async fn user_list(&self) -> Option<Vec<PersonConfig>> {
        let raw = self.kv.hget(KV_DING_CONFIG, KV_DING_USER_LIST).await.ok()??;
        serde_json::from_str(&raw).ok()
    }

    async fn record_to_disk(&self, ntf: &Notice, mobs: &[String]) {
        let tm = Local
            .timestamp_millis_opt(ntf.local_ts)
            .single()
            .unwrap_or_else(Local::now);
        let day = tm.format("%Y-%m-%d").to_string();
        let body = format!("{}\n", ntf.render(0));
        for mob in mobs {
            let dir = self.record_root.join(mob);
            let path = dir.join(format!("{}.txt", day));
            if let Err(e) = tokio::fs::create_dir_all(&dir).await {
                error!("record dir create failed: {}", e);
                continue;
            }
            let res = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await;
            match res {
                Ok(mut f) => {
                    use tokio::io::AsyncWriteExt;
                    if let Err(e) = f.write_all(body.as_bytes()).await {
                        error!("record append failed: {}", e);
                    }
                }
                Err(e) => error!("record open failed: {}", e),
            }
        }
    }

    // #endregion

    // #region error lock

    async fn has_error_lock(&self, name: &str) -> bool {
        match self.kv.hget(KV_ERROR_LOCK, name).await {
            Ok(Some(v)) => v.eq_ignore_ascii_case("true"),
            Ok(None) => false,
            Err(e) => {
                error!("error-lock read failed for {}: {}", name, e);
                false
            }
        }
    }

    async fn set_error_lock(&self, name: &str) {
        if let Err(e) = self.kv.hset(KV_ERROR_LOCK, name, "true").await {
            self.inner_error_alert(&format!("set error-lock for {} failed: {}", name, e))
                .await;
        }
    }

    // #endregion

    // #region background loops

    pub(crate) async fn sweep_once(&self, last: DateTime<Local>, now: DateTime<Local>) {
        let names: Vec<String> = {
            let senders = self.senders.lock().await;
            senders.keys().cloned().collect()
        };

        for name in names {
            // fatal resend
            let has_fatal = {
                let senders = self.senders.lock().await;
                senders
                    .get(&name)
                    .map(|s| s.latest_fatal.is_some())
                    .unwrap_or(false)
            };
            if has_fatal {
                if self.has_error_lock(&name).await {
                    let due = {
                        let mut senders = self.senders.lock().await;
                        senders.get_mut(&name).and_then(|snd| {
                            let due = snd
                                .last_fatal_send
                                .map(|t| (now - t).num_seconds() >= FATAL_RESEND_SECS)
                                .unwrap_or(true);
                            if due {
                                snd.last_fatal_send = Some(now);
                                snd.latest_fatal.as_mut().map(|f| {
                                    f.resend += 1;
                                    f.clone()
                                })
                            } else {
                                None
                            }
                        })
                    };
                    if let Some(ntf) = due {
                        self.deliver_now(ntf).await;
                    }
                } else {
                    // unlocked by the operator, drop the pending fatal
                    let mut senders = self.senders.lock().await;
                    if let Some(snd) = senders.get_mut(&name) {
                        snd.latest_fatal = None;
                        snd.last_fatal_send = None;
                    }
                }
            }

            // liveness
            let offline = {
                let mut senders = self.senders.lock().await;
                senders.get_mut(&name).and_then(|snd| {
                    if snd.started && (now - snd.last_alive).num_seconds() > ALIVE_WINDOW_SECS {
                        snd.started = false;
                        Some(Notice::new(
                            NoticeLevel::Error,
                            &name,
                            format!("offline > {} s", ALIVE_WINDOW_SECS),
                            now.timestamp_millis(),
                        ))
                    } else {
                        None
                    }
                })
            };
            if let Some(ntf) = offline {
                self.deliver_now(ntf).await;
            }

            // night digest at the 8 -> 9 o'clock transition
            if last.hour() == 8 && now.hour() == 9 {
                let unread = {
                    let mut senders = self.senders.lock().await;
                    senders.get_mut(&name).and_then(|snd| {
                        if snd.unread_night > 0 {
                            let n = snd.unread_night;
                            snd.unread_night = 0;
                            Some(n)
                        } else {
                            None
                        }
                    })
                };
                if let Some(n) = unread {
                    self.deliver_now(Notice::new(
                        NoticeLevel::Normal,
                        &name,
                        format!(
                            "{} unread normal notices from last night, see {}",
                            n, self.mirror_url
                        ),
                        now.timestamp_millis(),
                    ))
                    .await;
                }
            }

            // GC long-dead senders
            let gone = {
                let mut senders = self.senders.lock().await;
                let stale = senders
                    .get(&name)
                    .map(|s| (now - s.last_alive).num_seconds() > KEEP_WINDOW_SECS)
                    .unwrap_or(false);
                if stale {
                    senders.remove(&name);
                }
                stale
            };
            if gone {
                info!("sender [{}] is deleted for not alive", name);
            }
        }

        // the hub heartbeats itself
        let sender_count = {
            let mut senders = self.senders.lock().await;
            if let Some(sys) = senders.get_mut(SYSTEM_SENDER) {
                sys.last_alive = now;
                sys.started = true;
            }
            senders.len()
        };

        if last.hour() < 21 && now.hour() >= 21 {
            self.deliver_now(Notice::new(
                NoticeLevel::Normal,
                SYSTEM_SENDER,
                format!("notify hub running\nsenders: {}", sender_count),
                now.timestamp_millis(),
            ))
            .await;
        }
    }

    pub(crate) async fn track_messages_once(&self) {
        let mut messages = self.messages.lock().await;
        messages.retain(|id, msg| match msg.status() {
            MessageStatus::Pending => true,
            MessageStatus::Finished => {
                info!("notify send ok, id={}, err count={}", id, msg.error_count());
                false
            }
            MessageStatus::Failed => {
                warn!("notify send failed, id={}, err count={}", id, msg.error_count());
                false
            }
        });
    }

    // #endregion

    /// Internal failures are logged and pushed straight to the admins
    async fn inner_error_alert(&self, msg: &str) {
        error!("{}", msg);
        let admins = self.admin_mobiles().await;
        if !admins.is_empty() {
            self.ding.send_text_to_mobiles(msg, &admins);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::kv::MemoryStore;
    use crate::config::DingConfig;

    fn notifier() -> Arc<DingNotifier> {
        DingNotifier::new(DingConfig {
            agent_id: 1,
            key: "k".to_string(),
            secret: "s".to_string(),
            api_url: "http://127.0.0.1:1".to_string(),
        })
    }

    fn test_root() -> PathBuf {
        std::env::temp_dir().join(format!("quanthub-notify-{}", uuid::Uuid::new_v4()))
    }

    async fn service_with_admin() -> (Arc<NotifyService>, Arc<MemoryStore>) {
        let kv = Arc::new(MemoryStore::new());
        kv.hset(
            KV_DING_CONFIG,
            KV_DING_USER_LIST,
            r#"[{"name":"ops","mob":"1380000000000","forever":"1"},{"name":"bob","mob":"1390000000000","forever":"0"}]"#,
        )
        .await
        .unwrap();
        let svc = NotifyService::new(kv.clone(), notifier(), "http://mirror:1".to_string(), test_root());
        (svc, kv)
    }

    fn daytime() -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).single().unwrap()
    }

    fn ntf(level: NoticeLevel, name: &str) -> Notice {
        Notice::new(level, name, "hello".to_string(), daytime().timestamp_millis())
    }

    #[tokio::test]
    async fn test_unknown_sender_rejected() {
        let (svc, _) = service_with_admin().await;
        let reply = svc.submit_at(ntf(NoticeLevel::Normal, "ghost"), daytime()).await;
        assert_eq!(reply, "no such sender:ghost");
    }

    #[tokio::test]
    async fn test_normal_daytime_delivers() {
        let (svc, _) = service_with_admin().await;
        svc.start_or_alive("s1", "").await;
        let reply = svc.submit_at(ntf(NoticeLevel::Normal, "s1"), daytime()).await;
        assert_eq!(reply, "ok (freq=1)");
    }

    #[tokio::test]
    async fn test_normal_night_held() {
        let (svc, _) = service_with_admin().await;
        svc.start_or_alive("s1", "").await;
        let night = Local.with_ymd_and_hms(2026, 3, 2, 3, 0, 0).single().unwrap();
        let reply = svc.submit_at(ntf(NoticeLevel::Normal, "s1"), night).await;
        assert_eq!(reply, "normal notify block by night (freq=1)");
        let senders = svc.senders.lock().await;
        assert_eq!(senders.get("s1").unwrap().unread_night, 1);
    }

    #[tokio::test]
    async fn test_frequency_warning_then_block() {
        let (svc, _) = service_with_admin().await;
        svc.start_or_alive("s1", "").await;
        for i in 1..=9 {
            let reply = svc.submit_at(ntf(NoticeLevel::Normal, "s1"), daytime()).await;
            assert_eq!(reply, format!("ok (freq={})", i));
        }
        // the 10th still delivers
        let reply = svc.submit_at(ntf(NoticeLevel::Normal, "s1"), daytime()).await;
        assert_eq!(reply, "ok (freq=10)");
        // the 11th is blocked
        let reply = svc.submit_at(ntf(NoticeLevel::Normal, "s1"), daytime()).await;
        assert_eq!(reply, "freq too high: 10");
    }

    #[tokio::test]
    async fn test_error_sets_lock_and_blocks_repeat() {
        let (svc, kv) = service_with_admin().await;
        svc.start_or_alive("s1", "").await;
        let reply = svc.submit_at(ntf(NoticeLevel::Error, "s1"), daytime()).await;
        assert_eq!(reply, "ok (freq=1)");
        assert_eq!(
            kv.hget(KV_ERROR_LOCK, "s1").await.unwrap().as_deref(),
            Some("true")
        );
        // immediately after, the lock blocks
        let reply = svc.submit_at(ntf(NoticeLevel::Error, "s1"), daytime()).await;
        assert_eq!(reply, "error-lock blocked (freq=2)");
    }

    #[tokio::test]
    async fn test_fatal_under_preset_lock_stored_then_resent() {
        let (svc, kv) = service_with_admin().await;
        svc.start_or_alive("s2", "").await;
        kv.hset(KV_ERROR_LOCK, "s2", "true").await.unwrap();

        // lock is set but no fatal has ever been sent: delivered immediately
        let reply = svc.submit_at(ntf(NoticeLevel::Fatal, "s2"), daytime()).await;
        assert_eq!(reply, "ok (freq=1)");
        {
            let senders = svc.senders.lock().await;
            let snd = senders.get("s2").unwrap();
            assert_eq!(snd.latest_fatal.as_ref().unwrap().resend, 0);
        }

        // a second fatal inside the window is blocked but replaces the pending one
        let mut second = ntf(NoticeLevel::Fatal, "s2");
        second.content = "newer".to_string();
        let reply = svc.submit_at(second, daytime()).await;
        assert_eq!(reply, "error-lock blocked (freq=2)");
        {
            let senders = svc.senders.lock().await;
            assert_eq!(
                senders.get("s2").unwrap().latest_fatal.as_ref().unwrap().content,
                "newer"
            );
        }

        // one resend interval later the sweep re-delivers with resend bumped
        let later = daytime() + chrono::Duration::seconds(FATAL_RESEND_SECS + 1);
        svc.sweep_once(daytime(), later).await;
        {
            let senders = svc.senders.lock().await;
            assert_eq!(senders.get("s2").unwrap().latest_fatal.as_ref().unwrap().resend, 1);
        }

        // clearing the lock stops the loop at the next sweep
        kv.hset(KV_ERROR_LOCK, "s2", "false").await.unwrap();
        svc.sweep_once(later, later + chrono::Duration::seconds(5)).await;
        let senders = svc.senders.lock().await;
        assert!(senders.get("s2").unwrap().latest_fatal.is_none());
        assert!(senders.get("s2").unwrap().last_fatal_send.is_none());
    }

    #[tokio::test]
    async fn test_liveness_sweep_marks_offline() {
        let (svc, _) = service_with_admin().await;
        svc.start_or_alive("s1", "").await;
        let later = Local::now() + chrono::Duration::seconds(ALIVE_WINDOW_SECS + 5);
        svc.sweep_once(Local::now(), later).await;
        let senders = svc.senders.lock().await;
        assert!(!senders.get("s1").unwrap().started);
    }

    #[tokio::test]
    async fn test_night_digest_on_nine_oclock_transition() {
        let (svc, _) = service_with_admin().await;
        svc.start_or_alive("s1", "").await;
        {
            let mut senders = svc.senders.lock().await;
            senders.get_mut("s1").unwrap().unread_night = 4;
        }
        let before = Local.with_ymd_and_hms(2026, 3, 2, 8, 59, 58).single().unwrap();
        let after = Local.with_ymd_and_hms(2026, 3, 2, 9, 0, 3).single().unwrap();
        svc.sweep_once(before, after).await;
        let senders = svc.senders.lock().await;
        assert_eq!(senders.get("s1").unwrap().unread_night, 0);
    }

    #[tokio::test]
    async fn test_record_file_written() {
        let (svc, _) = service_with_admin().await;
        svc.start_or_alive("s1", "").await;
        svc.submit_at(ntf(NoticeLevel::Normal, "s1"), daytime()).await;
        let day = daytime().format("%Y-%m-%d").to_string();
        let path = svc.record_root.join("1380000000000").join(format!("{}.txt", day));
        let body = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(body.contains("[通知来源]: s1"));
        tokio::fs::remove_dir_all(&svc.record_root).await.ok();
    }

    #[tokio::test]
    async fn test_spec_mob_must_be_13_digits() {
        let (svc, _) = service_with_admin().await;
        svc.start_or_alive("s1", "1234567890123").await;
        svc.start_or_alive("s2", "not-a-number!").await;
        let mut n1 = ntf(NoticeLevel::Normal, "s1");
        let mobs = svc.resolve_mobiles(&mut n1).await;
        assert!(mobs.contains(&"1234567890123".to_string()));
        let mut n2 = ntf(NoticeLevel::Normal, "s2");
        let mobs = svc.resolve_mobiles(&mut n2).await;
        assert!(!mobs.contains(&"not-a-number!".to_string()));
        // fallback annotated the notice
        assert!(n2.extra_lines.iter().any(|l| l.contains("unable to locate recipient")));
    }
}
