//! Intel distribution: ingests items over HTTP, stores the backlog in the
//! kv store and forwards matching items to subscribers on the chat platform.

use axum::http::HeaderMap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{error, info};

use crate::adapters::dingbot;
use crate::adapters::dingtalk::DingNotifier;
use crate::adapters::kv::KeyValueStore;
use crate::intel::filter::FilterStore;
use crate::intel::types::{Intel, IntelMenu, DING_TYPE_LINK, DING_TYPE_TEXT};

/// Subscription store snapshot
pub const FILTER_FILE: &str = "ding_filter.json";

pub(crate) const KV_INTEL_STATUS: &str = "intel_status";
pub(crate) const KV_INTEL_LATEST_SEQ: &str = "latest_seq";
pub(crate) const KV_INTEL_LIST: &str = "intel_list";
/// The backlog keeps this many most recent items
pub(crate) const INTEL_KEEP: i64 = 50_000;
/// Fixed picture shown on link cards
const PIC_ID: &str = "@lALPDeREZUXvbJDNAgDNAgA";

pub struct IntelService {
    pub filter: FilterStore,
    pub(crate) menu: RwLock<BTreeMap<String, IntelMenu>>,
    pub(crate) ding: Arc<DingNotifier>,
    pub(crate) kv: Arc<dyn KeyValueStore>,
    pub(crate) admin_mob: String,
    pub(crate) seq: AtomicU64,
    pub(crate) bot_secret: String,
}

impl IntelService {
    pub async fn new(
        kv: Arc<dyn KeyValueStore>,
        ding: Arc<DingNotifier>,
        admin_mob: &str,
        bot_secret: &str,
        filter_path: &str,
    ) -> Arc<Self> {
        let last_seq = match kv.hget(KV_INTEL_STATUS, KV_INTEL_LATEST_SEQ).await {
            Ok(Some(raw)) => raw.parse::<u64>().unwrap_or(0),
            _ => 0,
        };
        info!("intel service starting from seq {}", last_seq);
        Arc::new(Self {
            filter: FilterStore::load(filter_path),
            menu: RwLock::new(BTreeMap::new()),
            ding,
            kv,
            admin_mob: admin_mob.to_string(),
            seq: AtomicU64::new(last_seq),
            bot_secret: bot_secret.to_string(),
        })
    }

    /// POST /intel/menu
    pub fn handle_menu(&self, menu: IntelMenu) {
        let mut menus = self.menu.write().unwrap();
        info!("intel menu updated for [{}]", menu.main_type);
        menus.insert(menu.main_type.clone(), menu);
    }

    /// POST /intel/new
    pub async fn process_intel(&self, mut intel: Intel) {
        if intel.level == 0 {
            intel.content = format!("{}\n[debug]", intel.content);
        }

        let seq = self.seq.fetch_add(1, Ordering::AcqRel) + 1;
        intel.seq = seq;

        let raw = match serde_json::to_string(&intel) {
            Ok(raw) => raw,
            Err(e) => {
                error!("intel serialize failed: {}", e);
                return;
            }
        };
        info!("processing intel: {}", raw);

        if !intel.ding_type.is_empty() {
            if intel.level == 0 {
                // debug intel goes to the admin only
                let admin = vec![self.admin_mob.clone()];
                match intel.ding_type.as_str() {
                    DING_TYPE_LINK => {
                        self.ding.send_link_to_mobiles(
                            &intel.url,
                            PIC_ID,
                            &intel.title,
                            &intel.content,
                            &admin,
                        );
                    }
                    DING_TYPE_TEXT => {
                        self.ding.send_text_to_mobiles(
                            &format!("{}\n{}", intel.title, intel.content),
                            &admin,
                        );
                    }
                    other => error!("unknown ding_type: {}", other),
                }
            } else {
                let uids = self.filter.matched_users(&intel.main_type, &intel.sub_type);
                match intel.ding_type.as_str() {
                    DING_TYPE_LINK => {
                        self.ding.send_link_to_users(
                            &intel.url,
                            PIC_ID,
                            &intel.title,
                            &intel.content,
                            &uids,
                        );
                    }
                    DING_TYPE_TEXT => {
                        self.ding.send_text_to_users(
                            &format!("{}\n{}", intel.title, intel.content),
                            &uids,
                        );
                    }
                    other => error!("unknown ding_type: {}", other),
                }
            }
        }

        // backlog for intel speaker clients, trimmed to the newest entries
        match self.kv.rpush(KV_INTEL_LIST, &raw).await {
            Ok(_) => {
                if let Err(e) = self
                    .kv
                    .hset(KV_INTEL_STATUS, KV_INTEL_LATEST_SEQ, &seq.to_string())
                    .await
                {
                    error!("latest_seq update failed: {}", e);
                }
                if let Err(e) = self.kv.ltrim(KV_INTEL_LIST, -INTEL_KEEP, -1).await {
                    error!("intel list trim failed: {}", e);
                }
            }
            Err(e) => error!("intel list push failed: {}", e),
        }
    }

    /// POST /dingbots/message_assist — subscription commands over chat
    pub async fn handle_ding_msg(&self, headers: &HeaderMap, body: &[u8]) -> String {
        let msg = match dingbot::parse_ding_message(headers, body, &self.bot_secret) {
            Ok(msg) => msg,
            Err(e) => return e.to_string(),
        };
        info!(
            "recv msg from {}({}), content={}",
            msg.sender_nick, msg.sender_user_id, msg.text.content
        );

        if msg.conversation_type == dingbot::CONVERSATION_SINGLE {
            let cmd = format!(
                "{} {} {}",
                msg.text.content.trim(),
                msg.sender_user_id,
                msg.sender_nick
            );
            let resp = self.handle_command(&cmd).await;
            dingbot::reply_text(&msg.webhook, &resp);
        } else {
            dingbot::reply_text(&msg.webhook, "please use direct messages");
        }
        "acknowledged".to_string()
    }
}
