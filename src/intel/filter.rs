//! Per-user subscription filters, persisted write-through.
//!
//! Every mutation rewrites the snapshot file before the write lock is
//! released, so nothing outside ever observes in-memory state the disk
//! does not already have.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::RwLock;
use tracing::{error, info};

/// Subtype allow/deny lists for one (user, main type)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubtypeFilter {
    /// Empty allow-list admits every subtype
    #[serde(rename = "white_list", default)]
    pub allow: BTreeSet<String>,
    #[serde(rename = "black_list", default)]
    pub deny: BTreeSet<String>,
}

/// One user's subscriptions
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserFilter {
    #[serde(default)]
    pub nick: String,
    #[serde(rename = "types", default)]
    pub channels: BTreeMap<String, SubtypeFilter>,
}

impl UserFilter {
    /// The §3 match rule
    pub fn matches(&self, main_type: &str, sub_type: &str) -> bool {
        match self.channels.get(main_type) {
            None => false,
            Some(f) => {
                if !f.allow.is_empty() && !f.allow.contains(sub_type) {
                    return false;
                }
                !f.deny.contains(sub_type)
            }
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct FilterData {
    #[serde(rename = "user_filter", default)]
    users: BTreeMap<String, UserFilter>,
}

/// Subscription store with write-through persistence
pub struct FilterStore {
    path: PathBuf,
    inner: RwLock<FilterData>,
}

impl FilterStore {
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let data = match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(data) => {
                    info!("load {} ok", path.display());
                    data
                }
                Err(e) => {
                    error!("parse {} failed: {}", path.display(), e);
                    FilterData::default()
                }
            },
            Err(_) => {
                info!("no {} yet, starting empty", path.display());
                FilterData::default()
            }
        };
        Self {
            path,
            inner: RwLock::new(data),
        }
    }

    fn save(&self, data: &FilterData) {
        match serde_json::to_vec_pretty(data) {
            Ok(bytes) => {
                if let Err(e) = std::fs::write(&self.path, bytes) {
                    error!("save {} failed: {}", self.path.display(), e);
                }
            }
            Err(e) => error!("serialize {} failed: {}", self.path.display(), e),
        }
    }

    fn mutate<F: FnOnce(&mut FilterData)>(&self, f: F) {
        let mut data = self.inner.write().unwrap();
        f(&mut data);
        // flushed before the lock drops
        self.save(&data);
    }

    /// User ids whose filters admit this (main, sub)
    pub fn matched_users(&self, main_type: &str, sub_type: &str) -> Vec<String> {
        let data = self.inner.read().unwrap();
        data.users
            .iter()
            .filter(|(_, f)| f.matches(main_type, sub_type))
            .map(|(uid, _)| uid.clone())
            .collect()
    }

    pub fn user_filter(&self, uid: &str) -> Option<UserFilter> {
        self.inner.read().unwrap().users.get(uid).cloned()
    }

    /// Human-readable summary for the `my` command
    pub fn user_summary(&self, uid: &str) -> String {
        match self.user_filter(uid) {
            None => "nothing".to_string(),
            Some(f) => {
                let mut out = String::new();
                out.push_str(&format!("nickname: [{}]\n", f.nick));
                out.push_str("subscriptions:\n");
                for (main, sf) in &f.channels {
                    out.push_str(&format!("*[{}]\n", main));
                    if !sf.allow.is_empty() {
                        let items: Vec<&str> = sf.allow.iter().map(String::as_str).collect();
                        out.push_str(&format!("  +{}\n", items.join(",")));
                    }
                    if !sf.deny.is_empty() {
                        let items: Vec<&str> = sf.deny.iter().map(String::as_str).collect();
                        out.push_str(&format!("  -{}\n", items.join(",")));
                    }
                }
                out
            }
        }
    }

    pub fn subscribe(&self, uid: &str, nick: &str, main_type: &str) {
        let main_type = main_type.to_lowercase();
        self.mutate(|data| {
            let user = data.users.entry(uid.to_string()).or_default();
            user.nick = nick.to_string();
            user.channels.entry(main_type).or_default();
        });
    }

    pub fn unsubscribe(&self, uid: &str, nick: &str, main_type: &str) {
        let main_type = main_type.to_lowercase();
        self.mutate(|data| {
            let user = data.users.entry(uid.to_string()).or_default();
            user.nick = nick.to_string();
            user.channels.remove(&main_type);
        });
    }

    pub fn allow_add(&self, uid: &str, main_type: &str, sub_type: &str) {
        let (main_type, sub_type) = (main_type.to_lowercase(), sub_type.to_lowercase());
        self.mutate(|data| {
            let user = data.users.entry(uid.to_string()).or_default();
            user.channels.entry(main_type).or_default().allow.insert(sub_type);
        });
    }

    pub fn allow_remove(&self, uid: &str, main_type: &str, sub_type: &str) {
        let (main_type, sub_type) = (main_type.to_lowercase(), sub_type.to_lowercase());
        self.mutate(|data| {
            let user = data.users.entry(uid.to_string()).or_default();
            user.channels.entry(main_type).or_default().allow.remove(&sub_type);
        });
    }

    pub fn deny_add(&self, uid: &str, main_type: &str, sub_type: &str) {
        let (main_type, sub_type) = (main_type.to_lowercase(), sub_type.to_lowercase());
        self.mutate(|data| {
            let user = data.users.entry(uid.to_string()).or_default();
            user.channels.entry(main_type).or_default().deny.insert(sub_type);
        });
    }

    pub fn deny_remove(&self, uid: &str, main_type: &str, sub_type: &str) {
        let (main_type, sub_type) = (main_type.to_lowercase(), sub_type.to_lowercase());
        self.mutate(|data| {
            let user = data.users.entry(uid.to_string()).or_default();
            user.channels.entry(main_type).or_default().deny.remove(&sub_type);
        });
    }

    /// Reset both lists of one channel to admit-everything
    pub fn clear_channel(&self, uid: &str, main_type: &str) {
        let main_type = main_type.to_lowercase();
        self.mutate(|data| {
            let user = data.users.entry(uid.to_string()).or_default();
            let f = user.channels.entry(main_type).or_default();
            f.allow.clear();
            f.deny.clear();
        });
    }
}
