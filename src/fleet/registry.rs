//! Server-side mirrors of strategy processes.
//!
//! A single map owns every mirror; the ordered views operators index into
//! are derived from the map on demand, always under the same lock as the
//! map itself.

use chrono::{DateTime, Local};
use std::collections::HashMap;
use std::net::SocketAddr;

/// Heartbeats older than this age a mirror out
pub const MIRROR_TTL_SECS: i64 = 10;

/// One strategy process as seen by the hub
#[derive(Debug, Clone)]
pub struct StrategyMirror {
    pub guid: String,
    pub name: String,
    pub class: String,
    pub addr: SocketAddr,
    pub alive_at: DateTime<Local>,
    /// Registration order, drives the stable operator-facing indexing
    pub online_seq: u64,
}

#[derive(Default)]
pub struct Registry {
    mirrors: HashMap<String, StrategyMirror>,
    next_online_seq: u64,
    /// guid of the strategy commands are routed to, when any
    pub connected: Option<String>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or refresh a mirror. The address is taken from the datagram
    /// source on every ping, so a roaming client keeps working.
    pub fn upsert(&mut self, guid: &str, name: &str, class: &str, addr: SocketAddr) -> bool {
        let now = Local::now();
        match self.mirrors.get_mut(guid) {
            Some(m) => {
                m.alive_at = now;
                m.addr = addr;
                false
            }
            None => {
                let seq = self.next_online_seq;
                self.next_online_seq += 1;
                self.mirrors.insert(
                    guid.to_string(),
                    StrategyMirror {
                        guid: guid.to_string(),
                        name: name.to_string(),
                        class: class.to_string(),
                        addr,
                        alive_at: now,
                        online_seq: seq,
                    },
                );
                true
            }
        }
    }

    pub fn remove(&mut self, guid: &str) -> Option<StrategyMirror> {
        let removed = self.mirrors.remove(guid);
        if removed.is_some() && self.connected.as_deref() == Some(guid) {
            self.connected = None;
        }
        removed
    }

    pub fn get(&self, guid: &str) -> Option<&StrategyMirror> {
        self.mirrors.get(guid)
    }

    pub fn len(&self) -> usize {
        self.mirrors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mirrors.is_empty()
    }

    /// Mirrors in registration order
    pub fn ordered(&self) -> Vec<&StrategyMirror> {
        let mut all: Vec<&StrategyMirror> = self.mirrors.values().collect();
        all.sort_by_key(|m| m.online_seq);
        all
    }

    /// Guids whose last heartbeat is older than [`MIRROR_TTL_SECS`]
    pub fn expired(&self, now: DateTime<Local>) -> Vec<String> {
        self.mirrors
            .values()
            .filter(|m| (now - m.alive_at).num_seconds() > MIRROR_TTL_SECS)
            .map(|m| m.guid.clone())
            .collect()
    }

    /// Select the command target by its position in the ordered view
    pub fn connect_by_index(&mut self, index: usize) -> Option<StrategyMirror> {
        let guid = self.ordered().get(index).map(|m| m.guid.clone())?;
        self.connected = Some(guid.clone());
        self.mirrors.get(&guid).cloned()
    }

    pub fn connected_mirror(&self) -> Option<&StrategyMirror> {
        self.connected.as_ref().and_then(|g| self.mirrors.get(g))
    }

    pub fn all(&self) -> impl Iterator<Item = &StrategyMirror> {
        self.mirrors.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{}", port).parse().unwrap()
    }

    #[test]
    fn test_upsert_roaming_updates_address() {
        let mut reg = Registry::new();
        assert!(reg.upsert("g1", "alpha", "maker", addr(1000)));
        assert!(!reg.upsert("g1", "alpha", "maker", addr(2000)));
        assert_eq!(reg.get("g1").unwrap().addr, addr(2000));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_ordered_view_follows_registration() {
        let mut reg = Registry::new();
        reg.upsert("g2", "beta", "taker", addr(1));
        reg.upsert("g1", "alpha", "maker", addr(2));
        reg.upsert("g3", "gamma", "maker", addr(3));
        let names: Vec<&str> = reg.ordered().iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["beta", "alpha", "gamma"]);

        reg.remove("g1");
        let names: Vec<&str> = reg.ordered().iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["beta", "gamma"]);
    }

    #[test]
    fn test_remove_clears_connected() {
        let mut reg = Registry::new();
        reg.upsert("g1", "alpha", "maker", addr(1));
        reg.connect_by_index(0).unwrap();
        assert_eq!(reg.connected.as_deref(), Some("g1"));
        reg.remove("g1");
        assert!(reg.connected.is_none());
    }

    #[test]
    fn test_expired() {
        let mut reg = Registry::new();
        reg.upsert("g1", "alpha", "maker", addr(1));
        assert!(reg.expired(Local::now()).is_empty());
        let later = Local::now() + chrono::Duration::seconds(MIRROR_TTL_SECS + 1);
        assert_eq!(reg.expired(later), vec!["g1".to_string()]);
    }
}
