//! Intel item and menu definitions, shared with producers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Chat delivery kinds carried in `ding_type`
pub const DING_TYPE_TEXT: &str = "txt";
pub const DING_TYPE_LINK: &str = "link";

/// One captured intel item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intel {
    /// Server-assigned monotonic sequence, lets clients spot new items
    #[serde(default)]
    pub seq: u64,
    /// When the intel happened, producer clock
    #[serde(default = "Utc::now")]
    pub time: DateTime<Utc>,
    /// 0 = debug, 1 = production
    #[serde(default)]
    pub level: i32,
    /// Main type, drives subscription matching
    #[serde(rename = "type", default)]
    pub main_type: String,
    /// Optional subtype, drives subscription matching
    #[serde(rename = "subtype", default)]
    pub sub_type: String,
    /// txt/link = deliver to chat as text/link card; empty = store only
    #[serde(rename = "ding_type", default)]
    pub ding_type: String,
    #[serde(default)]
    pub title: String,
    pub content: String,
    /// Optional text-to-speech payload
    #[serde(default)]
    pub tts: String,
    #[serde(default)]
    pub url: String,
}

/// What one producer can emit, POSTed by the producer itself
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntelMenu {
    #[serde(rename = "type")]
    pub main_type: String,
    #[serde(default)]
    pub subtypes: BTreeMap<String, i32>,
    /// Producer cannot enumerate its subtypes up front
    #[serde(rename = "subtype_uncertain", default)]
    pub subtype_uncertain: bool,
    #[serde(rename = "subtype_uncertain_reason", default)]
    pub subtype_uncertain_reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intel_wire_names() {
        let raw = r#"{"level":1,"type":"listing","subtype":"okx","ding_type":"txt","title":"t","content":"c"}"#;
        let intel: Intel = serde_json::from_str(raw).unwrap();
        assert_eq!(intel.main_type, "listing");
        assert_eq!(intel.sub_type, "okx");
        assert_eq!(intel.ding_type, DING_TYPE_TEXT);

        let v = serde_json::to_value(&intel).unwrap();
        assert_eq!(v["type"], "listing");
        assert_eq!(v["subtype"], "okx");
        assert_eq!(v["seq"], 0);
    }

    #[test]
    fn test_menu_wire_names() {
        let raw = r#"{"type":"listing","subtypes":{"okx":0,"binance":0},"subtype_uncertain":false}"#;
        let menu: IntelMenu = serde_json::from_str(raw).unwrap();
        assert_eq!(menu.main_type, "listing");
        assert_eq!(menu.subtypes.len(), 2);
        assert!(!menu.subtype_uncertain);
    }
}
