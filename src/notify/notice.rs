//! Notice definition, shared with producers. Producers POST the wire
//! fields; the hub assigns the internal id and tracks resends.

use chrono::{Local, TimeZone};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Rendered content is cut at this many characters
pub const CONTENT_MAX_LENGTH: usize = 512;

static NEXT_ID: AtomicU64 = AtomicU64::new(0);

pub fn next_notice_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::AcqRel)
}

/// Notice level. Levels differ in delivery policy, not in payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "i32", into = "i32")]
pub enum NoticeLevel {
    /// Held back between 00:00 and 09:00 local, otherwise sent directly
    Normal,
    /// Sent any time, 3 min cooldown once the error-lock is set
    Error,
    /// Repeats every minute until the error-lock is cleared by an operator
    Fatal,
}

impl From<i32> for NoticeLevel {
    fn from(v: i32) -> Self {
        match v {
            1 => NoticeLevel::Error,
            2 => NoticeLevel::Fatal,
            _ => NoticeLevel::Normal,
        }
    }
}

impl From<NoticeLevel> for i32 {
    fn from(v: NoticeLevel) -> i32 {
        match v {
            NoticeLevel::Normal => 0,
            NoticeLevel::Error => 1,
            NoticeLevel::Fatal => 2,
        }
    }
}

impl Default for NoticeLevel {
    fn default() -> Self {
        NoticeLevel::Normal
    }
}

impl NoticeLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            NoticeLevel::Normal => "Normal",
            NoticeLevel::Error => "Error",
            NoticeLevel::Fatal => "Fatal",
        }
    }
}

/// One notification instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notice {
    #[serde(default)]
    pub level: NoticeLevel,
    /// Producer-side timestamp, milliseconds
    #[serde(rename = "local_ts", default)]
    pub local_ts: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub content: String,
    #[serde(skip)]
    pub extra_lines: Vec<String>,
    #[serde(skip)]
    pub id: u64,
    #[serde(skip)]
    pub resend: u32,
}

impl Notice {
    pub fn new(level: NoticeLevel, name: &str, content: String, local_ts: i64) -> Self {
        Self {
            level,
            local_ts,
            name: name.to_string(),
            content,
            extra_lines: Vec::new(),
            id: next_notice_id(),
            resend: 0,
        }
    }

    /// Text form. `content_max = 0` disables truncation (disk record keeps
    /// the full body, chat delivery is capped).
    pub fn render(&self, content_max: usize) -> String {
        let tm = Local
            .timestamp_millis_opt(self.local_ts)
            .single()
            .unwrap_or_else(|| Local.timestamp_millis_opt(0).single().unwrap());
        let mut out = String::new();
        out.push_str(&format!("[通知时间]: {}\n", tm.format("%Y-%m-%d %H:%M:%S")));
        out.push_str(&format!("[通知来源]: {} (id={})\n", self.name, self.id));
        let resend = if self.resend > 0 {
            format!("(第{}次重发)", self.resend)
        } else {
            String::new()
        };
        out.push_str(&format!("[通知等级]: {}{}\n", self.level.as_str(), resend));
        if content_max == 0 || self.content.chars().count() <= content_max {
            out.push_str(&format!("[通知内容]:\n {}\n", self.content));
        } else {
            let cut: String = self.content.chars().take(content_max).collect();
            out.push_str(&format!("[通知内容]:\n {}...\n", cut));
        }
        for line in &self.extra_lines {
            out.push_str(line);
            out.push('\n');
        }
        out
    }

    pub fn log_prefix(&self) -> String {
        format!("ntf(name={}, id={})", self.name, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;

    #[test]
    fn test_level_wire_values() {
        let n: Notice = serde_json::from_str(
            r#"{"level":2,"local_ts":1700000000000,"name":"s1","content":"boom"}"#,
        )
        .unwrap();
        assert_eq!(n.level, NoticeLevel::Fatal);
        assert_eq!(n.local_ts, 1700000000000);
        let back = serde_json::to_value(&n).unwrap();
        assert_eq!(back["level"], 2);
    }

    #[test]
    fn test_render_contains_fields() {
        let mut n = Notice::new(NoticeLevel::Error, "alpha", "it broke".to_string(), 1700000000000);
        n.extra_lines.push("extra".to_string());
        let text = n.render(CONTENT_MAX_LENGTH);
        assert!(text.contains("[通知来源]: alpha"));
        assert!(text.contains("Error"));
        assert!(text.contains("it broke"));
        assert!(text.contains("extra"));
        assert!(!text.contains("重发"));

        n.resend = 3;
        assert!(n.render(CONTENT_MAX_LENGTH).contains("(第3次重发)"));
    }

    #[test]
    fn test_render_truncation() {
        let n = Notice::new(NoticeLevel::Normal, "a", "x".repeat(600), 0);
        let text = n.render(CONTENT_MAX_LENGTH);
        assert!(text.contains(&format!("{}...", "x".repeat(CONTENT_MAX_LENGTH))));
        let full = n.render(0);
        assert!(full.contains(&"x".repeat(600)));
    }

    #[test]
    fn test_render_timestamp_round_trip() {
        // whole-second timestamps survive the render/parse cycle
        let ts = 1700000000000i64;
        let n = Notice::new(NoticeLevel::Normal, "a", "b".to_string(), ts);
        let text = n.render(0);
        let line = text.lines().next().unwrap();
        let rendered = line.trim_start_matches("[通知时间]: ");
        let parsed = NaiveDateTime::parse_from_str(rendered, "%Y-%m-%d %H:%M:%S").unwrap();
        let back = parsed
            .and_local_timezone(Local)
            .single()
            .unwrap()
            .timestamp_millis();
        assert_eq!(back, ts);
    }

    #[test]
    fn test_ids_are_unique() {
        let a = Notice::new(NoticeLevel::Normal, "a", String::new(), 0);
        let b = Notice::new(NoticeLevel::Normal, "a", String::new(), 0);
        assert_ne!(a.id, b.id);
    }
}
