//! Per-producer state: the sliding frequency window and the timestamps the
//! level policy gates on.

use chrono::{DateTime, Local};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use super::notice::Notice;

/// Window over which the send frequency is measured
pub const FREQ_WINDOW: Duration = Duration::from_secs(60);
/// Sends per window at which warnings and then blocking kick in
pub const FREQ_MAX: usize = 10;
/// A producer missing heartbeats longer than this is considered offline
pub const ALIVE_WINDOW_SECS: i64 = 60;
/// A producer not seen for this long is deleted
pub const KEEP_WINDOW_SECS: i64 = 3600;

/// Sliding time-window counter. Only delivered notices occupy the window,
/// so the reported frequency never exceeds [`FREQ_MAX`].
#[derive(Debug)]
pub struct FreqWindow {
    window: Duration,
    stamps: VecDeque<Instant>,
}

impl FreqWindow {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            stamps: VecDeque::new(),
        }
    }

    fn prune(&mut self, now: Instant) {
        while let Some(front) = self.stamps.front() {
            if now.duration_since(*front) > self.window {
                self.stamps.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn feed(&mut self) {
        let now = Instant::now();
        self.prune(now);
        self.stamps.push_back(now);
    }

    pub fn freq(&mut self) -> usize {
        self.prune(Instant::now());
        self.stamps.len()
    }
}

/// Outcome of feeding one notice through the frequency gate
#[derive(Debug, PartialEq, Eq)]
pub enum FreqDecision {
    Deliver { freq: usize, warn: Option<String> },
    Block { freq: usize },
}

/// State of one notification producer
pub struct SenderState {
    pub name: String,
    pub spec_mob: String,
    pub freq: FreqWindow,
    pub freq_too_high: bool,
    pub total_count: u64,
    pub blocked_count: u32,
    pub last_error_send: Option<DateTime<Local>>,
    pub last_fatal_send: Option<DateTime<Local>>,
    pub last_alive: DateTime<Local>,
    pub started: bool,
    pub latest_fatal: Option<Notice>,
    pub unread_night: u32,
}

impl SenderState {
    pub fn new(name: &str, spec_mob: &str) -> Self {
        Self {
            name: name.to_string(),
            spec_mob: spec_mob.to_string(),
            freq: FreqWindow::new(FREQ_WINDOW),
            freq_too_high: false,
            total_count: 0,
            blocked_count: 0,
            last_error_send: None,
            last_fatal_send: None,
            last_alive: Local::now(),
            started: false,
            latest_fatal: None,
            unread_night: 0,
        }
    }

    /// Count this notice against the window. The notice that first reaches
    /// the ceiling is still delivered, carrying a warning line; from the
    /// next one on the producer is blocked until it drops below the ceiling.
    pub fn feed_freq(&mut self) -> FreqDecision {
        self.total_count += 1;
        let counted = self.freq.freq() + 1;
        if counted >= FREQ_MAX {
            if self.freq_too_high {
                return FreqDecision::Block { freq: self.freq.freq() };
            }
            self.freq_too_high = true;
            self.freq.feed();
            FreqDecision::Deliver {
                freq: counted,
                warn: Some(format!(
                    "frequency reached {}/min, please slow down",
                    counted
                )),
            }
        } else {
            self.freq_too_high = false;
            self.freq.feed();
            FreqDecision::Deliver {
                freq: counted,
                warn: None,
            }
        }
    }

    /// One block of the /ant/notify/status dump
    pub fn status_string(&mut self, now: DateTime<Local>) -> String {
        let mut out = String::new();
        let spec = if self.spec_mob.is_empty() {
            String::new()
        } else {
            format!("[spec mob:{}]", self.spec_mob)
        };
        out.push_str(&format!("[sender:{}]{}\n", self.name, spec));
        out.push_str(&format!("started: {}\n", self.started));
        out.push_str(&format!(
            "last heartbeat: {}s ago\n",
            (now - self.last_alive).num_seconds()
        ));
        out.push_str(&format!(
            "send freq: {}/{}s (max {})\n",
            self.freq.freq(),
            FREQ_WINDOW.as_secs(),
            FREQ_MAX
        ));
        out.push_str(&format!("total notices: {}\n", self.total_count));
        out.push_str(&format!("recently blocked: {}\n", self.blocked_count));
        let fmt_time = |t: Option<DateTime<Local>>| {
            t.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "-".to_string())
        };
        out.push_str(&format!("last error notice: {}\n", fmt_time(self.last_error_send)));
        out.push_str(&format!("last fatal notice: {}\n", fmt_time(self.last_fatal_send)));
        match &self.latest_fatal {
            None => out.push_str("pending fatal: none\n"),
            Some(f) => out.push_str(&format!("pending fatal:\n{}\n", f.render(128))),
        }
        out
    }
}

/// Hours in [0, 9) local time hold Normal notices back
pub fn is_night_hour(hour: u32) -> bool {
    hour < 9
}
