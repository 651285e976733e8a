use std::sync::Mutex;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Page-level readiness accounting. Every unit registered with `add` reports
/// exactly once, either `complete` or `invalid`.
pub trait ProgressTracker: Send + Sync {
    fn add(&self);
    /// `skip` marks a unit that had nothing to load.
    fn complete(&self, name: &str, skip: bool);
    fn invalid(&self, name: &str);
}

/// Where a loading unit renders its percentage and status line.
pub trait ProgressView: Send + Sync {
    fn set_progress(&self, text: &str);
    fn set_status(&self, text: &str);
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Report {
    Complete { name: String, skipped: bool },
    Invalid { name: String },
}

impl Report {
    pub fn name(&self) -> &str {
        match self {
            Self::Complete { name, .. } | Self::Invalid { name } => name,
        }
    }
}

#[derive(Debug, Default)]
struct Tally {
    registered: usize,
    reports: Vec<Report>,
}

/// [`ProgressTracker`] that records reports and flips a ready signal once every
/// registered unit has reported.
#[derive(Debug)]
pub struct ReadinessTracker {
    tally: Mutex<Tally>,
    ready: watch::Sender<bool>,
}

impl Default for ReadinessTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadinessTracker {
    pub fn new() -> Self {
        let (ready, _) = watch::channel(false);
        Self {
            tally: Mutex::new(Tally::default()),
            ready,
        }
    }

    pub fn registered(&self) -> usize {
        self.lock().registered
    }

    pub fn reports(&self) -> Vec<Report> {
        self.lock().reports.clone()
    }

    pub fn reports_for(&self, name: &str) -> Vec<Report> {
        self.lock()
            .reports
            .iter()
            .filter(|r| r.name() == name)
            .cloned()
            .collect()
    }

    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    /// Resolves once every registered unit has reported.
    pub async fn wait_ready(&self) {
        let mut rx = self.ready.subscribe();
        // The sender lives in self, so the channel cannot close while we wait.
        let _ = rx.wait_for(|ready| *ready).await;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Tally> {
        self.tally.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, report: Report) {
        let mut tally = self.lock();
        tally.reports.push(report);
        let reported = tally.reports.len();
        if reported > tally.registered {
            warn!(reported, registered = tally.registered, "More reports than registered units");
        }
        if reported >= tally.registered && !*self.ready.borrow() {
            info!(units = tally.registered, "All units reported");
            self.ready.send_replace(true);
        }
    }
}

impl ProgressTracker for ReadinessTracker {
    fn add(&self) {
        let mut tally = self.lock();
        tally.registered += 1;
        if tally.reports.len() < tally.registered {
            self.ready.send_replace(false);
        }
    }

    fn complete(&self, name: &str, skip: bool) {
        debug!(name, skip, "Unit complete");
        self.record(Report::Complete {
            name: name.to_string(),
            skipped: skip,
        });
    }

    fn invalid(&self, name: &str) {
        warn!(name, "Unit failed");
        self.record(Report::Invalid {
            name: name.to_string(),
        });
    }
}

/// Progress line for a body fetch: `"NN%"` against a known total, otherwise
/// the amount received so far.
pub fn format_progress(loaded: u64, total: Option<u64>) -> String {
    match total {
        Some(0) => "100%".to_string(),
        Some(total) => {
            let pct = (loaded as f64 / total as f64 * 100.0).round().min(100.0);
            format!("{}%", pct as u64)
        }
        None => format_size(loaded),
    }
}

fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentages_round() {
        assert_eq!(format_progress(500, Some(1000)), "50%");
        assert_eq!(format_progress(1000, Some(1000)), "100%");
        assert_eq!(format_progress(1, Some(3)), "33%");
        assert_eq!(format_progress(2, Some(3)), "67%");
        assert_eq!(format_progress(0, Some(0)), "100%");
    }

    #[test]
    fn unknown_total_shows_size() {
        assert_eq!(format_progress(512, None), "512 B");
        assert_eq!(format_progress(1536, None), "1.5 KB");
        assert_eq!(format_progress(3 * 1024 * 1024, None), "3.0 MB");
    }

    #[tokio::test]
    async fn ready_once_every_unit_reports() {
        let tracker = ReadinessTracker::new();
        tracker.add();
        tracker.add();
        assert!(!tracker.is_ready());

        tracker.complete("video", false);
        assert!(!tracker.is_ready());
        tracker.invalid("libs");
        assert!(tracker.is_ready());
        tracker.wait_ready().await;

        assert_eq!(
            tracker.reports_for("libs"),
            vec![Report::Invalid { name: "libs".into() }]
        );
    }

    #[test]
    fn late_registration_clears_ready() {
        let tracker = ReadinessTracker::new();
        tracker.add();
        tracker.complete("video", true);
        assert!(tracker.is_ready());
        tracker.add();
        assert!(!tracker.is_ready());
        assert_eq!(tracker.registered(), 2);
    }
}
