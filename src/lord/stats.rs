use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};

#[derive(Default)]
struct StatsInner {
    started_at: Option<DateTime<Utc>>,
    initial_work_sent_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    steals: u64,
    steal_wait_ms_total: u64,
    fruitless_attempts_total: u64,
    times_finished: u32,
}

/// Per-job counters kept lord-side and reported once at completion.
/// Cheap enough to update from request handlers; the lock is never held
/// across I/O.
pub struct LordJobStats {
    inner: Mutex<StatsInner>,
}

impl Default for LordJobStats {
    fn default() -> Self {
        Self::new()
    }
}

impl LordJobStats {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(StatsInner::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StatsInner> {
        // a panic while holding this lock only loses counters
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn about_to_start(&self) {
        self.lock().started_at = Some(Utc::now());
    }

    pub fn finished_sending_initial_work(&self) {
        self.lock().initial_work_sent_at = Some(Utc::now());
    }

    /// Records one served steal: how long the asking vassal waited, and how
    /// many candidates were tried without yielding work along the way.
    pub fn report_work_stolen(&self, wait: Duration, fruitless_attempts: u32) {
        let mut inner = self.lock();
        inner.steals += 1;
        inner.steal_wait_ms_total += wait.as_millis() as u64;
        inner.fruitless_attempts_total += fruitless_attempts as u64;
    }

    pub fn finished(&self) {
        let mut inner = self.lock();
        inner.times_finished += 1;
        if inner.finished_at.is_none() {
            inner.finished_at = Some(Utc::now());
        }
    }

    /// How many times `finished` ran. Exactly 1 after a healthy completion.
    pub fn times_finished(&self) -> u32 {
        self.lock().times_finished
    }

    pub fn steals(&self) -> u64 {
        self.lock().steals
    }

    pub fn report_summary(&self) -> String {
        let inner = self.lock();
        let avg_wait = if inner.steals > 0 {
            inner.steal_wait_ms_total / inner.steals
        } else {
            0
        };
        format!(
            "steals={} avg_steal_wait_ms={} fruitless_attempts={} duration={}",
            inner.steals,
            avg_wait,
            inner.fruitless_attempts_total,
            match (inner.started_at, inner.finished_at) {
                (Some(start), Some(end)) => format!("{}ms", (end - start).num_milliseconds()),
                _ => "unknown".to_string(),
            }
        )
    }

    pub fn report(&self) -> String {
        let inner = self.lock();
        let fmt_time = |t: Option<DateTime<Utc>>| {
            t.map(|t| t.to_rfc3339()).unwrap_or_else(|| "-".to_string())
        };
        format!(
            "started: {}\ninitial work sent: {}\nfinished: {}\nsteals served: {}\ntotal steal wait ms: {}\nfruitless steal attempts: {}\n",
            fmt_time(inner.started_at),
            fmt_time(inner.initial_work_sent_at),
            fmt_time(inner.finished_at),
            inner.steals,
            inner.steal_wait_ms_total,
            inner.fruitless_attempts_total,
        )
    }
}
