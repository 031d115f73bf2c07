use std::time::{Duration, Instant};

use strum::Display;

use crate::config::SweepConfig;
use crate::store::NoteStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum SweepTrigger {
    Startup,
    Interval,
    Foreground,
    Manual,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub trigger: SweepTrigger,
    pub removed: usize,
    /// Set when the removal could not be persisted; the store stays dirty.
    pub error: Option<String>,
}

#[derive(Debug)]
pub struct ExpirationSweeper {
    interval: Duration,
    last_run: Option<Instant>,
    active: bool,
    last_error: Option<String>,
}

impl ExpirationSweeper {
    pub fn new(config: &SweepConfig) -> Self {
        Self::with_interval(Duration::from_secs(config.interval_secs))
    }

    pub fn with_interval(interval: Duration) -> Self {
        Self {
            interval,
            last_run: None,
            active: true,
            last_error: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Removes every note expired at `now` and persists the result. Errors
    /// are logged and recorded, never returned.
    pub fn sweep(&mut self, store: &mut NoteStore, now: i64, trigger: SweepTrigger) -> SweepReport {
        self.last_run = Some(Instant::now());
        let removed = store.sweep(now);
        let mut report = SweepReport {
            trigger,
            removed,
            error: None,
        };
        if removed == 0 {
            tracing::trace!(%trigger, "sweep found nothing expired");
            return report;
        }
        match store.flush() {
            Ok(()) => {
                self.last_error = None;
                tracing::info!(%trigger, removed, "expired notes removed");
            }
            Err(err) => {
                tracing::error!(?err, %trigger, removed, "failed to persist sweep");
                let message = format!("{err:#}");
                self.last_error = Some(message.clone());
                report.error = Some(message);
            }
        }
        report
    }

    /// Sweeps when the interval has elapsed since the last run. Inactive
    /// sweepers never fire.
    pub fn poll(&mut self, store: &mut NoteStore, at: Instant, now: i64) -> Option<SweepReport> {
        if !self.active {
            return None;
        }
        let due = self
            .last_run
            .map(|last| at.saturating_duration_since(last) >= self.interval)
            .unwrap_or(true);
        if !due {
            return None;
        }
        let report = self.sweep(store, now, SweepTrigger::Interval);
        self.last_run = Some(at);
        Some(report)
    }

    pub fn on_foreground(&mut self, store: &mut NoteStore, now: i64) -> SweepReport {
        self.active = true;
        self.sweep(store, now, SweepTrigger::Foreground)
    }

    pub fn on_background(&mut self) {
        self.active = false;
    }
}
