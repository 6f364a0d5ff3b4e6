use std::fmt::Write as _;
use std::time::Instant;

use crate::error::Result;
use crate::lifecycle::SignalPublisher;
use crate::store::Database;

/// Plain-text Prometheus counters for the scrape endpoint.
pub struct RuntimeMetrics {
    started: Instant,
}

impl Default for RuntimeMetrics {
    fn default() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl RuntimeMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    pub fn render(&self, db: &Database, publisher: &SignalPublisher) -> Result<String> {
        let (total, completed, failed) = db.run_counts()?;
        let mut out = String::new();
        let _ = writeln!(out, "# TYPE verdict_uptime_seconds counter");
        let _ = writeln!(out, "verdict_uptime_seconds {}", self.uptime_seconds());
        let _ = writeln!(out, "# TYPE verdict_orchestration_runs_total counter");
        let _ = writeln!(out, "verdict_orchestration_runs_total {total}");
        let _ = writeln!(out, "# TYPE verdict_orchestration_runs_completed counter");
        let _ = writeln!(out, "verdict_orchestration_runs_completed {completed}");
        let _ = writeln!(out, "# TYPE verdict_orchestration_runs_failed counter");
        let _ = writeln!(out, "verdict_orchestration_runs_failed {failed}");
        let _ = writeln!(out, "# TYPE verdict_signals_published_total counter");
        let _ = writeln!(
            out,
            "verdict_signals_published_total {}",
            publisher.published_count()
        );
        let _ = writeln!(out, "# TYPE verdict_signals_dropped_total counter");
        let _ = writeln!(
            out,
            "verdict_signals_dropped_total {}",
            publisher.dropped_count()
        );
        Ok(out)
    }
}
