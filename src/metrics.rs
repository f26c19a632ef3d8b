//! Process-wide counters and their Prometheus text exposition.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use crate::pipeline::{RunOutcome, OUTCOME_KINDS};

/// Upper bounds (ms) of the run latency histogram buckets.
const LATENCY_BUCKETS_MS: [u64; 12] = [5, 10, 25, 50, 100, 250, 500, 1000, 2000, 5000, 10000, 30000];

pub struct Metrics {
    events_total: AtomicU64,
    retries_ignored_total: AtomicU64,
    outcomes: [AtomicU64; OUTCOME_KINDS],
    issue_lookups_total: AtomicU64,
    issue_lookup_failures_total: AtomicU64,
    replies_total: AtomicU64,
    reply_failures_total: AtomicU64,
    run_log_write_errors_total: AtomicU64,
    latency_counts: [AtomicU64; LATENCY_BUCKETS_MS.len()],
    latency_sum_ms: AtomicU64,
    latency_count: AtomicU64,
    start_epoch_secs: f64,
    started: Instant,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let start_epoch_secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();
        Self {
            events_total: AtomicU64::new(0),
            retries_ignored_total: AtomicU64::new(0),
            outcomes: Default::default(),
            issue_lookups_total: AtomicU64::new(0),
            issue_lookup_failures_total: AtomicU64::new(0),
            replies_total: AtomicU64::new(0),
            reply_failures_total: AtomicU64::new(0),
            run_log_write_errors_total: AtomicU64::new(0),
            latency_counts: Default::default(),
            latency_sum_ms: AtomicU64::new(0),
            latency_count: AtomicU64::new(0),
            start_epoch_secs,
            started: Instant::now(),
        }
    }

    pub fn record_event(&self) {
        self.events_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry_ignored(&self) {
        self.retries_ignored_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_run_log_error(&self) {
        self.run_log_write_errors_total
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_outcome(&self, outcome: &RunOutcome, latency_ms: u64) {
        self.outcomes[outcome.index()].fetch_add(1, Ordering::Relaxed);
        match outcome {
            RunOutcome::SpamGuarded { delivered, .. } => {
                if *delivered {
                    self.replies_total.fetch_add(1, Ordering::Relaxed);
                } else {
                    self.reply_failures_total.fetch_add(1, Ordering::Relaxed);
                }
            }
            RunOutcome::Replied(summary) => {
                let lookups = (summary.resolved + summary.lookup_failures) as u64;
                self.issue_lookups_total.fetch_add(lookups, Ordering::Relaxed);
                self.issue_lookup_failures_total
                    .fetch_add(summary.lookup_failures as u64, Ordering::Relaxed);
                self.replies_total
                    .fetch_add(summary.delivered as u64, Ordering::Relaxed);
                self.reply_failures_total
                    .fetch_add(summary.reply_failures as u64, Ordering::Relaxed);
            }
            _ => {}
        }

        self.latency_sum_ms.fetch_add(latency_ms, Ordering::Relaxed);
        self.latency_count.fetch_add(1, Ordering::Relaxed);
        if let Some(idx) = LATENCY_BUCKETS_MS.iter().position(|ub| latency_ms <= *ub) {
            self.latency_counts[idx].fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn outcome_count(&self, label: &str) -> u64 {
        RunOutcome::LABELS
            .iter()
            .position(|l| *l == label)
            .map(|idx| self.outcomes[idx].load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn replies_total(&self) -> u64 {
        self.replies_total.load(Ordering::Relaxed)
    }

    pub fn runs_completed(&self) -> u64 {
        self.latency_count.load(Ordering::Relaxed)
    }

    /// Prometheus text format (version 0.0.4).
    pub fn render(&self) -> String {
        let mut buf = String::new();
        counter(
            &mut buf,
            "issuelink_events_total",
            "Webhook deliveries received",
            self.events_total.load(Ordering::Relaxed),
        );
        counter(
            &mut buf,
            "issuelink_retries_ignored_total",
            "Platform retry deliveries acknowledged without processing",
            self.retries_ignored_total.load(Ordering::Relaxed),
        );

        writeln!(
            buf,
            "# HELP issuelink_outcomes_total Pipeline runs by terminal outcome\n# TYPE issuelink_outcomes_total counter"
        )
        .ok();
        for (label, count) in RunOutcome::LABELS.iter().zip(self.outcomes.iter()) {
            writeln!(
                buf,
                "issuelink_outcomes_total{{outcome=\"{}\"}} {}",
                label,
                count.load(Ordering::Relaxed)
            )
            .ok();
        }

        counter(
            &mut buf,
            "issuelink_issue_lookups_total",
            "Issue lookups issued to the tracker",
            self.issue_lookups_total.load(Ordering::Relaxed),
        );
        counter(
            &mut buf,
            "issuelink_issue_lookup_failures_total",
            "Issue lookups that failed",
            self.issue_lookup_failures_total.load(Ordering::Relaxed),
        );
        counter(
            &mut buf,
            "issuelink_replies_total",
            "Chat messages posted",
            self.replies_total.load(Ordering::Relaxed),
        );
        counter(
            &mut buf,
            "issuelink_reply_failures_total",
            "Chat messages that could not be posted",
            self.reply_failures_total.load(Ordering::Relaxed),
        );
        counter(
            &mut buf,
            "issuelink_run_log_write_errors_total",
            "Run log lines that could not be written",
            self.run_log_write_errors_total.load(Ordering::Relaxed),
        );

        writeln!(
            buf,
            "# HELP issuelink_run_latency_ms Pipeline run latency histogram milliseconds\n# TYPE issuelink_run_latency_ms histogram"
        )
        .ok();
        let mut cumulative = 0u64;
        for (ub, count) in LATENCY_BUCKETS_MS.iter().zip(self.latency_counts.iter()) {
            cumulative += count.load(Ordering::Relaxed);
            writeln!(
                buf,
                "issuelink_run_latency_ms_bucket{{le=\"{}\"}} {}",
                ub, cumulative
            )
            .ok();
        }
        let total = self.latency_count.load(Ordering::Relaxed);
        writeln!(buf, "issuelink_run_latency_ms_bucket{{le=\"+Inf\"}} {}", total).ok();
        writeln!(
            buf,
            "issuelink_run_latency_ms_sum {}",
            self.latency_sum_ms.load(Ordering::Relaxed)
        )
        .ok();
        writeln!(buf, "issuelink_run_latency_ms_count {}", total).ok();

        writeln!(
            buf,
            "# HELP issuelink_build_info Build information\n# TYPE issuelink_build_info gauge"
        )
        .ok();
        writeln!(
            buf,
            "issuelink_build_info{{version=\"{}\"}} 1",
            env!("CARGO_PKG_VERSION")
        )
        .ok();
        writeln!(
            buf,
            "# HELP issuelink_process_start_time_seconds Process start time (Unix epoch seconds)\n# TYPE issuelink_process_start_time_seconds gauge"
        )
        .ok();
        writeln!(
            buf,
            "issuelink_process_start_time_seconds {}",
            self.start_epoch_secs
        )
        .ok();
        writeln!(
            buf,
            "# HELP issuelink_process_uptime_seconds Process uptime seconds\n# TYPE issuelink_process_uptime_seconds gauge"
        )
        .ok();
        writeln!(
            buf,
            "issuelink_process_uptime_seconds {}",
            self.started.elapsed().as_secs_f64()
        )
        .ok();
        buf
    }
}

fn counter(buf: &mut String, name: &str, help: &str, value: u64) {
    writeln!(buf, "# HELP {} {}", name, help).ok();
    writeln!(buf, "# TYPE {} counter", name).ok();
    writeln!(buf, "{} {}", name, value).ok();
}
