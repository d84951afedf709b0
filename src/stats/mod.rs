use crate::core::Disposition;
use chrono::{DateTime, Utc};
use log::info;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatsSnapshot {
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub messages_received: usize,
    pub acked: usize,
    pub requeued: usize,
    pub discarded: usize,
    pub pages_fetched: usize,
    pub bytes_downloaded: usize,
    pub items_committed: usize,
    pub duplicate_deliveries: usize,
    pub failures: HashMap<String, usize>,
    pub average_fetch_time: f64, // in milliseconds
}

#[derive(Debug, Clone)]
pub struct WorkerStats {
    stats: Arc<RwLock<WorkerStatsSnapshot>>,
}

impl WorkerStats {
    pub fn new() -> Self {
        Self {
            stats: Arc::new(RwLock::new(WorkerStatsSnapshot {
                start_time: Utc::now(),
                end_time: None,
                messages_received: 0,
                acked: 0,
                requeued: 0,
                discarded: 0,
                pages_fetched: 0,
                bytes_downloaded: 0,
                items_committed: 0,
                duplicate_deliveries: 0,
                failures: HashMap::new(),
                average_fetch_time: 0.0,
            })),
        }
    }

    pub fn record_received(&self) {
        self.stats.write().messages_received += 1;
    }

    pub fn record_disposition(&self, disposition: Disposition) {
        let mut stats = self.stats.write();
        match disposition {
            Disposition::Ack => stats.acked += 1,
            Disposition::Requeue => stats.requeued += 1,
            Disposition::Discard => stats.discarded += 1,
        }
    }

    pub fn record_fetch(&self, size: usize, duration: Duration) {
        let mut stats = self.stats.write();
        stats.pages_fetched += 1;
        stats.bytes_downloaded += size;

        let current_total = stats.average_fetch_time * (stats.pages_fetched - 1) as f64;
        let new_duration = duration.as_secs_f64() * 1000.0;
        stats.average_fetch_time = (current_total + new_duration) / stats.pages_fetched as f64;
    }

    pub fn record_commit(&self) {
        self.stats.write().items_committed += 1;
    }

    pub fn record_duplicate(&self) {
        self.stats.write().duplicate_deliveries += 1;
    }

    pub fn record_failure(&self, kind: &str) {
        *self
            .stats
            .write()
            .failures
            .entry(kind.to_string())
            .or_insert(0) += 1;
    }

    pub fn finish(&self) {
        self.stats.write().end_time = Some(Utc::now());
    }

    pub fn get_stats(&self) -> WorkerStatsSnapshot {
        self.stats.read().clone()
    }

    pub fn log_summary(&self) {
        let stats = self.stats.read();
        let duration = stats
            .end_time
            .unwrap_or_else(Utc::now)
            .signed_duration_since(stats.start_time);

        info!("Worker statistics:");
        info!("  Uptime: {} seconds", duration.num_seconds());
        info!(
            "  Messages: received={} acked={} requeued={} discarded={}",
            stats.messages_received, stats.acked, stats.requeued, stats.discarded
        );
        info!(
            "  Items committed: {} (duplicate deliveries skipped: {})",
            stats.items_committed, stats.duplicate_deliveries
        );
        info!(
            "  Pages fetched: {} ({:.2} MB, average {:.2}ms)",
            stats.pages_fetched,
            stats.bytes_downloaded as f64 / 1_000_000.0,
            stats.average_fetch_time
        );
        for (kind, count) in &stats.failures {
            info!("  Failures [{}]: {}", kind, count);
        }
    }
}

impl Default for WorkerStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_average_fetch_time() {
        let stats = WorkerStats::new();
        stats.record_fetch(100, Duration::from_millis(100));
        stats.record_fetch(300, Duration::from_millis(300));

        let snapshot = stats.get_stats();
        assert_eq!(snapshot.pages_fetched, 2);
        assert_eq!(snapshot.bytes_downloaded, 400);
        assert!((snapshot.average_fetch_time - 200.0).abs() < 0.001);
    }

    #[test]
    fn test_dispositions_and_failures() {
        let stats = WorkerStats::new();
        stats.record_disposition(Disposition::Ack);
        stats.record_disposition(Disposition::Requeue);
        stats.record_disposition(Disposition::Requeue);
        stats.record_disposition(Disposition::Discard);
        stats.record_failure("upstream");
        stats.record_failure("upstream");

        let snapshot = stats.get_stats();
        assert_eq!(snapshot.acked, 1);
        assert_eq!(snapshot.requeued, 2);
        assert_eq!(snapshot.discarded, 1);
        assert_eq!(snapshot.failures.get("upstream"), Some(&2));
    }
}
