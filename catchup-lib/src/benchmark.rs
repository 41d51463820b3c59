use std::time::{Duration, Instant};

use tracing::info;

/// Collects performance samples while a catch-up run is active.
///
/// Fetch samples are taken at the collector's blocking read, so they measure
/// how long the collector waited on a worker (idle wait included), not pure
/// network latency.
pub(crate) struct Benchmarker {
    started_at: Instant,
    fetch_count: u64,
    fetch_total: Duration,
    fetch_max: Duration,
    persist_count: u64,
    persist_total: Duration,
    persisted_epochs: u64,
    persisted_total_rows: u64,
    persisted_insert_rows: u64,
}

impl Benchmarker {
    pub(crate) fn new() -> Self {
        Self {
            started_at: Instant::now(),
            fetch_count: 0,
            fetch_total: Duration::ZERO,
            fetch_max: Duration::ZERO,
            persist_count: 0,
            persist_total: Duration::ZERO,
            persisted_epochs: 0,
            persisted_total_rows: 0,
            persisted_insert_rows: 0,
        }
    }

    pub(crate) fn mark_start(&mut self) {
        self.started_at = Instant::now();
    }

    pub(crate) fn record_fetch(&mut self, waited: Duration) {
        self.fetch_count += 1;
        self.fetch_total += waited;
        self.fetch_max = self.fetch_max.max(waited);
    }

    pub(crate) fn record_persist(
        &mut self,
        elapsed: Duration,
        num_epochs: usize,
        total_db_rows: usize,
        insert_db_rows: usize,
    ) {
        self.persist_count += 1;
        self.persist_total += elapsed;
        self.persisted_epochs += num_epochs as u64;
        self.persisted_total_rows += total_db_rows as u64;
        self.persisted_insert_rows += insert_db_rows as u64;
    }

    pub(crate) fn report(&self, epoch_from: u64, epoch_to: u64) {
        let elapsed = self.started_at.elapsed();

        let epochs_per_sec = if elapsed > Duration::ZERO {
            self.persisted_epochs as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };
        let avg_fetch_ms = if self.fetch_count > 0 {
            self.fetch_total.as_secs_f64() * 1e3 / self.fetch_count as f64
        } else {
            0.0
        };
        let avg_persist_ms = if self.persist_count > 0 {
            self.persist_total.as_secs_f64() * 1e3 / self.persist_count as f64
        } else {
            0.0
        };

        info!(
            epoch_from,
            epoch_to,
            num_epochs = self.persisted_epochs,
            elapsed_secs = elapsed.as_secs_f64(),
            epochs_per_sec,
            num_flushes = self.persist_count,
            avg_fetch_ms,
            max_fetch_ms = self.fetch_max.as_secs_f64() * 1e3,
            avg_persist_ms,
            total_db_rows = self.persisted_total_rows,
            insert_db_rows = self.persisted_insert_rows,
            "Catch-up benchmark summary"
        );
    }
}
