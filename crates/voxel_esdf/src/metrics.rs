//! Pass timing and work counters for the ESDF server.
//!
//! The server records every finished pass; callers read a snapshot through
//! `EsdfServer::metrics()`.
//!
//! ```ignore
//! let metrics = server.metrics();
//! println!(
//!   "incremental avg {:.1}us over {} passes",
//!   metrics.incremental_timings.average(),
//!   metrics.incremental_passes
//! );
//! ```

use std::collections::VecDeque;

use crate::server::{PassKind, UpdateReport};

/// Fixed-capacity window of recent samples, oldest evicted first.
#[derive(Debug, Clone)]
pub struct RollingWindow<T> {
  buffer: VecDeque<T>,
  capacity: usize,
}

impl<T> RollingWindow<T> {
  pub fn new(capacity: usize) -> Self {
    Self {
      buffer: VecDeque::with_capacity(capacity),
      capacity,
    }
  }

  pub fn push(&mut self, value: T) {
    if self.capacity == 0 {
      return;
    }
    if self.buffer.len() >= self.capacity {
      self.buffer.pop_front();
    }
    self.buffer.push_back(value);
  }

  pub fn len(&self) -> usize {
    self.buffer.len()
  }

  pub fn is_empty(&self) -> bool {
    self.buffer.is_empty()
  }

  pub fn clear(&mut self) {
    self.buffer.clear();
  }

  /// Oldest to newest.
  pub fn iter(&self) -> impl Iterator<Item = &T> {
    self.buffer.iter()
  }

  pub fn last(&self) -> Option<&T> {
    self.buffer.back()
  }
}

impl RollingWindow<u64> {
  pub fn average(&self) -> f64 {
    if self.buffer.is_empty() {
      0.0
    } else {
      self.buffer.iter().sum::<u64>() as f64 / self.buffer.len() as f64
    }
  }

  pub fn max(&self) -> Option<u64> {
    self.buffer.iter().copied().max()
  }
}

impl Default for RollingWindow<u64> {
  fn default() -> Self {
    Self::new(64)
  }
}

/// Cumulative pass statistics since construction or the last `clear()`.
#[derive(Debug, Clone, Default)]
pub struct PassMetrics {
  /// Recent incremental pass durations in microseconds.
  pub incremental_timings: RollingWindow<u64>,
  /// Recent batch pass durations in microseconds.
  pub batch_timings: RollingWindow<u64>,

  pub incremental_passes: u64,
  pub batch_passes: u64,
  pub propagation_calls: u64,
  pub seeds: u64,
  pub failed_groups: u64,
}

impl PassMetrics {
  pub fn new() -> Self {
    Self::default()
  }

  /// Fold a finished pass into the totals.
  pub fn record(&mut self, report: &UpdateReport) {
    match report.kind {
      PassKind::Incremental => {
        self.incremental_passes += 1;
        self.incremental_timings.push(report.elapsed_us);
      }
      PassKind::Batch => {
        self.batch_passes += 1;
        self.batch_timings.push(report.elapsed_us);
      }
    }
    self.propagation_calls += report.propagation_calls as u64;
    self.seeds += report.seeds as u64;
    self.failed_groups += report.failed_groups as u64;
  }

  pub fn reset(&mut self) {
    *self = Self::default();
  }
}

#[cfg(test)]
#[path = "metrics_test.rs"]
mod metrics_test;
