//! Client-side performance metrics
//!
//! Heartbeat round-trip latencies feed a bounded sliding window; min, max,
//! and average are derived from the window contents, never from lifetime
//! extremes, so they recover after a transient spike ages out.

use std::collections::VecDeque;
use std::time::Instant;

/// Number of latency samples retained
pub const LATENCY_WINDOW: usize = 100;

/// Sliding window of heartbeat latencies in milliseconds
pub struct LatencyWindow {
    samples: VecDeque<f64>,
}

/// Point-in-time view of the latency window
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LatencySnapshot {
    pub latest_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub avg_ms: f64,
    pub samples: usize,
}

impl LatencyWindow {
    /// Create an empty window
    pub fn new() -> Self {
        LatencyWindow {
            samples: VecDeque::with_capacity(LATENCY_WINDOW),
        }
    }

    /// Record one round-trip latency, evicting the oldest sample when full
    pub fn record(&mut self, latency_ms: f64) {
        if self.samples.len() == LATENCY_WINDOW {
            self.samples.pop_front();
        }
        self.samples.push_back(latency_ms);
    }

    /// Number of samples currently held
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// True before the first heartbeat completes
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Derive min/max/average over the current window
    pub fn snapshot(&self) -> LatencySnapshot {
        if self.samples.is_empty() {
            return LatencySnapshot::default();
        }
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut sum = 0.0;
        for &s in &self.samples {
            min = min.min(s);
            max = max.max(s);
            sum += s;
        }
        LatencySnapshot {
            latest_ms: *self.samples.back().unwrap_or(&0.0),
            min_ms: min,
            max_ms: max,
            avg_ms: sum / self.samples.len() as f64,
            samples: self.samples.len(),
        }
    }
}

impl Default for LatencyWindow {
    fn default() -> Self {
        Self::new()
    }
}

/// Connection-lifecycle counters
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientStats {
    /// Completed reconnection cycles triggered by connection loss
    pub reconnections: u32,
    /// Failed retry attempts across all reconnection cycles
    pub reconnect_attempts: u32,
}

/// Uptime anchor for the current connection, if any
#[derive(Debug, Clone, Copy)]
pub struct ConnectedSince(pub Instant);
