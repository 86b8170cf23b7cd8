//! Controller configuration.

use std::time::Duration;

/// Tunables for the watch loop.
///
/// The defaults match interactive use: a one-second drain keeps event
/// latency low, and the minute-scale sweep bounds the cost of rescanning
/// large trees.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// Cadence of the queue drain and the write-stability poll.
    pub drain_interval: Duration,
    /// Cadence of the drift-reconciliation sweep.
    pub sweep_interval: Duration,
    /// Output channel capacity. A slow consumer fills it and blocks the
    /// loop; that backpressure is intended.
    pub event_capacity: usize,
    /// Raw notification buffer between the OS watcher and the loop.
    pub raw_capacity: usize,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            drain_interval: Duration::from_secs(1),
            sweep_interval: Duration::from_secs(60),
            event_capacity: 100,
            raw_capacity: 1024,
        }
    }
}
