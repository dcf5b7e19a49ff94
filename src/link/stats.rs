//! Traffic statistics for a link
//!
//! Thread-safe counters for throughput and protocol health.
//! Uses lock-free atomics for all operations.

use crate::constants::RATE_UPDATE_MIN_INTERVAL_SECS;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Traffic statistics with rate calculation (fully lock-free)
pub struct Stats {
    /// Total bytes written to the transport
    tx_total: AtomicU64,
    /// Total bytes read from the transport
    rx_total: AtomicU64,
    tx_snapshot: AtomicU64,
    rx_snapshot: AtomicU64,
    /// Reference instant for time calculations
    start_time: Instant,
    /// Nanoseconds since start_time at last rate calculation
    last_calc_nanos: AtomicU64,
    /// Cached rates in KB/s (stored as f64 bits)
    tx_rate: AtomicU64,
    rx_rate: AtomicU64,
    messages_decoded: AtomicU64,
    corrupt_frames: AtomicU64,
    commands_sent: AtomicU64,
    listener_failures: AtomicU64,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StatsSnapshot {
    pub tx_bytes: u64,
    pub rx_bytes: u64,
    pub messages_decoded: u64,
    pub corrupt_frames: u64,
    pub commands_sent: u64,
    pub listener_failures: u64,
}

impl Stats {
    pub fn new() -> Self {
        Self {
            tx_total: AtomicU64::new(0),
            rx_total: AtomicU64::new(0),
            tx_snapshot: AtomicU64::new(0),
            rx_snapshot: AtomicU64::new(0),
            start_time: Instant::now(),
            last_calc_nanos: AtomicU64::new(0),
            tx_rate: AtomicU64::new(0),
            rx_rate: AtomicU64::new(0),
            messages_decoded: AtomicU64::new(0),
            corrupt_frames: AtomicU64::new(0),
            commands_sent: AtomicU64::new(0),
            listener_failures: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn add_tx(&self, bytes: usize) {
        self.tx_total.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_rx(&self, bytes: usize) {
        self.rx_total.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_decoded(&self, count: usize) {
        self.messages_decoded
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_corrupt(&self, count: usize) {
        self.corrupt_frames.fetch_add(count as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_command(&self) {
        self.commands_sent.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_listener_failure(&self) {
        self.listener_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            tx_bytes: self.tx_total.load(Ordering::Relaxed),
            rx_bytes: self.rx_total.load(Ordering::Relaxed),
            messages_decoded: self.messages_decoded.load(Ordering::Relaxed),
            corrupt_frames: self.corrupt_frames.load(Ordering::Relaxed),
            commands_sent: self.commands_sent.load(Ordering::Relaxed),
            listener_failures: self.listener_failures.load(Ordering::Relaxed),
        }
    }

    /// Update rate calculations and return (tx_kb_s, rx_kb_s)
    /// Call this periodically (e.g., every second) from a reporting thread
    pub fn update_rates(&self) -> (f64, f64) {
        let now_nanos = self.start_time.elapsed().as_nanos() as u64;
        let last_nanos = self.last_calc_nanos.load(Ordering::Relaxed);
        let elapsed = now_nanos.saturating_sub(last_nanos) as f64 / 1_000_000_000.0;

        if elapsed < RATE_UPDATE_MIN_INTERVAL_SECS {
            return self.cached_rates();
        }

        // Try to claim the update (avoid duplicate calculations)
        if self
            .last_calc_nanos
            .compare_exchange(last_nanos, now_nanos, Ordering::SeqCst, Ordering::Relaxed)
            .is_err()
        {
            return self.cached_rates();
        }

        let tx_now = self.tx_total.load(Ordering::Relaxed);
        let rx_now = self.rx_total.load(Ordering::Relaxed);
        let tx_prev = self.tx_snapshot.swap(tx_now, Ordering::Relaxed);
        let rx_prev = self.rx_snapshot.swap(rx_now, Ordering::Relaxed);

        let tx_rate = tx_now.saturating_sub(tx_prev) as f64 / elapsed / 1024.0; // KB/s
        let rx_rate = rx_now.saturating_sub(rx_prev) as f64 / elapsed / 1024.0; // KB/s

        self.tx_rate.store(tx_rate.to_bits(), Ordering::Relaxed);
        self.rx_rate.store(rx_rate.to_bits(), Ordering::Relaxed);

        (tx_rate, rx_rate)
    }

    fn cached_rates(&self) -> (f64, f64) {
        let tx = f64::from_bits(self.tx_rate.load(Ordering::Relaxed));
        let rx = f64::from_bits(self.rx_rate.load(Ordering::Relaxed));
        (tx, rx)
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}
