//! Connection pool metrics
//!
//! Lock-free counters and gauges updated on the borrow/return hot path,
//! plus a plain snapshot type for reporting.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counter
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Gauge for tracking current values
#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    pub fn set(&self, v: u64) {
        self.value.store(v, Ordering::Relaxed);
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Saturates at zero
    pub fn dec(&self) {
        let _ = self
            .value
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                Some(v.saturating_sub(1))
            });
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Live metrics of one connection pool
#[derive(Debug, Default)]
pub struct PoolMetrics {
    pub connections_created: Counter,
    pub connections_closed: Counter,
    pub borrows: Counter,
    pub borrow_failures: Counter,
    pub validation_failures: Counter,
    pub evictions: Counter,
    pub active: Gauge,
    pub idle: Gauge,
}

impl PoolMetrics {
    pub fn snapshot(&self) -> PoolStats {
        PoolStats {
            connections_created: self.connections_created.get(),
            connections_closed: self.connections_closed.get(),
            borrows: self.borrows.get(),
            borrow_failures: self.borrow_failures.get(),
            validation_failures: self.validation_failures.get(),
            evictions: self.evictions.get(),
            active: self.active.get(),
            idle: self.idle.get(),
        }
    }
}

/// Point-in-time view of [`PoolMetrics`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub connections_created: u64,
    pub connections_closed: u64,
    pub borrows: u64,
    pub borrow_failures: u64,
    pub validation_failures: u64,
    pub evictions: u64,
    pub active: u64,
    pub idle: u64,
}
