//! Point-in-time pool statistics.

use serde::Serialize;

/// Snapshot of pool bookkeeping taken under the pool lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    /// Members plus creations in flight.
    pub size: usize,
    pub idle: usize,
    pub borrowed: usize,
    /// Slots reserved for connections being created.
    pub pending: usize,
    /// Queued acquire calls.
    pub waiting: usize,
    pub min_size: usize,
    pub max_size: usize,
    pub closed: bool,
}

impl PoolStatus {
    /// Borrowed share of the current population (0.0 to 1.0).
    pub fn utilization(&self) -> f64 {
        if self.size == 0 {
            0.0
        } else {
            self.borrowed as f64 / self.size as f64
        }
    }

    /// True when no connection can be handed out without waiting.
    pub fn is_full(&self) -> bool {
        self.idle == 0 && self.size >= self.max_size
    }

    /// The bound every observation must satisfy.
    pub fn holds_invariant(&self) -> bool {
        self.borrowed <= self.size && self.size <= self.max_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(idle: usize, borrowed: usize, pending: usize) -> PoolStatus {
        PoolStatus {
            size: idle + borrowed + pending,
            idle,
            borrowed,
            pending,
            waiting: 0,
            min_size: 0,
            max_size: 4,
            closed: false,
        }
    }

    #[test]
    fn utilization_of_empty_pool_is_zero() {
        assert_eq!(status(0, 0, 0).utilization(), 0.0);
    }

    #[test]
    fn full_when_at_max_without_idle() {
        assert!(status(0, 4, 0).is_full());
        assert!(!status(1, 3, 0).is_full());
        assert!(!status(0, 2, 0).is_full());
    }
}
