//! Connection Pool Statistics

use crate::backends::DatabasePoolStats;
use std::time::Instant;

/// Pool statistics plus the manager's own acquisition counters
#[derive(Debug, Clone)]
pub struct ExtendedPoolStats {
    pub pool_stats: DatabasePoolStats,
    pub acquire_count: u64,
    pub acquire_errors: u64,
    pub created_at: Instant,
}

impl ExtendedPoolStats {
    /// Calculate the error rate as a percentage
    pub fn error_rate(&self) -> f64 {
        if self.acquire_count > 0 {
            (self.acquire_errors as f64 / self.acquire_count as f64) * 100.0
        } else {
            0.0
        }
    }

    pub fn uptime(&self) -> std::time::Duration {
        self.created_at.elapsed()
    }

    /// Get pool utilization as a percentage (active / total)
    pub fn utilization(&self) -> f64 {
        if self.pool_stats.total_connections > 0 {
            (self.pool_stats.active_connections as f64 / self.pool_stats.total_connections as f64) * 100.0
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(total: u32, idle: u32, acquires: u64, errors: u64) -> ExtendedPoolStats {
        ExtendedPoolStats {
            pool_stats: DatabasePoolStats {
                total_connections: total,
                idle_connections: idle,
                active_connections: total - idle,
            },
            acquire_count: acquires,
            acquire_errors: errors,
            created_at: Instant::now(),
        }
    }

    #[test]
    fn test_error_rate() {
        assert_eq!(stats(1, 1, 0, 0).error_rate(), 0.0);
        assert_eq!(stats(1, 1, 4, 1).error_rate(), 25.0);
    }

    #[test]
    fn test_utilization() {
        assert_eq!(stats(0, 0, 0, 0).utilization(), 0.0);
        assert_eq!(stats(4, 1, 0, 0).utilization(), 75.0);
    }
}
