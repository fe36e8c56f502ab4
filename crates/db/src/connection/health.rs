//! Connection Pool Health Reporting

use crate::backends::SqlDialect;
use serde::Serialize;
use std::time::Duration;

/// Snapshot produced by `ConnectionManager::detailed_health_check`
#[derive(Debug, Clone, Serialize)]
pub struct PoolHealthReport {
    pub dialect: SqlDialect,
    pub check_duration: Duration,
    pub total_check_time: Duration,
    pub pool_size: u32,
    pub max_connections: u32,
    pub idle_connections: u32,
    pub active_connections: u32,
    pub total_acquires: u64,
    pub total_errors: u64,
    pub error_rate: f64,
    pub uptime: Duration,
}

impl PoolHealthReport {
    pub fn is_healthy(&self) -> bool {
        self.is_responsive() && self.has_acceptable_error_rate()
    }

    /// Health query answered within one second
    pub fn is_responsive(&self) -> bool {
        self.check_duration < Duration::from_millis(1000)
    }

    /// Fewer than 5% of acquisitions failed
    pub fn has_acceptable_error_rate(&self) -> bool {
        self.error_rate < 5.0
    }

    /// True when every allowed connection is checked out
    pub fn is_saturated(&self) -> bool {
        self.idle_connections == 0 && self.active_connections >= self.max_connections
    }

    pub fn status_summary(&self) -> String {
        if !self.is_responsive() {
            format!("UNHEALTHY: health query took {:?}", self.check_duration)
        } else if !self.has_acceptable_error_rate() {
            format!("DEGRADED: acquisition error rate {:.1}%", self.error_rate)
        } else if self.is_saturated() {
            format!("BUSY: all {} connections in use", self.max_connections)
        } else {
            "HEALTHY".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report() -> PoolHealthReport {
        PoolHealthReport {
            dialect: SqlDialect::PostgreSQL,
            check_duration: Duration::from_millis(3),
            total_check_time: Duration::from_millis(4),
            pool_size: 2,
            max_connections: 10,
            idle_connections: 2,
            active_connections: 0,
            total_acquires: 10,
            total_errors: 0,
            error_rate: 0.0,
            uptime: Duration::from_secs(60),
        }
    }

    #[test]
    fn test_healthy_report() {
        let r = report();
        assert!(r.is_healthy());
        assert_eq!(r.status_summary(), "HEALTHY");
    }

    #[test]
    fn test_slow_check_is_unhealthy() {
        let r = PoolHealthReport {
            check_duration: Duration::from_secs(2),
            ..report()
        };
        assert!(!r.is_healthy());
        assert!(r.status_summary().starts_with("UNHEALTHY"));
    }

    #[test]
    fn test_error_rate_degrades() {
        let r = PoolHealthReport {
            total_errors: 3,
            error_rate: 30.0,
            ..report()
        };
        assert!(!r.is_healthy());
        assert!(r.status_summary().starts_with("DEGRADED"));
    }

    #[test]
    fn test_saturation() {
        let r = PoolHealthReport {
            pool_size: 10,
            idle_connections: 0,
            active_connections: 10,
            ..report()
        };
        assert!(r.is_saturated());
        assert!(r.status_summary().starts_with("BUSY"));
    }
}
