//! Metrics collection and export for resource pools

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::factory::Factory;
use crate::state::PoolState;

#[cfg(feature = "metrics")]
use crate::errors::{PoolError, PoolResult};

/// Point-in-time view of a pool
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use esox_resourcepool::{Factory, Pool, PoolConfiguration, PoolError};
///
/// struct Numbers;
///
/// #[async_trait]
/// impl Factory for Numbers {
///     type Resource = u32;
///     type Error = std::io::Error;
///
///     async fn create(&self) -> Result<u32, std::io::Error> { Ok(1) }
///     async fn destroy(&self, _n: u32) -> Result<(), std::io::Error> { Ok(()) }
/// }
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let pool = Pool::new(Numbers, PoolConfiguration::default()).unwrap();
/// pool.acquire(0, async |_n| Ok::<_, PoolError>(())).unwrap().await.unwrap();
///
/// let metrics = pool.get_metrics();
/// assert_eq!(metrics.total_created, 1);
/// assert_eq!(metrics.total_dispensed, 1);
/// assert_eq!(metrics.available, 1);
/// # }
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PoolMetrics {
    /// Resources created, idle or lent out
    pub size: usize,

    /// Idle resources
    pub available: usize,

    /// Resources lent out or being created
    pub borrowed: usize,

    /// Requests waiting for a resource
    pub waiting: usize,

    pub max_size: usize,
    pub min_size: usize,
    pub draining: bool,

    /// Share of the maximum currently in use (0.0 to 1.0)
    pub utilization: f64,

    pub total_created: u64,
    pub total_destroyed: u64,
    pub total_dispensed: u64,
    pub total_released: u64,
    pub create_failures: u64,
    pub destroy_failures: u64,
    pub validation_failures: u64,
    pub release_hook_failures: u64,
}

impl PoolMetrics {
    /// Export metrics as a HashMap
    pub fn export(&self) -> HashMap<String, String> {
        let mut metrics = HashMap::new();
        metrics.insert("size".to_string(), self.size.to_string());
        metrics.insert("available".to_string(), self.available.to_string());
        metrics.insert("borrowed".to_string(), self.borrowed.to_string());
        metrics.insert("waiting".to_string(), self.waiting.to_string());
        metrics.insert("max_size".to_string(), self.max_size.to_string());
        metrics.insert("min_size".to_string(), self.min_size.to_string());
        metrics.insert("draining".to_string(), self.draining.to_string());
        metrics.insert("utilization".to_string(), format!("{:.2}", self.utilization));
        metrics.insert("total_created".to_string(), self.total_created.to_string());
        metrics.insert("total_destroyed".to_string(), self.total_destroyed.to_string());
        metrics.insert("total_dispensed".to_string(), self.total_dispensed.to_string());
        metrics.insert("total_released".to_string(), self.total_released.to_string());
        metrics.insert("create_failures".to_string(), self.create_failures.to_string());
        metrics.insert("destroy_failures".to_string(), self.destroy_failures.to_string());
        metrics.insert("validation_failures".to_string(), self.validation_failures.to_string());
        metrics.insert("release_hook_failures".to_string(), self.release_hook_failures.to_string());
        metrics
    }
}

/// Metrics exporter for Prometheus format
pub struct MetricsExporter;

#[cfg(feature = "metrics")]
impl MetricsExporter {
    /// Export metrics in Prometheus exposition format
    ///
    /// Every series carries a `pool` label plus any extra `tags`.
    pub fn export_prometheus(
        metrics: &PoolMetrics,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> PoolResult<String> {
        use prometheus::{Encoder, Gauge, IntCounter, IntGauge, Opts, Registry, TextEncoder};

        let mut labels = HashMap::new();
        labels.insert("pool".to_string(), pool_name.to_string());
        if let Some(tags) = tags {
            labels.extend(tags.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        let opts = |name: &str, help: &str| Opts::new(name, help).const_labels(labels.clone());

        let registry = Registry::new();

        let gauges = [
            ("resourcepool_resources_active", "Resources currently created", metrics.size),
            ("resourcepool_resources_available", "Idle resources", metrics.available),
            ("resourcepool_resources_borrowed", "Resources lent out", metrics.borrowed),
            ("resourcepool_requests_waiting", "Requests waiting for a resource", metrics.waiting),
            ("resourcepool_size_max", "Maximum pool size", metrics.max_size),
            ("resourcepool_size_min", "Minimum pool size", metrics.min_size),
        ];
        for (name, help, value) in gauges {
            let gauge = IntGauge::with_opts(opts(name, help)).map_err(export_error)?;
            gauge.set(i64::try_from(value).unwrap_or(i64::MAX));
            registry.register(Box::new(gauge)).map_err(export_error)?;
        }

        let utilization = Gauge::with_opts(opts("resourcepool_utilization", "Pool utilization ratio"))
            .map_err(export_error)?;
        utilization.set(metrics.utilization);
        registry.register(Box::new(utilization)).map_err(export_error)?;

        let counters = [
            ("resourcepool_resources_created_total", "Resources created", metrics.total_created),
            ("resourcepool_resources_destroyed_total", "Resources destroyed", metrics.total_destroyed),
            ("resourcepool_resources_dispensed_total", "Resources handed to requests", metrics.total_dispensed),
            ("resourcepool_resources_released_total", "Resources returned to the pool", metrics.total_released),
            ("resourcepool_create_failures_total", "Failed resource creations", metrics.create_failures),
            ("resourcepool_destroy_failures_total", "Failed resource destructions", metrics.destroy_failures),
            ("resourcepool_validation_failures_total", "Idle resources failing validation", metrics.validation_failures),
            ("resourcepool_release_hook_failures_total", "Failed release hooks", metrics.release_hook_failures),
        ];
        for (name, help, value) in counters {
            let counter = IntCounter::with_opts(opts(name, help)).map_err(export_error)?;
            counter.inc_by(value);
            registry.register(Box::new(counter)).map_err(export_error)?;
        }

        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&registry.gather(), &mut buffer)
            .map_err(export_error)?;
        String::from_utf8(buffer).map_err(export_error)
    }
}

#[cfg(feature = "metrics")]
fn export_error(err: impl std::fmt::Display) -> PoolError {
    PoolError::MetricsExport(err.to_string())
}

/// Internal metrics tracker
#[derive(Debug, Default)]
pub(crate) struct MetricsTracker {
    total_created: AtomicU64,
    total_destroyed: AtomicU64,
    total_dispensed: AtomicU64,
    total_released: AtomicU64,
    create_failures: AtomicU64,
    destroy_failures: AtomicU64,
    validation_failures: AtomicU64,
    release_hook_failures: AtomicU64,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_created(&self) {
        self.total_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_destroyed(&self) {
        self.total_destroyed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dispensed(&self) {
        self.total_dispensed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_released(&self) {
        self.total_released.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_create_failure(&self) {
        self.create_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_destroy_failure(&self) {
        self.destroy_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_validation_failure(&self) {
        self.validation_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_release_hook_failure(&self) {
        self.release_hook_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_metrics<F: Factory>(&self, state: &PoolState<F>) -> PoolMetrics {
        let borrowed = state.borrowed();
        let utilization = if state.max > 0 {
            borrowed as f64 / state.max as f64
        } else {
            0.0
        };

        PoolMetrics {
            size: state.count,
            available: state.available.len(),
            borrowed,
            waiting: state.waiting.len(),
            max_size: state.max,
            min_size: state.min,
            draining: state.draining,
            utilization,
            total_created: self.total_created.load(Ordering::Relaxed),
            total_destroyed: self.total_destroyed.load(Ordering::Relaxed),
            total_dispensed: self.total_dispensed.load(Ordering::Relaxed),
            total_released: self.total_released.load(Ordering::Relaxed),
            create_failures: self.create_failures.load(Ordering::Relaxed),
            destroy_failures: self.destroy_failures.load(Ordering::Relaxed),
            validation_failures: self.validation_failures.load(Ordering::Relaxed),
            release_hook_failures: self.release_hook_failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests::Numbers;

    #[test]
    fn test_snapshot_reflects_state_and_counters() {
        let tracker = MetricsTracker::new();
        tracker.record_created();
        tracker.record_created();
        tracker.record_dispensed();
        tracker.record_create_failure();

        let mut state = PoolState::<Numbers>::new(4, 0, 1);
        state.count = 2;

        let metrics = tracker.get_metrics(&state);
        assert_eq!(metrics.size, 2);
        assert_eq!(metrics.borrowed, 2);
        assert_eq!(metrics.total_created, 2);
        assert_eq!(metrics.create_failures, 1);
        assert!((metrics.utilization - 0.5).abs() < f64::EPSILON);

        let exported = metrics.export();
        assert_eq!(exported.get("size").map(String::as_str), Some("2"));
        assert_eq!(exported.get("utilization").map(String::as_str), Some("0.50"));
    }

    #[cfg(feature = "metrics")]
    #[test]
    fn test_prometheus_export_labels_series() {
        let state = PoolState::<Numbers>::new(4, 0, 1);
        let metrics = MetricsTracker::new().get_metrics(&state);

        let mut tags = HashMap::new();
        tags.insert("service".to_string(), "api".to_string());

        let output = MetricsExporter::export_prometheus(&metrics, "my_pool", Some(&tags)).unwrap();
        assert!(output.contains("resourcepool_resources_active"));
        assert!(output.contains("resourcepool_create_failures_total"));
        assert!(output.contains("pool=\"my_pool\""));
        assert!(output.contains("service=\"api\""));
    }

    #[cfg(feature = "metrics")]
    #[test]
    fn test_prometheus_export_rejects_bad_label() {
        let state = PoolState::<Numbers>::new(1, 0, 1);
        let metrics = MetricsTracker::new().get_metrics(&state);

        let mut tags = HashMap::new();
        tags.insert("not a label".to_string(), "x".to_string());

        let result = MetricsExporter::export_prometheus(&metrics, "p", Some(&tags));
        assert!(result.is_err());
    }
}
