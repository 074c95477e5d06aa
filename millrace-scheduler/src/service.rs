//! Scheduler provisioning service.
//!
//! Supplies named, sized worker pools on demand. Sizing of the io and
//! cpu-intensive pools is independent of the cpu-light pool so that slow
//! I/O or heavy computation never starves lightweight dispatch. The service
//! tracks every pool it creates and owns the shutdown policy for all of
//! them.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::info;

use crate::error::SchedulerError;
use crate::scheduler::Scheduler;
use crate::{CPU_INTENSIVE, CPU_LIGHT, IO};

/// Pool sizing configuration.
///
/// Defaults follow the workload types: cpu-light and cpu-intensive are sized
/// to the machine's parallelism, the io pool is oversubscribed because its
/// workers spend most of their time blocked.
#[derive(Debug, Clone)]
pub struct PoolsConfig {
    /// Workers in cpu-light pools (non-blocking stage dispatch)
    pub cpu_light_size: usize,

    /// Workers in io pools (blocking stages; oversubscribed)
    pub io_size: usize,

    /// Workers in cpu-intensive pools (long-running CPU-bound stages)
    pub cpu_intensive_size: usize,
}

impl Default for PoolsConfig {
    fn default() -> Self {
        let cores = std::thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(4);
        Self {
            cpu_light_size: cores,
            io_size: cores * 4,
            cpu_intensive_size: cores,
        }
    }
}

/// Creates and tracks the worker pools of one engine instance.
///
/// Pools are named `{prefix}.{workload}` and their worker threads
/// `{prefix}.{workload}.{index}`, so the pool that executed a stage can be
/// read off the worker thread name.
pub struct SchedulerService {
    config: PoolsConfig,
    pools: Mutex<Vec<Arc<Scheduler>>>,
}

impl SchedulerService {
    /// Create a service with the given sizing.
    pub fn new(config: PoolsConfig) -> Self {
        Self {
            config,
            pools: Mutex::new(Vec::new()),
        }
    }

    /// Create a cpu-light pool named `{prefix}.cpu-light`.
    pub fn cpu_light_pool(&self, prefix: &str) -> Result<Arc<Scheduler>, SchedulerError> {
        self.pool(prefix, CPU_LIGHT, self.config.cpu_light_size)
    }

    /// Create an io pool named `{prefix}.io`.
    pub fn io_pool(&self, prefix: &str) -> Result<Arc<Scheduler>, SchedulerError> {
        self.pool(prefix, IO, self.config.io_size)
    }

    /// Create a cpu-intensive pool named `{prefix}.cpu-intensive`.
    pub fn cpu_intensive_pool(&self, prefix: &str) -> Result<Arc<Scheduler>, SchedulerError> {
        self.pool(prefix, CPU_INTENSIVE, self.config.cpu_intensive_size)
    }

    /// Create a pool with an explicit size, named `{prefix}.{workload}`.
    pub fn custom_pool(
        &self,
        prefix: &str,
        workload: &str,
        size: usize,
    ) -> Result<Arc<Scheduler>, SchedulerError> {
        self.pool(prefix, workload, size)
    }

    /// Stop every pool this service created. Idempotent.
    pub fn stop_all(&self, timeout: Duration) {
        let pools = std::mem::take(&mut *self.pools.lock());
        if pools.is_empty() {
            return;
        }
        info!(pools = pools.len(), "stopping all scheduler pools");
        for pool in pools {
            pool.stop(timeout);
        }
    }

    fn pool(
        &self,
        prefix: &str,
        workload: &str,
        size: usize,
    ) -> Result<Arc<Scheduler>, SchedulerError> {
        let scheduler = Scheduler::start(format!("{prefix}.{workload}"), size)?;
        self.pools.lock().push(scheduler.clone());
        Ok(scheduler)
    }
}

impl Default for SchedulerService {
    fn default() -> Self {
        Self::new(PoolsConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_sizing() {
        let config = PoolsConfig::default();
        assert!(config.cpu_light_size >= 1);
        assert_eq!(config.io_size, config.cpu_light_size * 4);
    }

    #[test]
    fn test_pool_naming() {
        let service = SchedulerService::new(PoolsConfig {
            cpu_light_size: 1,
            io_size: 1,
            cpu_intensive_size: 1,
        });

        let light = service.cpu_light_pool("orders").unwrap();
        let io = service.io_pool("orders").unwrap();
        let intensive = service.cpu_intensive_pool("orders").unwrap();

        assert_eq!(light.name(), "orders.cpu-light");
        assert_eq!(io.name(), "orders.io");
        assert_eq!(intensive.name(), "orders.cpu-intensive");

        service.stop_all(Duration::from_secs(1));
        assert!(light.is_stopped());
        assert!(io.is_stopped());
        assert!(intensive.is_stopped());
    }

    #[test]
    fn test_stop_all_is_idempotent() {
        let service = SchedulerService::default();
        let _pool = service.custom_pool("p", "custom", 1).unwrap();
        service.stop_all(Duration::from_secs(1));
        service.stop_all(Duration::from_secs(1));
    }
}
