//! Shared daemon state.
//!
//! Everything a dispatched connection needs, built once at startup and
//! shared behind an `Arc`. Each component guards its own state; this struct
//! adds no lock of its own.

use crate::config::{BinkpConfig, Config, DurationParseError, ServiceConfig};
use crate::launch::{ProcessLauncher, WorkerRegistry};
use crate::network::prelude::PreludeTimings;
use crate::nodes::{ConnectionType, NodePool, SemaphoreFiles};
use crate::security::{ConcurrencyLimiter, IpReputation};
use std::sync::Arc;
use tracing::info;

/// A configured service and its node pool.
#[derive(Debug)]
pub struct ServicePool {
    pub config: ServiceConfig,
    pub pool: Arc<NodePool>,
}

/// The binkp mailer and its node pool.
#[derive(Debug)]
pub struct BinkpPool {
    pub config: BinkpConfig,
    pub pool: Arc<NodePool>,
}

/// Central shared state container.
pub struct DaemonState {
    /// Validated configuration.
    pub config: Config,
    /// Admission policy: lists, auto-block and DNS lookups.
    pub reputation: IpReputation,
    /// Per-peer concurrent session cap.
    pub limiter: Arc<ConcurrencyLimiter>,
    /// Services in menu order; the first is the primary service.
    pub services: Vec<ServicePool>,
    pub binkp: Option<BinkpPool>,
    pub semaphores: SemaphoreFiles,
    pub launcher: ProcessLauncher,
    pub timings: PreludeTimings,
}

impl DaemonState {
    /// Build state from a validated configuration.
    ///
    /// Loads ban state and address lists, creates one pool per service and
    /// clears semaphore files left behind by a previous run.
    pub fn build(config: Config, registry: Arc<WorkerRegistry>) -> Result<Self, DurationParseError> {
        let reputation = IpReputation::from_config(&config)?;
        let limiter = Arc::new(ConcurrencyLimiter::new(
            config.blocking.max_concurrent_per_peer,
        ));

        let services: Vec<ServicePool> = config
            .services
            .iter()
            .map(|service| ServicePool {
                pool: Arc::new(NodePool::new(
                    service.name.clone(),
                    ConnectionType::Unknown,
                    service.start_node,
                    service.end_node,
                )),
                config: service.clone(),
            })
            .collect();

        let binkp = config.binkp.as_ref().map(|binkp| BinkpPool {
            pool: Arc::new(NodePool::new(
                "BINKP",
                ConnectionType::Binkp,
                binkp.start_node,
                binkp.end_node,
            )),
            config: binkp.clone(),
        });

        let semaphores = SemaphoreFiles::new(config.server.data_dir.clone());
        semaphores.clear_all();

        let launcher = ProcessLauncher::new(config.server.launch_mode, registry);

        info!(
            services = services.len(),
            nodes = services.iter().map(|s| s.pool.num_nodes()).sum::<usize>(),
            binkp = binkp.is_some(),
            "daemon state built"
        );

        Ok(Self {
            config,
            reputation,
            limiter,
            services,
            binkp,
            semaphores,
            launcher,
            timings: PreludeTimings::default(),
        })
    }

    /// Every node pool, services first.
    pub fn pools(&self) -> Vec<Arc<NodePool>> {
        self.services
            .iter()
            .map(|s| Arc::clone(&s.pool))
            .chain(self.binkp.iter().map(|b| Arc::clone(&b.pool)))
            .collect()
    }
}
