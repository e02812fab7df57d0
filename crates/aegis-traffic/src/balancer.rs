//! Per-service instance pools and selection strategies.
//!
//! Each logical service owns one [`ServicePool`] behind its own mutex, so
//! selections for different services never contend. The pool holds the
//! round-robin cursor, health flags and active-connection counters.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{Result, TrafficError};
use crate::types::{LoadBalanceStrategy, ServiceInstance};

#[derive(Debug, Default)]
struct ServicePool {
    instances: Vec<ServiceInstance>,
    cursor: usize,
}

impl ServicePool {
    fn find_mut(&mut self, instance_id: &str) -> Option<&mut ServiceInstance> {
        self.instances.iter_mut().find(|i| i.id == instance_id)
    }
}

/// Load balancer holding the instance pools of every service.
#[derive(Debug)]
pub struct LoadBalancer {
    strategy: LoadBalanceStrategy,
    pools: RwLock<HashMap<String, Arc<Mutex<ServicePool>>>>,
    rng: Mutex<StdRng>,
}

impl LoadBalancer {
    /// Create a load balancer with an entropy-seeded random source.
    #[must_use]
    pub fn new(strategy: LoadBalanceStrategy) -> Self {
        Self::with_rng(strategy, StdRng::from_entropy())
    }

    /// Create a load balancer with an explicit random source, for
    /// reproducible random and weighted selection.
    #[must_use]
    pub fn with_rng(strategy: LoadBalanceStrategy, rng: StdRng) -> Self {
        Self {
            strategy,
            pools: RwLock::new(HashMap::new()),
            rng: Mutex::new(rng),
        }
    }

    /// The active selection strategy.
    #[must_use]
    pub const fn strategy(&self) -> LoadBalanceStrategy {
        self.strategy
    }

    fn pool(&self, service: &str) -> Option<Arc<Mutex<ServicePool>>> {
        self.pools.read().get(service).cloned()
    }

    fn existing_pool(&self, service: &str) -> Result<Arc<Mutex<ServicePool>>> {
        self.pool(service)
            .ok_or_else(|| TrafficError::ServiceNotFound(service.to_string()))
    }

    /// Register an instance for a service, creating the pool on first use.
    ///
    /// # Errors
    ///
    /// Returns `TrafficError::InvalidWeight` for a zero weight and
    /// `TrafficError::DuplicateInstance` if the id is already registered.
    pub fn register(&self, service: &str, instance: ServiceInstance) -> Result<()> {
        if instance.weight == 0 {
            return Err(TrafficError::InvalidWeight(instance.id));
        }

        let pool = Arc::clone(self.pools.write().entry(service.to_string()).or_default());
        let mut pool = pool.lock();
        if pool.instances.iter().any(|i| i.id == instance.id) {
            return Err(TrafficError::DuplicateInstance {
                service: service.to_string(),
                instance_id: instance.id,
            });
        }

        tracing::info!(
            service = %service,
            instance_id = %instance.id,
            address = %instance.address(),
            weight = instance.weight,
            "Registered service instance"
        );
        pool.instances.push(instance);
        Ok(())
    }

    /// Remove an instance from a service's pool.
    ///
    /// # Errors
    ///
    /// Returns an error if the service or instance does not exist.
    pub fn unregister(&self, service: &str, instance_id: &str) -> Result<ServiceInstance> {
        let pool = self.existing_pool(service)?;
        let mut pool = pool.lock();
        let position = pool
            .instances
            .iter()
            .position(|i| i.id == instance_id)
            .ok_or_else(|| TrafficError::InstanceNotFound {
                service: service.to_string(),
                instance_id: instance_id.to_string(),
            })?;

        tracing::info!(service = %service, instance_id = %instance_id, "Unregistered service instance");
        Ok(pool.instances.remove(position))
    }

    /// Mark an instance as healthy.
    ///
    /// # Errors
    ///
    /// Returns an error if the service or instance does not exist.
    pub fn mark_healthy(&self, service: &str, instance_id: &str) -> Result<()> {
        self.set_health(service, instance_id, true)
    }

    /// Mark an instance as unhealthy, excluding it from selection.
    ///
    /// # Errors
    ///
    /// Returns an error if the service or instance does not exist.
    pub fn mark_unhealthy(&self, service: &str, instance_id: &str) -> Result<()> {
        self.set_health(service, instance_id, false)
    }

    fn set_health(&self, service: &str, instance_id: &str, healthy: bool) -> Result<()> {
        let pool = self.existing_pool(service)?;
        let mut pool = pool.lock();
        let instance = pool
            .find_mut(instance_id)
            .ok_or_else(|| TrafficError::InstanceNotFound {
                service: service.to_string(),
                instance_id: instance_id.to_string(),
            })?;

        if instance.healthy != healthy {
            tracing::info!(
                service = %service,
                instance_id = %instance_id,
                healthy,
                "Instance health changed"
            );
        }
        instance.healthy = healthy;
        Ok(())
    }

    /// Select a healthy instance of `service` using the active strategy.
    ///
    /// Returns `None` if the service is unknown or has no healthy instance.
    /// `client` is only consulted by [`LoadBalanceStrategy::IpHash`].
    #[must_use]
    pub fn select(&self, service: &str, client: Option<&str>) -> Option<ServiceInstance> {
        let pool = self.pool(service)?;
        let mut pool = pool.lock();

        let healthy: Vec<usize> = pool
            .instances
            .iter()
            .enumerate()
            .filter(|(_, i)| i.healthy)
            .map(|(index, _)| index)
            .collect();
        if healthy.is_empty() {
            return None;
        }

        let chosen = match self.strategy {
            LoadBalanceStrategy::RoundRobin => {
                let position = pool.cursor % healthy.len();
                pool.cursor = (position + 1) % healthy.len();
                healthy[position]
            }
            LoadBalanceStrategy::Random => healthy[self.rng.lock().gen_range(0..healthy.len())],
            LoadBalanceStrategy::LeastConnections => healthy
                .iter()
                .copied()
                .min_by_key(|&index| pool.instances[index].active_connections)?,
            LoadBalanceStrategy::Weighted => {
                let total: u64 = healthy
                    .iter()
                    .map(|&index| u64::from(pool.instances[index].weight))
                    .sum();
                let draw = self.rng.lock().gen_range(0..total);
                let mut cumulative = 0u64;
                let mut chosen = healthy[healthy.len() - 1];
                for &index in &healthy {
                    cumulative += u64::from(pool.instances[index].weight);
                    if cumulative > draw {
                        chosen = index;
                        break;
                    }
                }
                chosen
            }
            LoadBalanceStrategy::IpHash => match client {
                Some(client) => {
                    let slot = client_hash(client) % healthy.len() as u64;
                    healthy[usize::try_from(slot).unwrap_or_default()]
                }
                None => healthy[self.rng.lock().gen_range(0..healthy.len())],
            },
        };

        Some(pool.instances[chosen].clone())
    }

    /// Count one in-flight call against an instance until the returned guard
    /// is dropped.
    ///
    /// Returns `None` if the service or instance no longer exists.
    #[must_use]
    pub fn acquire(&self, service: &str, instance_id: &str) -> Option<ConnectionGuard> {
        let pool = self.pool(service)?;
        {
            let mut locked = pool.lock();
            let instance = locked.find_mut(instance_id)?;
            instance.active_connections = instance.active_connections.saturating_add(1);
        }
        Some(ConnectionGuard {
            pool,
            instance_id: instance_id.to_string(),
        })
    }

    /// Snapshot of a service's instances, in registration order.
    #[must_use]
    pub fn instances(&self, service: &str) -> Vec<ServiceInstance> {
        self.pool(service)
            .map(|pool| pool.lock().instances.clone())
            .unwrap_or_default()
    }

    /// Names of all services with a pool.
    #[must_use]
    pub fn services(&self) -> Vec<String> {
        let mut services: Vec<String> = self.pools.read().keys().cloned().collect();
        services.sort();
        services
    }
}

impl Default for LoadBalancer {
    fn default() -> Self {
        Self::new(LoadBalanceStrategy::default())
    }
}

/// Stable 64-bit hash of a client address, identical across restarts.
fn client_hash(client: &str) -> u64 {
    let digest = blake3::hash(client.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest.as_bytes()[..8]);
    u64::from_le_bytes(bytes)
}

/// Holds one active connection on an instance; releases it on drop.
#[derive(Debug)]
#[must_use = "the connection is released as soon as the guard is dropped"]
pub struct ConnectionGuard {
    pool: Arc<Mutex<ServicePool>>,
    instance_id: String,
}

impl ConnectionGuard {
    /// The instance this guard counts against.
    #[must_use]
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if let Some(instance) = self.pool.lock().find_mut(&self.instance_id) {
            instance.active_connections = instance.active_connections.saturating_sub(1);
        }
    }
}
