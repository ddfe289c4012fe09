//! Per-service concurrency gates.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Semaphore;
use tracing::{debug, trace};

use crate::error::{GatewayError, Result};

/// Bounds simultaneous in-flight work per service.
///
/// One semaphore per service name, created on first use with that service's
/// limit and kept for the lifetime of the registry.
#[derive(Debug, Default)]
pub struct ConcurrencyGates {
    gates: DashMap<String, Arc<Semaphore>>,
}

impl ConcurrencyGates {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn gate(&self, service: &str, max_concurrent: usize) -> Arc<Semaphore> {
        if let Some(gate) = self.gates.get(service) {
            return gate.clone();
        }

        self.gates
            .entry(service.to_string())
            .or_insert_with(|| {
                debug!(
                    service = %service,
                    max_concurrent = max_concurrent,
                    "Creating concurrency gate"
                );
                Arc::new(Semaphore::new(max_concurrent.max(1)))
            })
            .clone()
    }

    /// Run `task` once a permit for `service` is free.
    ///
    /// The permit is released when the task finishes, fails or is dropped;
    /// the task's result is returned untouched.
    pub async fn run<F, T>(&self, service: &str, max_concurrent: usize, task: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let gate = self.gate(service, max_concurrent);

        let permit = gate
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| GatewayError::Server(format!("concurrency gate closed: {}", e)))?;

        trace!(
            service = %service,
            available = gate.available_permits(),
            "Concurrency permit acquired"
        );

        let result = task.await;
        drop(permit);
        result
    }

    /// Permits currently free for `service`, `None` before its first use.
    pub fn available_permits(&self, service: &str) -> Option<usize> {
        self.gates.get(service).map(|gate| gate.available_permits())
    }

    /// Number of gates created so far.
    pub fn len(&self) -> usize {
        self.gates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gates.is_empty()
    }
}
