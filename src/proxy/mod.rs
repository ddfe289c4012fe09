//! Request proxying: rate limiting, concurrency gating and forwarding.

mod batch;
mod forward;
mod gate;

pub use batch::{
    normalize_path, BatchItem, BatchItemRequest, BatchOutcome, BatchRequest, BatchResponse,
    BatchResult, Outcome,
};
pub use forward::{
    forwarded_headers, join_url, method_has_body, Forwarder, ProxyRequest, UpstreamResponse,
};
pub use gate::ConcurrencyGates;

use std::net::IpAddr;
use std::sync::Arc;

use futures::future::join_all;
use http::HeaderMap;
use tracing::{debug, info, instrument};

use crate::config::{GatewayConfig, ServiceConfig, ServiceRegistry};
use crate::error::{GatewayError, Result};
use crate::ratelimit::{CounterBackend, LimiterKey, RateLimiter};

/// Everything a request needs once it has been routed to a service.
#[derive(Debug)]
pub struct Gateway {
    services: ServiceRegistry,
    limiter: RateLimiter,
    gates: ConcurrencyGates,
    forwarder: Forwarder,
}

impl Gateway {
    /// Assemble a gateway from its parts.
    pub fn new(services: ServiceRegistry, limiter: RateLimiter, forwarder: Forwarder) -> Self {
        Self {
            services,
            limiter,
            gates: ConcurrencyGates::new(),
            forwarder,
        }
    }

    /// Build a gateway from loaded configuration.
    ///
    /// The counter store is selected here; a Redis store connects lazily on
    /// its first increment.
    pub fn from_config(config: &GatewayConfig) -> Result<Self> {
        let backend = CounterBackend::from_dsn(&config.limiter.backend_dsn, config.limiter.expiry)?;
        let services = ServiceRegistry::new(config.services.iter().cloned())?;

        info!(
            services = ?services.names().collect::<Vec<_>>(),
            backend = backend.name(),
            "Gateway initialized"
        );

        Ok(Self::new(
            services,
            RateLimiter::new(Arc::new(backend)),
            Forwarder::new()?,
        ))
    }

    /// Look up a configured service.
    pub fn service(&self, name: &str) -> Result<Arc<ServiceConfig>> {
        self.services
            .get(name)
            .ok_or_else(|| GatewayError::UnknownService(name.to_string()))
    }

    /// Concurrency gates, keyed by service name.
    pub fn gates(&self) -> &ConcurrencyGates {
        &self.gates
    }

    async fn charge(&self, service: &ServiceConfig, client: IpAddr, cost: u64) -> Result<()> {
        let key = LimiterKey::for_ip(&service.name, client);
        self.limiter
            .limit(&key, service.rate_limit, service.rate_limit_period(), cost)
            .await
    }

    /// Relay one request to `service` on behalf of `client`.
    ///
    /// `request.headers` are the inbound headers; they are rewritten here.
    /// The upstream status is passed through even when it is an error.
    #[instrument(skip(self, request), fields(method = %request.method, path = %request.path))]
    pub async fn proxy(
        &self,
        service: &str,
        client: Option<IpAddr>,
        mut request: ProxyRequest,
    ) -> Result<UpstreamResponse> {
        let service = self.service(service)?;
        let client = client.ok_or(GatewayError::MissingClientAddress)?;

        self.charge(&service, client, 1).await?;

        request.headers = forwarded_headers(&request.headers, Some(client))?;
        self.forwarder.forward(&service, request).await
    }

    /// Fan out validated `items` to `service` and collect one outcome per item.
    ///
    /// The whole batch is charged up front, one unit per item, and rejected as
    /// a unit when over quota. Past that point item failures are reported in
    /// their outcome and never fail the batch. Outcomes keep the input order.
    #[instrument(skip(self, items, headers), fields(items = items.len()))]
    pub async fn batch(
        &self,
        service: &str,
        client: Option<IpAddr>,
        items: Vec<BatchItem>,
        headers: &HeaderMap,
    ) -> Result<Vec<BatchOutcome>> {
        let service = self.service(service)?;
        let client = client.ok_or(GatewayError::MissingClientAddress)?;

        self.charge(&service, client, items.len() as u64).await?;

        let headers = forwarded_headers(headers, Some(client))?;
        let calls = items.into_iter().map(|item| {
            let request = ProxyRequest {
                method: item.method,
                path: item.path.clone(),
                headers: headers.clone(),
                body: None,
            };
            let service = &service;
            async move {
                let result = self
                    .gates
                    .run(
                        &service.name,
                        service.max_concurrent_requests,
                        self.forwarder.forward(service, request),
                    )
                    .await;
                BatchOutcome::new(item.path, result)
            }
        });

        let outcomes = join_all(calls).await;

        debug!(
            service = %service.name,
            failed = outcomes.iter().filter(|o| o.is_error()).count(),
            "Batch completed"
        );
        Ok(outcomes)
    }
}
