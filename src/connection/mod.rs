//! Resilient connection management for ledger and oracle RPC pools.
//!
//! Every network call in the payment pipeline is routed through a
//! [`ConnectionManager`], which maintains a pool of endpoints per network
//! and tracks health and circuit-breaker state for each one.
//!
//! # Architecture
//!
//! ```text
//! execute(operation)
//!        │
//!        ▼
//! ┌──────────────────────┐
//! │ Select endpoint      │  current if usable, else scan forward,
//! │ (circuit closed +    │  half-open trial once recovery timeout
//! │  healthy)            │  has elapsed
//! └─────────┬────────────┘
//!           │
//!    ┌──────┴───────┐
//!    │              │
//! pool member    none usable
//!    │              │
//!    ▼              ▼
//! attempt op    fallback handle
//!    │          (final attempt only)
//!    ▼
//! retry with capped exponential backoff + jitter
//! ```
//!
//! A background probe task runs a cheap liveness operation against every
//! pool endpoint on a fixed interval, regardless of circuit state, feeding
//! circuit recovery.

mod endpoint;

pub use endpoint::{EndpointHealth, RpcError, RpcHandle};

use crate::config::ConnectionConfig;
use crate::error::{Error, Result};
use crate::event::{GatewayEvent, GatewayEventsSender};
use chrono::Utc;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Future returned by a liveness probe operation.
pub type ProbeFuture = BoxFuture<'static, std::result::Result<(), RpcError>>;

type ProbeFn = Box<dyn Fn(RpcHandle) -> ProbeFuture + Send + Sync>;

/// Overall status of an endpoint pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolStatus {
    /// At least one usable path (pool endpoint or fallback) exists.
    Healthy,
    /// No pool endpoint is usable and no fallback is configured.
    Degraded,
}

/// Point-in-time view of pool health.
#[derive(Debug, Clone)]
pub struct HealthSnapshot {
    /// Number of configured endpoints.
    pub total_endpoints: usize,
    /// Endpoints currently usable without a trial.
    pub healthy_endpoints: usize,
    /// Endpoints with an open circuit.
    pub open_circuits: usize,
    /// URL the next call will try first.
    pub current_endpoint: Option<String>,
    /// Whether a wallet-injected fallback connection is configured.
    pub fallback_available: bool,
    /// Overall pool status.
    pub status: PoolStatus,
    /// Per-endpoint health records.
    pub endpoints: Vec<EndpointHealth>,
}

struct Pool {
    endpoints: Vec<EndpointHealth>,
    current: usize,
}

/// Executes operations against a pool of RPC endpoints with retry,
/// backoff, circuit breaking and failover.
pub struct ConnectionManager {
    client: reqwest::Client,
    config: ConnectionConfig,
    pool: Mutex<Pool>,
    fallback: Option<RpcHandle>,
    probe: Option<ProbeFn>,
    events: Option<GatewayEventsSender>,
}

impl ConnectionManager {
    /// Create a manager for the given endpoint URLs.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(endpoints: Vec<String>, config: ConnectionConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("failed to build http client: {e}")))?;

        let records = endpoints.into_iter().map(EndpointHealth::new).collect();

        Ok(Self {
            client,
            config,
            pool: Mutex::new(Pool {
                endpoints: records,
                current: 0,
            }),
            fallback: None,
            probe: None,
            events: None,
        })
    }

    /// Configure a wallet-injected fallback connection, used as a last
    /// resort when no pool endpoint is usable.
    #[must_use]
    pub fn with_fallback(mut self, url: String) -> Self {
        self.fallback = Some(RpcHandle::new(self.client.clone(), url));
        self
    }

    /// Configure the cheap liveness operation run by the background probe.
    #[must_use]
    pub fn with_probe<F>(mut self, probe: F) -> Self
    where
        F: Fn(RpcHandle) -> ProbeFuture + Send + Sync + 'static,
    {
        self.probe = Some(Box::new(probe));
        self
    }

    /// Attach an event sender for circuit open/close notifications.
    #[must_use]
    pub fn with_events(mut self, events: GatewayEventsSender) -> Self {
        self.events = Some(events);
        self
    }

    /// Execute an operation with retry, backoff and failover.
    ///
    /// The operation is invoked with a live [`RpcHandle`] bound to the
    /// selected endpoint; it may be invoked several times, each time
    /// against whichever endpoint currently qualifies.
    ///
    /// # Errors
    ///
    /// - [`Error::PermanentConnectivity`] on a policy failure; the endpoint
    ///   is failed over permanently and the operation is not re-attempted.
    /// - [`Error::Rpc`] on a non-retryable upstream reply.
    /// - [`Error::AllProvidersUnavailable`] once every attempt, including
    ///   the fallback connection, has been exhausted.
    pub async fn execute<T, F, Fut>(&self, operation_name: &str, operation: F) -> Result<T>
    where
        F: Fn(RpcHandle) -> Fut,
        Fut: Future<Output = std::result::Result<T, RpcError>>,
    {
        let attempts = self.config.max_retries.max(1);
        let mut last_error = "no endpoints configured".to_string();

        for attempt in 0..attempts {
            let final_attempt = attempt + 1 == attempts;

            let (handle, from_pool) = if let Some(url) = self.select_endpoint() {
                (RpcHandle::new(self.client.clone(), url), true)
            } else if final_attempt && self.fallback.is_some() {
                warn!(
                    operation = operation_name,
                    "no usable pool endpoint, using fallback connection"
                );
                match self.fallback.clone() {
                    Some(handle) => (handle, false),
                    None => break,
                }
            } else {
                last_error = "no usable endpoint in pool".to_string();
                if !final_attempt {
                    tokio::time::sleep(self.backoff_delay(attempt)).await;
                }
                continue;
            };

            let started = Instant::now();
            match operation(handle.clone()).await {
                Ok(value) => {
                    if from_pool {
                        self.record_success(handle.url(), started.elapsed());
                    }
                    return Ok(value);
                }
                Err(err) => {
                    if from_pool {
                        self.record_failure(handle.url(), &err);
                    }
                    if err.is_policy() {
                        return Err(Error::PermanentConnectivity {
                            endpoint: handle.url().to_string(),
                            reason: err.to_string(),
                        });
                    }
                    if !err.is_retryable() {
                        return Err(Error::Rpc(err.to_string()));
                    }
                    warn!(
                        operation = operation_name,
                        endpoint = handle.url(),
                        attempt,
                        error = %err,
                        "rpc attempt failed"
                    );
                    last_error = err.to_string();
                    if !final_attempt {
                        tokio::time::sleep(self.backoff_delay(attempt)).await;
                    }
                }
            }
        }

        Err(Error::AllProvidersUnavailable {
            operation: operation_name.to_string(),
            last_error,
        })
    }

    /// Run the liveness probe against every pool endpoint once.
    ///
    /// Runs regardless of circuit state so that open circuits can recover.
    pub async fn probe_all(&self) {
        let Some(probe) = &self.probe else {
            debug!("no probe operation configured, skipping");
            return;
        };

        let urls: Vec<String> = {
            let pool = self.pool.lock();
            pool.endpoints.iter().map(|e| e.url.clone()).collect()
        };

        for url in urls {
            let handle = RpcHandle::new(self.client.clone(), url.clone());
            let started = Instant::now();
            match probe(handle).await {
                Ok(()) => {
                    debug!(endpoint = %url, latency_ms = started.elapsed().as_millis() as u64, "probe ok");
                    self.record_success(&url, started.elapsed());
                }
                Err(err) => {
                    debug!(endpoint = %url, error = %err, "probe failed");
                    self.record_failure(&url, &err);
                }
            }
        }
    }

    /// Spawn the background probe task.
    ///
    /// The task probes all endpoints on the configured interval until the
    /// shutdown channel flips to `true`.
    pub fn spawn_probe(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let interval = manager.config.probe_interval();
            info!(interval_secs = interval.as_secs(), "endpoint probe task started");
            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                    () = tokio::time::sleep(interval) => {
                        manager.probe_all().await;
                    }
                }
            }
            info!("endpoint probe task stopped");
        })
    }

    /// Point-in-time health snapshot of the pool.
    #[must_use]
    pub fn health_snapshot(&self) -> HealthSnapshot {
        let pool = self.pool.lock();
        let healthy = pool.endpoints.iter().filter(|e| e.usable()).count();
        let open = pool.endpoints.iter().filter(|e| e.circuit_open).count();
        let current = pool.endpoints.get(pool.current).map(|e| e.url.clone());
        let status = if healthy > 0 || self.fallback.is_some() {
            PoolStatus::Healthy
        } else {
            PoolStatus::Degraded
        };

        HealthSnapshot {
            total_endpoints: pool.endpoints.len(),
            healthy_endpoints: healthy,
            open_circuits: open,
            current_endpoint: current,
            fallback_available: self.fallback.is_some(),
            status,
            endpoints: pool.endpoints.clone(),
        }
    }

    /// Pick the current endpoint if usable, otherwise scan forward
    /// (wrapping) for the next usable or trial-due endpoint.
    fn select_endpoint(&self) -> Option<String> {
        let now = Utc::now();
        let recovery = self.config.recovery_timeout();
        let mut pool = self.pool.lock();
        let len = pool.endpoints.len();

        for offset in 0..len {
            let idx = (pool.current + offset) % len;
            let record = &pool.endpoints[idx];
            if record.usable() || record.half_open_due(recovery, now) {
                let url = record.url.clone();
                pool.current = idx;
                return Some(url);
            }
        }
        None
    }

    fn record_success(&self, url: &str, latency: Duration) {
        let closed = {
            let mut pool = self.pool.lock();
            pool.endpoints
                .iter_mut()
                .find(|e| e.url == url)
                .is_some_and(|record| {
                    record.record_success(latency, self.config.required_successes, Utc::now())
                })
        };
        if closed {
            info!(endpoint = %url, "circuit closed after recovery");
            self.emit(GatewayEvent::CircuitClosed {
                url: url.to_string(),
            });
        }
    }

    fn record_failure(&self, url: &str, error: &RpcError) {
        let opened = {
            let mut pool = self.pool.lock();
            pool.endpoints
                .iter_mut()
                .find(|e| e.url == url)
                .is_some_and(|record| {
                    record.record_failure(error, self.config.failure_threshold, Utc::now())
                })
        };
        if opened {
            warn!(endpoint = %url, error = %error, "circuit opened");
            self.emit(GatewayEvent::CircuitOpened {
                url: url.to_string(),
            });
        }
    }

    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_possible_wrap
    )]
    fn backoff_delay(&self, attempt: u32) -> Duration {
        use rand::Rng;

        let base = self.config.base_delay_ms as f64;
        let capped = (base * self.config.backoff_factor.powi(attempt as i32))
            .min(self.config.max_delay_ms as f64);
        let jitter = capped * rand::thread_rng().gen_range(0.0..0.1);
        Duration::from_millis((capped + jitter) as u64)
    }

    fn emit(&self, event: GatewayEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}
