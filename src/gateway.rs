//! Gateway construction and lifecycle.
//!
//! The builder wires explicitly constructed service instances with
//! injected configuration; there are no module-level globals, so parallel
//! instances (and parallel tests) are safe.

use crate::api::AccessApi;
use crate::attestation::{self, AttestationOracle, AttestationRequester, FdcOracle};
use crate::clock::{Clock, SystemClock};
use crate::config::GatewayConfig;
use crate::connection::{ConnectionManager, HealthSnapshot};
use crate::error::Result;
use crate::event::{create_event_channel, GatewayEvent, GatewayEventsChannel, GatewayEventsSender};
use crate::grant::{GrantAuthority, InMemoryGrantStore};
use crate::id::{IdGenerator, UuidGenerator};
use crate::intent::{InMemoryIntentStore, IntentManager, PipelineParts};
use crate::ledger::{wire, LedgerObserver, WalletSigner, XrplObserver};
use crate::rates::{FixedRateTable, RateLookup};
use futures::FutureExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

/// Builder for constructing a gateway.
pub struct GatewayBuilder {
    config: GatewayConfig,
    signer: Option<Arc<dyn WalletSigner>>,
    rates: Option<Arc<dyn RateLookup>>,
    oracle: Option<Arc<dyn AttestationOracle>>,
    observer: Option<Arc<dyn LedgerObserver>>,
    ids: Option<Arc<dyn IdGenerator>>,
    clock: Option<Arc<dyn Clock>>,
    fallback_rpc: Option<String>,
}

impl GatewayBuilder {
    /// Create a builder with the given configuration.
    #[must_use]
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            signer: None,
            rates: None,
            oracle: None,
            observer: None,
            ids: None,
            clock: None,
            fallback_rpc: None,
        }
    }

    /// Attach a wallet signer for payment submission.
    #[must_use]
    pub fn with_signer(mut self, signer: Arc<dyn WalletSigner>) -> Self {
        self.signer = Some(signer);
        self
    }

    /// Override the rate lookup.
    #[must_use]
    pub fn with_rates(mut self, rates: Arc<dyn RateLookup>) -> Self {
        self.rates = Some(rates);
        self
    }

    /// Override the attestation oracle.
    #[must_use]
    pub fn with_oracle(mut self, oracle: Arc<dyn AttestationOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    /// Override the ledger observer.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn LedgerObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Override the id generator.
    #[must_use]
    pub fn with_ids(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// Override the time source.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Configure a wallet-injected fallback RPC connection for the
    /// ledger pool.
    #[must_use]
    pub fn with_fallback_rpc(mut self, url: String) -> Self {
        self.fallback_rpc = Some(url);
        self
    }

    /// Build the gateway service graph.
    ///
    /// # Errors
    ///
    /// Returns an error if a connection pool or the rate table cannot be
    /// constructed.
    pub async fn build(self) -> Result<RunningGateway> {
        info!("building medgate gateway");

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (events_tx, events_rx) = create_event_channel();

        let mut ledger_manager = ConnectionManager::new(
            self.config.ledger.endpoints.clone(),
            self.config.connection.clone(),
        )?
        .with_events(events_tx.clone())
        .with_probe(|handle| {
            let body = wire::probe_body();
            async move { handle.post_json(&body).await.map(|_| ()) }.boxed()
        });
        if let Some(url) = self.fallback_rpc {
            ledger_manager = ledger_manager.with_fallback(url);
        }
        let ledger_manager = Arc::new(ledger_manager);

        let oracle_manager = Arc::new(
            ConnectionManager::new(
                self.config.oracle.endpoints.clone(),
                self.config.connection.clone(),
            )?
            .with_events(events_tx.clone())
            .with_probe(|handle| {
                let body = attestation::probe_body();
                async move { handle.post_json(&body).await.map(|_| ()) }.boxed()
            }),
        );

        let clock: Arc<dyn Clock> = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids: Arc<dyn IdGenerator> = self.ids.unwrap_or_else(|| Arc::new(UuidGenerator));
        let rates: Arc<dyn RateLookup> = match self.rates {
            Some(rates) => rates,
            None => Arc::new(FixedRateTable::new(self.config.ledger.usd_per_xrp)?),
        };
        let observer: Arc<dyn LedgerObserver> = match self.observer {
            Some(observer) => observer,
            None => {
                let mut observer = XrplObserver::new(Arc::clone(&ledger_manager));
                if let Some(signer) = self.signer {
                    observer = observer.with_signer(signer);
                }
                Arc::new(observer)
            }
        };
        let oracle: Arc<dyn AttestationOracle> = self.oracle.unwrap_or_else(|| {
            Arc::new(FdcOracle::new(
                Arc::clone(&oracle_manager),
                self.config.oracle.clone(),
            ))
        });
        let requester = Arc::new(AttestationRequester::new(
            oracle,
            self.config.attestation.clone(),
        ));

        let grants = Arc::new(
            GrantAuthority::new(
                Arc::new(InMemoryGrantStore::new()),
                Arc::clone(&ids),
                Arc::clone(&clock),
                self.config.grant.ttl_days,
            )
            .with_events(events_tx.clone()),
        );

        let intents = Arc::new(
            IntentManager::new(
                PipelineParts {
                    store: Arc::new(InMemoryIntentStore::new()),
                    observer,
                    requester,
                    rates,
                    grants: Arc::clone(&grants),
                    ids,
                    clock,
                },
                self.config.intent.clone(),
                self.config.ledger.destination_wallet.clone(),
                self.config.attestation.poll_deadline(),
            )
            .with_events(events_tx.clone()),
        );

        let api = Arc::new(AccessApi::new(Arc::clone(&intents), Arc::clone(&grants)));

        Ok(RunningGateway {
            config: self.config,
            shutdown_tx,
            shutdown_rx,
            events_tx,
            events_rx: Some(events_rx),
            ledger_manager,
            oracle_manager,
            intents,
            grants,
            api,
        })
    }
}

/// A running gateway.
pub struct RunningGateway {
    config: GatewayConfig,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    events_tx: GatewayEventsSender,
    events_rx: Option<GatewayEventsChannel>,
    ledger_manager: Arc<ConnectionManager>,
    oracle_manager: Arc<ConnectionManager>,
    intents: Arc<IntentManager>,
    grants: Arc<GrantAuthority>,
    api: Arc<AccessApi>,
}

impl RunningGateway {
    /// The HTTP facade.
    #[must_use]
    pub fn api(&self) -> Arc<AccessApi> {
        Arc::clone(&self.api)
    }

    /// The intent manager.
    #[must_use]
    pub fn intents(&self) -> Arc<IntentManager> {
        Arc::clone(&self.intents)
    }

    /// The grant authority.
    #[must_use]
    pub fn grants(&self) -> Arc<GrantAuthority> {
        Arc::clone(&self.grants)
    }

    /// Health snapshot of the ledger endpoint pool.
    #[must_use]
    pub fn ledger_health(&self) -> HealthSnapshot {
        self.ledger_manager.health_snapshot()
    }

    /// Health snapshot of the oracle endpoint pool.
    #[must_use]
    pub fn oracle_health(&self) -> HealthSnapshot {
        self.oracle_manager.health_snapshot()
    }

    /// Get a receiver for gateway events.
    ///
    /// Note: Can only be called once. Subsequent calls return None.
    pub fn events(&mut self) -> Option<GatewayEventsChannel> {
        self.events_rx.take()
    }

    /// Subscribe to gateway events.
    #[must_use]
    pub fn subscribe_events(&self) -> GatewayEventsChannel {
        self.events_tx.subscribe()
    }

    /// Run the gateway until shutdown is requested.
    ///
    /// Spawns the endpoint probe tasks and the expiry sweep task, then
    /// waits for a shutdown signal.
    ///
    /// # Errors
    ///
    /// Returns an error if the gateway encounters a fatal error.
    pub async fn run(&mut self) -> Result<()> {
        info!("starting medgate gateway");
        let _ = self.events_tx.send(GatewayEvent::Started);

        let _ = self.ledger_manager.spawn_probe(self.shutdown_rx.clone());
        let _ = self.oracle_manager.spawn_probe(self.shutdown_rx.clone());
        self.spawn_expiry_sweep();

        loop {
            tokio::select! {
                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        info!("shutdown signal received");
                        break;
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("ctrl-c received, initiating shutdown");
                    self.shutdown();
                    break;
                }
            }
        }

        let _ = self.events_tx.send(GatewayEvent::ShuttingDown);
        info!("gateway shutdown complete");
        Ok(())
    }

    /// Request the gateway to shut down.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    fn spawn_expiry_sweep(&self) {
        let intents = Arc::clone(&self.intents);
        let grants = Arc::clone(&self.grants);
        let mut shutdown = self.shutdown_rx.clone();
        let interval = Duration::from_secs(self.config.intent.sweep_interval_secs);

        tokio::spawn(async move {
            info!(interval_secs = interval.as_secs(), "expiry sweep task started");
            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                    () = tokio::time::sleep(interval) => {
                        intents.sweep_expired();
                        grants.sweep_expired();
                    }
                }
            }
            info!("expiry sweep task stopped");
        });
    }
}
