//! Source-ledger (XRPL) payment observation.
//!
//! The observer submits and looks up payments on the source ledger,
//! returning normalized payment records. A lookup distinguishes three
//! outcomes: the payment is validated and successful, the payment is not
//! yet included in a validated ledger (retryable), or the payment was
//! included but failed (terminal). All calls are routed through the
//! [`ConnectionManager`](crate::connection::ConnectionManager).

pub mod wire;

use crate::connection::ConnectionManager;
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info};

/// A normalized, validated payment observed on the source ledger.
#[derive(Debug, Clone)]
pub struct PaymentRecord {
    /// Transaction hash.
    pub tx_id: String,
    /// Delivered amount in drops.
    pub amount_drops: u64,
    /// Paying wallet address.
    pub source_address: String,
    /// Receiving wallet address.
    pub destination_address: String,
    /// Index of the validated ledger containing the transaction.
    pub ledger_index: u64,
    /// Close time of the containing ledger.
    pub timestamp: DateTime<Utc>,
    /// Decoded memo, when present.
    pub memo: Option<String>,
}

/// Tagged outcome of a payment lookup.
///
/// "Not yet included" is retryable; "failed" is terminal and must not be
/// retried indefinitely.
#[derive(Debug, Clone)]
pub enum PaymentLookup {
    /// The payment is in a validated ledger and succeeded.
    Confirmed(PaymentRecord),
    /// The transaction is unknown or not yet in a validated ledger.
    NotYetIncluded,
    /// The transaction is in a validated ledger but did not succeed.
    Failed {
        /// Ledger engine result code.
        reason: String,
    },
}

/// Observes and submits payments on the source ledger.
#[async_trait]
pub trait LedgerObserver: Send + Sync {
    /// Submit a payment and return the transaction hash.
    ///
    /// # Errors
    ///
    /// Returns an error if no signer is configured or submission fails.
    async fn submit_payment(
        &self,
        destination: &str,
        amount_drops: u64,
        memo: &str,
    ) -> Result<String>;

    /// Look up a payment by transaction hash.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup cannot be completed against any
    /// endpoint.
    async fn get_payment(&self, tx_id: &str) -> Result<PaymentLookup>;
}

/// Produces signed transaction blobs for payment submission.
///
/// Signing is a collaborator concern; a deployment that never submits
/// payments on behalf of clients simply configures no signer.
#[async_trait]
pub trait WalletSigner: Send + Sync {
    /// Sign a payment and return the serialized transaction blob.
    ///
    /// # Errors
    ///
    /// Returns an error if signing fails.
    async fn sign_payment(
        &self,
        destination: &str,
        amount_drops: u64,
        memo: &str,
    ) -> Result<String>;
}

/// XRPL JSON-RPC ledger observer.
pub struct XrplObserver {
    manager: Arc<ConnectionManager>,
    signer: Option<Arc<dyn WalletSigner>>,
}

impl XrplObserver {
    /// Create an observer routing calls through the given manager.
    #[must_use]
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        Self {
            manager,
            signer: None,
        }
    }

    /// Attach a wallet signer for payment submission.
    #[must_use]
    pub fn with_signer(mut self, signer: Arc<dyn WalletSigner>) -> Self {
        self.signer = Some(signer);
        self
    }
}

#[async_trait]
impl LedgerObserver for XrplObserver {
    async fn submit_payment(
        &self,
        destination: &str,
        amount_drops: u64,
        memo: &str,
    ) -> Result<String> {
        let signer = self.signer.as_ref().ok_or(Error::SignerUnavailable)?;
        let blob = signer.sign_payment(destination, amount_drops, memo).await?;

        let tx_id = self
            .manager
            .execute("xrpl_submit", move |handle| {
                let body = wire::submit_body(&blob);
                async move {
                    let reply = handle.post_json(&body).await?;
                    wire::parse_submit(&reply)
                }
            })
            .await?;

        info!(tx_id = %tx_id, destination = %destination, amount_drops, "payment submitted");
        Ok(tx_id)
    }

    async fn get_payment(&self, tx_id: &str) -> Result<PaymentLookup> {
        let body = wire::tx_body(tx_id);
        let lookup = self
            .manager
            .execute("xrpl_tx", move |handle| {
                let body = body.clone();
                async move {
                    let reply = handle.post_json(&body).await?;
                    wire::parse_tx(&reply)
                }
            })
            .await?;

        match &lookup {
            PaymentLookup::Confirmed(record) => {
                debug!(tx_id = %tx_id, amount_drops = record.amount_drops, "payment validated")
            }
            PaymentLookup::NotYetIncluded => {
                debug!(tx_id = %tx_id, "payment not yet in a validated ledger")
            }
            PaymentLookup::Failed { reason } => {
                debug!(tx_id = %tx_id, reason = %reason, "payment failed on ledger")
            }
        }
        Ok(lookup)
    }
}
