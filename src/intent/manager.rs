//! Payment intent lifecycle and confirmation pipeline.
//!
//! `confirm_intent` drives the strictly sequential chain
//! observe → request attestation → poll → verify → grant. Across
//! invocations, only the intent's current status (claimed atomically in
//! the store) decides whether work proceeds, giving effectively-serial
//! semantics per intent despite concurrent entry.

use super::store::{BeginConfirmation, IntentStatus, IntentStore, PaymentIntent};
use crate::attestation::{verify, AttestationRequester, ExpectedPayment, PollResult};
use crate::clock::Clock;
use crate::config::IntentConfig;
use crate::error::{Error, Result};
use crate::event::{GatewayEvent, GatewayEventsSender};
use crate::grant::GrantAuthority;
use crate::id::IdGenerator;
use crate::ledger::{LedgerObserver, PaymentLookup};
use crate::rates::RateLookup;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{info, warn};

/// What the payer needs to settle an intent.
#[derive(Debug, Clone)]
pub struct PaymentInstructions {
    /// Intent identifier, echoed back on confirmation.
    pub intent_id: String,
    /// Wallet to pay.
    pub destination_wallet: String,
    /// Amount to pay, in drops.
    pub amount_drops: u64,
    /// The quoted USD amount.
    pub amount_usd: f64,
    /// Memo to attach so the payment ties back to the evaluation.
    pub memo: String,
    /// When the payment window closes.
    pub expires_at: DateTime<Utc>,
}

/// Outcome of a successful confirmation.
#[derive(Debug, Clone)]
pub struct ConfirmOutcome {
    /// Whether access was granted.
    pub granted: bool,
    /// The issued (or replayed) grant id.
    pub grant_id: Option<String>,
    /// Expiry of the grant.
    pub expires_at: Option<DateTime<Utc>>,
    /// Whether this is a replay of a previously completed confirmation.
    pub replayed: bool,
}

/// Collaborators the intent manager drives.
pub struct PipelineParts {
    /// Intent persistence.
    pub store: Arc<dyn IntentStore>,
    /// Source-ledger payment observer.
    pub observer: Arc<dyn LedgerObserver>,
    /// Attestation requester.
    pub requester: Arc<AttestationRequester>,
    /// USD to drops conversion.
    pub rates: Arc<dyn RateLookup>,
    /// Access grant authority.
    pub grants: Arc<GrantAuthority>,
    /// Id generation.
    pub ids: Arc<dyn IdGenerator>,
    /// Time source.
    pub clock: Arc<dyn Clock>,
}

/// Creates, confirms and expires payment intents.
pub struct IntentManager {
    parts: PipelineParts,
    config: IntentConfig,
    destination_wallet: String,
    poll_deadline: std::time::Duration,
    events: Option<GatewayEventsSender>,
}

impl IntentManager {
    /// Create an intent manager.
    #[must_use]
    pub fn new(
        parts: PipelineParts,
        config: IntentConfig,
        destination_wallet: String,
        poll_deadline: std::time::Duration,
    ) -> Self {
        Self {
            parts,
            config,
            destination_wallet,
            poll_deadline,
            events: None,
        }
    }

    /// Attach an event sender for pipeline notifications.
    #[must_use]
    pub fn with_events(mut self, events: GatewayEventsSender) -> Self {
        self.events = Some(events);
        self
    }

    /// Create a payment intent and return payment instructions.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IntentConflict`] when a live intent already exists
    /// for the pair, or a rate error when the USD amount cannot be
    /// converted.
    pub async fn create_intent(
        &self,
        evaluation_ref: &str,
        payer_wallet: &str,
        amount_usd: f64,
    ) -> Result<(PaymentIntent, PaymentInstructions)> {
        let amount_drops = self.parts.rates.usd_to_drops(amount_usd).await?;
        let now = self.parts.clock.now();

        let intent = PaymentIntent {
            id: self.parts.ids.next_id("intent"),
            evaluation_ref: evaluation_ref.to_string(),
            payer_wallet: payer_wallet.to_string(),
            destination_wallet: self.destination_wallet.clone(),
            amount_usd,
            amount_drops,
            status: IntentStatus::Pending,
            created_at: now,
            expires_at: now + Duration::minutes(self.config.ttl_minutes),
            confirmed_tx_id: None,
            verification_ref: None,
            failure_reason: None,
        };
        self.parts.store.insert(intent.clone())?;

        info!(
            intent_id = %intent.id,
            evaluation_ref = %evaluation_ref,
            amount_usd,
            amount_drops,
            expires_at = %intent.expires_at,
            "payment intent created"
        );
        self.emit(GatewayEvent::IntentCreated {
            intent_id: intent.id.clone(),
            evaluation_ref: evaluation_ref.to_string(),
        });

        let instructions = PaymentInstructions {
            intent_id: intent.id.clone(),
            destination_wallet: intent.destination_wallet.clone(),
            amount_drops,
            amount_usd,
            memo: evaluation_ref.to_string(),
            expires_at: intent.expires_at,
        };
        Ok((intent, instructions))
    }

    /// Confirm a payment intent against a source-ledger transaction.
    ///
    /// Idempotent: a completed intent replays its stored outcome, and a
    /// failed intent replays its stored failure, without re-running
    /// verification or issuing a second grant.
    ///
    /// # Errors
    ///
    /// - [`Error::IntentExpired`] when the payment window has closed.
    /// - [`Error::IntentAlreadyTerminal`] replaying a stored failure.
    /// - [`Error::ConfirmationInProgress`] when another confirmation is
    ///   in flight.
    /// - [`Error::PaymentNotIncluded`] / [`Error::AttestationTimeout`]
    ///   for retryable conditions; the intent returns to `Pending`.
    /// - [`Error::PaymentFailed`] / [`Error::AttestationFailed`] /
    ///   [`Error::VerificationFailed`] for terminal failures.
    pub async fn confirm_intent(
        &self,
        intent_id: &str,
        source_tx_id: &str,
        grantee_id: &str,
    ) -> Result<ConfirmOutcome> {
        let now = self.parts.clock.now();
        match self.parts.store.begin_confirmation(intent_id, now)? {
            BeginConfirmation::Expired(intent) => {
                info!(intent_id = %intent.id, "confirmation rejected, intent expired");
                self.emit(GatewayEvent::IntentExpired {
                    intent_id: intent.id.clone(),
                });
                Err(Error::IntentExpired(intent.id))
            }
            BeginConfirmation::AlreadyTerminal(intent) => self.replay(&intent),
            BeginConfirmation::InProgress => {
                Err(Error::ConfirmationInProgress(intent_id.to_string()))
            }
            BeginConfirmation::Started(intent) => {
                self.run_pipeline(intent, source_tx_id, grantee_id).await
            }
        }
    }

    /// Fetch an intent by id.
    #[must_use]
    pub fn get_intent(&self, id: &str) -> Option<PaymentIntent> {
        self.parts.store.get(id)
    }

    /// Flip overdue intents to `Expired`. Returns how many flipped.
    pub fn sweep_expired(&self) -> usize {
        let expired = self.parts.store.sweep_expired(self.parts.clock.now());
        for intent in &expired {
            info!(intent_id = %intent.id, "payment intent expired");
            self.emit(GatewayEvent::IntentExpired {
                intent_id: intent.id.clone(),
            });
        }
        expired.len()
    }

    /// Replay the stored outcome of a terminal intent.
    fn replay(&self, intent: &PaymentIntent) -> Result<ConfirmOutcome> {
        match intent.status {
            IntentStatus::Completed => {
                let grant = self
                    .parts
                    .grants
                    .find_for_intent(&intent.id)
                    .ok_or_else(|| Error::GrantNotFound(intent.id.clone()))?;
                info!(intent_id = %intent.id, grant_id = %grant.id, "replaying completed confirmation");
                Ok(ConfirmOutcome {
                    granted: true,
                    grant_id: Some(grant.id),
                    expires_at: Some(grant.expires_at),
                    replayed: true,
                })
            }
            IntentStatus::Failed => Err(Error::IntentAlreadyTerminal {
                id: intent.id.clone(),
                reason: intent.failure_reason.clone(),
            }),
            IntentStatus::Expired => Err(Error::IntentExpired(intent.id.clone())),
            IntentStatus::Pending | IntentStatus::Processing => {
                Err(Error::IntentTransition(intent.id.clone()))
            }
        }
    }

    /// Drive observe → attest → verify → grant for a claimed intent.
    async fn run_pipeline(
        &self,
        intent: PaymentIntent,
        source_tx_id: &str,
        grantee_id: &str,
    ) -> Result<ConfirmOutcome> {
        // 1. Observe the payment on the source ledger.
        let lookup = match self.parts.observer.get_payment(source_tx_id).await {
            Ok(lookup) => lookup,
            Err(err) => {
                self.release_quietly(&intent.id);
                return Err(err);
            }
        };
        let record = match lookup {
            PaymentLookup::Confirmed(record) => record,
            PaymentLookup::NotYetIncluded => {
                self.release_quietly(&intent.id);
                return Err(Error::PaymentNotIncluded(source_tx_id.to_string()));
            }
            PaymentLookup::Failed { reason } => {
                self.fail_intent(&intent.id, &format!("payment failed on ledger: {reason}"));
                return Err(Error::PaymentFailed(reason));
            }
        };
        info!(
            intent_id = %intent.id,
            tx_id = %record.tx_id,
            amount_drops = record.amount_drops,
            ledger_index = record.ledger_index,
            "payment observed on source ledger"
        );
        self.emit(GatewayEvent::PaymentObserved {
            intent_id: intent.id.clone(),
            tx_id: record.tx_id.clone(),
        });

        // 2. Obtain an attestation proof for the payment.
        let request_id = match self.parts.requester.request_attestation(source_tx_id).await {
            Ok(id) => id,
            Err(err) => {
                self.release_quietly(&intent.id);
                return Err(err);
            }
        };
        let proof = match self
            .parts
            .requester
            .poll_for_proof(&request_id, self.poll_deadline)
            .await?
        {
            PollResult::Ready(proof) => proof,
            PollResult::TimedOut { attempts } => {
                warn!(intent_id = %intent.id, attempts, "attestation timed out, releasing intent");
                self.release_quietly(&intent.id);
                return Err(Error::AttestationTimeout { attempts });
            }
            PollResult::Failed { reason } => {
                self.fail_intent(&intent.id, &format!("attestation failed: {reason}"));
                return Err(Error::AttestationFailed(reason));
            }
        };
        self.emit(GatewayEvent::ProofAttested {
            intent_id: intent.id.clone(),
            request_id: request_id.clone(),
        });

        // 3. Verify the attested parameters against the intent.
        let expected = ExpectedPayment {
            source_tx_id: source_tx_id.to_string(),
            amount_drops: intent.amount_drops,
            destination: intent.destination_wallet.clone(),
        };
        let verdict = verify(&proof, &expected);
        if !verdict.valid {
            let reason = verdict.reason.map_or("invalid proof", |r| r.reason());
            warn!(intent_id = %intent.id, reason = %reason, "proof verification failed");
            self.fail_intent(&intent.id, reason);
            self.emit(GatewayEvent::VerificationFailed {
                intent_id: intent.id.clone(),
                reason: reason.to_string(),
            });
            return Err(Error::VerificationFailed {
                reason: reason.to_string(),
            });
        }

        // 4. Grant access, then mark the intent completed. Granting first
        // keeps the invariant that a completed intent always has a grant.
        let grant = self.parts.grants.grant_access(&intent, grantee_id)?;
        self.parts
            .store
            .complete(&intent.id, source_tx_id, &request_id)?;
        info!(
            intent_id = %intent.id,
            grant_id = %grant.id,
            "payment verified, access granted"
        );

        Ok(ConfirmOutcome {
            granted: true,
            grant_id: Some(grant.id),
            expires_at: Some(grant.expires_at),
            replayed: false,
        })
    }

    fn release_quietly(&self, intent_id: &str) {
        if let Err(err) = self.parts.store.release(intent_id) {
            warn!(intent_id = %intent_id, error = %err, "could not release intent");
        }
    }

    fn fail_intent(&self, intent_id: &str, reason: &str) {
        if let Err(err) = self.parts.store.fail(intent_id, reason) {
            warn!(intent_id = %intent_id, error = %err, "could not record intent failure");
        }
    }

    fn emit(&self, event: GatewayEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}
