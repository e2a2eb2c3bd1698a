//! Payment intent records and persistence.
//!
//! The store owns the atomic state transitions the pipeline relies on:
//! the winner of two concurrent confirmations is decided by a single
//! check-and-set under the store's lock, never by the callers.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Lifecycle status of a payment intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentStatus {
    /// Awaiting payment confirmation.
    Pending,
    /// A confirmation is driving the verification pipeline.
    Processing,
    /// Payment verified, grant issued. Terminal.
    Completed,
    /// Verification failed. Terminal.
    Failed,
    /// Payment window closed before confirmation. Terminal.
    Expired,
}

impl IntentStatus {
    /// Whether this status is terminal and immutable.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Expired)
    }
}

/// A server-side record of an expected payment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentIntent {
    /// Intent identifier.
    pub id: String,
    /// Evaluation the payment is for.
    pub evaluation_ref: String,
    /// Wallet expected to pay.
    pub payer_wallet: String,
    /// Gateway wallet the payment must be delivered to.
    pub destination_wallet: String,
    /// Quoted fee in USD.
    pub amount_usd: f64,
    /// Quoted fee in drops.
    pub amount_drops: u64,
    /// Lifecycle status.
    pub status: IntentStatus,
    /// When the intent was created.
    pub created_at: DateTime<Utc>,
    /// When the payment window closes.
    pub expires_at: DateTime<Utc>,
    /// Confirmed source transaction, once completed.
    pub confirmed_tx_id: Option<String>,
    /// Attestation request id the verification was based on.
    pub verification_ref: Option<String>,
    /// Recorded reason, once failed.
    pub failure_reason: Option<String>,
}

/// Atomic outcome of attempting to start a confirmation.
#[derive(Debug, Clone)]
pub enum BeginConfirmation {
    /// The caller won the race; the intent is now `Processing`.
    Started(PaymentIntent),
    /// The intent already reached a terminal state.
    AlreadyTerminal(PaymentIntent),
    /// Another confirmation currently holds the intent.
    InProgress,
    /// The payment window closed; the intent was flipped to `Expired`.
    Expired(PaymentIntent),
}

/// Narrow persistence interface for payment intents.
pub trait IntentStore: Send + Sync {
    /// Insert a new intent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IntentConflict`] if a live (non-terminal,
    /// unexpired) intent already exists for the
    /// `(evaluation_ref, payer_wallet)` pair.
    fn insert(&self, intent: PaymentIntent) -> Result<()>;

    /// Fetch an intent by id.
    fn get(&self, id: &str) -> Option<PaymentIntent>;

    /// Find the live intent for a pair, if any.
    fn find_active(
        &self,
        evaluation_ref: &str,
        payer_wallet: &str,
        now: DateTime<Utc>,
    ) -> Option<PaymentIntent>;

    /// Atomically claim an intent for confirmation.
    ///
    /// Checks expiry (flipping to `Expired` as a side effect when due),
    /// terminal status, and in-flight processing in one step.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IntentNotFound`] if no such intent exists.
    fn begin_confirmation(&self, id: &str, now: DateTime<Utc>) -> Result<BeginConfirmation>;

    /// Transition `Processing → Completed`, recording the confirmed
    /// transaction and the attestation reference.
    ///
    /// # Errors
    ///
    /// Returns an error if the intent is missing, expired, or not
    /// currently processing.
    fn complete(&self, id: &str, tx_id: &str, verification_ref: &str) -> Result<PaymentIntent>;

    /// Transition `Processing → Failed`, recording the reason.
    ///
    /// # Errors
    ///
    /// Returns an error if the intent is missing, expired, or not
    /// currently processing.
    fn fail(&self, id: &str, reason: &str) -> Result<PaymentIntent>;

    /// Transition `Processing → Pending`, releasing the intent for a
    /// later confirmation attempt (attestation timeout path).
    ///
    /// # Errors
    ///
    /// Returns an error if the intent is missing, expired, or not
    /// currently processing.
    fn release(&self, id: &str) -> Result<PaymentIntent>;

    /// Flip overdue non-terminal intents to `Expired` and return them.
    fn sweep_expired(&self, now: DateTime<Utc>) -> Vec<PaymentIntent>;
}

/// Mutex-guarded in-memory intent store.
#[derive(Default)]
pub struct InMemoryIntentStore {
    inner: Mutex<HashMap<String, PaymentIntent>>,
}

impl InMemoryIntentStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn from_processing(
        &self,
        id: &str,
        apply: impl FnOnce(&mut PaymentIntent),
    ) -> Result<PaymentIntent> {
        let mut intents = self.inner.lock();
        let intent = intents
            .get_mut(id)
            .ok_or_else(|| Error::IntentNotFound(id.to_string()))?;
        match intent.status {
            IntentStatus::Processing => {
                apply(intent);
                Ok(intent.clone())
            }
            // The sweep may have expired the intent mid-pipeline.
            IntentStatus::Expired => Err(Error::IntentExpired(id.to_string())),
            _ => Err(Error::IntentTransition(id.to_string())),
        }
    }
}

impl IntentStore for InMemoryIntentStore {
    fn insert(&self, intent: PaymentIntent) -> Result<()> {
        let mut intents = self.inner.lock();
        let live = intents.values().any(|existing| {
            !existing.status.is_terminal()
                && existing.expires_at > intent.created_at
                && existing.evaluation_ref == intent.evaluation_ref
                && existing.payer_wallet == intent.payer_wallet
        });
        if live {
            return Err(Error::IntentConflict {
                evaluation_ref: intent.evaluation_ref,
                payer_wallet: intent.payer_wallet,
            });
        }
        intents.insert(intent.id.clone(), intent);
        Ok(())
    }

    fn get(&self, id: &str) -> Option<PaymentIntent> {
        self.inner.lock().get(id).cloned()
    }

    fn find_active(
        &self,
        evaluation_ref: &str,
        payer_wallet: &str,
        now: DateTime<Utc>,
    ) -> Option<PaymentIntent> {
        self.inner
            .lock()
            .values()
            .find(|intent| {
                !intent.status.is_terminal()
                    && intent.expires_at > now
                    && intent.evaluation_ref == evaluation_ref
                    && intent.payer_wallet == payer_wallet
            })
            .cloned()
    }

    fn begin_confirmation(&self, id: &str, now: DateTime<Utc>) -> Result<BeginConfirmation> {
        let mut intents = self.inner.lock();
        let intent = intents
            .get_mut(id)
            .ok_or_else(|| Error::IntentNotFound(id.to_string()))?;

        if intent.status.is_terminal() {
            return Ok(BeginConfirmation::AlreadyTerminal(intent.clone()));
        }
        if intent.expires_at <= now {
            intent.status = IntentStatus::Expired;
            return Ok(BeginConfirmation::Expired(intent.clone()));
        }
        if intent.status == IntentStatus::Processing {
            return Ok(BeginConfirmation::InProgress);
        }
        intent.status = IntentStatus::Processing;
        Ok(BeginConfirmation::Started(intent.clone()))
    }

    fn complete(&self, id: &str, tx_id: &str, verification_ref: &str) -> Result<PaymentIntent> {
        self.from_processing(id, |intent| {
            intent.status = IntentStatus::Completed;
            intent.confirmed_tx_id = Some(tx_id.to_string());
            intent.verification_ref = Some(verification_ref.to_string());
        })
    }

    fn fail(&self, id: &str, reason: &str) -> Result<PaymentIntent> {
        self.from_processing(id, |intent| {
            intent.status = IntentStatus::Failed;
            intent.failure_reason = Some(reason.to_string());
        })
    }

    fn release(&self, id: &str) -> Result<PaymentIntent> {
        self.from_processing(id, |intent| {
            intent.status = IntentStatus::Pending;
        })
    }

    fn sweep_expired(&self, now: DateTime<Utc>) -> Vec<PaymentIntent> {
        let mut intents = self.inner.lock();
        let mut expired = Vec::new();
        for intent in intents.values_mut() {
            if !intent.status.is_terminal() && intent.expires_at <= now {
                intent.status = IntentStatus::Expired;
                expired.push(intent.clone());
            }
        }
        expired
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn intent(id: &str, eval: &str, payer: &str, now: DateTime<Utc>) -> PaymentIntent {
        PaymentIntent {
            id: id.to_string(),
            evaluation_ref: eval.to_string(),
            payer_wallet: payer.to_string(),
            destination_wallet: "rGateway222".to_string(),
            amount_usd: 15.0,
            amount_drops: 30_000_000,
            status: IntentStatus::Pending,
            created_at: now,
            expires_at: now + Duration::minutes(30),
            confirmed_tx_id: None,
            verification_ref: None,
            failure_reason: None,
        }
    }

    #[test]
    fn test_insert_rejects_duplicate_live_pair() {
        let store = InMemoryIntentStore::new();
        let now = Utc::now();
        store.insert(intent("intent-1", "E1", "W1", now)).expect("insert");

        let result = store.insert(intent("intent-2", "E1", "W1", now));
        assert!(matches!(result, Err(Error::IntentConflict { .. })));

        // Different payer or evaluation is fine.
        store.insert(intent("intent-3", "E1", "W2", now)).expect("insert");
        store.insert(intent("intent-4", "E2", "W1", now)).expect("insert");
    }

    #[test]
    fn test_insert_allows_pair_after_expiry() {
        let store = InMemoryIntentStore::new();
        let now = Utc::now();
        store.insert(intent("intent-1", "E1", "W1", now)).expect("insert");

        // A new intent created after the first's window closed is allowed
        // even before the sweep runs.
        let later = now + Duration::minutes(31);
        store.insert(intent("intent-2", "E1", "W1", later)).expect("insert");
    }

    #[test]
    fn test_begin_confirmation_claims_once() {
        let store = InMemoryIntentStore::new();
        let now = Utc::now();
        store.insert(intent("intent-1", "E1", "W1", now)).expect("insert");

        let first = store.begin_confirmation("intent-1", now).expect("begin");
        assert!(matches!(first, BeginConfirmation::Started(_)));

        let second = store.begin_confirmation("intent-1", now).expect("begin");
        assert!(matches!(second, BeginConfirmation::InProgress));
    }

    #[test]
    fn test_begin_confirmation_expires_overdue_intent() {
        let store = InMemoryIntentStore::new();
        let now = Utc::now();
        store.insert(intent("intent-1", "E1", "W1", now)).expect("insert");

        let later = now + Duration::minutes(31);
        let outcome = store.begin_confirmation("intent-1", later).expect("begin");
        let BeginConfirmation::Expired(expired) = outcome else {
            panic!("expected expiry");
        };
        assert_eq!(expired.status, IntentStatus::Expired);

        // Terminal from here on.
        let outcome = store.begin_confirmation("intent-1", later).expect("begin");
        assert!(matches!(outcome, BeginConfirmation::AlreadyTerminal(_)));
    }

    #[test]
    fn test_terminal_states_are_immutable() {
        let store = InMemoryIntentStore::new();
        let now = Utc::now();
        store.insert(intent("intent-1", "E1", "W1", now)).expect("insert");
        store.begin_confirmation("intent-1", now).expect("begin");
        store
            .complete("intent-1", "ABC123", "req-1")
            .expect("complete");

        assert!(store.fail("intent-1", "nope").is_err());
        assert!(store.release("intent-1").is_err());
        let outcome = store.begin_confirmation("intent-1", now).expect("begin");
        let BeginConfirmation::AlreadyTerminal(stored) = outcome else {
            panic!("expected terminal");
        };
        assert_eq!(stored.status, IntentStatus::Completed);
        assert_eq!(stored.confirmed_tx_id.as_deref(), Some("ABC123"));
        assert_eq!(stored.verification_ref.as_deref(), Some("req-1"));
    }

    #[test]
    fn test_release_returns_intent_to_pending() {
        let store = InMemoryIntentStore::new();
        let now = Utc::now();
        store.insert(intent("intent-1", "E1", "W1", now)).expect("insert");
        store.begin_confirmation("intent-1", now).expect("begin");

        let released = store.release("intent-1").expect("release");
        assert_eq!(released.status, IntentStatus::Pending);

        // Claimable again.
        let outcome = store.begin_confirmation("intent-1", now).expect("begin");
        assert!(matches!(outcome, BeginConfirmation::Started(_)));
    }

    #[test]
    fn test_sweep_expires_pending_and_processing() {
        let store = InMemoryIntentStore::new();
        let now = Utc::now();
        store.insert(intent("intent-1", "E1", "W1", now)).expect("insert");
        store.insert(intent("intent-2", "E2", "W1", now)).expect("insert");
        store.begin_confirmation("intent-2", now).expect("begin");

        let expired = store.sweep_expired(now + Duration::minutes(31));
        assert_eq!(expired.len(), 2);
        assert!(expired.iter().all(|i| i.status == IntentStatus::Expired));

        // A second sweep finds nothing.
        assert!(store.sweep_expired(now + Duration::hours(2)).is_empty());
    }
}
