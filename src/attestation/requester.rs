//! Attestation request submission and proof polling.

use super::proof::{AttestationProof, PollOutcome, PAYMENT_ATTESTATION_TYPE};
use crate::config::AttestationConfig;
use crate::error::Result;
use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Submits attestation requests and polls for their status.
///
/// Implemented over HTTP by [`FdcOracle`](super::FdcOracle); tests inject
/// doubles.
#[async_trait]
pub trait AttestationOracle: Send + Sync {
    /// Submit an attestation request for the given source transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be delivered.
    async fn submit_request(
        &self,
        request_id: &str,
        attestation_type: &str,
        source_id: &str,
        tx_id: &str,
    ) -> Result<()>;

    /// Poll the status of a previously submitted request.
    ///
    /// # Errors
    ///
    /// Returns an error if the poll call cannot be completed; the caller
    /// treats such errors as "not yet".
    async fn poll(&self, request_id: &str) -> Result<PollOutcome>;
}

/// Compute the deterministic attestation request id.
///
/// Re-submission for the same `(type, source, transaction)` yields the
/// same identifier, so concurrent callers converge on one oracle job.
#[must_use]
pub fn request_id(attestation_type: &str, source_id: &str, tx_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(attestation_type.as_bytes());
    hasher.update([0x1f]);
    hasher.update(source_id.as_bytes());
    hasher.update([0x1f]);
    hasher.update(tx_id.as_bytes());
    hex::encode(hasher.finalize())
}

/// Result of polling for a proof up to a deadline.
#[derive(Debug, Clone)]
pub enum PollResult {
    /// The proof arrived within the deadline.
    Ready(AttestationProof),
    /// The attempt budget or deadline was exhausted. Resubmission, not a
    /// new payment, is the correct remedy.
    TimedOut {
        /// Number of polls performed.
        attempts: u32,
    },
    /// The oracle reported a terminal failure.
    Failed {
        /// Oracle-supplied reason.
        reason: String,
    },
}

/// Cache statistics for monitoring.
#[derive(Debug, Default, Clone)]
pub struct ProofCacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of proofs added.
    pub additions: u64,
}

/// LRU cache of attested proofs keyed by request id.
///
/// A proof that has already been attested never goes back to the oracle,
/// so retried confirmations are free.
#[derive(Clone)]
struct ProofCache {
    inner: Arc<Mutex<LruCache<String, AttestationProof>>>,
    stats: Arc<Mutex<ProofCacheStats>>,
}

impl ProofCache {
    fn with_capacity(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Arc::new(Mutex::new(LruCache::new(cap))),
            stats: Arc::new(Mutex::new(ProofCacheStats::default())),
        }
    }

    fn get(&self, request_id: &str) -> Option<AttestationProof> {
        let mut cache = self.inner.lock();
        let found = cache.get(request_id).cloned();

        let mut stats = self.stats.lock();
        if found.is_some() {
            stats.hits += 1;
        } else {
            stats.misses += 1;
        }
        found
    }

    fn insert(&self, proof: AttestationProof) {
        let mut cache = self.inner.lock();
        cache.put(proof.request_id.clone(), proof);
        self.stats.lock().additions += 1;
    }

    fn stats(&self) -> ProofCacheStats {
        self.stats.lock().clone()
    }
}

/// Obtains attestation proofs for source-ledger payments.
pub struct AttestationRequester {
    oracle: Arc<dyn AttestationOracle>,
    cache: ProofCache,
    config: AttestationConfig,
}

impl AttestationRequester {
    /// Create a requester over the given oracle.
    #[must_use]
    pub fn new(oracle: Arc<dyn AttestationOracle>, config: AttestationConfig) -> Self {
        let cache = ProofCache::with_capacity(config.proof_cache_capacity);
        Self {
            oracle,
            cache,
            config,
        }
    }

    /// Submit an attestation request for a payment transaction.
    ///
    /// Returns the deterministic request id. When the proof is already
    /// cached the oracle is not contacted again.
    ///
    /// # Errors
    ///
    /// Returns an error if the submission cannot be delivered.
    pub async fn request_attestation(&self, tx_id: &str) -> Result<String> {
        let id = request_id(PAYMENT_ATTESTATION_TYPE, &self.config.source_id, tx_id);

        if self.cache.get(&id).is_some() {
            debug!(request_id = %id, "proof already attested, skipping submission");
            return Ok(id);
        }

        self.oracle
            .submit_request(&id, PAYMENT_ATTESTATION_TYPE, &self.config.source_id, tx_id)
            .await?;
        info!(request_id = %id, tx_id = %tx_id, "attestation request submitted");
        Ok(id)
    }

    /// Poll until a proof (or terminal failure) is available, the attempt
    /// budget is spent, or the deadline passes.
    ///
    /// A poll tick that errors counts as "not yet" rather than failure;
    /// only an explicit terminal reply from the oracle ends the loop
    /// early.
    ///
    /// # Errors
    ///
    /// This method itself does not fail; transient poll errors are
    /// absorbed into the timeout budget.
    pub async fn poll_for_proof(&self, request_id: &str, deadline: Duration) -> Result<PollResult> {
        if let Some(proof) = self.cache.get(request_id) {
            return Ok(PollResult::Ready(proof));
        }

        let interval = self.config.poll_interval();
        let deadline_at = tokio::time::Instant::now() + deadline;
        let max_attempts = self.config.max_poll_attempts.max(1);

        for attempt in 1..=max_attempts {
            match self.oracle.poll(request_id).await {
                Ok(PollOutcome::Ready(proof)) => {
                    info!(request_id = %request_id, voting_round = proof.voting_round, "proof attested");
                    self.cache.insert(proof.clone());
                    return Ok(PollResult::Ready(proof));
                }
                Ok(PollOutcome::Failed { reason }) => {
                    warn!(request_id = %request_id, reason = %reason, "attestation failed");
                    return Ok(PollResult::Failed { reason });
                }
                Ok(PollOutcome::Pending) => {
                    debug!(request_id = %request_id, attempt, "proof not yet available");
                }
                Err(err) => {
                    // A failed poll is indistinguishable from "not yet".
                    debug!(request_id = %request_id, attempt, error = %err, "poll errored, treating as pending");
                }
            }

            if attempt == max_attempts || tokio::time::Instant::now() + interval > deadline_at {
                return Ok(PollResult::TimedOut { attempts: attempt });
            }
            tokio::time::sleep(interval).await;
        }

        Ok(PollResult::TimedOut {
            attempts: max_attempts,
        })
    }

    /// Proof cache statistics.
    #[must_use]
    pub fn cache_stats(&self) -> ProofCacheStats {
        self.cache.stats()
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn test_config() -> AttestationConfig {
        AttestationConfig {
            poll_interval_secs: 0,
            max_poll_attempts: 3,
            source_id: "testXRP".to_string(),
            proof_cache_capacity: 16,
        }
    }

    fn proof_for(request_id: &str) -> AttestationProof {
        AttestationProof {
            request_id: request_id.to_string(),
            source_tx_id: "ABC123".to_string(),
            voting_round: 7,
            merkle_root: None,
            merkle_proof: Vec::new(),
            attested_amount: 100,
            attested_destination: "rGateway222".to_string(),
            attested_success: true,
        }
    }

    /// Oracle double that yields a scripted sequence of poll outcomes.
    struct ScriptedOracle {
        submissions: AtomicU32,
        polls: AtomicU32,
        script: Vec<ScriptStep>,
    }

    enum ScriptStep {
        Pending,
        Error,
        Ready,
        Failed(&'static str),
    }

    impl ScriptedOracle {
        fn new(script: Vec<ScriptStep>) -> Self {
            Self {
                submissions: AtomicU32::new(0),
                polls: AtomicU32::new(0),
                script,
            }
        }
    }

    #[async_trait]
    impl AttestationOracle for ScriptedOracle {
        async fn submit_request(
            &self,
            _request_id: &str,
            _attestation_type: &str,
            _source_id: &str,
            _tx_id: &str,
        ) -> Result<()> {
            self.submissions.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn poll(&self, request_id: &str) -> Result<PollOutcome> {
            let idx = self.polls.fetch_add(1, Ordering::SeqCst) as usize;
            match self.script.get(idx).unwrap_or(&ScriptStep::Pending) {
                ScriptStep::Pending => Ok(PollOutcome::Pending),
                ScriptStep::Error => Err(Error::Rpc("oracle unreachable".to_string())),
                ScriptStep::Ready => Ok(PollOutcome::Ready(proof_for(request_id))),
                ScriptStep::Failed(reason) => Ok(PollOutcome::Failed {
                    reason: (*reason).to_string(),
                }),
            }
        }
    }

    #[test]
    fn test_request_id_is_deterministic() {
        let a = request_id("Payment", "testXRP", "ABC123");
        let b = request_id("Payment", "testXRP", "ABC123");
        assert_eq!(a, b);
        assert_ne!(a, request_id("Payment", "testXRP", "ABC124"));
        assert_ne!(a, request_id("Payment", "XRP", "ABC123"));
    }

    #[tokio::test]
    async fn test_poll_until_ready() {
        let oracle = Arc::new(ScriptedOracle::new(vec![
            ScriptStep::Pending,
            ScriptStep::Ready,
        ]));
        let requester = AttestationRequester::new(oracle, test_config());

        let id = requester.request_attestation("ABC123").await.expect("submit");
        let result = requester
            .poll_for_proof(&id, Duration::from_secs(60))
            .await
            .expect("poll");
        assert!(matches!(result, PollResult::Ready(_)));
    }

    #[tokio::test]
    async fn test_poll_errors_count_as_pending() {
        let oracle = Arc::new(ScriptedOracle::new(vec![
            ScriptStep::Error,
            ScriptStep::Error,
            ScriptStep::Ready,
        ]));
        let requester = AttestationRequester::new(oracle, test_config());

        let result = requester
            .poll_for_proof("req-1", Duration::from_secs(60))
            .await
            .expect("poll");
        assert!(matches!(result, PollResult::Ready(_)));
    }

    #[tokio::test]
    async fn test_poll_budget_exhaustion_times_out() {
        let oracle = Arc::new(ScriptedOracle::new(vec![
            ScriptStep::Pending,
            ScriptStep::Pending,
            ScriptStep::Pending,
            ScriptStep::Pending,
        ]));
        let requester = AttestationRequester::new(oracle.clone(), test_config());

        let result = requester
            .poll_for_proof("req-1", Duration::from_secs(60))
            .await
            .expect("poll");
        let PollResult::TimedOut { attempts } = result else {
            panic!("expected timeout");
        };
        assert_eq!(attempts, 3);
        assert_eq!(oracle.polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_terminal_failure_ends_polling() {
        let oracle = Arc::new(ScriptedOracle::new(vec![ScriptStep::Failed(
            "source tx not found",
        )]));
        let requester = AttestationRequester::new(oracle.clone(), test_config());

        let result = requester
            .poll_for_proof("req-1", Duration::from_secs(60))
            .await
            .expect("poll");
        let PollResult::Failed { reason } = result else {
            panic!("expected failure");
        };
        assert_eq!(reason, "source tx not found");
        assert_eq!(oracle.polls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cached_proof_skips_oracle() {
        let oracle = Arc::new(ScriptedOracle::new(vec![ScriptStep::Ready]));
        let requester = AttestationRequester::new(oracle.clone(), test_config());

        let id = requester.request_attestation("ABC123").await.expect("submit");
        let first = requester
            .poll_for_proof(&id, Duration::from_secs(60))
            .await
            .expect("poll");
        assert!(matches!(first, PollResult::Ready(_)));

        // Second submission and poll are served from the cache.
        let id_again = requester.request_attestation("ABC123").await.expect("submit");
        assert_eq!(id, id_again);
        let second = requester
            .poll_for_proof(&id, Duration::from_secs(60))
            .await
            .expect("poll");
        assert!(matches!(second, PollResult::Ready(_)));

        assert_eq!(oracle.submissions.load(Ordering::SeqCst), 1);
        assert_eq!(oracle.polls.load(Ordering::SeqCst), 1);
        assert_eq!(requester.cache_stats().additions, 1);
    }

    #[tokio::test]
    async fn test_deadline_cuts_polling_short() {
        let mut config = test_config();
        config.poll_interval_secs = 5;
        config.max_poll_attempts = 30;
        let oracle = Arc::new(ScriptedOracle::new(vec![ScriptStep::Pending]));
        let requester = AttestationRequester::new(oracle.clone(), config);

        // Deadline shorter than one interval: a single poll, then timeout.
        let result = requester
            .poll_for_proof("req-1", Duration::from_secs(1))
            .await
            .expect("poll");
        let PollResult::TimedOut { attempts } = result else {
            panic!("expected timeout");
        };
        assert_eq!(attempts, 1);
    }
}
