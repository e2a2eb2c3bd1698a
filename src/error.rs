//! Error types for medgate.

use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the payment verification and access-grant pipeline.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration file could not be read or parsed.
    #[error("configuration error: {0}")]
    Config(String),

    /// A network call failed after exhausting retries on the healthy pool.
    #[error("no provider available for {operation}: {last_error}")]
    AllProvidersUnavailable {
        /// Name of the operation that was attempted.
        operation: String,
        /// The last error observed before giving up.
        last_error: String,
    },

    /// An endpoint reported a cross-origin or connectivity policy failure.
    /// The endpoint has been failed over permanently.
    #[error("permanent connectivity failure on {endpoint}: {reason}")]
    PermanentConnectivity {
        /// The endpoint URL that failed.
        endpoint: String,
        /// The policy failure description.
        reason: String,
    },

    /// An upstream RPC returned a well-formed but non-retryable error.
    #[error("rpc error: {0}")]
    Rpc(String),

    /// No payment intent exists with the given id.
    #[error("payment intent not found: {0}")]
    IntentNotFound(String),

    /// An active intent already exists for the (evaluation, payer) pair.
    #[error("active payment intent already exists for {evaluation_ref}/{payer_wallet}")]
    IntentConflict {
        /// The evaluation the intent was created for.
        evaluation_ref: String,
        /// The paying wallet.
        payer_wallet: String,
    },

    /// The intent's payment window has closed.
    #[error("payment intent {0} has expired")]
    IntentExpired(String),

    /// The intent already reached a terminal state; the stored outcome is
    /// replayed instead of re-running verification.
    #[error("payment intent {id} was already processed")]
    IntentAlreadyTerminal {
        /// The intent id.
        id: String,
        /// The stored failure reason, when the terminal state was `Failed`.
        reason: Option<String>,
    },

    /// Another confirmation for the same intent is currently in flight.
    #[error("confirmation already in progress for intent {0}")]
    ConfirmationInProgress(String),

    /// An intent transition was attempted from an incompatible state.
    #[error("intent {0} is not in the expected state for this transition")]
    IntentTransition(String),

    /// The source transaction is not yet included in a validated ledger.
    #[error("payment {0} not yet included in a validated ledger")]
    PaymentNotIncluded(String),

    /// The source transaction was included but did not succeed.
    #[error("payment failed on ledger: {0}")]
    PaymentFailed(String),

    /// The attestation proof did not match the expected payment parameters.
    #[error("verification failed: {reason}")]
    VerificationFailed {
        /// The first check that failed.
        reason: String,
    },

    /// The oracle did not produce a proof before the deadline. The caller
    /// should resubmit the confirmation, not make a new payment.
    #[error("attestation timed out after {attempts} polls")]
    AttestationTimeout {
        /// Number of polls performed before giving up.
        attempts: u32,
    },

    /// The oracle reported a terminal failure for the attestation request.
    #[error("attestation failed: {0}")]
    AttestationFailed(String),

    /// No grant exists with the given id.
    #[error("access grant not found: {0}")]
    GrantNotFound(String),

    /// A grant lifecycle transition was attempted from an invalid state.
    #[error("invalid grant state: {0}")]
    GrantState(String),

    /// USD-to-drops rate conversion failed.
    #[error("rate lookup failed: {0}")]
    Rate(String),

    /// Payment submission requested but no wallet signer is configured.
    #[error("no wallet signer configured")]
    SignerUnavailable,

    /// IO error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Stable machine-readable reason code for API responses.
    ///
    /// Distinguishes "retry later", "do not retry, payment invalid", and
    /// "do not retry, already processed".
    #[must_use]
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::Config(_) | Self::Io(_) | Self::IntentTransition(_) => "internal",
            Self::AllProvidersUnavailable { .. } | Self::PermanentConnectivity { .. } => {
                "service_degraded"
            }
            Self::Rpc(_) => "upstream_error",
            Self::IntentNotFound(_) | Self::GrantNotFound(_) => "not_found",
            Self::IntentConflict { .. } => "intent_conflict",
            Self::IntentExpired(_) => "intent_expired",
            Self::IntentAlreadyTerminal { .. } => "already_processed",
            Self::ConfirmationInProgress(_)
            | Self::PaymentNotIncluded(_)
            | Self::AttestationTimeout { .. } => "retry_later",
            Self::PaymentFailed(_)
            | Self::VerificationFailed { .. }
            | Self::AttestationFailed(_) => "payment_invalid",
            Self::GrantState(_) => "grant_state",
            Self::Rate(_) => "rate_unavailable",
            Self::SignerUnavailable => "signer_unavailable",
        }
    }

    /// Whether the caller may retry the same operation and expect it to
    /// eventually succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::AllProvidersUnavailable { .. }
                | Self::ConfirmationInProgress(_)
                | Self::PaymentNotIncluded(_)
                | Self::AttestationTimeout { .. }
        )
    }
}
