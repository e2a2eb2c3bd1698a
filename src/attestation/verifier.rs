//! Proof verification against expected payment parameters.
//!
//! Deterministic and side-effect-free so it can be unit-tested from
//! stored fixtures.

use super::proof::AttestationProof;

/// The payment parameters a proof is checked against.
#[derive(Debug, Clone)]
pub struct ExpectedPayment {
    /// The transaction the client claims paid for the intent.
    pub source_tx_id: String,
    /// Minimum acceptable delivered amount in drops.
    pub amount_drops: u64,
    /// The gateway wallet the payment must have been delivered to.
    pub destination: String,
}

/// The first check a proof failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyFailure {
    /// Attested transaction id differs from the expected one.
    TransactionMismatch,
    /// Attested amount is below the expected amount.
    InsufficientAmount,
    /// Attested destination differs from the expected wallet.
    DestinationMismatch,
    /// The attested transaction did not succeed at ledger level.
    PaymentNotSuccessful,
}

impl VerifyFailure {
    /// Stable reason string surfaced to callers.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::TransactionMismatch => "transaction mismatch",
            Self::InsufficientAmount => "insufficient amount",
            Self::DestinationMismatch => "destination mismatch",
            Self::PaymentNotSuccessful => "payment not successful",
        }
    }
}

impl std::fmt::Display for VerifyFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.reason())
    }
}

/// Outcome of verifying a proof.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    /// Whether all checks passed.
    pub valid: bool,
    /// The first failing check, when invalid.
    pub reason: Option<VerifyFailure>,
}

impl Verdict {
    fn ok() -> Self {
        Self {
            valid: true,
            reason: None,
        }
    }

    fn fail(reason: VerifyFailure) -> Self {
        Self {
            valid: false,
            reason: Some(reason),
        }
    }
}

/// Verify a proof against expected payment parameters.
///
/// Checks in order, short-circuiting on the first failure:
/// 1. attested transaction id matches exactly,
/// 2. attested amount is at least the expected amount (overpayment is
///    acceptable, underpayment is not),
/// 3. attested destination matches exactly,
/// 4. attested status indicates ledger-level success.
#[must_use]
pub fn verify(proof: &AttestationProof, expected: &ExpectedPayment) -> Verdict {
    if proof.source_tx_id != expected.source_tx_id {
        return Verdict::fail(VerifyFailure::TransactionMismatch);
    }
    if proof.attested_amount < expected.amount_drops {
        return Verdict::fail(VerifyFailure::InsufficientAmount);
    }
    if proof.attested_destination != expected.destination {
        return Verdict::fail(VerifyFailure::DestinationMismatch);
    }
    if !proof.attested_success {
        return Verdict::fail(VerifyFailure::PaymentNotSuccessful);
    }
    Verdict::ok()
}
