//! Attestation request, polling and proof verification.
//!
//! The pipeline obtains a cryptographic attestation that a source-ledger
//! payment occurred, then verifies the attested parameters against the
//! payment intent:
//!
//! ```text
//! confirm intent
//!        │
//!        ▼
//! ┌─────────────────────┐
//! │ Check proof cache   │
//! └─────────┬───────────┘
//!           │
//!    ┌──────┴──────┐
//!    │             │
//!   HIT          MISS
//!    │             │
//!    ▼             ▼
//! verify      Submit request (deterministic id)
//!                  │
//!                  ▼
//!          Poll on voting-round cadence
//!                  │
//!        ┌─────────┼──────────┐
//!        │         │          │
//!     attested  timed out   failed
//!        │         │          │
//!        ▼         ▼          ▼
//!     verify   resubmit     terminal
//! ```

mod oracle;
mod proof;
mod requester;
mod verifier;

pub use oracle::{probe_body, FdcOracle};
pub use proof::{
    parse_status, AttestationProof, AttestationStatus, PollOutcome, PAYMENT_ATTESTATION_TYPE,
};
pub use requester::{
    request_id, AttestationOracle, AttestationRequester, PollResult, ProofCacheStats,
};
pub use verifier::{verify, ExpectedPayment, Verdict, VerifyFailure};
