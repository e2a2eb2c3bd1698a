//! Attestation proof types and oracle reply decoding.

use crate::connection::RpcError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Attestation type for source-ledger payment proofs.
pub const PAYMENT_ATTESTATION_TYPE: &str = "Payment";

/// Lifecycle status of an attestation request at the oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttestationStatus {
    /// Request accepted, not yet scheduled into a voting round.
    Submitted,
    /// Scheduled; proof not yet available.
    Pending,
    /// Proof available.
    Attested,
    /// The oracle reported a terminal failure for the request.
    Failed,
}

/// An oracle-signed proof that a source-ledger payment occurred with
/// specific parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttestationProof {
    /// Deterministic request identifier.
    pub request_id: String,
    /// Attested source chain transaction id.
    pub source_tx_id: String,
    /// Voting round the attestation was committed in.
    pub voting_round: u64,
    /// Merkle root of the committed attestation batch.
    pub merkle_root: Option<String>,
    /// Inclusion proof for the attested claim.
    pub merkle_proof: Vec<String>,
    /// Attested delivered amount in drops.
    pub attested_amount: u64,
    /// Attested destination address.
    pub attested_destination: String,
    /// Whether the attested transaction succeeded at ledger level.
    pub attested_success: bool,
}

/// Tagged outcome of one oracle status poll.
///
/// Callers cannot mistake "not yet" for an error: pending and terminal
/// failure are distinct variants.
#[derive(Debug, Clone)]
pub enum PollOutcome {
    /// A proof is available.
    Ready(AttestationProof),
    /// The proof is not yet available.
    Pending,
    /// The oracle reported the underlying transaction does not exist or
    /// failed. Terminal.
    Failed {
        /// Oracle-supplied reason.
        reason: String,
    },
}

/// Decode an oracle status reply into a tagged poll outcome.
///
/// # Errors
///
/// Returns [`RpcError::Malformed`] when the reply cannot be decoded.
pub fn parse_status(request_id: &str, value: &Value) -> Result<PollOutcome, RpcError> {
    let status = value
        .get("status")
        .and_then(Value::as_str)
        .ok_or_else(|| RpcError::Malformed("missing status".to_string()))?;

    match status {
        "attested" => {
            let proof = value
                .get("proof")
                .ok_or_else(|| RpcError::Malformed("attested reply without proof".to_string()))?;
            Ok(PollOutcome::Ready(parse_proof(request_id, proof)?))
        }
        "failed" => Ok(PollOutcome::Failed {
            reason: value
                .get("reason")
                .and_then(Value::as_str)
                .unwrap_or("source transaction does not exist or failed")
                .to_string(),
        }),
        // "submitted", "pending", and anything newer all mean "not yet".
        _ => Ok(PollOutcome::Pending),
    }
}

fn parse_proof(request_id: &str, proof: &Value) -> Result<AttestationProof, RpcError> {
    let attested_amount = match proof.get("amount") {
        Some(Value::String(s)) => s.parse::<u64>().ok(),
        Some(v) => v.as_u64(),
        None => None,
    }
    .ok_or_else(|| RpcError::Malformed("missing attested amount".to_string()))?;

    Ok(AttestationProof {
        request_id: request_id.to_string(),
        source_tx_id: proof
            .get("sourceTxId")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::Malformed("missing sourceTxId".to_string()))?
            .to_string(),
        voting_round: proof
            .get("votingRound")
            .and_then(Value::as_u64)
            .unwrap_or(0),
        merkle_root: proof
            .get("merkleRoot")
            .and_then(Value::as_str)
            .map(ToString::to_string),
        merkle_proof: proof
            .get("merkleProof")
            .and_then(Value::as_array)
            .map(|nodes| {
                nodes
                    .iter()
                    .filter_map(Value::as_str)
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default(),
        attested_amount,
        attested_destination: proof
            .get("destination")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::Malformed("missing destination".to_string()))?
            .to_string(),
        attested_success: proof
            .get("success")
            .and_then(Value::as_bool)
            .unwrap_or(false),
    })
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_attested_reply() {
        let reply = json!({
            "status": "attested",
            "proof": {
                "sourceTxId": "ABC123",
                "votingRound": 8812,
                "merkleRoot": "0xroot",
                "merkleProof": ["0xaa", "0xbb"],
                "amount": "30000000",
                "destination": "rGateway222",
                "success": true
            }
        });
        let outcome = parse_status("req-1", &reply).expect("parse");
        let PollOutcome::Ready(proof) = outcome else {
            panic!("expected ready proof");
        };
        assert_eq!(proof.request_id, "req-1");
        assert_eq!(proof.source_tx_id, "ABC123");
        assert_eq!(proof.voting_round, 8812);
        assert_eq!(proof.attested_amount, 30_000_000);
        assert_eq!(proof.merkle_proof.len(), 2);
        assert!(proof.attested_success);
    }

    #[test]
    fn test_parse_numeric_amount() {
        let reply = json!({
            "status": "attested",
            "proof": {
                "sourceTxId": "ABC123",
                "amount": 1500,
                "destination": "rGateway222",
                "success": true
            }
        });
        let outcome = parse_status("req-1", &reply).expect("parse");
        let PollOutcome::Ready(proof) = outcome else {
            panic!("expected ready proof");
        };
        assert_eq!(proof.attested_amount, 1500);
        assert_eq!(proof.voting_round, 0);
    }

    #[test]
    fn test_parse_pending_and_submitted() {
        for status in ["pending", "submitted", "scheduled"] {
            let outcome =
                parse_status("req-1", &json!({ "status": status })).expect("parse");
            assert!(matches!(outcome, PollOutcome::Pending));
        }
    }

    #[test]
    fn test_parse_terminal_failure() {
        let reply = json!({ "status": "failed", "reason": "source tx not found" });
        let outcome = parse_status("req-1", &reply).expect("parse");
        let PollOutcome::Failed { reason } = outcome else {
            panic!("expected failure");
        };
        assert_eq!(reason, "source tx not found");
    }

    #[test]
    fn test_parse_attested_without_proof_is_malformed() {
        assert!(parse_status("req-1", &json!({ "status": "attested" })).is_err());
    }
}
