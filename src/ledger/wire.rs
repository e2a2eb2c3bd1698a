//! XRPL JSON-RPC request construction and response decoding.

use super::{PaymentLookup, PaymentRecord};
use crate::connection::RpcError;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

/// Offset between the ripple epoch (2000-01-01) and the unix epoch.
const RIPPLE_EPOCH_OFFSET: i64 = 946_684_800;

/// Request body for the `tx` method.
#[must_use]
pub fn tx_body(tx_id: &str) -> Value {
    json!({
        "method": "tx",
        "params": [{ "transaction": tx_id, "binary": false }]
    })
}

/// Request body for the `submit` method.
#[must_use]
pub fn submit_body(tx_blob: &str) -> Value {
    json!({
        "method": "submit",
        "params": [{ "tx_blob": tx_blob }]
    })
}

/// Request body for the cheap liveness probe.
#[must_use]
pub fn probe_body() -> Value {
    json!({
        "method": "ledger_current",
        "params": [{}]
    })
}

/// Decode a `tx` reply into a tagged payment lookup.
///
/// An unknown transaction and a known-but-unvalidated transaction are both
/// "not yet included" (retryable); a validated transaction with a
/// non-success engine result is a terminal failure.
///
/// # Errors
///
/// Returns [`RpcError::Malformed`] when the reply cannot be decoded or
/// reports a ledger error other than `txnNotFound`.
pub fn parse_tx(value: &Value) -> Result<PaymentLookup, RpcError> {
    let result = value
        .get("result")
        .ok_or_else(|| RpcError::Malformed("missing result".to_string()))?;

    if let Some(error) = result.get("error").and_then(Value::as_str) {
        if error == "txnNotFound" {
            return Ok(PaymentLookup::NotYetIncluded);
        }
        return Err(RpcError::Malformed(format!("ledger error: {error}")));
    }

    if !result
        .get("validated")
        .and_then(Value::as_bool)
        .unwrap_or(false)
    {
        return Ok(PaymentLookup::NotYetIncluded);
    }

    let meta = result
        .get("meta")
        .ok_or_else(|| RpcError::Malformed("missing meta".to_string()))?;
    let engine_result = meta
        .get("TransactionResult")
        .and_then(Value::as_str)
        .unwrap_or("unknown");
    if engine_result != "tesSUCCESS" {
        return Ok(PaymentLookup::Failed {
            reason: engine_result.to_string(),
        });
    }

    let amount_drops = meta
        .get("delivered_amount")
        .or_else(|| result.get("Amount"))
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or_else(|| RpcError::Malformed("missing or non-XRP amount".to_string()))?;

    let record = PaymentRecord {
        tx_id: field_str(result, "hash")?,
        amount_drops,
        source_address: field_str(result, "Account")?,
        destination_address: field_str(result, "Destination")?,
        ledger_index: result
            .get("ledger_index")
            .and_then(Value::as_u64)
            .unwrap_or(0),
        timestamp: parse_ripple_date(result.get("date").and_then(Value::as_i64)),
        memo: parse_first_memo(result),
    };

    Ok(PaymentLookup::Confirmed(record))
}

/// Decode a `submit` reply into the submitted transaction hash.
///
/// # Errors
///
/// Returns [`RpcError::Malformed`] when the engine rejected the
/// transaction outright or the reply cannot be decoded.
pub fn parse_submit(value: &Value) -> Result<String, RpcError> {
    let result = value
        .get("result")
        .ok_or_else(|| RpcError::Malformed("missing result".to_string()))?;

    let engine = result
        .get("engine_result")
        .and_then(Value::as_str)
        .unwrap_or("unknown");
    if !(engine.starts_with("tes") || engine.starts_with("ter")) {
        return Err(RpcError::Malformed(format!("submit rejected: {engine}")));
    }

    result
        .get("tx_json")
        .and_then(|tx| tx.get("hash"))
        .and_then(Value::as_str)
        .map(ToString::to_string)
        .ok_or_else(|| RpcError::Malformed("missing transaction hash".to_string()))
}

fn field_str(value: &Value, key: &str) -> Result<String, RpcError> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(ToString::to_string)
        .ok_or_else(|| RpcError::Malformed(format!("missing {key}")))
}

fn parse_ripple_date(date: Option<i64>) -> DateTime<Utc> {
    date.and_then(|d| DateTime::from_timestamp(d + RIPPLE_EPOCH_OFFSET, 0))
        .unwrap_or_else(Utc::now)
}

fn parse_first_memo(result: &Value) -> Option<String> {
    let data = result
        .get("Memos")?
        .as_array()?
        .first()?
        .get("Memo")?
        .get("MemoData")?
        .as_str()?;
    let bytes = hex::decode(data).ok()?;
    String::from_utf8(bytes).ok()
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    fn validated_tx(amount: &str, engine: &str) -> Value {
        json!({
            "result": {
                "Account": "rPayer111",
                "Amount": amount,
                "Destination": "rGateway222",
                "hash": "ABC123",
                "ledger_index": 812_345,
                "date": 771_234_567_i64,
                "validated": true,
                "Memos": [{ "Memo": { "MemoData": hex::encode("eval-1") } }],
                "meta": {
                    "TransactionResult": engine,
                    "delivered_amount": amount
                }
            }
        })
    }

    #[test]
    fn test_parse_validated_success() {
        let lookup = parse_tx(&validated_tx("30000000", "tesSUCCESS")).expect("parse");
        let PaymentLookup::Confirmed(record) = lookup else {
            panic!("expected confirmed payment");
        };
        assert_eq!(record.tx_id, "ABC123");
        assert_eq!(record.amount_drops, 30_000_000);
        assert_eq!(record.source_address, "rPayer111");
        assert_eq!(record.destination_address, "rGateway222");
        assert_eq!(record.ledger_index, 812_345);
        assert_eq!(record.memo.as_deref(), Some("eval-1"));
        // Ripple epoch offset applied.
        assert_eq!(record.timestamp.timestamp(), 771_234_567 + 946_684_800);
    }

    #[test]
    fn test_parse_not_found_is_not_yet_included() {
        let reply = json!({ "result": { "error": "txnNotFound", "status": "error" } });
        let lookup = parse_tx(&reply).expect("parse");
        assert!(matches!(lookup, PaymentLookup::NotYetIncluded));
    }

    #[test]
    fn test_parse_unvalidated_is_not_yet_included() {
        let mut reply = validated_tx("1000", "tesSUCCESS");
        reply["result"]["validated"] = json!(false);
        let lookup = parse_tx(&reply).expect("parse");
        assert!(matches!(lookup, PaymentLookup::NotYetIncluded));
    }

    #[test]
    fn test_parse_failed_engine_result_is_terminal() {
        let lookup = parse_tx(&validated_tx("1000", "tecUNFUNDED_PAYMENT")).expect("parse");
        let PaymentLookup::Failed { reason } = lookup else {
            panic!("expected failed payment");
        };
        assert_eq!(reason, "tecUNFUNDED_PAYMENT");
    }

    #[test]
    fn test_parse_other_ledger_error_is_malformed() {
        let reply = json!({ "result": { "error": "invalidParams", "status": "error" } });
        assert!(parse_tx(&reply).is_err());
    }

    #[test]
    fn test_parse_issued_currency_amount_rejected() {
        let mut reply = validated_tx("1000", "tesSUCCESS");
        reply["result"]["meta"]["delivered_amount"] =
            json!({ "currency": "USD", "value": "10" });
        reply["result"]["Amount"] = json!({ "currency": "USD", "value": "10" });
        assert!(parse_tx(&reply).is_err());
    }

    #[test]
    fn test_parse_submit_accepts_queued() {
        let reply = json!({
            "result": {
                "engine_result": "terQUEUED",
                "tx_json": { "hash": "DEADBEEF" }
            }
        });
        assert_eq!(parse_submit(&reply).expect("parse"), "DEADBEEF");
    }

    #[test]
    fn test_parse_submit_rejects_malformed() {
        let reply = json!({
            "result": {
                "engine_result": "temBAD_FEE",
                "tx_json": { "hash": "DEADBEEF" }
            }
        });
        assert!(parse_submit(&reply).is_err());
    }
}
