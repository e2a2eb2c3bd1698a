//! HTTP payload types and the access facade.
//!
//! Routing, validation middleware and authentication are owned by
//! external collaborators; this module defines the payloads and maps
//! pipeline outcomes to HTTP status codes and stable reason codes. The
//! `grantee_id` on confirmation comes from the collaborator-owned
//! authentication context.

use crate::error::Error;
use crate::grant::GrantAuthority;
use crate::intent::IntentManager;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A response body together with the HTTP status to send it with.
#[derive(Debug, Clone)]
pub struct ApiResponse<T> {
    /// HTTP status code.
    pub status: u16,
    /// Response body.
    pub body: T,
}

/// Error body carried on every failure response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Human-readable error description.
    pub error: String,
    /// Stable machine-readable reason code.
    pub reason: String,
}

/// An error response with its HTTP status.
#[derive(Debug, Clone)]
pub struct ApiError {
    /// HTTP status code.
    pub status: u16,
    /// Error body.
    pub body: ErrorBody,
}

/// Result type for facade calls.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

impl ApiError {
    fn invalid(message: &str) -> Self {
        Self {
            status: 400,
            body: ErrorBody {
                error: message.to_string(),
                reason: "invalid_request".to_string(),
            },
        }
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let status = match &err {
            Error::IntentConflict { .. }
            | Error::IntentAlreadyTerminal { .. }
            | Error::ConfirmationInProgress(_)
            | Error::PaymentNotIncluded(_)
            | Error::GrantState(_) => 409,
            Error::IntentExpired(_) => 410,
            Error::IntentNotFound(_) | Error::GrantNotFound(_) => 404,
            Error::VerificationFailed { .. }
            | Error::PaymentFailed(_)
            | Error::AttestationFailed(_) => 400,
            Error::AttestationTimeout { .. } => 504,
            Error::AllProvidersUnavailable { .. } | Error::PermanentConnectivity { .. } => 503,
            Error::Rpc(_) => 502,
            Error::Config(_)
            | Error::Io(_)
            | Error::IntentTransition(_)
            | Error::Rate(_)
            | Error::SignerUnavailable => 500,
        };
        Self {
            status,
            body: ErrorBody {
                error: err.to_string(),
                reason: err.reason_code().to_string(),
            },
        }
    }
}

/// `POST /access/intents` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateIntentRequest {
    /// Evaluation the hospital wants access to.
    pub evaluation_ref: String,
    /// The hospital's paying wallet.
    pub payer_wallet: String,
    /// Fee in USD.
    #[serde(rename = "amountUSD")]
    pub amount_usd: f64,
}

/// `POST /access/intents` response (201).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateIntentResponse {
    /// Intent identifier.
    pub intent_id: String,
    /// Quoted fee in USD.
    pub amount: f64,
    /// Quoted fee in drops.
    pub source_currency_amount: u64,
    /// Wallet to pay.
    pub destination_wallet: String,
    /// When the payment window closes.
    pub expires_at: DateTime<Utc>,
    /// Memo to attach to the payment.
    pub memo: String,
}

/// `POST /access/confirm` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmRequest {
    /// Intent to confirm.
    pub intent_id: String,
    /// Source chain transaction the client paid with.
    pub source_tx_id: String,
    /// Authenticated hospital identity (from the auth collaborator).
    pub grantee_id: String,
}

/// `POST /access/confirm` response (200, or 409 on idempotent replay).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmResponse {
    /// Whether access was granted.
    pub granted: bool,
    /// The issued grant id.
    pub grant_id: Option<String>,
    /// Expiry of the grant.
    pub expires_at: Option<DateTime<Utc>>,
}

/// `GET /access/verify` response (200).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyAccessResponse {
    /// Whether a live grant covers the pair.
    pub has_access: bool,
    /// Expiry of the covering grant, when one exists.
    pub expires_at: Option<DateTime<Utc>>,
}

/// Facade over the pipeline for the HTTP collaborator.
pub struct AccessApi {
    intents: Arc<IntentManager>,
    grants: Arc<GrantAuthority>,
}

impl AccessApi {
    /// Create the facade.
    #[must_use]
    pub fn new(intents: Arc<IntentManager>, grants: Arc<GrantAuthority>) -> Self {
        Self { intents, grants }
    }

    /// Handle `POST /access/intents`.
    ///
    /// # Errors
    ///
    /// `409` when a live intent exists for the pair; `400` on an invalid
    /// payload.
    pub async fn create_intent(
        &self,
        request: CreateIntentRequest,
    ) -> ApiResult<ApiResponse<CreateIntentResponse>> {
        if request.evaluation_ref.trim().is_empty() {
            return Err(ApiError::invalid("evaluationRef must not be empty"));
        }
        if request.payer_wallet.trim().is_empty() {
            return Err(ApiError::invalid("payerWallet must not be empty"));
        }

        let (intent, instructions) = self
            .intents
            .create_intent(
                &request.evaluation_ref,
                &request.payer_wallet,
                request.amount_usd,
            )
            .await?;

        Ok(ApiResponse {
            status: 201,
            body: CreateIntentResponse {
                intent_id: intent.id,
                amount: instructions.amount_usd,
                source_currency_amount: instructions.amount_drops,
                destination_wallet: instructions.destination_wallet,
                expires_at: instructions.expires_at,
                memo: instructions.memo,
            },
        })
    }

    /// Handle `POST /access/confirm`.
    ///
    /// Returns `200` on a fresh grant, `409` replaying a previously
    /// completed confirmation (same grant, no re-verification).
    ///
    /// # Errors
    ///
    /// `410` on expiry, `409` replaying a stored failure or racing an
    /// in-flight confirmation, `400` on verification failure with the
    /// specific reason, `504` on attestation timeout.
    pub async fn confirm(
        &self,
        request: ConfirmRequest,
    ) -> ApiResult<ApiResponse<ConfirmResponse>> {
        if request.source_tx_id.trim().is_empty() {
            return Err(ApiError::invalid("sourceTxId must not be empty"));
        }
        if request.grantee_id.trim().is_empty() {
            return Err(ApiError::invalid("granteeId must not be empty"));
        }

        let outcome = self
            .intents
            .confirm_intent(&request.intent_id, &request.source_tx_id, &request.grantee_id)
            .await?;

        Ok(ApiResponse {
            status: if outcome.replayed { 409 } else { 200 },
            body: ConfirmResponse {
                granted: outcome.granted,
                grant_id: outcome.grant_id,
                expires_at: outcome.expires_at,
            },
        })
    }

    /// Handle `GET /access/verify`.
    #[must_use]
    pub fn verify_access(
        &self,
        evaluation_ref: &str,
        grantee_id: &str,
    ) -> ApiResponse<VerifyAccessResponse> {
        let status = self.grants.check_access(evaluation_ref, grantee_id);
        ApiResponse {
            status: 200,
            body: VerifyAccessResponse {
                has_access: status.has_access,
                expires_at: status.expires_at,
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_mapping() {
        let cases: Vec<(Error, u16, &str)> = vec![
            (
                Error::IntentConflict {
                    evaluation_ref: "E1".to_string(),
                    payer_wallet: "W1".to_string(),
                },
                409,
                "intent_conflict",
            ),
            (Error::IntentExpired("intent-1".to_string()), 410, "intent_expired"),
            (
                Error::IntentAlreadyTerminal {
                    id: "intent-1".to_string(),
                    reason: Some("insufficient amount".to_string()),
                },
                409,
                "already_processed",
            ),
            (
                Error::VerificationFailed {
                    reason: "insufficient amount".to_string(),
                },
                400,
                "payment_invalid",
            ),
            (Error::AttestationTimeout { attempts: 30 }, 504, "retry_later"),
            (
                Error::AllProvidersUnavailable {
                    operation: "xrpl_tx".to_string(),
                    last_error: "timeout".to_string(),
                },
                503,
                "service_degraded",
            ),
        ];

        for (err, status, reason) in cases {
            let api_err = ApiError::from(err);
            assert_eq!(api_err.status, status);
            assert_eq!(api_err.body.reason, reason);
        }
    }

    #[test]
    fn test_payloads_use_camel_case() {
        let request: CreateIntentRequest = serde_json::from_str(
            r#"{"evaluationRef":"E1","payerWallet":"W1","amountUSD":15.0}"#,
        )
        .expect("parse request");
        assert_eq!(request.evaluation_ref, "E1");
        assert!((request.amount_usd - 15.0).abs() < f64::EPSILON);

        let body = ConfirmResponse {
            granted: true,
            grant_id: Some("grant-1".to_string()),
            expires_at: None,
        };
        let json = serde_json::to_string(&body).expect("serialize");
        assert!(json.contains("grantId"));
        assert!(json.contains("expiresAt"));
    }
}
