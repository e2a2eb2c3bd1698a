//! Per-endpoint health records and RPC error classification.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Weight of the most recent call outcome in the error-rate average.
const ERROR_RATE_ALPHA: f64 = 0.3;

/// Errors produced by a single RPC attempt against one endpoint.
#[derive(Debug, Clone, Error)]
pub enum RpcError {
    /// The request timed out.
    #[error("request timed out")]
    Timeout,

    /// The endpoint answered with an HTTP error status.
    #[error("http status {0}")]
    Status(u16),

    /// The connection failed at the transport level.
    #[error("transport error: {0}")]
    Transport(String),

    /// The endpoint answered with a JSON-RPC error object.
    #[error("json-rpc error {code}: {message}")]
    JsonRpc {
        /// JSON-RPC error code.
        code: i64,
        /// JSON-RPC error message.
        message: String,
    },

    /// Cross-origin or connectivity policy failure. Retrying on the same
    /// endpoint cannot help.
    #[error("connectivity policy failure: {0}")]
    Policy(String),

    /// The endpoint answered with a response the caller could not decode.
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl RpcError {
    /// Whether another attempt (on this or another endpoint) may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout | Self::Transport(_) => true,
            Self::Status(code) => matches!(code, 429 | 502 | 503 | 504),
            Self::JsonRpc { code, .. } => *code == -32603,
            Self::Policy(_) | Self::Malformed(_) => false,
        }
    }

    /// Whether this failure permanently disqualifies the endpoint.
    #[must_use]
    pub fn is_policy(&self) -> bool {
        matches!(self, Self::Policy(_))
    }

    pub(crate) fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::Timeout;
        }
        if let Some(status) = err.status() {
            return Self::Status(status.as_u16());
        }
        Self::Transport(err.to_string())
    }
}

/// A live connection handle: shared HTTP client plus the endpoint URL the
/// current attempt is bound to.
#[derive(Debug, Clone)]
pub struct RpcHandle {
    client: reqwest::Client,
    url: String,
}

impl RpcHandle {
    pub(crate) fn new(client: reqwest::Client, url: String) -> Self {
        Self { client, url }
    }

    /// The endpoint URL this handle is bound to.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// POST a JSON body to the endpoint and decode the JSON reply.
    ///
    /// A top-level JSON-RPC `error` object is surfaced as
    /// [`RpcError::JsonRpc`] so the connection manager can classify it.
    ///
    /// # Errors
    ///
    /// Returns an [`RpcError`] on transport failure, HTTP error status,
    /// undecodable body, or a JSON-RPC error reply.
    pub async fn post_json(&self, body: &Value) -> Result<Value, RpcError> {
        self.post_json_to(&self.url, body).await
    }

    /// POST a JSON body to a path below the endpoint URL.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`Self::post_json`].
    pub async fn post_json_path(&self, path: &str, body: &Value) -> Result<Value, RpcError> {
        let url = format!("{}{path}", self.url.trim_end_matches('/'));
        self.post_json_to(&url, body).await
    }

    /// GET a JSON document from a path below the endpoint URL.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`Self::post_json`].
    pub async fn get_json_path(&self, path: &str) -> Result<Value, RpcError> {
        let url = format!("{}{path}", self.url.trim_end_matches('/'));
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| RpcError::from_reqwest(&e))?;
        Self::decode(response).await
    }

    async fn post_json_to(&self, url: &str, body: &Value) -> Result<Value, RpcError> {
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| RpcError::from_reqwest(&e))?;
        Self::decode(response).await
    }

    async fn decode(response: reqwest::Response) -> Result<Value, RpcError> {
        let status = response.status();
        if !status.is_success() {
            return Err(RpcError::Status(status.as_u16()));
        }
        let value: Value = response
            .json()
            .await
            .map_err(|e| RpcError::Malformed(e.to_string()))?;
        if let Some(error) = value.get("error").filter(|e| e.is_object()) {
            let code = error.get("code").and_then(Value::as_i64).unwrap_or(0);
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string();
            return Err(RpcError::JsonRpc { code, message });
        }
        Ok(value)
    }
}

/// Health and circuit-breaker state for one configured endpoint.
///
/// Created at startup, mutated by call outcomes and the periodic probe,
/// never removed.
#[derive(Debug, Clone)]
pub struct EndpointHealth {
    /// Endpoint URL.
    pub url: String,
    /// Whether the endpoint is currently considered healthy.
    pub is_healthy: bool,
    /// Latency of the most recent successful call, in milliseconds.
    pub latency_ms: u64,
    /// Exponentially-weighted failure rate in `[0, 1]`.
    pub error_rate: f64,
    /// Whether the circuit breaker is open.
    pub circuit_open: bool,
    /// Consecutive retryable failures since the last success.
    pub consecutive_failures: u32,
    /// Consecutive successes observed while the circuit was open.
    pub consecutive_successes_since_open: u32,
    /// When the endpoint was last probed or called.
    pub last_checked_at: Option<DateTime<Utc>>,
    /// When the circuit last opened.
    pub circuit_opened_at: Option<DateTime<Utc>>,
    /// Set by a policy failure; blocks half-open trials on the call path.
    /// Only probe successes can recover a policy-failed endpoint.
    pub policy_failed: bool,
}

impl EndpointHealth {
    /// Create a fresh, healthy record for an endpoint.
    #[must_use]
    pub fn new(url: String) -> Self {
        Self {
            url,
            is_healthy: true,
            latency_ms: 0,
            error_rate: 0.0,
            circuit_open: false,
            consecutive_failures: 0,
            consecutive_successes_since_open: 0,
            last_checked_at: None,
            circuit_opened_at: None,
            policy_failed: false,
        }
    }

    /// Whether the endpoint may be selected without a half-open trial.
    #[must_use]
    pub fn usable(&self) -> bool {
        self.is_healthy && !self.circuit_open
    }

    /// Whether an open circuit is due a half-open trial attempt.
    #[must_use]
    pub fn half_open_due(&self, recovery_timeout: Duration, now: DateTime<Utc>) -> bool {
        if !self.circuit_open || self.policy_failed {
            return false;
        }
        self.circuit_opened_at.is_some_and(|opened| {
            let elapsed = now.signed_duration_since(opened);
            elapsed.num_milliseconds() >= i64::try_from(recovery_timeout.as_millis()).unwrap_or(i64::MAX)
        })
    }

    /// Record a successful call or probe.
    ///
    /// Returns `true` if this success closed an open circuit.
    pub fn record_success(&mut self, latency: Duration, required_successes: u32, now: DateTime<Utc>) -> bool {
        self.consecutive_failures = 0;
        self.latency_ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.error_rate *= 1.0 - ERROR_RATE_ALPHA;
        self.last_checked_at = Some(now);

        if self.circuit_open {
            self.consecutive_successes_since_open += 1;
            if self.consecutive_successes_since_open >= required_successes {
                self.circuit_open = false;
                self.circuit_opened_at = None;
                self.consecutive_successes_since_open = 0;
                self.policy_failed = false;
                self.is_healthy = true;
                return true;
            }
            return false;
        }

        self.is_healthy = true;
        false
    }

    /// Record a failed call or probe.
    ///
    /// Returns `true` if this failure opened the circuit.
    pub fn record_failure(&mut self, error: &RpcError, threshold: u32, now: DateTime<Utc>) -> bool {
        self.last_checked_at = Some(now);
        self.consecutive_successes_since_open = 0;

        if error.is_policy() {
            self.error_rate = 1.0;
            self.policy_failed = true;
            self.is_healthy = false;
            if !self.circuit_open {
                self.circuit_open = true;
                self.circuit_opened_at = Some(now);
                return true;
            }
            return false;
        }

        self.consecutive_failures += 1;
        self.error_rate = ERROR_RATE_ALPHA + (1.0 - ERROR_RATE_ALPHA) * self.error_rate;

        if self.consecutive_failures >= threshold {
            self.is_healthy = false;
            if !self.circuit_open {
                self.circuit_open = true;
                self.circuit_opened_at = Some(now);
                return true;
            }
            // Half-open trial failed: re-open with a fresh timestamp.
            self.circuit_opened_at = Some(now);
        }

        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn retryable_error() -> RpcError {
        RpcError::Status(503)
    }

    #[test]
    fn test_error_classification() {
        assert!(RpcError::Timeout.is_retryable());
        assert!(RpcError::Status(429).is_retryable());
        assert!(RpcError::Status(502).is_retryable());
        assert!(RpcError::Status(503).is_retryable());
        assert!(RpcError::Status(504).is_retryable());
        assert!(!RpcError::Status(400).is_retryable());
        assert!(RpcError::Transport("reset".to_string()).is_retryable());
        assert!(RpcError::JsonRpc {
            code: -32603,
            message: "internal".to_string()
        }
        .is_retryable());
        assert!(!RpcError::JsonRpc {
            code: -32600,
            message: "invalid".to_string()
        }
        .is_retryable());
        assert!(!RpcError::Policy("cors".to_string()).is_retryable());
        assert!(RpcError::Policy("cors".to_string()).is_policy());
    }

    #[test]
    fn test_circuit_opens_after_threshold() {
        let mut health = EndpointHealth::new("https://rpc.example".to_string());
        let now = Utc::now();

        assert!(!health.record_failure(&retryable_error(), 3, now));
        assert!(!health.record_failure(&retryable_error(), 3, now));
        assert!(!health.circuit_open);
        assert!(health.record_failure(&retryable_error(), 3, now));
        assert!(health.circuit_open);
        assert!(!health.usable());
        assert_eq!(health.circuit_opened_at, Some(now));
    }

    #[test]
    fn test_success_resets_failure_counter() {
        let mut health = EndpointHealth::new("https://rpc.example".to_string());
        let now = Utc::now();

        health.record_failure(&retryable_error(), 3, now);
        health.record_failure(&retryable_error(), 3, now);
        health.record_success(Duration::from_millis(20), 3, now);
        assert_eq!(health.consecutive_failures, 0);
        assert!(health.usable());
    }

    #[test]
    fn test_circuit_closes_after_three_successes() {
        let mut health = EndpointHealth::new("https://rpc.example".to_string());
        let now = Utc::now();

        for _ in 0..3 {
            health.record_failure(&retryable_error(), 3, now);
        }
        assert!(health.circuit_open);

        assert!(!health.record_success(Duration::from_millis(5), 3, now));
        assert!(!health.record_success(Duration::from_millis(5), 3, now));
        assert!(health.circuit_open);
        assert!(health.record_success(Duration::from_millis(5), 3, now));
        assert!(!health.circuit_open);
        assert!(health.usable());
    }

    #[test]
    fn test_policy_failure_is_permanent_on_call_path() {
        let mut health = EndpointHealth::new("https://rpc.example".to_string());
        let now = Utc::now();

        assert!(health.record_failure(&RpcError::Policy("cors".to_string()), 3, now));
        assert!(health.circuit_open);
        assert!((health.error_rate - 1.0).abs() < f64::EPSILON);

        // Even past the recovery timeout, the call path never trials it.
        let later = now + chrono::Duration::seconds(120);
        assert!(!health.half_open_due(Duration::from_secs(30), later));
    }

    #[test]
    fn test_half_open_due_after_recovery_timeout() {
        let mut health = EndpointHealth::new("https://rpc.example".to_string());
        let now = Utc::now();

        for _ in 0..3 {
            health.record_failure(&retryable_error(), 3, now);
        }
        assert!(!health.half_open_due(Duration::from_secs(30), now));

        let later = now + chrono::Duration::seconds(31);
        assert!(health.half_open_due(Duration::from_secs(30), later));
    }

    #[test]
    fn test_failed_half_open_trial_refreshes_timestamp() {
        let mut health = EndpointHealth::new("https://rpc.example".to_string());
        let opened = Utc::now();
        for _ in 0..3 {
            health.record_failure(&retryable_error(), 3, opened);
        }

        let trial = opened + chrono::Duration::seconds(40);
        health.record_failure(&retryable_error(), 3, trial);
        assert_eq!(health.circuit_opened_at, Some(trial));
        assert!(!health.half_open_due(Duration::from_secs(30), trial + chrono::Duration::seconds(10)));
    }

    #[test]
    fn test_error_rate_moves_with_outcomes() {
        let mut health = EndpointHealth::new("https://rpc.example".to_string());
        let now = Utc::now();

        health.record_failure(&retryable_error(), 10, now);
        let after_failure = health.error_rate;
        assert!(after_failure > 0.0);

        health.record_success(Duration::from_millis(5), 3, now);
        assert!(health.error_rate < after_failure);
    }
}
