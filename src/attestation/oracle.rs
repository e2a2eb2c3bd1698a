//! HTTP client for the Flare/FDC attestation oracle.

use super::proof::{parse_status, PollOutcome};
use super::requester::AttestationOracle;
use crate::config::OracleConfig;
use crate::connection::ConnectionManager;
use crate::error::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

/// Request body for the oracle liveness probe.
#[must_use]
pub fn probe_body() -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "eth_blockNumber",
        "params": []
    })
}

/// Attestation oracle reached over HTTP through the connection manager.
pub struct FdcOracle {
    manager: Arc<ConnectionManager>,
    config: OracleConfig,
}

impl FdcOracle {
    /// Create an oracle client routing calls through the given manager.
    #[must_use]
    pub fn new(manager: Arc<ConnectionManager>, config: OracleConfig) -> Self {
        Self { manager, config }
    }
}

#[async_trait]
impl AttestationOracle for FdcOracle {
    async fn submit_request(
        &self,
        request_id: &str,
        attestation_type: &str,
        source_id: &str,
        tx_id: &str,
    ) -> Result<()> {
        let body = json!({
            "requestId": request_id,
            "attestationType": attestation_type,
            "sourceId": source_id,
            "requestBody": { "transactionId": tx_id }
        });
        let path = self.config.submit_path.clone();

        self.manager
            .execute("fdc_submit", move |handle| {
                let body = body.clone();
                let path = path.clone();
                async move {
                    handle.post_json_path(&path, &body).await?;
                    Ok(())
                }
            })
            .await
    }

    async fn poll(&self, request_id: &str) -> Result<PollOutcome> {
        let path = format!(
            "{}/{request_id}",
            self.config.status_path.trim_end_matches('/')
        );
        let request_id = request_id.to_string();

        self.manager
            .execute("fdc_status", move |handle| {
                let path = path.clone();
                let request_id = request_id.clone();
                async move {
                    let reply = handle.get_json_path(&path).await?;
                    parse_status(&request_id, &reply)
                }
            })
            .await
    }
}
