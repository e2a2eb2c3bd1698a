//! Gateway event system.

use tokio::sync::broadcast;

/// Events emitted by the gateway.
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    /// Gateway has started successfully.
    Started,

    /// Gateway is shutting down.
    ShuttingDown,

    /// A payment intent was created.
    IntentCreated {
        /// Intent identifier.
        intent_id: String,
        /// Evaluation the intent pays for.
        evaluation_ref: String,
    },

    /// A payment intent expired before confirmation.
    IntentExpired {
        /// Intent identifier.
        intent_id: String,
    },

    /// The source-ledger payment for an intent was observed as validated.
    PaymentObserved {
        /// Intent identifier.
        intent_id: String,
        /// Source chain transaction id.
        tx_id: String,
    },

    /// The oracle produced a proof for an attestation request.
    ProofAttested {
        /// Intent identifier.
        intent_id: String,
        /// Deterministic attestation request id.
        request_id: String,
    },

    /// Proof verification failed; the intent is terminal.
    VerificationFailed {
        /// Intent identifier.
        intent_id: String,
        /// First failing check.
        reason: String,
    },

    /// An access grant was issued or extended.
    AccessGranted {
        /// Grant identifier.
        grant_id: String,
        /// Evaluation the grant covers.
        evaluation_ref: String,
        /// Hospital the grant was issued to.
        grantee_id: String,
    },

    /// An access grant was revoked.
    AccessRevoked {
        /// Grant identifier.
        grant_id: String,
        /// Operator-supplied reason.
        reason: String,
    },

    /// An endpoint's circuit breaker opened.
    CircuitOpened {
        /// Endpoint URL.
        url: String,
    },

    /// An endpoint's circuit breaker closed after recovery.
    CircuitClosed {
        /// Endpoint URL.
        url: String,
    },

    /// Error occurred.
    Error {
        /// Error message.
        message: String,
    },
}

/// Channel for receiving gateway events.
pub type GatewayEventsChannel = broadcast::Receiver<GatewayEvent>;

/// Sender for gateway events.
pub type GatewayEventsSender = broadcast::Sender<GatewayEvent>;

/// Create a new event channel pair.
#[must_use]
pub fn create_event_channel() -> (GatewayEventsSender, GatewayEventsChannel) {
    broadcast::channel(256)
}
