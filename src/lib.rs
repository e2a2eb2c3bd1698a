//! medgate — cross-chain payment verification and access-grant gateway.
//!
//! A hospital pays a small fee on the XRPL ledger and is granted
//! time-limited access to an encrypted medical record. Proof of payment
//! is attested by a Flare/FDC oracle and verified against the payment
//! intent before any grant is issued.
//!
//! # Pipeline
//!
//! ```text
//! create intent ──▶ client pays on XRPL ──▶ confirm(tx id)
//!                                              │
//!                                              ▼
//!                       observe payment ─▶ request attestation
//!                                              │
//!                                              ▼
//!                          poll for proof ─▶ verify proof
//!                                              │
//!                                              ▼
//!                                        grant access
//! ```
//!
//! Every network call is routed through the resilient
//! [`connection::ConnectionManager`] (circuit breaker, retry with capped
//! backoff and jitter, health-probed failover, wallet-injected fallback).
//!
//! File encryption, object storage, metadata persistence, HTTP routing
//! and authentication are external collaborators consumed through narrow
//! interfaces.

pub mod api;
pub mod attestation;
pub mod clock;
pub mod config;
pub mod connection;
pub mod error;
pub mod event;
pub mod gateway;
pub mod grant;
pub mod id;
pub mod intent;
pub mod ledger;
pub mod rates;

pub use config::GatewayConfig;
pub use error::{Error, Result};
pub use event::{GatewayEvent, GatewayEventsChannel, GatewayEventsSender};
pub use gateway::{GatewayBuilder, RunningGateway};
