//! USD to source-currency rate conversion.

use crate::error::{Error, Result};
use async_trait::async_trait;

/// Drops per unit of the source ledger's native currency.
pub const DROPS_PER_XRP: u64 = 1_000_000;

/// Converts a USD amount into drops.
///
/// Injected into the intent manager; test doubles replace it outright, a
/// lookup failure is surfaced rather than silently falling back.
#[async_trait]
pub trait RateLookup: Send + Sync {
    /// Convert a USD amount into drops.
    ///
    /// # Errors
    ///
    /// Returns an error if the amount is invalid or no rate is available.
    async fn usd_to_drops(&self, amount_usd: f64) -> Result<u64>;
}

/// Rate table backed by a configured USD price per XRP.
pub struct FixedRateTable {
    usd_per_xrp: f64,
}

impl FixedRateTable {
    /// Create a rate table from a USD price per XRP.
    ///
    /// # Errors
    ///
    /// Returns an error if the rate is not a positive finite number.
    pub fn new(usd_per_xrp: f64) -> Result<Self> {
        if !usd_per_xrp.is_finite() || usd_per_xrp <= 0.0 {
            return Err(Error::Rate(format!(
                "invalid usd_per_xrp rate: {usd_per_xrp}"
            )));
        }
        Ok(Self { usd_per_xrp })
    }
}

#[async_trait]
impl RateLookup for FixedRateTable {
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    async fn usd_to_drops(&self, amount_usd: f64) -> Result<u64> {
        if !amount_usd.is_finite() || amount_usd <= 0.0 {
            return Err(Error::Rate(format!("invalid USD amount: {amount_usd}")));
        }
        // Round up so the payer can never underpay by a fraction of a drop.
        let drops = (amount_usd / self.usd_per_xrp * DROPS_PER_XRP as f64).ceil();
        if drops > u64::MAX as f64 {
            return Err(Error::Rate(format!("amount out of range: {amount_usd}")));
        }
        Ok(drops as u64)
    }
}
