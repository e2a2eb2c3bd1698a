//! Access grant authority.
//!
//! On a verified payment proof the authority issues a time-bounded grant,
//! idempotently per `(evaluation_ref, grantee_id)`: a pair that already
//! holds an active grant gets its expiry extended rather than a second
//! concurrently-active grant.

mod store;

pub use store::{AccessGrant, DownloadRecord, GrantStatus, GrantStore, InMemoryGrantStore};

use crate::clock::Clock;
use crate::error::Result;
use crate::event::{GatewayEvent, GatewayEventsSender};
use crate::id::IdGenerator;
use crate::intent::PaymentIntent;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info};

/// Result of an access check.
#[derive(Debug, Clone, Copy)]
pub struct AccessStatus {
    /// Whether a live grant covers the pair.
    pub has_access: bool,
    /// Expiry of the covering grant, when one exists.
    pub expires_at: Option<DateTime<Utc>>,
}

/// Issues, checks and revokes access grants.
pub struct GrantAuthority {
    store: Arc<dyn GrantStore>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    events: Option<GatewayEventsSender>,
}

impl GrantAuthority {
    /// Create an authority issuing grants valid for `ttl_days`.
    #[must_use]
    pub fn new(
        store: Arc<dyn GrantStore>,
        ids: Arc<dyn IdGenerator>,
        clock: Arc<dyn Clock>,
        ttl_days: i64,
    ) -> Self {
        Self {
            store,
            ids,
            clock,
            ttl: Duration::days(ttl_days),
            events: None,
        }
    }

    /// Attach an event sender for grant lifecycle notifications.
    #[must_use]
    pub fn with_events(mut self, events: GatewayEventsSender) -> Self {
        self.events = Some(events);
        self
    }

    /// Issue a grant for a completed payment intent, idempotently.
    ///
    /// An existing active grant for the `(evaluation_ref, grantee_id)`
    /// pair is extended and returned instead of creating a duplicate.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects the grant.
    pub fn grant_access(&self, intent: &PaymentIntent, grantee_id: &str) -> Result<AccessGrant> {
        let now = self.clock.now();

        if let Some(existing) = self.store.find_active(&intent.evaluation_ref, grantee_id) {
            let extended = self.store.extend(&existing.id, now + self.ttl)?;
            info!(
                grant_id = %extended.id,
                evaluation_ref = %intent.evaluation_ref,
                grantee_id = %grantee_id,
                "existing grant extended"
            );
            self.emit_granted(&extended);
            return Ok(extended);
        }

        let grant = AccessGrant {
            id: self.ids.next_id("grant"),
            evaluation_ref: intent.evaluation_ref.clone(),
            grantee_id: grantee_id.to_string(),
            payment_intent_id: intent.id.clone(),
            status: GrantStatus::Active,
            granted_at: now,
            expires_at: now + self.ttl,
            download_history: Vec::new(),
            revoked_reason: None,
        };
        self.store.insert(grant.clone())?;
        info!(
            grant_id = %grant.id,
            evaluation_ref = %grant.evaluation_ref,
            grantee_id = %grantee_id,
            expires_at = %grant.expires_at,
            "access granted"
        );
        self.emit_granted(&grant);
        Ok(grant)
    }

    /// Whether a live grant covers the pair. Never mutates expiry.
    #[must_use]
    pub fn check_access(&self, evaluation_ref: &str, grantee_id: &str) -> AccessStatus {
        let now = self.clock.now();
        match self.store.find_active(evaluation_ref, grantee_id) {
            Some(grant) if grant.expires_at > now => AccessStatus {
                has_access: true,
                expires_at: Some(grant.expires_at),
            },
            _ => AccessStatus {
                has_access: false,
                expires_at: None,
            },
        }
    }

    /// Find the grant funded by a payment intent.
    #[must_use]
    pub fn find_for_intent(&self, intent_id: &str) -> Option<AccessGrant> {
        self.store.find_by_intent(intent_id)
    }

    /// Fetch a grant by id.
    #[must_use]
    pub fn get(&self, grant_id: &str) -> Option<AccessGrant> {
        self.store.get(grant_id)
    }

    /// Revoke a grant. Irreversible.
    ///
    /// # Errors
    ///
    /// Returns an error if the grant does not exist or is already
    /// revoked or expired.
    pub fn revoke(&self, grant_id: &str, reason: &str) -> Result<AccessGrant> {
        let grant = self.store.set_status(
            grant_id,
            &[GrantStatus::Active, GrantStatus::Suspended],
            GrantStatus::Revoked,
            Some(reason.to_string()),
        )?;
        info!(grant_id = %grant_id, reason = %reason, "grant revoked");
        if let Some(events) = &self.events {
            let _ = events.send(GatewayEvent::AccessRevoked {
                grant_id: grant_id.to_string(),
                reason: reason.to_string(),
            });
        }
        Ok(grant)
    }

    /// Suspend an active grant.
    ///
    /// # Errors
    ///
    /// Returns an error if the grant does not exist or is not active.
    pub fn suspend(&self, grant_id: &str) -> Result<AccessGrant> {
        let grant =
            self.store
                .set_status(grant_id, &[GrantStatus::Active], GrantStatus::Suspended, None)?;
        debug!(grant_id = %grant_id, "grant suspended");
        Ok(grant)
    }

    /// Reinstate a suspended grant that has not expired.
    ///
    /// # Errors
    ///
    /// Returns an error if the grant does not exist, is not suspended, or
    /// its validity window has already passed.
    pub fn reinstate(&self, grant_id: &str) -> Result<AccessGrant> {
        let now = self.clock.now();
        if let Some(grant) = self.store.get(grant_id) {
            if grant.expires_at <= now {
                return Err(crate::Error::GrantState(format!(
                    "cannot reinstate an expired grant: {grant_id}"
                )));
            }
        }
        let grant =
            self.store
                .set_status(grant_id, &[GrantStatus::Suspended], GrantStatus::Active, None)?;
        debug!(grant_id = %grant_id, "grant reinstated");
        Ok(grant)
    }

    /// Record a download against an active grant. Does not affect expiry.
    ///
    /// # Errors
    ///
    /// Returns an error if the grant does not exist or is not active.
    pub fn record_download(
        &self,
        grant_id: &str,
        bytes: u64,
        source: &str,
    ) -> Result<AccessGrant> {
        self.store.record_download(
            grant_id,
            DownloadRecord {
                at: self.clock.now(),
                bytes,
                source: source.to_string(),
            },
        )
    }

    /// Flip overdue active grants to expired. Returns how many flipped.
    pub fn sweep_expired(&self) -> usize {
        let flipped = self.store.sweep_expired(self.clock.now());
        if flipped > 0 {
            debug!(flipped, "expired access grants swept");
        }
        flipped
    }

    fn emit_granted(&self, grant: &AccessGrant) {
        if let Some(events) = &self.events {
            let _ = events.send(GatewayEvent::AccessGranted {
                grant_id: grant.id.clone(),
                evaluation_ref: grant.evaluation_ref.clone(),
                grantee_id: grant.grantee_id.clone(),
            });
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::id::SequenceGenerator;
    use crate::intent::{IntentStatus, PaymentIntent};

    fn intent(id: &str, evaluation_ref: &str) -> PaymentIntent {
        let now = Utc::now();
        PaymentIntent {
            id: id.to_string(),
            evaluation_ref: evaluation_ref.to_string(),
            payer_wallet: "rPayer111".to_string(),
            destination_wallet: "rGateway222".to_string(),
            amount_usd: 15.0,
            amount_drops: 30_000_000,
            status: IntentStatus::Processing,
            created_at: now,
            expires_at: now + Duration::minutes(30),
            confirmed_tx_id: None,
            verification_ref: None,
            failure_reason: None,
        }
    }

    fn authority(clock: ManualClock) -> GrantAuthority {
        GrantAuthority::new(
            Arc::new(InMemoryGrantStore::new()),
            Arc::new(SequenceGenerator::default()),
            Arc::new(clock),
            30,
        )
    }

    #[test]
    fn test_grant_is_idempotent_per_pair() {
        let clock = ManualClock::starting_at(Utc::now());
        let authority = authority(clock.clone());

        let first = authority
            .grant_access(&intent("intent-1", "E1"), "H1")
            .expect("grant");
        assert_eq!(first.expires_at, clock.now() + Duration::days(30));

        clock.advance(Duration::days(1));
        let second = authority
            .grant_access(&intent("intent-2", "E1"), "H1")
            .expect("grant");

        // Same grant, extended rather than duplicated.
        assert_eq!(second.id, first.id);
        assert_eq!(second.expires_at, clock.now() + Duration::days(30));
    }

    #[test]
    fn test_check_access_does_not_mutate_expiry() {
        let clock = ManualClock::starting_at(Utc::now());
        let authority = authority(clock.clone());
        let grant = authority
            .grant_access(&intent("intent-1", "E1"), "H1")
            .expect("grant");

        let status = authority.check_access("E1", "H1");
        assert!(status.has_access);
        assert_eq!(status.expires_at, Some(grant.expires_at));

        // Past expiry the check flips to false without mutating the record.
        clock.advance(Duration::days(31));
        let status = authority.check_access("E1", "H1");
        assert!(!status.has_access);
        let stored = authority.get(&grant.id).expect("get");
        assert_eq!(stored.status, GrantStatus::Active);
        assert_eq!(stored.expires_at, grant.expires_at);
    }

    #[test]
    fn test_revoke_is_irreversible() {
        let clock = ManualClock::starting_at(Utc::now());
        let authority = authority(clock);
        let grant = authority
            .grant_access(&intent("intent-1", "E1"), "H1")
            .expect("grant");

        let revoked = authority
            .revoke(&grant.id, "billing dispute")
            .expect("revoke");
        assert_eq!(revoked.status, GrantStatus::Revoked);
        assert_eq!(revoked.revoked_reason.as_deref(), Some("billing dispute"));
        assert!(authority.reinstate(&grant.id).is_err());
        assert!(!authority.check_access("E1", "H1").has_access);
    }

    #[test]
    fn test_suspend_and_reinstate() {
        let clock = ManualClock::starting_at(Utc::now());
        let authority = authority(clock.clone());
        let grant = authority
            .grant_access(&intent("intent-1", "E1"), "H1")
            .expect("grant");

        authority.suspend(&grant.id).expect("suspend");
        assert!(!authority.check_access("E1", "H1").has_access);

        authority.reinstate(&grant.id).expect("reinstate");
        assert!(authority.check_access("E1", "H1").has_access);

        // A suspended grant whose window passed cannot come back.
        authority.suspend(&grant.id).expect("suspend");
        clock.advance(Duration::days(31));
        assert!(authority.reinstate(&grant.id).is_err());
    }

    #[test]
    fn test_downloads_do_not_touch_expiry() {
        let clock = ManualClock::starting_at(Utc::now());
        let authority = authority(clock);
        let grant = authority
            .grant_access(&intent("intent-1", "E1"), "H1")
            .expect("grant");

        let updated = authority
            .record_download(&grant.id, 4096, "s3")
            .expect("download");
        assert_eq!(updated.download_history.len(), 1);
        assert_eq!(updated.expires_at, grant.expires_at);
    }

    #[test]
    fn test_sweep_expires_overdue_grants() {
        let clock = ManualClock::starting_at(Utc::now());
        let authority = authority(clock.clone());
        let grant = authority
            .grant_access(&intent("intent-1", "E1"), "H1")
            .expect("grant");

        clock.advance(Duration::days(31));
        assert_eq!(authority.sweep_expired(), 1);
        assert_eq!(
            authority.get(&grant.id).expect("get").status,
            GrantStatus::Expired
        );
    }
}
