//! Access grant records and persistence.
//!
//! Persistence is a narrow collaborator interface; the in-memory
//! implementation guards its table with a mutex and enforces the
//! one-active-grant-per-pair invariant at insert time.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Lifecycle status of an access grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GrantStatus {
    /// Grant is live (subject to its expiry).
    Active,
    /// Grant's validity window has passed.
    Expired,
    /// Grant was explicitly revoked. Irreversible.
    Revoked,
    /// Grant is temporarily suspended.
    Suspended,
}

/// One recorded download against a grant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadRecord {
    /// When the download happened.
    pub at: DateTime<Utc>,
    /// Bytes transferred.
    pub bytes: u64,
    /// Where the download was served from.
    pub source: String,
}

/// A time-bounded authorization to access an evaluation's record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessGrant {
    /// Grant identifier.
    pub id: String,
    /// Evaluation the grant covers.
    pub evaluation_ref: String,
    /// Hospital the grant was issued to.
    pub grantee_id: String,
    /// The payment intent that funded this grant.
    pub payment_intent_id: String,
    /// Lifecycle status.
    pub status: GrantStatus,
    /// When the grant was issued.
    pub granted_at: DateTime<Utc>,
    /// When the grant stops being valid.
    pub expires_at: DateTime<Utc>,
    /// Append-only download history.
    pub download_history: Vec<DownloadRecord>,
    /// Reason recorded on revocation.
    pub revoked_reason: Option<String>,
}

/// Narrow persistence interface for access grants.
pub trait GrantStore: Send + Sync {
    /// Insert a new grant.
    ///
    /// # Errors
    ///
    /// Returns an error if an active grant already exists for the
    /// `(evaluation_ref, grantee_id)` pair.
    fn insert(&self, grant: AccessGrant) -> Result<()>;

    /// Fetch a grant by id.
    fn get(&self, id: &str) -> Option<AccessGrant>;

    /// Find the active grant for a `(evaluation_ref, grantee_id)` pair.
    fn find_active(&self, evaluation_ref: &str, grantee_id: &str) -> Option<AccessGrant>;

    /// Find the grant funded by a payment intent.
    fn find_by_intent(&self, intent_id: &str) -> Option<AccessGrant>;

    /// Move an active grant's expiry forward.
    ///
    /// # Errors
    ///
    /// Returns an error if the grant does not exist or is not active.
    fn extend(&self, id: &str, expires_at: DateTime<Utc>) -> Result<AccessGrant>;

    /// Transition a grant's status, checking the current status first.
    ///
    /// # Errors
    ///
    /// Returns an error if the grant does not exist or its current status
    /// is not in `from`.
    fn set_status(
        &self,
        id: &str,
        from: &[GrantStatus],
        to: GrantStatus,
        reason: Option<String>,
    ) -> Result<AccessGrant>;

    /// Append a download record to an active grant.
    ///
    /// # Errors
    ///
    /// Returns an error if the grant does not exist or is not active.
    fn record_download(&self, id: &str, record: DownloadRecord) -> Result<AccessGrant>;

    /// Flip overdue active grants to expired. Returns how many flipped.
    fn sweep_expired(&self, now: DateTime<Utc>) -> usize;
}

/// Mutex-guarded in-memory grant store.
#[derive(Default)]
pub struct InMemoryGrantStore {
    inner: Mutex<HashMap<String, AccessGrant>>,
}

impl InMemoryGrantStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl GrantStore for InMemoryGrantStore {
    fn insert(&self, grant: AccessGrant) -> Result<()> {
        let mut grants = self.inner.lock();
        let duplicate = grants.values().any(|g| {
            g.status == GrantStatus::Active
                && g.evaluation_ref == grant.evaluation_ref
                && g.grantee_id == grant.grantee_id
        });
        if duplicate {
            return Err(Error::GrantState(format!(
                "active grant already exists for {}/{}",
                grant.evaluation_ref, grant.grantee_id
            )));
        }
        grants.insert(grant.id.clone(), grant);
        Ok(())
    }

    fn get(&self, id: &str) -> Option<AccessGrant> {
        self.inner.lock().get(id).cloned()
    }

    fn find_active(&self, evaluation_ref: &str, grantee_id: &str) -> Option<AccessGrant> {
        self.inner
            .lock()
            .values()
            .find(|g| {
                g.status == GrantStatus::Active
                    && g.evaluation_ref == evaluation_ref
                    && g.grantee_id == grantee_id
            })
            .cloned()
    }

    fn find_by_intent(&self, intent_id: &str) -> Option<AccessGrant> {
        self.inner
            .lock()
            .values()
            .find(|g| g.payment_intent_id == intent_id)
            .cloned()
    }

    fn extend(&self, id: &str, expires_at: DateTime<Utc>) -> Result<AccessGrant> {
        let mut grants = self.inner.lock();
        let grant = grants
            .get_mut(id)
            .ok_or_else(|| Error::GrantNotFound(id.to_string()))?;
        if grant.status != GrantStatus::Active {
            return Err(Error::GrantState(format!(
                "cannot extend a grant that is not active: {id}"
            )));
        }
        grant.expires_at = expires_at;
        Ok(grant.clone())
    }

    fn set_status(
        &self,
        id: &str,
        from: &[GrantStatus],
        to: GrantStatus,
        reason: Option<String>,
    ) -> Result<AccessGrant> {
        let mut grants = self.inner.lock();
        let grant = grants
            .get_mut(id)
            .ok_or_else(|| Error::GrantNotFound(id.to_string()))?;
        if !from.contains(&grant.status) {
            return Err(Error::GrantState(format!(
                "grant {id} cannot transition to {to:?} from {:?}",
                grant.status
            )));
        }
        grant.status = to;
        if to == GrantStatus::Revoked {
            grant.revoked_reason = reason;
        }
        Ok(grant.clone())
    }

    fn record_download(&self, id: &str, record: DownloadRecord) -> Result<AccessGrant> {
        let mut grants = self.inner.lock();
        let grant = grants
            .get_mut(id)
            .ok_or_else(|| Error::GrantNotFound(id.to_string()))?;
        if grant.status != GrantStatus::Active {
            return Err(Error::GrantState(format!(
                "cannot record a download on a grant that is not active: {id}"
            )));
        }
        grant.download_history.push(record);
        Ok(grant.clone())
    }

    fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let mut grants = self.inner.lock();
        let mut flipped = 0;
        for grant in grants.values_mut() {
            if grant.status == GrantStatus::Active && grant.expires_at <= now {
                grant.status = GrantStatus::Expired;
                flipped += 1;
            }
        }
        flipped
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn grant(id: &str, eval: &str, grantee: &str, expires_at: DateTime<Utc>) -> AccessGrant {
        AccessGrant {
            id: id.to_string(),
            evaluation_ref: eval.to_string(),
            grantee_id: grantee.to_string(),
            payment_intent_id: format!("intent-for-{id}"),
            status: GrantStatus::Active,
            granted_at: expires_at - Duration::days(30),
            expires_at,
            download_history: Vec::new(),
            revoked_reason: None,
        }
    }

    #[test]
    fn test_insert_rejects_duplicate_active_pair() {
        let store = InMemoryGrantStore::new();
        let expires = Utc::now() + Duration::days(30);
        store
            .insert(grant("grant-1", "E1", "H1", expires))
            .expect("insert");
        assert!(store.insert(grant("grant-2", "E1", "H1", expires)).is_err());
        // A different grantee for the same evaluation is fine.
        store
            .insert(grant("grant-3", "E1", "H2", expires))
            .expect("insert");
    }

    #[test]
    fn test_revoked_grant_frees_the_pair() {
        let store = InMemoryGrantStore::new();
        let expires = Utc::now() + Duration::days(30);
        store
            .insert(grant("grant-1", "E1", "H1", expires))
            .expect("insert");
        store
            .set_status(
                "grant-1",
                &[GrantStatus::Active],
                GrantStatus::Revoked,
                Some("billing dispute".to_string()),
            )
            .expect("revoke");
        assert!(store.find_active("E1", "H1").is_none());
        store
            .insert(grant("grant-2", "E1", "H1", expires))
            .expect("insert after revoke");
    }

    #[test]
    fn test_set_status_checks_source_state() {
        let store = InMemoryGrantStore::new();
        let expires = Utc::now() + Duration::days(30);
        store
            .insert(grant("grant-1", "E1", "H1", expires))
            .expect("insert");
        store
            .set_status("grant-1", &[GrantStatus::Active], GrantStatus::Revoked, None)
            .expect("revoke");
        // Revoked is irreversible.
        assert!(store
            .set_status("grant-1", &[GrantStatus::Suspended], GrantStatus::Active, None)
            .is_err());
    }

    #[test]
    fn test_download_history_appends() {
        let store = InMemoryGrantStore::new();
        let expires = Utc::now() + Duration::days(30);
        store
            .insert(grant("grant-1", "E1", "H1", expires))
            .expect("insert");

        for bytes in [100, 250] {
            store
                .record_download(
                    "grant-1",
                    DownloadRecord {
                        at: Utc::now(),
                        bytes,
                        source: "s3".to_string(),
                    },
                )
                .expect("download");
        }

        let stored = store.get("grant-1").expect("get");
        assert_eq!(stored.download_history.len(), 2);
        assert_eq!(stored.download_history[0].bytes, 100);
        assert_eq!(stored.download_history[1].bytes, 250);
        // Expiry is untouched by downloads.
        assert_eq!(stored.expires_at, expires);
    }

    #[test]
    fn test_sweep_flips_overdue_active_grants() {
        let store = InMemoryGrantStore::new();
        let now = Utc::now();
        store
            .insert(grant("grant-1", "E1", "H1", now - Duration::hours(1)))
            .expect("insert");
        store
            .insert(grant("grant-2", "E2", "H1", now + Duration::days(1)))
            .expect("insert");

        assert_eq!(store.sweep_expired(now), 1);
        assert_eq!(
            store.get("grant-1").expect("get").status,
            GrantStatus::Expired
        );
        assert_eq!(
            store.get("grant-2").expect("get").status,
            GrantStatus::Active
        );
    }
}
