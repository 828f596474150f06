//! Access grants between subjects and accessors.
//!
//! A subject may always access its own records. Anyone else needs an
//! active, unexpired grant. Revoking keeps the grant with `active = false`
//! so the history of who once had access survives.

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use medledger_common::{Error, Result, StorageKey, SubjectId};
use medledger_storage::{MemoryBackend, StorageBackend};

/// Default length of a time-bounded grant.
pub const DEFAULT_GRANT_DAYS: u32 = 30;

/// Longest allowed time-bounded grant.
pub const MAX_GRANT_DAYS: u32 = 365;

const GRANTS_KEY: &str = "access/grants.json";

/// Authorization for one accessor to read one subject's records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessGrant {
    pub subject_id: SubjectId,
    pub accessor_id: SubjectId,
    pub granted_at: DateTime<Utc>,
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,
}

impl AccessGrant {
    /// Whether the grant authorizes access at `now`.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        if !self.active {
            return false;
        }
        match self.expires_at {
            Some(expires) => now < expires,
            None => true,
        }
    }
}

type GrantKey = (SubjectId, SubjectId);

/// The grant relation, persisted as one JSON document.
pub struct AccessControl {
    grants: RwLock<BTreeMap<GrantKey, AccessGrant>>,
    backend: Arc<dyn StorageBackend>,
}

impl AccessControl {
    /// Empty grant set backed by memory.
    pub fn in_memory() -> Self {
        Self {
            grants: RwLock::new(BTreeMap::new()),
            backend: Arc::new(MemoryBackend::new()),
        }
    }

    /// Load the grant set from `backend`, starting empty if none is stored.
    ///
    /// # Errors
    /// - `Serialization` if the stored document is corrupt
    pub fn load(backend: Arc<dyn StorageBackend>) -> Result<Self> {
        let mut grants = BTreeMap::new();
        if let Some(bytes) = backend.get_optional(&StorageKey::parse(GRANTS_KEY)?)? {
            let stored: Vec<AccessGrant> = serde_json::from_slice(&bytes)?;
            for grant in stored {
                grants.insert((grant.subject_id.clone(), grant.accessor_id.clone()), grant);
            }
        }
        debug!(grants = grants.len(), "Loaded access grants");

        Ok(Self {
            grants: RwLock::new(grants),
            backend,
        })
    }

    /// Grant open-ended access. Idempotent; reactivates a revoked grant.
    ///
    /// # Errors
    /// - Storage failure while persisting
    pub fn grant(&self, subject: &SubjectId, accessor: &SubjectId) -> Result<()> {
        self.upsert(subject, accessor, None)
    }

    /// Grant access that lapses after `days` days.
    ///
    /// # Errors
    /// - `InvalidInput` if `days` is 0 or above [`MAX_GRANT_DAYS`]
    /// - Storage failure while persisting
    pub fn grant_for(&self, subject: &SubjectId, accessor: &SubjectId, days: u32) -> Result<()> {
        if days == 0 || days > MAX_GRANT_DAYS {
            return Err(Error::InvalidInput(format!(
                "Grant duration must be between 1 and {} days, got {}",
                MAX_GRANT_DAYS, days
            )));
        }
        let expires_at = Utc::now() + Duration::days(i64::from(days));
        self.upsert(subject, accessor, Some(expires_at))
    }

    fn upsert(
        &self,
        subject: &SubjectId,
        accessor: &SubjectId,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut grants = self.grants.write();
        let now = Utc::now();
        let key = (subject.clone(), accessor.clone());

        let grant = match grants.get(&key) {
            Some(grant) if grant.is_valid_at(now) && grant.expires_at == expires_at => {
                return Ok(());
            }
            Some(grant) => AccessGrant {
                active: true,
                granted_at: now,
                expires_at,
                revoked_at: None,
                ..grant.clone()
            },
            None => AccessGrant {
                subject_id: subject.clone(),
                accessor_id: accessor.clone(),
                granted_at: now,
                active: true,
                expires_at,
                revoked_at: None,
            },
        };

        let mut staged = grants.clone();
        staged.insert(key, grant);
        self.persist(&staged)?;
        *grants = staged;

        info!(subject = %subject, accessor = %accessor, expires = ?expires_at, "Granted access");
        Ok(())
    }

    /// Deactivate a grant. Revoking a missing or inactive grant is a no-op.
    ///
    /// # Errors
    /// - Storage failure while persisting
    pub fn revoke(&self, subject: &SubjectId, accessor: &SubjectId) -> Result<()> {
        let mut grants = self.grants.write();
        let key = (subject.clone(), accessor.clone());

        if !grants.get(&key).is_some_and(|grant| grant.active) {
            return Ok(());
        }

        let mut staged = grants.clone();
        if let Some(grant) = staged.get_mut(&key) {
            grant.active = false;
            grant.revoked_at = Some(Utc::now());
        }
        self.persist(&staged)?;
        *grants = staged;

        info!(subject = %subject, accessor = %accessor, "Revoked access");
        Ok(())
    }

    /// Whether `accessor` may access `subject`'s records right now.
    pub fn check(&self, subject: &SubjectId, accessor: &SubjectId) -> bool {
        if subject == accessor {
            return true;
        }
        self.grants
            .read()
            .get(&(subject.clone(), accessor.clone()))
            .is_some_and(|grant| grant.is_valid_at(Utc::now()))
    }

    /// [`AccessControl::check`] as a typed result.
    ///
    /// # Errors
    /// - `AccessDenied` if the check fails
    pub fn require(&self, subject: &SubjectId, accessor: &SubjectId) -> Result<()> {
        if self.check(subject, accessor) {
            Ok(())
        } else {
            debug!(subject = %subject, accessor = %accessor, "Access denied");
            Err(Error::access_denied(subject, accessor))
        }
    }

    /// Every grant ever made for `subject`, active or not, ordered by accessor.
    pub fn grants_for(&self, subject: &SubjectId) -> Vec<AccessGrant> {
        self.grants
            .read()
            .values()
            .filter(|grant| &grant.subject_id == subject)
            .cloned()
            .collect()
    }

    fn persist(&self, grants: &BTreeMap<GrantKey, AccessGrant>) -> Result<()> {
        let all: Vec<&AccessGrant> = grants.values().collect();
        let bytes = serde_json::to_vec_pretty(&all)?;
        self.backend.put(&StorageKey::parse(GRANTS_KEY)?, bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FlakyBackend;

    fn id(s: &str) -> SubjectId {
        SubjectId::new(s).unwrap()
    }

    #[test]
    fn test_self_access_always_allowed() {
        let access = AccessControl::in_memory();
        assert!(access.check(&id("alice"), &id("alice")));
        assert!(!access.check(&id("alice"), &id("bob")));
    }

    #[test]
    fn test_grant_and_revoke() {
        let access = AccessControl::in_memory();
        access.grant(&id("alice"), &id("bob")).unwrap();
        assert!(access.check(&id("alice"), &id("bob")));
        // Grants are directional.
        assert!(!access.check(&id("bob"), &id("alice")));

        access.revoke(&id("alice"), &id("bob")).unwrap();
        assert!(!access.check(&id("alice"), &id("bob")));

        let grants = access.grants_for(&id("alice"));
        assert_eq!(grants.len(), 1);
        assert!(!grants[0].active);
        assert!(grants[0].revoked_at.is_some());
    }

    #[test]
    fn test_grant_is_idempotent() {
        let access = AccessControl::in_memory();
        access.grant(&id("alice"), &id("bob")).unwrap();
        let first = access.grants_for(&id("alice"))[0].granted_at;
        access.grant(&id("alice"), &id("bob")).unwrap();

        let grants = access.grants_for(&id("alice"));
        assert_eq!(grants.len(), 1);
        assert_eq!(grants[0].granted_at, first);
    }

    #[test]
    fn test_regrant_after_revoke_reactivates() {
        let access = AccessControl::in_memory();
        access.grant(&id("alice"), &id("bob")).unwrap();
        access.revoke(&id("alice"), &id("bob")).unwrap();
        access.grant(&id("alice"), &id("bob")).unwrap();

        assert!(access.check(&id("alice"), &id("bob")));
        assert!(access.grants_for(&id("alice"))[0].revoked_at.is_none());
    }

    #[test]
    fn test_revoke_missing_is_noop() {
        let access = AccessControl::in_memory();
        access.revoke(&id("alice"), &id("nobody")).unwrap();
        assert!(access.grants_for(&id("alice")).is_empty());
    }

    #[test]
    fn test_require_distinguishes_denial() {
        let access = AccessControl::in_memory();
        let err = access.require(&id("alice"), &id("bob")).unwrap_err();
        assert!(err.is_access_denied());
        assert!(access.require(&id("alice"), &id("alice")).is_ok());
    }

    #[test]
    fn test_bounded_grant() {
        let access = AccessControl::in_memory();
        assert!(access.grant_for(&id("alice"), &id("bob"), 0).is_err());
        assert!(access.grant_for(&id("alice"), &id("bob"), MAX_GRANT_DAYS + 1).is_err());

        access.grant_for(&id("alice"), &id("bob"), DEFAULT_GRANT_DAYS).unwrap();
        assert!(access.check(&id("alice"), &id("bob")));
        let expires = access.grants_for(&id("alice"))[0].expires_at.unwrap();
        assert!(expires > Utc::now() + Duration::days(29));
    }

    #[test]
    fn test_expired_grant_is_inactive() {
        let grant = AccessGrant {
            subject_id: id("alice"),
            accessor_id: id("bob"),
            granted_at: Utc::now() - Duration::days(10),
            active: true,
            expires_at: Some(Utc::now() - Duration::days(1)),
            revoked_at: None,
        };
        assert!(!grant.is_valid_at(Utc::now()));
        assert!(grant.is_valid_at(Utc::now() - Duration::days(5)));
    }

    #[test]
    fn test_grants_survive_reload() {
        let backend: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        let access = AccessControl::load(backend.clone()).unwrap();
        access.grant(&id("alice"), &id("bob")).unwrap();
        access.grant(&id("alice"), &id("carol")).unwrap();
        access.revoke(&id("alice"), &id("carol")).unwrap();

        let reloaded = AccessControl::load(backend).unwrap();
        assert!(reloaded.check(&id("alice"), &id("bob")));
        assert!(!reloaded.check(&id("alice"), &id("carol")));
        assert_eq!(reloaded.grants_for(&id("alice")).len(), 2);
    }

    #[test]
    fn test_failed_write_leaves_grants_unchanged() {
        let backend = Arc::new(FlakyBackend::new());
        let access = AccessControl::load(backend.clone()).unwrap();
        access.grant(&id("alice"), &id("carol")).unwrap();

        backend.set_failing(true);
        assert!(access.grant(&id("alice"), &id("bob")).is_err());
        assert!(!access.check(&id("alice"), &id("bob")));

        assert!(access.revoke(&id("alice"), &id("carol")).is_err());
        assert!(access.check(&id("alice"), &id("carol")));
        assert!(access.grants_for(&id("alice"))[0].revoked_at.is_none());

        backend.set_failing(false);
        let reloaded = AccessControl::load(backend).unwrap();
        assert!(!reloaded.check(&id("alice"), &id("bob")));
        assert!(reloaded.check(&id("alice"), &id("carol")));
    }
}
