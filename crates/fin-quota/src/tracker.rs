use crate::account::{AccountProfile, Consumption, UsageAccount, UsageKind, UsageSnapshot};
use crate::error::QuotaError;
use crate::store::AccountRepository;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// A permitted, durably recorded metered action.
#[derive(Debug, Clone)]
pub struct Grant {
    pub consumption: Consumption,
    pub snapshot: UsageSnapshot,
    pub account: UsageAccount,
}

/// Applies the quota rules against a repository. Holds a per-identity lock
/// across read, roll, check, increment and persist so concurrent requests for
/// one identity cannot overshoot the limit.
pub struct QuotaTracker {
    repo: Arc<dyn AccountRepository>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl QuotaTracker {
    pub fn new(repo: Arc<dyn AccountRepository>) -> Self {
        Self {
            repo,
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn identity_lock(&self, identity: &str) -> Result<Arc<Mutex<()>>, QuotaError> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| QuotaError::Persistence("identity lock table poisoned".to_string()))?;
        Ok(locks
            .entry(identity.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone())
    }

    fn release_identity_lock(&self, identity: &str, lock: Arc<Mutex<()>>) {
        if let Ok(mut locks) = self.locks.lock() {
            // One reference in the map, one held here: nobody else is waiting.
            if Arc::strong_count(&lock) == 2 {
                locks.remove(identity);
            }
        }
    }

    fn with_identity_lock<T>(
        &self,
        identity: &str,
        f: impl FnOnce() -> Result<T, QuotaError>,
    ) -> Result<T, QuotaError> {
        let lock = self.identity_lock(identity)?;
        let result = {
            let _guard = lock
                .lock()
                .map_err(|_| QuotaError::Persistence("identity lock poisoned".to_string()))?;
            f()
        };
        self.release_identity_lock(identity, lock);
        result
    }

    fn find_or_create(
        &self,
        identity: &str,
        profile: &AccountProfile,
        now: DateTime<Utc>,
    ) -> Result<UsageAccount, QuotaError> {
        if let Some(account) = self.repo.find_by_identity(identity)? {
            return Ok(account);
        }
        match self.repo.create(UsageAccount::new(identity, profile, now)) {
            Ok(account) => {
                tracing::info!(identity, email = %account.email, "Created new account");
                Ok(account)
            }
            // Another process created it between the lookup and the insert.
            Err(QuotaError::DuplicateIdentity(_)) => self
                .repo
                .find_by_identity(identity)?
                .ok_or_else(|| QuotaError::AccountNotFound(identity.to_string())),
            Err(e) => Err(e),
        }
    }

    /// Returns the account for `identity`, creating a free-tier one on first
    /// contact.
    pub fn get_or_create_account(
        &self,
        identity: &str,
        profile: &AccountProfile,
        now: DateTime<Utc>,
    ) -> Result<UsageAccount, QuotaError> {
        self.with_identity_lock(identity, || self.find_or_create(identity, profile, now))
    }

    /// Rolls the period if needed, then takes one query from the quota and
    /// persists the result. Nothing is granted unless the write succeeds.
    pub fn authorize(
        &self,
        identity: &str,
        profile: &AccountProfile,
        now: DateTime<Utc>,
        kind: UsageKind,
    ) -> Result<Grant, QuotaError> {
        self.with_identity_lock(identity, || {
            self.find_or_create(identity, profile, now)?;

            let mut consumption = None;
            let account = self.repo.update(identity, &mut |account| {
                account.last_seen_at = now;
                if account.roll_if_new_month(now) {
                    tracing::info!(identity, "Monthly usage reset");
                }
                let granted = account.try_consume()?;
                if kind == UsageKind::Report {
                    account.record_report();
                }
                consumption = Some(granted);
                Ok(())
            });

            let account = match account {
                Ok(account) => account,
                Err(QuotaError::QuotaExceeded(denied)) => {
                    tracing::info!(
                        identity,
                        used = denied.used,
                        limit = denied.limit,
                        tier = %denied.tier,
                        "Quota exceeded"
                    );
                    return Err(QuotaError::QuotaExceeded(denied));
                }
                Err(e) => {
                    tracing::error!(identity, "Failed to record usage: {}", e);
                    return Err(e);
                }
            };

            let consumption = consumption.ok_or_else(|| {
                QuotaError::Persistence("usage update did not run".to_string())
            })?;
            tracing::info!(
                identity,
                used = consumption.used,
                limit = ?consumption.limit,
                tier = %account.tier,
                "Usage recorded"
            );
            Ok(Grant {
                consumption,
                snapshot: account.peek_status(now),
                account,
            })
        })
    }

    /// Read-only usage view. Fails with `AccountNotFound` for identities
    /// that have never made a metered request.
    pub fn status(&self, identity: &str, now: DateTime<Utc>) -> Result<UsageSnapshot, QuotaError> {
        let account = self
            .repo
            .find_by_identity(identity)?
            .ok_or_else(|| QuotaError::AccountNotFound(identity.to_string()))?;
        Ok(account.peek_status(now))
    }

    pub fn is_store_reachable(&self) -> bool {
        self.repo.ping()
    }
}
