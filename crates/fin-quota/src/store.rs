use crate::account::{Subscription, UsageAccount};
use crate::error::QuotaError;
use crate::migrations;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Durable storage for usage accounts, one record per identity.
pub trait AccountRepository: Send + Sync {
    fn find_by_identity(&self, identity: &str) -> Result<Option<UsageAccount>, QuotaError>;

    /// Inserts a new account. Fails with `DuplicateIdentity` if the identity
    /// already has one.
    fn create(&self, account: UsageAccount) -> Result<UsageAccount, QuotaError>;

    fn save(&self, account: &UsageAccount) -> Result<(), QuotaError>;

    /// Read-modify-write of a single account. The account is only written
    /// back when `apply` succeeds. Implementations that can make the whole
    /// sequence atomic should override this.
    fn update(
        &self,
        identity: &str,
        apply: &mut dyn FnMut(&mut UsageAccount) -> Result<(), QuotaError>,
    ) -> Result<UsageAccount, QuotaError> {
        let mut account = self
            .find_by_identity(identity)?
            .ok_or_else(|| QuotaError::AccountNotFound(identity.to_string()))?;
        apply(&mut account)?;
        self.save(&account)?;
        Ok(account)
    }

    /// Cheap liveness probe for health reporting.
    fn ping(&self) -> bool {
        true
    }
}

/// SQLite-backed repository.
pub struct AccountStore {
    conn: Mutex<Connection>,
}

const SELECT_COLUMNS: &str = "id, identity, email, name, tier, queries_this_period, reports_this_period,
     period_anchor, subscription_status, billing_customer_id, billing_subscription_id,
     current_period_end, created_at, last_seen_at";

fn text_err(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, msg.into())
}

fn parse_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| text_err(idx, e.to_string()))
}

fn parse_opt_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(|e| text_err(idx, e.to_string()))
    })
    .transpose()
}

fn map_account(row: &Row<'_>) -> rusqlite::Result<UsageAccount> {
    let id: String = row.get(0)?;
    let tier: String = row.get(4)?;
    let status: String = row.get(8)?;
    Ok(UsageAccount {
        id: id.parse().map_err(|e: uuid::Error| text_err(0, e.to_string()))?,
        identity: row.get(1)?,
        email: row.get(2)?,
        name: row.get(3)?,
        tier: tier.parse().map_err(|e| text_err(4, e))?,
        queries_this_period: row.get(5)?,
        reports_this_period: row.get(6)?,
        period_anchor: parse_ts(row, 7)?,
        subscription: Subscription {
            status: status.parse().map_err(|e| text_err(8, e))?,
            billing_customer_id: row.get(9)?,
            billing_subscription_id: row.get(10)?,
            current_period_end: parse_opt_ts(row, 11)?,
        },
        created_at: parse_ts(row, 12)?,
        last_seen_at: parse_ts(row, 13)?,
    })
}

fn load(conn: &Connection, identity: &str) -> rusqlite::Result<Option<UsageAccount>> {
    conn.query_row(
        &format!("SELECT {SELECT_COLUMNS} FROM accounts WHERE identity = ?1"),
        [identity],
        map_account,
    )
    .optional()
}

fn write(conn: &Connection, account: &UsageAccount) -> Result<(), QuotaError> {
    let updated = conn.execute(
        "UPDATE accounts SET email = ?2, name = ?3, tier = ?4, queries_this_period = ?5,
             reports_this_period = ?6, period_anchor = ?7, subscription_status = ?8,
             billing_customer_id = ?9, billing_subscription_id = ?10, current_period_end = ?11,
             last_seen_at = ?12
         WHERE identity = ?1",
        rusqlite::params![
            account.identity,
            account.email,
            account.name,
            account.tier.as_str(),
            account.queries_this_period,
            account.reports_this_period,
            account.period_anchor.to_rfc3339(),
            account.subscription.status.as_str(),
            account.subscription.billing_customer_id,
            account.subscription.billing_subscription_id,
            account.subscription.current_period_end.map(|ts| ts.to_rfc3339()),
            account.last_seen_at.to_rfc3339(),
        ],
    )?;
    if updated == 0 {
        return Err(QuotaError::AccountNotFound(account.identity.clone()));
    }
    Ok(())
}

impl AccountStore {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        migrations::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        migrations::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, QuotaError> {
        self.conn
            .lock()
            .map_err(|_| QuotaError::Persistence("account store lock poisoned".to_string()))
    }
}

impl AccountRepository for AccountStore {
    fn find_by_identity(&self, identity: &str) -> Result<Option<UsageAccount>, QuotaError> {
        let conn = self.lock()?;
        Ok(load(&conn, identity)?)
    }

    fn create(&self, account: UsageAccount) -> Result<UsageAccount, QuotaError> {
        let conn = self.lock()?;
        let result = conn.execute(
            "INSERT INTO accounts (id, identity, email, name, tier, queries_this_period,
                 reports_this_period, period_anchor, subscription_status, billing_customer_id,
                 billing_subscription_id, current_period_end, created_at, last_seen_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            rusqlite::params![
                account.id.to_string(),
                account.identity,
                account.email,
                account.name,
                account.tier.as_str(),
                account.queries_this_period,
                account.reports_this_period,
                account.period_anchor.to_rfc3339(),
                account.subscription.status.as_str(),
                account.subscription.billing_customer_id,
                account.subscription.billing_subscription_id,
                account.subscription.current_period_end.map(|ts| ts.to_rfc3339()),
                account.created_at.to_rfc3339(),
                account.last_seen_at.to_rfc3339(),
            ],
        );
        match result {
            Ok(_) => Ok(account),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(QuotaError::DuplicateIdentity(account.identity))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, account: &UsageAccount) -> Result<(), QuotaError> {
        let conn = self.lock()?;
        write(&conn, account)
    }

    fn update(
        &self,
        identity: &str,
        apply: &mut dyn FnMut(&mut UsageAccount) -> Result<(), QuotaError>,
    ) -> Result<UsageAccount, QuotaError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut account = load(&tx, identity)?
            .ok_or_else(|| QuotaError::AccountNotFound(identity.to_string()))?;
        // Dropping `tx` on the error path rolls back.
        apply(&mut account)?;
        write(&tx, &account)?;
        tx.commit()?;
        Ok(account)
    }

    fn ping(&self) -> bool {
        match self.lock() {
            Ok(conn) => conn
                .query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                .is_ok(),
            Err(_) => false,
        }
    }
}
