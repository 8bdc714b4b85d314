use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Subscription level gating the monthly query limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    #[default]
    Free,
    Professional,
    Business,
    Enterprise,
}

impl Tier {
    pub const ALL: [Tier; 4] = [
        Tier::Free,
        Tier::Professional,
        Tier::Business,
        Tier::Enterprise,
    ];

    /// Monthly query limit. `None` means unbounded.
    pub fn limit(self) -> Option<u32> {
        match self {
            Tier::Free => Some(10),
            Tier::Professional => Some(100),
            Tier::Business => Some(500),
            Tier::Enterprise => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Professional => "professional",
            Tier::Business => "business",
            Tier::Enterprise => "enterprise",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Tier::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown tier: {s}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Canceled,
    PastDue,
    #[default]
    Trialing,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Canceled => "canceled",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Trialing => "trialing",
        }
    }
}

impl FromStr for SubscriptionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SubscriptionStatus::Active),
            "canceled" => Ok(SubscriptionStatus::Canceled),
            "past_due" => Ok(SubscriptionStatus::PastDue),
            "trialing" => Ok(SubscriptionStatus::Trialing),
            other => Err(format!("unknown subscription status: {other}")),
        }
    }
}

/// Billing details maintained by the external billing process. Never
/// consulted by the quota decision.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Subscription {
    pub status: SubscriptionStatus,
    pub billing_customer_id: Option<String>,
    pub billing_subscription_id: Option<String>,
    pub current_period_end: Option<DateTime<Utc>>,
}

/// Profile claims carried by a verified credential, used when an account is
/// first created.
#[derive(Debug, Clone, Default)]
pub struct AccountProfile {
    pub email: Option<String>,
    pub name: Option<String>,
}

/// Which counter a granted action is additionally recorded against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageKind {
    Query,
    Report,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageAccount {
    pub id: Uuid,
    pub identity: String,
    pub email: String,
    pub name: String,
    pub tier: Tier,
    pub queries_this_period: u32,
    pub reports_this_period: u32,
    pub period_anchor: DateTime<Utc>,
    pub subscription: Subscription,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

/// Successful `try_consume` outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Consumption {
    pub used: u32,
    pub limit: Option<u32>,
}

/// Denied `try_consume` outcome. Only bounded tiers can be exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QuotaExceeded {
    pub used: u32,
    pub limit: u32,
    pub tier: Tier,
}

/// Read-only view of an account's current period.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSnapshot {
    pub used: u32,
    pub limit: Option<u32>,
    pub tier: Tier,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percentage: Option<f64>,
    #[serde(rename = "resetDate")]
    pub period_anchor: DateTime<Utc>,
}

fn period_of(ts: &DateTime<Utc>) -> (i32, u32) {
    (ts.year(), ts.month())
}

impl UsageAccount {
    /// Fresh free-tier account for an identity seen for the first time.
    pub fn new(identity: impl Into<String>, profile: &AccountProfile, now: DateTime<Utc>) -> Self {
        let identity = identity.into();
        let email = profile
            .email
            .as_deref()
            .filter(|e| !e.is_empty())
            .unwrap_or(&identity)
            .to_lowercase();
        let name = profile
            .name
            .clone()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| email.clone());
        Self {
            id: Uuid::new_v4(),
            identity,
            email,
            name,
            tier: Tier::Free,
            queries_this_period: 0,
            reports_this_period: 0,
            period_anchor: now,
            subscription: Subscription::default(),
            created_at: now,
            last_seen_at: now,
        }
    }

    pub fn limit(&self) -> Option<u32> {
        self.tier.limit()
    }

    /// Resets the counters when `now` falls in a later calendar month than the
    /// anchor. Returns whether a reset happened.
    pub fn roll_if_new_month(&mut self, now: DateTime<Utc>) -> bool {
        if period_of(&now) > period_of(&self.period_anchor) {
            self.queries_this_period = 0;
            self.reports_this_period = 0;
            self.period_anchor = now;
            true
        } else {
            false
        }
    }

    /// Takes one query from the current period if the tier allows it.
    pub fn try_consume(&mut self) -> Result<Consumption, QuotaExceeded> {
        let limit = self.limit();
        if let Some(limit) = limit {
            if self.queries_this_period >= limit {
                return Err(QuotaExceeded {
                    used: self.queries_this_period,
                    limit,
                    tier: self.tier,
                });
            }
        }
        self.queries_this_period = self.queries_this_period.saturating_add(1);
        Ok(Consumption {
            used: self.queries_this_period,
            limit,
        })
    }

    pub fn record_report(&mut self) {
        self.reports_this_period = self.reports_this_period.saturating_add(1);
    }

    /// Status as it would read after a rollover at `now`, without touching
    /// the stored fields.
    pub fn peek_status(&self, now: DateTime<Utc>) -> UsageSnapshot {
        let mut view = self.clone();
        view.roll_if_new_month(now);
        let limit = view.limit();
        UsageSnapshot {
            used: view.queries_this_period,
            limit,
            tier: view.tier,
            percentage: limit.map(|l| {
                if l == 0 {
                    100.0
                } else {
                    f64::from(view.queries_this_period) / f64::from(l) * 100.0
                }
            }),
            period_anchor: view.period_anchor,
        }
    }
}
