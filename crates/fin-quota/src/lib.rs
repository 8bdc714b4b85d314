pub mod account;
pub mod error;
pub mod migrations;
pub mod store;
pub mod tracker;

pub use account::{
    AccountProfile, Consumption, QuotaExceeded, Subscription, SubscriptionStatus, Tier,
    UsageAccount, UsageKind, UsageSnapshot,
};
pub use error::QuotaError;
pub use store::{AccountRepository, AccountStore};
pub use tracker::{Grant, QuotaTracker};
