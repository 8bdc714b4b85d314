use crate::account::QuotaExceeded;

#[derive(Debug, thiserror::Error)]
pub enum QuotaError {
    #[error("Monthly query limit reached: used {} of {} ({} tier)", .0.used, .0.limit, .0.tier)]
    QuotaExceeded(QuotaExceeded),
    #[error("Account already exists for identity {0}")]
    DuplicateIdentity(String),
    #[error("Account not found for identity {0}")]
    AccountNotFound(String),
    #[error("Persistence error: {0}")]
    Persistence(String),
}

impl QuotaError {
    pub fn error_code(&self) -> &'static str {
        match self {
            QuotaError::QuotaExceeded(_) => "QUOTA_EXCEEDED",
            QuotaError::DuplicateIdentity(_) => "DUPLICATE_IDENTITY",
            QuotaError::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            QuotaError::Persistence(_) => "PERSISTENCE_ERROR",
        }
    }
}

impl From<rusqlite::Error> for QuotaError {
    fn from(err: rusqlite::Error) -> Self {
        QuotaError::Persistence(err.to_string())
    }
}

impl From<QuotaExceeded> for QuotaError {
    fn from(denied: QuotaExceeded) -> Self {
        QuotaError::QuotaExceeded(denied)
    }
}
