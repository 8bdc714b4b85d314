use serde::{Deserialize, Serialize};

/// Identity provider settings. Tokens are expected to be issued by
/// `https://{domain}/` for `audience`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub audience: Option<String>,
    #[serde(default = "default_jwks_refreshes_per_minute")]
    pub jwks_refreshes_per_minute: u32,
}

fn default_jwks_refreshes_per_minute() -> u32 {
    5
}

impl AuthConfig {
    pub fn is_configured(&self) -> bool {
        non_empty(&self.domain) && non_empty(&self.audience)
    }

    pub fn issuer(&self) -> Option<String> {
        self.domain
            .as_deref()
            .filter(|d| !d.is_empty())
            .map(|d| format!("https://{}/", d.trim_end_matches('/')))
    }

    pub fn jwks_uri(&self) -> Option<String> {
        self.issuer()
            .map(|issuer| format!("{issuer}.well-known/jwks.json"))
    }
}

fn non_empty(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.is_empty())
}
