use fin_config::ServerConfig;
use fin_llm::{ChatCompletionsClient, GenerationClient};
use fin_quota::{AccountStore, QuotaTracker};
use std::sync::Arc;
use std::time::Duration;

use crate::auth::{IdentityVerifier, JwksVerifier, UnconfiguredVerifier};

#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    pub verifier: Arc<dyn IdentityVerifier>,
    pub quota_tracker: Arc<QuotaTracker>,
    pub generator: Arc<dyn GenerationClient>,
    pub version: &'static str,
}

impl AppState {
    pub fn new(config: ServerConfig) -> anyhow::Result<Self> {
        let db_path = match &config.database_path {
            Some(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)?;
                }
                path.clone()
            }
            None => {
                let paths = config.paths()?;
                paths.ensure_config_dir()?;
                paths.database_path()
            }
        };
        let store = Arc::new(AccountStore::open(&db_path)?);
        tracing::info!("Account store opened at {}", db_path.display());

        let verifier: Arc<dyn IdentityVerifier> =
            match (config.auth.jwks_uri(), config.auth.issuer(), &config.auth.audience) {
                (Some(jwks_uri), Some(issuer), Some(audience)) if config.auth.is_configured() => {
                    Arc::new(JwksVerifier::new(
                        jwks_uri,
                        issuer,
                        audience.clone(),
                        config.auth.jwks_refreshes_per_minute,
                    ))
                }
                _ => {
                    tracing::warn!("AUTH0_DOMAIN/AUTH0_AUDIENCE not set; protected routes will fail");
                    Arc::new(UnconfiguredVerifier)
                }
            };

        let llm = &config.llm;
        let generator = ChatCompletionsClient::new(
            llm.api_key.clone(),
            Duration::from_secs(llm.timeout_secs),
        )?
        .with_base_url(llm.base_url.clone())
        .with_model(llm.model.clone())
        .with_sampling(llm.temperature, llm.max_tokens);
        if !generator.is_configured() {
            tracing::warn!("DEEPSEEK_API_KEY not set; generation routes will fail");
        }

        Ok(Self::with_parts(
            config,
            verifier,
            Arc::new(QuotaTracker::new(store)),
            Arc::new(generator),
        ))
    }

    /// Overrides the version reported by `/health`, normally with the
    /// binary's build-time version.
    pub fn with_version(mut self, version: &'static str) -> Self {
        self.version = version;
        self
    }

    /// Assembles state from already-built collaborators.
    pub fn with_parts(
        config: ServerConfig,
        verifier: Arc<dyn IdentityVerifier>,
        quota_tracker: Arc<QuotaTracker>,
        generator: Arc<dyn GenerationClient>,
    ) -> Self {
        Self {
            config,
            verifier,
            quota_tracker,
            generator,
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}
