use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use crate::auth::AuthConfig;
use crate::llm::LlmConfig;
use crate::paths::ConfigPaths;

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    5000
}

fn default_allowed_origins() -> Vec<String> {
    vec![
        "http://localhost:3000".to_string(),
        "https://app.finsight.salesmasterjm.com".to_string(),
        "https://finsight.salesmasterjm.com".to_string(),
    ]
}

fn split_origins(val: &str) -> Vec<String> {
    val.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(skip)]
    paths: Option<ConfigPaths>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            allowed_origins: default_allowed_origins(),
            database_path: None,
            auth: AuthConfig::default(),
            llm: LlmConfig::default(),
            paths: None,
        }
    }
}

/// Which external services have the settings they need. Reported by the
/// diagnostics route and the `check` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    pub llm_configured: bool,
    pub auth_configured: bool,
    pub database_configured: bool,
}

impl ServerConfig {
    /// Returns the `ConfigPaths` for this config. If paths haven't been set,
    /// creates the default paths (may fail if `$HOME` is unset).
    pub fn paths(&self) -> anyhow::Result<ConfigPaths> {
        match &self.paths {
            Some(p) => Ok(p.clone()),
            None => ConfigPaths::new(),
        }
    }

    pub fn set_paths(&mut self, paths: ConfigPaths) {
        self.paths = Some(paths);
    }

    /// Load config from the default location (`~/.finsight/config.toml`),
    /// then apply environment overrides.
    pub fn load() -> anyhow::Result<Self> {
        let paths = ConfigPaths::new()?;
        Self::load_from(&paths, |key| std::env::var(key).ok())
    }

    /// Load config from a specific `ConfigPaths`, resolving overrides
    /// through `env`.
    pub fn load_from(
        paths: &ConfigPaths,
        env: impl Fn(&str) -> Option<String>,
    ) -> anyhow::Result<Self> {
        let config_file = paths.config_path();
        let mut config = if config_file.exists() {
            let content = std::fs::read_to_string(&config_file)?;
            let config: ServerConfig = toml::from_str(&content)?;
            config
        } else {
            Self::default()
        };
        config.paths = Some(paths.clone());
        config.apply_env(env)?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay the deployment environment variables on top of file values.
    pub fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) -> anyhow::Result<()> {
        if let Some(port) = env("PORT") {
            self.port = port
                .trim()
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a port number, got {port:?}"))?;
        }
        if let Some(host) = env("FINSIGHT_HOST") {
            self.host = host
                .trim()
                .parse()
                .map_err(|_| anyhow::anyhow!("FINSIGHT_HOST must be an IP address, got {host:?}"))?;
        }
        if let Some(origins) = env("FINSIGHT_ALLOWED_ORIGINS") {
            self.allowed_origins = split_origins(&origins);
        }
        if let Some(path) = env("FINSIGHT_DATABASE_PATH") {
            self.database_path = Some(PathBuf::from(path));
        }
        if let Some(domain) = env("AUTH0_DOMAIN") {
            self.auth.domain = Some(domain);
        }
        if let Some(audience) = env("AUTH0_AUDIENCE") {
            self.auth.audience = Some(audience);
        }
        if let Some(key) = env("DEEPSEEK_API_KEY") {
            self.llm.api_key = Some(key);
        }
        if let Some(url) = env("DEEPSEEK_BASE_URL") {
            self.llm.base_url = url;
        }
        Ok(())
    }

    /// Validate config values. Called automatically by `load` / `load_from`.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.port == 0 {
            anyhow::bail!("port must not be 0");
        }
        if self.allowed_origins.is_empty() {
            anyhow::bail!("allowed_origins must not be empty");
        }
        if self.allowed_origins.iter().any(|o| o.trim() == "*") {
            anyhow::bail!("allowed_origins must list exact origins, not \"*\"");
        }
        if self.llm.base_url.is_empty() {
            anyhow::bail!("llm.base_url must not be empty");
        }
        if !(0.0..=2.0).contains(&self.llm.temperature)
            || !(0.0..=2.0).contains(&self.llm.report_temperature)
        {
            anyhow::bail!("llm temperatures must be between 0 and 2");
        }
        if self.llm.max_tokens == 0 || self.llm.report_max_tokens == 0 {
            anyhow::bail!("llm max token settings must be greater than 0");
        }
        if self.llm.timeout_secs == 0 {
            anyhow::bail!("llm.timeout_secs must be greater than 0");
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn database_path(&self) -> anyhow::Result<PathBuf> {
        match &self.database_path {
            Some(path) => Ok(path.clone()),
            None => Ok(self.paths()?.database_path()),
        }
    }

    pub fn readiness(&self) -> Readiness {
        Readiness {
            llm_configured: self.llm.is_configured(),
            auth_configured: self.auth.is_configured(),
            database_configured: self.database_path().is_ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn test_paths() -> (tempfile::TempDir, ConfigPaths) {
        let dir = tempfile::tempdir().unwrap();
        let paths = ConfigPaths::with_base(dir.path().to_path_buf());
        (dir, paths)
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn default_produces_expected_values() {
        let config = ServerConfig::default();
        assert_eq!(config.host, IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert_eq!(config.port, 5000);
        assert_eq!(config.allowed_origins.len(), 3);
        assert_eq!(config.allowed_origins[0], "http://localhost:3000");
    }

    #[test]
    fn bind_addr_formats_correctly() {
        let mut config = ServerConfig::default();
        config.port = 8080;
        config.host = IpAddr::V4(Ipv4Addr::LOCALHOST);
        assert_eq!(config.bind_addr().to_string(), "127.0.0.1:8080");
    }

    #[test]
    fn bind_addr_supports_ipv6_host() {
        let (_dir, paths) = test_paths();
        let config = ServerConfig::load_from(&paths, |k| {
            (k == "FINSIGHT_HOST").then(|| "::".to_string())
        })
        .unwrap();
        let addr = config.bind_addr();
        assert!(addr.is_ipv6());
        assert_eq!(addr.port(), 5000);
        assert_eq!(addr.to_string(), "[::]:5000");
    }

    #[test]
    fn load_with_no_file_returns_default() {
        let (_dir, paths) = test_paths();
        let config = ServerConfig::load_from(&paths, no_env).unwrap();
        assert_eq!(config.port, 5000);
        assert_eq!(
            config.database_path().unwrap(),
            paths.database_path()
        );
    }

    #[test]
    fn load_with_partial_toml_fills_defaults() {
        let (_dir, paths) = test_paths();
        std::fs::write(
            paths.config_path(),
            "port = 7777\n[llm]\nmodel = \"other\"\n[auth]\ndomain = \"t.auth0.com\"\n",
        )
        .unwrap();
        let config = ServerConfig::load_from(&paths, no_env).unwrap();
        assert_eq!(config.port, 7777);
        assert_eq!(config.llm.model, "other");
        assert_eq!(config.llm.max_tokens, 1500);
        assert_eq!(config.auth.domain.as_deref(), Some("t.auth0.com"));
    }

    #[test]
    fn load_with_invalid_toml_returns_error() {
        let (_dir, paths) = test_paths();
        std::fs::write(paths.config_path(), "not valid {{{{ toml").unwrap();
        assert!(ServerConfig::load_from(&paths, no_env).is_err());
    }

    #[test]
    fn env_overrides_file_values() {
        let (_dir, paths) = test_paths();
        std::fs::write(paths.config_path(), "port = 7777\n").unwrap();
        let env: HashMap<&str, &str> = HashMap::from([
            ("PORT", "8081"),
            ("AUTH0_DOMAIN", "tenant.auth0.com"),
            ("AUTH0_AUDIENCE", "https://api"),
            ("DEEPSEEK_API_KEY", "sk-test"),
            ("FINSIGHT_ALLOWED_ORIGINS", "https://a.test, https://b.test,"),
            ("FINSIGHT_DATABASE_PATH", "/var/lib/finsight.db"),
        ]);
        let config =
            ServerConfig::load_from(&paths, |k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.port, 8081);
        assert_eq!(config.allowed_origins, vec!["https://a.test", "https://b.test"]);
        assert_eq!(
            config.database_path().unwrap(),
            PathBuf::from("/var/lib/finsight.db")
        );
        let readiness = config.readiness();
        assert!(readiness.llm_configured);
        assert!(readiness.auth_configured);
        assert!(readiness.database_configured);
    }

    #[test]
    fn bad_port_env_is_an_error() {
        let (_dir, paths) = test_paths();
        let result = ServerConfig::load_from(&paths, |k| {
            (k == "PORT").then(|| "eighty".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn readiness_reports_missing_credentials() {
        let mut config = ServerConfig::default();
        config.set_paths(ConfigPaths::with_base(PathBuf::from("/tmp/fin")));
        let readiness = config.readiness();
        assert!(!readiness.llm_configured);
        assert!(!readiness.auth_configured);
        assert!(readiness.database_configured);
    }

    #[test]
    fn validate_rejects_port_zero() {
        let mut config = ServerConfig::default();
        config.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_empty_origins() {
        let mut config = ServerConfig::default();
        config.allowed_origins.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_wildcard_origin() {
        let mut config = ServerConfig::default();
        config.allowed_origins.push("*".to_string());
        assert!(config.validate().is_err());

        let (_dir, paths) = test_paths();
        let result = ServerConfig::load_from(&paths, |k| {
            (k == "FINSIGHT_ALLOWED_ORIGINS").then(|| "*".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn validate_rejects_out_of_range_temperature() {
        let mut config = ServerConfig::default();
        config.llm.temperature = 3.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_timeout() {
        let mut config = ServerConfig::default();
        config.llm.timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn toml_roundtrip() {
        let config = ServerConfig::default();
        let serialized = toml::to_string(&config).unwrap();
        let deserialized: ServerConfig = toml::from_str(&serialized).unwrap();
        assert_eq!(deserialized.port, config.port);
        assert_eq!(deserialized.host, config.host);
        assert_eq!(deserialized.allowed_origins, config.allowed_origins);
    }
}
