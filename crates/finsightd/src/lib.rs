//! Shared helpers and response types used by the `finsightd` binary.

use fin_config::{Readiness, ServerConfig};
use serde::Deserialize;
use std::net::IpAddr;

/// Build-time version string.
///
/// `FINSIGHTD_VERSION` from the build environment wins (release builds set
/// it); otherwise the crate package version is used.
pub const DAEMON_VERSION: &str = match option_env!("FINSIGHTD_VERSION") {
    Some(version) => version,
    None => env!("CARGO_PKG_VERSION"),
};

/// Body of `GET /health` as read back by `finsightd status`.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub database: String,
    pub version: String,
    pub timestamp: String,
}

/// URL a local client should use to reach the server's health route.
/// Wildcard binds are probed over loopback.
pub fn health_url(config: &ServerConfig) -> String {
    let host = match config.host {
        IpAddr::V4(ip) if ip.is_unspecified() => "127.0.0.1".to_string(),
        IpAddr::V6(ip) if ip.is_unspecified() => "[::1]".to_string(),
        IpAddr::V6(ip) => format!("[{ip}]"),
        IpAddr::V4(ip) => ip.to_string(),
    };
    format!("http://{}:{}/health", host, config.port)
}

fn mark(ok: bool) -> &'static str {
    if ok {
        "ok"
    } else {
        "missing"
    }
}

/// One line per external dependency, for `finsightd check`.
pub fn readiness_lines(readiness: &Readiness) -> Vec<String> {
    vec![
        format!("  Generation API key:   {}", mark(readiness.llm_configured)),
        format!("  Identity provider:    {}", mark(readiness.auth_configured)),
        format!("  Database location:    {}", mark(readiness.database_configured)),
    ]
}

/// Resolves when the process receives Ctrl-C or, on unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl+c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                ctrl_c.await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await;
    }

    tracing::info!("Shutting down...");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn health_url_uses_loopback_for_wildcard() {
        let config = ServerConfig::default();
        assert_eq!(health_url(&config), "http://127.0.0.1:5000/health");
    }

    #[test]
    fn health_url_keeps_explicit_host() {
        let mut config = ServerConfig::default();
        config.host = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7));
        config.port = 8080;
        assert_eq!(health_url(&config), "http://10.0.0.7:8080/health");

        config.host = IpAddr::V6(Ipv6Addr::LOCALHOST);
        assert_eq!(health_url(&config), "http://[::1]:8080/health");
    }

    #[test]
    fn readiness_lines_flag_missing_settings() {
        let lines = readiness_lines(&Readiness {
            llm_configured: true,
            auth_configured: false,
            database_configured: true,
        });
        assert_eq!(lines.len(), 3);
        assert!(lines[0].ends_with("ok"));
        assert!(lines[1].ends_with("missing"));
    }

    #[test]
    fn health_status_deserialize() {
        let json = serde_json::json!({
            "status": "OK",
            "message": "Backend is running",
            "database": "Connected",
            "version": "0.1.0",
            "timestamp": "2024-03-01T12:00:00Z"
        });
        let status: HealthStatus = serde_json::from_value(json).unwrap();
        assert_eq!(status.status, "OK");
        assert_eq!(status.database, "Connected");
    }

    #[test]
    fn health_status_missing_field_fails() {
        let json = serde_json::json!({ "status": "OK" });
        assert!(serde_json::from_value::<HealthStatus>(json).is_err());
    }

    #[test]
    fn daemon_version_is_not_empty() {
        assert!(!DAEMON_VERSION.is_empty());
    }
}
