use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub message: &'static str,
    pub database: &'static str,
    pub version: String,
    pub timestamp: DateTime<Utc>,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let tracker = state.quota_tracker.clone();
    let reachable = tokio::task::spawn_blocking(move || tracker.is_store_reachable())
        .await
        .unwrap_or(false);

    Json(HealthResponse {
        status: "OK",
        message: "Backend is running",
        database: if reachable { "Connected" } else { "Disconnected" },
        version: state.version.to_string(),
        timestamp: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn health_response_serialization() {
        let resp = HealthResponse {
            status: "OK",
            message: "Backend is running",
            database: "Connected",
            version: "1.0.0".to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
        };
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["status"], "OK");
        assert_eq!(json["database"], "Connected");
        assert_eq!(json["version"], "1.0.0");
        assert_eq!(json["timestamp"], "2024-03-01T12:00:00Z");
    }
}
