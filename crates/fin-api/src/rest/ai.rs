use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use chrono::Utc;
use fin_llm::{
    build_prompt, format::strip_markdown, ChatMessage, Completion, ModelData, PromptRequest,
    ReportSection, REPORT_SYSTEM_PROMPT,
};
use fin_quota::{AccountProfile, Grant, UsageKind, UsageSnapshot};
use serde::{Deserialize, Serialize};

use crate::auth::VerifiedIdentity;
use crate::error::{ApiError, ApiErrorResponse};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeRequest {
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub system_message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChoiceMessage {
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct Choice {
    pub message: ChoiceMessage,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeResponse {
    pub choices: Vec<Choice>,
    pub model: Option<String>,
    pub usage: Option<serde_json::Value>,
    pub user_usage: UsageSnapshot,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRequest {
    #[serde(default)]
    pub model_data: ModelData,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportResponse {
    pub section: ReportSection,
    pub content: String,
    pub model: Option<String>,
    pub usage: Option<serde_json::Value>,
    pub user_usage: UsageSnapshot,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsResponse {
    pub message: &'static str,
    pub deepseek_configured: bool,
    pub auth0_configured: bool,
    pub database_configured: bool,
}

fn profile_of(identity: &VerifiedIdentity) -> AccountProfile {
    AccountProfile {
        email: identity.contact_address.clone(),
        name: identity.display_name.clone(),
    }
}

fn require_generator(state: &AppState) -> Result<(), ApiErrorResponse> {
    if state.generator.is_configured() {
        Ok(())
    } else {
        tracing::error!("Generation requested but no API key is configured");
        Err(ApiError::configuration("Missing API key").into())
    }
}

/// Charges one query to the caller. Runs on the blocking pool since the
/// store is synchronous SQLite.
async fn meter(
    state: &AppState,
    identity: &VerifiedIdentity,
    kind: UsageKind,
) -> Result<Grant, ApiErrorResponse> {
    let tracker = state.quota_tracker.clone();
    let id = identity.identity.clone();
    let profile = profile_of(identity);
    tokio::task::spawn_blocking(move || tracker.authorize(&id, &profile, Utc::now(), kind))
        .await
        .map_err(|e| {
            ApiErrorResponse::from((
                StatusCode::INTERNAL_SERVER_ERROR,
                ApiError::internal(format!("Usage tracking task failed: {}", e)),
            ))
        })?
        .map_err(|e| ApiErrorResponse::from(ApiError::quota(&e)))
}

async fn generate(state: &AppState, request: PromptRequest) -> Result<Completion, ApiErrorResponse> {
    state.generator.generate(request).await.map_err(|e| {
        tracing::error!("Generation failed: {}", e);
        ApiErrorResponse::from(ApiError::llm(&e))
    })
}

pub async fn analyze(
    State(state): State<AppState>,
    Extension(identity): Extension<VerifiedIdentity>,
    Json(req): Json<AnalyzeRequest>,
) -> Result<Json<AnalyzeResponse>, ApiErrorResponse> {
    let prompt = req
        .prompt
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| ApiErrorResponse::from(ApiError::bad_request("Prompt is required")))?;
    require_generator(&state)?;

    let grant = meter(&state, &identity, UsageKind::Query).await?;
    tracing::info!(
        identity = %identity.identity,
        tier = %grant.account.tier,
        "Forwarding analysis request"
    );

    let completion = generate(
        &state,
        PromptRequest {
            system_message: req.system_message,
            prior_messages: req.messages,
            ..PromptRequest::new(prompt)
        },
    )
    .await?;

    Ok(Json(AnalyzeResponse {
        choices: vec![Choice {
            message: ChoiceMessage {
                content: completion.content,
            },
        }],
        model: completion.model,
        usage: completion.usage,
        user_usage: grant.snapshot,
    }))
}

pub async fn report(
    State(state): State<AppState>,
    Extension(identity): Extension<VerifiedIdentity>,
    Path(section): Path<String>,
    Json(req): Json<ReportRequest>,
) -> Result<Json<ReportResponse>, ApiErrorResponse> {
    let section: ReportSection = section
        .parse()
        .map_err(|e: String| ApiErrorResponse::from(ApiError::bad_request(e)))?;
    require_generator(&state)?;

    let grant = meter(&state, &identity, UsageKind::Report).await?;
    let llm = &state.config.llm;
    let completion = generate(
        &state,
        PromptRequest {
            system_message: Some(REPORT_SYSTEM_PROMPT.to_string()),
            temperature: Some(llm.report_temperature),
            max_tokens: Some(llm.report_max_tokens),
            ..PromptRequest::new(build_prompt(section, &req.model_data))
        },
    )
    .await?;

    Ok(Json(ReportResponse {
        section,
        content: strip_markdown(&completion.content),
        model: completion.model,
        usage: completion.usage,
        user_usage: grant.snapshot,
    }))
}

pub async fn usage(
    State(state): State<AppState>,
    Extension(identity): Extension<VerifiedIdentity>,
) -> Result<Json<UsageSnapshot>, ApiErrorResponse> {
    let tracker = state.quota_tracker.clone();
    let snapshot = tokio::task::spawn_blocking(move || tracker.status(&identity.identity, Utc::now()))
        .await
        .map_err(|e| {
            ApiErrorResponse::from((
                StatusCode::INTERNAL_SERVER_ERROR,
                ApiError::internal(format!("Usage lookup task failed: {}", e)),
            ))
        })?
        .map_err(|e| ApiErrorResponse::from(ApiError::quota(&e)))?;
    Ok(Json(snapshot))
}

pub async fn diagnostics(State(state): State<AppState>) -> Json<DiagnosticsResponse> {
    let readiness = state.config.readiness();
    Json(DiagnosticsResponse {
        message: "AI routes working",
        deepseek_configured: readiness.llm_configured,
        auth0_configured: readiness.auth_configured,
        database_configured: readiness.database_configured,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn analyze_request_accepts_frontend_shape() {
        let req: AnalyzeRequest = serde_json::from_value(serde_json::json!({
            "prompt": "Assess leverage",
            "modelData": { "ccy": "JMD" },
            "systemMessage": "You are a credit analyst",
            "messages": [{ "role": "assistant", "content": "Earlier answer" }]
        }))
        .unwrap();
        assert_eq!(req.prompt.as_deref(), Some("Assess leverage"));
        assert_eq!(req.system_message.as_deref(), Some("You are a credit analyst"));
        assert_eq!(req.messages.len(), 1);
    }

    #[test]
    fn analyze_request_defaults_when_empty() {
        let req: AnalyzeRequest = serde_json::from_str("{}").unwrap();
        assert!(req.prompt.is_none());
        assert!(req.messages.is_empty());
    }

    #[test]
    fn report_request_tolerates_missing_model() {
        let req: ReportRequest = serde_json::from_str("{}").unwrap();
        assert!(req.model_data.historical_data.is_empty());
    }

    #[test]
    fn profile_comes_from_claims() {
        let identity = VerifiedIdentity {
            identity: "auth0|1".into(),
            display_name: Some("Ada".into()),
            contact_address: Some("ada@example.com".into()),
        };
        let profile = profile_of(&identity);
        assert_eq!(profile.email.as_deref(), Some("ada@example.com"));
        assert_eq!(profile.name.as_deref(), Some("Ada"));
    }

    #[test]
    fn diagnostics_uses_wire_names() {
        let json = serde_json::to_value(DiagnosticsResponse {
            message: "AI routes working",
            deepseek_configured: true,
            auth0_configured: false,
            database_configured: true,
        })
        .unwrap();
        assert_eq!(json["deepseekConfigured"], true);
        assert_eq!(json["auth0Configured"], false);
        assert_eq!(json["databaseConfigured"], true);
    }
}
