//! HTTP handlers: button triggers, snooze control, chime listing, health.

use std::time::Duration;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::error::{AppError, AppResult};
use crate::models::duration::parse_duration;
use crate::models::event::{ButtonEventType, Event};
use crate::services::{BroadcastReport, ChimeRegistry};

/// Source tag carried by button events triggered over HTTP.
pub const SOURCE_WEB: &str = "web";

/// Shared application state for HTTP and websocket handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: ChimeRegistry,
    pub push_release_delay: Duration,
}

impl AppState {
    pub fn new(registry: ChimeRegistry) -> Self {
        Self {
            registry,
            push_release_delay: Duration::from_secs(1),
        }
    }

    pub fn with_push_release_delay(mut self, delay: Duration) -> Self {
        self.push_release_delay = delay;
        self
    }

    pub fn registry(&self) -> &ChimeRegistry {
        &self.registry
    }
}

#[derive(Debug, Serialize)]
pub struct TriggerResponse {
    pub ok: bool,
    pub event: &'static str,
    pub delivered: usize,
    pub dropped: Vec<String>,
}

impl TriggerResponse {
    fn new(event: &'static str, report: BroadcastReport) -> Self {
        Self {
            ok: true,
            event,
            delivered: report.delivered,
            dropped: report.saturated,
        }
    }
}

async fn broadcast_button(state: &AppState, kind: ButtonEventType) -> AppResult<BroadcastReport> {
    let report = state.registry.broadcast(Event::button(kind, SOURCE_WEB)).await?;
    Ok(report)
}

/// POST /button/push
pub async fn button_push(State(state): State<AppState>) -> AppResult<Json<TriggerResponse>> {
    let report = broadcast_button(&state, ButtonEventType::Pressed).await?;
    Ok(Json(TriggerResponse::new("pressed", report)))
}

/// POST /button/release
pub async fn button_release(State(state): State<AppState>) -> AppResult<Json<TriggerResponse>> {
    let report = broadcast_button(&state, ButtonEventType::Released).await?;
    Ok(Json(TriggerResponse::new("released", report)))
}

/// POST /button/push-release: press, then release after the configured delay.
pub async fn button_push_release(State(state): State<AppState>) -> AppResult<Json<TriggerResponse>> {
    broadcast_button(&state, ButtonEventType::Pressed).await?;
    tokio::time::sleep(state.push_release_delay).await;
    let report = broadcast_button(&state, ButtonEventType::Released).await?;
    Ok(Json(TriggerResponse::new("push-release", report)))
}

#[derive(Debug, Deserialize)]
pub struct SnoozeParams {
    pub name: Option<String>,
    pub duration: Option<String>,
}

fn required(value: Option<String>, field: &str) -> AppResult<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::Validation(format!("Missing {}", field)))
}

/// POST /chime/snooze?name=<chime>&duration=<e.g. 30m>
pub async fn snooze(
    State(state): State<AppState>,
    Query(params): Query<SnoozeParams>,
) -> AppResult<Json<serde_json::Value>> {
    let name = required(params.name, "name")?;
    let duration = parse_duration(&required(params.duration, "duration")?)?;
    let duration = chrono::Duration::from_std(duration)
        .map_err(|_| AppError::Validation("Duration too large".to_string()))?;
    let until = Utc::now()
        .checked_add_signed(duration)
        .ok_or_else(|| AppError::Validation("Duration too large".to_string()))?;

    info!(chime = %name, minutes = duration.num_minutes(), "snoozing chime");
    state.registry.set_snooze(&name, until).await?;
    Ok(Json(json!({
        "ok": true,
        "name": name,
        "snoozeUntil": until.to_rfc3339(),
    })))
}

#[derive(Debug, Deserialize)]
pub struct UnSnoozeParams {
    pub name: Option<String>,
}

/// POST /chime/unsnooze?name=<chime>
pub async fn unsnooze(
    State(state): State<AppState>,
    Query(params): Query<UnSnoozeParams>,
) -> AppResult<Json<serde_json::Value>> {
    let name = required(params.name, "name")?;
    info!(chime = %name, "unsnoozing chime");
    state.registry.clear_snooze(&name).await?;
    Ok(Json(json!({ "ok": true, "name": name })))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChimeView {
    pub name: String,
    /// RFC 3339 expiry, present only while the snooze is active.
    pub snooze_expiry: Option<String>,
}

/// GET /chimes: registered chimes and their active snooze.
pub async fn list_chimes(State(state): State<AppState>) -> Json<Vec<ChimeView>> {
    let now = Utc::now();
    let chimes = state
        .registry
        .list_chimes()
        .await
        .into_iter()
        .map(|chime| ChimeView {
            snooze_expiry: chime.active_snooze(now).map(|t| t.to_rfc3339()),
            name: chime.name,
        })
        .collect();
    Json(chimes)
}

/// GET /ping
pub async fn ping() -> &'static str {
    "pong"
}

/// GET /health
pub async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({ "status": "ok", "service": "bellpush" })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_trims_and_rejects_blank() {
        assert_eq!(required(Some(" porch ".into()), "name").unwrap(), "porch");
        assert!(matches!(
            required(Some("  ".into()), "name"),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(required(None, "duration"), Err(AppError::Validation(_))));
    }
}
