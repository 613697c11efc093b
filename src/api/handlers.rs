use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::alerts::{RuleDraft, RuleListFilter, RulePatch};
use crate::api::params::{
    parse_bound, AuditQueryParams, LogQueryParams, VerifyParams, WindowParams,
};
use crate::api::AppState;
use crate::chain::RawLogPayload;
use crate::error::{LedgerError, LedgerResult};
use crate::retention::PruneRequest;
use crate::stats::DEFAULT_STATS_WINDOW;

const API_ACTOR: &str = "api";

pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "action-ledger",
        "backend": state.ledger.backend_name(),
        "timestamp": chrono::Utc::now()
    }))
}

pub async fn append_log(
    State(state): State<AppState>,
    Json(payload): Json<RawLogPayload>,
) -> LedgerResult<(StatusCode, Json<Value>)> {
    let entry = state.ledger.append_raw(payload).await?;

    match state.ledger.run_scheduled_prune().await {
        Ok(Some(result)) => info!("Scheduled prune removed {} entries", result.deleted),
        Ok(None) => {}
        Err(e) => warn!("Scheduled prune failed: {}", e),
    }

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "backend": state.ledger.backend_name(),
            "entry": entry
        })),
    ))
}

pub async fn query_logs(
    State(state): State<AppState>,
    Query(params): Query<LogQueryParams>,
) -> LedgerResult<Json<Value>> {
    let filter = params.filter()?;
    let (page, page_size) = params.page()?;
    let result = state.ledger.query(&filter, page, page_size).await?;

    Ok(Json(json!({
        "backend": state.ledger.backend_name(),
        "entries": result.entries,
        "total": result.total,
        "page": result.page,
        "per_page": result.per_page
    })))
}

pub async fn verify_logs(
    State(state): State<AppState>,
    Query(params): Query<VerifyParams>,
) -> LedgerResult<Json<Value>> {
    let report = match params.range()? {
        Some((from_id, to_id)) => state.ledger.verify_range(from_id, to_id).await?,
        None => state.ledger.verify(API_ACTOR).await?,
    };

    let mut body = serde_json::to_value(&report)?;
    body["backend"] = json!(state.ledger.backend_name());
    Ok(Json(body))
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PruneBody {
    pub older_than_days: Option<i64>,
    pub cutoff: Option<Value>,
    #[serde(default)]
    pub dry_run: bool,
    pub max_days: Option<u32>,
    pub min_remaining: Option<u64>,
    pub actor: Option<String>,
}

impl PruneBody {
    fn request(&self, now: i64) -> LedgerResult<PruneRequest> {
        let mut request = match (self.older_than_days, &self.cutoff) {
            (Some(days), _) => PruneRequest::older_than_days(days, now)?,
            (None, Some(cutoff)) => {
                let raw = match cutoff {
                    Value::String(s) => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                };
                let cutoff = parse_bound("cutoff", &raw, false)?
                    .ok_or_else(|| LedgerError::missing_field("cutoff"))?;
                PruneRequest::before(cutoff)
            }
            (None, None) => {
                return Err(LedgerError::Validation(
                    "older_than_days or cutoff is required".to_string(),
                ))
            }
        };

        request = request.dry_run(self.dry_run);
        if let Some(max_days) = self.max_days.filter(|d| *d > 0) {
            request = request.max_days(max_days);
        }
        if let Some(min_remaining) = self.min_remaining.filter(|m| *m > 0) {
            request = request.min_remaining(min_remaining);
        }
        Ok(request)
    }
}

pub async fn prune_logs(
    State(state): State<AppState>,
    Json(body): Json<PruneBody>,
) -> LedgerResult<Json<Value>> {
    let request = body.request(chrono::Utc::now().timestamp())?;
    let actor = body.actor.as_deref().unwrap_or(API_ACTOR);
    let result = state.ledger.prune(request, actor).await?;

    let mut body = serde_json::to_value(&result)?;
    body["backend"] = json!(state.ledger.backend_name());
    Ok(Json(body))
}

pub async fn stats(
    State(state): State<AppState>,
    Query(params): Query<WindowParams>,
) -> LedgerResult<Json<Value>> {
    let window = params.window()?.unwrap_or(DEFAULT_STATS_WINDOW);
    let stats = state.ledger.stats(window).await?;
    Ok(Json(serde_json::to_value(stats)?))
}

pub async fn query_audits(
    State(state): State<AppState>,
    Query(params): Query<AuditQueryParams>,
) -> LedgerResult<Json<Value>> {
    let filter = params.filter()?;
    let (page, per_page) = params.page()?;
    let result = state.ledger.audits(&filter, page, per_page).await?;
    Ok(Json(serde_json::to_value(result)?))
}

pub async fn list_rules(
    State(state): State<AppState>,
    Query(filter): Query<RuleListFilter>,
) -> LedgerResult<Json<Value>> {
    let page = state.ledger.rules().list(&filter).await?;
    Ok(Json(serde_json::to_value(page)?))
}

pub async fn create_rule(
    State(state): State<AppState>,
    Json(mut draft): Json<RuleDraft>,
) -> LedgerResult<(StatusCode, Json<Value>)> {
    if draft.window_seconds.is_none() {
        draft.window_seconds = Some(state.config.alerts.default_window_seconds);
    }
    let rule = state.ledger.rules().create(draft).await?;
    Ok((StatusCode::CREATED, Json(serde_json::to_value(rule)?)))
}

pub async fn update_rule(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(patch): Json<RulePatch>,
) -> LedgerResult<Json<Value>> {
    let rule = state.ledger.rules().update(id, patch).await?;
    Ok(Json(serde_json::to_value(rule)?))
}

pub async fn delete_rule(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> LedgerResult<Json<Value>> {
    state.ledger.rules().delete(id).await?;
    Ok(Json(json!({ "deleted": id })))
}

pub async fn evaluate_rules(
    State(state): State<AppState>,
    Query(params): Query<WindowParams>,
) -> LedgerResult<Json<Value>> {
    let evaluations = state.ledger.evaluate_rules(params.window()?).await?;
    Ok(Json(json!({
        "backend": state.ledger.backend_name(),
        "evaluations": evaluations
    })))
}
