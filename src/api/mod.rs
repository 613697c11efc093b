//! HTTP surface over the ledger. Callers are assumed to be authorized.

pub mod error;
pub mod handlers;
pub mod params;

use axum::{
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::config::AppConfig;
use crate::ledger::Ledger;

#[derive(Clone)]
pub struct AppState {
    pub ledger: Ledger,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(ledger: Ledger, config: AppConfig) -> Self {
        Self {
            ledger,
            config: Arc::new(config),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/logs", post(handlers::append_log).get(handlers::query_logs))
        .route("/logs/verify", get(handlers::verify_logs))
        .route("/logs/prune", post(handlers::prune_logs))
        .route("/stats", get(handlers::stats))
        .route("/audits", get(handlers::query_audits))
        .route("/alerts", get(handlers::list_rules).post(handlers::create_rule))
        .route("/alerts/evaluate", get(handlers::evaluate_rules))
        .route(
            "/alerts/:id",
            put(handlers::update_rule).delete(handlers::delete_rule),
        )
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .into_inner(),
        )
        .with_state(state)
}
