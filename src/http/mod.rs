//! HTTP delivery adapters — translate inbound channel traffic into engine
//! calls and render the results back out.

pub mod chat;
pub mod cron;
pub mod sms;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::notify::Notifier;
use crate::store::{ConversationStore, UserStore};
use crate::survey::{ConversationEngine, TimeoutSweeper};

/// Shared state for all routes.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ConversationEngine>,
    pub users: Arc<dyn UserStore>,
    pub conversations: Arc<dyn ConversationStore>,
    pub notifier: Arc<dyn Notifier>,
    pub sweeper: Arc<TimeoutSweeper>,
    pub sweep_threshold_days: i64,
    /// API key required by the cron endpoint; `None` disables the endpoint.
    pub internal_api_key: Option<String>,
}

async fn health() -> &'static str {
    "ok"
}

/// Build the application router.
pub fn app_routes(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/sms/webhook", post(sms::webhook))
        .route("/api/conversation/message", post(chat::message))
        .route("/api/cron/check-timeouts", post(cron::check_timeouts))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
