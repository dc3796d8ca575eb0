//! Cron endpoint — external schedulers trigger the timeout sweep here.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;

use super::AppState;

/// POST /api/cron/check-timeouts
///
/// Guarded by the `x-api-key` header. When no key is configured the endpoint
/// refuses all callers rather than running unauthenticated.
pub async fn check_timeouts(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let presented = headers.get("x-api-key").and_then(|v| v.to_str().ok());
    let authorized = match (state.internal_api_key.as_deref(), presented) {
        (Some(expected), Some(key)) => key == expected,
        _ => false,
    };
    if !authorized {
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({"error": "Unauthorized"})),
        );
    }

    let outcome = state.sweeper.sweep(state.sweep_threshold_days).await;
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "success": true,
            "processed": outcome.processed,
            "errors": outcome.errors,
        })),
    )
}
