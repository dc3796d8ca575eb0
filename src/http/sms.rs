//! SMS webhook — Twilio posts inbound messages here as form data.

use axum::extract::{Form, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use crate::store::NewUser;
use crate::survey::{ConversationPhase, InboundMessage};

use super::AppState;

/// Twilio's inbound-message form fields (the subset we use).
#[derive(Debug, Deserialize)]
pub struct SmsWebhookForm {
    #[serde(rename = "From")]
    pub from: Option<String>,
    #[serde(rename = "Body")]
    pub body: Option<String>,
}

/// Normalize a phone number to E.164. Twilio already sends E.164, but bare
/// US numbers from other paths get a `+1` prefix.
pub fn normalize_phone(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.starts_with('+') {
        trimmed.to_string()
    } else {
        format!("+1{}", trimmed.strip_prefix('1').unwrap_or(trimmed))
    }
}

/// POST /api/sms/webhook
pub async fn webhook(
    State(state): State<AppState>,
    Form(form): Form<SmsWebhookForm>,
) -> impl IntoResponse {
    let (from, body) = match (form.from, form.body) {
        (Some(f), Some(b)) if !f.trim().is_empty() && !b.trim().is_empty() => (f, b),
        _ => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"error": "Missing required fields"})),
            );
        }
    };

    let phone = normalize_phone(&from);

    // Get or create the user.
    let user = match state.users.get_by_phone(&phone).await {
        Ok(Some(user)) => {
            if let Err(e) = state.users.touch_activity(user.id).await {
                tracing::warn!(user_id = %user.id, "Failed to touch user activity: {e}");
            }
            user
        }
        Ok(None) => match state
            .users
            .create(NewUser {
                phone_number: phone.clone(),
                ..Default::default()
            })
            .await
        {
            Ok(user) => user,
            Err(e) => {
                tracing::error!("Failed to create user: {e}");
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(serde_json::json!({"error": "Failed to create user"})),
                );
            }
        },
        Err(e) => {
            tracing::error!("User lookup failed: {e}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": "Internal server error"})),
            );
        }
    };

    // Get or create the conversation. First contact gets the welcome message
    // without invoking the engine — the welcome already asks question 1.
    let conversation = match state.conversations.get_by_user(user.id).await {
        Ok(Some(conversation)) => conversation,
        Ok(None) => {
            match state
                .conversations
                .create(user.id, ConversationPhase::Welcome)
                .await
            {
                Ok(_) => {
                    let welcome = state.engine.welcome_text(user.first_name.as_deref());
                    let delivery = state.notifier.send(&phone, &welcome).await;
                    if !delivery.success {
                        tracing::warn!(
                            user_id = %user.id,
                            error = delivery.error.as_deref().unwrap_or("unknown"),
                            "Failed to send welcome SMS"
                        );
                    }
                    return (StatusCode::OK, Json(serde_json::json!({"status": "ok"})));
                }
                Err(e) => {
                    tracing::error!("Failed to create conversation: {e}");
                    return (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        Json(serde_json::json!({"error": "Failed to create conversation"})),
                    );
                }
            }
        }
        Err(e) => {
            tracing::error!("Conversation lookup failed: {e}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": "Internal server error"})),
            );
        }
    };

    let reply = match state
        .engine
        .handle_message(InboundMessage {
            user_id: user.id,
            conversation_id: conversation.id,
            phase: conversation.phase,
            message: body.trim().to_string(),
            channel_address: phone.clone(),
            display_name: user.first_name.clone(),
        })
        .await
    {
        Ok(reply) => reply,
        Err(e) => {
            tracing::error!("Engine failed to process SMS: {e}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": "Internal server error"})),
            );
        }
    };

    let delivery = state.notifier.send(&phone, &reply.response_text()).await;
    if !delivery.success {
        tracing::warn!(
            user_id = %user.id,
            error = delivery.error.as_deref().unwrap_or("unknown"),
            "Failed to send reply SMS"
        );
    }

    (StatusCode::OK, Json(serde_json::json!({"status": "ok"})))
}
