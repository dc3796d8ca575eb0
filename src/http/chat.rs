//! In-app chat endpoint — the signup widget talks to the engine here.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::survey::{ConversationPhase, InboundMessage};

use super::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub user_id: Uuid,
    /// Where out-of-band notifications go for this user.
    pub channel_address: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    /// Reply as one block.
    pub response: String,
    /// Reply as an ordered sequence, for bubble-style rendering.
    pub messages: Vec<String>,
    pub completed: bool,
    pub state: ConversationPhase,
}

/// POST /api/conversation/message
pub async fn message(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> impl IntoResponse {
    if request.message.trim().is_empty() || request.channel_address.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "error": "Missing required fields: userId, channelAddress, message"
            })),
        )
            .into_response();
    }

    let user = match state.users.get_by_id(request.user_id).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({"error": "User not found"})),
            )
                .into_response();
        }
        Err(e) => {
            tracing::error!("User lookup failed: {e}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": "Internal server error"})),
            )
                .into_response();
        }
    };

    if let Err(e) = state.users.touch_activity(user.id).await {
        tracing::warn!(user_id = %user.id, "Failed to touch user activity: {e}");
    }

    // Get or create the conversation. First contact returns the welcome
    // payload without invoking the engine.
    let conversation = match state.conversations.get_by_user(user.id).await {
        Ok(Some(conversation)) => conversation,
        Ok(None) => {
            match state
                .conversations
                .create(user.id, ConversationPhase::Welcome)
                .await
            {
                Ok(_) => {
                    let messages = state.engine.welcome_messages(user.first_name.as_deref());
                    return Json(ChatResponse {
                        response: messages.join("\n\n"),
                        messages,
                        completed: false,
                        state: ConversationPhase::Welcome,
                    })
                    .into_response();
                }
                Err(e) => {
                    tracing::error!("Failed to create conversation: {e}");
                    return (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        Json(serde_json::json!({"error": "Failed to create conversation"})),
                    )
                        .into_response();
                }
            }
        }
        Err(e) => {
            tracing::error!("Conversation lookup failed: {e}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": "Internal server error"})),
            )
                .into_response();
        }
    };

    // The __INIT__ sentinel and real answers both go through the engine; the
    // engine treats the sentinel as "greet me for the current state".
    match state
        .engine
        .handle_message(InboundMessage {
            user_id: user.id,
            conversation_id: conversation.id,
            phase: conversation.phase,
            message: request.message.trim().to_string(),
            channel_address: request.channel_address,
            display_name: user.first_name.clone(),
        })
        .await
    {
        Ok(reply) => Json(ChatResponse {
            response: reply.response_text(),
            messages: reply.messages.clone(),
            completed: reply.completed(),
            state: reply.new_phase,
        })
        .into_response(),
        Err(e) => {
            tracing::error!("Engine failed to process message: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": "Internal server error"})),
            )
                .into_response()
        }
    }
}
