use axum::http::StatusCode;
use tracing::warn;

use pledge_chat::ChatError;

pub fn status_for(e: &ChatError) -> StatusCode {
    match e {
        ChatError::Authentication => StatusCode::UNAUTHORIZED,
        ChatError::NotFound(_) => StatusCode::NOT_FOUND,
        ChatError::Validation(_) => StatusCode::BAD_REQUEST,
        ChatError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        ChatError::Transport(_) | ChatError::Conflict(_) => StatusCode::BAD_GATEWAY,
    }
}

/// Logs a failed request's classification and picks its status.
pub fn reject(e: ChatError) -> StatusCode {
    let status = status_for(&e);
    if status.is_server_error() {
        warn!(kind = ?e.kind(), "chat request failed: {}", e);
    }
    status
}
