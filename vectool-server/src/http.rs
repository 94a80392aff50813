use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use serde::Serialize;
use serde_json::Value;

use crate::mcp::{McpServer, PARSE_ERROR, error_response};

#[derive(Serialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

pub fn router(server: Arc<McpServer>) -> Router {
    Router::new().route("/mcp", post(mcp_handler)).with_state(server)
}

pub async fn mcp_handler(State(server): State<Arc<McpServer>>, body: Bytes) -> Response {
    if body.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiError {
                code: "empty_body".into(),
                message: "Request body must contain a JSON-RPC message".into(),
            }),
        )
            .into_response();
    }

    let message: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            let reply = error_response(Value::Null, PARSE_ERROR, &format!("Parse error: {e}"));
            return (StatusCode::BAD_REQUEST, Json(reply)).into_response();
        }
    };

    match server.handle(message).await {
        Some(reply) => (StatusCode::OK, Json(reply)).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}
