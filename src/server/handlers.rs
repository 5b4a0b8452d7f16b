//! 路由处理函数
//!
//! 请求体按原始字节读取后再反序列化，格式错误统一返回 `invalid_request_error`。

use std::convert::Infallible;

use axum::{
    body::{Body, Bytes},
    extract::State,
    response::{IntoResponse, Response},
    Json,
};
use futures::StreamExt;
use serde::de::DeserializeOwned;

use super::{sse_response, ApiError, AppState};
use crate::error::GatewayError;
use crate::gateway::GatewayResponse;
use crate::models::anthropic::AnthropicMessagesRequest;
use crate::models::openai::ChatCompletionRequest;
use crate::models::CanonicalRequest;
use crate::stream::FrontendType;
use crate::translator::{AnthropicRequestTranslator, OpenAiRequestTranslator, RequestTranslator};

fn parse_body<T: DeserializeOwned>(frontend: FrontendType, body: &Bytes) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| {
        tracing::warn!("[SERVER] 请求体解析失败 ({}): {}", frontend.as_str(), e);
        ApiError::new(frontend, GatewayError::InvalidRequest(e.to_string()))
    })
}

async fn dispatch(state: &AppState, frontend: FrontendType, request: CanonicalRequest) -> Response {
    tracing::info!(
        "[SERVER] {} 请求: model={} stream={} messages={}",
        frontend.as_str(),
        request.model,
        request.stream,
        request.messages.len()
    );

    match state.gateway.dispatch(frontend, request).await {
        Ok(GatewayResponse::Stream(stream)) => {
            let body = Body::from_stream(stream.map(|chunk| Ok::<_, Infallible>(Bytes::from(chunk))));
            sse_response(body)
        }
        Ok(GatewayResponse::Json(body)) => Json(body).into_response(),
        Err(e) => ApiError::new(frontend, e).into_response(),
    }
}

/// POST /v1/messages
pub async fn messages(State(state): State<AppState>, body: Bytes) -> Response {
    let frontend = FrontendType::Anthropic;
    let request: AnthropicMessagesRequest = match parse_body(frontend, &body) {
        Ok(request) => request,
        Err(e) => return e.into_response(),
    };
    match AnthropicRequestTranslator::new().translate_request(request) {
        Ok(canonical) => dispatch(&state, frontend, canonical).await,
        Err(e) => ApiError::new(frontend, e).into_response(),
    }
}

/// POST /v1/chat/completions
pub async fn chat_completions(State(state): State<AppState>, body: Bytes) -> Response {
    let frontend = FrontendType::OpenAi;
    let request: ChatCompletionRequest = match parse_body(frontend, &body) {
        Ok(request) => request,
        Err(e) => return e.into_response(),
    };
    match OpenAiRequestTranslator::new().translate_request(request) {
        Ok(canonical) => dispatch(&state, frontend, canonical).await,
        Err(e) => ApiError::new(frontend, e).into_response(),
    }
}

/// GET /v1/models
pub async fn list_models(State(state): State<AppState>) -> Response {
    Json(state.gateway.models()).into_response()
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Response {
    let summary = state.gateway.pool_summary();
    let status = if summary.healthy + summary.throttled + summary.recovering > 0 {
        "healthy"
    } else {
        "degraded"
    };
    let mut body = serde_json::json!({
        "status": status,
        "accounts": summary
    });
    if let Some(log) = &state.usage_log {
        body["usage"] = serde_json::json!(log.summary());
    }
    Json(body).into_response()
}
