//! HTTP 服务
//!
//! | 方法 | 路径 | 说明 |
//! |------|------|------|
//! | POST | /v1/messages | Anthropic Messages |
//! | POST | /v1/chat/completions | OpenAI Chat Completions |
//! | GET | /v1/models | 模型目录 |
//! | GET | /health | 健康检查、账号池汇总与最近用量 |

mod handlers;

use std::sync::Arc;

use axum::{
    body::Body,
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;

use crate::config::ServerConfig;
use crate::error::GatewayError;
use crate::gateway::Gateway;
use crate::stream::FrontendType;
use crate::telemetry::MemoryUsageSink;

pub use handlers::{chat_completions, health, list_models, messages};

/// 应用状态
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
    /// 最近请求的用量记录，用于 /health 汇总
    pub usage_log: Option<Arc<MemoryUsageSink>>,
}

/// 构建路由
pub fn build_router(state: AppState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/v1/messages", post(messages))
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/models", get(list_models))
        .route("/health", get(health))
        .layer(
            ServiceBuilder::new()
                .layer(DefaultBodyLimit::disable())
                .layer(RequestBodyLimitLayer::new(max_body_bytes)),
        )
        .with_state(state)
}

/// 启动服务，收到 Ctrl-C 时优雅退出
pub async fn run(
    config: &ServerConfig,
    gateway: Arc<Gateway>,
    usage_log: Option<Arc<MemoryUsageSink>>,
) -> std::io::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("[SERVER] 监听 http://{}", addr);

    let app = build_router(AppState { gateway, usage_log }, config.max_body_bytes);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("[SERVER] 无法监听退出信号: {}", e);
            }
            tracing::info!("[SERVER] 收到退出信号，正在关闭");
        })
        .await
}

/// 按前端协议渲染的错误响应
#[derive(Debug)]
pub struct ApiError {
    pub frontend: FrontendType,
    pub error: GatewayError,
}

impl ApiError {
    pub fn new(frontend: FrontendType, error: impl Into<GatewayError>) -> Self {
        Self {
            frontend,
            error: error.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.error.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = match self.frontend {
            FrontendType::OpenAi => self.error.to_json(),
            FrontendType::Anthropic => serde_json::json!({
                "type": "error",
                "error": {
                    "type": self.error.error_type(),
                    "message": self.error.to_string()
                }
            }),
        };

        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = self.error.retry_after_secs() {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

/// SSE 响应
pub(crate) fn sse_response(body: Body) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .header("X-Accel-Buffering", "no")
        .body(body)
        .unwrap_or_else(|_| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": {"message": "Failed to build stream response"}})),
            )
                .into_response()
        })
}
