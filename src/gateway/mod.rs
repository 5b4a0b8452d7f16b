//! 请求调度
//!
//! 一次入站请求只调度一次，不跨账号重试：
//!
//! ```text
//! CanonicalRequest ──> 出口转换 ──> 选择账号 (AccountLease) ──> 获取 token
//!   ──> 后端请求 (request_timeout) ──> canonical_events (stream_idle_timeout)
//!   ──> SSE / 聚合 JSON
//! ```
//!
//! 租约在 `Stop` 事件发出之前结算：正常结束记为成功，错误结束按错误类型
//! 计入账号健康状态。客户端提前断开时响应流被丢弃，租约随之释放请求位。

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::BoxStream;
use futures::StreamExt;
use uuid::Uuid;

use crate::credential::TokenManager;
use crate::error::GatewayError;
use crate::models::openai::ModelList;
use crate::models::CanonicalRequest;
use crate::pool::{AccountLease, AccountPool, Clock, PoolSummary};
use crate::providers::BackendClient;
use crate::resilience::{execute_with_timeout, TimeoutConfig};
use crate::stream::{
    canonical_events, stream_failure, CanonicalStreamEvent, FrontendType, ResponseAggregator,
    SseGenerator, StopReason,
};
use crate::telemetry::{TokenSource, UsageRecord, UsageSink};
use crate::translator::{model_catalog, CodeWhispererRequestTranslator, RequestTranslator};

/// 调度结果
pub enum GatewayResponse {
    /// SSE 文本块（已按前端格式编码）
    Stream(BoxStream<'static, String>),
    /// 非流式 JSON 响应体
    Json(serde_json::Value),
}

impl std::fmt::Debug for GatewayResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GatewayResponse::Stream(_) => f.write_str("GatewayResponse::Stream"),
            GatewayResponse::Json(body) => f.debug_tuple("GatewayResponse::Json").field(body).finish(),
        }
    }
}

/// 网关
pub struct Gateway {
    pool: Arc<AccountPool>,
    tokens: Arc<TokenManager>,
    backend: Arc<dyn BackendClient>,
    usage: Arc<dyn UsageSink>,
    clock: Arc<dyn Clock>,
    timeouts: TimeoutConfig,
}

impl Gateway {
    pub fn new(
        pool: Arc<AccountPool>,
        tokens: Arc<TokenManager>,
        backend: Arc<dyn BackendClient>,
        usage: Arc<dyn UsageSink>,
        clock: Arc<dyn Clock>,
        timeouts: TimeoutConfig,
    ) -> Self {
        Self {
            pool,
            tokens,
            backend,
            usage,
            clock,
            timeouts,
        }
    }

    pub fn pool(&self) -> &Arc<AccountPool> {
        &self.pool
    }

    pub fn pool_summary(&self) -> PoolSummary {
        self.pool.summary()
    }

    /// 模型目录（与账号池状态无关）
    pub fn models(&self) -> ModelList {
        model_catalog()
    }

    /// 调度一个规范化请求
    pub async fn dispatch(
        &self,
        frontend: FrontendType,
        request: CanonicalRequest,
    ) -> Result<GatewayResponse, GatewayError> {
        let response_id = match frontend {
            FrontendType::Anthropic => format!("msg_{}", Uuid::new_v4().simple()),
            FrontendType::OpenAi => format!("chatcmpl-{}", Uuid::new_v4().simple()),
        };
        let mut usage = UsageGuard {
            record: Some(UsageRecord::new(
                response_id.clone(),
                self.clock.now(),
                request.model.clone(),
                frontend.as_str(),
                request.stream,
            )),
            sink: Arc::clone(&self.usage),
            started: Instant::now(),
        };

        let model = request.model.clone();
        let streaming = request.stream;
        let input_tokens = request.estimate_input_tokens();

        match self.start(request, &model, &mut usage).await {
            Ok((lease, bytes)) => {
                let idle = self.timeouts.stream_idle_timeout();
                let events = canonical_events(bytes, input_tokens, idle).boxed();
                let session = Session {
                    lease: Some(lease),
                    usage,
                    idle,
                };
                if streaming {
                    let generator = SseGenerator::new(frontend, response_id, model, input_tokens);
                    Ok(GatewayResponse::Stream(session.into_sse(events, generator)))
                } else {
                    session
                        .aggregate(events, frontend, &response_id, &model)
                        .await
                        .map(GatewayResponse::Json)
                }
            }
            Err(e) => {
                usage.fail(&e);
                Err(e)
            }
        }
    }

    /// 转换、选择账号、获取 token 并发出后端请求
    ///
    /// 转换在选择账号之前完成，无效请求不占用请求位；profile ARN 随后从租约填入。
    async fn start(
        &self,
        request: CanonicalRequest,
        model: &str,
        usage: &mut UsageGuard,
    ) -> Result<(AccountLease, crate::stream::ByteStream), GatewayError> {
        request.validate()?;
        let mut payload = CodeWhispererRequestTranslator::new(None).translate_request(request)?;

        let lease = self.pool.acquire()?;
        usage.set_account(lease.account_id());
        payload.profile_arn = lease.credentials().profile_arn.clone();

        let token = match self
            .tokens
            .get_valid_token(lease.account_id(), lease.credentials())
            .await
        {
            Ok(token) => token,
            Err(e) => {
                let err = GatewayError::from(e);
                lease.fail(&err);
                return Err(err);
            }
        };

        let sent = execute_with_timeout(
            self.timeouts.request_timeout(),
            self.backend.send(&payload, &token),
        )
        .await
        .map_err(GatewayError::from)
        .and_then(|result| result);

        match sent {
            Ok(bytes) => Ok((lease, bytes)),
            Err(err) => {
                if let GatewayError::UpstreamError { status: 401 | 403, .. } = err {
                    self.tokens.invalidate(lease.account_id());
                }
                err.log_with_context(usage.id(), Some(lease.account_id()), model);
                lease.fail(&err);
                Err(err)
            }
        }
    }
}

/// 用量记录守卫：未结算就被丢弃时记为取消
struct UsageGuard {
    record: Option<UsageRecord>,
    sink: Arc<dyn UsageSink>,
    started: Instant,
}

impl UsageGuard {
    fn id(&self) -> &str {
        self.record.as_ref().map(|r| r.id.as_str()).unwrap_or("-")
    }

    fn set_account(&mut self, account_id: &str) {
        if let Some(record) = self.record.as_mut() {
            record.account_id = Some(account_id.to_string());
        }
    }

    fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    fn succeed(&mut self, input_tokens: u32, output_tokens: u32, estimated: bool) {
        let duration_ms = self.elapsed_ms();
        if let Some(mut record) = self.record.take() {
            let source = if estimated {
                TokenSource::Estimated
            } else {
                TokenSource::Actual
            };
            record.mark_success(duration_ms, input_tokens, output_tokens, source);
            self.sink.record(record);
        }
    }

    fn fail(&mut self, error: &GatewayError) {
        let duration_ms = self.elapsed_ms();
        if let Some(mut record) = self.record.take() {
            record.mark_failed(duration_ms, error.status_code(), error.to_string());
            self.sink.record(record);
        }
    }
}

impl Drop for UsageGuard {
    fn drop(&mut self) {
        let duration_ms = self.elapsed_ms();
        if let Some(mut record) = self.record.take() {
            let err = GatewayError::Cancelled;
            tracing::info!("[GATEWAY] 请求 {} 被客户端取消", record.id);
            record.mark_cancelled(duration_ms, err.status_code(), err.to_string());
            self.sink.record(record);
        }
    }
}

/// 一次进行中的后端响应
struct Session {
    lease: Option<AccountLease>,
    usage: UsageGuard,
    idle: Option<Duration>,
}

impl Session {
    /// 观察一个事件，在 `Stop` 时结算租约和用量
    fn observe(&mut self, event: &CanonicalStreamEvent, usage: &mut (u32, u32, bool)) {
        match event {
            CanonicalStreamEvent::UsageUpdate {
                input_tokens,
                output_tokens,
                estimated,
            } => *usage = (*input_tokens, *output_tokens, *estimated),
            CanonicalStreamEvent::Stop { reason } => self.settle(reason, *usage),
            _ => {}
        }
    }

    fn settle(&mut self, reason: &StopReason, usage: (u32, u32, bool)) {
        let Some(lease) = self.lease.take() else {
            return;
        };
        match reason {
            StopReason::Error {
                error_kind,
                message,
            } => {
                let err = stream_failure(*error_kind, message, self.idle);
                tracing::warn!(
                    "[GATEWAY] 请求 {} 在账号 {} 上失败: {}",
                    self.usage.id(),
                    lease.account_id(),
                    err
                );
                lease.fail(&err);
                self.usage.fail(&err);
            }
            _ => {
                let (input_tokens, output_tokens, estimated) = usage;
                tracing::debug!(
                    "[GATEWAY] 请求 {} 完成: account={} input={} output={}",
                    self.usage.id(),
                    lease.account_id(),
                    input_tokens,
                    output_tokens
                );
                lease.complete(input_tokens, output_tokens);
                self.usage.succeed(input_tokens, output_tokens, estimated);
            }
        }
    }

    fn into_sse(
        self,
        events: BoxStream<'static, CanonicalStreamEvent>,
        mut generator: SseGenerator,
    ) -> BoxStream<'static, String> {
        let mut session = self;
        async_stream::stream! {
            let mut events = events;
            let mut usage = (0u32, 0u32, true);
            while let Some(event) = events.next().await {
                session.observe(&event, &mut usage);
                for chunk in generator.generate(&event) {
                    yield chunk;
                }
            }
        }
        .boxed()
    }

    async fn aggregate(
        mut self,
        mut events: BoxStream<'static, CanonicalStreamEvent>,
        frontend: FrontendType,
        response_id: &str,
        model: &str,
    ) -> Result<serde_json::Value, GatewayError> {
        let mut aggregator = ResponseAggregator::new();
        let mut usage = (0u32, 0u32, true);
        while let Some(event) = events.next().await {
            self.observe(&event, &mut usage);
            aggregator.push(&event);
        }

        match aggregator.finish() {
            Ok(response) => Ok(match frontend {
                FrontendType::Anthropic => response.to_anthropic_message(response_id, model),
                FrontendType::OpenAi => {
                    serde_json::to_value(response.to_openai_response(response_id, model))
                        .map_err(|e| GatewayError::Internal(e.to_string()))?
                }
            }),
            Err(StopReason::Error {
                error_kind,
                message,
            }) => Err(stream_failure(error_kind, &message, self.idle)),
            Err(other) => Err(GatewayError::Internal(format!(
                "意外的停止原因: {:?}",
                other
            ))),
        }
    }
}
