//! HTTP 接口（feature = "web"）
//!
//! - POST /run：跑完整编排，返回 RunResponse
//! - POST /run/stream：SSE，先发 `session` 事件（会话 id），再发进度与正文数据块，以 `[DONE]` 结束；
//!   失败时发 `error` 事件
//! - GET /api/health、GET /api/sessions/:id/history
//!
//! 所有路由都经过限流中间件；排除路径直接放行。

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use axum::{
    extract::{ConnectInfo, Path, Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures_util::stream::{self, Stream};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::agent::{process_request, process_request_stream, AgentComponents, RunRequest, RunResponse};
use crate::config::RateLimitSection;
use crate::core::{AgentError, ShutdownManager};
use crate::memory::Message;
use crate::pipeline::RunEvent;
use crate::rate_limit::{is_truthy, Admission, RateLimitInfo, RequestIdentity};

type Shared = Arc<AgentComponents>;

pub const DONE_SENTINEL: &str = "[DONE]";

/// 构建路由（不含监听），测试中直接 oneshot
pub fn router(components: Shared) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/run", post(run))
        .route("/run/stream", post(run_stream))
        .route("/api/health", get(health))
        .route("/api/sessions/:id/history", get(session_history))
        .layer(middleware::from_fn_with_state(
            components.clone(),
            rate_limit_middleware,
        ))
        .with_state(components)
}

/// 监听 [web] 配置的地址直到收到关闭信号；同时负责限流表与空闲会话的后台清理
pub async fn serve(components: Shared, shutdown: Arc<ShutdownManager>) -> anyhow::Result<()> {
    let addr = format!("{}:{}", components.config.web.host, components.config.web.port);
    let sweeper = components.rate_limiter.spawn_sweeper(shutdown.token());
    let session_sweeper = components.sessions.spawn_sweeper(
        Duration::from_secs(components.config.app.session_idle_secs),
        shutdown.token(),
    );
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!("nabd web: http://{}", addr);

    shutdown.install_signal_handlers();
    let wait = shutdown.clone();
    axum::serve(
        listener,
        router(components).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { wait.wait_for_shutdown().await })
    .await
    .context("http server failed")?;

    shutdown.shutdown(crate::core::ShutdownReason::Signal);
    let _ = sweeper.await;
    if let Some(handle) = session_sweeper {
        let _ = handle.await;
    }
    tracing::info!("nabd web stopped");
    Ok(())
}

fn identity_from(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    cfg: &RateLimitSection,
) -> RequestIdentity {
    let text = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    RequestIdentity {
        user_id: text(cfg.user_id_header.as_str()),
        forwarded_for: text("x-forwarded-for"),
        peer_addr: peer.map(|p| p.ip().to_string()),
        premium: text(cfg.premium_header.as_str())
            .map(|v| is_truthy(&v))
            .unwrap_or(false),
    }
}

fn apply_rate_headers(headers: &mut HeaderMap, info: &RateLimitInfo) {
    for (name, value) in info.headers() {
        if let Ok(v) = HeaderValue::from_str(&value) {
            headers.insert(HeaderName::from_static(name), v);
        }
    }
}

/// 限流拒绝：429 + JSON 正文 + Retry-After
fn too_many_requests(retry_after: u64) -> Response {
    let body = serde_json::json!({
        "detail": format!("Rate limit exceeded. Try again in {retry_after} seconds."),
        "error": "too_many_requests",
        "retry_after": retry_after,
    });
    let mut resp = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    resp.headers_mut()
        .insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
    resp
}

async fn rate_limit_middleware(State(c): State<Shared>, req: Request, next: Next) -> Response {
    let started = Instant::now();
    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let identity = identity_from(req.headers(), peer, c.rate_limiter.config());

    let admission = c.rate_limiter.check(&identity, &path);
    let mut resp = match &admission {
        Admission::Denied {
            retry_after_secs, ..
        } => error_response(AgentError::RateLimited {
            retry_after_secs: *retry_after_secs,
        }),
        _ => next.run(req).await,
    };
    if let Admission::Admitted(info) | Admission::Denied { info, .. } = &admission {
        apply_rate_headers(resp.headers_mut(), info);
    }
    c.metrics
        .record_request(&method, &path, resp.status().as_u16(), started.elapsed());
    resp
}

fn error_response(e: AgentError) -> Response {
    match e {
        AgentError::InvalidRequest(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
        AgentError::RateLimited { retry_after_secs } => too_many_requests(retry_after_secs),
        AgentError::OracleUnreachable(_) => (
            StatusCode::BAD_GATEWAY,
            format!("Agent execution error: {e}"),
        )
            .into_response(),
        _ => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Agent execution error: {e}"),
        )
            .into_response(),
    }
}

async fn index() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": "nabd",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "healthy" }))
}

/// POST /run
///
/// 运行在独立任务中：客户端断开只会丢弃等待者，当前节点仍会完成并写检查点。
async fn run(
    State(c): State<Shared>,
    Json(req): Json<RunRequest>,
) -> Result<Json<RunResponse>, Response> {
    let thread_id = req.resolve_thread_id();
    let components = Arc::clone(&c);
    let task = tokio::spawn(async move { process_request(&components, &thread_id, &req).await });
    let result = match task.await {
        Ok(result) => result,
        Err(e) => {
            tracing::error!("run task aborted: {}", e);
            Err(AgentError::Cancelled)
        }
    };
    result.map(Json).map_err(error_response)
}

/// 单个运行事件对应的 SSE 帧；进度事件用具名 `progress` 事件发送 JSON
fn sse_frame(ev: &RunEvent) -> Option<Event> {
    match ev {
        RunEvent::MessageChunk { text } => Some(Event::default().data(text)),
        RunEvent::MessageDone => Some(Event::default().data(DONE_SENTINEL)),
        RunEvent::Error { text } => Some(Event::default().event("error").data(text)),
        other => Event::default().event("progress").json_data(other).ok(),
    }
}

/// POST /run/stream
///
/// 运行在独立任务中：客户端断开后当前节点仍会完成并写检查点。
async fn run_stream(
    State(c): State<Shared>,
    Json(req): Json<RunRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, Response> {
    if req.prompt.trim().is_empty() {
        return Err(error_response(AgentError::InvalidRequest(
            "prompt must not be empty".into(),
        )));
    }
    let thread_id = req.resolve_thread_id();
    let (event_tx, event_rx) = mpsc::unbounded_channel::<RunEvent>();

    let components = Arc::clone(&c);
    let sid = thread_id.clone();
    tokio::spawn(async move {
        if let Err(e) = process_request_stream(&components, &sid, &req, event_tx).await {
            tracing::warn!(session = %sid, "stream run failed: {}", e);
        }
    });

    let events = stream::unfold((event_rx, Some(thread_id)), |(mut rx, first)| async move {
        if let Some(id) = first {
            return Some((Ok(Event::default().event("session").data(id)), (rx, None)));
        }
        loop {
            let ev = rx.recv().await?;
            if let Some(frame) = sse_frame(&ev) {
                return Some((Ok(frame), (rx, None)));
            }
        }
    });
    Ok(Sse::new(events).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keepalive"),
    ))
}

#[derive(Serialize)]
struct HistoryResponse {
    session_id: String,
    messages: Vec<Message>,
}

/// GET /api/sessions/:id/history
async fn session_history(
    State(c): State<Shared>,
    Path(id): Path<String>,
) -> Result<Json<HistoryResponse>, (StatusCode, String)> {
    let messages = c
        .sessions
        .history(&id)
        .await
        .ok_or_else(|| (StatusCode::NOT_FOUND, "session not found".to_string()))?;
    Ok(Json(HistoryResponse {
        session_id: id,
        messages,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_from_headers() {
        let cfg = RateLimitSection::default();
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("5.5.5.5, 6.6.6.6"));
        headers.insert("x-user-premium", HeaderValue::from_static("yes"));
        let peer: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        let id = identity_from(&headers, Some(peer), &cfg);
        assert_eq!(id.client_key(), "ip:5.5.5.5");
        assert!(id.premium);
        assert_eq!(id.peer_addr.as_deref(), Some("127.0.0.1"));
    }

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(
            error_response(AgentError::InvalidRequest("x".into())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            error_response(AgentError::OracleUnreachable(crate::llm::LlmError::Timeout(5))).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            error_response(AgentError::Checkpoint("x".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            error_response(AgentError::Cancelled).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_rate_limited_error_sets_retry_after() {
        let resp = error_response(AgentError::RateLimited { retry_after_secs: 17 });
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(resp.headers().get(header::RETRY_AFTER).unwrap(), "17");
    }
}
