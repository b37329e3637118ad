//! Headless Agent 运行时
//!
//! 供 CLI 与 HTTP 前端调用的无界面逻辑：
//! create_components 按配置组装 oracle、工具、检查点、会话与限流器，
//! process_request 对单条请求跑完整编排并返回 RunResponse，
//! process_request_stream 额外把进度事件与最终文本分块推送到事件通道。

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::checkpoint::{create_checkpoint_store, CheckpointStore};
use crate::config::AppConfig;
use crate::core::{create_llm_from_config, AgentError, Controller, SessionManager};
use crate::llm::LlmClient;
use crate::memory::Message;
use crate::observability::{Metrics, NoopMetrics};
use crate::pipeline::events::emit;
use crate::pipeline::{EventSender, ModePolicies, RunEvent, DEFAULT_MODE};
use crate::rate_limit::RateLimiter;
use crate::tools::{build_registry, ToolExecutor, ToolRegistry};

/// 预构建的运行时组件，可被多个会话与请求共享
pub struct AgentComponents {
    pub config: AppConfig,
    pub llm: Arc<dyn LlmClient>,
    pub controller: Arc<Controller>,
    pub sessions: Arc<SessionManager>,
    pub rate_limiter: Arc<RateLimiter>,
    pub metrics: Arc<dyn Metrics>,
}

/// 一次运行请求
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunRequest {
    pub prompt: String,
    /// 为空时生成新的会话 id
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub image_ref: Option<String>,
}

impl RunRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    /// 请求携带的会话 id，缺省时新建一个
    pub fn resolve_thread_id(&self) -> String {
        self.thread_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
    }

    /// 送入编排的请求文本（附图引用拼在末尾）
    pub fn compose(&self) -> String {
        let prompt = self.prompt.trim();
        match self.image_ref.as_deref().map(str::trim) {
            Some(r) if !r.is_empty() => format!("{prompt}\n\n[Image attached: {r}]"),
            _ => prompt.to_string(),
        }
    }
}

/// 运行结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResponse {
    pub success: bool,
    pub result: String,
    pub plan: Vec<String>,
    pub steps_executed: usize,
}

/// 数据目录：配置了 workspace_root 时相对于它解析
pub fn resolve_data_dir(cfg: &AppConfig) -> PathBuf {
    match &cfg.app.workspace_root {
        Some(root) if cfg.app.data_dir.is_relative() => root.join(&cfg.app.data_dir),
        _ => cfg.app.data_dir.clone(),
    }
}

/// 按配置创建全部组件：oracle 后端由 [llm] 与环境变量决定
pub fn create_components(cfg: AppConfig) -> Result<AgentComponents, AgentError> {
    let llm = create_llm_from_config(&cfg);
    let data_dir = resolve_data_dir(&cfg);
    let registry = build_registry(&cfg, &data_dir)?;
    let checkpoints = create_checkpoint_store(&cfg.checkpoint, &data_dir)?;
    Ok(create_components_with(
        cfg,
        llm,
        registry,
        checkpoints,
        Arc::new(NoopMetrics),
    ))
}

/// 用给定的 oracle、工具与检查点后端组装组件（测试与嵌入场景）
pub fn create_components_with(
    cfg: AppConfig,
    llm: Arc<dyn LlmClient>,
    registry: ToolRegistry,
    checkpoints: Arc<dyn CheckpointStore>,
    metrics: Arc<dyn Metrics>,
) -> AgentComponents {
    let tools = Arc::new(
        ToolExecutor::new(registry, cfg.tools.tool_timeout_secs).with_metrics(metrics.clone()),
    );
    let modes = Arc::new(ModePolicies::new(&cfg.modes));
    let controller = Controller::new(llm.clone(), tools, modes, checkpoints, &cfg.orchestrator);
    AgentComponents {
        llm,
        controller: Arc::new(controller),
        sessions: Arc::new(SessionManager::new(cfg.app.max_history_messages)),
        rate_limiter: Arc::new(RateLimiter::new(cfg.rate_limit.clone())),
        metrics,
        config: cfg,
    }
}

/// 处理单条请求：同一会话内的请求串行执行
pub async fn process_request(
    components: &AgentComponents,
    thread_id: &str,
    req: &RunRequest,
) -> Result<RunResponse, AgentError> {
    run_inner(components, thread_id, req, None).await
}

/// 流式处理：推送进度事件，完成后把最终文本按固定词数分块，以 MessageDone 结束；失败时推送 Error
pub async fn process_request_stream(
    components: &AgentComponents,
    thread_id: &str,
    req: &RunRequest,
    event_tx: EventSender,
) -> Result<RunResponse, AgentError> {
    match run_inner(components, thread_id, req, Some(&event_tx)).await {
        Ok(resp) => {
            for chunk in chunk_words(&resp.result, components.config.web.stream_chunk_words) {
                emit(Some(&event_tx), RunEvent::MessageChunk { text: chunk });
            }
            emit(Some(&event_tx), RunEvent::MessageDone);
            Ok(resp)
        }
        Err(e) => {
            emit(Some(&event_tx), RunEvent::Error { text: e.to_string() });
            Err(e)
        }
    }
}

async fn run_inner(
    components: &AgentComponents,
    thread_id: &str,
    req: &RunRequest,
    events: Option<&EventSender>,
) -> Result<RunResponse, AgentError> {
    if req.prompt.trim().is_empty() {
        return Err(AgentError::InvalidRequest("prompt must not be empty".into()));
    }
    let request = req.compose();
    let mode = req.mode.as_deref().unwrap_or(DEFAULT_MODE);

    let (slot, _) = components.sessions.get_or_create(thread_id).await;
    // 运行权在整次运行期间持有；历史只在读写时短暂加锁
    let _running = slot.begin_run().await;
    let history: Vec<Message> = slot.snapshot().await;
    slot.push(Message::user(request.clone())).await;

    let outcome = components
        .controller
        .run(thread_id, &request, mode, &history, events)
        .await;
    match outcome {
        Ok(out) => {
            slot.push(Message::assistant(out.report.clone())).await;
            components.metrics.record_run(&out.state.agent_mode, true);
            let (_, _, total_tokens) = components.llm.token_usage();
            tracing::info!(
                session = %thread_id,
                resumed = out.resumed,
                steps = out.state.steps_executed(),
                total_tokens,
                "run finished"
            );
            Ok(RunResponse {
                success: true,
                steps_executed: out.state.steps_executed(),
                plan: out.state.plan,
                result: out.report,
            })
        }
        Err(e) => {
            components
                .metrics
                .record_run(&components.controller.modes().resolve(mode), false);
            Err(e)
        }
    }
}

/// 按 n 个词一组切分文本；除最后一组外每组末尾带一个空格，拼接后与原文词序一致
pub fn chunk_words(text: &str, n: usize) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    let n = n.max(1);
    let total = words.len().div_ceil(n);
    words
        .chunks(n)
        .enumerate()
        .map(|(i, group)| {
            let mut s = group.join(" ");
            if i + 1 < total {
                s.push(' ');
            }
            s
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::MemoryCheckpointStore;
    use crate::llm::MockLlmClient;
    use crate::observability::CountingMetrics;
    use std::sync::atomic::Ordering;

    fn components(llm: MockLlmClient, metrics: Arc<CountingMetrics>) -> AgentComponents {
        create_components_with(
            AppConfig::default(),
            Arc::new(llm),
            ToolRegistry::new(),
            Arc::new(MemoryCheckpointStore::new()),
            metrics,
        )
    }

    #[test]
    fn test_compose_appends_image_ref() {
        let mut req = RunRequest::new("  describe this ");
        assert_eq!(req.compose(), "describe this");
        req.image_ref = Some("uploads/cat.png".into());
        assert_eq!(req.compose(), "describe this\n\n[Image attached: uploads/cat.png]");
    }

    #[test]
    fn test_thread_id_generated_when_missing() {
        let mut req = RunRequest::new("x");
        let generated = req.resolve_thread_id();
        assert_eq!(generated.len(), 36);
        req.thread_id = Some("t-1".into());
        assert_eq!(req.resolve_thread_id(), "t-1");
    }

    #[test]
    fn test_chunk_words() {
        assert_eq!(
            chunk_words("a b c d e  f g", 3),
            vec!["a b c ", "d e f ", "g"]
        );
        assert!(chunk_words("   ", 3).is_empty());
        assert_eq!(chunk_words("one two", 0), vec!["one ", "two"]);
    }

    #[tokio::test]
    async fn test_empty_prompt_is_invalid() {
        let c = components(MockLlmClient::new(), Arc::new(CountingMetrics::new()));
        let err = process_request(&c, "t", &RunRequest::new("   ")).await.unwrap_err();
        assert!(matches!(err, AgentError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_direct_answer_updates_history_and_metrics() {
        let llm = MockLlmClient::scripted(["{\"plan\": [], \"direct_answer\": true}", "Hi!"]);
        let metrics = Arc::new(CountingMetrics::new());
        let c = components(llm, metrics.clone());
        let resp = process_request(&c, "t", &RunRequest::new("hello")).await.unwrap();
        assert_eq!(
            resp,
            RunResponse {
                success: true,
                result: "Hi!".into(),
                plan: vec![],
                steps_executed: 0,
            }
        );
        let history = c.sessions.history("t").await.unwrap();
        assert_eq!(history, vec![Message::user("hello"), Message::assistant("Hi!")]);
        assert_eq!(metrics.runs_ok.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_stream_emits_chunks_then_done() {
        let llm = MockLlmClient::scripted([
            "{\"plan\": [], \"direct_answer\": true}",
            "one two three four",
        ]);
        let c = components(llm, Arc::new(CountingMetrics::new()));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        process_request_stream(&c, "t", &RunRequest::new("q"), tx)
            .await
            .unwrap();
        let mut chunks = Vec::new();
        let mut done = false;
        while let Some(ev) = rx.recv().await {
            match ev {
                RunEvent::MessageChunk { text } => chunks.push(text),
                RunEvent::MessageDone => done = true,
                _ => {}
            }
        }
        assert_eq!(chunks, vec!["one two three ", "four"]);
        assert!(done);
    }

    #[tokio::test]
    async fn test_stream_reports_oracle_failure() {
        let metrics = Arc::new(CountingMetrics::new());
        let c = components(MockLlmClient::new(), metrics.clone());
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let err = process_request_stream(&c, "t", &RunRequest::new("q"), tx)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::OracleUnreachable(_)));
        let mut saw_error = false;
        while let Some(ev) = rx.recv().await {
            saw_error |= matches!(ev, RunEvent::Error { .. });
        }
        assert!(saw_error);
        assert_eq!(metrics.runs_failed.load(Ordering::Relaxed), 1);
    }
}
