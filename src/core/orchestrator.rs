//! 编排主控：Planning -> Executing -> Reviewing -> {Executing | Writing} -> Done
//!
//! 每个节点完成后写一次检查点（完整状态 + 刚完成的节点名），键为会话 id。
//! 存在未完成的检查点时从「最后完成节点的下一个节点」继续，不会重新规划。
//! 检查点写入失败只记警告并在内存中继续；oracle 不可达则结束本次运行并上抛。

use std::sync::Arc;

use crate::checkpoint::CheckpointStore;
use crate::config::{AppConfig, OrchestratorSection};
use crate::core::{AgentError, Node, OrchestrationState, RecoveryAction, RecoveryEngine};
use crate::llm::{create_groq_client, LlmClient, MockLlmClient, OpenAiClient};
use crate::memory::Message;
use crate::pipeline::events::{emit, preview, EventSender, RunEvent};
use crate::pipeline::{ModePolicies, PlanCompiler, ProgressReviewer, ReportCompiler, StepExecutor};
use crate::tools::ToolExecutor;

const NO_KEY_REPLY: &str =
    "No LLM API key configured. Set GROQ_API_KEY or OPENAI_API_KEY to enable the reasoning backend.";

/// 根据配置与环境变量选择 oracle 后端（Groq / OpenAI 兼容 / Mock）
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.trim().to_lowercase();
    let timeout = cfg.llm.request_timeout_secs;
    let has_groq_key = std::env::var("GROQ_API_KEY").is_ok();
    let openai_key = std::env::var("OPENAI_API_KEY").ok();

    match provider.as_str() {
        "groq" if has_groq_key || openai_key.is_some() => {
            tracing::info!("Using Groq LLM ({})", cfg.llm.model);
            Arc::new(create_groq_client(Some(&cfg.llm.model)).with_timeout(timeout))
        }
        "openai" if openai_key.is_some() => {
            tracing::info!("Using OpenAI-compatible LLM ({})", cfg.llm.model);
            Arc::new(
                OpenAiClient::new(
                    cfg.llm.base_url.as_deref(),
                    &cfg.llm.model,
                    openai_key.as_deref(),
                )
                .with_timeout(timeout),
            )
        }
        "mock" => Arc::new(MockLlmClient::new().with_fallback(NO_KEY_REPLY)),
        _ => {
            tracing::warn!(provider = %provider, "No API key set or provider unknown, using Mock LLM");
            Arc::new(MockLlmClient::new().with_fallback(NO_KEY_REPLY))
        }
    }
}

/// 一次运行的结果
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub state: OrchestrationState,
    pub report: String,
    /// 是否从检查点恢复
    pub resumed: bool,
    /// 本次调用实际执行的 Executing 次数
    pub execute_cycles: usize,
}

/// 编排控制器：持有各节点与检查点存储，可被多个会话并发使用
pub struct Controller {
    planner: PlanCompiler,
    executor: StepExecutor,
    reviewer: ProgressReviewer,
    writer: ReportCompiler,
    modes: Arc<ModePolicies>,
    checkpoints: Arc<dyn CheckpointStore>,
    recovery: RecoveryEngine,
}

impl Controller {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        tools: Arc<ToolExecutor>,
        modes: Arc<ModePolicies>,
        checkpoints: Arc<dyn CheckpointStore>,
        cfg: &OrchestratorSection,
    ) -> Self {
        Self {
            planner: PlanCompiler::new(llm.clone()),
            executor: StepExecutor::new(llm.clone(), tools, cfg.fallback_tool.clone()),
            reviewer: ProgressReviewer::new(llm.clone(), cfg.max_retries_per_step),
            writer: ReportCompiler::new(llm, cfg.report_context_chars, cfg.report_max_records),
            modes,
            checkpoints,
            recovery: RecoveryEngine::new(),
        }
    }

    pub fn modes(&self) -> &ModePolicies {
        &self.modes
    }

    pub fn checkpoints(&self) -> &Arc<dyn CheckpointStore> {
        &self.checkpoints
    }

    /// 会话是否有未完成的运行
    pub async fn pending_run(&self, session_id: &str) -> Option<Node> {
        match self.checkpoints.load(session_id).await {
            Ok(Some(cp)) if !cp.is_finished() => Some(cp.last_node),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(session = %session_id, "checkpoint load failed: {}", e);
                None
            }
        }
    }

    /// 运行（或恢复）一次编排直到 Done
    ///
    /// history 为会话此前的消息，供规划与汇报参考。
    pub async fn run(
        &self,
        session_id: &str,
        request: &str,
        mode: &str,
        history: &[Message],
        events: Option<&EventSender>,
    ) -> Result<RunOutcome, AgentError> {
        let (mut state, mut node, resumed) = match self.load_checkpoint(session_id, events).await {
            Some(cp) if !cp.is_finished() => {
                let next = cp.last_node.next(&cp.state);
                tracing::info!(session = %session_id, last = %cp.last_node, next = %next, "resuming run");
                emit(
                    events,
                    RunEvent::Resumed {
                        last_node: cp.last_node,
                        next,
                    },
                );
                (cp.state, next, true)
            }
            _ => {
                let mode = self.modes.resolve(mode);
                (OrchestrationState::new(request, mode), Node::Planning, false)
            }
        };

        let mut execute_cycles = 0usize;
        while node != Node::Done {
            let step = state.current_step_index + 1;
            tracing::info!(session = %session_id, node = %node, step, "node start");
            if let Err(e) = self.run_node(node, &mut state, history, events).await {
                match self.recovery.handle(&e) {
                    RecoveryAction::Escalate => {
                        tracing::error!(session = %session_id, node = %node, "run aborted: {}", e);
                        return Err(e);
                    }
                    action => {
                        tracing::warn!(session = %session_id, node = %node, ?action, "node error absorbed: {}", e);
                    }
                }
            }
            if node == Node::Executing {
                execute_cycles += 1;
            }

            if let Err(e) = self.checkpoints.save(session_id, node, &state).await {
                if self.recovery.handle(&e) == RecoveryAction::ContinueInMemory {
                    tracing::warn!(session = %session_id, node = %node, "checkpoint save failed, continuing in memory: {}", e);
                    emit(
                        events,
                        RunEvent::CheckpointDegraded {
                            reason: e.to_string(),
                        },
                    );
                }
            }
            emit(events, RunEvent::NodeCompleted { node });
            node = node.next(&state);
        }

        let report = state.final_report.clone().unwrap_or_default();
        Ok(RunOutcome {
            state,
            report,
            resumed,
            execute_cycles,
        })
    }

    async fn load_checkpoint(
        &self,
        session_id: &str,
        events: Option<&EventSender>,
    ) -> Option<crate::checkpoint::Checkpoint> {
        match self.checkpoints.load(session_id).await {
            Ok(cp) => cp,
            Err(e) => {
                tracing::warn!(session = %session_id, "checkpoint load failed, starting fresh: {}", e);
                emit(
                    events,
                    RunEvent::CheckpointDegraded {
                        reason: e.to_string(),
                    },
                );
                None
            }
        }
    }

    async fn run_node(
        &self,
        node: Node,
        state: &mut OrchestrationState,
        history: &[Message],
        events: Option<&EventSender>,
    ) -> Result<(), AgentError> {
        let instruction = self.modes.instruction(&state.agent_mode).to_string();
        match node {
            Node::Planning => {
                let compiled = self
                    .planner
                    .compile(&state.request, &instruction, history)
                    .await?;
                state.plan = compiled.plan.clone();
                state.current_step_index = 0;
                state.tools_output.clear();
                state.retry_count_by_step.clear();
                state.review_feedback.clear();
                // 空计划捷径：直接进入 Writing
                state.is_complete = compiled.direct_answer;
                state.current_step = state
                    .plan
                    .first()
                    .cloned()
                    .unwrap_or_else(|| "Complete".to_string());
                emit(
                    events,
                    RunEvent::Planned {
                        plan: compiled.plan,
                        defaulted: compiled.defaulted,
                    },
                );
            }
            Node::Executing => {
                if state.is_complete {
                    return Ok(());
                }
                let record = self.executor.execute(state, &instruction).await?;
                emit(
                    events,
                    RunEvent::ToolInvoked {
                        step_id: record.step_id,
                        tool: record.tool_name,
                        success: record.success,
                        preview: preview(&record.result_text, 160),
                    },
                );
            }
            Node::Reviewing => {
                if state.is_complete {
                    return Ok(());
                }
                let index = state.current_step_index;
                let decision = self.reviewer.review(state, &instruction).await?;
                emit(
                    events,
                    RunEvent::Reviewed {
                        step_index: index,
                        decision: format!("{decision:?}").to_lowercase(),
                        feedback: state.review_feedback.clone(),
                    },
                );
            }
            Node::Writing => {
                let report = self.writer.compile(state, history, &instruction).await?;
                state.final_report = Some(report);
            }
            Node::Done => {}
        }
        Ok(())
    }
}
