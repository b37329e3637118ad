//! Step Executor：每个步骤恰好选择并调用一个工具
//!
//! oracle 返回 `{"tool": name, "params": {...}}`，名称必须在注册表中；缺失、未知或解析失败时
//! 退回搜索工具并以步骤文本作为 query。工具失败不会中断流程，只记录为 "failed: <step>" 交给 Reviewer。

use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value};

use crate::core::state::step_id;
use crate::core::{AgentError, OrchestrationState, RecoveryEngine, ToolInvocationRecord};
use crate::llm::LlmClient;
use crate::memory::Message;
use crate::pipeline::parse::extract_as;
use crate::tools::{tool_call_schema_json, ToolExecutor, ToolSelection};

const EXECUTOR_INSTRUCTIONS: &str = "You execute one step of a plan by choosing exactly one tool. \
If you need information, use web_search. If you need to save content, use file_writer. If you \
need calculations, use python_repl. Reply ONLY with a JSON object {\"tool\": \"<name>\", \
\"params\": {...}} that matches this schema:";

/// 每条历史结果拼进 prompt 时的字符上限
const PRIOR_RESULT_CHARS: usize = 1500;
const PRIOR_RESULTS: usize = 5;

/// 解析后的工具选择
#[derive(Debug, Clone, PartialEq)]
pub struct ChosenTool {
    pub tool: String,
    pub params: Value,
    /// 是否因无法使用 oracle 的选择而退回搜索工具
    pub defaulted: bool,
}

/// 解析工具选择，永不失败
pub fn choose_tool(
    raw: &str,
    step_text: &str,
    is_known: impl Fn(&str) -> bool,
    fallback_tool: &str,
) -> ChosenTool {
    match extract_as::<ToolSelection>(raw) {
        Some(sel) if is_known(sel.tool.trim()) => ChosenTool {
            tool: sel.tool.trim().to_string(),
            params: Value::Object(sel.params.into_iter().collect::<Map<String, Value>>()),
            defaulted: false,
        },
        _ => ChosenTool {
            tool: fallback_tool.to_string(),
            params: serde_json::json!({ "query": step_text }),
            defaulted: true,
        },
    }
}

pub struct StepExecutor {
    llm: Arc<dyn LlmClient>,
    tools: Arc<ToolExecutor>,
    fallback_tool: String,
}

impl StepExecutor {
    pub fn new(llm: Arc<dyn LlmClient>, tools: Arc<ToolExecutor>, fallback_tool: impl Into<String>) -> Self {
        Self {
            llm,
            tools,
            fallback_tool: fallback_tool.into(),
        }
    }

    /// 执行 current_step_index 对应的步骤，写入一条工具记录与审计标记
    ///
    /// 只有 oracle 不可达时返回错误，此时状态不变。
    pub async fn execute(
        &self,
        state: &mut OrchestrationState,
        mode_instruction: &str,
    ) -> Result<ToolInvocationRecord, AgentError> {
        let index = state.current_step_index;
        let step_text = state
            .current_step_text()
            .map(str::to_string)
            .unwrap_or_else(|| state.request.clone());

        let messages = self.build_messages(state, &step_text, mode_instruction);
        let raw = self.llm.complete(&messages).await?;
        let chosen = choose_tool(
            &raw,
            &step_text,
            |name| self.tools.contains(name),
            &self.fallback_tool,
        );
        if chosen.defaulted {
            RecoveryEngine::new().absorb(&AgentError::JsonParseError(format!(
                "tool selection for step {} unusable, falling back to {}",
                index + 1,
                chosen.tool
            )));
        }

        let output = self.tools.invoke(&chosen.tool, chosen.params.clone()).await;

        // 同一步骤的每次尝试都是一条新记录，已写入的记录不再修改
        let attempt = state
            .tools_output
            .values()
            .filter(|r| r.step_index == index)
            .count() as u32
            + 1;
        let record = ToolInvocationRecord {
            step_id: step_id(index, attempt),
            step_index: index,
            attempt,
            tool_name: chosen.tool,
            params: chosen.params,
            result_text: output.text,
            success: output.success,
            timestamp: Utc::now(),
        };
        state.current_step = if record.success {
            format!("executed: {step_text}")
        } else {
            format!("failed: {step_text}")
        };
        state
            .tools_output
            .insert(record.step_id.clone(), record.clone());
        Ok(record)
    }

    fn build_messages(
        &self,
        state: &OrchestrationState,
        step_text: &str,
        mode_instruction: &str,
    ) -> Vec<Message> {
        let system = format!(
            "{EXECUTOR_INSTRUCTIONS}\n{}\n\nAvailable tools:\n{}",
            tool_call_schema_json(),
            self.tools.registry().to_schema_json()
        );

        let records = state.records_in_order();
        let prior: Vec<String> = records
            .iter()
            .rev()
            .take(PRIOR_RESULTS)
            .rev()
            .map(|r| {
                format!(
                    "[{}] {} -> {}",
                    r.step_id,
                    r.tool_name,
                    truncate_chars(&r.result_text, PRIOR_RESULT_CHARS)
                )
            })
            .collect();

        let mut user = format!(
            "Original request: {}\nFull plan: {:?}\nCurrent objective: {}",
            state.request, state.plan, step_text
        );
        if !prior.is_empty() {
            user.push_str("\n\nPrevious results:\n");
            user.push_str(&prior.join("\n"));
        }
        if !state.review_feedback.is_empty() {
            user.push_str("\n\nReviewer feedback: ");
            user.push_str(&state.review_feedback);
        }

        vec![
            Message::system(mode_instruction),
            Message::system(system),
            Message::user(user),
        ]
    }
}

pub(crate) fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let mut t: String = s.chars().take(max).collect();
        t.push_str("...");
        t
    }
}
