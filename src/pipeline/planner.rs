//! Plan Compiler：一次 oracle 调用把请求拆成有序步骤
//!
//! 期望回复 `{"plan": ["...", ...]}`（可带代码块）。解析失败、缺少 plan、空列表或全是空串时
//! 返回固定的两步默认计划；只有 `{"plan": [], "direct_answer": true}` 会得到空计划，
//! 由 Controller 直接跳到 Writing。

use std::sync::Arc;

use serde::Deserialize;

use crate::core::{AgentError, RecoveryEngine};
use crate::llm::LlmClient;
use crate::memory::Message;
use crate::pipeline::parse::extract_as;

pub const DEFAULT_PLAN: [&str; 2] = ["gather information for the request", "summarize findings"];

const PLANNER_INSTRUCTIONS: &str = "You are the planner. Break the request into clear, \
sequential steps that can each be done with one tool call. Return ONLY a JSON object with a key \
\"plan\" containing a list of strings, for example {\"plan\": [\"search for X\", \"save X to a file\"]}. \
If the request can be answered directly without any tool, return {\"plan\": [], \"direct_answer\": true}.";

#[derive(Debug, Deserialize)]
struct PlanReply {
    plan: Vec<String>,
    #[serde(default)]
    direct_answer: bool,
}

/// 计划编译结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledPlan {
    pub plan: Vec<String>,
    /// 是否走空计划捷径
    pub direct_answer: bool,
    /// 是否使用了默认计划
    pub defaulted: bool,
}

pub fn default_plan() -> Vec<String> {
    DEFAULT_PLAN.iter().map(|s| s.to_string()).collect()
}

/// 解析 oracle 的计划回复，永不失败
pub fn interpret_plan(raw: &str) -> CompiledPlan {
    match extract_as::<PlanReply>(raw) {
        Some(reply) => {
            let steps: Vec<String> = reply
                .plan
                .into_iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if steps.is_empty() && reply.direct_answer {
                CompiledPlan {
                    plan: Vec::new(),
                    direct_answer: true,
                    defaulted: false,
                }
            } else if steps.is_empty() {
                defaulted()
            } else {
                CompiledPlan {
                    plan: steps,
                    direct_answer: false,
                    defaulted: false,
                }
            }
        }
        None => defaulted(),
    }
}

fn defaulted() -> CompiledPlan {
    CompiledPlan {
        plan: default_plan(),
        direct_answer: false,
        defaulted: true,
    }
}

pub struct PlanCompiler {
    llm: Arc<dyn LlmClient>,
}

impl PlanCompiler {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// 只有 oracle 不可达时返回错误；格式问题一律走默认计划
    pub async fn compile(
        &self,
        request: &str,
        mode_instruction: &str,
        context: &[Message],
    ) -> Result<CompiledPlan, AgentError> {
        let mut messages = vec![
            Message::system(mode_instruction),
            Message::system(PLANNER_INSTRUCTIONS),
        ];
        messages.extend(context.iter().cloned());
        // 指令与用户输入分开放，降低 prompt 注入影响
        messages.push(Message::user(format!("Request: {request}")));

        let raw = self.llm.complete(&messages).await?;
        let compiled = interpret_plan(&raw);
        if compiled.defaulted {
            RecoveryEngine::new().absorb(&AgentError::JsonParseError(format!(
                "plan reply unusable ({} chars), using default plan",
                raw.len()
            )));
        }
        Ok(compiled)
    }
}
