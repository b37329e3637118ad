//! Progress Reviewer：一次 oracle 调用决定 advance / retry / complete
//!
//! 解析失败按 advance 处理。retry 次数超过上限后强制走 advance 分支，
//! 所以每个步骤最多经历 cap + 1 次 Executing/Reviewing 循环，整个运行必然终止。

use std::sync::Arc;

use serde::Deserialize;

use crate::core::{AgentError, Decision, OrchestrationState, ReviewDecision};
use crate::llm::LlmClient;
use crate::memory::Message;
use crate::pipeline::executor::truncate_chars;
use crate::pipeline::parse::extract_as;

const REVIEW_RESULT_CHARS: usize = 2000;

#[derive(Debug, Deserialize)]
struct ReviewReply {
    decision: String,
    #[serde(default)]
    feedback: String,
}

/// 解析复审回复，永不失败
pub fn interpret_review(raw: &str) -> ReviewDecision {
    extract_as::<ReviewReply>(raw)
        .and_then(|r| {
            Decision::parse(&r.decision).map(|decision| ReviewDecision {
                decision,
                feedback: r.feedback,
            })
        })
        .unwrap_or_else(|| ReviewDecision {
            decision: Decision::Advance,
            feedback: "Proceeding to next step".to_string(),
        })
}

/// 把复审决定应用到状态上，返回实际生效的决定
///
/// 纯状态变换：给定相同的状态与决定，结果相同。
pub fn apply_decision(
    state: &mut OrchestrationState,
    review: &ReviewDecision,
    max_retries: u32,
) -> Decision {
    if state.is_complete {
        return Decision::Complete;
    }
    state.review_feedback = review.feedback.clone();

    let mut decision = review.decision;
    if decision == Decision::Retry {
        let index = state.current_step_index;
        let count = state.retries_for(index) + 1;
        state.retry_count_by_step.insert(index, count);
        if count > max_retries {
            tracing::warn!(step = index + 1, retries = count, "retry cap exceeded, forcing advance");
            decision = Decision::Advance;
        } else {
            return Decision::Retry;
        }
    }

    match decision {
        Decision::Complete => {
            state.is_complete = true;
            Decision::Complete
        }
        _ => {
            if state.plan.is_empty() || state.current_step_index + 1 >= state.plan.len() {
                state.is_complete = true;
                Decision::Complete
            } else {
                state.current_step_index += 1;
                Decision::Advance
            }
        }
    }
}

pub struct ProgressReviewer {
    llm: Arc<dyn LlmClient>,
    max_retries: u32,
}

impl ProgressReviewer {
    pub fn new(llm: Arc<dyn LlmClient>, max_retries: u32) -> Self {
        Self { llm, max_retries }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// 复审当前步骤并更新状态；只有 oracle 不可达时返回错误
    pub async fn review(
        &self,
        state: &mut OrchestrationState,
        mode_instruction: &str,
    ) -> Result<Decision, AgentError> {
        let outputs: Vec<serde_json::Value> = state
            .records_in_order()
            .iter()
            .map(|r| {
                serde_json::json!({
                    "step_id": r.step_id,
                    "tool": r.tool_name,
                    "success": r.success,
                    "result": truncate_chars(&r.result_text, REVIEW_RESULT_CHARS),
                })
            })
            .collect();
        let prompt = format!(
            "Review the execution progress for this task.\n\n\
             Original request: {}\nFull plan: {:?}\nCurrent step index: {}\nCompleted outputs: {}\n\n\
             Decide whether the current step's output is sufficient, whether to retry it, or whether \
             there is already enough to write the final answer.\n\
             Respond ONLY with JSON: {{\"decision\": \"advance|retry|complete\", \"feedback\": \"brief explanation\"}}",
            state.request,
            state.plan,
            state.current_step_index,
            serde_json::to_string_pretty(&outputs).unwrap_or_default(),
        );
        let messages = [Message::system(mode_instruction), Message::user(prompt)];
        let raw = self.llm.complete(&messages).await?;
        let review = interpret_review(&raw);
        let effective = apply_decision(state, &review, self.max_retries);
        tracing::debug!(requested = ?review.decision, effective = ?effective, "review decision");
        Ok(effective)
    }
}
