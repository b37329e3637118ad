//! Report Compiler：一次 oracle 调用把完整历史合成为最终回复
//!
//! 历史（会话消息 + 工具记录）超出上下文预算时从最旧的开始丢弃。
//! 回复原样作为 final_report；此处不重试，oracle 失败直接上抛。

use std::sync::Arc;

use crate::core::{AgentError, OrchestrationState};
use crate::llm::LlmClient;
use crate::memory::{Message, Role};

const WRITER_INSTRUCTIONS: &str = "Review the conversation and all tool outputs below. Write a \
complete, well organized answer to the original request using Markdown. Support the answer with \
the data that was found and mention any files that were written.";

/// 按时间顺序保留最近的条目：不超过 max_records 条、总字符数不超过 char_budget
///
/// 最新的一条即使单独超出预算也会保留（截到预算长度）。
pub fn select_recent(items: &[String], char_budget: usize, max_records: usize) -> Vec<String> {
    let mut kept: Vec<String> = Vec::new();
    let mut used = 0usize;
    for item in items.iter().rev() {
        if kept.len() >= max_records {
            break;
        }
        let len = item.chars().count();
        if used + len > char_budget {
            if kept.is_empty() && char_budget > 0 {
                kept.push(item.chars().take(char_budget).collect());
            }
            break;
        }
        used += len;
        kept.push(item.clone());
    }
    kept.reverse();
    kept
}

/// 把会话历史与工具记录展开成按时间排序的文本条目
pub fn history_items(history: &[Message], state: &OrchestrationState) -> Vec<String> {
    let mut items: Vec<String> = history
        .iter()
        .map(|m| {
            let role = match m.role {
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::System => "system",
            };
            format!("{role}: {}", m.content)
        })
        .collect();
    if !state.plan.is_empty() {
        items.push(format!("plan: {:?}", state.plan));
    }
    for r in state.records_in_order() {
        let status = if r.success { "ok" } else { "failed" };
        items.push(format!(
            "[{}] {} ({}) params={} -> {}",
            r.step_id, r.tool_name, status, r.params, r.result_text
        ));
    }
    items
}

pub struct ReportCompiler {
    llm: Arc<dyn LlmClient>,
    char_budget: usize,
    max_records: usize,
}

impl ReportCompiler {
    pub fn new(llm: Arc<dyn LlmClient>, char_budget: usize, max_records: usize) -> Self {
        Self {
            llm,
            char_budget,
            max_records: max_records.max(1),
        }
    }

    pub async fn compile(
        &self,
        state: &OrchestrationState,
        history: &[Message],
        mode_instruction: &str,
    ) -> Result<String, AgentError> {
        let items = history_items(history, state);
        let selected = select_recent(&items, self.char_budget, self.max_records);
        if selected.len() < items.len() {
            tracing::debug!(dropped = items.len() - selected.len(), "report history truncated");
        }
        let context = format!(
            "Original request: {}\n\nHistory:\n{}",
            state.request,
            selected.join("\n")
        );
        let messages = [
            Message::system(mode_instruction),
            Message::user(context),
            Message::user(WRITER_INSTRUCTIONS),
        ];
        Ok(self.llm.complete(&messages).await?)
    }
}
