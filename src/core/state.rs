//! 编排状态定义：检查点单元 OrchestrationState、工具调用记录、复审决定、状态机节点
//!
//! OrchestrationState 是唯一被持久化的运行状态；节点只通过它交换数据。

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 状态机节点：Planning -> Executing -> Reviewing -> {Executing | Writing} -> Done
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Node {
    Planning,
    Executing,
    Reviewing,
    Writing,
    Done,
}

impl Node {
    /// 节点完成后的下一个节点（纯函数，只看状态）
    pub fn next(self, state: &OrchestrationState) -> Node {
        match self {
            Node::Planning if state.plan.is_empty() => Node::Writing,
            Node::Planning => Node::Executing,
            Node::Executing => Node::Reviewing,
            Node::Reviewing if state.is_complete => Node::Writing,
            Node::Reviewing => Node::Executing,
            Node::Writing | Node::Done => Node::Done,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Node::Planning => "planning",
            Node::Executing => "executing",
            Node::Reviewing => "reviewing",
            Node::Writing => "writing",
            Node::Done => "done",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "planning" => Some(Node::Planning),
            "executing" => Some(Node::Executing),
            "reviewing" => Some(Node::Reviewing),
            "writing" => Some(Node::Writing),
            "done" => Some(Node::Done),
            _ => None,
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单次工具调用记录，写入后不再修改
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocationRecord {
    pub step_id: String,
    pub step_index: usize,
    pub attempt: u32,
    pub tool_name: String,
    pub params: serde_json::Value,
    pub result_text: String,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

/// 步骤标识：`step-<序号>#<第几次尝试>`，retry 会产生新的记录而不是覆盖旧记录
pub fn step_id(index: usize, attempt: u32) -> String {
    format!("step-{}#{}", index + 1, attempt)
}

/// 复审决定
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Advance,
    Retry,
    Complete,
}

impl Decision {
    /// 解析 oracle 给出的决定；"next_step" 视为 advance，无法识别时返回 None
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "advance" | "next_step" | "next" => Some(Decision::Advance),
            "retry" => Some(Decision::Retry),
            "complete" | "done" => Some(Decision::Complete),
            _ => None,
        }
    }
}

/// 复审结果（临时值，只通过它更新的状态字段持久化）
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReviewDecision {
    pub decision: Decision,
    pub feedback: String,
}

/// 被检查点保存的编排状态
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationState {
    /// 本次运行的原始请求（含附件标记）
    pub request: String,
    pub plan: Vec<String>,
    pub current_step_index: usize,
    pub tools_output: BTreeMap<String, ToolInvocationRecord>,
    pub is_complete: bool,
    pub review_feedback: String,
    pub retry_count_by_step: BTreeMap<usize, u32>,
    pub agent_mode: String,
    /// 审计标记："executed: <step>" / "failed: <step>"
    pub current_step: String,
    pub final_report: Option<String>,
}

impl OrchestrationState {
    pub fn new(request: impl Into<String>, agent_mode: impl Into<String>) -> Self {
        Self {
            request: request.into(),
            agent_mode: agent_mode.into(),
            ..Self::default()
        }
    }

    /// 当前步骤文本；计划为空或越界时为 None
    pub fn current_step_text(&self) -> Option<&str> {
        self.plan.get(self.current_step_index).map(String::as_str)
    }

    pub fn retries_for(&self, index: usize) -> u32 {
        self.retry_count_by_step.get(&index).copied().unwrap_or(0)
    }

    /// 按 (步骤序号, 尝试次数) 排序的工具记录
    pub fn records_in_order(&self) -> Vec<&ToolInvocationRecord> {
        let mut records: Vec<_> = self.tools_output.values().collect();
        records.sort_by_key(|r| (r.step_index, r.attempt, r.timestamp));
        records
    }

    /// 执行过工具的不同步骤数
    pub fn steps_executed(&self) -> usize {
        let mut indices: Vec<usize> = self.tools_output.values().map(|r| r.step_index).collect();
        indices.sort_unstable();
        indices.dedup();
        indices.len()
    }

    /// 检查不变量：未完成时 0 <= current_step_index < len(plan)
    pub fn index_in_bounds(&self) -> bool {
        self.is_complete || self.current_step_index < self.plan.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(index: usize, attempt: u32) -> ToolInvocationRecord {
        ToolInvocationRecord {
            step_id: step_id(index, attempt),
            step_index: index,
            attempt,
            tool_name: "web_search".into(),
            params: serde_json::json!({}),
            result_text: "ok".into(),
            success: true,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_transitions() {
        let mut state = OrchestrationState::new("q", "general");
        assert_eq!(Node::Planning.next(&state), Node::Writing);
        state.plan = vec!["a".into()];
        assert_eq!(Node::Planning.next(&state), Node::Executing);
        assert_eq!(Node::Executing.next(&state), Node::Reviewing);
        assert_eq!(Node::Reviewing.next(&state), Node::Executing);
        state.is_complete = true;
        assert_eq!(Node::Reviewing.next(&state), Node::Writing);
        assert_eq!(Node::Writing.next(&state), Node::Done);
        assert_eq!(Node::Done.next(&state), Node::Done);
    }

    #[test]
    fn test_node_parse_round_trip() {
        for node in [Node::Planning, Node::Executing, Node::Reviewing, Node::Writing, Node::Done] {
            assert_eq!(Node::parse(node.as_str()), Some(node));
        }
        assert_eq!(Node::parse("bogus"), None);
    }

    #[test]
    fn test_decision_parse() {
        assert_eq!(Decision::parse("next_step"), Some(Decision::Advance));
        assert_eq!(Decision::parse(" RETRY "), Some(Decision::Retry));
        assert_eq!(Decision::parse("complete"), Some(Decision::Complete));
        assert_eq!(Decision::parse("maybe"), None);
    }

    #[test]
    fn test_steps_executed_counts_distinct_indices() {
        let mut state = OrchestrationState::new("q", "general");
        for (i, a) in [(0, 1), (0, 2), (1, 1)] {
            let r = record(i, a);
            state.tools_output.insert(r.step_id.clone(), r);
        }
        assert_eq!(state.steps_executed(), 2);
        let order: Vec<_> = state.records_in_order().iter().map(|r| r.step_id.clone()).collect();
        assert_eq!(order, vec!["step-1#1", "step-1#2", "step-2#1"]);
    }
}
