//! 运行过程事件：CLI 进度输出与流式接口使用

use serde::Serialize;

use crate::core::Node;

/// 编排过程中的单个事件（可序列化为 JSON）
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    /// 从检查点恢复，将从 next 节点继续
    Resumed { last_node: Node, next: Node },
    /// 计划已生成
    Planned { plan: Vec<String>, defaulted: bool },
    /// 调用工具完成
    ToolInvoked {
        step_id: String,
        tool: String,
        success: bool,
        preview: String,
    },
    /// 复审结果（实际生效的决定）
    Reviewed {
        step_index: usize,
        decision: String,
        feedback: String,
    },
    /// 节点完成并已写检查点
    NodeCompleted { node: Node },
    /// 检查点写入失败，继续在内存中运行
    CheckpointDegraded { reason: String },
    /// 最终回复的一段
    MessageChunk { text: String },
    MessageDone,
    Error { text: String },
}

/// 事件接收方；发送失败（接收端已关闭）不影响运行
pub type EventSender = tokio::sync::mpsc::UnboundedSender<RunEvent>;

pub(crate) fn emit(tx: Option<&EventSender>, event: RunEvent) {
    if let Some(tx) = tx {
        let _ = tx.send(event);
    }
}

/// 工具结果预览，避免事件过长
pub fn preview(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() > max_chars {
        format!("{}...", flat.chars().take(max_chars).collect::<String>())
    } else {
        flat
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_type_tag() {
        let json = serde_json::to_value(RunEvent::NodeCompleted { node: Node::Reviewing }).unwrap();
        assert_eq!(json, serde_json::json!({"type": "node_completed", "node": "reviewing"}));
    }

    #[test]
    fn test_preview_flattens_and_truncates() {
        assert_eq!(preview("a\n  b", 10), "a b");
        assert_eq!(preview("abcdef", 3), "abc...");
    }
}
