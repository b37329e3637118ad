//! 错误恢复引擎
//!
//! 根据 AgentError 类型返回 RecoveryAction：能用安全默认值解决的在节点内吸收，
//! 检查点故障降级为内存继续，只有 oracle 不可达与限流等上抛给调用方。

use crate::core::{AgentError, RecoveryAction};

/// 语义化错误恢复：将错误映射为可执行动作
#[derive(Debug, Default, Clone, Copy)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, err: &AgentError) -> RecoveryAction {
        match err {
            AgentError::JsonParseError(_)
            | AgentError::ToolExecutionFailed(_)
            | AgentError::ToolTimeout(_)
            | AgentError::UnknownTool(_) => RecoveryAction::UseDefault,
            AgentError::Checkpoint(_) => RecoveryAction::ContinueInMemory,
            AgentError::OracleUnreachable(_)
            | AgentError::RateLimited { .. }
            | AgentError::ConfigError(_)
            | AgentError::InvalidRequest(_)
            | AgentError::Cancelled => RecoveryAction::Escalate,
        }
    }

    /// 节点内部用默认值继续时调用：记录被吸收的错误并返回对应动作
    pub fn absorb(&self, err: &AgentError) -> RecoveryAction {
        let action = self.handle(err);
        tracing::warn!(?action, "{}", err);
        action
    }
}
