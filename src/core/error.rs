//! Agent 错误类型与恢复动作
//!
//! 与 RecoveryEngine 配合：根据 AgentError 决定 UseDefault / ContinueInMemory / Escalate。

use thiserror::Error;

use crate::llm::LlmError;

/// 编排过程中可能出现的错误（oracle、解析、工具、限流、检查点、配置等）
#[derive(Error, Debug)]
pub enum AgentError {
    /// 推理 oracle 不可达（网络 / 鉴权 / 超时），本地无法恢复
    #[error("Oracle unreachable: {0}")]
    OracleUnreachable(#[from] LlmError),

    #[error("JSON parse error: {0}")]
    JsonParseError(String),

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Checkpoint store error: {0}")]
    Checkpoint(String),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Cancelled")]
    Cancelled,
}

impl AgentError {
    /// 是否需要上抛给调用方（其余错误都应在节点内部吸收）
    pub fn is_caller_visible(&self) -> bool {
        matches!(
            self,
            AgentError::OracleUnreachable(_)
                | AgentError::RateLimited { .. }
                | AgentError::InvalidRequest(_)
                | AgentError::ConfigError(_)
                | AgentError::Cancelled
        )
    }
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 使用确定性的默认值继续（解析失败、工具失败）
    UseDefault,
    /// 持久化失败：记录警告，仅在内存中继续本次运行
    ContinueInMemory,
    /// 终止本次运行，将错误交给调用方
    Escalate,
}
