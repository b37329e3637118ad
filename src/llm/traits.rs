//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / Groq / Mock）实现 LlmClient。编排器只依赖这一个 trait，
//! 每个节点对 oracle 恰好发起一次 complete 调用。

use async_trait::async_trait;
use thiserror::Error;

use crate::memory::Message;

/// oracle 调用失败（均视为不可达，不在节点内重试）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    #[error("network error: {0}")]
    Network(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("request timed out after {0}s")]
    Timeout(u64),

    #[error("bad request: {0}")]
    Request(String),

    /// Mock 的脚本回复已耗尽
    #[error("no scripted reply left")]
    Exhausted,
}

/// LLM 客户端 trait：非流式完成
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成，返回 oracle 的原始文本
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError>;

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
