//! Mock LLM 客户端（用于测试与无 API Key 的本地运行）
//!
//! 按顺序回放预置的回复；脚本耗尽后若设置了默认回复则一直返回它，否则报 Exhausted。
//! 同时记录每次收到的消息，便于断言 prompt 内容。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError};
use crate::memory::Message;

/// 单条脚本回复：成功文本或模拟的 oracle 故障
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Text(String),
    Fail(LlmError),
}

#[derive(Debug, Default)]
pub struct MockLlmClient {
    script: Mutex<VecDeque<ScriptedReply>>,
    fallback: Option<String>,
    calls: Mutex<Vec<Vec<Message>>>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 依次返回给定文本
    pub fn scripted<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let script = replies
            .into_iter()
            .map(|s| ScriptedReply::Text(s.into()))
            .collect();
        Self {
            script: Mutex::new(script),
            ..Self::default()
        }
    }

    /// 脚本耗尽后一直返回此回复
    pub fn with_fallback(mut self, reply: impl Into<String>) -> Self {
        self.fallback = Some(reply.into());
        self
    }

    pub fn push_reply(&self, reply: ScriptedReply) {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(reply);
    }

    /// 已发生的调用次数
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// 第 n 次调用收到的全部消息拼接成的文本
    pub fn prompt_of(&self, n: usize) -> Option<String> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(n)
            .map(|msgs| {
                msgs.iter()
                    .map(|m| m.content.as_str())
                    .collect::<Vec<_>>()
                    .join("\n")
            })
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(messages.to_vec());
        let next = self
            .script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        match next {
            Some(ScriptedReply::Text(t)) => Ok(t),
            Some(ScriptedReply::Fail(e)) => Err(e),
            None => self.fallback.clone().ok_or(LlmError::Exhausted),
        }
    }
}
