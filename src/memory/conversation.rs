//! 会话历史：消息与按条数裁剪的对话记忆
//!
//! 保留最近 N 条消息，超出时丢弃最旧的部分，供 oracle 上下文与历史查询使用。

use serde::{Deserialize, Serialize};

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// 对话记忆：最多保留 max_messages 条
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConversationMemory {
    messages: Vec<Message>,
    max_messages: usize,
}

impl ConversationMemory {
    pub fn new(max_messages: usize) -> Self {
        Self {
            messages: Vec::new(),
            max_messages: max_messages.max(1),
        }
    }

    pub fn push(&mut self, msg: Message) {
        self.messages.push(msg);
        self.prune();
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// 最近的 limit 条
    pub fn tail(&self, limit: usize) -> &[Message] {
        &self.messages[self.messages.len().saturating_sub(limit)..]
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    fn prune(&mut self) {
        if self.messages.len() > self.max_messages {
            let excess = self.messages.len() - self.max_messages;
            self.messages.drain(..excess);
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prune_drops_oldest() {
        let mut mem = ConversationMemory::new(3);
        for i in 0..5 {
            mem.push(Message::user(format!("m{i}")));
        }
        assert_eq!(mem.len(), 3);
        assert_eq!(mem.messages()[0].content, "m2");
        assert_eq!(mem.tail(1)[0].content, "m4");
        assert_eq!(mem.tail(10).len(), 3);
    }
}
