//! LLM 层：客户端抽象与实现（OpenAI 兼容 / Groq / Mock）

pub mod groq;
pub mod mock;
pub mod openai;
pub mod traits;

pub use groq::{create_groq_client, GROQ_FAST, GROQ_VERSATILE};
pub use mock::{MockLlmClient, ScriptedReply};
pub use openai::{OpenAiClient, TokenUsage};
pub use traits::{LlmClient, LlmError};
