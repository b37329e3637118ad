//! Groq API 客户端（OpenAI 兼容格式）
//!
//! - Base URL: https://api.groq.com/openai/v1
//! - 模型: llama-3.1-8b-instant（快）、llama-3.3-70b-versatile（强）

use crate::llm::OpenAiClient;

pub const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const GROQ_FAST: &str = "llama-3.1-8b-instant";
pub const GROQ_VERSATILE: &str = "llama-3.3-70b-versatile";

/// 创建 Groq 客户端
///
/// - 优先使用环境变量 `GROQ_API_KEY`
/// - 模型可通过 `model` 参数或 `GROQ_MODEL` 环境变量指定
pub fn create_groq_client(model: Option<&str>) -> OpenAiClient {
    let api_key = std::env::var("GROQ_API_KEY")
        .ok()
        .or_else(|| std::env::var("OPENAI_API_KEY").ok())
        .unwrap_or_else(|| "sk-placeholder".to_string());

    let model = model
        .map(String::from)
        .or_else(|| std::env::var("GROQ_MODEL").ok())
        .unwrap_or_else(|| GROQ_FAST.to_string());

    OpenAiClient::new(Some(GROQ_BASE_URL), &model, Some(api_key.as_str()))
}
