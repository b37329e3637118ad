//! 从 oracle 的自由文本回复中提取 JSON
//!
//! 依次尝试：代码块（```json 或 ```）内的内容 -> 整段文本 -> 第一个 `{` 到最后一个 `}` 的片段。
//! 全部失败返回 None，由调用方选择确定性的默认值。Planner / Executor / Reviewer 共用此函数。

use std::sync::OnceLock;

use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::Value;

fn fence_regex() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| {
        Regex::new(r"(?s)```(?:json|JSON)?[ \t]*\r?\n?(.*?)```").expect("fence regex is valid")
    })
}

/// 提取第一个可解析的 JSON 值
pub fn extract_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Some(caps) = fence_regex().captures(trimmed) {
        if let Some(body) = caps.get(1) {
            if let Ok(v) = serde_json::from_str::<Value>(body.as_str().trim()) {
                return Some(v);
            }
        }
    } else if let Some(rest) = trimmed.strip_prefix("```") {
        // 未闭合的代码块：去掉开头的 fence 标记再试
        let rest = rest.strip_prefix("json").unwrap_or(rest);
        if let Ok(v) = serde_json::from_str::<Value>(rest.trim()) {
            return Some(v);
        }
    }

    if let Ok(v) = serde_json::from_str::<Value>(trimmed) {
        return Some(v);
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<Value>(&trimmed[start..=end]).ok()
}

/// 提取并反序列化为指定类型；结构不符同样视为失败
pub fn extract_as<T: DeserializeOwned>(text: &str) -> Option<T> {
    extract_json(text).and_then(|v| serde_json::from_value(v).ok())
}
