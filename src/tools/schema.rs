//! 工具选择 JSON Schema（schemars 自动生成）
//!
//! 拼入 Step Executor 的 system prompt，减少 oracle 输出格式错误。

use std::collections::HashMap;

use schemars::{schema_for, JsonSchema};
use serde::Deserialize;

/// 工具选择格式：`{"tool": "...", "params": {...}}`
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ToolSelection {
    /// 工具名，如 web_search、file_writer、python_repl
    pub tool: String,
    /// 工具参数，依工具不同而不同（query、filename、content、code 等）
    #[serde(default)]
    pub params: HashMap<String, serde_json::Value>,
}

/// 返回工具选择的 JSON Schema 字符串
pub fn tool_call_schema_json() -> String {
    let schema = schema_for!(ToolSelection);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_mentions_fields() {
        let s = tool_call_schema_json();
        assert!(s.contains("\"tool\""));
        assert!(s.contains("\"params\""));
    }
}
