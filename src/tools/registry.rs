//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / parameters_schema / invoke），由 ToolRegistry 按名注册与查找。
//! invoke 返回 ToolOutput（文本 + 是否成功），从不返回错误：失败本身就是交给 Reviewer 的数据。

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::AgentError;

/// 工具调用结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub text: String,
    pub success: bool,
}

impl ToolOutput {
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            success: true,
        }
    }

    pub fn failed(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            success: false,
        }
    }
}

/// 工具 trait：名称、描述（供 oracle 选择）、参数 schema、异步调用（params 为 JSON 对象）
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（对应工具选择 JSON 中的 "tool" 字段）
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// 参数 JSON Schema，默认不限
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    /// 工具自带的执行时限；执行器的统一超时不会短于它
    fn time_budget(&self) -> Option<Duration> {
        None
    }

    /// 执行工具；任何失败都以 success = false 的文本返回
    async fn invoke(&self, params: Value) -> ToolOutput;
}

/// 内置工具的封闭集合，配置中的名称在启动时解析为它
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    WebSearch,
    FileWriter,
    PythonRepl,
}

impl ToolKind {
    pub const ALL: [ToolKind; 3] = [ToolKind::WebSearch, ToolKind::FileWriter, ToolKind::PythonRepl];

    pub fn name(&self) -> &'static str {
        match self {
            ToolKind::WebSearch => "web_search",
            ToolKind::FileWriter => "file_writer",
            ToolKind::PythonRepl => "python_repl",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, AgentError> {
        let raw = raw.trim();
        Self::ALL
            .into_iter()
            .find(|k| k.name() == raw)
            .ok_or_else(|| AgentError::UnknownTool(raw.to_string()))
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 工具注册表：按名称存储 Arc<dyn Tool>
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// 未注册的名称同样返回失败输出而不是错误
    pub async fn invoke(&self, name: &str, params: Value) -> ToolOutput {
        match self.tools.get(name) {
            Some(tool) => tool.invoke(params).await,
            None => ToolOutput::failed(format!("Unknown tool: {name}")),
        }
    }

    /// 排序后的工具名，保证 prompt 稳定
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// 工具列表 JSON（名称、描述、参数 schema），拼入工具选择 prompt
    pub fn to_schema_json(&self) -> String {
        let tools: Vec<Value> = self
            .tool_names()
            .iter()
            .filter_map(|name| self.tools.get(name).map(|tool| (name, tool)))
            .map(|(name, tool)| {
                serde_json::json!({
                    "name": name,
                    "description": tool.description(),
                    "parameters": tool.parameters_schema()
                })
            })
            .collect();
        serde_json::to_string_pretty(&tools).unwrap_or_else(|_| "[]".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echo the text param"
        }

        async fn invoke(&self, params: Value) -> ToolOutput {
            match params.get("text").and_then(|v| v.as_str()) {
                Some(t) => ToolOutput::ok(t),
                None => ToolOutput::failed("Missing text"),
            }
        }
    }

    #[tokio::test]
    async fn test_invoke_known_and_unknown() {
        let mut reg = ToolRegistry::new();
        reg.register(Echo);
        assert_eq!(
            reg.invoke("echo", serde_json::json!({"text": "hi"})).await,
            ToolOutput::ok("hi")
        );
        let out = reg.invoke("nope", serde_json::json!({})).await;
        assert!(!out.success);
        assert_eq!(out.text, "Unknown tool: nope");
        assert!(reg.to_schema_json().contains("Echo the text param"));
    }

    #[test]
    fn test_tool_kind_parse() {
        assert_eq!(ToolKind::parse(" python_repl ").unwrap(), ToolKind::PythonRepl);
        assert!(matches!(
            ToolKind::parse("browse_website"),
            Err(AgentError::UnknownTool(name)) if name == "browse_website"
        ));
    }
}
