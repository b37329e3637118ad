//! python_repl：在沙箱容器中执行 Python 代码

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::sandbox::SandboxRunner;
use crate::tools::{Tool, ToolOutput};

pub struct PythonReplTool {
    runner: Arc<SandboxRunner>,
}

impl PythonReplTool {
    pub fn new(runner: Arc<SandboxRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl Tool for PythonReplTool {
    fn name(&self) -> &str {
        "python_repl"
    }

    fn description(&self) -> &str {
        "Execute Python code in an isolated sandbox. Write files only under './data/'. Params: {\"code\": \"print(1)\"}."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {"code": {"type": "string", "description": "Python source"}},
            "required": ["code"]
        })
    }

    fn time_budget(&self) -> Option<Duration> {
        Some(self.runner.time_budget())
    }

    async fn invoke(&self, params: Value) -> ToolOutput {
        let code = params.get("code").and_then(|v| v.as_str()).unwrap_or("");
        let report = self.runner.execute(code).await;
        ToolOutput {
            text: report.text,
            success: report.completed,
        }
    }
}
