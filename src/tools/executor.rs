//! 工具执行器
//!
//! 持有 ToolRegistry 与统一超时，invoke(tool_name, params) 在超时内调用 registry.invoke；
//! 工具声明了自己的时限（沙箱执行 + 清理）时取两者中较大的一个。
//! 超时同样转成失败输出。每次调用输出一条结构化审计日志（JSON）并上报指标。

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::timeout;

use crate::core::{AgentError, RecoveryEngine};
use crate::observability::{Metrics, NoopMetrics};
use crate::tools::{ToolOutput, ToolRegistry};

pub struct ToolExecutor {
    registry: ToolRegistry,
    timeout: Duration,
    metrics: Arc<dyn Metrics>,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, timeout_secs: u64) -> Self {
        Self {
            registry,
            timeout: Duration::from_secs(timeout_secs.max(1)),
            metrics: Arc::new(NoopMetrics),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// 调用工具，永远返回 ToolOutput
    pub async fn invoke(&self, tool_name: &str, params: serde_json::Value) -> ToolOutput {
        let start = Instant::now();
        let args_preview = args_preview(&params);
        let limit = self.limit_for(tool_name);
        let result = timeout(limit, self.registry.invoke(tool_name, params)).await;

        let (output, outcome) = match result {
            Ok(out) if out.success => (out, "ok"),
            Ok(out) => {
                RecoveryEngine::new().absorb(&AgentError::ToolExecutionFailed(format!(
                    "{tool_name}: {}",
                    clip(&out.text)
                )));
                (out, "error")
            }
            Err(_) => {
                RecoveryEngine::new()
                    .absorb(&AgentError::ToolTimeout(format!("{tool_name} after {}s", limit.as_secs())));
                (
                    ToolOutput::failed(format!(
                        "Tool '{}' timed out after {}s.",
                        tool_name,
                        limit.as_secs()
                    )),
                    "timeout",
                )
            }
        };
        let elapsed = start.elapsed();
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "ok": output.success,
            "outcome": outcome,
            "duration_ms": elapsed.as_millis() as u64,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");
        self.metrics.record_tool(tool_name, output.success, elapsed);
        output
    }

    /// 单个工具的时限：统一超时与工具自带时限中较大的一个
    pub fn limit_for(&self, tool_name: &str) -> Duration {
        self.registry
            .get(tool_name)
            .and_then(|tool| tool.time_budget())
            .map_or(self.timeout, |budget| budget.max(self.timeout))
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn contains(&self, name: &str) -> bool {
        self.registry.contains(name)
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }
}

fn args_preview(args: &serde_json::Value) -> String {
    clip(&args.to_string())
}

fn clip(s: &str) -> String {
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::CountingMetrics;
    use crate::tools::Tool;
    use async_trait::async_trait;
    use std::sync::atomic::Ordering;

    struct Slow;

    #[async_trait]
    impl Tool for Slow {
        fn name(&self) -> &str {
            "slow"
        }

        fn description(&self) -> &str {
            "sleeps"
        }

        async fn invoke(&self, _params: serde_json::Value) -> ToolOutput {
            tokio::time::sleep(Duration::from_secs(30)).await;
            ToolOutput::ok("late")
        }
    }

    #[tokio::test]
    async fn test_timeout_becomes_failed_output() {
        let mut reg = ToolRegistry::new();
        reg.register(Slow);
        let metrics = Arc::new(CountingMetrics::new());
        let exec = ToolExecutor::new(reg, 1).with_metrics(metrics.clone());
        let out = exec.invoke("slow", serde_json::json!({})).await;
        assert!(!out.success);
        assert_eq!(out.text, "Tool 'slow' timed out after 1s.");
        assert_eq!(metrics.tool_failures.load(Ordering::Relaxed), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_python_repl_keeps_sandbox_timeout_and_cleanup() {
        use crate::config::SandboxSection;
        use crate::sandbox::SandboxRunner;
        use crate::tools::PythonReplTool;
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("removed");
        let engine = dir.path().join("fake-engine");
        std::fs::write(
            &engine,
            format!(
                "#!/bin/sh\nif [ \"$1\" = rm ]; then touch '{}'; exit 0; fi\nsleep 5\n",
                marker.display()
            ),
        )
        .unwrap();
        std::fs::set_permissions(&engine, std::fs::Permissions::from_mode(0o755)).unwrap();

        let cfg = SandboxSection {
            mode: "docker".into(),
            engine: engine.to_string_lossy().into_owned(),
            timeout_secs: 1,
            ..SandboxSection::default()
        };
        let runner = Arc::new(SandboxRunner::new(&cfg, dir.path().join("data")));
        let mut reg = ToolRegistry::new();
        reg.register(PythonReplTool::new(runner));
        // 统一超时比沙箱超时还短
        let exec = ToolExecutor::new(reg, 1);
        assert!(exec.limit_for("python_repl") > Duration::from_secs(1));
        assert_eq!(exec.limit_for("web_search"), Duration::from_secs(1));

        let out = exec
            .invoke("python_repl", serde_json::json!({"code": "while True: pass"}))
            .await;
        assert!(!out.success);
        assert_eq!(out.text, "Execution timed out after 1s.");
        assert!(marker.exists());
    }

    #[test]
    fn test_args_preview_truncates() {
        let long = serde_json::json!({"q": "x".repeat(500)});
        assert!(args_preview(&long).ends_with("..."));
        assert_eq!(args_preview(&serde_json::json!({})), "{}");
    }
}
