//! 工具层：Tool trait、封闭的内置工具集合、注册表与带超时/审计的执行器

pub mod executor;
pub mod file_writer;
pub mod python;
pub mod registry;
pub mod schema;
pub mod web_search;

use std::path::Path;
use std::sync::Arc;

pub use executor::ToolExecutor;
pub use file_writer::FileWriterTool;
pub use python::PythonReplTool;
pub use registry::{Tool, ToolKind, ToolOutput, ToolRegistry};
pub use schema::{tool_call_schema_json, ToolSelection};
pub use web_search::WebSearchTool;

use crate::config::AppConfig;
use crate::core::AgentError;
use crate::sandbox::SandboxRunner;

/// 按配置构建注册表：未知工具名、兜底工具未启用都在启动时报 ConfigError
pub fn build_registry(cfg: &AppConfig, data_dir: &Path) -> Result<ToolRegistry, AgentError> {
    let mut kinds = Vec::new();
    for name in &cfg.tools.enabled {
        let kind = ToolKind::parse(name)
            .map_err(|e| AgentError::ConfigError(format!("[tools].enabled: {e}")))?;
        if !kinds.contains(&kind) {
            kinds.push(kind);
        }
    }
    let fallback = cfg.orchestrator.fallback_tool.trim();
    if !kinds.iter().any(|k| k.name() == fallback) {
        return Err(AgentError::ConfigError(format!(
            "fallback tool '{fallback}' is not enabled"
        )));
    }

    let mut registry = ToolRegistry::new();
    for kind in kinds {
        match kind {
            ToolKind::WebSearch => registry.register(WebSearchTool::new(&cfg.tools.search)),
            ToolKind::FileWriter => registry.register(FileWriterTool::new(data_dir)),
            ToolKind::PythonRepl => {
                let runner = Arc::new(SandboxRunner::new(&cfg.sandbox, data_dir));
                registry.register(PythonReplTool::new(runner));
            }
        }
    }
    tracing::info!(tools = ?registry.tool_names(), "tool registry ready");
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_registers_all_builtins() {
        let cfg = AppConfig::default();
        let reg = build_registry(&cfg, Path::new("data")).unwrap();
        assert_eq!(reg.tool_names(), vec!["file_writer", "python_repl", "web_search"]);
    }

    #[test]
    fn test_unknown_tool_rejected_at_startup() {
        let mut cfg = AppConfig::default();
        cfg.tools.enabled.push("generate_image".into());
        let err = build_registry(&cfg, Path::new("data")).err().unwrap();
        assert!(matches!(err, AgentError::ConfigError(msg) if msg.contains("generate_image")));
    }

    #[test]
    fn test_fallback_must_be_enabled() {
        let mut cfg = AppConfig::default();
        cfg.tools.enabled = vec!["file_writer".into()];
        assert!(matches!(
            build_registry(&cfg, Path::new("data")),
            Err(AgentError::ConfigError(_))
        ));
    }
}
