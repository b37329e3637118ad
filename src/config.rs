//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `NABD__*` 覆盖（双下划线表示嵌套，如 `NABD__SANDBOX__MODE=docker`）。
//! 进程启动时加载一次，之后只读。

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub orchestrator: OrchestratorSection,
    pub tools: ToolsSection,
    pub sandbox: SandboxSection,
    pub rate_limit: RateLimitSection,
    pub checkpoint: CheckpointSection,
    /// 模式名 -> 指令文本（覆盖或新增内置模式）
    pub modes: HashMap<String, String>,
    pub web: WebSection,
}

/// [app] 段：工作目录、数据目录、会话历史上限
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 工作根目录，未设置时用 ./workspace
    pub workspace_root: Option<PathBuf>,
    /// file_writer 与沙箱共享的输出目录
    pub data_dir: PathBuf,
    /// 每个会话保留的历史消息条数
    pub max_history_messages: usize,
    /// 会话空闲多久后被回收（秒），0 表示不回收
    pub session_idle_secs: u64,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            workspace_root: None,
            data_dir: PathBuf::from("data"),
            max_history_messages: 40,
            session_idle_secs: 3600,
        }
    }
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：groq / openai / mock；未配置 Key 时自动退回 mock
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    /// 单次 oracle 请求超时（秒）
    pub request_timeout_secs: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "groq".to_string(),
            model: "llama-3.1-8b-instant".to_string(),
            base_url: None,
            request_timeout_secs: 60,
        }
    }
}

/// [orchestrator] 段：复审重试上限、报告上下文预算、兜底工具
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestratorSection {
    /// 同一步骤允许的 retry 次数，超过后强制 advance
    pub max_retries_per_step: u32,
    /// 报告生成时历史上下文的字符预算
    pub report_context_chars: usize,
    /// 报告生成时最多保留的历史记录条数
    pub report_max_records: usize,
    /// 工具选择失败时使用的搜索类工具
    pub fallback_tool: String,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            max_retries_per_step: 2,
            report_context_chars: 12_000,
            report_max_records: 40,
            fallback_tool: "web_search".to_string(),
        }
    }
}

/// [tools] 段：启用的工具、单次调用超时、搜索参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// 启动时按名称校验，未知名称直接拒绝
    pub enabled: Vec<String>,
    pub tool_timeout_secs: u64,
    pub search: SearchSection,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            enabled: vec![
                "web_search".into(),
                "file_writer".into(),
                "python_repl".into(),
            ],
            tool_timeout_secs: 30,
            search: SearchSection::default(),
        }
    }
}

/// [tools.search] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchSection {
    pub endpoint: String,
    pub timeout_secs: u64,
    pub max_result_chars: usize,
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            endpoint: "https://html.duckduckgo.com/html/".to_string(),
            timeout_secs: 15,
            max_result_chars: 4000,
        }
    }
}

/// [sandbox] 段：代码执行沙箱（默认关闭，需显式 mode = "docker"）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SandboxSection {
    pub mode: String,
    /// 容器引擎可执行文件（docker / podman）
    pub engine: String,
    pub image: String,
    pub timeout_secs: u64,
    pub memory_mb: u64,
    pub cpus: f64,
    pub pids_limit: u64,
    pub max_code_chars: usize,
    pub max_output_chars: usize,
    pub data_dir: Option<PathBuf>,
}

impl Default for SandboxSection {
    fn default() -> Self {
        Self {
            mode: "disabled".to_string(),
            engine: "docker".to_string(),
            image: "python:3.12-alpine".to_string(),
            timeout_secs: 10,
            memory_mb: 256,
            cpus: 0.5,
            pids_limit: 64,
            max_code_chars: 4000,
            max_output_chars: 4000,
            data_dir: None,
        }
    }
}

impl SandboxSection {
    /// 将数值收敛到允许区间，避免配置写出离谱的资源上限
    pub fn clamped(&self) -> Self {
        Self {
            timeout_secs: self.timeout_secs.clamp(1, 120),
            memory_mb: self.memory_mb.clamp(64, 2048),
            cpus: self.cpus.clamp(0.1, 4.0),
            pids_limit: self.pids_limit.clamp(16, 1024),
            max_code_chars: self.max_code_chars.clamp(100, 20_000),
            max_output_chars: self.max_output_chars.clamp(200, 20_000),
            ..self.clone()
        }
    }
}

/// [rate_limit] 段：分级固定窗口限流
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitSection {
    pub enabled: bool,
    pub anonymous: u32,
    pub authenticated: u32,
    pub premium: u32,
    pub window_secs: u64,
    /// 后台清理过期条目的间隔（秒）
    pub sweep_interval_secs: u64,
    pub excluded_paths: Vec<String>,
    pub user_id_header: String,
    pub premium_header: String,
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            enabled: true,
            anonymous: 10,
            authenticated: 60,
            premium: 200,
            window_secs: 60,
            sweep_interval_secs: 60,
            excluded_paths: vec![
                "/".into(),
                "/api/health".into(),
                "/docs".into(),
                "/openapi.json".into(),
            ],
            user_id_header: "x-user-id".to_string(),
            premium_header: "x-user-premium".to_string(),
        }
    }
}

/// [checkpoint] 段：none / memory / file / sqlite
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CheckpointSection {
    pub backend: String,
    /// file 后端为目录，sqlite 后端为数据库文件
    pub path: Option<PathBuf>,
}

impl Default for CheckpointSection {
    fn default() -> Self {
        Self {
            backend: "memory".to_string(),
            path: None,
        }
    }
}

/// [web] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebSection {
    pub host: String,
    pub port: u16,
    /// 流式接口在 oracle 不支持流式时，每个数据块包含的词数
    pub stream_chunk_words: usize,
}

impl Default for WebSection {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            stream_chunk_words: 3,
        }
    }
}

/// 从 config 目录加载配置，环境变量 NABD__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 NABD__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("NABD")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
