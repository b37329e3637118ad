//! 代码执行沙箱
//!
//! 默认关闭，只有 `sandbox.mode = "docker"` 才会执行。代码写入临时目录后以只读方式挂载进容器，
//! 容器无网络、限 CPU / 内存 / 进程数、根文件系统只读、以 nobody 用户运行，只有数据目录可写。
//! 超时由本进程硬性终止容器（kill + `rm -f`），不依赖代码自身配合。
//!
//! `run` 永远返回一段文本：执行结果或描述失败原因的消息，从不返回错误。

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;

use crate::config::SandboxSection;

pub const NO_CODE: &str = "No code provided.";
pub const NO_OUTPUT: &str = "Execution completed with no output.";
pub const TRUNCATION_MARKER: &str = "... [output truncated]";

/// `rm -f` 清理容器的最长等待
const CLEANUP_TIMEOUT_SECS: u64 = 10;

const DISABLED: &str =
    "Python tool is disabled for safety. Set sandbox.mode = \"docker\" to enable sandboxed execution.";

/// 一次执行的结果文本及是否跑完
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxReport {
    pub text: String,
    pub completed: bool,
}

impl SandboxReport {
    fn incomplete(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            completed: false,
        }
    }
}

/// 沙箱运行器：持有收敛后的配置与数据目录
#[derive(Debug, Clone)]
pub struct SandboxRunner {
    cfg: SandboxSection,
    data_dir: PathBuf,
}

impl SandboxRunner {
    /// data_dir 未在 [sandbox] 中配置时使用传入的共享数据目录
    pub fn new(cfg: &SandboxSection, default_data_dir: impl AsRef<Path>) -> Self {
        let cfg = cfg.clamped();
        let data_dir = cfg
            .data_dir
            .clone()
            .unwrap_or_else(|| default_data_dir.as_ref().to_path_buf());
        Self { cfg, data_dir }
    }

    pub fn is_enabled(&self) -> bool {
        self.mode() == "docker"
    }

    /// 一次执行最多占用的时间：执行超时加上强制清理容器的时间。
    /// 外层调用方的超时不得短于它，否则超时消息与容器清理都会丢失。
    pub fn time_budget(&self) -> Duration {
        Duration::from_secs(self.cfg.timeout_secs + CLEANUP_TIMEOUT_SECS + 1)
    }

    fn mode(&self) -> String {
        self.cfg.mode.trim().to_lowercase()
    }

    /// 执行一段 Python 代码，返回合并后的 stdout/stderr 或说明性消息
    pub async fn run(&self, code: &str) -> String {
        self.execute(code).await.text
    }

    /// 同 run，另外标明代码是否真正跑完（被拒绝、超时、引擎故障时为 false）
    pub async fn execute(&self, code: &str) -> SandboxReport {
        match self.mode().as_str() {
            "" | "0" | "false" | "off" | "disabled" => return SandboxReport::incomplete(DISABLED),
            "docker" => {}
            other => {
                return SandboxReport::incomplete(format!(
                    "Unsupported sandbox mode '{other}'. Use 'docker'."
                ))
            }
        }
        if let Err(msg) = validate_code(code, self.cfg.max_code_chars) {
            return SandboxReport::incomplete(msg);
        }
        match self.run_in_container(code).await {
            Ok(report) => report,
            Err(msg) => SandboxReport::incomplete(msg),
        }
    }

    async fn run_in_container(&self, code: &str) -> Result<SandboxReport, String> {
        let data_dir = absolute(&self.data_dir);
        tokio::fs::create_dir_all(&data_dir)
            .await
            .map_err(|e| format!("Sandbox execution failed: cannot create data dir: {e}"))?;

        let code_dir = tempfile::tempdir()
            .map_err(|e| format!("Sandbox execution failed: cannot create temp dir: {e}"))?;
        tokio::fs::write(code_dir.path().join("main.py"), code)
            .await
            .map_err(|e| format!("Sandbox execution failed: cannot write code: {e}"))?;

        let name = format!("nabd-sandbox-{}", uuid::Uuid::new_v4().simple());
        let args = self.container_args(&name, code_dir.path(), &data_dir);

        let child = Command::new(&self.cfg.engine)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => format!(
                    "Container engine '{}' is not available on this host.",
                    self.cfg.engine
                ),
                _ => format!("Sandbox execution failed: {e}"),
            })?;

        let limit = Duration::from_secs(self.cfg.timeout_secs);
        let output = match timeout(limit, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(format!("Sandbox execution failed: {e}")),
            Err(_) => {
                // 超时：子进程随 future 一起被 kill，再强制删除容器
                self.force_remove(&name).await;
                tracing::warn!(container = %name, timeout_secs = self.cfg.timeout_secs, "sandbox timeout");
                return Ok(SandboxReport::incomplete(format!(
                    "Execution timed out after {}s.",
                    self.cfg.timeout_secs
                )));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        Ok(SandboxReport {
            text: format_output(stdout.trim(), stderr.trim(), self.cfg.max_output_chars),
            completed: true,
        })
    }

    fn container_args(&self, name: &str, code_dir: &Path, data_dir: &Path) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "run".into(),
            "--rm".into(),
            "--name".into(),
            name.into(),
            "--network".into(),
            "none".into(),
            "--cpus".into(),
            self.cfg.cpus.to_string(),
            "--memory".into(),
            format!("{}m", self.cfg.memory_mb),
            "--pids-limit".into(),
            self.cfg.pids_limit.to_string(),
            "--security-opt".into(),
            "no-new-privileges".into(),
            "--cap-drop".into(),
            "ALL".into(),
            "--read-only".into(),
            "--tmpfs".into(),
            "/tmp:rw,noexec,nosuid,nodev,size=64m".into(),
            "--user".into(),
            "65534:65534".into(),
            "-e".into(),
            "PYTHONDONTWRITEBYTECODE=1".into(),
            "-e".into(),
            "PYTHONUNBUFFERED=1".into(),
        ];
        args.extend([
            "-v".into(),
            format!("{}:/sandbox:ro", mount_path(code_dir)),
            "-v".into(),
            format!("{}:/sandbox/data:rw", mount_path(data_dir)),
            "-w".into(),
            "/sandbox".into(),
            self.cfg.image.clone(),
            "python".into(),
            "-u".into(),
            "main.py".into(),
        ]);
        args
    }

    async fn force_remove(&self, name: &str) {
        let removal = Command::new(&self.cfg.engine)
            .args(["rm", "-f", name])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status();
        match timeout(Duration::from_secs(CLEANUP_TIMEOUT_SECS), removal).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => tracing::warn!(container = %name, "sandbox cleanup failed: {}", e),
            Err(_) => tracing::warn!(container = %name, "sandbox cleanup timed out"),
        }
    }
}

/// 空代码与超长代码直接拒绝，不截断执行
pub fn validate_code(code: &str, max_code_chars: usize) -> Result<(), String> {
    if code.trim().is_empty() {
        return Err(NO_CODE.to_string());
    }
    if code.chars().count() > max_code_chars {
        return Err(format!("Code too long. Max {max_code_chars} characters."));
    }
    Ok(())
}

/// 合并 stdout / stderr，空输出给出说明，超长截断并追加标记
pub fn format_output(stdout: &str, stderr: &str, max_output_chars: usize) -> String {
    let combined = match (stdout.is_empty(), stderr.is_empty()) {
        (false, false) => format!("{stdout}\n{stderr}"),
        (false, true) => stdout.to_string(),
        (true, false) => stderr.to_string(),
        (true, true) => return NO_OUTPUT.to_string(),
    };
    truncate_output(combined, max_output_chars)
}

fn truncate_output(output: String, max_chars: usize) -> String {
    if output.chars().count() <= max_chars {
        return output;
    }
    let mut kept: String = output.chars().take(max_chars).collect();
    kept.push('\n');
    kept.push_str(TRUNCATION_MARKER);
    kept
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

fn mount_path(path: &Path) -> String {
    let s = path.to_string_lossy();
    if cfg!(windows) {
        s.replace('\\', "/")
    } else {
        s.into_owned()
    }
}
