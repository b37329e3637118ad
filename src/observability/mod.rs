//! 可观测性：tracing 初始化与指标接口
//!
//! 指标只定义采集接口，默认 NoopMetrics；导出格式不在本 crate 内实现。

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// 安装全局 subscriber：默认 info，RUST_LOG 可覆盖
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // 测试或嵌入场景下可能已安装过，忽略重复初始化
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init();
}

/// 指标采集接口：HTTP 请求、运行结果、工具调用
pub trait Metrics: Send + Sync {
    fn record_request(&self, method: &str, path: &str, status: u16, latency: Duration);
    fn record_run(&self, mode: &str, success: bool);
    fn record_tool(&self, tool: &str, success: bool, latency: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl Metrics for NoopMetrics {
    fn record_request(&self, _method: &str, _path: &str, _status: u16, _latency: Duration) {}
    fn record_run(&self, _mode: &str, _success: bool) {}
    fn record_tool(&self, _tool: &str, _success: bool, _latency: Duration) {}
}

/// 只计数的内存实现（CLI 结束时打印汇总，测试中用于断言）
#[derive(Debug, Default)]
pub struct CountingMetrics {
    pub requests: AtomicU64,
    pub runs_ok: AtomicU64,
    pub runs_failed: AtomicU64,
    pub tool_calls: AtomicU64,
    pub tool_failures: AtomicU64,
}

impl CountingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn summary(&self) -> String {
        format!(
            "runs ok={} failed={}, tool calls={} failed={}",
            self.runs_ok.load(Ordering::Relaxed),
            self.runs_failed.load(Ordering::Relaxed),
            self.tool_calls.load(Ordering::Relaxed),
            self.tool_failures.load(Ordering::Relaxed),
        )
    }
}

impl Metrics for CountingMetrics {
    fn record_request(&self, _method: &str, _path: &str, _status: u16, _latency: Duration) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    fn record_run(&self, _mode: &str, success: bool) {
        if success {
            self.runs_ok.fetch_add(1, Ordering::Relaxed);
        } else {
            self.runs_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn record_tool(&self, _tool: &str, success: bool, _latency: Duration) {
        self.tool_calls.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.tool_failures.fetch_add(1, Ordering::Relaxed);
        }
    }
}
