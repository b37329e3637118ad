//! Nabd HTTP 服务
//!
//! 启动: cargo run --bin nabd-web
//! 端口取 [web].port，环境变量 NABD_WEB_PORT 可覆盖

#![cfg(feature = "web")]

use std::sync::Arc;

use anyhow::Context;
use nabd::agent::create_components;
use nabd::config::load_config;
use nabd::core::ShutdownManager;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    nabd::observability::init();

    let mut cfg = load_config(None).context("Failed to load config")?;
    if let Some(port) = std::env::var("NABD_WEB_PORT")
        .ok()
        .and_then(|s| s.parse::<u16>().ok())
    {
        cfg.web.port = port;
    }

    let components = Arc::new(create_components(cfg).context("Failed to create agent")?);
    let shutdown = Arc::new(ShutdownManager::new());
    nabd::web::serve(components, shutdown).await
}
