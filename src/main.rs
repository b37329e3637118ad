//! Nabd 命令行入口：对一条请求跑完整编排，打印进度与最终报告
//!
//! 用法: nabd --prompt "find the population of Japan and save it to a file" [--thread ID] [--mode researcher]
//! 同一 --thread 再次运行时，若上次中途失败会从检查点继续。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use nabd::agent::{create_components, process_request_stream, RunRequest};
use nabd::config::load_config;
use nabd::core::{run_with_graceful_shutdown, ShutdownManager};
use nabd::pipeline::RunEvent;

#[derive(Parser, Debug)]
#[command(name = "nabd", version, about = "Plan, execute, review and report on a task")]
struct Cli {
    /// 任务描述
    #[arg(short, long)]
    prompt: String,

    /// 会话 id；缺省时新建
    #[arg(short, long)]
    thread: Option<String>,

    /// general / coder / writer / researcher 或配置中的自定义模式
    #[arg(short, long)]
    mode: Option<String>,

    /// 附带的图片引用（路径或 URL）
    #[arg(long)]
    image: Option<String>,

    /// 额外的配置文件，覆盖 config/default.toml
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn print_event(ev: &RunEvent) {
    match ev {
        RunEvent::Resumed { last_node, next } => {
            eprintln!("[resume] last completed: {last_node}, continuing at {next}")
        }
        RunEvent::Planned { plan, defaulted } => {
            eprintln!("[plan]{}", if *defaulted { " (default)" } else { "" });
            for (i, step) in plan.iter().enumerate() {
                eprintln!("  {}. {}", i + 1, step);
            }
        }
        RunEvent::ToolInvoked {
            step_id,
            tool,
            success,
            preview,
        } => eprintln!(
            "[{step_id}] {tool} {}: {preview}",
            if *success { "ok" } else { "failed" }
        ),
        RunEvent::Reviewed {
            decision, feedback, ..
        } => eprintln!("[review] {decision}: {feedback}"),
        RunEvent::CheckpointDegraded { reason } => eprintln!("[warn] checkpoint: {reason}"),
        RunEvent::MessageChunk { text } => print!("{text}"),
        RunEvent::MessageDone => println!(),
        RunEvent::Error { text } => eprintln!("[error] {text}"),
        RunEvent::NodeCompleted { .. } => {}
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    nabd::observability::init();
    let cli = Cli::parse();

    let cfg = load_config(cli.config.clone()).context("Failed to load config")?;
    let components = create_components(cfg).context("Failed to create agent")?;

    let req = RunRequest {
        prompt: cli.prompt,
        thread_id: cli.thread,
        mode: cli.mode,
        image_ref: cli.image,
    };
    let thread_id = req.resolve_thread_id();
    eprintln!("[session] {thread_id}");

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let printer = tokio::spawn(async move {
        while let Some(ev) = rx.recv().await {
            print_event(&ev);
        }
    });

    let shutdown = Arc::new(ShutdownManager::new());
    let outcome = run_with_graceful_shutdown(
        shutdown,
        process_request_stream(&components, &thread_id, &req, tx),
        || async {},
    )
    .await;
    let _ = printer.await;

    match outcome {
        Some(Ok(resp)) => {
            eprintln!(
                "[done] steps executed: {}/{}",
                resp.steps_executed,
                resp.plan.len()
            );
            Ok(())
        }
        Some(Err(e)) => Err(e).context("Run failed"),
        None => {
            eprintln!("[interrupted] resume with --thread {thread_id}");
            Ok(())
        }
    }
}
