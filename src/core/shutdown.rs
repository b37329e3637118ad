//! 优雅关闭
//!
//! 统一监听 Ctrl+C / SIGTERM，通过 CancellationToken 通知后台任务（限流清理、HTTP 服务）退出。
//! 正在进行的运行不会被强行中断：已完成节点都有检查点，下次请求同一会话时继续。

use std::future::Future;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// 关闭信号管理器
#[derive(Clone)]
pub struct ShutdownManager {
    shutdown_token: CancellationToken,
    reason_tx: broadcast::Sender<ShutdownReason>,
}

/// 关闭原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Ctrl+C
    UserInitiated,
    /// SIGTERM
    Signal,
    FatalError(String),
}

impl ShutdownManager {
    pub fn new() -> Self {
        let (reason_tx, _) = broadcast::channel(1);
        Self {
            shutdown_token: CancellationToken::new(),
            reason_tx,
        }
    }

    /// 子 token：随管理器一起取消，也可单独取消
    pub fn token(&self) -> CancellationToken {
        self.shutdown_token.child_token()
    }

    pub fn shutdown(&self, reason: ShutdownReason) {
        let _ = self.reason_tx.send(reason);
        self.shutdown_token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownReason> {
        self.reason_tx.subscribe()
    }

    pub async fn wait_for_shutdown(&self) {
        self.shutdown_token.cancelled().await;
    }

    /// 安装系统信号处理器 (Ctrl+C, SIGTERM)
    pub fn install_signal_handlers(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
                manager.shutdown(ShutdownReason::UserInitiated);
            }
        });

        #[cfg(unix)]
        {
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                use tokio::signal::unix::{signal, SignalKind};
                if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                    sigterm.recv().await;
                    tracing::info!("Received SIGTERM, initiating graceful shutdown...");
                    manager.shutdown(ShutdownReason::Signal);
                }
            });
        }
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}

/// 运行 app 直到完成或收到关闭信号，然后执行 cleanup
///
/// 返回 app 的输出；被信号打断时为 None。
pub async fn run_with_graceful_shutdown<F, T, Fut>(
    shutdown_manager: Arc<ShutdownManager>,
    app: F,
    cleanup: impl FnOnce() -> Fut,
) -> Option<T>
where
    F: Future<Output = T>,
    Fut: Future<Output = ()>,
{
    shutdown_manager.install_signal_handlers();

    let out = tokio::select! {
        out = app => {
            tracing::debug!("Application finished normally");
            Some(out)
        }
        _ = shutdown_manager.wait_for_shutdown() => {
            tracing::info!("Shutdown signal received");
            None
        }
    };

    cleanup().await;
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_shutdown_cancels_child_tokens() {
        let manager = ShutdownManager::new();
        let token = manager.token();
        let mut rx = manager.subscribe();
        assert!(!manager.is_shutdown());
        manager.shutdown(ShutdownReason::FatalError("boom".into()));
        assert!(manager.is_shutdown());
        assert!(token.is_cancelled());
        assert_eq!(rx.try_recv().unwrap(), ShutdownReason::FatalError("boom".into()));
    }

    #[tokio::test]
    async fn test_run_returns_app_output_and_cleans_up() {
        let manager = Arc::new(ShutdownManager::new());
        let cleaned = Arc::new(AtomicBool::new(false));
        let flag = cleaned.clone();
        let out = run_with_graceful_shutdown(manager, async { 42 }, || async move {
            flag.store(true, Ordering::SeqCst);
        })
        .await;
        assert_eq!(out, Some(42));
        assert!(cleaned.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_app() {
        let manager = Arc::new(ShutdownManager::new());
        let trigger = manager.clone();
        let app = async move {
            trigger.shutdown(ShutdownReason::UserInitiated);
            std::future::pending::<u8>().await
        };
        let out = run_with_graceful_shutdown(manager, app, || async {}).await;
        assert_eq!(out, None);
    }
}
