//! 会话管理
//!
//! 每个 thread id 对应一个 SessionSlot，首次请求时创建，之后跨请求保留对话历史。
//! 槽里有两把锁：run_gate 在整次运行期间持有，保证同一会话内的运行严格串行；
//! 对话历史只在读写时短暂加锁，运行进行中也能读取。不同会话完全并行。
//! 空闲超过 `app.session_idle_secs` 且没有运行中的会话由后台任务回收。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tokio_util::sync::CancellationToken;

use crate::memory::{ConversationMemory, Message};

pub type SessionId = String;

/// 单个会话
#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    pub message_history: ConversationMemory,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: impl Into<String>, max_history: usize) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            message_history: ConversationMemory::new(max_history),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn push(&mut self, msg: Message) {
        self.message_history.push(msg);
        self.updated_at = Utc::now();
    }
}

/// 会话槽：运行闸门 + 会话数据
#[derive(Debug)]
pub struct SessionSlot {
    run_gate: Mutex<()>,
    session: Mutex<Session>,
}

impl SessionSlot {
    fn new(id: &str, max_history: usize) -> Self {
        Self {
            run_gate: Mutex::new(()),
            session: Mutex::new(Session::new(id, max_history)),
        }
    }

    /// 等待并占用本会话的运行权，返回的 guard 释放前其他运行会排队
    pub async fn begin_run(&self) -> MutexGuard<'_, ()> {
        self.run_gate.lock().await
    }

    pub fn is_running(&self) -> bool {
        self.run_gate.try_lock().is_err()
    }

    /// 当前历史的副本
    pub async fn snapshot(&self) -> Vec<Message> {
        self.session.lock().await.message_history.messages().to_vec()
    }

    pub async fn push(&self, msg: Message) {
        self.session.lock().await.push(msg);
    }

    /// 没有运行、数据锁空闲且最后更新早于 cutoff
    fn is_idle_before(&self, cutoff: DateTime<Utc>) -> bool {
        if self.is_running() {
            return false;
        }
        match self.session.try_lock() {
            Ok(session) => session.updated_at < cutoff,
            Err(_) => false,
        }
    }
}

/// 会话管理器：session_id -> Arc<SessionSlot>
pub struct SessionManager {
    sessions: RwLock<HashMap<SessionId, Arc<SessionSlot>>>,
    max_history: usize,
}

impl SessionManager {
    pub fn new(max_history: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_history,
        }
    }

    /// 获取或创建会话；返回值第二项表示是否新建
    pub async fn get_or_create(&self, id: &str) -> (Arc<SessionSlot>, bool) {
        if let Some(s) = self.sessions.read().await.get(id) {
            return (Arc::clone(s), false);
        }
        let mut sessions = self.sessions.write().await;
        // 读锁释放后可能已被其他请求创建
        if let Some(s) = sessions.get(id) {
            return (Arc::clone(s), false);
        }
        let slot = Arc::new(SessionSlot::new(id, self.max_history));
        sessions.insert(id.to_string(), Arc::clone(&slot));
        tracing::info!(session = %id, "session created");
        (slot, true)
    }

    pub async fn get(&self, id: &str) -> Option<Arc<SessionSlot>> {
        self.sessions.read().await.get(id).cloned()
    }

    /// 会话的消息历史；会话不存在时为 None。不等待进行中的运行
    pub async fn history(&self, id: &str) -> Option<Vec<Message>> {
        let slot = self.get(id).await?;
        Some(slot.snapshot().await)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn remove(&self, id: &str) -> bool {
        self.sessions.write().await.remove(id).is_some()
    }

    /// 回收在 now - max_idle 之前最后更新、且没有运行中的会话，返回回收数量
    pub async fn evict_idle_at(&self, now: DateTime<Utc>, max_idle: Duration) -> usize {
        let Ok(max_idle) = chrono::Duration::from_std(max_idle) else {
            return 0;
        };
        let cutoff = now - max_idle;
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, slot| !slot.is_idle_before(cutoff));
        before - sessions.len()
    }

    /// 后台定期回收空闲会话；max_idle 为 0 时不启动回收
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        max_idle: Duration,
        token: CancellationToken,
    ) -> Option<tokio::task::JoinHandle<()>> {
        if max_idle.is_zero() {
            return None;
        }
        let manager = Arc::clone(self);
        let every = (max_idle / 4).clamp(Duration::from_secs(1), Duration::from_secs(300));
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = manager.evict_idle_at(Utc::now(), max_idle).await;
                        if removed > 0 {
                            tracing::debug!(removed, "idle sessions evicted");
                        }
                    }
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_or_create_reuses_session() {
        let mgr = SessionManager::new(10);
        let (a, created) = mgr.get_or_create("t1").await;
        assert!(created);
        a.push(Message::user("hello")).await;
        let (b, created) = mgr.get_or_create("t1").await;
        assert!(!created);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(mgr.history("t1").await.unwrap().len(), 1);
        assert!(mgr.history("missing").await.is_none());
        assert!(mgr.remove("t1").await);
        assert!(mgr.is_empty().await);
    }

    #[tokio::test]
    async fn test_history_readable_while_run_in_progress() {
        let mgr = SessionManager::new(10);
        let (slot, _) = mgr.get_or_create("busy").await;
        let _running = slot.begin_run().await;
        slot.push(Message::user("working on it")).await;
        assert!(slot.is_running());

        let history = tokio::time::timeout(Duration::from_millis(200), mgr.history("busy"))
            .await
            .expect("history must not wait for the run");
        assert_eq!(history.unwrap(), vec![Message::user("working on it")]);
    }

    #[tokio::test]
    async fn test_evict_idle_skips_running_sessions() {
        let mgr = SessionManager::new(10);
        let (idle, _) = mgr.get_or_create("idle").await;
        idle.push(Message::user("old")).await;
        let (busy, _) = mgr.get_or_create("busy").await;
        let _running = busy.begin_run().await;

        let later = Utc::now() + chrono::Duration::hours(2);
        let removed = mgr.evict_idle_at(later, Duration::from_secs(3600)).await;
        assert_eq!(removed, 1);
        assert!(mgr.get("idle").await.is_none());
        assert!(mgr.get("busy").await.is_some());

        // 尚未超时的会话保留
        assert_eq!(mgr.evict_idle_at(Utc::now(), Duration::from_secs(3600)).await, 0);
    }
}
