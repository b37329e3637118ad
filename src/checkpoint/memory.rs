//! 进程内检查点（重启即丢失）与不保存任何内容的 none 后端

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{Checkpoint, CheckpointStore};
use crate::core::{AgentError, Node, OrchestrationState};

#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    entries: RwLock<HashMap<String, Checkpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn save(
        &self,
        session_id: &str,
        last_node: Node,
        state: &OrchestrationState,
    ) -> Result<(), AgentError> {
        let cp = Checkpoint::new(session_id, last_node, state);
        self.entries.write().await.insert(session_id.to_string(), cp);
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Option<Checkpoint>, AgentError> {
        Ok(self.entries.read().await.get(session_id).cloned())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

/// 不做持久化：运行只依赖内存中的状态
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCheckpointStore;

#[async_trait]
impl CheckpointStore for NoopCheckpointStore {
    async fn save(
        &self,
        _session_id: &str,
        _last_node: Node,
        _state: &OrchestrationState,
    ) -> Result<(), AgentError> {
        Ok(())
    }

    async fn load(&self, _session_id: &str) -> Result<Option<Checkpoint>, AgentError> {
        Ok(None)
    }

    fn backend(&self) -> &'static str {
        "none"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_round_trip_and_overwrite() {
        let store = MemoryCheckpointStore::new();
        let mut state = OrchestrationState::new("q", "general");
        state.plan = vec!["a".into(), "b".into()];
        store.save("s1", Node::Planning, &state).await.unwrap();
        state.current_step_index = 1;
        store.save("s1", Node::Reviewing, &state).await.unwrap();

        let cp = store.load("s1").await.unwrap().unwrap();
        assert_eq!(cp.last_node, Node::Reviewing);
        assert_eq!(cp.state, state);
        assert!(store.load("other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_noop_never_returns_anything() {
        let store = NoopCheckpointStore;
        let state = OrchestrationState::new("q", "general");
        store.save("s1", Node::Planning, &state).await.unwrap();
        assert!(store.load("s1").await.unwrap().is_none());
    }
}
