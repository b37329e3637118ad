//! 检查点存储：每个节点完成后保存 (最后完成的节点, OrchestrationState)，按会话 id 覆盖写入
//!
//! 后端由 `[checkpoint].backend` 选择：none（不保存）、memory（进程内）、file（每会话一个 JSON）、
//! sqlite（单表）。所有后端都支持多会话并发访问；单个会话的写入总是整条替换。

pub mod file;
pub mod memory;
pub mod sqlite;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::CheckpointSection;
use crate::core::{AgentError, Node, OrchestrationState};

pub use file::FileCheckpointStore;
pub use memory::{MemoryCheckpointStore, NoopCheckpointStore};
pub use sqlite::SqliteCheckpointStore;

/// 一条检查点
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub session_id: String,
    pub last_node: Node,
    pub state: OrchestrationState,
    pub saved_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(session_id: &str, last_node: Node, state: &OrchestrationState) -> Self {
        Self {
            session_id: session_id.to_string(),
            last_node,
            state: state.clone(),
            saved_at: Utc::now(),
        }
    }

    /// 最后完成的是 Writing（或 Done）表示该运行已结束
    pub fn is_finished(&self) -> bool {
        matches!(self.last_node, Node::Writing | Node::Done)
    }
}

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn save(
        &self,
        session_id: &str,
        last_node: Node,
        state: &OrchestrationState,
    ) -> Result<(), AgentError>;

    async fn load(&self, session_id: &str) -> Result<Option<Checkpoint>, AgentError>;

    fn backend(&self) -> &'static str;
}

/// 按配置创建检查点后端；file / sqlite 未配置 path 时放在数据目录下
pub fn create_checkpoint_store(
    cfg: &CheckpointSection,
    data_dir: &Path,
) -> Result<Arc<dyn CheckpointStore>, AgentError> {
    let store: Arc<dyn CheckpointStore> = match cfg.backend.trim().to_lowercase().as_str() {
        "none" | "" => Arc::new(NoopCheckpointStore),
        "memory" => Arc::new(MemoryCheckpointStore::new()),
        "file" => {
            let dir = cfg
                .path
                .clone()
                .unwrap_or_else(|| data_dir.join("checkpoints"));
            Arc::new(FileCheckpointStore::new(dir))
        }
        "sqlite" => {
            let path = cfg
                .path
                .clone()
                .unwrap_or_else(|| data_dir.join("checkpoints.db"));
            Arc::new(SqliteCheckpointStore::open(path)?)
        }
        other => {
            return Err(AgentError::ConfigError(format!(
                "unknown checkpoint backend '{other}' (expected none|memory|file|sqlite)"
            )))
        }
    };
    tracing::info!(backend = store.backend(), "checkpoint store ready");
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_selects_backend() {
        let dir = tempfile::tempdir().unwrap();
        for (name, expected) in [
            ("none", "none"),
            ("memory", "memory"),
            ("file", "file"),
            ("sqlite", "sqlite"),
        ] {
            let cfg = CheckpointSection {
                backend: name.to_string(),
                path: None,
            };
            let store = create_checkpoint_store(&cfg, dir.path()).unwrap();
            assert_eq!(store.backend(), expected);
        }
        let cfg = CheckpointSection {
            backend: "redis".into(),
            path: None,
        };
        assert!(matches!(
            create_checkpoint_store(&cfg, dir.path()),
            Err(AgentError::ConfigError(_))
        ));
    }
}
