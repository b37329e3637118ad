//! SQLite 检查点：单表 checkpoints(session_id 主键)，rusqlite 同步调用放在 spawn_blocking 中

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use super::{Checkpoint, CheckpointStore};
use crate::core::{AgentError, Node, OrchestrationState};

pub struct SqliteCheckpointStore {
    conn: Arc<Mutex<Connection>>,
}

fn db_err(action: &str, e: impl std::fmt::Display) -> AgentError {
    AgentError::Checkpoint(format!("{action}: {e}"))
}

impl SqliteCheckpointStore {
    /// 打开（或创建）数据库文件并建表
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AgentError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| db_err("create dir", e))?;
            }
        }
        let conn = Connection::open(path).map_err(|e| db_err("open database", e))?;
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self, AgentError> {
        let conn = Connection::open_in_memory().map_err(|e| db_err("open database", e))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, AgentError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS checkpoints (
                session_id TEXT PRIMARY KEY,
                last_node TEXT NOT NULL,
                state TEXT NOT NULL,
                saved_at TEXT NOT NULL
            );",
        )
        .map_err(|e| db_err("create checkpoints table", e))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, AgentError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, AgentError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().unwrap_or_else(|e| e.into_inner());
            f(&guard)
        })
        .await
        .map_err(|e| db_err("task join", e))?
    }
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn save(
        &self,
        session_id: &str,
        last_node: Node,
        state: &OrchestrationState,
    ) -> Result<(), AgentError> {
        let cp = Checkpoint::new(session_id, last_node, state);
        let state_json =
            serde_json::to_string(&cp.state).map_err(|e| db_err("serialize state", e))?;
        self.blocking(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO checkpoints (session_id, last_node, state, saved_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    cp.session_id,
                    cp.last_node.as_str(),
                    state_json,
                    cp.saved_at.to_rfc3339()
                ],
            )
            .map_err(|e| db_err("save checkpoint", e))?;
            Ok(())
        })
        .await
    }

    async fn load(&self, session_id: &str) -> Result<Option<Checkpoint>, AgentError> {
        let sid = session_id.to_string();
        self.blocking(move |conn| {
            let row: Option<(String, String, String)> = conn
                .query_row(
                    "SELECT last_node, state, saved_at FROM checkpoints WHERE session_id = ?1",
                    params![sid],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()
                .map_err(|e| db_err("load checkpoint", e))?;
            let Some((node, state, saved_at)) = row else {
                return Ok(None);
            };
            let last_node = Node::parse(&node)
                .ok_or_else(|| db_err("load checkpoint", format!("unknown node '{node}'")))?;
            let state: OrchestrationState =
                serde_json::from_str(&state).map_err(|e| db_err("parse state", e))?;
            let saved_at = chrono::DateTime::parse_from_rfc3339(&saved_at)
                .map(|t| t.with_timezone(&chrono::Utc))
                .map_err(|e| db_err("parse saved_at", e))?;
            Ok(Some(Checkpoint {
                session_id: sid,
                last_node,
                state,
                saved_at,
            }))
        })
        .await
    }

    fn backend(&self) -> &'static str {
        "sqlite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sqlite_round_trip_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cp.db");
        let mut state = OrchestrationState::new("q", "coder");
        state.plan = vec!["a".into(), "b".into()];
        state.current_step_index = 1;
        {
            let store = SqliteCheckpointStore::open(&path).unwrap();
            store.save("s", Node::Planning, &state).await.unwrap();
            store.save("s", Node::Reviewing, &state).await.unwrap();
        }
        let store = SqliteCheckpointStore::open(&path).unwrap();
        let cp = store.load("s").await.unwrap().unwrap();
        assert_eq!(cp.last_node, Node::Reviewing);
        assert_eq!(cp.state, state);
        assert!(store.load("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_sessions() {
        let store = Arc::new(SqliteCheckpointStore::in_memory().unwrap());
        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let state = OrchestrationState::new(format!("q{i}"), "general");
                store.save(&format!("s{i}"), Node::Executing, &state).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        for i in 0..8 {
            let cp = store.load(&format!("s{i}")).await.unwrap().unwrap();
            assert_eq!(cp.state.request, format!("q{i}"));
        }
    }
}
