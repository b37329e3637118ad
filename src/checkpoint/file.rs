//! 文件检查点：每个会话一个 JSON 文件，先写临时文件再 rename，保证不会读到半截内容

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{Checkpoint, CheckpointStore};
use crate::core::{AgentError, Node, OrchestrationState};

#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn path_for(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", encode_file_stem(session_id)))
    }
}

/// 会话 id 到文件名的可逆编码：字母数字与 - 原样保留，其余字节写成 `_XX`（十六进制），
/// 不同的 id 永远得到不同的文件
fn encode_file_stem(session_id: &str) -> String {
    let mut out = String::with_capacity(session_id.len());
    for b in session_id.bytes() {
        if b.is_ascii_alphanumeric() || b == b'-' {
            out.push(char::from(b));
        } else {
            out.push_str(&format!("_{b:02X}"));
        }
    }
    out
}

fn io_err(action: &str, path: &Path, e: impl std::fmt::Display) -> AgentError {
    AgentError::Checkpoint(format!("{action} {}: {e}", path.display()))
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save(
        &self,
        session_id: &str,
        last_node: Node,
        state: &OrchestrationState,
    ) -> Result<(), AgentError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| io_err("create dir", &self.dir, e))?;
        let cp = Checkpoint::new(session_id, last_node, state);
        let json = serde_json::to_vec_pretty(&cp)
            .map_err(|e| AgentError::Checkpoint(format!("serialize: {e}")))?;

        let path = self.path_for(session_id);
        let tmp = path.with_extension(format!("json.{}.tmp", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| io_err("write", &tmp, e))?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(io_err("rename", &path, e));
        }
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Option<Checkpoint>, AgentError> {
        let path = self.path_for(session_id);
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_err("read", &path, e)),
        };
        let cp: Checkpoint = serde_json::from_slice(&data).map_err(|e| io_err("parse", &path, e))?;
        if cp.session_id != session_id {
            tracing::warn!(
                session = %session_id,
                stored = %cp.session_id,
                "checkpoint file belongs to another session, ignoring"
            );
            return Ok(None);
        }
        Ok(Some(cp))
    }

    fn backend(&self) -> &'static str {
        "file"
    }
}
