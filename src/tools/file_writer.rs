//! file_writer：把文本写入数据目录
//!
//! 只保留文件名的最后一段（去掉任何目录部分），因此写入位置总在数据目录下，无法通过 ../ 逃逸。

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;

use crate::tools::{Tool, ToolOutput};

pub struct FileWriterTool {
    data_dir: PathBuf,
}

impl FileWriterTool {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}

/// 取文件名的最后一段；`\` 也视为分隔符
pub fn safe_filename(raw: &str) -> Option<String> {
    let name = raw
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or("")
        .trim();
    if name.is_empty() || name == "." || name == ".." {
        None
    } else {
        Some(name.to_string())
    }
}

#[async_trait]
impl Tool for FileWriterTool {
    fn name(&self) -> &str {
        "file_writer"
    }

    fn description(&self) -> &str {
        "Save text content to a file in the data directory. Params: {\"filename\": \"name.txt\", \"content\": \"text\"}."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "filename": {"type": "string", "description": "File name, directories are ignored"},
                "content": {"type": "string", "description": "Text to write"}
            },
            "required": ["filename", "content"]
        })
    }

    async fn invoke(&self, params: Value) -> ToolOutput {
        let Some(filename) = params
            .get("filename")
            .and_then(|v| v.as_str())
            .and_then(safe_filename)
        else {
            return ToolOutput::failed("File write error: missing or invalid filename");
        };
        let content = match params.get("content") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => {
                return ToolOutput::failed("File write error: missing content")
            }
            Some(other) => other.to_string(),
        };

        if let Err(e) = tokio::fs::create_dir_all(&self.data_dir).await {
            return ToolOutput::failed(format!("File write error: {e}"));
        }
        let path = self.data_dir.join(&filename);
        match tokio::fs::write(&path, content.as_bytes()).await {
            Ok(()) => {
                tracing::info!(path = %path.display(), bytes = content.len(), "file written");
                let dir = self
                    .data_dir
                    .file_name()
                    .map(|d| d.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "data".to_string());
                ToolOutput::ok(format!("File saved to {dir}/{filename}"))
            }
            Err(e) => ToolOutput::failed(format!("File write error: {e}")),
        }
    }
}
