//! Filesystem tools - read, write, and edit files inside the workspace

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{optional_i64, required_str, resolve_in_workspace, truncate_chars, Tool, ToolArgs, ToolContext, WEB_CHAR_BUDGET};
use crate::error::Error;
use crate::Result;

/// Read file contents as numbered lines
pub struct FileReadTool;

#[async_trait]
impl Tool for FileReadTool {
    fn name(&self) -> &str {
        "file_read"
    }

    fn description(&self) -> &str {
        "Read a file in the workspace. Lines are numbered as `LINE|content`. \
         Use offset and limit to page through large files."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path relative to the workspace"
                },
                "offset": {
                    "type": "integer",
                    "description": "First line to return, 1-based (default 1)"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of lines to return"
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, args: &ToolArgs, ctx: &ToolContext) -> Result<String> {
        let path = required_str(args, "path")?;
        let offset = optional_i64(args, "offset")?.unwrap_or(1);
        let limit = optional_i64(args, "limit")?;
        if offset < 1 {
            return Err(Error::Tool(format!("offset must be >= 1, got {offset}")));
        }
        if matches!(limit, Some(l) if l < 1) {
            return Err(Error::Tool("limit must be >= 1".to_string()));
        }

        let full = resolve_in_workspace(&ctx.workspace, path)?;
        let content = tokio::fs::read_to_string(&full)
            .await
            .map_err(|e| Error::Tool(format!("Failed to read {path}: {e}")))?;

        let total = content.lines().count();
        let start = (offset - 1) as usize;
        if start > 0 && start >= total {
            return Err(Error::Tool(format!(
                "offset {offset} is past the end of {path} ({total} lines)"
            )));
        }
        let take = limit.map(|l| l as usize).unwrap_or(usize::MAX);

        let numbered = content
            .lines()
            .enumerate()
            .skip(start)
            .take(take)
            .map(|(i, line)| format!("{:>6}|{line}", i + 1))
            .collect::<Vec<_>>()
            .join("\n");

        Ok(truncate_chars(&numbered, WEB_CHAR_BUDGET))
    }
}

/// Write content to a file
pub struct FileWriteTool;

#[async_trait]
impl Tool for FileWriteTool {
    fn name(&self) -> &str {
        "file_write"
    }

    fn description(&self) -> &str {
        "Write content to a file in the workspace, replacing it if it exists"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path relative to the workspace"
                },
                "content": {
                    "type": "string",
                    "description": "Content to write to the file"
                }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, args: &ToolArgs, ctx: &ToolContext) -> Result<String> {
        let path = required_str(args, "path")?;
        let content = required_str(args, "content")?;
        let full = resolve_in_workspace(&ctx.workspace, path)?;

        // Create parent directories if needed
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::Tool(format!("Failed to create directory: {e}")))?;
        }

        tokio::fs::write(&full, content)
            .await
            .map_err(|e| Error::Tool(format!("Failed to write {path}: {e}")))?;

        Ok(format!("Successfully wrote {} bytes to {path}", content.len()))
    }
}

/// Replace text in a file
pub struct FileEditTool;

#[async_trait]
impl Tool for FileEditTool {
    fn name(&self) -> &str {
        "file_edit"
    }

    fn description(&self) -> &str {
        "Replace every occurrence of old_str with new_str in a workspace file"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path relative to the workspace"
                },
                "old_str": {
                    "type": "string",
                    "description": "Exact text to replace"
                },
                "new_str": {
                    "type": "string",
                    "description": "Replacement text"
                }
            },
            "required": ["path", "old_str", "new_str"]
        })
    }

    async fn execute(&self, args: &ToolArgs, ctx: &ToolContext) -> Result<String> {
        let path = required_str(args, "path")?;
        let old_str = required_str(args, "old_str")?;
        let new_str = required_str(args, "new_str")?;
        if old_str.is_empty() {
            return Err(Error::Tool("old_str must not be empty".to_string()));
        }

        let full = resolve_in_workspace(&ctx.workspace, path)?;
        let content = tokio::fs::read_to_string(&full)
            .await
            .map_err(|e| Error::Tool(format!("Failed to read {path}: {e}")))?;

        let count = content.matches(old_str).count();
        if count == 0 {
            return Err(Error::Tool(format!("old_str not found in {path}")));
        }

        tokio::fs::write(&full, content.replace(old_str, new_str))
            .await
            .map_err(|e| Error::Tool(format!("Failed to write {path}: {e}")))?;

        Ok(format!("Replaced {count} occurrence(s) in {path}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn args(value: Value) -> ToolArgs {
        match value {
            Value::Object(map) => map,
            _ => panic!("test args must be an object"),
        }
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let tmp = TempDir::new().unwrap();
        let ctx = ToolContext::new(tmp.path());

        let written = FileWriteTool
            .execute(&args(json!({"path": "notes/a.txt", "content": "Hello\nWorld"})), &ctx)
            .await
            .unwrap();
        assert!(written.contains("Successfully wrote 11 bytes"));

        let read = FileReadTool
            .execute(&args(json!({"path": "notes/a.txt"})), &ctx)
            .await
            .unwrap();
        assert_eq!(read, "     1|Hello\n     2|World");
    }

    #[tokio::test]
    async fn test_read_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("f.txt"), "same\nbytes\n").unwrap();
        let ctx = ToolContext::new(tmp.path());

        let first = FileReadTool.execute(&args(json!({"path": "f.txt"})), &ctx).await.unwrap();
        let second = FileReadTool.execute(&args(json!({"path": "f.txt"})), &ctx).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_read_offset_and_limit() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("f.txt"), "a\nb\nc\nd\n").unwrap();
        let ctx = ToolContext::new(tmp.path());

        let page = FileReadTool
            .execute(&args(json!({"path": "f.txt", "offset": 2, "limit": 2})), &ctx)
            .await
            .unwrap();
        assert_eq!(page, "     2|b\n     3|c");

        let err = FileReadTool
            .execute(&args(json!({"path": "f.txt", "offset": 9})), &ctx)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("past the end"));
    }

    #[tokio::test]
    async fn test_traversal_rejected_before_io() {
        let tmp = TempDir::new().unwrap();
        let ctx = ToolContext::new(tmp.path());

        let err = FileReadTool
            .execute(&args(json!({"path": "../../etc/passwd"})), &ctx)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("outside workspace"));

        let err = FileWriteTool
            .execute(&args(json!({"path": "../escape.txt", "content": "x"})), &ctx)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("outside workspace"));
        assert!(!tmp.path().parent().unwrap().join("escape.txt").exists());
    }

    #[tokio::test]
    async fn test_edit_replaces_all() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("c.rs"), "foo bar foo").unwrap();
        let ctx = ToolContext::new(tmp.path());

        let out = FileEditTool
            .execute(&args(json!({"path": "c.rs", "old_str": "foo", "new_str": "baz"})), &ctx)
            .await
            .unwrap();
        assert_eq!(out, "Replaced 2 occurrence(s) in c.rs");
        assert_eq!(std::fs::read_to_string(tmp.path().join("c.rs")).unwrap(), "baz bar baz");

        let err = FileEditTool
            .execute(&args(json!({"path": "c.rs", "old_str": "foo", "new_str": "x"})), &ctx)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
