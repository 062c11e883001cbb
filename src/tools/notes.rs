//! 沙箱笔记工具
//!
//! NoteVault 绑定笔记库根目录，所有路径先做词法校验（禁止绝对路径与 `..` 逃逸）再拼到根下；
//! ReadNoteTool / ListNotesTool / WriteNoteTool 基于 NoteVault 提供读、列、写能力。

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::core::AgentError;
use crate::tools::{ToolContext, ToolResult, TypedTool};

/// 笔记库沙箱：绑定根目录，resolve 校验路径在根下
#[derive(Debug, Clone)]
pub struct NoteVault {
    root_dir: PathBuf,
}

impl NoteVault {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        let root = root_dir.as_ref().to_path_buf();
        let root_dir = root.canonicalize().unwrap_or(root);
        Self { root_dir }
    }

    pub fn root(&self) -> &Path {
        &self.root_dir
    }

    /// 把相对路径解析到根下；绝对路径或包含 `..` 时拒绝
    pub fn resolve(&self, path: &str) -> Result<PathBuf, AgentError> {
        let trimmed = path.trim().trim_start_matches("./");
        let mut resolved = self.root_dir.clone();
        for component in Path::new(trimmed).components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(AgentError::PathEscape(path.to_string())); // 如 ../../etc/passwd
                }
            }
        }
        Ok(resolved)
    }

    pub async fn read_note(&self, path: &str) -> Result<String, String> {
        let resolved = self.resolve(path).map_err(|e| e.to_string())?;
        fs::read_to_string(&resolved)
            .await
            .map_err(|e| format!("Read failed for {}: {}", path, e))
    }

    pub async fn list(&self, path: &str) -> Result<Vec<String>, String> {
        let base = if path.is_empty() || path == "." {
            self.root_dir.clone()
        } else {
            self.resolve(path).map_err(|e| e.to_string())?
        };
        let mut dir = fs::read_dir(&base)
            .await
            .map_err(|e| format!("List failed: {}", e))?;
        let mut entries = Vec::new();
        while let Some(entry) = dir.next_entry().await.map_err(|e| e.to_string())? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }
            let is_dir = entry
                .file_type()
                .await
                .map(|t| t.is_dir())
                .unwrap_or(false);
            entries.push(if is_dir { format!("{}/", name) } else { name });
        }
        entries.sort();
        Ok(entries)
    }

    /// 写入（或追加）笔记；父目录不存在时自动创建。返回写入后的文件字节数
    pub async fn write_note(&self, path: &str, content: &str, append: bool) -> Result<u64, String> {
        if path.trim().is_empty() {
            return Err("Path must not be empty".to_string());
        }
        let resolved = self.resolve(path).map_err(|e| e.to_string())?;
        if let Some(parent) = resolved.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| format!("Create dir failed: {}", e))?;
        }
        if append {
            let mut file = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&resolved)
                .await
                .map_err(|e| format!("Open failed: {}", e))?;
            file.write_all(content.as_bytes())
                .await
                .map_err(|e| format!("Write failed: {}", e))?;
        } else {
            fs::write(&resolved, content)
                .await
                .map_err(|e| format!("Write failed: {}", e))?;
        }
        let meta = fs::metadata(&resolved)
            .await
            .map_err(|e| format!("Stat failed: {}", e))?;
        Ok(meta.len())
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ReadNoteParams {
    /// 相对笔记库根目录的路径
    pub path: String,
}

/// 读取笔记内容
pub struct ReadNoteTool {
    vault: NoteVault,
}

impl ReadNoteTool {
    pub fn new(vault: NoteVault) -> Self {
        Self { vault }
    }
}

#[async_trait]
impl TypedTool for ReadNoteTool {
    type Params = ReadNoteParams;

    fn name(&self) -> &str {
        "read_note"
    }

    fn description(&self) -> &str {
        "Read a note. Args: {\"path\": \"note path relative to the vault\"}"
    }

    async fn run(&self, params: ReadNoteParams, _ctx: &ToolContext) -> ToolResult {
        tracing::info!(path = %params.path, "read_note tool execute");
        match self.vault.read_note(&params.path).await {
            Ok(content) => ToolResult::ok(content),
            Err(e) => ToolResult::err(e),
        }
    }
}

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct ListNotesParams {
    /// 目录路径，默认 "."
    #[serde(default)]
    pub path: Option<String>,
}

/// 列出目录下的笔记与子目录（子目录以 `/` 结尾）
pub struct ListNotesTool {
    vault: NoteVault,
}

impl ListNotesTool {
    pub fn new(vault: NoteVault) -> Self {
        Self { vault }
    }
}

#[async_trait]
impl TypedTool for ListNotesTool {
    type Params = ListNotesParams;

    fn name(&self) -> &str {
        "list_notes"
    }

    fn description(&self) -> &str {
        "List notes and folders. Args: {\"path\": \"folder path, default '.'\"}"
    }

    async fn run(&self, params: ListNotesParams, _ctx: &ToolContext) -> ToolResult {
        let path = params.path.unwrap_or_else(|| ".".to_string());
        tracing::info!(path = %path, "list_notes tool execute");
        match self.vault.list(&path).await {
            Ok(entries) => ToolResult::ok(serde_json::json!(entries)),
            Err(e) => ToolResult::err(e),
        }
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct WriteNoteParams {
    pub path: String,
    pub content: String,
    /// 为 true 时追加到末尾，否则覆盖
    #[serde(default)]
    pub append: bool,
}

/// 创建、覆盖或追加笔记
pub struct WriteNoteTool {
    vault: NoteVault,
}

impl WriteNoteTool {
    pub fn new(vault: NoteVault) -> Self {
        Self { vault }
    }
}

#[async_trait]
impl TypedTool for WriteNoteTool {
    type Params = WriteNoteParams;

    fn name(&self) -> &str {
        "write_note"
    }

    fn description(&self) -> &str {
        "Create or overwrite a note, or append to it. Args: {\"path\": \"...\", \"content\": \"...\", \"append\": false}"
    }

    async fn run(&self, params: WriteNoteParams, _ctx: &ToolContext) -> ToolResult {
        tracing::info!(path = %params.path, append = params.append, "write_note tool execute");
        match self
            .vault
            .write_note(&params.path, &params.content, params.append)
            .await
        {
            Ok(bytes) => ToolResult::ok(serde_json::json!({ "path": params.path, "bytes": bytes })),
            Err(e) => ToolResult::err(e),
        }
    }
}
