//! 聊天历史持久化
//!
//! 每个会话一个 JSON 文件，内容为 ChatMessage 数组；每次修改都是整份文档的读-改-写（无追加日志）。
//! update / delete 按值定位：`(timestamp, sender, content)` 三元组精确匹配。
//! 另外每条记录在创建时分配一个稳定的 `id`，供 update_by_id / delete_by_id 使用；
//! 没有 `id` 的旧文档照常加载。
//!
//! 单写者、最后写入者胜出：没有锁，两个并发 update 命中同一条记录时会互相覆盖。

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use uuid::Uuid;

use crate::core::TaskStatus;
use crate::memory::Message;
use crate::tools::ToolExecutionResult;

#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialize error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// 消息发送方
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Assistant,
}

impl Sender {
    pub fn as_str(self) -> &'static str {
        match self {
            Sender::User => "user",
            Sender::Assistant => "assistant",
        }
    }
}

/// 持久化的聊天消息
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    /// ISO 8601 时间戳
    pub timestamp: String,
    pub sender: Sender,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_status: Option<TaskStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_results: Option<Vec<ToolExecutionResult>>,
}

impl ChatMessage {
    pub fn new(sender: Sender, content: impl Into<String>) -> Self {
        Self {
            id: None,
            timestamp: now_timestamp(),
            sender,
            content: content.into(),
            reasoning: None,
            task_status: None,
            tool_results: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Sender::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Sender::Assistant, content)
    }

    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = timestamp.into();
        self
    }

    /// 身份三元组精确匹配
    pub fn matches(&self, timestamp: &str, sender: Sender, content: &str) -> bool {
        self.timestamp == timestamp && self.sender == sender && self.content == content
    }

    pub fn apply_extra(&mut self, extra: MessageExtra) {
        if let Some(reasoning) = extra.reasoning {
            self.reasoning = Some(reasoning);
        }
        if let Some(status) = extra.task_status {
            self.task_status = Some(status);
        }
        if let Some(results) = extra.tool_results {
            self.tool_results = Some(results);
        }
    }

    /// 转为模型上下文消息（只带 role + content）
    pub fn to_message(&self) -> Message {
        match self.sender {
            Sender::User => Message::user(self.content.clone()),
            Sender::Assistant => Message::assistant(self.content.clone()),
        }
    }
}

/// update 时可选替换的附加字段；None 表示保留原值
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MessageExtra {
    pub reasoning: Option<String>,
    pub task_status: Option<TaskStatus>,
    pub tool_results: Option<Vec<ToolExecutionResult>>,
}

/// 当前 UTC 时间，毫秒精度，形如 `2026-10-15T08:30:00.123Z`
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// 聊天历史存储：独占一个 JSON 文档
#[derive(Debug, Clone)]
pub struct ChatHistoryStore {
    path: PathBuf,
}

impl ChatHistoryStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 读取文档；文件不存在返回空列表；内容损坏时记录日志并返回空列表（可能丢数据）
    pub async fn load(&self) -> Vec<ChatMessage> {
        let data = match fs::read_to_string(&self.path).await {
            Ok(d) => d,
            Err(e) if e.kind() == ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                tracing::error!(path = %self.path.display(), error = %e, "Failed to read chat history");
                return Vec::new();
            }
        };
        if data.trim().is_empty() {
            return Vec::new();
        }
        match serde_json::from_str::<Vec<ChatMessage>>(&data) {
            Ok(messages) => messages,
            Err(e) => {
                tracing::error!(
                    path = %self.path.display(),
                    error = %e,
                    "Chat history is corrupt, starting with an empty history"
                );
                Vec::new()
            }
        }
    }

    /// 追加一条消息并写回整份文档；未带 id 时分配新 id，返回实际存入的记录
    pub async fn add(&self, message: ChatMessage) -> Result<ChatMessage, HistoryError> {
        let mut messages = self.load().await;
        let message = ensure_id(message);
        messages.push(message.clone());
        self.save(&messages).await?;
        Ok(message)
    }

    /// 在锚点记录之后插入；锚点不存在时追加到末尾
    pub async fn insert_after(
        &self,
        anchor_timestamp: &str,
        anchor_sender: Sender,
        anchor_content: &str,
        message: ChatMessage,
    ) -> Result<ChatMessage, HistoryError> {
        let mut messages = self.load().await;
        let message = ensure_id(message);
        match messages
            .iter()
            .position(|m| m.matches(anchor_timestamp, anchor_sender, anchor_content))
        {
            Some(idx) => messages.insert(idx + 1, message.clone()),
            None => {
                tracing::debug!("Insert anchor not found, appending");
                messages.push(message.clone());
            }
        }
        self.save(&messages).await?;
        Ok(message)
    }

    /// 按 `(timestamp, sender, old_content)` 定位并替换内容（按值的 compare-and-swap）。
    /// 多条匹配时只更新第一条；无匹配时静默返回 false，不写盘。
    pub async fn update(
        &self,
        timestamp: &str,
        sender: Sender,
        old_content: &str,
        new_content: &str,
        extra: Option<MessageExtra>,
    ) -> Result<bool, HistoryError> {
        let mut messages = self.load().await;
        let Some(target) = messages
            .iter_mut()
            .find(|m| m.matches(timestamp, sender, old_content))
        else {
            tracing::debug!(timestamp, sender = sender.as_str(), "Update target not found");
            return Ok(false);
        };
        target.content = new_content.to_string();
        if let Some(extra) = extra {
            target.apply_extra(extra);
        }
        self.save(&messages).await?;
        Ok(true)
    }

    /// 删除第一条精确匹配；不存在时为 no-op
    pub async fn delete(
        &self,
        timestamp: &str,
        sender: Sender,
        content: &str,
    ) -> Result<bool, HistoryError> {
        let mut messages = self.load().await;
        let Some(idx) = messages
            .iter()
            .position(|m| m.matches(timestamp, sender, content))
        else {
            return Ok(false);
        };
        messages.remove(idx);
        self.save(&messages).await?;
        Ok(true)
    }

    pub async fn update_by_id(
        &self,
        id: Uuid,
        new_content: &str,
        extra: Option<MessageExtra>,
    ) -> Result<bool, HistoryError> {
        let mut messages = self.load().await;
        let Some(target) = messages.iter_mut().find(|m| m.id == Some(id)) else {
            return Ok(false);
        };
        target.content = new_content.to_string();
        if let Some(extra) = extra {
            target.apply_extra(extra);
        }
        self.save(&messages).await?;
        Ok(true)
    }

    pub async fn delete_by_id(&self, id: Uuid) -> Result<bool, HistoryError> {
        let mut messages = self.load().await;
        let before = messages.len();
        messages.retain(|m| m.id != Some(id));
        if messages.len() == before {
            return Ok(false);
        }
        self.save(&messages).await?;
        Ok(true)
    }

    /// 用空数组替换整份文档
    pub async fn clear(&self) -> Result<(), HistoryError> {
        self.save(&[]).await
    }

    async fn save(&self, messages: &[ChatMessage]) -> Result<(), HistoryError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        let data = serde_json::to_string_pretty(messages)?;
        fs::write(&self.path, data).await?;
        Ok(())
    }
}

fn ensure_id(mut message: ChatMessage) -> ChatMessage {
    if message.id.is_none() {
        message.id = Some(Uuid::new_v4());
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TaskState;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> ChatHistoryStore {
        ChatHistoryStore::new(dir.path().join("chats").join("note-1.json"))
    }

    #[tokio::test]
    async fn test_load_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        assert!(store.load().await.is_empty());
    }

    #[tokio::test]
    async fn test_add_then_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let first = ChatMessage::user("What is in my inbox note?").with_timestamp("2026-01-01T00:00:00.000Z");
        let second = ChatMessage::assistant("Three open todos.").with_timestamp("2026-01-01T00:00:01.000Z");
        let third = ChatMessage::user("Thanks").with_timestamp("2026-01-01T00:00:02.000Z");

        store.add(first.clone()).await.unwrap();
        store.add(second.clone()).await.unwrap();
        store.add(third.clone()).await.unwrap();

        let loaded = store.load().await;
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded[0].content, first.content);
        assert_eq!(loaded[1].content, second.content);
        assert_eq!(loaded[2].content, third.content);
        assert!(loaded.iter().all(|m| m.id.is_some()));
    }

    #[tokio::test]
    async fn test_corrupt_document_loads_as_empty() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        fs::create_dir_all(store.path().parent().unwrap()).await.unwrap();
        fs::write(store.path(), "[{not json").await.unwrap();
        assert!(store.load().await.is_empty());
    }

    #[tokio::test]
    async fn test_document_without_ids_still_loads() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        fs::create_dir_all(store.path().parent().unwrap()).await.unwrap();
        fs::write(
            store.path(),
            r#"[{"timestamp":"2026-01-01T00:00:00.000Z","sender":"user","content":"hi"}]"#,
        )
        .await
        .unwrap();
        let loaded = store.load().await;
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, None);
        assert_eq!(loaded[0].sender, Sender::User);
    }

    #[tokio::test]
    async fn test_update_replaces_content_in_place() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let ts = "2026-01-01T00:00:01.000Z";
        store.add(ChatMessage::user("q").with_timestamp("2026-01-01T00:00:00.000Z")).await.unwrap();
        store.add(ChatMessage::assistant("old answer").with_timestamp(ts)).await.unwrap();
        store.add(ChatMessage::user("follow-up").with_timestamp("2026-01-01T00:00:02.000Z")).await.unwrap();

        let mut status = TaskStatus::new(5);
        status.transition(TaskState::Running).unwrap();
        status.transition(TaskState::Completed).unwrap();
        let updated = store
            .update(
                ts,
                Sender::Assistant,
                "old answer",
                "new answer",
                Some(MessageExtra {
                    reasoning: Some("thought harder".to_string()),
                    task_status: Some(status.clone()),
                    tool_results: None,
                }),
            )
            .await
            .unwrap();
        assert!(updated);

        let loaded = store.load().await;
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded[1].content, "new answer");
        assert_eq!(loaded[1].timestamp, ts);
        assert_eq!(loaded[1].reasoning.as_deref(), Some("thought harder"));
        assert_eq!(loaded[1].task_status, Some(status));
        assert_eq!(loaded[2].content, "follow-up");
    }

    #[tokio::test]
    async fn test_update_without_match_is_noop() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let ts = "2026-01-01T00:00:01.000Z";
        store.add(ChatMessage::assistant("answer").with_timestamp(ts)).await.unwrap();

        // 内容不匹配（旧值已被别人改过）
        assert!(!store.update(ts, Sender::Assistant, "stale", "new", None).await.unwrap());
        // 发送方不匹配
        assert!(!store.update(ts, Sender::User, "answer", "new", None).await.unwrap());

        let loaded = store.load().await;
        assert_eq!(loaded[0].content, "answer");
    }

    #[tokio::test]
    async fn test_delete_removes_first_exact_match() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let ts = "2026-01-01T00:00:00.000Z";
        store.add(ChatMessage::user("dup").with_timestamp(ts)).await.unwrap();
        store.add(ChatMessage::user("dup").with_timestamp(ts)).await.unwrap();
        store.add(ChatMessage::user("keep").with_timestamp(ts)).await.unwrap();

        assert!(store.delete(ts, Sender::User, "dup").await.unwrap());
        let loaded = store.load().await;
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].content, "dup");
        assert_eq!(loaded[1].content, "keep");

        assert!(!store.delete(ts, Sender::Assistant, "keep").await.unwrap());
        assert_eq!(store.load().await.len(), 2);
    }

    #[tokio::test]
    async fn test_insert_after_anchor() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let q1 = ChatMessage::user("q1").with_timestamp("2026-01-01T00:00:00.000Z");
        let q2 = ChatMessage::user("q2").with_timestamp("2026-01-01T00:00:05.000Z");
        store.add(q1.clone()).await.unwrap();
        store.add(q2.clone()).await.unwrap();

        store
            .insert_after(&q1.timestamp, Sender::User, "q1", ChatMessage::assistant("a1"))
            .await
            .unwrap();
        let contents: Vec<String> = store.load().await.into_iter().map(|m| m.content).collect();
        assert_eq!(contents, vec!["q1", "a1", "q2"]);

        store
            .insert_after("missing", Sender::User, "gone", ChatMessage::assistant("tail"))
            .await
            .unwrap();
        let loaded = store.load().await;
        assert_eq!(loaded.last().unwrap().content, "tail");
    }

    #[tokio::test]
    async fn test_surrogate_id_operations() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let stored = store.add(ChatMessage::assistant("v1")).await.unwrap();
        let id = stored.id.unwrap();

        assert!(store.update_by_id(id, "v2", None).await.unwrap());
        assert_eq!(store.load().await[0].content, "v2");

        assert!(store.delete_by_id(id).await.unwrap());
        assert!(!store.delete_by_id(id).await.unwrap());
        assert!(store.load().await.is_empty());
    }

    #[tokio::test]
    async fn test_clear_writes_empty_document() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.add(ChatMessage::user("hi")).await.unwrap();
        store.clear().await.unwrap();
        assert!(store.load().await.is_empty());
        let raw = fs::read_to_string(store.path()).await.unwrap();
        assert_eq!(raw.trim(), "[]");
    }

    #[test]
    fn test_persisted_shape_uses_camel_case() {
        let mut msg = ChatMessage::assistant("done").with_timestamp("2026-01-01T00:00:00.000Z");
        msg.task_status = Some(TaskStatus::new(5));
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["sender"], "assistant");
        assert_eq!(json["taskStatus"]["status"], "idle");
        assert!(json.get("toolResults").is_none());
        assert!(json.get("id").is_none());
    }
}
