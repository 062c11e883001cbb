//! 聊天会话
//!
//! ChatSession 持有界面可见的轮次列表、历史存储、会话监管与 Agent 组件，
//! 把一轮的结果与持久化历史对齐：完成的轮次写入（user + assistant），被停止或失败的轮次从列表中撤回。
//! 所有方法都接受 &self，可放进 Arc 由多个任务共享；同一时刻只允许一个轮次运行。

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::config::{AgentModeSettings, AppConfig};
use crate::core::{AgentError, SessionSupervisor};
use crate::llm::{CompletionOptions, LlmClient};
use crate::memory::{ChatHistoryStore, ChatMessage, Message};
use crate::react::{
    export_message, plan_regeneration, resume_turn, run_turn, AgentEvent, AgentSession,
    RegenerationTarget, TurnOutcome, TurnRequest,
};
use crate::tools::{builtin_registry, NoteVault, ToolRegistry};

/// 未配置 system prompt 文件时使用
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are Scribe, an assistant inside a note-taking app. \
Answer concisely in Markdown. Use the available tools to read, list and write notes when the \
question is about the user's vault; do not invent note contents.";

/// 会话依赖：模型、工具、prompt 与每轮使用的设置
#[derive(Clone)]
pub struct ChatComponents {
    pub llm: Arc<dyn LlmClient>,
    pub registry: ToolRegistry,
    pub system_prompt: String,
    pub settings: AgentModeSettings,
    pub options: CompletionOptions,
}

impl ChatComponents {
    pub fn new(llm: Arc<dyn LlmClient>, registry: ToolRegistry) -> Self {
        Self {
            llm,
            registry,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            settings: AgentModeSettings::default(),
            options: CompletionOptions::default(),
        }
    }

    /// 按配置构建：笔记库工具、Agent 设置、采样参数、可选的 system prompt 文件
    pub fn from_config(cfg: &AppConfig, llm: Arc<dyn LlmClient>) -> Self {
        let vault = NoteVault::new(cfg.app.workspace_root());
        let system_prompt = cfg
            .app
            .system_prompt_path
            .as_ref()
            .and_then(|p| std::fs::read_to_string(p).ok())
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());
        let options = CompletionOptions {
            temperature: cfg.llm.temperature,
            max_tokens: cfg.llm.max_tokens,
            ..Default::default()
        };
        Self {
            llm,
            registry: builtin_registry(vault),
            system_prompt,
            settings: cfg.agent,
            options,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_settings(mut self, settings: AgentModeSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_options(mut self, options: CompletionOptions) -> Self {
        self.options = options;
        self
    }
}

/// 一个对话视图
pub struct ChatSession {
    components: ChatComponents,
    store: ChatHistoryStore,
    supervisor: SessionSupervisor,
    turns: Mutex<Vec<ChatMessage>>,
    reference: Mutex<Option<String>>,
    last_outcome: Mutex<Option<TurnOutcome>>,
    event_tx: Option<UnboundedSender<AgentEvent>>,
}

impl ChatSession {
    /// 打开会话并载入已持久化的历史
    pub async fn open(store: ChatHistoryStore, components: ChatComponents) -> Self {
        let turns = store.load().await;
        tracing::info!(
            path = %store.path().display(),
            turns = turns.len(),
            "Chat session opened"
        );
        Self {
            components,
            store,
            supervisor: SessionSupervisor::new(),
            turns: Mutex::new(turns),
            reference: Mutex::new(None),
            last_outcome: Mutex::new(None),
            event_tx: None,
        }
    }

    /// 订阅过程事件
    pub fn with_events(mut self, tx: UnboundedSender<AgentEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// 界面可见轮次的快照
    pub fn turns(&self) -> Vec<ChatMessage> {
        self.lock_turns().clone()
    }

    /// 共享的会话监管，UI 可用它 cancel 当前轮
    pub fn supervisor(&self) -> SessionSupervisor {
        self.supervisor.clone()
    }

    pub fn store(&self) -> &ChatHistoryStore {
        &self.store
    }

    pub fn last_outcome(&self) -> Option<TurnOutcome> {
        lock(&self.last_outcome).clone()
    }

    /// 设置随每轮发送的参考资料（如当前打开的笔记）
    pub fn set_reference(&self, reference: Option<String>) {
        *lock(&self.reference) = reference;
    }

    /// 停止当前轮；没有运行中的轮次时无效果
    pub fn cancel(&self) {
        self.supervisor.cancel();
    }

    /// 发送一条用户消息并跑完一轮
    pub async fn send(&self, text: &str) -> Result<TurnOutcome, AgentError> {
        let guard = self.supervisor.begin_turn()?;
        let history = self.history_messages();
        let user = ChatMessage::user(text);
        self.lock_turns().push(user.clone());

        let request = TurnRequest::new(text)
            .with_system_prompt(self.components.system_prompt.clone())
            .with_reference(lock(&self.reference).clone())
            .with_history(history);
        let session = self.agent_session(guard.token());
        let outcome = match run_turn(&session, &request).await {
            Ok(o) => o,
            Err(e) => {
                self.withdraw(&user);
                return Err(e);
            }
        };
        self.finish_turn(Some(user), outcome).await
    }

    /// 继续上一轮（LimitReached / WaitingForUser），可附带用户的补充或回答
    pub async fn continue_turn(&self, follow_up: Option<&str>) -> Result<TurnOutcome, AgentError> {
        let previous = self.last_outcome().ok_or(AgentError::NothingToResume)?;
        if !previous.can_resume() {
            return Err(AgentError::NothingToResume);
        }
        let guard = self.supervisor.begin_turn()?;
        let user = follow_up
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ChatMessage::user);
        if let Some(u) = &user {
            self.lock_turns().push(u.clone());
        }

        let session = self.agent_session(guard.token());
        let follow_up_text = user.as_ref().map(|u| u.content.as_str());
        let outcome = match resume_turn(&session, &previous, follow_up_text).await {
            Ok(o) => o,
            Err(e) => {
                if let Some(u) = &user {
                    self.withdraw(u);
                }
                return Err(e);
            }
        };
        self.finish_turn(user, outcome).await
    }

    /// 重新生成第 index 个轮次（assistant 覆盖自身，user 覆盖或插入其后的回复）
    pub async fn regenerate(&self, index: usize) -> Result<TurnOutcome, AgentError> {
        let guard = self.supervisor.begin_turn()?;
        let plan = {
            let mut turns = self.lock_turns();
            let plan = plan_regeneration(&turns, index)?;
            plan.begin(&mut turns);
            plan
        };
        tracing::info!(
            clicked = index,
            target = plan.target.index(),
            insert = plan.target.is_insert(),
            "Regenerating turn"
        );

        let request = plan.request(
            &self.components.system_prompt,
            lock(&self.reference).clone(),
        );
        let session = self.agent_session(guard.token());
        let outcome = match run_turn(&session, &request).await {
            Ok(o) => o,
            Err(e) => {
                plan.abort(&mut self.lock_turns());
                return Err(e);
            }
        };
        if !outcome.should_persist() {
            plan.abort(&mut self.lock_turns());
            return Ok(outcome);
        }

        // 先写盘，成功后再更新 UI 列表
        let replacement = plan.replacement(&outcome);
        let persisted = match &plan.target {
            RegenerationTarget::Overwrite { original, .. } => {
                let updated = self
                    .store
                    .update(
                        &original.timestamp,
                        original.sender,
                        &original.content,
                        &replacement.content,
                        Some(outcome.extra()),
                    )
                    .await;
                if let Ok(false) = updated {
                    tracing::warn!(
                        timestamp = %original.timestamp,
                        "Regenerated turn not found in history, it was not persisted"
                    );
                }
                updated.map(|_| replacement)
            }
            RegenerationTarget::Insert { .. } => match plan.user_turn() {
                Some(anchor) => {
                    self.store
                        .insert_after(&anchor.timestamp, anchor.sender, &anchor.content, replacement)
                        .await
                }
                None => self.store.add(replacement).await,
            },
        };
        let stored = match persisted {
            Ok(m) => m,
            Err(e) => {
                plan.abort(&mut self.lock_turns());
                return Err(e.into());
            }
        };

        let at_tail = {
            let mut turns = self.lock_turns();
            plan.commit(&mut turns, stored);
            plan.target.index() + 1 == turns.len()
        };
        // 只有落在对话末尾的轮次可以继续；否则续写会被追加到错误的位置
        *lock(&self.last_outcome) = if at_tail { Some(outcome.clone()) } else { None };
        Ok(outcome)
    }

    /// 编辑某条消息的内容；返回历史中是否找到对应记录
    pub async fn edit(&self, index: usize, new_content: &str) -> Result<bool, AgentError> {
        self.ensure_idle()?;
        let original = self.turn_at(index)?;
        let updated = self
            .store
            .update(
                &original.timestamp,
                original.sender,
                &original.content,
                new_content,
                None,
            )
            .await?;
        if !updated {
            tracing::warn!(
                index,
                timestamp = %original.timestamp,
                "Edited turn not found in history, left unchanged"
            );
            return Ok(false);
        }
        let mut turns = self.lock_turns();
        if let Some(turn) = turns.get_mut(index) {
            turn.content = new_content.to_string();
        }
        self.forget_resumable_if_tail(index, turns.len());
        Ok(true)
    }

    /// 删除某条消息
    pub async fn delete(&self, index: usize) -> Result<bool, AgentError> {
        self.ensure_idle()?;
        let original = self.turn_at(index)?;
        let deleted = self
            .store
            .delete(&original.timestamp, original.sender, &original.content)
            .await?;
        let mut turns = self.lock_turns();
        let len = turns.len();
        if index < len {
            turns.remove(index);
        }
        self.forget_resumable_if_tail(index, len);
        Ok(deleted)
    }

    pub async fn clear(&self) -> Result<(), AgentError> {
        self.ensure_idle()?;
        self.store.clear().await?;
        self.lock_turns().clear();
        *lock(&self.last_outcome) = None;
        Ok(())
    }

    /// 从磁盘重新载入历史
    pub async fn reload(&self) -> Result<usize, AgentError> {
        self.ensure_idle()?;
        let turns = self.store.load().await;
        let count = turns.len();
        *self.lock_turns() = turns;
        Ok(count)
    }

    /// 导出某条消息（正文 + 元数据块）
    pub fn export(&self, index: usize) -> Result<String, AgentError> {
        Ok(export_message(&self.turn_at(index)?))
    }

    /// 持久化完成的轮次；Stopped 时撤回本轮的 user 消息且不写盘
    async fn finish_turn(
        &self,
        user: Option<ChatMessage>,
        outcome: TurnOutcome,
    ) -> Result<TurnOutcome, AgentError> {
        *lock(&self.last_outcome) = Some(outcome.clone());
        if !outcome.should_persist() {
            if let Some(u) = &user {
                self.withdraw(u);
            }
            tracing::info!("Turn stopped, nothing persisted");
            return Ok(outcome);
        }

        if let Some(u) = user {
            let stored = self.store.add(u.clone()).await?;
            self.replace_turn(&u, stored);
        }
        let assistant = self.store.add(outcome.to_chat_message()).await?;
        self.lock_turns().push(assistant);
        Ok(outcome)
    }

    fn agent_session(&self, token: CancellationToken) -> AgentSession<'_> {
        let session = AgentSession::new(
            self.components.llm.as_ref(),
            &self.components.registry,
            self.components.settings,
            token,
        )
        .with_options(self.components.options.clone());
        match &self.event_tx {
            Some(tx) => session.with_event_tx(tx),
            None => session,
        }
    }

    /// 可继续的轮次总是对话的最后一条；它被编辑或删除后不再可继续
    fn forget_resumable_if_tail(&self, index: usize, len: usize) {
        if index + 1 == len {
            *lock(&self.last_outcome) = None;
        }
    }

    fn history_messages(&self) -> Vec<Message> {
        self.lock_turns().iter().map(ChatMessage::to_message).collect()
    }

    fn turn_at(&self, index: usize) -> Result<ChatMessage, AgentError> {
        self.lock_turns()
            .get(index)
            .cloned()
            .ok_or(AgentError::MessageIndex(index))
    }

    fn ensure_idle(&self) -> Result<(), AgentError> {
        if self.supervisor.is_running() {
            return Err(AgentError::Busy);
        }
        Ok(())
    }

    /// 从界面列表撤回一条（最后一次出现的）消息
    fn withdraw(&self, msg: &ChatMessage) {
        let mut turns = self.lock_turns();
        if let Some(idx) = turns.iter().rposition(|t| t == msg) {
            turns.remove(idx);
        }
    }

    fn replace_turn(&self, old: &ChatMessage, new: ChatMessage) {
        let mut turns = self.lock_turns();
        if let Some(slot) = turns.iter_mut().rev().find(|t| **t == *old) {
            *slot = new;
        }
    }

    fn lock_turns(&self) -> MutexGuard<'_, Vec<ChatMessage>> {
        lock(&self.turns)
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    use crate::llm::ScriptedLlmClient;
    use crate::memory::Sender;

    async fn session_with(replies: &[&str], dir: &TempDir) -> ChatSession {
        let llm = Arc::new(ScriptedLlmClient::replies(replies.iter().copied()));
        let components = ChatComponents::new(llm, ToolRegistry::new());
        let store = ChatHistoryStore::new(dir.path().join("history.json"));
        ChatSession::open(store, components).await
    }

    #[tokio::test]
    async fn test_send_persists_both_turns() {
        let dir = TempDir::new().unwrap();
        let session = session_with(&["Hello there."], &dir).await;

        let outcome = session.send("hi").await.unwrap();
        assert_eq!(outcome.content, "Hello there.");

        let turns = session.turns();
        assert_eq!(turns.len(), 2);
        assert!(turns.iter().all(|t| t.id.is_some()));
        assert_eq!(session.store().load().await, turns);
    }

    #[tokio::test]
    async fn test_failed_send_withdraws_user_turn() {
        let dir = TempDir::new().unwrap();
        let session = session_with(&[], &dir).await;

        assert!(session.send("hi").await.is_err());
        assert!(session.turns().is_empty());
        assert!(session.store().load().await.is_empty());
    }

    #[tokio::test]
    async fn test_edit_delete_export() {
        let dir = TempDir::new().unwrap();
        let session = session_with(&["First answer."], &dir).await;
        session.send("question").await.unwrap();

        assert!(session.edit(0, "better question").await.unwrap());
        let stored = session.store().load().await;
        assert_eq!(stored[0].content, "better question");

        let exported = session.export(1).unwrap();
        assert!(exported.starts_with("First answer."));
        assert!(exported.contains("```scribe-meta"));

        assert!(session.delete(1).await.unwrap());
        let stored = session.store().load().await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].sender, Sender::User);
        assert!(matches!(session.export(5), Err(AgentError::MessageIndex(5))));

        session.clear().await.unwrap();
        assert!(session.turns().is_empty());
        assert_eq!(session.reload().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_edit_of_missing_record_leaves_list_unchanged() {
        let dir = TempDir::new().unwrap();
        let session = session_with(&["First answer."], &dir).await;
        session.send("question").await.unwrap();
        let before = session.turns();

        // 历史在会话之外被清空
        session.store().clear().await.unwrap();
        assert!(!session.edit(0, "better question").await.unwrap());
        assert_eq!(session.turns(), before);
        assert!(session.store().load().await.is_empty());
    }

    #[tokio::test]
    async fn test_regeneration_write_failure_restores_list() {
        let dir = TempDir::new().unwrap();
        let history_dir = dir.path().join("history");
        let llm = Arc::new(ScriptedLlmClient::replies(["a1", "a1 again"]));
        let components = ChatComponents::new(llm, ToolRegistry::new());
        let store = ChatHistoryStore::new(history_dir.join("history.json"));
        let session = ChatSession::open(store, components).await;
        session.send("q1").await.unwrap();
        session.delete(1).await.unwrap();
        let before = session.turns();

        // 历史目录被一个普通文件占据，写盘必然失败
        tokio::fs::remove_dir_all(&history_dir).await.unwrap();
        tokio::fs::write(&history_dir, "not a directory").await.unwrap();

        let result = session.regenerate(0).await;
        assert!(matches!(result, Err(AgentError::History(_))));
        assert_eq!(session.turns(), before);
        assert!(session.last_outcome().map_or(true, |o| !o.can_resume()));
    }
}
