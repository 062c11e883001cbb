//! Agent 主循环
//!
//! 调用模型 -> 解析工具调用 -> 逐个分发并把结果写回上下文 -> 再次调用模型，直到：
//! 模型不再请求工具（Completed）、预算或轮数用尽（LimitReached）、工具要求等待用户（WaitingForUser）、
//! 或取消信号被触发（Stopped）。
//!
//! 取消只在检查点生效：每轮模型调用前、每个工具调用前，以及模型调用进行中（select 取消信号）。
//! 正在执行的工具不会被抢占，副作用也不会回滚。

use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::config::AgentModeSettings;
use crate::core::{AgentError, TaskState, TaskStatus};
use crate::llm::{Completion, CompletionOptions, LlmClient, LlmError, StreamChunk};
use crate::memory::{ChatMessage, Message, MessageExtra};
use crate::react::{parse_commands, AgentEvent};
use crate::tools::{tools_prompt_section, ToolCommand, ToolContext, ToolExecutionResult, ToolRegistry};

/// 工具结果事件中的预览长度
const TOOL_PREVIEW_CHARS: usize = 200;

/// 恢复轮次时没有用户追加内容，用这条消息让模型继续
const CONTINUE_PROMPT: &str = "Continue.";

/// 一轮对话的输入：system prompt、可选参考资料、历史与本次用户输入
#[derive(Debug, Clone, Default)]
pub struct TurnRequest {
    pub system_prompt: String,
    /// 当前笔记等参考资料，作为单独的 system 消息放在历史之前
    pub reference: Option<String>,
    pub history: Vec<Message>,
    pub user_input: String,
}

impl TurnRequest {
    pub fn new(user_input: impl Into<String>) -> Self {
        Self {
            user_input: user_input.into(),
            ..Default::default()
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_reference(mut self, reference: Option<String>) -> Self {
        self.reference = reference;
        self
    }

    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }

    /// 组装首轮上下文：system（+ 工具说明）、参考资料、历史、用户输入
    pub fn build_context(&self, tools_section: &str) -> Vec<Message> {
        let mut system = self.system_prompt.trim().to_string();
        if !tools_section.is_empty() {
            if !system.is_empty() {
                system.push_str("\n\n");
            }
            system.push_str(tools_section);
        }

        let mut context = Vec::with_capacity(self.history.len() + 3);
        if !system.is_empty() {
            context.push(Message::system(system));
        }
        if let Some(reference) = self.reference.as_deref().filter(|r| !r.trim().is_empty()) {
            context.push(Message::system(format!(
                "Reference material:\n\n{}",
                reference.trim()
            )));
        }
        context.extend(self.history.iter().cloned());
        context.push(Message::user(self.user_input.clone()));
        context
    }
}

/// 一轮的结果
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    /// 各轮模型回复去掉工具块后的正文，以空行连接；Stopped 时为空
    pub content: String,
    pub reasoning: Option<String>,
    pub task_status: TaskStatus,
    /// 本轮已执行的工具调用（Stopped 时同样保留，副作用已发生）
    pub tool_results: Vec<ToolExecutionResult>,
    /// 循环结束时的完整上下文，用于恢复
    pub context: Vec<Message>,
    /// 实际发起的模型调用次数
    pub iterations: usize,
}

impl TurnOutcome {
    pub fn status(&self) -> TaskState {
        self.task_status.status
    }

    pub fn is_stopped(&self) -> bool {
        self.status() == TaskState::Stopped
    }

    /// Stopped 的轮次不写入持久化历史
    pub fn should_persist(&self) -> bool {
        !self.is_stopped()
    }

    /// 只有因预算/轮数或等待用户而结束的轮次可以恢复
    pub fn can_resume(&self) -> bool {
        matches!(
            self.status(),
            TaskState::LimitReached | TaskState::WaitingForUser
        )
    }

    pub fn extra(&self) -> MessageExtra {
        MessageExtra {
            reasoning: self.reasoning.clone(),
            task_status: Some(self.task_status.clone()),
            tool_results: Some(self.tool_results.clone()),
        }
    }

    /// 转换为待持久化的 assistant 消息
    pub fn to_chat_message(&self) -> ChatMessage {
        let mut msg = ChatMessage::assistant(self.content.clone());
        msg.apply_extra(self.extra());
        msg
    }
}

/// 一轮循环所需的依赖
pub struct AgentSession<'a> {
    pub llm: &'a dyn LlmClient,
    pub registry: &'a ToolRegistry,
    /// 轮次开始时的快照，循环运行期间不会变化
    pub settings: AgentModeSettings,
    pub options: CompletionOptions,
    pub cancel_token: CancellationToken,
    pub event_tx: Option<&'a UnboundedSender<AgentEvent>>,
}

impl<'a> AgentSession<'a> {
    pub fn new(
        llm: &'a dyn LlmClient,
        registry: &'a ToolRegistry,
        settings: AgentModeSettings,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            llm,
            registry,
            settings,
            options: CompletionOptions::default(),
            cancel_token,
            event_tx: None,
        }
    }

    /// 采样参数；其中的 cancel_token 会被本轮的取消信号替换
    pub fn with_options(mut self, options: CompletionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_event_tx(mut self, tx: &'a UnboundedSender<AgentEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }
}

/// 执行一轮对话
pub async fn run_turn(
    session: &AgentSession<'_>,
    request: &TurnRequest,
) -> Result<TurnOutcome, AgentError> {
    let tools_section = if session.settings.enabled {
        tools_prompt_section(session.registry)
    } else {
        String::new()
    };
    let context = request.build_context(&tools_section);
    tracing::info!(
        agent_mode = session.settings.enabled,
        max_tool_calls = session.settings.max_tool_calls,
        max_iterations = session.settings.max_iterations,
        history_len = request.history.len(),
        "Agent turn started"
    );
    TurnRunner::new(session, context).run().await
}

/// 从上一轮（LimitReached / WaitingForUser）的上下文继续，预算重新计算
pub async fn resume_turn(
    session: &AgentSession<'_>,
    previous: &TurnOutcome,
    follow_up: Option<&str>,
) -> Result<TurnOutcome, AgentError> {
    if !previous.can_resume() {
        return Err(AgentError::NothingToResume);
    }
    let mut context = previous.context.clone();
    let follow_up = follow_up.map(str::trim).filter(|s| !s.is_empty());
    context.push(Message::user(follow_up.unwrap_or(CONTINUE_PROMPT)));
    tracing::info!(
        previous_status = previous.status().as_str(),
        with_follow_up = follow_up.is_some(),
        "Agent turn resumed"
    );
    TurnRunner::new(session, context).run().await
}

/// 单轮循环的可变状态
struct TurnRunner<'s, 'a> {
    session: &'s AgentSession<'a>,
    context: Vec<Message>,
    status: TaskStatus,
    tool_results: Vec<ToolExecutionResult>,
    prose: Vec<String>,
    reasoning: Vec<String>,
    iterations: usize,
}

impl<'s, 'a> TurnRunner<'s, 'a> {
    fn new(session: &'s AgentSession<'a>, context: Vec<Message>) -> Self {
        Self {
            session,
            context,
            status: TaskStatus::new(session.settings.max_tool_calls),
            tool_results: Vec::new(),
            prose: Vec::new(),
            reasoning: Vec::new(),
            iterations: 0,
        }
    }

    async fn run(mut self) -> Result<TurnOutcome, AgentError> {
        let settings = self.session.settings;
        self.status.transition(TaskState::Running)?;
        self.emit(AgentEvent::StatusChanged {
            status: self.status.clone(),
        });

        loop {
            if self.cancelled() {
                return self.finish(TaskState::Stopped);
            }
            if self.iterations >= settings.max_iterations {
                tracing::warn!(
                    iterations = self.iterations,
                    "Iteration limit reached before the model finished"
                );
                return self.finish(TaskState::LimitReached);
            }
            self.iterations += 1;
            self.emit(AgentEvent::Thinking {
                iteration: self.iterations,
                max_iterations: settings.max_iterations,
            });

            let completion = match self.call_model().await {
                Ok(c) => c,
                Err(e) if e.is_cancellation() => return self.finish(TaskState::Stopped),
                Err(e) => {
                    tracing::warn!(error = %e, iteration = self.iterations, "Model call failed");
                    self.emit(AgentEvent::Error {
                        text: e.to_string(),
                    });
                    return Err(e.into());
                }
            };
            if let Some(reasoning) = completion.reasoning.as_deref().map(str::trim) {
                if !reasoning.is_empty() {
                    self.reasoning.push(reasoning.to_string());
                }
            }

            if !settings.enabled {
                self.push_prose(completion.content.trim());
                self.context.push(Message::assistant(completion.content));
                return self.finish(TaskState::Completed);
            }

            let parsed = parse_commands(&completion.content);
            self.push_prose(&parsed.cleaned_text());
            self.context.push(Message::assistant(completion.content));

            let commands = parsed.commands();
            if commands.is_empty() {
                return self.finish(TaskState::Completed);
            }
            tracing::debug!(count = commands.len(), "Model requested tool calls");

            for command in commands {
                if self.cancelled() {
                    return self.finish(TaskState::Stopped);
                }
                if self.status.budget_exhausted() {
                    tracing::warn!(
                        max_tool_calls = self.status.max_tool_executions,
                        skipped_action = %command.action,
                        "Tool budget exhausted"
                    );
                    return self.finish(TaskState::LimitReached);
                }
                if self.dispatch(command).await {
                    return self.finish(TaskState::WaitingForUser);
                }
            }
        }
    }

    fn cancelled(&self) -> bool {
        self.session.cancel_token.is_cancelled()
    }

    fn emit(&self, ev: AgentEvent) {
        if let Some(tx) = self.session.event_tx {
            let _ = tx.send(ev);
        }
    }

    fn push_prose(&mut self, text: &str) {
        if !text.is_empty() {
            self.prose.push(text.to_string());
        }
    }

    /// 单次模型调用：与取消信号竞争，超时可选（timeout_ms 为 0 时不限）
    async fn call_model(&self) -> Result<Completion, LlmError> {
        let timeout_ms = self.session.settings.timeout_ms;
        let cancel = self.session.cancel_token.clone();
        let request = self.collect_completion();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(LlmError::Cancelled),
            result = async {
                if timeout_ms == 0 {
                    return request.await;
                }
                match tokio::time::timeout(Duration::from_millis(timeout_ms), request).await {
                    Ok(r) => r,
                    Err(_) => Err(LlmError::Timeout(timeout_ms)),
                }
            } => result,
        }
    }

    /// 读取流式输出并汇总为 Completion；每个片段转发为事件
    async fn collect_completion(&self) -> Result<Completion, LlmError> {
        let mut options = self.session.options.clone();
        options.cancel_token = self.session.cancel_token.clone();
        let mut stream = self
            .session
            .llm
            .complete_stream(&self.context, &options)
            .await?;

        let mut content = String::new();
        let mut reasoning = String::new();
        while let Some(chunk) = stream.next().await {
            match chunk? {
                StreamChunk::Content(text) => {
                    content.push_str(&text);
                    self.emit(AgentEvent::ContentChunk { text });
                }
                StreamChunk::Reasoning(text) => {
                    reasoning.push_str(&text);
                    self.emit(AgentEvent::ReasoningChunk { text });
                }
            }
        }
        Ok(Completion {
            content,
            reasoning: (!reasoning.is_empty()).then_some(reasoning),
        })
    }

    /// 分发一个工具调用并记账；返回本轮是否应暂停等待用户
    async fn dispatch(&mut self, command: ToolCommand) -> bool {
        let registry = self.session.registry;
        let params = command.parameters_value();
        self.emit(AgentEvent::ToolCall {
            action: command.action.clone(),
            parameters: params.clone(),
        });

        let ctx = ToolContext {
            iteration: self.iterations,
            tool_execution_count: self.status.tool_execution_count,
            cancel_token: self.session.cancel_token.clone(),
        };
        let result = registry.dispatch(&command.action, &params, &ctx).await;
        self.status.record_tool_execution();

        self.emit(AgentEvent::ToolResult {
            action: command.action.clone(),
            success: result.success,
            preview: result.preview(TOOL_PREVIEW_CHARS),
        });
        let pauses = result.success && registry.pauses_turn(&command.action);
        let execution = ToolExecutionResult { command, result };
        self.context.push(Message::tool_result(&execution));
        self.tool_results.push(execution);
        pauses
    }

    fn finish(mut self, state: TaskState) -> Result<TurnOutcome, AgentError> {
        self.status.transition(state)?;
        self.emit(AgentEvent::StatusChanged {
            status: self.status.clone(),
        });
        self.emit(AgentEvent::Done {
            status: self.status.clone(),
        });
        tracing::info!(
            status = state.as_str(),
            iterations = self.iterations,
            tool_calls = self.status.tool_execution_count,
            "Agent turn finished"
        );

        let stopped = state == TaskState::Stopped;
        let (content, reasoning) = if stopped {
            (String::new(), None)
        } else {
            let reasoning = if self.reasoning.is_empty() {
                None
            } else {
                Some(self.reasoning.join("\n\n"))
            };
            (self.prose.join("\n\n"), reasoning)
        };
        Ok(TurnOutcome {
            content,
            reasoning,
            task_status: self.status,
            tool_results: self.tool_results,
            context: self.context,
            iterations: self.iterations,
        })
    }
}
