//! 对话类工具：thought（记录思考，无副作用）与 ask_user（向用户提问并暂停本轮）

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;

use crate::tools::{ToolContext, ToolResult, TypedTool};

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ThoughtParams {
    /// 推理过程的一步
    pub thought: String,
}

/// Thought 工具：把模型的中间思考写入日志，返回确认
pub struct ThoughtTool;

#[async_trait]
impl TypedTool for ThoughtTool {
    type Params = ThoughtParams;

    fn name(&self) -> &str {
        "thought"
    }

    fn description(&self) -> &str {
        "Record a reasoning step before acting. Args: {\"thought\": \"text\"}"
    }

    async fn run(&self, params: ThoughtParams, ctx: &ToolContext) -> ToolResult {
        tracing::info!(iteration = ctx.iteration, thought = %params.thought, "thought tool execute");
        ToolResult::ok(serde_json::json!({ "recorded": true }))
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct AskUserParams {
    /// 需要用户回答的问题
    pub question: String,
}

/// AskUser 工具：执行后本轮进入 WaitingForUser
pub struct AskUserTool;

#[async_trait]
impl TypedTool for AskUserTool {
    type Params = AskUserParams;

    fn name(&self) -> &str {
        "ask_user"
    }

    fn description(&self) -> &str {
        "Ask the user a clarifying question and wait for the answer. Args: {\"question\": \"text\"}"
    }

    fn pauses_turn(&self) -> bool {
        true
    }

    async fn run(&self, params: AskUserParams, _ctx: &ToolContext) -> ToolResult {
        if params.question.trim().is_empty() {
            return ToolResult::err("Question must not be empty");
        }
        ToolResult::ok(serde_json::json!({ "question": params.question }))
    }
}
