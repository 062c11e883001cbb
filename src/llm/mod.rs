//! LLM 层：客户端抽象与 Mock 实现（真实 Provider 由外部实现 LlmClient 接入）

pub mod mock;
pub mod traits;

pub use mock::{MockLlmClient, ScriptStep, ScriptedLlmClient};
pub use traits::{
    Completion, CompletionOptions, CompletionStream, LlmClient, LlmError, StreamChunk,
};
