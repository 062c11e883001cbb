//! Scribe - 笔记应用里的对话助手内核
//!
//! 模块划分：
//! - **chat**: 会话门面（发送、重新生成、停止、编辑、删除、清空）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、任务状态机、会话监管
//! - **llm**: LLM 客户端抽象与 Mock 实现
//! - **memory**: 模型上下文消息与聊天历史持久化
//! - **observability**: tracing 初始化
//! - **react**: 命令解析、Agent 主循环、重新生成、导出格式
//! - **tools**: 工具注册表与内置笔记工具

pub mod chat;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod react;
pub mod tools;

pub use chat::{ChatComponents, ChatSession};
