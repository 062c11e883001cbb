//! 记忆层：模型上下文消息与聊天历史持久化

pub mod chat_history;
pub mod conversation;

pub use chat_history::{
    now_timestamp, ChatHistoryStore, ChatMessage, HistoryError, MessageExtra, Sender,
};
pub use conversation::{Message, Role};
