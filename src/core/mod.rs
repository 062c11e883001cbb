//! 核心层：错误类型、任务状态机、会话监管

pub mod error;
pub mod session_supervisor;
pub mod state;

pub use error::AgentError;
pub use session_supervisor::{SessionSupervisor, TurnGuard};
pub use state::{TaskState, TaskStatus};
