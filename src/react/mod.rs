//! Agent 层：命令解析、主循环、重新生成、导出格式与过程事件

pub mod events;
pub mod export;
pub mod loop_;
pub mod parser;
pub mod regenerate;

pub use events::AgentEvent;
pub use export::{embed_metadata, export_message, strip_metadata, TurnMetadata, METADATA_FENCE};
pub use loop_::{resume_turn, run_turn, AgentSession, TurnOutcome, TurnRequest};
pub use parser::{parse_commands, ParsedOutput, Segment};
pub use regenerate::{plan_regeneration, RegenerationPlan, RegenerationTarget};
