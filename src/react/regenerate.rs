//! 重新生成：定位要覆盖的 assistant 轮次，并重建上下文前缀
//!
//! - 点击 assistant 轮次：覆盖它本身，前缀截止到它之前最近的 user 轮次
//! - 点击 user 轮次：若紧随其后的是 assistant 轮次则覆盖之，否则在其后插入新轮次
//!
//! 覆盖时保留原时间戳（以及 id），持久化层的按值 update 才能命中原记录；插入时使用新时间戳。

use crate::core::AgentError;
use crate::memory::{now_timestamp, ChatMessage, Sender};
use crate::react::{TurnOutcome, TurnRequest};

/// 要写入的位置
#[derive(Debug, Clone, PartialEq)]
pub enum RegenerationTarget {
    /// 覆盖已有的 assistant 轮次；original 是覆盖前的记录（用于按身份三元组更新）
    Overwrite { index: usize, original: ChatMessage },
    /// 在 user 轮次之后插入新的 assistant 轮次
    Insert { index: usize, timestamp: String },
}

impl RegenerationTarget {
    /// 新轮次在 UI 列表中的位置
    pub fn index(&self) -> usize {
        match self {
            RegenerationTarget::Overwrite { index, .. } | RegenerationTarget::Insert { index, .. } => {
                *index
            }
        }
    }

    pub fn is_insert(&self) -> bool {
        matches!(self, RegenerationTarget::Insert { .. })
    }
}

/// 一次重新生成的计划
#[derive(Debug, Clone, PartialEq)]
pub struct RegenerationPlan {
    pub target: RegenerationTarget,
    /// 从开头到发起该回复的 user 轮次（含）
    pub prefix: Vec<ChatMessage>,
}

/// 根据被点击的轮次计算覆盖目标与上下文前缀
pub fn plan_regeneration(
    turns: &[ChatMessage],
    clicked: usize,
) -> Result<RegenerationPlan, AgentError> {
    let clicked_turn = turns.get(clicked).ok_or(AgentError::MessageIndex(clicked))?;

    let (user_index, target) = match clicked_turn.sender {
        Sender::Assistant => {
            let user_index = turns[..clicked]
                .iter()
                .rposition(|t| t.sender == Sender::User)
                .ok_or_else(|| {
                    AgentError::RegenerationTarget(format!(
                        "no user turn precedes assistant turn {}",
                        clicked
                    ))
                })?;
            (
                user_index,
                RegenerationTarget::Overwrite {
                    index: clicked,
                    original: clicked_turn.clone(),
                },
            )
        }
        Sender::User => {
            let next = clicked + 1;
            let target = match turns.get(next) {
                Some(t) if t.sender == Sender::Assistant => RegenerationTarget::Overwrite {
                    index: next,
                    original: t.clone(),
                },
                _ => RegenerationTarget::Insert {
                    index: next,
                    timestamp: now_timestamp(),
                },
            };
            (clicked, target)
        }
    };

    Ok(RegenerationPlan {
        target,
        prefix: turns[..=user_index].to_vec(),
    })
}

impl RegenerationPlan {
    /// 发起回复的 user 轮次
    pub fn user_turn(&self) -> Option<&ChatMessage> {
        self.prefix.last()
    }

    /// 重建本次请求：前缀中最后一条 user 轮次作为输入，其余作为历史
    pub fn request(&self, system_prompt: &str, reference: Option<String>) -> TurnRequest {
        let (user_input, history) = match self.prefix.split_last() {
            Some((last, rest)) => (
                last.content.clone(),
                rest.iter().map(ChatMessage::to_message).collect(),
            ),
            None => (String::new(), Vec::new()),
        };
        TurnRequest::new(user_input)
            .with_system_prompt(system_prompt)
            .with_reference(reference)
            .with_history(history)
    }

    /// 在 UI 列表中占位：插入场景放一条空的 assistant 轮次，覆盖场景保持原样
    pub fn begin(&self, turns: &mut Vec<ChatMessage>) {
        if let RegenerationTarget::Insert { index, timestamp } = &self.target {
            let placeholder = ChatMessage::assistant("").with_timestamp(timestamp.clone());
            turns.insert((*index).min(turns.len()), placeholder);
        }
    }

    /// 由新结果构造替换记录：覆盖时沿用原记录的时间戳与 id，插入时使用占位时间戳
    pub fn replacement(&self, outcome: &TurnOutcome) -> ChatMessage {
        let mut replacement = match &self.target {
            RegenerationTarget::Overwrite { original, .. } => {
                let mut msg = original.clone();
                msg.content = outcome.content.clone();
                msg
            }
            RegenerationTarget::Insert { timestamp, .. } => {
                ChatMessage::assistant(outcome.content.clone()).with_timestamp(timestamp.clone())
            }
        };
        replacement.apply_extra(outcome.extra());
        replacement
    }

    /// 把（已持久化的）替换记录放进 UI 列表的目标位置
    pub fn commit(&self, turns: &mut [ChatMessage], replacement: ChatMessage) {
        if let Some(slot) = turns.get_mut(self.target.index()) {
            *slot = replacement;
        }
    }

    /// 失败或取消：移除占位轮次，恢复原状态
    pub fn abort(&self, turns: &mut Vec<ChatMessage>) {
        if let RegenerationTarget::Insert { index, timestamp } = &self.target {
            let is_placeholder = turns
                .get(*index)
                .map(|t| t.matches(timestamp, Sender::Assistant, ""))
                .unwrap_or(false);
            if is_placeholder {
                turns.remove(*index);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{TaskState, TaskStatus};
    use crate::memory::Role;

    fn conversation() -> Vec<ChatMessage> {
        vec![
            ChatMessage::user("q1").with_timestamp("2026-01-01T00:00:00.000Z"),
            ChatMessage::assistant("a1").with_timestamp("2026-01-01T00:00:01.000Z"),
            ChatMessage::user("q2").with_timestamp("2026-01-01T00:00:02.000Z"),
            ChatMessage::user("q3").with_timestamp("2026-01-01T00:00:03.000Z"),
            ChatMessage::assistant("a3").with_timestamp("2026-01-01T00:00:04.000Z"),
        ]
    }

    fn completed(content: &str) -> TurnOutcome {
        let mut status = TaskStatus::new(5);
        status.status = TaskState::Completed;
        TurnOutcome {
            content: content.to_string(),
            reasoning: None,
            task_status: status,
            tool_results: Vec::new(),
            context: Vec::new(),
            iterations: 1,
        }
    }

    #[test]
    fn test_assistant_click_overwrites_itself() {
        let turns = conversation();
        let plan = plan_regeneration(&turns, 4).unwrap();
        assert_eq!(plan.target.index(), 4);
        assert!(!plan.target.is_insert());
        assert_eq!(plan.prefix.len(), 4);
        assert_eq!(plan.user_turn().unwrap().content, "q3");
    }

    #[test]
    fn test_user_click_overwrites_following_assistant() {
        let mut turns = conversation();
        let plan = plan_regeneration(&turns, 0).unwrap();
        assert_eq!(plan.target.index(), 1);
        assert_eq!(plan.prefix.len(), 1);

        plan.begin(&mut turns);
        assert_eq!(turns.len(), 5);
        let replacement = plan.replacement(&completed("a1 again"));
        assert_eq!(replacement.timestamp, "2026-01-01T00:00:01.000Z");
        // 构造替换记录不改动列表
        assert_eq!(turns[1].content, "a1");
        plan.commit(&mut turns, replacement);
        assert_eq!(turns[1].content, "a1 again");
        assert_eq!(turns[1].task_status.as_ref().unwrap().status, TaskState::Completed);
        // 其后的轮次不变
        assert_eq!(&turns[2..], &conversation()[2..]);
    }

    #[test]
    fn test_user_click_without_answer_inserts() {
        let mut turns = conversation();
        let plan = plan_regeneration(&turns, 2).unwrap();
        assert!(plan.target.is_insert());
        assert_eq!(plan.target.index(), 3);

        plan.begin(&mut turns);
        assert_eq!(turns.len(), 6);
        assert_eq!(turns[3].sender, Sender::Assistant);
        let replacement = plan.replacement(&completed("a2"));
        assert_eq!(replacement.timestamp, turns[3].timestamp);
        plan.commit(&mut turns, replacement);
        assert_eq!(turns[3].content, "a2");
        assert_eq!(turns[4].content, "q3");
        assert_eq!(turns[5].content, "a3");
    }

    #[test]
    fn test_insert_at_end_and_abort() {
        let mut turns = conversation();
        turns.push(ChatMessage::user("q4"));
        let before = turns.clone();
        let plan = plan_regeneration(&turns, 5).unwrap();
        assert_eq!(plan.target.index(), 6);

        plan.begin(&mut turns);
        assert_eq!(turns.len(), 7);
        plan.abort(&mut turns);
        assert_eq!(turns, before);
    }

    #[test]
    fn test_abort_overwrite_keeps_original() {
        let mut turns = conversation();
        let plan = plan_regeneration(&turns, 1).unwrap();
        plan.begin(&mut turns);
        plan.abort(&mut turns);
        assert_eq!(turns, conversation());
    }

    #[test]
    fn test_request_rebuilds_prefix() {
        let turns = conversation();
        let plan = plan_regeneration(&turns, 4).unwrap();
        let request = plan.request("sys", None);
        assert_eq!(request.user_input, "q3");
        assert_eq!(request.history.len(), 3);
        assert_eq!(request.history[1].role, Role::Assistant);
        assert_eq!(request.history[2].content, "q2");
    }

    #[test]
    fn test_invalid_targets() {
        let turns = conversation();
        assert!(matches!(
            plan_regeneration(&turns, 9),
            Err(AgentError::MessageIndex(9))
        ));

        let orphan = vec![ChatMessage::assistant("hello")];
        assert!(matches!(
            plan_regeneration(&orphan, 0),
            Err(AgentError::RegenerationTarget(_))
        ));
    }
}
