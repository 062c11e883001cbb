//! 会话监管：单轮互斥与协作式取消
//!
//! 每个会话视图同时只允许一个循环运行；begin_turn 在已有循环时返回 Busy。
//! 每轮使用新的 CancellationToken，cancel() 只影响当前轮，不会污染下一轮。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use crate::core::AgentError;

#[derive(Debug, Default)]
struct SupervisorInner {
    running: AtomicBool,
    cancel_token: Mutex<CancellationToken>,
}

/// 会话级生命周期管理；Clone 后共享同一状态，可交给 UI 侧用于 Stop
#[derive(Debug, Clone, Default)]
pub struct SessionSupervisor {
    inner: Arc<SupervisorInner>,
}

impl SessionSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// 开始一轮；已有循环在运行时拒绝
    pub fn begin_turn(&self) -> Result<TurnGuard, AgentError> {
        if self
            .inner
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::warn!("Rejected turn: another turn is still running");
            return Err(AgentError::Busy);
        }
        let token = CancellationToken::new();
        *self.lock_token() = token.clone();
        Ok(TurnGuard {
            supervisor: self.clone(),
            token,
        })
    }

    /// 触发取消（用户点 Stop）；没有运行中的轮次时无效果
    pub fn cancel(&self) {
        if self.is_running() {
            tracing::info!("Cancellation requested");
            self.lock_token().cancel();
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    fn lock_token(&self) -> std::sync::MutexGuard<'_, CancellationToken> {
        self.inner
            .cancel_token
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// 一轮的运行凭证：持有本轮取消令牌，Drop 时释放互斥
#[derive(Debug)]
pub struct TurnGuard {
    supervisor: SessionSupervisor,
    token: CancellationToken,
}

impl TurnGuard {
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        self.supervisor.inner.running.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_turn_is_rejected() {
        let supervisor = SessionSupervisor::new();
        let guard = supervisor.begin_turn().unwrap();
        assert!(supervisor.is_running());
        assert!(matches!(supervisor.begin_turn(), Err(AgentError::Busy)));
        drop(guard);
        assert!(!supervisor.is_running());
        assert!(supervisor.begin_turn().is_ok());
    }

    #[test]
    fn test_cancel_only_affects_current_turn() {
        let supervisor = SessionSupervisor::new();
        let first = supervisor.begin_turn().unwrap();
        let handle = supervisor.clone();
        handle.cancel();
        assert!(first.token().is_cancelled());
        drop(first);

        let second = supervisor.begin_turn().unwrap();
        assert!(!second.token().is_cancelled());
    }

    #[test]
    fn test_cancel_when_idle_is_noop() {
        let supervisor = SessionSupervisor::new();
        supervisor.cancel();
        let guard = supervisor.begin_turn().unwrap();
        assert!(!guard.token().is_cancelled());
    }
}
