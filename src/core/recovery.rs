//! 错误恢复引擎
//!
//! 根据失败策略与 RagError 类型返回 RecoveryAction，供编排器决定是退避重试还是终止会话。

use std::time::Duration;

use crate::config::{FailureMode, FailureSection};
use crate::core::{RagError, RecoveryAction};

/// 外部调用失败的处理策略
#[derive(Debug, Clone)]
pub struct RecoveryEngine {
    mode: FailureMode,
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl Default for RecoveryEngine {
    fn default() -> Self {
        Self::from_config(&FailureSection::default())
    }
}

impl RecoveryEngine {
    pub fn from_config(config: &FailureSection) -> Self {
        Self {
            mode: config.mode,
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms.max(config.base_delay_ms)),
        }
    }

    /// 首次失败即终止
    pub fn abort_on_failure() -> Self {
        Self {
            mode: FailureMode::Abort,
            ..Self::default()
        }
    }

    /// 指数退避重试
    pub fn retry(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            mode: FailureMode::Retry,
            max_retries,
            base_delay,
            max_delay: max_delay.max(base_delay),
        }
    }

    /// attempt 为已失败次数（从 1 开始）
    pub fn handle(&self, err: &RagError, attempt: u32) -> RecoveryAction {
        if self.mode == FailureMode::Abort || !err.is_retryable() || attempt > self.max_retries {
            return RecoveryAction::Abort;
        }
        RecoveryAction::RetryAfter(self.backoff(attempt))
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Collaborator;

    fn unavailable(retryable: bool) -> RagError {
        RagError::CollaboratorUnavailable {
            collaborator: Collaborator::Retriever,
            detail: "down".to_string(),
            retryable,
        }
    }

    #[test]
    fn test_abort_mode_never_retries() {
        let engine = RecoveryEngine::abort_on_failure();
        assert_eq!(engine.handle(&unavailable(true), 1), RecoveryAction::Abort);
    }

    #[test]
    fn test_retry_backoff_doubles_and_caps() {
        let engine =
            RecoveryEngine::retry(5, Duration::from_millis(100), Duration::from_millis(350));
        let err = unavailable(true);
        assert_eq!(
            engine.handle(&err, 1),
            RecoveryAction::RetryAfter(Duration::from_millis(100))
        );
        assert_eq!(
            engine.handle(&err, 2),
            RecoveryAction::RetryAfter(Duration::from_millis(200))
        );
        assert_eq!(
            engine.handle(&err, 3),
            RecoveryAction::RetryAfter(Duration::from_millis(350))
        );
    }

    #[test]
    fn test_retry_exhausted_aborts() {
        let engine = RecoveryEngine::retry(2, Duration::from_millis(1), Duration::from_millis(1));
        assert!(matches!(
            engine.handle(&unavailable(true), 2),
            RecoveryAction::RetryAfter(_)
        ));
        assert_eq!(engine.handle(&unavailable(true), 3), RecoveryAction::Abort);
    }

    #[test]
    fn test_non_retryable_aborts() {
        let engine = RecoveryEngine::retry(3, Duration::from_millis(1), Duration::from_millis(1));
        assert_eq!(engine.handle(&unavailable(false), 1), RecoveryAction::Abort);
    }
}
