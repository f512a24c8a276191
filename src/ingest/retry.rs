//! 재시도 정책
//!
//! 실행기가 `process` 실패 후 다시 시도할지, 얼마 뒤에 시도할지 결정합니다.
//! 백오프: `base × 2^(attempt − 1)`, `max_backoff`로 상한.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// 기본 최대 시도 횟수
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// 기본 백오프 기준값
pub const DEFAULT_BASE_BACKOFF: Duration = Duration::from_secs(30);

/// 백오프 상한
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(600);

/// 재시도 정책
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// 최대 시도 횟수 (첫 시도 포함)
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_backoff: DEFAULT_BASE_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
        }
    }
}

impl RetryPolicy {
    /// `attempt`번째 시도(1부터)가 실패한 뒤의 대기 시간
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_backoff
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    /// `attempt`번째 시도 실패 후 남은 시도가 있는지
    pub fn can_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// 실패 처리 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// `after` 뒤에 다시 시도
    Retry { after: Duration },
    /// 문서가 Failed로 표시됨
    Failed { reason: String },
}
