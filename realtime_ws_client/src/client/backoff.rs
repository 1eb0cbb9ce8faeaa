// realtime_ws_client/src/client/backoff.rs

//! 断线重连的指数退避策略。

use std::time::Duration;

/// 默认的初始重连延迟。
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1_000);
/// 默认的最大重连延迟。
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(30_000);
/// 默认的最大连续失败次数。达到该次数后放弃重连。
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// 重连策略：从 `base_delay` 开始，每次连续失败翻倍，不超过 `max_delay`，
/// 连续失败 `max_attempts` 次后放弃。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl ReconnectPolicy {
    /// 第 `failures` 次连续失败之后应等待的延迟：`min(base * 2^(failures-1), max_delay)`。
    ///
    /// `failures >= max_attempts` 时返回 `None`，表示重连预算已耗尽。
    pub fn delay_for(&self, failures: u32) -> Option<Duration> {
        if failures == 0 || failures >= self.max_attempts {
            return None;
        }
        let factor = 2u32.checked_pow(failures - 1).unwrap_or(u32::MAX); // 溢出时按最大值处理，随后被 max_delay 截断
        let delay = self.base_delay.checked_mul(factor).unwrap_or(self.max_delay);
        Some(delay.min(self.max_delay))
    }
}

/// 一个会话的重连计数器与当前退避延迟。
///
/// 连接成功时 `reset`；每次连接尝试失败或已建立的连接异常断开时 `record_failure`。
#[derive(Debug, Clone)]
pub struct ReconnectState {
    policy: ReconnectPolicy,
    attempts: u32,
    current_delay: Duration,
}

impl ReconnectState {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
            current_delay: policy.base_delay,
        }
    }

    /// 当前连续失败次数。
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// 下一次失败时将被安排的延迟。
    pub fn current_delay(&self) -> Duration {
        self.current_delay
    }

    /// 计数器归零，延迟恢复为初始值。
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.current_delay = self.policy.base_delay;
    }

    /// 记录一次失败，返回本次应安排的重连延迟；预算耗尽时返回 `None`。
    pub fn record_failure(&mut self) -> Option<Duration> {
        self.attempts = self.attempts.saturating_add(1);
        let scheduled = self.policy.delay_for(self.attempts)?;
        self.current_delay = self
            .policy
            .delay_for(self.attempts + 1)
            .unwrap_or(scheduled.saturating_mul(2).min(self.policy.max_delay));
        Some(scheduled)
    }
}
