//! 工具限流：固定 60 秒窗口计数
//!
//! 窗口从该工具的首次调用开始计时；窗口内调用次数达到上限后拒绝，直到窗口滚动。
//! 计数器在 Mutex 内原子更新，并发调用同一工具时不会超发。

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// 默认每分钟调用次数
pub const DEFAULT_CALLS_PER_MINUTE: u32 = 60;

#[derive(Debug, Default)]
struct WindowState {
    started: Option<Instant>,
    count: u32,
}

/// 固定窗口限流器
#[derive(Debug)]
pub struct FixedWindowLimiter {
    limit: u32,
    window: Duration,
    state: Mutex<WindowState>,
}

impl FixedWindowLimiter {
    /// 每分钟最多 calls_per_minute 次（0 表示该工具不可调用）
    pub fn per_minute(calls_per_minute: u32) -> Self {
        Self::new(calls_per_minute, Duration::from_secs(60))
    }

    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            state: Mutex::new(WindowState::default()),
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// 尝试占用一次调用额度
    pub fn try_acquire(&self) -> bool {
        self.try_acquire_at(Instant::now())
    }

    /// 以给定时刻判断（便于测试窗口滚动）
    pub fn try_acquire_at(&self, now: Instant) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let in_window = state
            .started
            .map(|start| now.saturating_duration_since(start) < self.window)
            .unwrap_or(false);
        if !in_window {
            state.started = Some(now);
            state.count = 0;
        }
        if state.count >= self.limit {
            return false;
        }
        state.count += 1;
        true
    }
}
