//! 工具执行池：用 Semaphore 限制同时运行的工具调用数
//!
//! 同一 ReAct 步内的多个工具调用会并发派发，但总并发受许可数限制；
//! 多个 Agent 共享同一个调度器时，限制在进程内全局生效。

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// 工具调度器（默认 4 个并发许可）
#[derive(Clone, Debug)]
pub struct TaskScheduler {
    tool_semaphore: Arc<Semaphore>,
    max_concurrent: usize,
}

impl TaskScheduler {
    pub fn new(max_concurrent_tools: usize) -> Self {
        let max_concurrent = max_concurrent_tools.max(1);
        Self {
            tool_semaphore: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
        }
    }

    /// 获取工具执行许可；信号量从不关闭，Err 分支只在关闭时出现
    pub async fn acquire_tool(&self) -> Option<OwnedSemaphorePermit> {
        self.tool_semaphore.clone().acquire_owned().await.ok()
    }

    pub fn available(&self) -> usize {
        self.tool_semaphore.available_permits()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new(4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_permits_are_bounded_and_released() {
        let sched = TaskScheduler::new(2);
        let p1 = sched.acquire_tool().await;
        let p2 = sched.acquire_tool().await;
        assert!(p1.is_some() && p2.is_some());
        assert_eq!(sched.available(), 0);
        drop(p1);
        assert_eq!(sched.available(), 1);
    }

    #[test]
    fn test_zero_is_clamped_to_one() {
        assert_eq!(TaskScheduler::new(0).max_concurrent(), 1);
    }
}
