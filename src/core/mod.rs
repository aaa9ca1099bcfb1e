//! 核心层：运行级错误、状态机阶段、工具执行池

pub mod error;
pub mod state;
pub mod task_scheduler;

pub use error::AgentError;
pub use state::{AgentPhase, PhaseTracker};
pub use task_scheduler::TaskScheduler;
