//! ReAct 状态机阶段
//!
//! INIT → REASONING → {TOOL_DISPATCH → OBSERVING → REASONING}* → DONE | MAX_STEPS | ERROR。
//! 引擎每次切换阶段都经过 `transition`，非法跳转只记录日志，不会中断运行。

use serde::Serialize;

/// 引擎所处阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentPhase {
    Init,
    Reasoning,
    ToolDispatch,
    Observing,
    Done,
    MaxSteps,
    Error,
}

impl AgentPhase {
    /// 终态：DONE / MAX_STEPS / ERROR
    pub fn is_terminal(self) -> bool {
        matches!(self, AgentPhase::Done | AgentPhase::MaxSteps | AgentPhase::Error)
    }

    /// 是否允许从 self 跳到 next
    pub fn can_transition(self, next: AgentPhase) -> bool {
        use AgentPhase::*;
        match (self, next) {
            (_, Error) => !self.is_terminal(),
            (Init, Reasoning) | (Init, MaxSteps) => true,
            (Reasoning, ToolDispatch) | (Reasoning, Done) | (Reasoning, Reasoning) => true,
            (Reasoning, MaxSteps) => true,
            (ToolDispatch, Observing) => true,
            (Observing, Reasoning) | (Observing, MaxSteps) => true,
            _ => false,
        }
    }
}

/// 单次运行的阶段跟踪器
#[derive(Debug)]
pub struct PhaseTracker {
    phase: AgentPhase,
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self {
            phase: AgentPhase::Init,
        }
    }
}

impl PhaseTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> AgentPhase {
        self.phase
    }

    pub fn transition(&mut self, next: AgentPhase) {
        if !self.phase.can_transition(next) {
            tracing::warn!(from = ?self.phase, to = ?next, "unexpected phase transition");
        } else {
            tracing::debug!(from = ?self.phase, to = ?next, "phase");
        }
        self.phase = next;
    }
}
