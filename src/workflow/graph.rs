//! 计划依赖图
//!
//! 使用邻接表和入度表做分层拓扑排序（Kahn）：同一层（wave）内的步骤互不依赖，可并发执行。
//! 输入应为 Plan::validated 之后的计划，边只指向更小的步号，因此一定无环。

use std::collections::BTreeMap;

use crate::workflow::types::{Plan, StepNumber};

pub struct PlanGraph {
    /// 邻接表：步号 -> 依赖该步的步号列表
    pub adjacency: BTreeMap<StepNumber, Vec<StepNumber>>,
    /// 入度表：步号 -> 依赖数
    pub in_degree: BTreeMap<StepNumber, usize>,
}

impl PlanGraph {
    pub fn new(plan: &Plan) -> Self {
        let mut adjacency: BTreeMap<StepNumber, Vec<StepNumber>> = BTreeMap::new();
        let mut in_degree: BTreeMap<StepNumber, usize> = BTreeMap::new();

        for s in &plan.steps {
            in_degree.insert(s.step, 0);
            adjacency.entry(s.step).or_default();
        }
        for s in &plan.steps {
            for dep in &s.depends_on {
                if !in_degree.contains_key(dep) {
                    continue;
                }
                adjacency.entry(*dep).or_default().push(s.step);
                *in_degree.entry(s.step).or_insert(0) += 1;
            }
        }
        Self {
            adjacency,
            in_degree,
        }
    }

    /// 分层：每层按步号升序；无法进入任何层的步骤（仅在有环时出现）追加在最后一层
    pub fn waves(&self) -> Vec<Vec<StepNumber>> {
        let mut degree = self.in_degree.clone();
        let mut current: Vec<StepNumber> = degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(s, _)| *s)
            .collect();
        let mut waves = Vec::new();
        let mut placed = 0usize;

        while !current.is_empty() {
            let mut next = Vec::new();
            for s in &current {
                if let Some(dependents) = self.adjacency.get(s) {
                    for d in dependents {
                        if let Some(deg) = degree.get_mut(d) {
                            *deg -= 1;
                            if *deg == 0 {
                                next.push(*d);
                            }
                        }
                    }
                }
            }
            placed += current.len();
            waves.push(std::mem::take(&mut current));
            next.sort_unstable();
            current = next;
        }

        if placed < self.in_degree.len() {
            let rest: Vec<StepNumber> = degree
                .iter()
                .filter(|(_, d)| **d > 0)
                .map(|(s, _)| *s)
                .collect();
            tracing::warn!(steps = ?rest, "cyclic plan dependencies; running remaining steps last");
            waves.push(rest);
        }
        waves
    }
}
