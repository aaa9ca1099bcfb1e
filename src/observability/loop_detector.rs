//! 循环检测：精确重复、模糊重复、推理停滞
//!
//! - exact：同一 (工具, 规范化参数) 在本次运行中出现次数达到 exact_threshold
//! - fuzzy：与同一工具此前任一调用的参数 Jaccard 相似度 ≥ fuzzy_threshold
//! - stagnation：最新推理文本与滑动窗口内任一文本的相似度 > fuzzy_threshold
//!
//! 状态按运行隔离，每次 run() 开始前需 reset（或新建）。

use std::collections::{HashSet, VecDeque};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopStrategy {
    Exact,
    Fuzzy,
    Stagnation,
    None,
}

impl fmt::Display for LoopStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LoopStrategy::Exact => "exact",
            LoopStrategy::Fuzzy => "fuzzy",
            LoopStrategy::Stagnation => "stagnation",
            LoopStrategy::None => "none",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoopDetectionResult {
    pub is_looping: bool,
    pub strategy: LoopStrategy,
    /// 可直接作为合成观察写回对话
    pub message: String,
}

impl LoopDetectionResult {
    pub fn none() -> Self {
        Self {
            is_looping: false,
            strategy: LoopStrategy::None,
            message: String::new(),
        }
    }

    fn flagged(strategy: LoopStrategy, message: String) -> Self {
        Self {
            is_looping: true,
            strategy,
            message,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopDetectorConfig {
    pub exact_threshold: usize,
    pub fuzzy_threshold: f64,
    pub stagnation_window: usize,
}

impl Default for LoopDetectorConfig {
    fn default() -> Self {
        Self {
            exact_threshold: 2,
            fuzzy_threshold: 0.8,
            stagnation_window: 3,
        }
    }
}

/// 词级 Jaccard 相似度（按空白切分）；两侧都为空时返回 0
pub fn jaccard_similarity(a: &str, b: &str) -> f64 {
    let sa: HashSet<&str> = a.split_whitespace().collect();
    let sb: HashSet<&str> = b.split_whitespace().collect();
    let union = sa.union(&sb).count();
    if union == 0 {
        return 0.0;
    }
    sa.intersection(&sb).count() as f64 / union as f64
}

/// 参数的规范化字符串：对象键递归排序，相同参数总得到相同文本
pub fn canonical_args(args: &Value) -> String {
    match args {
        Value::String(s) => s.clone(),
        other => sorted(other).to_string(),
    }
}

fn sorted(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = serde_json::Map::new();
            for k in keys {
                out.insert(k.clone(), sorted(&map[k]));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
        other => other.clone(),
    }
}

#[derive(Debug, Default)]
pub struct LoopDetector {
    config: LoopDetectorConfig,
    tool_history: Vec<(String, String)>,
    output_history: VecDeque<String>,
}

impl LoopDetector {
    pub fn new(config: LoopDetectorConfig) -> Self {
        Self {
            config,
            tool_history: Vec::new(),
            output_history: VecDeque::new(),
        }
    }

    pub fn config(&self) -> &LoopDetectorConfig {
        &self.config
    }

    pub fn reset(&mut self) {
        self.tool_history.clear();
        self.output_history.clear();
    }

    /// 分派前检查；无论是否命中都会记入历史
    pub fn check_tool_call(&mut self, tool_name: &str, tool_input: &str) -> LoopDetectionResult {
        let prior_same = self
            .tool_history
            .iter()
            .filter(|(t, a)| t == tool_name && a == tool_input)
            .count();
        let fuzzy_hit = self
            .tool_history
            .iter()
            .filter(|(t, _)| t == tool_name)
            .map(|(_, a)| jaccard_similarity(a, tool_input))
            .fold(None::<f64>, |best, s| Some(best.map_or(s, |b| b.max(s))))
            .filter(|s| *s >= self.config.fuzzy_threshold);

        self.tool_history
            .push((tool_name.to_string(), tool_input.to_string()));

        let occurrences = prior_same + 1;
        if occurrences >= self.config.exact_threshold {
            let msg = format!(
                "Loop detected (exact): '{}' has been called {} times with identical arguments. \
                 The result will not change; try a different approach or give your final answer.",
                tool_name, occurrences
            );
            tracing::warn!(tool = %tool_name, occurrences, "exact loop detected");
            return LoopDetectionResult::flagged(LoopStrategy::Exact, msg);
        }

        if let Some(similarity) = fuzzy_hit {
            let msg = format!(
                "Loop detected (fuzzy): this call to '{}' is {:.0}% similar to a previous one. \
                 Change your strategy instead of rephrasing the same request.",
                tool_name,
                similarity * 100.0
            );
            tracing::warn!(tool = %tool_name, similarity, "fuzzy loop detected");
            return LoopDetectionResult::flagged(LoopStrategy::Fuzzy, msg);
        }

        LoopDetectionResult::none()
    }

    /// 推理文本停滞检查；空文本不参与
    pub fn check_output_stagnation(&mut self, output: &str) -> LoopDetectionResult {
        let output = output.trim();
        if output.is_empty() {
            return LoopDetectionResult::none();
        }
        let hit = self
            .output_history
            .iter()
            .map(|prev| jaccard_similarity(prev, output))
            .find(|s| *s > self.config.fuzzy_threshold);

        self.output_history.push_back(output.to_string());
        while self.output_history.len() > self.config.stagnation_window.max(1) {
            self.output_history.pop_front();
        }

        match hit {
            Some(similarity) => {
                tracing::warn!(similarity, "reasoning stagnation detected");
                LoopDetectionResult::flagged(
                    LoopStrategy::Stagnation,
                    format!(
                        "Stagnation detected: your reasoning is {:.0}% similar to a recent step. \
                         Make progress with a new action or provide the final answer.",
                        similarity * 100.0
                    ),
                )
            }
            None => LoopDetectionResult::none(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_jaccard_basic() {
        assert_eq!(jaccard_similarity("a b c", "a b c"), 1.0);
        assert_eq!(jaccard_similarity("a b", "c d"), 0.0);
        assert_eq!(jaccard_similarity("", ""), 0.0);
        let s = jaccard_similarity("find information about cats", "find info about cats");
        assert!((s - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_exact_flags_on_second_identical_call() {
        let mut d = LoopDetector::default();
        let first = d.check_tool_call("search", r#"{"q":"rust"}"#);
        assert!(!first.is_looping);
        let second = d.check_tool_call("search", r#"{"q":"rust"}"#);
        assert!(second.is_looping);
        assert_eq!(second.strategy, LoopStrategy::Exact);
        assert!(second.message.contains("search"));
    }

    #[test]
    fn test_fuzzy_threshold_is_inclusive_and_below_is_clean() {
        let mut d = LoopDetector::default();
        d.check_tool_call("search", "find information about cats");
        let r = d.check_tool_call("search", "find info about cats");
        assert!(!r.is_looping, "0.6 similarity must not flag at 0.8");

        let mut d = LoopDetector::new(LoopDetectorConfig {
            fuzzy_threshold: 0.6,
            ..Default::default()
        });
        d.check_tool_call("search", "find information about cats");
        let r = d.check_tool_call("search", "find info about cats");
        assert_eq!(r.strategy, LoopStrategy::Fuzzy);
    }

    #[test]
    fn test_fuzzy_only_compares_same_tool() {
        let mut d = LoopDetector::default();
        d.check_tool_call("search", "a b c d e");
        let r = d.check_tool_call("read_file", "a b c d e");
        assert!(!r.is_looping);
    }

    #[test]
    fn test_exact_threshold_three() {
        let mut d = LoopDetector::new(LoopDetectorConfig {
            exact_threshold: 3,
            fuzzy_threshold: 1.1,
            ..Default::default()
        });
        assert!(!d.check_tool_call("t", "x").is_looping);
        assert!(!d.check_tool_call("t", "x").is_looping);
        assert_eq!(d.check_tool_call("t", "x").strategy, LoopStrategy::Exact);
    }

    #[test]
    fn test_stagnation_window_slides() {
        let mut d = LoopDetector::new(LoopDetectorConfig {
            stagnation_window: 2,
            ..Default::default()
        });
        assert!(!d.check_output_stagnation("I should search for the population").is_looping);
        assert!(!d.check_output_stagnation("completely different thought here").is_looping);
        assert!(!d.check_output_stagnation("yet another unrelated idea now").is_looping);
        // 第一条已滑出窗口
        assert!(!d.check_output_stagnation("I should search for the population").is_looping);
        let r = d.check_output_stagnation("I should search for the population");
        assert_eq!(r.strategy, LoopStrategy::Stagnation);
    }

    #[test]
    fn test_stagnation_ignores_empty_output() {
        let mut d = LoopDetector::default();
        assert!(!d.check_output_stagnation("").is_looping);
        assert!(!d.check_output_stagnation("   ").is_looping);
    }

    #[test]
    fn test_reset_clears_history() {
        let mut d = LoopDetector::default();
        d.check_tool_call("t", "x");
        d.reset();
        assert!(!d.check_tool_call("t", "x").is_looping);
    }

    #[test]
    fn test_canonical_args_ignores_key_order() {
        let a = json!({"b": 1, "a": 2});
        let b = json!({"a": 2, "b": 1});
        assert_eq!(canonical_args(&a), canonical_args(&b));
    }
}
