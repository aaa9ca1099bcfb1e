//! 可观测性：日志初始化、执行追踪、循环检测

pub mod loop_detector;
pub mod tracer;

pub use loop_detector::{
    canonical_args, jaccard_similarity, LoopDetectionResult, LoopDetector, LoopDetectorConfig,
    LoopStrategy,
};
pub use tracer::{Step, ToolCallRecord, Trace, TraceStatus, Tracer};

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// 安装全局 subscriber；RUST_LOG 优先于配置的级别。format 为 "json" 时输出 JSON 行，否则为人类可读格式。
/// 重复调用只记录一次告警。
pub fn init(level: &str, format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);
    let result = if format.eq_ignore_ascii_case("json") {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer()).try_init()
    };
    if let Err(e) = result {
        tracing::warn!(error = %e, "tracing subscriber already installed");
    }
}
