//! hive 命令行入口
//!
//! 用法：
//!   hive [--config <path>] [--trace-json] <query>        ReAct 单智能体
//!   hive [--config <path>] [--trace-json] --plan <query> Plan-and-Execute 编排

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Parser;
use hive::{load_config, observability, AgentBuilder};

/// Hive 命令行参数
#[derive(Parser, Debug)]
#[command(name = "hive")]
#[command(version, about = "Tool-using agent runtime: ReAct loop and Plan-and-Execute orchestration")]
struct Cli {
    /// Decompose the query into a plan and dispatch steps to specialists
    #[arg(long)]
    plan: bool,

    /// Path to configuration file
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Print the execution trace as JSON after the answer
    #[arg(long)]
    trace_json: bool,

    /// The query (words are joined with spaces)
    #[arg(required = true)]
    query: Vec<String>,
}

impl Cli {
    fn query_text(&self) -> String {
        self.query.join(" ").trim().to_string()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let query = cli.query_text();
    if query.is_empty() {
        bail!("query must not be blank");
    }
    let config = load_config(cli.config.clone()).context("Failed to load config")?;
    observability::init(&config.logging.level, &config.logging.format);

    let runtime = AgentBuilder::new(config)
        .build()
        .context("Failed to build agent")?;

    if cli.plan {
        let result = runtime
            .plan_execute_agent()
            .run(&query)
            .await
            .context("Plan-and-execute run failed")?;
        println!("{}", result.answer);
        println!();
        for step in &result.metadata.plan.steps {
            let status = match result.metadata.step_results.get(&step.step) {
                Some(o) if o.is_success() => "ok",
                _ => "failed",
            };
            println!("  step {} [{}] {}: {}", step.step, step.specialist, status, step.task);
        }
        if cli.trace_json {
            println!("{}", serde_json::to_string_pretty(&result.metadata)?);
        }
    } else {
        let result = runtime
            .routed_react_agent(&query)
            .await
            .run(&query)
            .await
            .context("Agent run failed")?;
        println!("{}", result.answer);
        println!();
        runtime.tracer.print_summary(&result.trace_id);
        if cli.trace_json {
            if let Some(json) = runtime.tracer.export_json(&result.trace_id) {
                println!("{}", json);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plan_and_config() {
        let cli = Cli::try_parse_from([
            "hive", "--plan", "--config", "x.toml", "compare", "EU", "policy",
        ])
        .unwrap();
        assert!(cli.plan);
        assert!(!cli.trace_json);
        assert_eq!(cli.config, Some(PathBuf::from("x.toml")));
        assert_eq!(cli.query_text(), "compare EU policy");
    }

    #[test]
    fn test_empty_query_is_error() {
        assert!(Cli::try_parse_from(["hive", "--plan"]).is_err());
    }
}
