//! 计算器工具：execute_calculation

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::tools::schema::{parameters_for, parse_args};
use crate::tools::{Tool, ToolError};

#[derive(Debug, Clone, Copy, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Add,
    Subtract,
    Multiply,
    Divide,
    Pow,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CalculationArgs {
    /// 运算类型
    pub operation: Operation,
    /// 左操作数
    pub operand_a: f64,
    /// 右操作数
    pub operand_b: f64,
}

/// 基本四则运算与乘方
pub fn calculate(op: Operation, a: f64, b: f64) -> Result<f64, ToolError> {
    let result = match op {
        Operation::Add => a + b,
        Operation::Subtract => a - b,
        Operation::Multiply => a * b,
        Operation::Divide => {
            if b == 0.0 {
                return Err(ToolError::ExecutionFailed("Division by zero".to_string()));
            }
            a / b
        }
        Operation::Pow => a.powf(b),
    };
    if !result.is_finite() {
        return Err(ToolError::ExecutionFailed(format!(
            "Result is not a finite number: {}",
            result
        )));
    }
    Ok(result)
}

/// 整数结果不带小数点
fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

pub struct CalculatorTool;

#[async_trait]
impl Tool for CalculatorTool {
    fn name(&self) -> &str {
        "execute_calculation"
    }

    fn description(&self) -> &str {
        "Executes basic arithmetic (add, subtract, multiply, divide, pow). Example: 15% of 200 -> operation='multiply', operand_a=200, operand_b=0.15."
    }

    fn parameters_schema(&self) -> Value {
        parameters_for::<CalculationArgs>()
    }

    async fn execute(&self, args: Value) -> Result<String, ToolError> {
        let args: CalculationArgs = parse_args(args)?;
        calculate(args.operation, args.operand_a, args.operand_b).map(format_number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_percentage_via_multiply() {
        let out = CalculatorTool
            .execute(json!({"operation": "multiply", "operand_a": 500, "operand_b": 0.15}))
            .await
            .unwrap();
        assert_eq!(out, "75");
    }

    #[tokio::test]
    async fn test_pow_and_fraction() {
        let out = CalculatorTool
            .execute(json!({"operation": "pow", "operand_a": 2, "operand_b": 10}))
            .await
            .unwrap();
        assert_eq!(out, "1024");
        let out = CalculatorTool
            .execute(json!({"operation": "divide", "operand_a": 1, "operand_b": 4}))
            .await
            .unwrap();
        assert_eq!(out, "0.25");
    }

    #[tokio::test]
    async fn test_divide_by_zero_is_error() {
        let err = CalculatorTool
            .execute(json!({"operation": "divide", "operand_a": 10, "operand_b": 0}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Division by zero"));
    }

    #[tokio::test]
    async fn test_unknown_operation_is_invalid_arguments() {
        let err = CalculatorTool
            .execute(json!({"operation": "modulo", "operand_a": 1, "operand_b": 2}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[test]
    fn test_schema_enumerates_operations() {
        let schema = CalculatorTool.parameters_schema();
        let text = schema.to_string();
        assert!(text.contains("multiply"));
        assert!(text.contains("operand_a"));
    }
}
