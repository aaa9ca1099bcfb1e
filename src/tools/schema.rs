//! 工具参数 JSON Schema 生成（schemars）与参数解析
//!
//! 每个内置工具用一个 `#[derive(Deserialize, JsonSchema)]` 结构描述参数，
//! parameters_for 生成导出给 LLM 的 schema，parse_args 把调用参数反序列化为该结构。

use schemars::{schema_for, JsonSchema};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::tools::ToolError;

/// 由参数结构生成 schema（去掉 $schema / title，与函数调用格式保持一致）
pub fn parameters_for<T: JsonSchema>() -> Value {
    let schema = schema_for!(T);
    let mut value = serde_json::to_value(&schema).unwrap_or_else(|_| serde_json::json!({}));
    if let Some(obj) = value.as_object_mut() {
        obj.remove("$schema");
        obj.remove("title");
    }
    value
}

/// 解析调用参数；字符串形式的 JSON（模型偶尔会返回）也接受
pub fn parse_args<T: DeserializeOwned>(args: Value) -> Result<T, ToolError> {
    let args = match args {
        Value::String(s) => serde_json::from_str(&s)
            .map_err(|e| ToolError::InvalidArguments(format!("arguments are not valid JSON: {}", e)))?,
        Value::Null => Value::Object(Default::default()),
        other => other,
    };
    serde_json::from_value(args).map_err(|e| ToolError::InvalidArguments(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[allow(dead_code)]
    #[derive(Deserialize, JsonSchema)]
    struct PathArgs {
        /// 相对路径
        path: String,
    }

    #[test]
    fn test_parameters_schema_lists_required_fields() {
        let v = parameters_for::<PathArgs>();
        assert_eq!(v["type"], "object");
        assert!(v["properties"]["path"].is_object());
        assert_eq!(v["required"], json!(["path"]));
        assert!(v.get("$schema").is_none());
    }

    #[test]
    fn test_parse_args_accepts_stringified_json() {
        let a: PathArgs = parse_args(json!("{\"path\": \"a.txt\"}")).unwrap();
        assert_eq!(a.path, "a.txt");
    }

    #[test]
    fn test_parse_args_reports_missing_field() {
        let err = parse_args::<PathArgs>(json!({})).err().unwrap();
        assert!(matches!(err, ToolError::InvalidArguments(ref m) if m.contains("path")));
    }
}
