pub mod documents;
pub mod maintenance;
pub mod search;
pub mod tables;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::context::DbContext;
use crate::error::ToolError;

/// How a failed call is rendered for the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorStyle {
    /// `"Error: ..."` (or `"Warning: ..."`) string.
    Text,
    /// `{"error": "..."}` object.
    Object,
}

/// A remotely callable operation over the vector database.
///
/// Implementors must be `Send + Sync` so they can be stored in the registry
/// and invoked from async transport handlers.
pub trait Tool: Send + Sync {
    /// Unique name of the tool, as listed to clients.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema describing the expected arguments.
    fn input_schema(&self) -> Value;

    fn error_style(&self) -> ErrorStyle {
        ErrorStyle::Text
    }

    fn execute(&self, input: Value) -> Pin<Box<dyn Future<Output = Result<Value, ToolError>> + Send + '_>>;
}

/// Registry of all available tools, looked up by name on each call.
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Overwrites any existing tool with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.insert(tool.name().to_owned(), tool);
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    /// All registered tools, sorted by name.
    pub fn list(&self) -> Vec<&dyn Tool> {
        let mut tools: Vec<&dyn Tool> = self.tools.values().map(|t| t.as_ref()).collect();
        tools.sort_by(|a, b| a.name().cmp(b.name()));
        tools
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// MCP `tools/list` entries: `{"name", "description", "inputSchema"}`.
    pub fn tool_definitions(&self) -> Vec<Value> {
        self.list()
            .into_iter()
            .map(|tool| {
                serde_json::json!({
                    "name": tool.name(),
                    "description": tool.description(),
                    "inputSchema": tool.input_schema(),
                })
            })
            .collect()
    }

    /// Run `name` and render the outcome; `None` when no such tool exists.
    ///
    /// Failures never escape: they come back rendered in the tool's error style.
    pub async fn call(&self, name: &str, input: Value) -> Option<Value> {
        let tool = self.get(name)?;
        log::debug!("calling tool {name}");
        let rendered = match tool.execute(input).await {
            Ok(value) => value,
            Err(e) => {
                log::warn!("tool {name} failed: {e}");
                render_error(&e, tool.error_style())
            }
        };
        Some(rendered)
    }
}

pub fn render_error(err: &ToolError, style: ErrorStyle) -> Value {
    match style {
        ErrorStyle::Text => Value::String(err.to_response()),
        ErrorStyle::Object => serde_json::json!({ "error": err.to_string() }),
    }
}

/// True when a rendered tool result reports a failure.
pub fn is_error_result(value: &Value) -> bool {
    match value {
        Value::String(s) => s.starts_with("Error:") || s.starts_with("Warning:"),
        Value::Object(map) => map.contains_key("error"),
        _ => false,
    }
}

/// Build the registry with every database tool over one shared context.
pub fn build_registry(ctx: Arc<DbContext>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    registry.register(Box::new(tables::CreateTableTool::new(ctx.clone())));
    registry.register(Box::new(tables::DeleteTableTool::new(ctx.clone())));
    registry.register(Box::new(tables::ListTablesTool::new(ctx.clone())));
    registry.register(Box::new(tables::TableCountTool::new(ctx.clone())));
    registry.register(Box::new(tables::TableDetailsTool::new(ctx.clone())));
    registry.register(Box::new(tables::TableStatsTool::new(ctx.clone())));

    registry.register(Box::new(documents::IngestDocsTool::new(ctx.clone())));
    registry.register(Box::new(documents::UpdateDocumentsTool::new(ctx.clone())));
    registry.register(Box::new(documents::DeleteDocumentsTool::new(ctx.clone())));

    registry.register(Box::new(search::QueryTableTool::new(ctx.clone())));
    registry.register(Box::new(search::HybridSearchTool::new(ctx.clone())));

    registry.register(Box::new(maintenance::OptimizeTableTool::new(ctx.clone())));
    registry.register(Box::new(maintenance::TableVersionsTool::new(ctx.clone())));
    registry.register(Box::new(maintenance::IndexStatsTool::new(ctx)));

    registry
}

/// Run a blocking database operation off the async runtime.
pub(crate) async fn blocking<T, F>(ctx: &Arc<DbContext>, op: F) -> Result<T, ToolError>
where
    T: Send + 'static,
    F: FnOnce(&DbContext) -> Result<T, ToolError> + Send + 'static,
{
    let ctx = Arc::clone(ctx);
    tokio::task::spawn_blocking(move || op(&ctx))
        .await
        .map_err(|e| ToolError::Engine(format!("operation did not complete: {e}")))?
}

pub(crate) fn to_json<T: Serialize>(value: &T) -> Result<Value, ToolError> {
    serde_json::to_value(value).map_err(|e| ToolError::Engine(format!("failed to encode result: {e}")))
}

fn present<'a>(input: &'a Value, key: &str) -> Option<&'a Value> {
    input.get(key).filter(|v| !v.is_null())
}

fn wrong_type(key: &str, expected: &str) -> ToolError {
    ToolError::InvalidInput(format!("field '{key}' must be {expected}"))
}

pub(crate) fn required_str<'a>(input: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    match present(input, key) {
        None => Err(ToolError::InvalidInput(format!("missing required field: {key}"))),
        Some(v) => v.as_str().ok_or_else(|| wrong_type(key, "a string")),
    }
}

pub(crate) fn optional_str<'a>(input: &'a Value, key: &str) -> Result<Option<&'a str>, ToolError> {
    present(input, key)
        .map(|v| v.as_str().ok_or_else(|| wrong_type(key, "a string")))
        .transpose()
}

pub(crate) fn optional_bool(input: &Value, key: &str, default: bool) -> Result<bool, ToolError> {
    present(input, key).map_or(Ok(default), |v| v.as_bool().ok_or_else(|| wrong_type(key, "a boolean")))
}

pub(crate) fn optional_i64(input: &Value, key: &str, default: i64) -> Result<i64, ToolError> {
    present(input, key).map_or(Ok(default), |v| v.as_i64().ok_or_else(|| wrong_type(key, "an integer")))
}

pub(crate) fn optional_f64(input: &Value, key: &str) -> Result<Option<f64>, ToolError> {
    present(input, key)
        .map(|v| v.as_f64().ok_or_else(|| wrong_type(key, "a number")))
        .transpose()
}

pub(crate) fn optional_object<'a>(input: &'a Value, key: &str) -> Result<Option<&'a Map<String, Value>>, ToolError> {
    present(input, key)
        .map(|v| v.as_object().ok_or_else(|| wrong_type(key, "an object")))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::test_context;
    use serde_json::json;

    struct EchoTool;

    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echo a value back"
        }

        fn input_schema(&self) -> Value {
            json!({
                "type": "object",
                "properties": { "value": { "type": "string" } },
                "required": ["value"]
            })
        }

        fn execute(&self, input: Value) -> Pin<Box<dyn Future<Output = Result<Value, ToolError>> + Send + '_>> {
            Box::pin(async move {
                let value = required_str(&input, "value")?;
                Ok(json!({ "echo": value }))
            })
        }
    }

    struct FailingTool;

    impl Tool for FailingTool {
        fn name(&self) -> &str {
            "failing"
        }

        fn description(&self) -> &str {
            "Always fails"
        }

        fn input_schema(&self) -> Value {
            json!({ "type": "object", "properties": {} })
        }

        fn error_style(&self) -> ErrorStyle {
            ErrorStyle::Object
        }

        fn execute(&self, _input: Value) -> Pin<Box<dyn Future<Output = Result<Value, ToolError>> + Send + '_>> {
            Box::pin(async { Err(ToolError::Engine("boom".into())) })
        }
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(FailingTool));
        registry.register(Box::new(EchoTool));
        registry
    }

    #[test]
    fn lookup_and_listing() {
        let registry = registry();
        assert!(registry.get("echo").is_some());
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.len(), 2);
        let names: Vec<&str> = registry.list().iter().map(|t| t.name()).collect();
        assert_eq!(names, vec!["echo", "failing"]);
    }

    #[test]
    fn definitions_use_mcp_shape() {
        let defs = registry().tool_definitions();
        assert_eq!(defs[0]["name"], "echo");
        assert_eq!(defs[0]["description"], "Echo a value back");
        assert_eq!(defs[0]["inputSchema"]["type"], "object");
    }

    #[tokio::test]
    async fn call_renders_success_and_errors() {
        let registry = registry();
        assert_eq!(registry.call("echo", json!({"value": "hi"})).await, Some(json!({"echo": "hi"})));

        let missing = registry.call("echo", json!({})).await.unwrap();
        assert_eq!(missing, json!("Error: missing required field: value"));
        assert!(is_error_result(&missing));

        let failed = registry.call("failing", json!({})).await.unwrap();
        assert_eq!(failed, json!({"error": "boom"}));
        assert!(is_error_result(&failed));

        assert!(registry.call("nope", json!({})).await.is_none());
    }

    #[test]
    fn argument_helpers_check_types() {
        let input = json!({"s": "x", "n": 3, "b": true, "f": 0.5, "o": {}, "z": null});
        assert_eq!(required_str(&input, "s").unwrap(), "x");
        assert!(required_str(&input, "z").is_err());
        assert!(required_str(&input, "n").is_err());
        assert_eq!(optional_str(&input, "z").unwrap(), None);
        assert_eq!(optional_i64(&input, "n", 5).unwrap(), 3);
        assert_eq!(optional_i64(&input, "missing", 5).unwrap(), 5);
        assert!(optional_i64(&input, "s", 5).is_err());
        assert!(optional_bool(&input, "b", false).unwrap());
        assert_eq!(optional_f64(&input, "f").unwrap(), Some(0.5));
        assert!(optional_object(&input, "o").unwrap().is_some());
        assert!(optional_object(&input, "s").is_err());
    }

    #[test]
    fn registry_exposes_every_database_tool() {
        let registry = build_registry(Arc::new(test_context()));
        let names: Vec<&str> = registry.list().iter().map(|t| t.name()).collect();
        assert_eq!(
            names,
            vec![
                "create_table",
                "delete_documents",
                "delete_table",
                "hybrid_search",
                "index_stats",
                "ingest_docs",
                "list_tables",
                "optimize_table",
                "query_table",
                "table_count",
                "table_details",
                "table_stats",
                "table_versions",
                "update_documents",
            ]
        );
        for def in registry.tool_definitions() {
            assert_eq!(def["inputSchema"]["type"], "object", "{}", def["name"]);
        }
    }
}
