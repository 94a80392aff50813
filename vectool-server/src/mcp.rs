//! JSON-RPC 2.0 dispatch for the Model Context Protocol methods the server
//! answers. Transport-agnostic: callers hand in one decoded message and
//! write back whatever comes out.

use serde::Deserialize;
use serde_json::{Value, json};
use vectool_core::tool::{ToolRegistry, is_error_result};

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;

const DEFAULT_PROTOCOL_VERSION: &str = "2024-11-05";
const HELP_PROMPT: &str = "vectool_help";

const HELP_TEXT: &str = "I can help you with vector database operations:

1. Table management:
   - 'create_table' creates a table sized for the configured embedding model
   - 'list_tables' lists every table with its row count
   - 'table_count' returns just the number of tables
   - 'table_details' describes a table's fields and vector width
   - 'table_stats' groups a table's fields into vector, text and other
   - 'delete_table' removes a table
   - Example: {\"table_name\": \"my_table\", \"schema\": {\"doc\": \"str\", \"vector\": \"Vector(384)\", \"category\": \"str\"}}

2. Document management:
   - 'ingest_docs' stores one document or a batch
   - 'update_documents' changes documents matching a filter
   - 'delete_documents' removes documents matching a filter
   - Example: {\"docs\": [\"Hello world\"], \"table_name\": \"my_table\"}

3. Search:
   - 'query_table' runs a plain vector search (top_k = 0 only checks for matches)
   - 'hybrid_search' adds a scalar filter, a metric and a distance ceiling
   - Metrics: cosine, dot, l2, euclidean, hamming
   - Example: {\"query\": \"Hello\", \"top_k\": 5, \"filter_expr\": \"year > 2020\"}

4. Maintenance:
   - 'optimize_table', 'table_versions' and 'index_stats'

Would you like to try any of these operations?";

#[derive(Debug, Deserialize)]
struct Request {
    #[serde(default)]
    id: Option<Value>,
    method: String,
    #[serde(default)]
    params: Option<Value>,
}

/// Serves MCP requests against a tool registry.
pub struct McpServer {
    registry: ToolRegistry,
}

impl McpServer {
    pub fn new(registry: ToolRegistry) -> Self {
        Self { registry }
    }

    /// Decode and answer one raw message. `None` means no reply is due.
    pub async fn handle_text(&self, raw: &str) -> Option<Value> {
        match serde_json::from_str::<Value>(raw) {
            Ok(message) => self.handle(message).await,
            Err(e) => {
                log::warn!("unparseable message: {e}");
                Some(error_response(Value::Null, PARSE_ERROR, &format!("Parse error: {e}")))
            }
        }
    }

    /// Answer one decoded message. Notifications (no `id`) never get a reply.
    pub async fn handle(&self, message: Value) -> Option<Value> {
        let request: Request = match serde_json::from_value(message) {
            Ok(r) => r,
            Err(e) => {
                return Some(error_response(Value::Null, INVALID_REQUEST, &format!("Invalid request: {e}")));
            }
        };

        let Some(id) = request.id else {
            log::debug!("notification {}", request.method);
            return None;
        };

        let params = request.params.unwrap_or(Value::Null);
        let outcome = match request.method.as_str() {
            "initialize" => Ok(initialize(&params)),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(json!({ "tools": self.registry.tool_definitions() })),
            "tools/call" => self.call_tool(&params).await,
            "prompts/list" => Ok(prompts_list()),
            "prompts/get" => prompts_get(&params),
            other => Err((METHOD_NOT_FOUND, format!("Method not found: {other}"))),
        };

        Some(match outcome {
            Ok(result) => json!({ "jsonrpc": "2.0", "id": id, "result": result }),
            Err((code, message)) => error_response(id, code, &message),
        })
    }

    async fn call_tool(&self, params: &Value) -> Result<Value, (i64, String)> {
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| (INVALID_PARAMS, "tools/call requires a 'name' string".to_string()))?;
        let arguments = match params.get("arguments") {
            None | Some(Value::Null) => json!({}),
            Some(args @ Value::Object(_)) => args.clone(),
            Some(_) => return Err((INVALID_PARAMS, "'arguments' must be an object".to_string())),
        };

        log::info!("tools/call {name}");
        let result = self
            .registry
            .call(name, arguments)
            .await
            .ok_or_else(|| (INVALID_PARAMS, format!("Unknown tool: {name}")))?;

        let is_error = is_error_result(&result);
        let text = match result {
            Value::String(s) => s,
            other => serde_json::to_string_pretty(&other).unwrap_or_else(|_| other.to_string()),
        };
        Ok(json!({
            "content": [{ "type": "text", "text": text }],
            "isError": is_error,
        }))
    }
}

fn initialize(params: &Value) -> Value {
    let version = params
        .get("protocolVersion")
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_PROTOCOL_VERSION);
    json!({
        "protocolVersion": version,
        "capabilities": {
            "tools": { "listChanged": false },
            "prompts": { "listChanged": false }
        },
        "serverInfo": {
            "name": "vectool",
            "version": env!("CARGO_PKG_VERSION")
        }
    })
}

fn prompts_list() -> Value {
    json!({
        "prompts": [{
            "name": HELP_PROMPT,
            "description": "How to use the vector database tools",
            "arguments": []
        }]
    })
}

fn prompts_get(params: &Value) -> Result<Value, (i64, String)> {
    match params.get("name").and_then(Value::as_str) {
        Some(HELP_PROMPT) => Ok(json!({
            "description": "How to use the vector database tools",
            "messages": [{
                "role": "user",
                "content": { "type": "text", "text": HELP_TEXT }
            }]
        })),
        Some(other) => Err((INVALID_PARAMS, format!("Unknown prompt: {other}"))),
        None => Err((INVALID_PARAMS, "prompts/get requires a 'name' string".to_string())),
    }
}

pub fn error_response(id: Value, code: i64, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message }
    })
}
