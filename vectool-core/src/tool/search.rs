use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::{Value, json};

use crate::context::DbContext;
use crate::engine::SUPPORTED_METRICS;
use crate::error::ToolError;
use crate::ops::search::{self, HybridRequest};

use super::{Tool, blocking, optional_bool, optional_f64, optional_i64, optional_str, required_str, to_json};

const DEFAULT_TOP_K: i64 = 5;

pub struct QueryTableTool {
    ctx: Arc<DbContext>,
}

impl QueryTableTool {
    pub fn new(ctx: Arc<DbContext>) -> Self {
        Self { ctx }
    }
}

impl Tool for QueryTableTool {
    fn name(&self) -> &str {
        "query_table"
    }

    fn description(&self) -> &str {
        "Find the documents most similar to a query. With top_k = 0 returns only whether any \
         document matches"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Text to search for" },
                "table_name": { "type": "string", "description": "Table to search; defaults to the configured table" },
                "top_k": { "type": "integer", "minimum": 0, "default": DEFAULT_TOP_K },
                "query_type": { "type": "string", "enum": ["vector"], "default": "vector" },
                "auto_create_table": { "type": "boolean", "default": false }
            },
            "required": ["query"]
        })
    }

    fn execute(&self, input: Value) -> Pin<Box<dyn Future<Output = Result<Value, ToolError>> + Send + '_>> {
        Box::pin(async move {
            let query = required_str(&input, "query")?.to_string();
            let table = optional_str(&input, "table_name")?.map(str::to_string);
            let top_k = optional_i64(&input, "top_k", DEFAULT_TOP_K)?;
            let auto_create = optional_bool(&input, "auto_create_table", false)?;
            let query_type = optional_str(&input, "query_type")?.unwrap_or("vector");
            if !query_type.eq_ignore_ascii_case("vector") {
                return Err(ToolError::InvalidInput(format!(
                    "Unsupported query_type '{query_type}'. Only 'vector' is supported"
                )));
            }

            let outcome = blocking(&self.ctx, move |ctx| {
                search::query(ctx, &query, table.as_deref(), top_k, auto_create)
            })
            .await?;
            to_json(&outcome)
        })
    }
}

pub struct HybridSearchTool {
    ctx: Arc<DbContext>,
}

impl HybridSearchTool {
    pub fn new(ctx: Arc<DbContext>) -> Self {
        Self { ctx }
    }
}

impl Tool for HybridSearchTool {
    fn name(&self) -> &str {
        "hybrid_search"
    }

    fn description(&self) -> &str {
        "Similarity search combined with a scalar filter and an optional distance ceiling. A \
         '_distance <= x' clause inside the filter also sets the ceiling"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Text to search for" },
                "table_name": { "type": "string", "description": "Table to search; defaults to the configured table" },
                "filter_expr": { "type": "string", "description": "SQL-style filter, e.g. \"year > 2020 AND _distance < 0.5\"" },
                "top_k": { "type": "integer", "minimum": 0, "default": DEFAULT_TOP_K },
                "metric": { "type": "string", "enum": SUPPORTED_METRICS, "default": "cosine" },
                "distance_threshold": { "type": "number", "description": "Drop results farther than this" },
                "auto_create_table": { "type": "boolean", "default": false }
            },
            "required": ["query"]
        })
    }

    fn execute(&self, input: Value) -> Pin<Box<dyn Future<Output = Result<Value, ToolError>> + Send + '_>> {
        Box::pin(async move {
            let query = required_str(&input, "query")?.to_string();
            let table = optional_str(&input, "table_name")?.map(str::to_string);
            let filter = optional_str(&input, "filter_expr")?.map(str::to_string);
            let metric = optional_str(&input, "metric")?.unwrap_or("cosine").to_string();
            let top_k = optional_i64(&input, "top_k", DEFAULT_TOP_K)?;
            let distance_threshold = optional_f64(&input, "distance_threshold")?;
            let auto_create = optional_bool(&input, "auto_create_table", false)?;

            let outcome = blocking(&self.ctx, move |ctx| {
                search::hybrid(
                    ctx,
                    &HybridRequest {
                        query: &query,
                        table_name: table.as_deref(),
                        filter: filter.as_deref(),
                        top_k,
                        metric: &metric,
                        distance_threshold,
                        auto_create,
                    },
                )
            })
            .await?;
            to_json(&outcome)
        })
    }
}
