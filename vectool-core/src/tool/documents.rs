use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::{Value, json};

use crate::context::DbContext;
use crate::error::ToolError;
use crate::ops::documents;

use super::{Tool, blocking, optional_bool, optional_object, optional_str, required_str};

pub struct IngestDocsTool {
    ctx: Arc<DbContext>,
}

impl IngestDocsTool {
    pub fn new(ctx: Arc<DbContext>) -> Self {
        Self { ctx }
    }
}

impl Tool for IngestDocsTool {
    fn name(&self) -> &str {
        "ingest_docs"
    }

    fn description(&self) -> &str {
        "Embed and store documents. Accepts one string or a list of strings; blank entries are skipped"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "docs": {
                    "oneOf": [
                        { "type": "string" },
                        { "type": "array", "items": { "type": "string" } }
                    ],
                    "description": "Document text or list of document texts"
                },
                "table_name": { "type": "string", "description": "Target table; defaults to the configured table" },
                "auto_create_table": {
                    "type": "boolean",
                    "default": true,
                    "description": "Create the table with the default schema if it does not exist"
                }
            },
            "required": ["docs"]
        })
    }

    fn execute(&self, input: Value) -> Pin<Box<dyn Future<Output = Result<Value, ToolError>> + Send + '_>> {
        Box::pin(async move {
            let docs = input
                .get("docs")
                .cloned()
                .ok_or_else(|| ToolError::InvalidInput("missing required field: docs".into()))?;
            let table = optional_str(&input, "table_name")?.map(str::to_string);
            let auto_create = optional_bool(&input, "auto_create_table", true)?;
            let message = blocking(&self.ctx, move |ctx| {
                documents::ingest(ctx, table.as_deref(), &docs, auto_create)
            })
            .await?;
            Ok(Value::String(message))
        })
    }
}

pub struct UpdateDocumentsTool {
    ctx: Arc<DbContext>,
}

impl UpdateDocumentsTool {
    pub fn new(ctx: Arc<DbContext>) -> Self {
        Self { ctx }
    }
}

impl Tool for UpdateDocumentsTool {
    fn name(&self) -> &str {
        "update_documents"
    }

    fn description(&self) -> &str {
        "Set field values on documents matching a filter. Changing 'doc' re-embeds the document"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "table_name": { "type": "string" },
                "filter_expr": { "type": "string", "description": "SQL-style filter, e.g. \"category = 'news'\"" },
                "updates": { "type": "object", "description": "Field values to set" }
            },
            "required": ["table_name", "filter_expr", "updates"]
        })
    }

    fn execute(&self, input: Value) -> Pin<Box<dyn Future<Output = Result<Value, ToolError>> + Send + '_>> {
        Box::pin(async move {
            let table = required_str(&input, "table_name")?.to_string();
            let filter = required_str(&input, "filter_expr")?.to_string();
            let updates = optional_object(&input, "updates")?
                .cloned()
                .ok_or_else(|| ToolError::InvalidInput("missing required field: updates".into()))?;
            let message = blocking(&self.ctx, move |ctx| documents::update(ctx, &table, &filter, &updates)).await?;
            Ok(Value::String(message))
        })
    }
}

pub struct DeleteDocumentsTool {
    ctx: Arc<DbContext>,
}

impl DeleteDocumentsTool {
    pub fn new(ctx: Arc<DbContext>) -> Self {
        Self { ctx }
    }
}

impl Tool for DeleteDocumentsTool {
    fn name(&self) -> &str {
        "delete_documents"
    }

    fn description(&self) -> &str {
        "Delete documents matching a filter. Filters matching every row are refused; use delete_table instead"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "table_name": { "type": "string" },
                "filter_expr": { "type": "string", "description": "SQL-style filter selecting the rows to delete" }
            },
            "required": ["table_name", "filter_expr"]
        })
    }

    fn execute(&self, input: Value) -> Pin<Box<dyn Future<Output = Result<Value, ToolError>> + Send + '_>> {
        Box::pin(async move {
            let table = required_str(&input, "table_name")?.to_string();
            let filter = required_str(&input, "filter_expr")?.to_string();
            let message = blocking(&self.ctx, move |ctx| documents::delete_documents(ctx, &table, &filter)).await?;
            Ok(Value::String(message))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::test_context;
    use crate::tool::build_registry;

    #[tokio::test]
    async fn ingest_update_delete_round() {
        let registry = build_registry(Arc::new(test_context()));

        let ingested = registry
            .call("ingest_docs", json!({"docs": ["alpha", "beta", "gamma"], "table_name": "notes"}))
            .await
            .unwrap();
        assert_eq!(ingested, json!("Successfully ingested 3 documents into table 'Notes'"));

        let updated = registry
            .call(
                "update_documents",
                json!({"table_name": "notes", "filter_expr": "doc = 'beta'", "updates": {"doc": "delta"}}),
            )
            .await
            .unwrap();
        assert!(updated.as_str().unwrap().contains("updated 1 documents"), "{updated}");

        let refused = registry
            .call("delete_documents", json!({"table_name": "notes", "filter_expr": "1=1"}))
            .await
            .unwrap();
        assert!(refused.as_str().unwrap().starts_with("Warning:"));

        let deleted = registry
            .call("delete_documents", json!({"table_name": "notes", "filter_expr": "doc = 'delta'"}))
            .await
            .unwrap();
        assert_eq!(deleted, json!("Successfully deleted 1 documents from table 'Notes'"));
    }

    #[tokio::test]
    async fn ingest_respects_auto_create_flag() {
        let registry = build_registry(Arc::new(test_context()));
        let out = registry
            .call("ingest_docs", json!({"docs": "text", "table_name": "absent", "auto_create_table": false}))
            .await
            .unwrap();
        assert!(out.as_str().unwrap().starts_with("Error: Table 'absent' does not exist"));
    }

    #[tokio::test]
    async fn update_requires_updates_object() {
        let registry = build_registry(Arc::new(test_context()));
        let out = registry
            .call("update_documents", json!({"table_name": "t", "filter_expr": "a = 1"}))
            .await
            .unwrap();
        assert_eq!(out, json!("Error: missing required field: updates"));
    }
}
