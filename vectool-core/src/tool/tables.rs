use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::{Value, json};

use crate::context::DbContext;
use crate::error::ToolError;
use crate::ops::tables;

use super::{ErrorStyle, Tool, blocking, optional_object, optional_str, required_str, to_json};

pub struct CreateTableTool {
    ctx: Arc<DbContext>,
}

impl CreateTableTool {
    pub fn new(ctx: Arc<DbContext>) -> Self {
        Self { ctx }
    }
}

impl Tool for CreateTableTool {
    fn name(&self) -> &str {
        "create_table"
    }

    fn description(&self) -> &str {
        "Create a table. Without a schema it holds a 'doc' text field and a 'vector' field sized for \
         the embedding model; a schema maps field names to types and must include 'doc' and 'vector'"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "table_name": { "type": "string", "description": "Name of the table to create" },
                "schema": {
                    "type": "object",
                    "description": "Optional field map, e.g. {\"doc\": \"str\", \"vector\": \"Vector(384)\", \"year\": \"int\"}",
                    "additionalProperties": { "type": "string" }
                }
            },
            "required": ["table_name"]
        })
    }

    fn execute(&self, input: Value) -> Pin<Box<dyn Future<Output = Result<Value, ToolError>> + Send + '_>> {
        Box::pin(async move {
            let name = required_str(&input, "table_name")?.to_string();
            let schema = optional_object(&input, "schema")?.cloned();
            let message = blocking(&self.ctx, move |ctx| tables::create_table(ctx, &name, schema.as_ref())).await?;
            Ok(Value::String(message))
        })
    }
}

pub struct DeleteTableTool {
    ctx: Arc<DbContext>,
}

impl DeleteTableTool {
    pub fn new(ctx: Arc<DbContext>) -> Self {
        Self { ctx }
    }
}

impl Tool for DeleteTableTool {
    fn name(&self) -> &str {
        "delete_table"
    }

    fn description(&self) -> &str {
        "Delete a table and all of its documents, verifying that it is gone"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "table_name": { "type": "string", "description": "Name of the table to delete" }
            },
            "required": ["table_name"]
        })
    }

    fn execute(&self, input: Value) -> Pin<Box<dyn Future<Output = Result<Value, ToolError>> + Send + '_>> {
        Box::pin(async move {
            let name = required_str(&input, "table_name")?.to_string();
            let message = blocking(&self.ctx, move |ctx| tables::delete_table(ctx, &name)).await?;
            Ok(Value::String(message))
        })
    }
}

pub struct ListTablesTool {
    ctx: Arc<DbContext>,
}

impl ListTablesTool {
    pub fn new(ctx: Arc<DbContext>) -> Self {
        Self { ctx }
    }
}

impl Tool for ListTablesTool {
    fn name(&self) -> &str {
        "list_tables"
    }

    fn description(&self) -> &str {
        "List every table with its row count"
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    fn error_style(&self) -> ErrorStyle {
        ErrorStyle::Object
    }

    fn execute(&self, _input: Value) -> Pin<Box<dyn Future<Output = Result<Value, ToolError>> + Send + '_>> {
        Box::pin(async move {
            let list = blocking(&self.ctx, tables::list_tables).await?;
            to_json(&list)
        })
    }
}

pub struct TableCountTool {
    ctx: Arc<DbContext>,
}

impl TableCountTool {
    pub fn new(ctx: Arc<DbContext>) -> Self {
        Self { ctx }
    }
}

impl Tool for TableCountTool {
    fn name(&self) -> &str {
        "table_count"
    }

    fn description(&self) -> &str {
        "Count the tables in the database without opening them"
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    fn error_style(&self) -> ErrorStyle {
        ErrorStyle::Object
    }

    fn execute(&self, _input: Value) -> Pin<Box<dyn Future<Output = Result<Value, ToolError>> + Send + '_>> {
        Box::pin(async move {
            let count = blocking(&self.ctx, tables::table_count).await?;
            let plural = if count == 1 { "" } else { "s" };
            Ok(json!({
                "count": count,
                "message": format!("Database contains {count} table{plural}"),
            }))
        })
    }
}

pub struct TableDetailsTool {
    ctx: Arc<DbContext>,
}

impl TableDetailsTool {
    pub fn new(ctx: Arc<DbContext>) -> Self {
        Self { ctx }
    }
}

impl Tool for TableDetailsTool {
    fn name(&self) -> &str {
        "table_details"
    }

    fn description(&self) -> &str {
        "Describe a table: row count, fields with their types and the vector width"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "table_name": { "type": "string", "description": "Table to describe; defaults to the configured table" }
            }
        })
    }

    fn execute(&self, input: Value) -> Pin<Box<dyn Future<Output = Result<Value, ToolError>> + Send + '_>> {
        Box::pin(async move {
            let name = optional_str(&input, "table_name")?.map(str::to_string);
            let details = blocking(&self.ctx, move |ctx| tables::table_details(ctx, name.as_deref())).await?;
            to_json(&details)
        })
    }
}

pub struct TableStatsTool {
    ctx: Arc<DbContext>,
}

impl TableStatsTool {
    pub fn new(ctx: Arc<DbContext>) -> Self {
        Self { ctx }
    }
}

impl Tool for TableStatsTool {
    fn name(&self) -> &str {
        "table_stats"
    }

    fn description(&self) -> &str {
        "Table statistics with fields grouped into vector, text and other categories"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "table_name": { "type": "string", "description": "Table to analyze; defaults to the configured table" }
            }
        })
    }

    fn execute(&self, input: Value) -> Pin<Box<dyn Future<Output = Result<Value, ToolError>> + Send + '_>> {
        Box::pin(async move {
            let name = optional_str(&input, "table_name")?.map(str::to_string);
            let stats = blocking(&self.ctx, move |ctx| tables::table_stats(ctx, name.as_deref())).await?;
            to_json(&stats)
        })
    }
}
