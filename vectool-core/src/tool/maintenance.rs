use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::{Value, json};

use crate::context::DbContext;
use crate::error::ToolError;
use crate::optimize;

use super::{ErrorStyle, Tool, blocking, required_str, to_json};

fn table_name_schema(description: &str) -> Value {
    json!({
        "type": "object",
        "properties": {
            "table_name": { "type": "string", "description": description }
        },
        "required": ["table_name"]
    })
}

pub struct OptimizeTableTool {
    ctx: Arc<DbContext>,
}

impl OptimizeTableTool {
    pub fn new(ctx: Arc<DbContext>) -> Self {
        Self { ctx }
    }
}

impl Tool for OptimizeTableTool {
    fn name(&self) -> &str {
        "optimize_table"
    }

    fn description(&self) -> &str {
        "Build missing indices, compact storage and report performance recommendations"
    }

    fn input_schema(&self) -> Value {
        table_name_schema("Table to optimize")
    }

    fn error_style(&self) -> ErrorStyle {
        ErrorStyle::Object
    }

    fn execute(&self, input: Value) -> Pin<Box<dyn Future<Output = Result<Value, ToolError>> + Send + '_>> {
        Box::pin(async move {
            let name = required_str(&input, "table_name")?.to_string();
            let report = blocking(&self.ctx, move |ctx| optimize::optimize_table(ctx, &name)).await?;
            to_json(&report)
        })
    }
}

pub struct TableVersionsTool {
    ctx: Arc<DbContext>,
}

impl TableVersionsTool {
    pub fn new(ctx: Arc<DbContext>) -> Self {
        Self { ctx }
    }
}

impl Tool for TableVersionsTool {
    fn name(&self) -> &str {
        "table_versions"
    }

    fn description(&self) -> &str {
        "List a table's versions, removing the oldest beyond the configured limit when cleanup is enabled"
    }

    fn input_schema(&self) -> Value {
        table_name_schema("Table whose versions to manage")
    }

    fn error_style(&self) -> ErrorStyle {
        ErrorStyle::Object
    }

    fn execute(&self, input: Value) -> Pin<Box<dyn Future<Output = Result<Value, ToolError>> + Send + '_>> {
        Box::pin(async move {
            let name = required_str(&input, "table_name")?.to_string();
            let report = blocking(&self.ctx, move |ctx| optimize::manage_versions(ctx, &name)).await?;
            to_json(&report)
        })
    }
}

pub struct IndexStatsTool {
    ctx: Arc<DbContext>,
}

impl IndexStatsTool {
    pub fn new(ctx: Arc<DbContext>) -> Self {
        Self { ctx }
    }
}

impl Tool for IndexStatsTool {
    fn name(&self) -> &str {
        "index_stats"
    }

    fn description(&self) -> &str {
        "Show a table's indices, how many rows they leave uncovered and what to improve"
    }

    fn input_schema(&self) -> Value {
        table_name_schema("Table to inspect")
    }

    fn error_style(&self) -> ErrorStyle {
        ErrorStyle::Object
    }

    fn execute(&self, input: Value) -> Pin<Box<dyn Future<Output = Result<Value, ToolError>> + Send + '_>> {
        Box::pin(async move {
            let name = required_str(&input, "table_name")?.to_string();
            let stats = blocking(&self.ctx, move |ctx| optimize::index_stats(ctx, &name)).await?;
            to_json(&stats)
        })
    }
}
