use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::context::DbContext;
use crate::engine::Table;
use crate::error::ToolError;
use crate::optimize::optimize_table;
use crate::retry::CreateStatus;
use crate::sanitize::sanitize_table_name;
use crate::schema::{DOC_FIELD, FieldKind, SchemaDef, TableSchema};

use super::find_table;

/// Existence re-checks after a drop before falling back to clearing rows.
const DROP_VERIFY_ATTEMPTS: usize = 3;

/// Create a table with the default document/vector schema or a `{field: type}` map.
///
/// A freshly created table is optimized when index creation or storage
/// optimization is enabled; failures there never fail the create.
pub fn create_table(ctx: &DbContext, name: &str, schema: Option<&Map<String, Value>>) -> Result<String, ToolError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ToolError::InvalidInput("Table name must not be empty".into()));
    }
    let def = match schema.filter(|s| !s.is_empty()) {
        Some(spec) => {
            let columnar = TableSchema::from_spec(spec, ctx.embedder().dimensions())
                .map_err(|e| ToolError::InvalidInput(format!("Invalid schema: {e}")))?;
            SchemaDef::Columnar(columnar)
        }
        None => SchemaDef::default_for(ctx.embedder().clone()),
    };

    log::info!("creating table {name}");
    let created = ctx.create_table_with_retry(name, &def, ctx.retry().max_retries)?;
    let mut message = created.message;

    let settings = &ctx.config().optimization;
    if created.status == CreateStatus::Created && (settings.auto_create_indices || settings.auto_optimize) {
        match optimize_table(ctx, &created.name) {
            Ok(report) if report.applied() > 0 => {
                message.push_str(&format!(
                    " Optimizations applied: {} performance enhancements.",
                    report.applied()
                ));
            }
            Ok(_) => {}
            Err(e) => {
                log::warn!("table {} created but optimization failed: {e}", created.name);
                message.push_str(" (optimization skipped due to error)");
            }
        }
    }
    Ok(message)
}

/// Drop a table and confirm it is gone.
///
/// A table still listed after the drop has its rows cleared and is dropped
/// once more; if it survives that too the delete is reported as failed.
pub fn delete_table(ctx: &DbContext, name: &str) -> Result<String, ToolError> {
    let found = find_table(ctx, name)?.ok_or_else(|| ToolError::table_not_found(name))?;
    let engine = ctx
        .connection()
        .map_err(|e| ToolError::engine("Failed to connect", e))?;

    let rows = match engine.open_table(&found).and_then(|t| t.count_rows(None)) {
        Ok(rows) => rows.to_string(),
        Err(e) => {
            log::warn!("could not count rows of {found} before deletion: {e}");
            "unknown".into()
        }
    };

    if let Err(e) = engine.drop_table(&found) {
        log::error!("drop_table({found}) failed, verifying anyway: {e}");
    }
    ctx.clear_table_cache(Some(&found));
    ctx.clear_table_cache(Some(&sanitize_table_name(name)));

    if is_gone(ctx, &found, DROP_VERIFY_ATTEMPTS) {
        log::info!("deleted table {found}");
        return Ok(format!("Table {name} deleted successfully (had {rows} rows)"));
    }

    log::error!("table {found} still listed after drop, clearing rows and retrying");
    let fallback = engine.open_table(&found).and_then(|table| {
        table.delete("1=1")?;
        engine.drop_table(&found)
    });
    ctx.clear_table_cache(Some(&found));
    match fallback {
        Ok(()) if is_gone(ctx, &found, 1) => {
            log::info!("deleted table {found} after clearing its rows");
            Ok(format!("Table {name} deleted successfully using alternative method"))
        }
        Ok(()) => Err(ToolError::DeletionFailure(format!(
            "Failed to delete table {found} - table still exists after deletion attempts"
        ))),
        Err(e) => Err(ToolError::DeletionFailure(format!(
            "Failed to delete table {found} - table still exists after deletion attempts: {e}"
        ))),
    }
}

fn is_gone(ctx: &DbContext, name: &str, attempts: usize) -> bool {
    for attempt in 0..attempts {
        match ctx.all_tables() {
            Ok(names) if !names.iter().any(|n| n == name) => return true,
            Ok(_) => log::debug!("{name} still listed (check {}/{attempts})", attempt + 1),
            Err(e) => log::warn!("could not list tables to verify deletion of {name}: {e}"),
        }
        if attempt + 1 < attempts {
            ctx.retry().pause(attempt);
        }
    }
    false
}

/// A row count, or why none could be taken.
#[derive(Debug, Clone, PartialEq)]
pub enum RowCount {
    Known(usize),
    Unknown,
    Inaccessible,
}

impl Serialize for RowCount {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Known(n) => serializer.serialize_u64(*n as u64),
            Self::Unknown => serializer.serialize_str("Unknown"),
            Self::Inaccessible => serializer.serialize_str("inaccessible"),
        }
    }
}

/// Count rows directly, else by scanning, else give up with `Unknown`.
pub fn row_count(table: &dyn Table) -> RowCount {
    match table.count_rows(None) {
        Ok(n) => RowCount::Known(n),
        Err(count_err) => match table.scan(None) {
            Ok(rows) => {
                log::debug!("count_rows on {} failed ({count_err}), counted by scan", table.name());
                RowCount::Known(rows.len())
            }
            Err(scan_err) => {
                log::warn!("all row counting methods failed for {}: {scan_err}", table.name());
                RowCount::Unknown
            }
        },
    }
}

#[derive(Debug, Serialize)]
pub struct TableEntry {
    pub name: String,
    pub num_rows: RowCount,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TableList {
    pub tables: Vec<TableEntry>,
    pub count: usize,
}

/// Every table with its row count; tables that cannot be opened are kept
/// and flagged as inaccessible.
pub fn list_tables(ctx: &DbContext) -> Result<TableList, ToolError> {
    let names = ctx
        .all_tables()
        .map_err(|e| ToolError::engine("Error listing tables", e))?;
    let engine = ctx
        .connection()
        .map_err(|e| ToolError::engine("Error listing tables", e))?;

    let tables: Vec<TableEntry> = names
        .into_iter()
        .map(|name| match engine.open_table(&name).and_then(|t| t.schema().map(|_| t)) {
            Ok(table) => TableEntry {
                num_rows: row_count(table.as_ref()),
                name,
                error: None,
            },
            Err(e) => {
                log::warn!("could not access table {name}: {e}");
                TableEntry {
                    name,
                    num_rows: RowCount::Inaccessible,
                    error: Some(e.to_string()),
                }
            }
        })
        .collect();
    log::info!("found {} tables", tables.len());
    Ok(TableList {
        count: tables.len(),
        tables,
    })
}

pub fn table_count(ctx: &DbContext) -> Result<usize, ToolError> {
    let count = ctx
        .all_tables()
        .map_err(|e| ToolError::engine("Error getting table count", e))?
        .len();
    log::info!("database holds {count} tables");
    Ok(count)
}

#[derive(Debug, Clone, Serialize)]
pub struct FieldInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub nullable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_dimensions: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<&'static str>,
}

#[derive(Debug, Serialize)]
pub struct TableDetails {
    pub name: String,
    pub num_rows: RowCount,
    pub fields: Vec<FieldInfo>,
    pub field_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_dimensions: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    pub embedding_model: String,
}

#[derive(Debug, Serialize)]
pub struct FieldSummary {
    pub total_fields: usize,
    pub vector_fields: usize,
    pub text_fields: usize,
    pub other_fields: usize,
}

#[derive(Debug, Serialize)]
pub struct TableStats {
    pub table_name: String,
    pub row_count: RowCount,
    pub vector_fields: Vec<FieldInfo>,
    pub text_fields: Vec<FieldInfo>,
    pub other_fields: Vec<FieldInfo>,
    pub field_summary: FieldSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
}

fn verified_table(ctx: &DbContext, name: Option<&str>) -> Result<(String, Arc<dyn Table>), ToolError> {
    let requested = ctx.table_name_or_default(name);
    let safe = sanitize_table_name(requested);
    let found = ctx
        .locate_table(requested, ctx.retry().max_retries)
        .or_else(|| ctx.locate_table(&safe, ctx.retry().max_retries))
        .ok_or_else(|| ToolError::TableNotFound {
            table: requested.to_string(),
            hint: Some("It may not be accessible yet".into()),
        })?;
    let table = ctx
        .table_cached(&found, false)
        .map_err(|e| ToolError::engine(&format!("Failed to open table '{found}'"), e))?;
    Ok((found, table))
}

fn describe(schema: &TableSchema) -> Vec<FieldInfo> {
    schema
        .fields
        .iter()
        .map(|f| FieldInfo {
            name: f.name.clone(),
            kind: f.kind.to_string(),
            nullable: f.nullable,
            vector_dimensions: f.kind.vector_width(),
            category: None,
        })
        .collect()
}

fn category(name: &str, kind: FieldKind) -> &'static str {
    match kind {
        FieldKind::Vector(_) => "vector",
        FieldKind::Text => "text",
        _ if [DOC_FIELD, "document", "text", "content"].contains(&name) => "text",
        FieldKind::Int => "integer",
        FieldKind::Float => "float",
        FieldKind::Bool => "boolean",
        FieldKind::Bytes | FieldKind::List => "other",
    }
}

pub fn table_details(ctx: &DbContext, name: Option<&str>) -> Result<TableDetails, ToolError> {
    let (found, table) = verified_table(ctx, name)?;
    let schema = table
        .schema()
        .map_err(|e| ToolError::engine(&format!("Error getting table details for '{found}'"), e))?;
    let version = match table.version() {
        Ok(v) => Some(v),
        Err(e) => {
            log::debug!("version of {found} unavailable: {e}");
            None
        }
    };
    let details = TableDetails {
        num_rows: row_count(table.as_ref()),
        fields: describe(&schema),
        field_count: schema.fields.len(),
        vector_dimensions: schema.vector_field().map(|(_, width)| width),
        version,
        embedding_model: ctx.embedder().model_name().to_string(),
        name: found,
    };
    log::info!("retrieved details for {} ({:?} rows)", details.name, details.num_rows);
    Ok(details)
}

pub fn table_stats(ctx: &DbContext, name: Option<&str>) -> Result<TableStats, ToolError> {
    let (found, table) = verified_table(ctx, name)?;
    let schema = table
        .schema()
        .map_err(|e| ToolError::engine(&format!("Error getting table statistics for '{found}'"), e))?;

    let mut vector_fields = Vec::new();
    let mut text_fields = Vec::new();
    let mut other_fields = Vec::new();
    for (field, mut info) in schema.fields.iter().zip(describe(&schema)) {
        let category = category(&field.name, field.kind);
        info.category = Some(category);
        match category {
            "vector" => vector_fields.push(info),
            "text" => text_fields.push(info),
            _ => other_fields.push(info),
        }
    }

    let last_modified = table.last_modified().unwrap_or_else(|e| {
        log::debug!("last modification time of {found} unavailable: {e}");
        None
    });
    Ok(TableStats {
        row_count: row_count(table.as_ref()),
        field_summary: FieldSummary {
            total_fields: schema.fields.len(),
            vector_fields: vector_fields.len(),
            text_fields: text_fields.len(),
            other_fields: other_fields.len(),
        },
        vector_fields,
        text_fields,
        other_fields,
        last_modified,
        table_name: found,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::documents::ingest;
    use crate::ops::search::{SearchOutcome, query};
    use crate::testutil::{FlakyConnector, flaky_context, hashing_context, mock_embedder, test_config, test_context};
    use serde_json::json;

    #[test]
    fn create_default_table_reports_optimizations() {
        let ctx = test_context();
        let msg = create_table(&ctx, "notes", None).unwrap();
        assert!(msg.starts_with("Table notes created successfully (stored as Notes)"), "got {msg}");
        assert!(msg.contains("Optimizations applied: 1 performance enhancements."), "got {msg}");
    }

    #[test]
    fn second_create_reports_existing_without_optimizing() {
        let ctx = test_context();
        create_table(&ctx, "Notes", None).unwrap();
        let msg = create_table(&ctx, "Notes", None).unwrap();
        assert_eq!(msg, "Table Notes already exists");
    }

    #[test]
    fn custom_schema_needs_doc_and_vector() {
        let ctx = test_context();
        let missing_doc = json!({"vector": "Vector(8)"});
        let err = create_table(&ctx, "Bad", missing_doc.as_object()).unwrap_err();
        assert!(err.to_string().contains("'doc'"));
        let missing_vector = json!({"doc": "str"});
        let err = create_table(&ctx, "Bad", missing_vector.as_object()).unwrap_err();
        assert!(err.to_string().contains("'vector'"));
        assert_eq!(table_count(&ctx).unwrap(), 0);
    }

    #[test]
    fn custom_schema_unknown_types_become_text() {
        let ctx = test_context();
        let schema = json!({"doc": "str", "vector": "Vector(8)", "weird": "__import__('os')"});
        create_table(&ctx, "Custom", schema.as_object()).unwrap();
        let details = table_details(&ctx, Some("Custom")).unwrap();
        let weird = details.fields.iter().find(|f| f.name == "weird").unwrap();
        assert_eq!(weird.kind, "string");
    }

    #[test]
    fn empty_name_is_invalid() {
        let ctx = test_context();
        assert!(matches!(create_table(&ctx, "  ", None), Err(ToolError::InvalidInput(_))));
    }

    #[test]
    fn delete_missing_table_is_not_found() {
        let ctx = test_context();
        assert!(matches!(delete_table(&ctx, "Ghost"), Err(ToolError::TableNotFound { .. })));
    }

    #[test]
    fn delete_by_raw_name_reports_row_count() {
        let ctx = test_context();
        ingest(&ctx, Some("my-docs"), &json!(["a", "b"]), true).unwrap();
        ctx.table_cached("MyDocs", false).unwrap();
        let msg = delete_table(&ctx, "my-docs").unwrap();
        assert_eq!(msg, "Table my-docs deleted successfully (had 2 rows)");
        assert!(!ctx.is_cached("MyDocs"));
        assert_eq!(table_count(&ctx).unwrap(), 0);
    }

    #[test]
    fn sticky_drop_falls_back_to_clearing_rows() {
        let connector = Arc::new(FlakyConnector::new());
        let ctx = flaky_context(connector.clone());
        ingest(&ctx, Some("Docs"), &json!(["a"]), true).unwrap();
        connector.sticky_drops(1);
        let msg = delete_table(&ctx, "Docs").unwrap();
        assert!(msg.contains("alternative method"), "got {msg}");
        assert_eq!(table_count(&ctx).unwrap(), 0);
    }

    #[test]
    fn undroppable_table_is_a_deletion_failure() {
        let connector = Arc::new(FlakyConnector::new());
        let ctx = flaky_context(connector.clone());
        ingest(&ctx, Some("Docs"), &json!(["a"]), true).unwrap();
        connector.sticky_drops(5);
        let err = delete_table(&ctx, "Docs").unwrap_err();
        assert!(matches!(err, ToolError::DeletionFailure(_)));
        assert!(err.to_response().contains("still exists"));
    }

    #[test]
    fn deletion_recheck_backs_off_between_attempts() {
        let connector = Arc::new(FlakyConnector::new());
        let mut config = test_config();
        config.retry.backoff_ms = 10;
        let ctx = DbContext::new(config, connector.clone(), mock_embedder());
        ingest(&ctx, Some("Docs"), &json!(["a"]), true).unwrap();
        connector.sticky_drops(5);

        let started = std::time::Instant::now();
        let err = delete_table(&ctx, "Docs").unwrap_err();
        assert!(matches!(err, ToolError::DeletionFailure(_)));
        // three checks after the first drop pause for 10ms and then 20ms
        assert!(started.elapsed() >= std::time::Duration::from_millis(30));
    }

    #[test]
    fn delete_finds_case_variant_tables() {
        let connector = Arc::new(FlakyConnector::new());
        let ctx = flaky_context(connector.clone());
        connector.store_names_lowercase();
        ingest(&ctx, Some("Docs"), &json!(["a", "b"]), true).unwrap();
        let msg = delete_table(&ctx, "Docs").unwrap();
        assert_eq!(msg, "Table Docs deleted successfully (had 2 rows)");
        assert_eq!(table_count(&ctx).unwrap(), 0);
    }

    #[test]
    fn list_reports_row_counts() {
        let ctx = test_context();
        assert_eq!(list_tables(&ctx).unwrap().count, 0);
        ingest(&ctx, Some("Alpha"), &json!(["a", "b", "c"]), true).unwrap();
        create_table(&ctx, "Beta", None).unwrap();

        let list = list_tables(&ctx).unwrap();
        assert_eq!(list.count, 2);
        let value = serde_json::to_value(&list).unwrap();
        assert_eq!(
            value["tables"],
            json!([{"name": "Alpha", "num_rows": 3}, {"name": "Beta", "num_rows": 0}])
        );
    }

    #[test]
    fn row_count_variants_serialize() {
        assert_eq!(serde_json::to_value(RowCount::Known(4)).unwrap(), json!(4));
        assert_eq!(serde_json::to_value(RowCount::Unknown).unwrap(), json!("Unknown"));
        assert_eq!(serde_json::to_value(RowCount::Inaccessible).unwrap(), json!("inaccessible"));
    }

    #[test]
    fn details_describe_schema_and_vector_width() {
        let ctx = test_context();
        create_table(&ctx, "Docs", None).unwrap();
        let details = table_details(&ctx, Some("docs")).unwrap();
        assert_eq!(details.name, "Docs");
        assert_eq!(details.num_rows, RowCount::Known(0));
        assert_eq!(details.vector_dimensions, Some(8));
        assert_eq!(details.embedding_model, "mock-8");
        let vector = details.fields.iter().find(|f| f.name == "vector").unwrap();
        assert_eq!(vector.kind, "fixed_size_list<float32>[8]");
        assert_eq!(vector.vector_dimensions, Some(8));
        assert!(!vector.nullable);
    }

    #[test]
    fn details_use_default_table_and_fail_when_missing() {
        let ctx = test_context();
        let err = table_details(&ctx, None).unwrap_err();
        assert!(err.to_string().contains("vectool-table"));
        ingest(&ctx, None, &json!(["x"]), true).unwrap();
        assert_eq!(table_details(&ctx, None).unwrap().name, "VectoolTable");
    }

    #[test]
    fn stats_bucket_fields() {
        let ctx = test_context();
        let schema = json!({"doc": "str", "vector": "Vector(8)", "year": "int", "score": "float", "title": "str"});
        create_table(&ctx, "Papers", schema.as_object()).unwrap();
        let stats = table_stats(&ctx, Some("Papers")).unwrap();
        assert_eq!(stats.field_summary.total_fields, 5);
        assert_eq!(stats.field_summary.vector_fields, 1);
        assert_eq!(stats.field_summary.text_fields, 2);
        assert_eq!(stats.field_summary.other_fields, 2);
        assert_eq!(stats.other_fields[0].category, Some("float"));
        assert!(stats.last_modified.is_some());
    }

    #[test]
    fn end_to_end_demo() {
        let ctx = hashing_context();
        let before = list_tables(&ctx).unwrap().count;

        create_table(&ctx, "demo", None).unwrap();
        ingest(&ctx, Some("demo"), &json!(["hello world", "goodbye world"]), false).unwrap();
        assert_eq!(table_details(&ctx, Some("demo")).unwrap().num_rows, RowCount::Known(2));

        let SearchOutcome::Results(found) = query(&ctx, "hello", Some("demo"), 1, false).unwrap() else {
            panic!("expected search results");
        };
        assert_eq!(found.results.len(), 1);
        assert!(found.results[0]["doc"].as_str().unwrap().contains("hello"));

        delete_table(&ctx, "demo").unwrap();
        assert_eq!(list_tables(&ctx).unwrap().count, before);
    }

    #[test]
    fn optimization_can_be_turned_off() {
        let mut config = test_config();
        config.optimization.auto_create_indices = false;
        config.optimization.auto_optimize = false;
        let ctx = DbContext::new(
            config,
            Arc::new(crate::engine::sqlite::SqliteConnector),
            crate::testutil::mock_embedder(),
        );
        assert_eq!(create_table(&ctx, "Plain", None).unwrap(), "Table Plain created successfully");
    }
}
