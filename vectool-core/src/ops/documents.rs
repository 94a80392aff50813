use serde_json::{Map, Value};

use crate::context::DbContext;
use crate::embedding::embed_all;
use crate::engine::{Row, Table};
use crate::error::ToolError;
use crate::filter::is_dangerous_delete;
use crate::reconcile::{TableLayout, default_rows, vector_value};
use crate::retry::CreateStatus;
use crate::schema::SchemaDef;

use super::{find_table, open_existing};

/// Turn a string or list input into the documents worth ingesting.
///
/// Non-string entries are stringified; nulls and blank strings are dropped
/// and the rest are trimmed.
pub fn normalize_docs(input: &Value) -> Vec<String> {
    let items: Vec<&Value> = match input {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    };
    items
        .into_iter()
        .filter_map(|item| match item {
            Value::Null => None,
            Value::String(s) => Some(s.trim().to_string()),
            other => Some(other.to_string()),
        })
        .filter(|doc| !doc.is_empty())
        .collect()
}

/// Embed `docs` and add them to a table, creating it when allowed.
pub fn ingest(
    ctx: &DbContext,
    table_name: Option<&str>,
    docs: &Value,
    auto_create: bool,
) -> Result<String, ToolError> {
    let docs = normalize_docs(docs);
    if docs.is_empty() {
        return Err(ToolError::InvalidInput("No valid documents provided".into()));
    }
    let requested = ctx.table_name_or_default(table_name);
    let embedder = ctx.embedder();

    let (stored, table, rows) = match find_table(ctx, requested)? {
        Some(found) => {
            let table = ctx
                .table_cached(&found, false)
                .map_err(|e| ToolError::engine(&format!("Failed to open table '{found}'"), e))?;
            let rows = reconciled_rows(ctx, &found, table.as_ref(), &docs)?;
            (found, table, rows)
        }
        None if !auto_create => {
            return Err(ToolError::TableNotFound {
                table: requested.to_string(),
                hint: Some("Set auto_create_table=true to create it automatically".into()),
            });
        }
        None => {
            log::info!("table {requested} not found, creating it");
            let created = ctx.create_table_with_retry(
                requested,
                &SchemaDef::default_for(embedder.clone()),
                ctx.retry().max_retries,
            )?;
            let rows = match created.status {
                CreateStatus::Created => default_rows(&docs, embed_all(embedder.as_ref(), &docs)?),
                CreateStatus::AlreadyExisted | CreateStatus::CreatedConcurrently => {
                    log::info!("{} while auto-creating, ingesting into it", created.message);
                    reconciled_rows(ctx, &created.name, created.table.as_ref(), &docs)?
                }
            };
            (created.name, created.table, rows)
        }
    };

    let count = rows.len();
    table
        .add(rows)
        .map_err(|e| ToolError::engine(&format!("Failed to add documents to '{stored}'"), e))?;
    log::info!("ingested {count} documents into {stored}");
    Ok(format!("Successfully ingested {count} documents into table '{stored}'"))
}

/// Embed `docs` and shape them to an existing table's schema.
fn reconciled_rows(ctx: &DbContext, name: &str, table: &dyn Table, docs: &[String]) -> Result<Vec<Row>, ToolError> {
    let schema = table
        .schema()
        .map_err(|e| ToolError::engine(&format!("Failed to read schema of '{name}'"), e))?;
    let layout = TableLayout::inspect(name, schema)?;
    layout.check_dimensions(ctx.embedder().as_ref())?;
    let vectors = embed_all(ctx.embedder().as_ref(), docs)?;
    Ok(layout.shape_rows(docs, vectors))
}

/// Apply `updates` to rows matching `filter`.
///
/// Changing the document column re-embeds it so the vector stays in step;
/// the vector column cannot be set directly.
pub fn update(
    ctx: &DbContext,
    table_name: &str,
    filter: &str,
    updates: &Map<String, Value>,
) -> Result<String, ToolError> {
    let filter = filter.trim();
    if filter.is_empty() {
        return Err(ToolError::InvalidInput("Filter expression is required for updates".into()));
    }
    if updates.is_empty() {
        return Err(ToolError::InvalidInput("Updates must contain at least one field".into()));
    }

    let (found, table) = open_existing(ctx, table_name)?;
    let schema = table
        .schema()
        .map_err(|e| ToolError::engine(&format!("Failed to read schema of '{found}'"), e))?;
    let layout = TableLayout::inspect(&found, schema)?;
    if updates.contains_key(&layout.vector_field) {
        return Err(ToolError::InvalidInput(format!(
            "Field '{}' is derived from the document text and cannot be updated directly",
            layout.vector_field
        )));
    }

    let mut values = updates.clone();
    if let Some(doc) = updates.get(&layout.doc_field) {
        let text = match doc {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        layout.check_dimensions(ctx.embedder().as_ref())?;
        let vectors = embed_all(ctx.embedder().as_ref(), &[text])?;
        if let Some(vector) = vectors.first() {
            values.insert(layout.vector_field.clone(), vector_value(vector));
        }
    }

    match table.count_rows(Some(filter)) {
        Ok(0) => log::warn!("update filter '{filter}' matches no rows in {found}"),
        Ok(n) => log::debug!("update filter '{filter}' matches {n} rows in {found}"),
        Err(e) => log::warn!("could not count rows matching '{filter}' in {found}: {e}"),
    }

    let updated = table
        .update(filter, &values)
        .map_err(|e| ToolError::engine(&format!("Failed to update documents in '{found}'"), e))?;
    log::info!("updated {updated} documents in {found}");
    Ok(format!(
        "Successfully updated {updated} documents in table '{found}' matching filter: {filter}"
    ))
}

/// Delete rows matching `filter`, refusing filters that match everything.
pub fn delete_documents(ctx: &DbContext, table_name: &str, filter: &str) -> Result<String, ToolError> {
    let filter = filter.trim();
    if filter.is_empty() {
        return Err(ToolError::InvalidInput("Filter expression is required for deletes".into()));
    }
    if is_dangerous_delete(filter) {
        log::warn!("refusing delete-all filter '{filter}' on {table_name}");
        return Err(ToolError::DangerousOperation {
            filter: filter.to_string(),
        });
    }

    let (found, table) = open_existing(ctx, table_name)?;
    let before = table.count_rows(None).ok();
    let deleted = table
        .delete(filter)
        .map_err(|e| ToolError::engine(&format!("Failed to delete documents from '{found}'"), e))?;
    let after = table.count_rows(None).ok();
    let removed = match (before, after) {
        (Some(before), Some(after)) => before.saturating_sub(after),
        _ => deleted,
    };
    log::info!("deleted {removed} documents from {found}");
    Ok(format!("Successfully deleted {removed} documents from table '{found}'"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::ops::tables;
    use crate::schema::TableSchema;
    use crate::testutil::{FlakyConnector, flaky_context, test_context};
    use serde_json::json;

    /// Create `name` straight through the engine and keep it out of
    /// listings and opens for the next two lookups.
    fn create_hidden(ctx: &DbContext, connector: &FlakyConnector, name: &str, spec: Value) {
        let schema = TableSchema::from_spec(spec.as_object().unwrap(), ctx.embedder().dimensions()).unwrap();
        connector.hide_new_tables(2);
        ctx.connection()
            .unwrap()
            .create_table(name, &SchemaDef::Columnar(schema))
            .unwrap();
    }

    #[test]
    fn normalize_drops_blank_and_null_entries() {
        let docs = normalize_docs(&json!(["a", "", "   ", null, 42, true]));
        assert_eq!(docs, vec!["a", "42", "true"]);
        assert_eq!(normalize_docs(&json!("single")), vec!["single"]);
        assert!(normalize_docs(&json!(null)).is_empty());
    }

    #[test]
    fn normalize_trims_surrounding_whitespace() {
        assert_eq!(normalize_docs(&json!(["  padded  ", "\tx\n"])), vec!["padded", "x"]);
        assert_eq!(normalize_docs(&json!(" single ")), vec!["single"]);
    }

    #[test]
    fn ingested_documents_are_stored_trimmed() {
        let ctx = test_context();
        ingest(&ctx, Some("Docs"), &json!(["  hello  "]), true).unwrap();
        let (_, table) = open_existing(&ctx, "Docs").unwrap();
        assert_eq!(table.scan(None).unwrap()[0]["doc"], "hello");
    }

    #[test]
    fn empty_input_is_rejected() {
        let ctx = test_context();
        let err = ingest(&ctx, Some("Docs"), &json!(["", " "]), true).unwrap_err();
        assert!(matches!(err, ToolError::InvalidInput(_)));
    }

    #[test]
    fn ingest_auto_creates_default_table() {
        let ctx = test_context();
        let msg = ingest(&ctx, None, &json!(["one", "two"]), true).unwrap();
        assert!(msg.contains("2 documents"));
        assert!(msg.contains("VectoolTable"));
        let (_, table) = open_existing(&ctx, "VectoolTable").unwrap();
        assert_eq!(table.count_rows(None).unwrap(), 2);
    }

    #[test]
    fn ingest_without_auto_create_reports_missing_table() {
        let ctx = test_context();
        let err = ingest(&ctx, Some("absent"), &json!("doc"), false).unwrap_err();
        assert!(matches!(err, ToolError::TableNotFound { .. }));
        assert!(err.to_response().contains("auto_create_table"));
    }

    #[test]
    fn ingest_into_custom_schema_fills_defaults() {
        let ctx = test_context();
        let dims = ctx.embedder().dimensions();
        let schema = json!({"doc": "str", "vector": format!("Vector({dims})"), "category": "str", "rank": "int"});
        tables::create_table(&ctx, "custom", schema.as_object()).unwrap();
        ingest(&ctx, Some("custom"), &json!(["hello"]), false).unwrap();

        let (_, table) = open_existing(&ctx, "Custom").unwrap();
        let rows = table.scan(None).unwrap();
        assert_eq!(rows[0]["doc"], "hello");
        assert_eq!(rows[0]["category"], "");
        assert_eq!(rows[0]["rank"], 0);
    }

    #[test]
    fn ingest_into_wider_table_is_a_dimension_mismatch() {
        let ctx = test_context();
        let schema = json!({"doc": "str", "vector": "Vector(512)"});
        tables::create_table(&ctx, "wide", schema.as_object()).unwrap();
        let err = ingest(&ctx, Some("wide"), &json!(["x"]), false).unwrap_err();
        let text = err.to_response();
        assert!(text.contains("512"), "got {text}");
        assert!(text.contains(&ctx.embedder().dimensions().to_string()), "got {text}");
    }

    #[test]
    fn auto_create_onto_existing_wider_table_is_a_dimension_mismatch() {
        let connector = Arc::new(FlakyConnector::new());
        let ctx = flaky_context(connector.clone());
        create_hidden(&ctx, &connector, "Wide", json!({"doc": "str", "vector": "Vector(512)"}));
        let err = ingest(&ctx, Some("Wide"), &json!(["x"]), true).unwrap_err();
        assert!(matches!(err, ToolError::DimensionMismatch { .. }), "got {err}");
        let (_, table) = open_existing(&ctx, "Wide").unwrap();
        assert_eq!(table.count_rows(None).unwrap(), 0);
    }

    #[test]
    fn auto_create_onto_existing_custom_table_fills_defaults() {
        let connector = Arc::new(FlakyConnector::new());
        let ctx = flaky_context(connector.clone());
        let dims = ctx.embedder().dimensions();
        create_hidden(
            &ctx,
            &connector,
            "Custom",
            json!({"doc": "str", "vector": format!("Vector({dims})"), "category": "str"}),
        );
        let msg = ingest(&ctx, Some("Custom"), &json!(["hello"]), true).unwrap();
        assert_eq!(msg, "Successfully ingested 1 documents into table 'Custom'");
        let (_, table) = open_existing(&ctx, "Custom").unwrap();
        let rows = table.scan(None).unwrap();
        assert_eq!(rows[0]["doc"], "hello");
        assert_eq!(rows[0]["category"], "");
    }

    #[test]
    fn concurrent_create_still_ingests() {
        let connector = Arc::new(FlakyConnector::new());
        let ctx = flaky_context(connector.clone());
        connector.race_next_create();
        let msg = ingest(&ctx, Some("Raced"), &json!(["a", "b"]), true).unwrap();
        assert_eq!(msg, "Successfully ingested 2 documents into table 'Raced'");
        let (_, table) = open_existing(&ctx, "Raced").unwrap();
        assert_eq!(table.count_rows(None).unwrap(), 2);
    }

    #[test]
    fn repeated_ingest_reaches_table_stored_under_another_case() {
        let connector = Arc::new(FlakyConnector::new());
        let ctx = flaky_context(connector.clone());
        connector.store_names_lowercase();
        ingest(&ctx, Some("Docs"), &json!(["alpha"]), true).unwrap();
        let msg = ingest(&ctx, Some("Docs"), &json!(["beta"]), false).unwrap();
        assert_eq!(msg, "Successfully ingested 1 documents into table 'docs'");
        ingest(&ctx, Some("Docs"), &json!(["gamma"]), true).unwrap();
        assert_eq!(ctx.all_tables().unwrap(), vec!["docs"]);
        let (_, table) = open_existing(&ctx, "Docs").unwrap();
        assert_eq!(table.count_rows(None).unwrap(), 3);
    }

    #[test]
    fn update_requires_filter_and_values() {
        let ctx = test_context();
        let values = json!({"doc": "x"}).as_object().cloned().unwrap();
        assert!(matches!(update(&ctx, "T", " ", &values), Err(ToolError::InvalidInput(_))));
        assert!(matches!(update(&ctx, "T", "a = 1", &Map::new()), Err(ToolError::InvalidInput(_))));
        assert!(matches!(update(&ctx, "T", "a = 1", &values), Err(ToolError::TableNotFound { .. })));
    }

    #[test]
    fn update_reembeds_changed_documents() {
        let ctx = test_context();
        ingest(&ctx, Some("Docs"), &json!(["north"]), true).unwrap();
        let values = json!({"doc": "east"}).as_object().cloned().unwrap();
        let msg = update(&ctx, "Docs", "doc = 'north'", &values).unwrap();
        assert!(msg.contains("updated 1 documents"));

        let (_, table) = open_existing(&ctx, "Docs").unwrap();
        let rows = table.scan(None).unwrap();
        assert_eq!(rows[0]["doc"], "east");
        let east = ctx.embedder().embed(&["east"]).unwrap().remove(0);
        assert_eq!(rows[0]["vector"], vector_value(&east));
    }

    #[test]
    fn update_rejects_direct_vector_writes() {
        let ctx = test_context();
        ingest(&ctx, Some("Docs"), &json!(["a"]), true).unwrap();
        let values = json!({"vector": [0.0]}).as_object().cloned().unwrap();
        let err = update(&ctx, "Docs", "doc = 'a'", &values).unwrap_err();
        assert!(err.to_string().contains("vector"));
    }

    #[test]
    fn update_with_no_matches_still_succeeds() {
        let ctx = test_context();
        ingest(&ctx, Some("Docs"), &json!(["a"]), true).unwrap();
        let values = json!({"doc": "b"}).as_object().cloned().unwrap();
        let msg = update(&ctx, "Docs", "doc = 'zzz'", &values).unwrap();
        assert!(msg.contains("updated 0 documents"));
    }

    #[test]
    fn dangerous_filters_delete_nothing() {
        let ctx = test_context();
        ingest(&ctx, Some("Docs"), &json!(["a", "b"]), true).unwrap();
        for filter in ["true", "1=1", "1 = 1"] {
            let err = delete_documents(&ctx, "Docs", filter).unwrap_err();
            let text = err.to_response();
            assert!(text.starts_with("Warning:"));
            assert!(text.contains("delete ALL documents"));
        }
        let (_, table) = open_existing(&ctx, "Docs").unwrap();
        assert_eq!(table.count_rows(None).unwrap(), 2);
    }

    #[test]
    fn delete_reports_removed_count() {
        let ctx = test_context();
        ingest(&ctx, Some("Docs"), &json!(["a", "b", "c"]), true).unwrap();
        let msg = delete_documents(&ctx, "Docs", "doc IN ('a', 'b')").unwrap();
        assert!(msg.contains("deleted 2 documents"), "got {msg}");
    }

    #[test]
    fn delete_requires_existing_table_and_filter() {
        let ctx = test_context();
        assert!(matches!(delete_documents(&ctx, "Docs", ""), Err(ToolError::InvalidInput(_))));
        assert!(matches!(
            delete_documents(&ctx, "Docs", "doc = 'a'"),
            Err(ToolError::TableNotFound { .. })
        ));
    }
}
