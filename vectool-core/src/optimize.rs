//! Index and storage maintenance for tables.
//!
//! Every step is best effort: a step the engine cannot perform is recorded
//! as skipped and the remaining steps still run.

use serde::Serialize;

use crate::context::DbContext;
use crate::engine::{EngineError, IndexInfo, IndexKind, IndexSpec, Table};
use crate::error::ToolError;
use crate::ops::open_existing;
use crate::schema::{DOC_FIELD, FieldKind, TableSchema};

/// Tables below this many rows get an exhaustive vector index.
const SMALL_TABLE_ROWS: usize = 256;
const MAX_PARTITIONS: usize = 256;
const LARGE_TABLE_ROWS: usize = 100_000;
const HUGE_TABLE_ROWS: usize = 1_000_000;

#[derive(Debug, Default, Serialize)]
pub struct OptimizationReport {
    pub table_name: String,
    pub optimizations_applied: Vec<String>,
    pub skipped: Vec<String>,
    pub recommendations: Vec<String>,
}

impl OptimizationReport {
    pub fn applied(&self) -> usize {
        self.optimizations_applied.len()
    }

    fn skip(&mut self, step: &str, err: &EngineError) {
        log::debug!("{step} skipped on {}: {err}", self.table_name);
        self.skipped.push(format!("{step}: {err}"));
    }
}

/// Run the configured index, storage and prewarm steps on `table_name`.
pub fn optimize_table(ctx: &DbContext, table_name: &str) -> Result<OptimizationReport, ToolError> {
    let (name, table) = open_existing(ctx, table_name)?;
    let settings = &ctx.config().optimization;
    let schema = table
        .schema()
        .map_err(|e| ToolError::engine(&format!("Failed to read schema of '{name}'"), e))?;
    let mut report = OptimizationReport {
        table_name: name.clone(),
        ..Default::default()
    };

    let existing = match table.list_indices() {
        Ok(indices) => indices,
        Err(e) => {
            report.skip("listing indices", &e);
            Vec::new()
        }
    };
    let indexed = |column: &str| existing.iter().any(|i| i.columns.iter().any(|c| c == column));

    if settings.auto_create_indices {
        for field in schema.fields.iter().filter(|f| is_filterable(f.kind) && f.name != DOC_FIELD) {
            if indexed(&field.name) {
                continue;
            }
            let spec = IndexSpec {
                column: field.name.clone(),
                kind: IndexKind::BTree,
            };
            match table.create_index(&spec) {
                Ok(()) => {
                    log::info!("created scalar index on {name}.{}", field.name);
                    report
                        .optimizations_applied
                        .push(format!("Created scalar index for '{}' field", field.name));
                }
                Err(e) => report.skip(&format!("scalar index on '{}'", field.name), &e),
            }
        }
    }

    if let Some((vector, _)) = schema.vector_field() {
        match table.count_rows(None) {
            Ok(0) => log::debug!("skipping vector index on empty table {name}"),
            Ok(_) if indexed(&vector.name) => log::debug!("vector index on {name} already exists"),
            Ok(rows) => {
                let kind = vector_index_kind(rows, settings.use_gpu_indexing);
                let spec = IndexSpec {
                    column: vector.name.clone(),
                    kind: kind.clone(),
                };
                match table.create_index(&spec) {
                    Ok(()) => report.optimizations_applied.push(match kind {
                        IndexKind::IvfPq { num_partitions, .. } => format!(
                            "Created IVF-PQ vector index with {num_partitions} partitions ({rows} rows)"
                        ),
                        _ => format!("Created vector index optimized for small table ({rows} rows)"),
                    }),
                    Err(e) => report.skip("vector index", &e),
                }
            }
            Err(e) => report.skip("vector index", &e),
        }
    }

    for field in full_text_fields(&schema) {
        if indexed(&field) {
            continue;
        }
        let spec = IndexSpec {
            column: field.clone(),
            kind: IndexKind::FullText,
        };
        match table.create_index(&spec) {
            Ok(()) => {
                report
                    .optimizations_applied
                    .push(format!("Created full-text search index for '{field}' field"));
                break;
            }
            Err(e) => report.skip(&format!("full-text index on '{field}'"), &e),
        }
    }

    if settings.auto_optimize {
        match table.optimize() {
            Ok(()) => report
                .optimizations_applied
                .push("Applied table storage optimization".into()),
            Err(e) => report.skip("storage optimization", &e),
        }
    }

    if settings.prewarm_indices {
        let indices = table.list_indices().unwrap_or_default();
        let mut warmed = 0;
        for index in &indices {
            match table.prewarm_index(&index.name) {
                Ok(()) => warmed += 1,
                Err(e) => {
                    report.skip("index prewarming", &e);
                    break;
                }
            }
        }
        if warmed > 0 {
            report
                .optimizations_applied
                .push(format!("Prewarmed {warmed} indices"));
        }
    }

    report.recommendations = recommendations(ctx, table.as_ref(), &schema);
    log::info!(
        "applied {} optimizations to {name} ({} skipped)",
        report.applied(),
        report.skipped.len()
    );
    Ok(report)
}

fn is_filterable(kind: FieldKind) -> bool {
    matches!(kind, FieldKind::Int | FieldKind::Float | FieldKind::Text | FieldKind::Bool)
}

fn vector_index_kind(rows: usize, use_gpu: bool) -> IndexKind {
    if rows < SMALL_TABLE_ROWS {
        IndexKind::Flat
    } else {
        IndexKind::IvfPq {
            num_partitions: (rows / 10).min(MAX_PARTITIONS),
            use_gpu,
        }
    }
}

/// `doc` and any text field whose name mentions "text".
fn full_text_fields(schema: &TableSchema) -> Vec<String> {
    schema
        .fields
        .iter()
        .filter(|f| f.kind == FieldKind::Text)
        .filter(|f| f.name == DOC_FIELD || f.name.to_lowercase().contains("text"))
        .map(|f| f.name.clone())
        .collect()
}

fn has_vector_index(schema: &TableSchema, indices: &[IndexInfo]) -> bool {
    schema.vector_field().is_some_and(|(vector, _)| {
        indices
            .iter()
            .any(|i| i.columns.iter().any(|c| *c == vector.name))
    })
}

fn recommendations(ctx: &DbContext, table: &dyn Table, schema: &TableSchema) -> Vec<String> {
    let mut out = Vec::new();
    let rows = match table.count_rows(None) {
        Ok(rows) => rows,
        Err(e) => {
            log::debug!("performance analysis limited: {e}");
            out.push("Row count unavailable; performance analysis skipped".into());
            return out;
        }
    };
    let indices = table.list_indices().unwrap_or_default();
    let unindexed = unindexed_rows(rows, schema, &indices);
    if unindexed > 0 {
        let percent = unindexed as f64 / rows as f64 * 100.0;
        out.push(format!(
            "{unindexed} rows ({percent:.1}%) are not covered by a vector index and are searched exhaustively"
        ));
    } else if rows > 0 {
        out.push("All rows are covered by a vector index".into());
    }
    if rows > HUGE_TABLE_ROWS {
        out.push("Large table (over 1M rows): consider partitioning or sharding".into());
    }
    if rows > LARGE_TABLE_ROWS {
        out.push("Over 100k rows: consider weak read consistency for high-concurrency reads".into());
    }

    let settings = &ctx.config().optimization;
    if settings.enable_versioning {
        if let Ok(versions) = table.list_versions() {
            if versions.len() > settings.max_versions {
                out.push(format!(
                    "{} versions retained, more than the configured {}; run table_versions to clean up",
                    versions.len(),
                    settings.max_versions
                ));
            }
        }
    }
    out
}

fn unindexed_rows(rows: usize, schema: &TableSchema, indices: &[IndexInfo]) -> usize {
    if has_vector_index(schema, indices) { 0 } else { rows }
}

#[derive(Debug, Serialize)]
pub struct VersionSummary {
    pub table_name: String,
    pub current_version: u64,
    pub versions_available: Vec<u64>,
    pub cleanup_performed: bool,
    pub versions_removed: usize,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum VersionReport {
    Disabled { versioning: &'static str },
    Managed(VersionSummary),
}

/// Report a table's versions, trimming them to `max_versions` when cleanup is enabled.
pub fn manage_versions(ctx: &DbContext, table_name: &str) -> Result<VersionReport, ToolError> {
    let settings = &ctx.config().optimization;
    if !settings.enable_versioning {
        return Ok(VersionReport::Disabled {
            versioning: "disabled",
        });
    }

    let (name, table) = open_existing(ctx, table_name)?;
    let current_version = table
        .version()
        .map_err(|e| ToolError::engine(&format!("Failed to read version of '{name}'"), e))?;
    let versions = table
        .list_versions()
        .map_err(|e| ToolError::engine(&format!("Failed to list versions of '{name}'"), e))?;

    let mut versions_removed = 0;
    let cleanup_performed = settings.auto_cleanup_versions && versions.len() > settings.max_versions;
    if cleanup_performed {
        versions_removed = table
            .cleanup_old_versions(settings.max_versions)
            .map_err(|e| ToolError::engine(&format!("Failed to clean up versions of '{name}'"), e))?;
        log::info!("cleaned up {versions_removed} old versions of {name}");
    }

    Ok(VersionReport::Managed(VersionSummary {
        table_name: name,
        current_version,
        versions_available: versions.iter().map(|v| v.version).collect(),
        cleanup_performed,
        versions_removed,
    }))
}

#[derive(Debug, Serialize)]
pub struct IndexStats {
    pub table_name: String,
    pub indices: Vec<IndexInfo>,
    pub num_indices: usize,
    pub num_rows: usize,
    pub num_unindexed_rows: usize,
    pub version: u64,
    pub recommendations: Vec<String>,
}

pub fn index_stats(ctx: &DbContext, table_name: &str) -> Result<IndexStats, ToolError> {
    let (name, table) = open_existing(ctx, table_name)?;
    let context = |what: &str| format!("Failed to read {what} of '{name}'");
    let schema = table.schema().map_err(|e| ToolError::engine(&context("schema"), e))?;
    let indices = table
        .list_indices()
        .map_err(|e| ToolError::engine(&context("indices"), e))?;
    let num_rows = table
        .count_rows(None)
        .map_err(|e| ToolError::engine(&context("row count"), e))?;
    let version = table.version().map_err(|e| ToolError::engine(&context("version"), e))?;

    Ok(IndexStats {
        num_indices: indices.len(),
        num_unindexed_rows: unindexed_rows(num_rows, &schema, &indices),
        recommendations: recommendations(ctx, table.as_ref(), &schema),
        table_name: name,
        indices,
        num_rows,
        version,
    })
}
