//! Verify-then-act-then-reverify table lifecycle helpers.
//!
//! Engine mutations are not assumed to be visible to the next read, so
//! existence checks, opens and creates are retried within bounded budgets.

use std::sync::Arc;

use crate::context::DbContext;
use crate::engine::{EngineError, Table};
use crate::error::ToolError;
use crate::sanitize::sanitize_table_name;
use crate::schema::SchemaDef;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateStatus {
    Created,
    AlreadyExisted,
    /// Another caller created the table between our check and our create.
    CreatedConcurrently,
}

pub struct CreatedTable {
    pub table: Arc<dyn Table>,
    /// Name the table is stored under.
    pub name: String,
    pub message: String,
    pub status: CreateStatus,
}

/// Spellings of `name` tried when the engine lists a table under a
/// different case than it was created with.
fn case_variants(name: &str) -> Vec<String> {
    let mut capitalized = String::with_capacity(name.len());
    let mut chars = name.chars();
    if let Some(first) = chars.next() {
        capitalized.extend(first.to_uppercase());
        capitalized.extend(chars.flat_map(char::to_lowercase));
    }
    let mut variants = vec![
        name.to_string(),
        name.to_lowercase(),
        name.to_uppercase(),
        capitalized,
    ];
    let mut seen = Vec::with_capacity(variants.len());
    variants.retain(|v| {
        let fresh = !seen.contains(v);
        if fresh {
            seen.push(v.clone());
        }
        fresh
    });
    variants
}

impl DbContext {
    /// True when `name` (or a case variant of it) can be opened within `max_retries` attempts.
    pub fn verify_table_exists(&self, name: &str, max_retries: usize) -> bool {
        self.locate_table(name, max_retries).is_some()
    }

    /// Like [`verify_table_exists`](Self::verify_table_exists) but returns the
    /// spelling the table was found under.
    pub fn locate_table(&self, name: &str, max_retries: usize) -> Option<String> {
        let attempts = max_retries.max(1);
        for attempt in 0..attempts {
            if let Some(found) = self.find_spelling(name) {
                if attempt > 0 {
                    log::info!("table {name} became visible after {} attempts", attempt + 1);
                }
                return Some(found);
            }
            if attempt + 1 < attempts {
                log::debug!("table {name} not visible (attempt {}/{attempts})", attempt + 1);
                self.retry().pause(attempt);
            }
        }
        None
    }

    fn find_spelling(&self, name: &str) -> Option<String> {
        let engine = match self.connection() {
            Ok(engine) => engine,
            Err(e) => {
                log::warn!("existence check for {name} could not connect: {e}");
                return None;
            }
        };

        let opens = |candidate: &str| engine.open_table(candidate).and_then(|t| t.schema()).is_ok();
        if opens(name) {
            return Some(name.to_string());
        }

        let listed = match engine.table_names(self.config().database.list_limit) {
            Ok(names) => names,
            Err(e) => {
                log::debug!("listing tables for {name} failed: {e}");
                return None;
            }
        };
        case_variants(name)
            .into_iter()
            .find(|variant| listed.contains(variant) && opens(variant))
            .inspect(|variant| {
                if variant != name {
                    log::warn!("table {name} found under case variant {variant}");
                }
            })
    }

    /// Open `name` and read its schema, retrying; the final error is returned.
    pub fn open_table_with_retry(&self, name: &str, max_retries: usize) -> Result<Arc<dyn Table>, EngineError> {
        let attempts = max_retries.max(1);
        let mut last_error = None;
        for attempt in 0..attempts {
            let opened = self.connection().and_then(|engine| {
                let table = engine.open_table(name)?;
                table.schema()?;
                Ok(table)
            });
            match opened {
                Ok(table) => return Ok(table),
                Err(e) => {
                    log::debug!("open {name} failed (attempt {}/{attempts}): {e}", attempt + 1);
                    last_error = Some(e);
                }
            }
            if attempt + 1 < attempts {
                self.retry().pause(attempt);
            }
        }
        Err(last_error.unwrap_or_else(|| EngineError::TableNotFound(name.to_string())))
    }

    /// Idempotently create `name`.
    ///
    /// An existing table is opened and reported as such. A concurrent create
    /// seen as `TableExists` counts as success. A new table is only reported
    /// once it is visible to a fresh existence check.
    pub fn create_table_with_retry(
        &self,
        name: &str,
        schema: &SchemaDef,
        max_retries: usize,
    ) -> Result<CreatedTable, ToolError> {
        let safe = sanitize_table_name(name);
        let schema = match schema.to_columnar() {
            Ok(columnar) => SchemaDef::Columnar(columnar),
            Err(e) => {
                log::warn!("could not convert schema for {safe} to plain columns, using it as given: {e}");
                schema.clone()
            }
        };

        let stored_as = |stored: &str| {
            if stored == name {
                String::new()
            } else {
                format!(" (stored as {stored})")
            }
        };

        if let Some(existing) = self.locate_table(&safe, max_retries) {
            let table = self
                .open_table_with_retry(&existing, max_retries)
                .map_err(|e| ToolError::CreationFailure(format!("Table {name} exists but could not be opened: {e}")))?;
            return Ok(CreatedTable {
                table,
                message: format!("Table {name} already exists{}", stored_as(&existing)),
                name: existing,
                status: CreateStatus::AlreadyExisted,
            });
        }

        let attempts = max_retries.max(1);
        let verify_budget = self.retry().verify_retries;
        let mut last_error = String::from("no attempt made");
        for attempt in 0..attempts {
            let outcome = self.connection().and_then(|engine| engine.create_table(&safe, &schema));
            let status = match outcome {
                Ok(_) => {
                    self.clear_table_cache(Some(&safe));
                    CreateStatus::Created
                }
                Err(EngineError::TableExists(_)) => {
                    log::info!("table {safe} was created concurrently, treating as existing");
                    CreateStatus::CreatedConcurrently
                }
                Err(e) => {
                    log::warn!("create {safe} failed (attempt {}/{attempts}): {e}", attempt + 1);
                    last_error = e.to_string();
                    if attempt + 1 < attempts {
                        self.retry().pause(attempt);
                    }
                    continue;
                }
            };

            match self.locate_table(&safe, verify_budget) {
                Some(found) => match self.open_table_with_retry(&found, attempts) {
                    Ok(table) => {
                        let message = match status {
                            CreateStatus::Created => {
                                log::info!("created table {safe}");
                                format!("Table {name} created successfully{}", stored_as(&found))
                            }
                            _ => format!("Table {name} already exists{}", stored_as(&found)),
                        };
                        return Ok(CreatedTable {
                            table,
                            name: found,
                            message,
                            status,
                        });
                    }
                    Err(e) => last_error = format!("created but could not be opened: {e}"),
                },
                None => {
                    log::warn!("table {safe} not visible after creation (attempt {}/{attempts})", attempt + 1);
                    last_error = "table was not visible after creation".into();
                }
            }
            if attempt + 1 < attempts {
                self.retry().pause(attempt);
            }
        }

        log::error!("giving up creating {safe}: {last_error}");
        Err(ToolError::CreationFailure(format!(
            "Failed to create table {name} after {attempts} attempts: {last_error}"
        )))
    }
}
