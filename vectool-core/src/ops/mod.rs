//! Document, search and table operations.
//!
//! Every operation takes the shared [`DbContext`] and returns a typed
//! result; rendering errors for callers happens in the tool layer.

pub mod documents;
pub mod search;
pub mod tables;

use std::sync::Arc;

use crate::context::DbContext;
use crate::engine::Table;
use crate::error::ToolError;
use crate::sanitize::sanitize_table_name;

/// Stored name of `name`: listed under its raw or sanitized spelling, else
/// found by opening it, which also tries case variants of both.
pub(crate) fn find_table(ctx: &DbContext, name: &str) -> Result<Option<String>, ToolError> {
    if let Some(found) = ctx
        .resolve_existing(name)
        .map_err(|e| ToolError::engine("Failed to list tables", e))?
    {
        return Ok(Some(found));
    }
    let safe = sanitize_table_name(name);
    let found = ctx
        .locate_table(name, 1)
        .or_else(|| (safe != name).then(|| ctx.locate_table(&safe, 1)).flatten());
    Ok(found)
}

/// Find `name` and open it through the cache.
pub(crate) fn open_existing(ctx: &DbContext, name: &str) -> Result<(String, Arc<dyn Table>), ToolError> {
    let found = find_table(ctx, name)?.ok_or_else(|| ToolError::table_not_found(name))?;
    let table = ctx
        .table_cached(&found, false)
        .map_err(|e| ToolError::engine(&format!("Failed to open table '{found}'"), e))?;
    Ok((found, table))
}
