//! Test doubles shared by this crate's tests and the server crates.
//!
//! [`MockEmbedder`] gives deterministic vectors without a model download.
//! [`FlakyConnector`] wraps the SQLite engine and injects the faults a remote
//! engine shows: lagging visibility, transient open/create/search failures,
//! concurrent creates and drops that do not take effect.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::config::Config;
use crate::context::DbContext;
use crate::embedding::hashing::HashingEmbedder;
use crate::embedding::{EmbedError, Embedder};
use crate::engine::sqlite::{SqliteConnector, SqliteEngine};
use crate::engine::{
    ConsistencyParam, Connector, Engine, EngineError, IndexInfo, IndexSpec, Row, Table, VectorQuery,
    VersionInfo,
};
use crate::schema::{SchemaDef, TableSchema};

/// Embedder returning fixed vectors for known texts and hash-derived ones otherwise.
pub struct MockEmbedder {
    dimensions: usize,
    model_name: String,
    fixed: HashMap<String, Vec<f32>>,
}

impl MockEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            model_name: format!("mock-{dimensions}"),
            fixed: HashMap::new(),
        }
    }

    /// Always embed `text` as `vector`.
    pub fn with(mut self, text: &str, vector: Vec<f32>) -> Self {
        self.fixed.insert(text.to_string(), vector);
        self
    }

    fn hashed(&self, text: &str) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.dimensions);
        let mut block = 0u32;
        while out.len() < self.dimensions {
            let digest = Sha256::new()
                .chain_update(block.to_le_bytes())
                .chain_update(text.as_bytes())
                .finalize();
            out.extend(
                digest
                    .iter()
                    .take(self.dimensions - out.len())
                    .map(|b| (*b as f32 / 127.5) - 1.0),
            );
            block += 1;
        }
        out
    }
}

impl Embedder for MockEmbedder {
    fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
        Ok(texts
            .iter()
            .map(|text| match self.fixed.get(*text) {
                Some(vector) => vector.clone(),
                None => self.hashed(text),
            })
            .collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn provider_type(&self) -> &str {
        "mock"
    }
}

pub fn mock_embedder() -> Arc<dyn Embedder> {
    Arc::new(MockEmbedder::new(8))
}

/// In-memory database, no backoff and no consistency parameter.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.database.uri = ":memory:".into();
    config.database.weak_read_consistency_secs = 0;
    config.database.default_table = "vectool-table".into();
    config.retry.backoff_ms = 0;
    config
}

pub fn test_context() -> DbContext {
    DbContext::new(test_config(), Arc::new(SqliteConnector), mock_embedder())
}

pub fn flaky_context(connector: Arc<FlakyConnector>) -> DbContext {
    DbContext::new(test_config(), connector, mock_embedder())
}

/// Context over the real hashing embedder, for end-to-end similarity checks.
pub fn hashing_context() -> DbContext {
    let embedder = HashingEmbedder::new(256).expect("hashing embedder");
    DbContext::new(test_config(), Arc::new(SqliteConnector), Arc::new(embedder))
}

/// Context holding a `Compass` table of four 2-d documents.
///
/// Against the query `east` under the dot metric the distances are
/// east 0.0, east-northeast 0.4, northeast 0.6 and north 1.0.
pub fn compass_context() -> DbContext {
    let embedder = MockEmbedder::new(2)
        .with("east", vec![1.0, 0.0])
        .with("east-northeast", vec![0.6, 0.0])
        .with("northeast", vec![0.4, 0.0])
        .with("north", vec![0.0, 1.0]);
    let ctx = DbContext::new(test_config(), Arc::new(SqliteConnector), Arc::new(embedder));
    crate::ops::documents::ingest(
        &ctx,
        Some("Compass"),
        &serde_json::json!(["east", "east-northeast", "northeast", "north"]),
        true,
    )
    .expect("seed compass table");
    ctx
}

/// Take one unit from a countdown, returning true while it was non-zero.
fn take(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[derive(Default)]
struct Faults {
    connects: AtomicUsize,
    last_param: Mutex<Option<ConsistencyParam>>,
    reject_read_interval: AtomicBool,
    failing_opens: AtomicUsize,
    failing_creates: AtomicUsize,
    failing_searches: AtomicUsize,
    sticky_drops: AtomicUsize,
    hide_budget: AtomicUsize,
    /// Newest table and how many more lookups it stays invisible for.
    hidden: Mutex<Option<(String, usize)>>,
    race_next_create: AtomicBool,
    lowercase_names: AtomicBool,
}

impl Faults {
    /// True when `name` should still look absent; consumes one lookup.
    fn hides(&self, name: &str, consume: bool) -> bool {
        let mut hidden = self.hidden.lock().unwrap_or_else(|e| e.into_inner());
        match hidden.as_mut() {
            Some((hidden_name, remaining)) if hidden_name == name && *remaining > 0 => {
                if consume {
                    *remaining -= 1;
                }
                true
            }
            _ => false,
        }
    }
}

/// Connector over in-memory SQLite with switchable faults.
#[derive(Default)]
pub struct FlakyConnector {
    faults: Arc<Faults>,
}

impl FlakyConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse the alternate read-interval parameter as unsupported.
    pub fn reject_read_interval(&self) {
        self.faults.reject_read_interval.store(true, Ordering::SeqCst);
    }

    /// Parameter of the most recent connect attempt.
    pub fn last_param(&self) -> Option<ConsistencyParam> {
        *self.faults.last_param.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Connect attempts so far, rejected ones included.
    pub fn connect_count(&self) -> usize {
        self.faults.connects.load(Ordering::SeqCst)
    }

    pub fn fail_next_opens(&self, n: usize) {
        self.faults.failing_opens.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_creates(&self, n: usize) {
        self.faults.failing_creates.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_searches(&self, n: usize) {
        self.faults.failing_searches.store(n, Ordering::SeqCst);
    }

    /// The next created table stays invisible for `n` opens.
    pub fn hide_new_tables(&self, n: usize) {
        self.faults.hide_budget.store(n, Ordering::SeqCst);
    }

    /// The next create succeeds but reports `TableExists`, as if another
    /// caller had won the race.
    pub fn race_next_create(&self) {
        self.faults.race_next_create.store(true, Ordering::SeqCst);
    }

    /// Store tables under lower-cased names.
    pub fn store_names_lowercase(&self) {
        self.faults.lowercase_names.store(true, Ordering::SeqCst);
    }

    /// The next `n` drops report success without dropping anything.
    pub fn sticky_drops(&self, n: usize) {
        self.faults.sticky_drops.store(n, Ordering::SeqCst);
    }
}

impl Connector for FlakyConnector {
    fn connect(&self, uri: &str, consistency: ConsistencyParam) -> Result<Arc<dyn Engine>, EngineError> {
        self.faults.connects.fetch_add(1, Ordering::SeqCst);
        *self.faults.last_param.lock().unwrap_or_else(|e| e.into_inner()) = Some(consistency);
        if matches!(consistency, ConsistencyParam::ReadInterval(_))
            && self.faults.reject_read_interval.load(Ordering::SeqCst)
        {
            return Err(EngineError::UnsupportedOption(consistency.option_name().to_string()));
        }
        Ok(Arc::new(FlakyEngine {
            inner: SqliteEngine::open(uri, consistency)?,
            faults: Arc::clone(&self.faults),
        }))
    }
}

struct FlakyEngine {
    inner: SqliteEngine,
    faults: Arc<Faults>,
}

impl FlakyEngine {
    fn wrap(&self, table: Arc<dyn Table>) -> Arc<dyn Table> {
        Arc::new(FlakyTable {
            inner: table,
            faults: Arc::clone(&self.faults),
        })
    }
}

impl Engine for FlakyEngine {
    fn table_names(&self, limit: usize) -> Result<Vec<String>, EngineError> {
        let mut names = self.inner.table_names(limit)?;
        names.retain(|n| !self.faults.hides(n, false));
        Ok(names)
    }

    fn open_table(&self, name: &str) -> Result<Arc<dyn Table>, EngineError> {
        if take(&self.faults.failing_opens) {
            return Err(EngineError::Storage(format!("transient failure opening '{name}'")));
        }
        if self.faults.hides(name, true) {
            return Err(EngineError::TableNotFound(name.to_string()));
        }
        self.inner.open_table(name).map(|t| self.wrap(t))
    }

    fn create_table(&self, name: &str, schema: &SchemaDef) -> Result<Arc<dyn Table>, EngineError> {
        if take(&self.faults.failing_creates) {
            return Err(EngineError::Storage(format!("transient failure creating '{name}'")));
        }
        let stored = if self.faults.lowercase_names.load(Ordering::SeqCst) {
            name.to_lowercase()
        } else {
            name.to_string()
        };
        let table = self.inner.create_table(&stored, schema)?;

        let hide_for = self.faults.hide_budget.swap(0, Ordering::SeqCst);
        if hide_for > 0 {
            *self.faults.hidden.lock().unwrap_or_else(|e| e.into_inner()) = Some((stored.clone(), hide_for));
        }
        if self.faults.race_next_create.swap(false, Ordering::SeqCst) {
            return Err(EngineError::TableExists(stored));
        }
        Ok(self.wrap(table))
    }

    fn drop_table(&self, name: &str) -> Result<(), EngineError> {
        if take(&self.faults.sticky_drops) {
            return Ok(());
        }
        self.inner.drop_table(name)
    }
}

struct FlakyTable {
    inner: Arc<dyn Table>,
    faults: Arc<Faults>,
}

impl Table for FlakyTable {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn schema(&self) -> Result<TableSchema, EngineError> {
        self.inner.schema()
    }

    fn count_rows(&self, filter: Option<&str>) -> Result<usize, EngineError> {
        self.inner.count_rows(filter)
    }

    fn scan(&self, limit: Option<usize>) -> Result<Vec<Row>, EngineError> {
        self.inner.scan(limit)
    }

    fn add(&self, rows: Vec<Row>) -> Result<usize, EngineError> {
        self.inner.add(rows)
    }

    fn update(&self, filter: &str, values: &Row) -> Result<usize, EngineError> {
        self.inner.update(filter, values)
    }

    fn delete(&self, filter: &str) -> Result<usize, EngineError> {
        self.inner.delete(filter)
    }

    fn search(&self, query: &VectorQuery) -> Result<Vec<Row>, EngineError> {
        if take(&self.faults.failing_searches) {
            return Err(EngineError::Storage("transient search failure".into()));
        }
        self.inner.search(query)
    }

    fn create_index(&self, spec: &IndexSpec) -> Result<(), EngineError> {
        self.inner.create_index(spec)
    }

    fn list_indices(&self) -> Result<Vec<IndexInfo>, EngineError> {
        self.inner.list_indices()
    }

    fn prewarm_index(&self, name: &str) -> Result<(), EngineError> {
        self.inner.prewarm_index(name)
    }

    fn optimize(&self) -> Result<(), EngineError> {
        self.inner.optimize()
    }

    fn version(&self) -> Result<u64, EngineError> {
        self.inner.version()
    }

    fn list_versions(&self) -> Result<Vec<VersionInfo>, EngineError> {
        self.inner.list_versions()
    }

    fn cleanup_old_versions(&self, keep: usize) -> Result<usize, EngineError> {
        self.inner.cleanup_old_versions(keep)
    }

    fn last_modified(&self) -> Result<Option<DateTime<Utc>>, EngineError> {
        self.inner.last_modified()
    }
}
