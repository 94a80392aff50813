pub mod sqlite;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::schema::{SchemaDef, TableSchema};

/// Column name under which search hits carry their distance to the query.
pub const DISTANCE_COLUMN: &str = "_distance";

/// One table row keyed by column name.
pub type Row = Map<String, Value>;

/// Errors reported by a storage engine.
#[derive(Debug)]
pub enum EngineError {
    TableNotFound(String),
    TableExists(String),
    /// A connection parameter the engine does not accept.
    UnsupportedOption(String),
    /// An operation this engine does not implement.
    Unsupported(String),
    InvalidFilter(String),
    /// Row or query data that does not fit the table schema.
    InvalidData(String),
    Storage(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TableNotFound(name) => write!(f, "table '{name}' not found"),
            Self::TableExists(name) => write!(f, "table '{name}' already exists"),
            Self::UnsupportedOption(opt) => write!(f, "unsupported connection option: {opt}"),
            Self::Unsupported(msg) => write!(f, "unsupported operation: {msg}"),
            Self::InvalidFilter(msg) => write!(f, "invalid filter: {msg}"),
            Self::InvalidData(msg) => write!(f, "invalid data: {msg}"),
            Self::Storage(msg) => write!(f, "storage error: {msg}"),
        }
    }
}

impl std::error::Error for EngineError {}

/// Read-consistency setting passed when connecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsistencyParam {
    /// Enterprise-style weak read consistency interval.
    WeakReadSeconds(Duration),
    /// Open-source style read consistency interval.
    ReadInterval(Duration),
    Default,
}

impl ConsistencyParam {
    pub fn option_name(&self) -> &'static str {
        match self {
            Self::WeakReadSeconds(_) => "weak_read_consistency_interval_seconds",
            Self::ReadInterval(_) => "read_consistency_interval",
            Self::Default => "none",
        }
    }

    /// Parameters to try in order for a configured interval, most specific first.
    pub fn fallback_chain(interval_secs: u64) -> Vec<Self> {
        if interval_secs == 0 {
            return vec![Self::Default];
        }
        let interval = Duration::from_secs(interval_secs);
        vec![
            Self::WeakReadSeconds(interval),
            Self::ReadInterval(interval),
            Self::Default,
        ]
    }
}

/// Distance metrics understood by vector search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    L2,
    Cosine,
    Dot,
    Hamming,
}

/// Accepted metric names, sorted.
pub const SUPPORTED_METRICS: &[&str] = &["cosine", "dot", "euclidean", "hamming", "l2"];

impl Metric {
    /// `euclidean` is an alias for `l2`.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "l2" | "euclidean" => Some(Self::L2),
            "cosine" => Some(Self::Cosine),
            "dot" => Some(Self::Dot),
            "hamming" => Some(Self::Hamming),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::L2 => "l2",
            Self::Cosine => "cosine",
            Self::Dot => "dot",
            Self::Hamming => "hamming",
        }
    }

    /// Distance between two equal-width vectors; smaller is closer.
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Self::L2 => a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum(),
            Self::Cosine => {
                let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
                let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
                let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
                if norm_a == 0.0 || norm_b == 0.0 {
                    return 1.0;
                }
                1.0 - dot / (norm_a * norm_b)
            }
            Self::Dot => 1.0 - a.iter().zip(b).map(|(x, y)| x * y).sum::<f32>(),
            Self::Hamming => a.iter().zip(b).filter(|(x, y)| x != y).count() as f32,
        }
    }
}

/// A nearest-neighbour search request.
#[derive(Debug, Clone)]
pub struct VectorQuery {
    pub vector: Vec<f32>,
    pub limit: usize,
    pub metric: Metric,
    pub filter: Option<String>,
    /// Columns to return besides the distance; `None` returns every column.
    pub columns: Option<Vec<String>>,
}

impl VectorQuery {
    pub fn new(vector: Vec<f32>, limit: usize) -> Self {
        Self {
            vector,
            limit,
            metric: Metric::L2,
            filter: None,
            columns: None,
        }
    }

    pub fn metric(mut self, metric: Metric) -> Self {
        self.metric = metric;
        self
    }

    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn select(mut self, columns: Vec<String>) -> Self {
        self.columns = Some(columns);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum IndexKind {
    BTree,
    /// Exhaustive vector index for small tables.
    Flat,
    IvfPq { num_partitions: usize, use_gpu: bool },
    FullText,
}

impl IndexKind {
    pub fn is_vector(&self) -> bool {
        matches!(self, Self::Flat | Self::IvfPq { .. })
    }
}

#[derive(Debug, Clone)]
pub struct IndexSpec {
    pub column: String,
    pub kind: IndexKind,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexInfo {
    pub name: String,
    pub columns: Vec<String>,
    pub index_type: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct VersionInfo {
    pub version: u64,
    pub operation: String,
    pub timestamp: DateTime<Utc>,
}

/// An opened table.
pub trait Table: Send + Sync {
    fn name(&self) -> &str;

    fn schema(&self) -> Result<TableSchema, EngineError>;

    fn count_rows(&self, filter: Option<&str>) -> Result<usize, EngineError>;

    /// Materialise rows in insertion order.
    fn scan(&self, limit: Option<usize>) -> Result<Vec<Row>, EngineError>;

    fn add(&self, rows: Vec<Row>) -> Result<usize, EngineError>;

    /// Set `values` on every row matching `filter`; returns the number of rows touched.
    fn update(&self, filter: &str, values: &Row) -> Result<usize, EngineError>;

    fn delete(&self, filter: &str) -> Result<usize, EngineError>;

    /// Nearest rows by ascending distance, each carrying [`DISTANCE_COLUMN`].
    fn search(&self, query: &VectorQuery) -> Result<Vec<Row>, EngineError>;

    fn create_index(&self, spec: &IndexSpec) -> Result<(), EngineError>;

    fn list_indices(&self) -> Result<Vec<IndexInfo>, EngineError>;

    fn prewarm_index(&self, name: &str) -> Result<(), EngineError>;

    /// Compact storage and refresh planner statistics.
    fn optimize(&self) -> Result<(), EngineError>;

    fn version(&self) -> Result<u64, EngineError>;

    fn list_versions(&self) -> Result<Vec<VersionInfo>, EngineError>;

    /// Drop all but the newest `keep` versions; returns how many were removed.
    fn cleanup_old_versions(&self, keep: usize) -> Result<usize, EngineError>;

    fn last_modified(&self) -> Result<Option<DateTime<Utc>>, EngineError>;
}

/// A connected database.
pub trait Engine: Send + Sync {
    fn table_names(&self, limit: usize) -> Result<Vec<String>, EngineError>;

    fn open_table(&self, name: &str) -> Result<Arc<dyn Table>, EngineError>;

    /// Fails with [`EngineError::TableExists`] when `name` is taken.
    fn create_table(&self, name: &str, schema: &SchemaDef) -> Result<Arc<dyn Table>, EngineError>;

    fn drop_table(&self, name: &str) -> Result<(), EngineError>;
}

/// Opens engines; may reject consistency parameters it does not know.
pub trait Connector: Send + Sync {
    fn connect(&self, uri: &str, consistency: ConsistencyParam) -> Result<Arc<dyn Engine>, EngineError>;
}
