use std::cmp::Ordering;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use serde_json::Value;

use super::{
    ConsistencyParam, Connector, DISTANCE_COLUMN, Engine, EngineError, IndexInfo, IndexKind,
    IndexSpec, Row, Table, VectorQuery, VersionInfo,
};
use crate::schema::{Field, FieldKind, SchemaDef, TableSchema};

/// File created inside a directory URI.
const DATABASE_FILE: &str = "vectool.sqlite3";

/// Opens [`SqliteEngine`]s.
pub struct SqliteConnector;

impl Connector for SqliteConnector {
    fn connect(&self, uri: &str, consistency: ConsistencyParam) -> Result<Arc<dyn Engine>, EngineError> {
        Ok(Arc::new(SqliteEngine::open(uri, consistency)?))
    }
}

/// SQLite-backed engine.
///
/// Logical tables are recorded in a catalog with their schema and version;
/// rows live in one physical table per logical table. Vectors are stored as
/// blobs and searched by brute force in Rust.
pub struct SqliteEngine {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteEngine {
    /// Open the database at `uri`.
    ///
    /// `:memory:` opens a private in-memory database; paths ending in
    /// `.db`, `.sqlite` or `.sqlite3` name the database file; any other path
    /// is a directory that will hold `vectool.sqlite3`.
    pub fn open(uri: &str, consistency: ConsistencyParam) -> Result<Self, EngineError> {
        if let ConsistencyParam::WeakReadSeconds(_) = consistency {
            return Err(EngineError::UnsupportedOption(
                consistency.option_name().to_string(),
            ));
        }

        let conn = match database_path(uri) {
            None => Connection::open_in_memory(),
            Some(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        EngineError::Storage(format!(
                            "failed to create directory '{}': {e}",
                            parent.display()
                        ))
                    })?;
                }
                Connection::open(&path)
            }
        }
        .map_err(|e| EngineError::Storage(format!("failed to open database '{uri}': {e}")))?;

        if let ConsistencyParam::ReadInterval(interval) = consistency {
            conn.busy_timeout(interval)
                .map_err(|e| EngineError::Storage(format!("failed to set busy timeout: {e}")))?;
        }

        migrate(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self, EngineError> {
        Self::open(":memory:", ConsistencyParam::Default)
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn handle(&self, name: &str, physical: String) -> Arc<dyn Table> {
        Arc::new(SqliteTable {
            conn: Arc::clone(&self.conn),
            name: name.to_string(),
            physical,
        })
    }
}

fn migrate(conn: &Connection) -> Result<(), EngineError> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;

        CREATE TABLE IF NOT EXISTS vectool_catalog (
            name TEXT PRIMARY KEY,
            physical TEXT NOT NULL,
            schema_json TEXT NOT NULL,
            version INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS vectool_versions (
            table_name TEXT NOT NULL,
            version INTEGER NOT NULL,
            operation TEXT NOT NULL,
            created_at TEXT NOT NULL,
            PRIMARY KEY (table_name, version)
        );
        ",
    )
    .map_err(|e| EngineError::Storage(format!("migration failed: {e}")))
}

impl Engine for SqliteEngine {
    fn table_names(&self, limit: usize) -> Result<Vec<String>, EngineError> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare("SELECT name FROM vectool_catalog ORDER BY name LIMIT ?1")
            .map_err(|e| EngineError::Storage(format!("failed to list tables: {e}")))?;
        let names = stmt
            .query_map(params![limit as i64], |row| row.get::<_, String>(0))
            .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
            .map_err(|e| EngineError::Storage(format!("failed to list tables: {e}")))?;
        Ok(names)
    }

    fn open_table(&self, name: &str) -> Result<Arc<dyn Table>, EngineError> {
        let (physical, _) = load_catalog(&self.lock(), name)?;
        Ok(self.handle(name, physical))
    }

    fn create_table(&self, name: &str, schema: &SchemaDef) -> Result<Arc<dyn Table>, EngineError> {
        let schema = schema
            .to_columnar()
            .map_err(|e| EngineError::InvalidData(e.to_string()))?;
        validate_schema(&schema)?;

        let physical = physical_name(name);
        let columns: Vec<String> = schema
            .fields
            .iter()
            .map(|f| {
                let constraint = if f.nullable { "" } else { " NOT NULL" };
                format!("{} {}{constraint}", quote(&f.name), sql_type(f.kind))
            })
            .collect();
        let schema_json = serde_json::to_string(&schema)
            .map_err(|e| EngineError::Storage(format!("failed to encode schema: {e}")))?;
        let now = Utc::now().to_rfc3339();

        let mut conn = self.lock();
        let tx = conn
            .transaction()
            .map_err(|e| EngineError::Storage(format!("failed to begin transaction: {e}")))?;
        let exists: bool = tx
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM vectool_catalog WHERE name = ?1)",
                params![name],
                |row| row.get(0),
            )
            .map_err(|e| EngineError::Storage(format!("catalog lookup failed: {e}")))?;
        if exists {
            return Err(EngineError::TableExists(name.to_string()));
        }

        tx.execute_batch(&format!(
            "DROP TABLE IF EXISTS {table}; CREATE TABLE {table} ({columns});",
            table = quote(&physical),
            columns = columns.join(", ")
        ))
        .map_err(|e| EngineError::Storage(format!("failed to create table '{name}': {e}")))?;
        tx.execute(
            "INSERT INTO vectool_catalog (name, physical, schema_json, version, created_at, updated_at)
             VALUES (?1, ?2, ?3, 1, ?4, ?4)",
            params![name, physical, schema_json, now],
        )
        .map_err(|e| EngineError::Storage(format!("failed to register table '{name}': {e}")))?;
        tx.execute(
            "INSERT INTO vectool_versions (table_name, version, operation, created_at)
             VALUES (?1, 1, 'create', ?2)",
            params![name, now],
        )
        .map_err(|e| EngineError::Storage(format!("failed to record version: {e}")))?;
        tx.commit()
            .map_err(|e| EngineError::Storage(format!("failed to commit table '{name}': {e}")))?;
        drop(conn);

        log::debug!("created sqlite table {name} as {physical}");
        Ok(self.handle(name, physical))
    }

    fn drop_table(&self, name: &str) -> Result<(), EngineError> {
        let mut conn = self.lock();
        let tx = conn
            .transaction()
            .map_err(|e| EngineError::Storage(format!("failed to begin transaction: {e}")))?;
        let (physical, _) = load_catalog(&tx, name)?;
        tx.execute_batch(&format!("DROP TABLE IF EXISTS {};", quote(&physical)))
            .map_err(|e| EngineError::Storage(format!("failed to drop table '{name}': {e}")))?;
        tx.execute("DELETE FROM vectool_catalog WHERE name = ?1", params![name])
            .and_then(|_| tx.execute("DELETE FROM vectool_versions WHERE table_name = ?1", params![name]))
            .map_err(|e| EngineError::Storage(format!("failed to unregister table '{name}': {e}")))?;
        tx.commit()
            .map_err(|e| EngineError::Storage(format!("failed to commit drop of '{name}': {e}")))?;
        Ok(())
    }
}

/// Handle to one logical table. Every call re-reads the catalog, so a handle
/// to a dropped table fails with `TableNotFound` instead of reading stale data.
struct SqliteTable {
    conn: Arc<Mutex<Connection>>,
    name: String,
    physical: String,
}

impl SqliteTable {
    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn schema_in(&self, conn: &Connection) -> Result<TableSchema, EngineError> {
        load_catalog(conn, &self.name).map(|(_, schema)| schema)
    }

    fn table(&self) -> String {
        quote(&self.physical)
    }

    fn select_list(schema: &TableSchema) -> String {
        schema
            .fields
            .iter()
            .map(|f| quote(&f.name))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl Table for SqliteTable {
    fn name(&self) -> &str {
        &self.name
    }

    fn schema(&self) -> Result<TableSchema, EngineError> {
        self.schema_in(&self.lock())
    }

    fn count_rows(&self, filter: Option<&str>) -> Result<usize, EngineError> {
        let conn = self.lock();
        self.schema_in(&conn)?;
        let sql = format!("SELECT COUNT(*) FROM {}{}", self.table(), where_clause(filter)?);
        let count: i64 = conn
            .query_row(&sql, [], |row| row.get(0))
            .map_err(|e| statement_error(filter, e))?;
        Ok(count as usize)
    }

    fn scan(&self, limit: Option<usize>) -> Result<Vec<Row>, EngineError> {
        let conn = self.lock();
        let schema = self.schema_in(&conn)?;
        let sql = format!(
            "SELECT {} FROM {} ORDER BY rowid LIMIT ?1",
            Self::select_list(&schema),
            self.table()
        );
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| EngineError::Storage(format!("failed to prepare scan: {e}")))?;
        let rows = stmt
            .query_map(params![limit], |row| read_row(row, &schema.fields))
            .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
            .map_err(|e| EngineError::Storage(format!("scan failed: {e}")))?;
        Ok(rows)
    }

    fn add(&self, rows: Vec<Row>) -> Result<usize, EngineError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let mut conn = self.lock();
        let schema = self.schema_in(&conn)?;
        for row in &rows {
            if let Some(unknown) = row.keys().find(|k| schema.field(k).is_none()) {
                return Err(EngineError::InvalidData(format!(
                    "unknown column '{unknown}' for table '{}'",
                    self.name
                )));
            }
        }

        let placeholders: Vec<String> = (1..=schema.fields.len()).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.table(),
            Self::select_list(&schema),
            placeholders.join(", ")
        );

        let tx = conn
            .transaction()
            .map_err(|e| EngineError::Storage(format!("failed to begin transaction: {e}")))?;
        {
            let mut stmt = tx
                .prepare(&sql)
                .map_err(|e| EngineError::Storage(format!("failed to prepare insert: {e}")))?;
            for row in &rows {
                let values = schema
                    .fields
                    .iter()
                    .map(|f| json_to_sql(f, row.get(&f.name).unwrap_or(&Value::Null)))
                    .collect::<Result<Vec<_>, _>>()?;
                stmt.execute(params_from_iter(values))
                    .map_err(|e| EngineError::InvalidData(format!("failed to insert row: {e}")))?;
            }
        }
        bump_version(&tx, &self.name, "append")?;
        tx.commit()
            .map_err(|e| EngineError::Storage(format!("failed to commit insert: {e}")))?;
        Ok(rows.len())
    }

    fn update(&self, filter: &str, values: &Row) -> Result<usize, EngineError> {
        if values.is_empty() {
            return Err(EngineError::InvalidData("no values to update".into()));
        }
        let condition = where_clause(Some(filter))?;
        if condition.is_empty() {
            return Err(EngineError::InvalidFilter("update requires a filter".into()));
        }

        let mut conn = self.lock();
        let schema = self.schema_in(&conn)?;
        let mut assignments = Vec::with_capacity(values.len());
        let mut bound = Vec::with_capacity(values.len());
        for (i, (column, value)) in values.iter().enumerate() {
            let field = schema.field(column).ok_or_else(|| {
                EngineError::InvalidData(format!("unknown column '{column}' for table '{}'", self.name))
            })?;
            assignments.push(format!("{} = ?{}", quote(column), i + 1));
            bound.push(json_to_sql(field, value)?);
        }
        let sql = format!("UPDATE {} SET {}{condition}", self.table(), assignments.join(", "));

        let tx = conn
            .transaction()
            .map_err(|e| EngineError::Storage(format!("failed to begin transaction: {e}")))?;
        let affected = tx
            .execute(&sql, params_from_iter(bound))
            .map_err(|e| statement_error(Some(filter), e))?;
        bump_version(&tx, &self.name, "update")?;
        tx.commit()
            .map_err(|e| EngineError::Storage(format!("failed to commit update: {e}")))?;
        Ok(affected)
    }

    fn delete(&self, filter: &str) -> Result<usize, EngineError> {
        let condition = where_clause(Some(filter))?;
        if condition.is_empty() {
            return Err(EngineError::InvalidFilter("delete requires a filter".into()));
        }
        let mut conn = self.lock();
        self.schema_in(&conn)?;
        let tx = conn
            .transaction()
            .map_err(|e| EngineError::Storage(format!("failed to begin transaction: {e}")))?;
        let affected = tx
            .execute(&format!("DELETE FROM {}{condition}", self.table()), [])
            .map_err(|e| statement_error(Some(filter), e))?;
        bump_version(&tx, &self.name, "delete")?;
        tx.commit()
            .map_err(|e| EngineError::Storage(format!("failed to commit delete: {e}")))?;
        Ok(affected)
    }

    fn search(&self, query: &VectorQuery) -> Result<Vec<Row>, EngineError> {
        let conn = self.lock();
        let schema = self.schema_in(&conn)?;
        let (vector_field, width) = schema.vector_field().ok_or_else(|| {
            EngineError::InvalidData(format!("table '{}' has no vector column", self.name))
        })?;
        if query.vector.len() != width {
            return Err(EngineError::InvalidData(format!(
                "query vector has {} dimensions, table '{}' expects {width}",
                query.vector.len(),
                self.name
            )));
        }
        let vector_index = schema
            .fields
            .iter()
            .position(|f| f.name == vector_field.name)
            .unwrap_or_default();

        let output: Vec<(usize, &Field)> = match &query.columns {
            None => schema.fields.iter().enumerate().collect(),
            Some(columns) => columns
                .iter()
                .filter(|c| c.as_str() != DISTANCE_COLUMN)
                .map(|c| {
                    schema
                        .fields
                        .iter()
                        .enumerate()
                        .find(|(_, f)| &f.name == c)
                        .ok_or_else(|| EngineError::InvalidData(format!("unknown column '{c}'")))
                })
                .collect::<Result<_, _>>()?,
        };

        let filter = query.filter.as_deref();
        let sql = format!(
            "SELECT {} FROM {}{} ORDER BY rowid",
            Self::select_list(&schema),
            self.table(),
            where_clause(filter)?
        );
        let mut stmt = conn.prepare(&sql).map_err(|e| statement_error(filter, e))?;
        let mut rows = stmt.query([]).map_err(|e| statement_error(filter, e))?;

        let mut scored: Vec<(f32, Row)> = Vec::new();
        while let Some(row) = rows.next().map_err(|e| statement_error(filter, e))? {
            let blob: Option<Vec<u8>> = row
                .get(vector_index)
                .map_err(|e| EngineError::Storage(format!("failed to read vector: {e}")))?;
            let Some(stored) = blob.map(|b| bytes_to_vector(&b)) else {
                continue;
            };
            if stored.len() != width {
                continue;
            }
            let distance = query.metric.distance(&query.vector, &stored);
            let mut hit = Row::new();
            for (index, field) in &output {
                let value: SqlValue = row
                    .get(*index)
                    .map_err(|e| EngineError::Storage(format!("failed to read row: {e}")))?;
                hit.insert(field.name.clone(), sql_to_json(field.kind, value));
            }
            scored.push((distance, hit));
        }

        // Stable sort keeps insertion order among equal distances.
        scored.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));
        scored.truncate(query.limit);
        Ok(scored
            .into_iter()
            .map(|(distance, mut hit)| {
                hit.insert(DISTANCE_COLUMN.to_string(), Value::from(distance as f64));
                hit
            })
            .collect())
    }

    fn create_index(&self, spec: &IndexSpec) -> Result<(), EngineError> {
        let conn = self.lock();
        let schema = self.schema_in(&conn)?;
        let field = schema.field(&spec.column).ok_or_else(|| {
            EngineError::InvalidData(format!("unknown column '{}'", spec.column))
        })?;
        match spec.kind {
            IndexKind::BTree => {
                if field.kind.is_vector() {
                    return Err(EngineError::InvalidData(format!(
                        "cannot build a scalar index on vector column '{}'",
                        spec.column
                    )));
                }
                let index = format!("{}_ix_{}", self.physical, hex::encode(&spec.column));
                conn.execute_batch(&format!(
                    "CREATE INDEX IF NOT EXISTS {} ON {} ({});",
                    quote(&index),
                    self.table(),
                    quote(&spec.column)
                ))
                .map_err(|e| EngineError::Storage(format!("failed to create index: {e}")))?;
                bump_version(&conn, &self.name, "create_index")?;
                Ok(())
            }
            IndexKind::Flat | IndexKind::IvfPq { .. } => Err(EngineError::Unsupported(
                "vector indices are not available in the sqlite engine; searches scan exactly".into(),
            )),
            IndexKind::FullText => Err(EngineError::Unsupported(
                "full-text indices are not available in the sqlite engine".into(),
            )),
        }
    }

    fn list_indices(&self) -> Result<Vec<IndexInfo>, EngineError> {
        let conn = self.lock();
        self.schema_in(&conn)?;
        let mut stmt = conn
            .prepare(
                "SELECT ii.name FROM pragma_index_list(?1) AS il
                 JOIN pragma_index_info(il.name) AS ii
                 WHERE il.origin = 'c'
                 ORDER BY il.name, ii.seqno",
            )
            .map_err(|e| EngineError::Storage(format!("failed to list indices: {e}")))?;
        let columns = stmt
            .query_map(params![self.physical], |row| row.get::<_, String>(0))
            .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
            .map_err(|e| EngineError::Storage(format!("failed to list indices: {e}")))?;
        Ok(columns
            .into_iter()
            .map(|column| IndexInfo {
                name: format!("{column}_idx"),
                columns: vec![column],
                index_type: "BTree".into(),
            })
            .collect())
    }

    fn prewarm_index(&self, _name: &str) -> Result<(), EngineError> {
        Err(EngineError::Unsupported(
            "index prewarming is not available in the sqlite engine".into(),
        ))
    }

    fn optimize(&self) -> Result<(), EngineError> {
        let conn = self.lock();
        self.schema_in(&conn)?;
        conn.execute_batch(&format!("ANALYZE {}; PRAGMA optimize;", self.table()))
            .map_err(|e| EngineError::Storage(format!("optimize failed: {e}")))?;
        bump_version(&conn, &self.name, "optimize")?;
        Ok(())
    }

    fn version(&self) -> Result<u64, EngineError> {
        let conn = self.lock();
        let version: Option<i64> = conn
            .query_row(
                "SELECT version FROM vectool_catalog WHERE name = ?1",
                params![self.name],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| EngineError::Storage(format!("failed to read version: {e}")))?;
        version
            .map(|v| v as u64)
            .ok_or_else(|| EngineError::TableNotFound(self.name.clone()))
    }

    fn list_versions(&self) -> Result<Vec<VersionInfo>, EngineError> {
        let conn = self.lock();
        self.schema_in(&conn)?;
        let mut stmt = conn
            .prepare(
                "SELECT version, operation, created_at FROM vectool_versions
                 WHERE table_name = ?1 ORDER BY version",
            )
            .map_err(|e| EngineError::Storage(format!("failed to list versions: {e}")))?;
        let raw = stmt
            .query_map(params![self.name], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
            })
            .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
            .map_err(|e| EngineError::Storage(format!("failed to list versions: {e}")))?;
        raw.into_iter()
            .map(|(version, operation, created_at)| {
                Ok(VersionInfo {
                    version: version as u64,
                    operation,
                    timestamp: parse_timestamp(&created_at)?,
                })
            })
            .collect()
    }

    fn cleanup_old_versions(&self, keep: usize) -> Result<usize, EngineError> {
        let conn = self.lock();
        self.schema_in(&conn)?;
        conn.execute(
            "DELETE FROM vectool_versions WHERE table_name = ?1 AND version NOT IN (
                SELECT version FROM vectool_versions WHERE table_name = ?1
                ORDER BY version DESC LIMIT ?2
             )",
            params![self.name, keep.max(1) as i64],
        )
        .map_err(|e| EngineError::Storage(format!("failed to clean up versions: {e}")))
    }

    fn last_modified(&self) -> Result<Option<DateTime<Utc>>, EngineError> {
        let conn = self.lock();
        let updated: Option<String> = conn
            .query_row(
                "SELECT updated_at FROM vectool_catalog WHERE name = ?1",
                params![self.name],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| EngineError::Storage(format!("failed to read timestamp: {e}")))?;
        let updated = updated.ok_or_else(|| EngineError::TableNotFound(self.name.clone()))?;
        parse_timestamp(&updated).map(Some)
    }
}

/// Physical table name and schema for a logical table.
fn load_catalog(conn: &Connection, name: &str) -> Result<(String, TableSchema), EngineError> {
    let entry: Option<(String, String)> = conn
        .query_row(
            "SELECT physical, schema_json FROM vectool_catalog WHERE name = ?1",
            params![name],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .map_err(|e| EngineError::Storage(format!("catalog lookup failed: {e}")))?;
    let (physical, schema_json) = entry.ok_or_else(|| EngineError::TableNotFound(name.to_string()))?;
    let schema = serde_json::from_str(&schema_json)
        .map_err(|e| EngineError::Storage(format!("corrupt schema for table '{name}': {e}")))?;
    Ok((physical, schema))
}

fn bump_version(conn: &Connection, name: &str, operation: &str) -> Result<u64, EngineError> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "UPDATE vectool_catalog SET version = version + 1, updated_at = ?2 WHERE name = ?1",
        params![name, now],
    )
    .and_then(|_| {
        conn.query_row(
            "SELECT version FROM vectool_catalog WHERE name = ?1",
            params![name],
            |row| row.get::<_, i64>(0),
        )
    })
    .and_then(|version| {
        conn.execute(
            "INSERT INTO vectool_versions (table_name, version, operation, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![name, version, operation, now],
        )
        .map(|_| version as u64)
    })
    .map_err(|e| EngineError::Storage(format!("failed to record version: {e}")))
}

fn validate_schema(schema: &TableSchema) -> Result<(), EngineError> {
    if schema.vector_field().is_none() {
        return Err(EngineError::InvalidData("schema has no vector column".into()));
    }
    for (i, field) in schema.fields.iter().enumerate() {
        if field.name.is_empty() {
            return Err(EngineError::InvalidData("column names must not be empty".into()));
        }
        if schema.fields[..i].iter().any(|f| f.name == field.name) {
            return Err(EngineError::InvalidData(format!(
                "duplicate column '{}'",
                field.name
            )));
        }
    }
    Ok(())
}

/// Physical tables are keyed by the hex encoding of the logical name, which
/// keeps distinct-case names apart under SQLite's case-insensitive identifiers.
fn physical_name(name: &str) -> String {
    format!("vt_{}", hex::encode(name))
}

fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

fn sql_type(kind: FieldKind) -> &'static str {
    match kind {
        FieldKind::Text | FieldKind::List => "TEXT",
        FieldKind::Int | FieldKind::Bool => "INTEGER",
        FieldKind::Float => "REAL",
        FieldKind::Bytes | FieldKind::Vector(_) => "BLOB",
    }
}

fn where_clause(filter: Option<&str>) -> Result<String, EngineError> {
    match filter.map(str::trim).filter(|f| !f.is_empty()) {
        None => Ok(String::new()),
        Some(f) if f.contains(';') => Err(EngineError::InvalidFilter(format!(
            "'{f}': statement separators are not allowed"
        ))),
        Some(f) => Ok(format!(" WHERE ({f})")),
    }
}

fn statement_error(filter: Option<&str>, err: rusqlite::Error) -> EngineError {
    match filter.map(str::trim).filter(|f| !f.is_empty()) {
        Some(f) => EngineError::InvalidFilter(format!("'{f}': {err}")),
        None => EngineError::Storage(err.to_string()),
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, EngineError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| EngineError::Storage(format!("invalid timestamp '{raw}': {e}")))
}

fn database_path(uri: &str) -> Option<PathBuf> {
    let uri = uri.trim();
    if uri.is_empty() || uri == ":memory:" {
        return None;
    }
    let path = expand_home(uri);
    let is_file = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("db" | "sqlite" | "sqlite3")
    );
    Some(if is_file { path } else { path.join(DATABASE_FILE) })
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix('~') {
        if rest.is_empty() || rest.starts_with('/') {
            if let Some(home) = std::env::var_os("HOME") {
                return PathBuf::from(home).join(rest.trim_start_matches('/'));
            }
        }
    }
    PathBuf::from(path)
}

fn read_row(row: &rusqlite::Row<'_>, fields: &[Field]) -> rusqlite::Result<Row> {
    let mut out = Row::new();
    for (index, field) in fields.iter().enumerate() {
        let value: SqlValue = row.get(index)?;
        out.insert(field.name.clone(), sql_to_json(field.kind, value));
    }
    Ok(out)
}

fn sql_to_json(kind: FieldKind, value: SqlValue) -> Value {
    match (kind, value) {
        (_, SqlValue::Null) => Value::Null,
        (FieldKind::Bool, SqlValue::Integer(i)) => Value::Bool(i != 0),
        (FieldKind::Vector(_), SqlValue::Blob(bytes)) => Value::Array(
            bytes_to_vector(&bytes)
                .into_iter()
                .map(|v| Value::from(v as f64))
                .collect(),
        ),
        (FieldKind::List, SqlValue::Text(text)) => {
            serde_json::from_str(&text).unwrap_or_else(|_| Value::String(text))
        }
        (_, SqlValue::Integer(i)) => Value::from(i),
        (_, SqlValue::Real(r)) => Value::from(r),
        (_, SqlValue::Text(text)) => Value::String(text),
        (_, SqlValue::Blob(bytes)) => Value::String(hex::encode(bytes)),
    }
}

fn json_to_sql(field: &Field, value: &Value) -> Result<SqlValue, EngineError> {
    if value.is_null() {
        return Ok(SqlValue::Null);
    }
    let invalid = || {
        EngineError::InvalidData(format!(
            "column '{}' expects {}, got {value}",
            field.name, field.kind
        ))
    };
    let converted = match field.kind {
        FieldKind::Text => match value {
            Value::String(s) => SqlValue::Text(s.clone()),
            other => SqlValue::Text(other.to_string()),
        },
        FieldKind::Int => match value {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
                .map(SqlValue::Integer)
                .ok_or_else(invalid)?,
            Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
            Value::String(s) => SqlValue::Integer(s.trim().parse().map_err(|_| invalid())?),
            _ => return Err(invalid()),
        },
        FieldKind::Float => match value {
            Value::Number(n) => SqlValue::Real(n.as_f64().ok_or_else(invalid)?),
            Value::String(s) => SqlValue::Real(s.trim().parse().map_err(|_| invalid())?),
            _ => return Err(invalid()),
        },
        FieldKind::Bool => match value {
            Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
            Value::Number(n) => SqlValue::Integer(i64::from(n.as_f64().is_some_and(|f| f != 0.0))),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => SqlValue::Integer(1),
                "false" | "0" => SqlValue::Integer(0),
                _ => return Err(invalid()),
            },
            _ => return Err(invalid()),
        },
        FieldKind::Bytes => match value {
            Value::String(s) => SqlValue::Blob(hex::decode(s).map_err(|_| invalid())?),
            _ => return Err(invalid()),
        },
        FieldKind::List => match value {
            Value::Array(_) => SqlValue::Text(value.to_string()),
            _ => return Err(invalid()),
        },
        FieldKind::Vector(width) => match value {
            Value::Array(items) => {
                if items.len() != width {
                    return Err(EngineError::InvalidData(format!(
                        "column '{}' expects {width}-dimensional vectors, got {}",
                        field.name,
                        items.len()
                    )));
                }
                let floats = items
                    .iter()
                    .map(|v| v.as_f64().map(|f| f as f32))
                    .collect::<Option<Vec<f32>>>()
                    .ok_or_else(invalid)?;
                SqlValue::Blob(vector_to_bytes(&floats))
            }
            _ => return Err(invalid()),
        },
    };
    Ok(converted)
}

/// Encode a vector as a little-endian byte blob.
fn vector_to_bytes(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for &v in vector {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a little-endian byte blob back into a vector.
fn bytes_to_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}
