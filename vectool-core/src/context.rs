//! Shared database context: one lazily opened connection plus a cache of
//! opened table handles, passed to every operation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use crate::config::{Config, RetryConfig};
use crate::embedding::{self, EmbedError, Embedder};
use crate::engine::sqlite::SqliteConnector;
use crate::engine::{ConsistencyParam, Connector, Engine, EngineError, Table};
use crate::sanitize::sanitize_table_name;

pub struct DbContext {
    config: Config,
    connector: Arc<dyn Connector>,
    embedder: Arc<dyn Embedder>,
    connection: Mutex<Option<Arc<dyn Engine>>>,
    tables: RwLock<HashMap<String, Arc<dyn Table>>>,
}

impl DbContext {
    pub fn new(config: Config, connector: Arc<dyn Connector>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            config,
            connector,
            embedder,
            connection: Mutex::new(None),
            tables: RwLock::new(HashMap::new()),
        }
    }

    /// Context over the bundled SQLite engine with the configured embedder.
    pub fn from_config(config: Config) -> Result<Self, EmbedError> {
        let embedder = embedding::build_embedder(&config.embedding)?;
        Ok(Self::new(config, Arc::new(SqliteConnector), embedder))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn retry(&self) -> &RetryConfig {
        &self.config.retry
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// Table name used when a caller does not name one.
    pub fn table_name_or_default<'a>(&'a self, name: Option<&'a str>) -> &'a str {
        match name.map(str::trim).filter(|n| !n.is_empty()) {
            Some(name) => name,
            None => &self.config.database.default_table,
        }
    }

    /// The shared engine connection, opened on first use.
    ///
    /// Consistency parameters are tried from most to least specific; an
    /// engine rejecting one with `UnsupportedOption` moves on to the next.
    pub fn connection(&self) -> Result<Arc<dyn Engine>, EngineError> {
        let mut slot = self.connection.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(engine) = slot.as_ref() {
            return Ok(Arc::clone(engine));
        }

        let uri = &self.config.database.uri;
        let mut last_error = None;
        for param in ConsistencyParam::fallback_chain(self.config.database.weak_read_consistency_secs) {
            match self.connector.connect(uri, param) {
                Ok(engine) => {
                    log::info!("connected to {uri} (consistency option: {})", param.option_name());
                    *slot = Some(Arc::clone(&engine));
                    return Ok(engine);
                }
                Err(EngineError::UnsupportedOption(option)) => {
                    log::debug!("engine rejected consistency option {option}, trying next");
                    last_error = Some(EngineError::UnsupportedOption(option));
                }
                Err(e) => {
                    log::error!("failed to connect to {uri}: {e}");
                    return Err(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| EngineError::Storage(format!("could not connect to {uri}"))))
    }

    /// Drop the connection and every cached handle; the next call reconnects.
    pub fn reset_connection(&self) {
        *self.connection.lock().unwrap_or_else(|e| e.into_inner()) = None;
        self.clear_table_cache(None);
    }

    /// Cached handle for `name`, opening it when absent or when `force_refresh` is set.
    pub fn table_cached(&self, name: &str, force_refresh: bool) -> Result<Arc<dyn Table>, EngineError> {
        if !force_refresh {
            let tables = self.tables.read().unwrap_or_else(|e| e.into_inner());
            if let Some(table) = tables.get(name) {
                return Ok(Arc::clone(table));
            }
        }
        let table = self.connection()?.open_table(name)?;
        self.tables
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string(), Arc::clone(&table));
        log::debug!("cached table handle for {name}");
        Ok(table)
    }

    /// Evict `name` (in both raw and sanitized form), or every entry when `None`.
    pub fn clear_table_cache(&self, name: Option<&str>) {
        let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
        match name {
            Some(name) => {
                tables.remove(name);
                tables.remove(&sanitize_table_name(name));
            }
            None => tables.clear(),
        }
    }

    pub fn is_cached(&self, name: &str) -> bool {
        self.tables
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(name)
    }

    /// Live table names, listed with the configured upper bound.
    pub fn all_tables(&self) -> Result<Vec<String>, EngineError> {
        self.connection()?.table_names(self.config.database.list_limit)
    }

    /// The stored name of `name`: the raw name if a table has it, else the
    /// sanitized name if a table has that, else `None`.
    pub fn resolve_existing(&self, name: &str) -> Result<Option<String>, EngineError> {
        let names = self.all_tables()?;
        if names.iter().any(|n| n == name) {
            return Ok(Some(name.to_string()));
        }
        let safe = sanitize_table_name(name);
        Ok(names.into_iter().find(|n| *n == safe))
    }
}
