// vectool-core: document storage, search and table tools over a vector database.

pub mod config;
pub mod error;
pub mod sanitize;
pub mod schema;
pub mod engine;
pub mod embedding;
pub mod context;
pub mod retry;
pub mod reconcile;
pub mod filter;
pub mod ops;
pub mod optimize;
pub mod tool;

// Test utilities - always available for use by vectool-server and tests
pub mod testutil;
