use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::context::DbContext;
use crate::embedding::embed_all;
use crate::engine::{DISTANCE_COLUMN, Metric, Row, SUPPORTED_METRICS, Table, VectorQuery};
use crate::error::ToolError;
use crate::filter::extract_distance_clause;
use crate::ops::find_table;
use crate::reconcile::TableLayout;
use crate::retry::CreateStatus;
use crate::schema::SchemaDef;

/// Distance attribute names tolerated on search hits, in lookup order.
const DISTANCE_KEYS: &[&str] = &[DISTANCE_COLUMN, "distance", "score"];

/// A search answer: a boolean for existence checks (`top_k == 0`), hits otherwise.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum SearchOutcome {
    Exists(bool),
    Results(SearchResults),
}

#[derive(Debug, Serialize)]
pub struct SearchResults {
    pub results: Vec<Row>,
    pub query: String,
    pub table_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metric: Option<String>,
    pub count: usize,
}

#[derive(Debug, Clone)]
pub struct HybridRequest<'a> {
    pub query: &'a str,
    pub table_name: Option<&'a str>,
    pub filter: Option<&'a str>,
    pub top_k: i64,
    pub metric: &'a str,
    pub distance_threshold: Option<f64>,
    pub auto_create: bool,
}

enum Target {
    Existing { name: String, table: Arc<dyn Table> },
    /// Created by this call, so known to be empty.
    Created { name: String },
}

fn resolve_target(ctx: &DbContext, table_name: Option<&str>, auto_create: bool) -> Result<Target, ToolError> {
    let requested = ctx.table_name_or_default(table_name);
    match find_table(ctx, requested)? {
        Some(name) => {
            let table = ctx
                .table_cached(&name, false)
                .map_err(|e| ToolError::engine(&format!("Failed to open table '{name}'"), e))?;
            Ok(Target::Existing { name, table })
        }
        None if auto_create => {
            let created = ctx.create_table_with_retry(
                requested,
                &SchemaDef::default_for(ctx.embedder().clone()),
                ctx.retry().max_retries,
            )?;
            match created.status {
                CreateStatus::Created => Ok(Target::Created { name: created.name }),
                CreateStatus::AlreadyExisted | CreateStatus::CreatedConcurrently => {
                    log::info!("{} while auto-creating, searching it", created.message);
                    Ok(Target::Existing {
                        name: created.name,
                        table: created.table,
                    })
                }
            }
        }
        None => Err(ToolError::TableNotFound {
            table: requested.to_string(),
            hint: Some("Set auto_create_table=true to create it automatically".into()),
        }),
    }
}

fn check_top_k(top_k: i64) -> Result<usize, ToolError> {
    usize::try_from(top_k)
        .map_err(|_| ToolError::InvalidInput(format!("top_k must be >= 0, got {top_k}")))
}

fn empty_outcome(top_k: usize, query: &str, table_name: String, hybrid_metric: Option<&str>) -> SearchOutcome {
    if top_k == 0 {
        return SearchOutcome::Exists(false);
    }
    SearchOutcome::Results(SearchResults {
        results: Vec::new(),
        query: query.to_string(),
        table_name,
        search_type: hybrid_metric.map(|_| "hybrid".to_string()),
        metric: hybrid_metric.map(str::to_string),
        count: 0,
    })
}

/// Inspect the table, check widths and embed the query text.
fn prepare(ctx: &DbContext, name: &str, table: &dyn Table, query: &str) -> Result<(TableLayout, Vec<f32>), ToolError> {
    match table.count_rows(None) {
        Ok(rows) => log::debug!("searching {name} ({rows} rows)"),
        Err(e) => log::warn!("row count on {name} failed, searching anyway: {e}"),
    }
    let schema = table
        .schema()
        .map_err(|e| ToolError::engine(&format!("Failed to read schema of '{name}'"), e))?;
    let layout = TableLayout::inspect(name, schema)?;
    layout.check_dimensions(ctx.embedder().as_ref())?;
    let vector = embed_all(ctx.embedder().as_ref(), &[query.to_string()])?
        .into_iter()
        .next()
        .ok_or_else(|| ToolError::Embedding("embedder returned no vectors".into()))?;
    Ok((layout, vector))
}

/// Run `query`, refreshing the cached handle and retrying once on failure.
fn search_with_refresh(
    ctx: &DbContext,
    name: &str,
    table: &Arc<dyn Table>,
    query: &VectorQuery,
) -> Result<Vec<Row>, ToolError> {
    match table.search(query) {
        Ok(rows) => Ok(rows),
        Err(first) => {
            log::warn!("search on {name} failed, refreshing table handle: {first}");
            let fresh = ctx
                .table_cached(name, true)
                .map_err(|e| ToolError::engine(&format!("Failed to reopen table '{name}'"), e))?;
            fresh
                .search(query)
                .map_err(|e| ToolError::engine(&format!("Search on '{name}' failed"), e))
        }
    }
}

/// Plain vector search over the document column.
pub fn query(
    ctx: &DbContext,
    query_text: &str,
    table_name: Option<&str>,
    top_k: i64,
    auto_create: bool,
) -> Result<SearchOutcome, ToolError> {
    let top_k = check_top_k(top_k)?;
    if query_text.trim().is_empty() {
        return Err(ToolError::InvalidInput("Query text must not be empty".into()));
    }

    let (name, table) = match resolve_target(ctx, table_name, auto_create)? {
        Target::Created { name } => return Ok(empty_outcome(top_k, query_text, name, None)),
        Target::Existing { name, table } => (name, table),
    };
    let (layout, vector) = prepare(ctx, &name, table.as_ref(), query_text)?;

    let limit = if top_k == 0 { 1 } else { top_k };
    let request = VectorQuery::new(vector, limit).select(vec![layout.doc_field.clone()]);
    let results = search_with_refresh(ctx, &name, &table, &request)?;

    if top_k == 0 {
        return Ok(SearchOutcome::Exists(!results.is_empty()));
    }
    log::info!("query on {name} returned {} results", results.len());
    Ok(SearchOutcome::Results(SearchResults {
        count: results.len(),
        results,
        query: query_text.to_string(),
        table_name: name,
        search_type: None,
        metric: None,
    }))
}

/// Vector search with a chosen metric, a scalar filter and an optional
/// distance ceiling, which may also be written into the filter itself.
pub fn hybrid(ctx: &DbContext, request: &HybridRequest<'_>) -> Result<SearchOutcome, ToolError> {
    let top_k = check_top_k(request.top_k)?;
    let metric = Metric::parse(request.metric).ok_or_else(|| {
        ToolError::InvalidInput(format!(
            "Invalid distance metric '{}'. Valid options: {}",
            request.metric,
            SUPPORTED_METRICS.join(", ")
        ))
    })?;
    if request.query.trim().is_empty() {
        return Err(ToolError::InvalidInput("Query text must not be empty".into()));
    }

    let (name, table) = match resolve_target(ctx, request.table_name, request.auto_create)? {
        Target::Created { name } => {
            return Ok(empty_outcome(top_k, request.query, name, Some(request.metric)));
        }
        Target::Existing { name, table } => (name, table),
    };
    let (layout, vector) = prepare(ctx, &name, table.as_ref(), request.query)?;

    let mut threshold = request.distance_threshold;
    let mut filter = None;
    if let Some(raw) = request.filter.map(str::trim).filter(|f| !f.is_empty()) {
        let extracted = extract_distance_clause(raw);
        if let Some(from_filter) = extracted.threshold {
            match threshold {
                Some(explicit) => log::info!(
                    "distance threshold {from_filter} from filter overrides explicit {explicit}"
                ),
                None => log::info!("using distance threshold {from_filter} from filter"),
            }
            threshold = Some(from_filter);
        }
        filter = extracted.remaining;
    }

    let wanted = if top_k == 0 { 1 } else { top_k };
    let fetch = if threshold.is_some() { wanted * 2 } else { wanted };
    let mut search = VectorQuery::new(vector, fetch)
        .metric(metric)
        .select(layout.scalar_columns());
    if let Some(filter) = &filter {
        search = search.filter(filter.clone());
    }

    let raw = search_with_refresh(ctx, &name, &table, &search)?;
    let results = match threshold {
        Some(limit) => filter_by_distance(raw, limit, wanted),
        None => raw.into_iter().take(wanted).collect(),
    };

    if top_k == 0 {
        return Ok(SearchOutcome::Exists(!results.is_empty()));
    }
    log::info!(
        "hybrid search on {name} ({}) returned {} results",
        metric.as_str(),
        results.len()
    );
    Ok(SearchOutcome::Results(SearchResults {
        count: results.len(),
        results,
        query: request.query.to_string(),
        table_name: name,
        search_type: Some("hybrid".into()),
        metric: Some(request.metric.to_string()),
    }))
}

fn hit_distance(hit: &Row) -> Option<f64> {
    DISTANCE_KEYS
        .iter()
        .find_map(|key| hit.get(*key).and_then(Value::as_f64))
}

/// Keep hits within `threshold`, at most `limit` of them.
///
/// Hits without any distance attribute are kept.
pub fn filter_by_distance(hits: Vec<Row>, threshold: f64, limit: usize) -> Vec<Row> {
    hits.into_iter()
        .filter(|hit| match hit_distance(hit) {
            Some(distance) => distance <= threshold,
            None => {
                log::debug!("search hit has no distance attribute, keeping it");
                true
            }
        })
        .take(limit)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::documents::ingest;
    use crate::testutil::{FlakyConnector, compass_context, flaky_context, test_context};
    use serde_json::json;

    fn hybrid_request<'a>(table: &'a str, top_k: i64) -> HybridRequest<'a> {
        HybridRequest {
            query: "east",
            table_name: Some(table),
            filter: None,
            top_k,
            metric: "dot",
            distance_threshold: None,
            auto_create: false,
        }
    }

    fn results(outcome: SearchOutcome) -> SearchResults {
        match outcome {
            SearchOutcome::Results(results) => results,
            SearchOutcome::Exists(flag) => panic!("expected results, got existence flag {flag}"),
        }
    }

    fn docs(results: &SearchResults) -> Vec<&str> {
        results
            .results
            .iter()
            .map(|r| r["doc"].as_str().unwrap())
            .collect()
    }

    #[test]
    fn negative_top_k_is_invalid() {
        let ctx = test_context();
        assert!(matches!(query(&ctx, "q", None, -1, true), Err(ToolError::InvalidInput(_))));
        let mut request = hybrid_request("T", -3);
        request.auto_create = true;
        assert!(matches!(hybrid(&ctx, &request), Err(ToolError::InvalidInput(_))));
    }

    #[test]
    fn existence_check_on_auto_created_table_is_false() {
        let ctx = test_context();
        let outcome = query(&ctx, "anything", Some("fresh"), 0, true).unwrap();
        assert!(matches!(outcome, SearchOutcome::Exists(false)));
        assert!(ctx.verify_table_exists("Fresh", 1));
    }

    #[test]
    fn auto_created_table_returns_empty_results() {
        let ctx = test_context();
        let outcome = results(query(&ctx, "anything", Some("fresh"), 5, true).unwrap());
        assert_eq!(outcome.count, 0);
        assert_eq!(outcome.table_name, "Fresh");
    }

    #[test]
    fn missing_table_without_auto_create_fails() {
        let ctx = test_context();
        let err = query(&ctx, "q", Some("nope"), 5, false).unwrap_err();
        assert!(matches!(err, ToolError::TableNotFound { .. }));
    }

    #[test]
    fn existence_check_reflects_table_contents() {
        let ctx = test_context();
        query(&ctx, "q", Some("Docs"), 0, true).unwrap();
        assert!(matches!(query(&ctx, "q", Some("Docs"), 0, false).unwrap(), SearchOutcome::Exists(false)));
        ingest(&ctx, Some("Docs"), &json!(["something"]), false).unwrap();
        assert!(matches!(query(&ctx, "q", Some("Docs"), 0, false).unwrap(), SearchOutcome::Exists(true)));
    }

    #[test]
    fn query_returns_nearest_documents_with_distance() {
        let ctx = compass_context();
        let outcome = results(query(&ctx, "east", Some("Compass"), 2, false).unwrap());
        assert_eq!(outcome.count, 2);
        assert_eq!(outcome.query, "east");
        assert_eq!(docs(&outcome)[0], "east");
        let first = &outcome.results[0];
        assert!(first.contains_key(DISTANCE_COLUMN));
        assert!(!first.contains_key("vector"));
        assert!(outcome.search_type.is_none());
    }

    #[test]
    fn query_checks_dimensions() {
        let ctx = test_context();
        let schema = json!({"doc": "str", "vector": "Vector(512)"});
        crate::ops::tables::create_table(&ctx, "Wide", schema.as_object()).unwrap();
        let err = query(&ctx, "q", Some("Wide"), 3, false).unwrap_err();
        assert!(matches!(err, ToolError::DimensionMismatch { .. }));
    }

    #[test]
    fn invalid_metric_lists_choices() {
        let ctx = compass_context();
        let mut request = hybrid_request("Compass", 3);
        request.metric = "bogus";
        let text = hybrid(&ctx, &request).unwrap_err().to_response();
        assert!(text.contains("Invalid distance metric"));
        assert!(text.contains("cosine, dot, euclidean, hamming, l2"));
    }

    #[test]
    fn distance_threshold_keeps_only_close_rows_in_order() {
        let ctx = compass_context();
        for top_k in [2, 3, 10] {
            let mut request = hybrid_request("Compass", top_k);
            request.distance_threshold = Some(0.5);
            let outcome = results(hybrid(&ctx, &request).unwrap());
            assert_eq!(docs(&outcome), vec!["east", "east-northeast"], "top_k {top_k}");
            assert_eq!(outcome.metric.as_deref(), Some("dot"));
            assert_eq!(outcome.search_type.as_deref(), Some("hybrid"));
        }
    }

    #[test]
    fn threshold_in_filter_overrides_argument() {
        let ctx = compass_context();
        let mut request = hybrid_request("Compass", 10);
        request.distance_threshold = Some(0.5);
        request.filter = Some("_distance <= 0.2");
        let outcome = results(hybrid(&ctx, &request).unwrap());
        assert_eq!(docs(&outcome), vec!["east"]);
    }

    #[test]
    fn remaining_filter_is_applied() {
        let ctx = compass_context();
        let mut request = hybrid_request("Compass", 10);
        request.filter = Some("doc != 'east' AND _distance < 0.7");
        let outcome = results(hybrid(&ctx, &request).unwrap());
        assert_eq!(docs(&outcome), vec!["east-northeast", "northeast"]);
    }

    #[test]
    fn hybrid_zero_top_k_returns_boolean() {
        let ctx = compass_context();
        let mut request = hybrid_request("Compass", 0);
        assert!(matches!(hybrid(&ctx, &request).unwrap(), SearchOutcome::Exists(true)));
        request.distance_threshold = Some(0.01);
        request.query = "north";
        request.filter = Some("doc = 'east'");
        assert!(matches!(hybrid(&ctx, &request).unwrap(), SearchOutcome::Exists(false)));
    }

    #[test]
    fn hybrid_results_omit_vectors() {
        let ctx = compass_context();
        let outcome = results(hybrid(&ctx, &hybrid_request("Compass", 1)).unwrap());
        assert!(!outcome.results[0].contains_key("vector"));
        assert!(outcome.results[0].contains_key("doc"));
    }

    #[test]
    fn hybrid_echoes_metric_as_given() {
        let ctx = compass_context();
        let mut request = hybrid_request("Compass", 2);
        request.metric = "euclidean";
        let outcome = results(hybrid(&ctx, &request).unwrap());
        assert_eq!(outcome.metric.as_deref(), Some("euclidean"));
        assert_eq!(outcome.count, 2);

        request.table_name = Some("Fresh");
        request.auto_create = true;
        let outcome = results(hybrid(&ctx, &request).unwrap());
        assert_eq!(outcome.count, 0);
        assert_eq!(outcome.metric.as_deref(), Some("euclidean"));
    }

    /// Create `name` straight through the engine, holding `docs`, and keep
    /// it out of listings and opens for the next two lookups.
    fn seed_hidden_table(ctx: &DbContext, connector: &FlakyConnector, name: &str, docs: &[&str]) {
        connector.hide_new_tables(2);
        let table = ctx
            .connection()
            .unwrap()
            .create_table(name, &SchemaDef::default_for(ctx.embedder().clone()))
            .unwrap();
        let docs: Vec<String> = docs.iter().map(|d| d.to_string()).collect();
        let vectors = embed_all(ctx.embedder().as_ref(), &docs).unwrap();
        table.add(crate::reconcile::default_rows(&docs, vectors)).unwrap();
    }

    #[test]
    fn auto_create_searches_a_table_that_already_existed() {
        let connector = Arc::new(FlakyConnector::new());
        let ctx = flaky_context(connector.clone());

        seed_hidden_table(&ctx, &connector, "Docs", &["alpha", "beta"]);
        let outcome = results(query(&ctx, "alpha", Some("Docs"), 5, true).unwrap());
        assert_eq!(outcome.count, 2);
        assert_eq!(outcome.table_name, "Docs");

        seed_hidden_table(&ctx, &connector, "Notes", &["gamma"]);
        assert!(matches!(query(&ctx, "gamma", Some("Notes"), 0, true).unwrap(), SearchOutcome::Exists(true)));

        seed_hidden_table(&ctx, &connector, "Papers", &["delta"]);
        let mut request = hybrid_request("Papers", 3);
        request.auto_create = true;
        let outcome = results(hybrid(&ctx, &request).unwrap());
        assert_eq!(docs(&outcome), vec!["delta"]);
        assert_eq!(ctx.all_tables().unwrap().len(), 3);
    }

    #[test]
    fn table_stored_under_another_case_is_searched() {
        let connector = Arc::new(FlakyConnector::new());
        let ctx = flaky_context(connector.clone());
        connector.store_names_lowercase();
        ingest(&ctx, Some("Docs"), &json!(["alpha", "beta"]), true).unwrap();

        let outcome = results(query(&ctx, "alpha", Some("Docs"), 5, true).unwrap());
        assert_eq!(outcome.count, 2);
        assert_eq!(outcome.table_name, "docs");
        assert!(matches!(query(&ctx, "alpha", Some("Docs"), 0, true).unwrap(), SearchOutcome::Exists(true)));

        let mut request = hybrid_request("Docs", 5);
        request.query = "beta";
        request.auto_create = true;
        let outcome = results(hybrid(&ctx, &request).unwrap());
        assert_eq!(outcome.count, 2);
        assert_eq!(ctx.all_tables().unwrap(), vec!["docs"]);
    }

    #[test]
    fn failed_search_is_retried_with_fresh_handle() {
        let connector = Arc::new(FlakyConnector::new());
        let ctx = flaky_context(connector.clone());
        ingest(&ctx, Some("Docs"), &json!(["alpha", "beta"]), true).unwrap();
        connector.fail_next_searches(1);
        let outcome = results(query(&ctx, "alpha", Some("Docs"), 1, false).unwrap());
        assert_eq!(outcome.count, 1);
    }

    #[test]
    fn search_failing_twice_surfaces_error() {
        let connector = Arc::new(FlakyConnector::new());
        let ctx = flaky_context(connector.clone());
        ingest(&ctx, Some("Docs"), &json!(["alpha"]), true).unwrap();
        connector.fail_next_searches(2);
        let err = query(&ctx, "alpha", Some("Docs"), 1, false).unwrap_err();
        assert!(err.to_response().starts_with("Error: Search on 'Docs' failed"));
    }

    #[test]
    fn filter_by_distance_fails_open_and_truncates() {
        let hits: Vec<Row> = vec![
            json!({"doc": "a", "_distance": 0.1}),
            json!({"doc": "b", "distance": 0.9}),
            json!({"doc": "c"}),
            json!({"doc": "d", "score": 0.2}),
        ]
        .into_iter()
        .map(|v| v.as_object().cloned().unwrap())
        .collect();
        let kept = filter_by_distance(hits.clone(), 0.5, 10);
        let names: Vec<&str> = kept.iter().map(|r| r["doc"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["a", "c", "d"]);
        assert_eq!(filter_by_distance(hits, 0.5, 2).len(), 2);
    }

    #[test]
    fn outcome_serializes_untagged() {
        assert_eq!(serde_json::to_value(SearchOutcome::Exists(true)).unwrap(), json!(true));
        let value = serde_json::to_value(SearchOutcome::Results(SearchResults {
            results: vec![],
            query: "q".into(),
            table_name: "T".into(),
            search_type: None,
            metric: None,
            count: 0,
        }))
        .unwrap();
        assert_eq!(value, json!({"results": [], "query": "q", "table_name": "T", "count": 0}));
    }
}
