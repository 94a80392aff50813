//! Filter-expression helpers for document deletion and hybrid search.
//!
//! Only simple conjunctive filters are understood: at most one distance
//! comparison is extracted (the first one found) and everything else is
//! passed through to the engine untouched. A clause inside parentheses is
//! removed along with the connective it leaves next to the bracket; an OR
//! around it is not rewritten into an equivalent filter.

use std::sync::LazyLock;

use regex::Regex;

static DISTANCE_CLAUSE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(_distance|distance|score)\s*([<>=!]+)\s*(-?\d+(?:\.\d+)?(?:[eE][-+]?\d+)?)")
        .expect("distance clause pattern regex")
});

static LEADING_CONNECTIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(and|or)\b\s*").expect("leading connective pattern regex")
});

static TRAILING_CONNECTIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\s*\b(and|or)\s*$").expect("trailing connective pattern regex")
});

static DOUBLED_CONNECTIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(and|or)\s+(and|or)\b").expect("doubled connective pattern regex")
});

static OPENING_CONNECTIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\(\s*(and|or)\b\s*").expect("opening connective pattern regex")
});

static CLOSING_CONNECTIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\s*\b(and|or)\s*\)").expect("closing connective pattern regex")
});

static EMPTY_GROUP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(\s*\)").expect("empty group pattern regex"));

/// Filters that match every row.
const TAUTOLOGIES: &[&str] = &["true", "1=1", "1 = 1"];

/// True for filters that would delete the whole table.
pub fn is_dangerous_delete(filter: &str) -> bool {
    let normalized = filter.trim().to_ascii_lowercase();
    TAUTOLOGIES.contains(&normalized.as_str())
}

/// Result of pulling a distance comparison out of a filter.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedFilter {
    /// Remaining scalar filter, `None` when nothing is left.
    pub remaining: Option<String>,
    /// Upper bound on distance, when the clause could express one.
    pub threshold: Option<f64>,
}

/// Extract the first `_distance`/`distance`/`score` comparison from `filter`.
///
/// `<=`, `<`, `==` and `=` become a threshold. Other operators cannot be
/// expressed as an upper bound; they are logged and dropped. The clause is
/// removed from the filter either way, along with any connective it leaves
/// dangling.
pub fn extract_distance_clause(filter: &str) -> ExtractedFilter {
    let Some(caps) = DISTANCE_CLAUSE.captures(filter) else {
        let trimmed = filter.trim();
        return ExtractedFilter {
            remaining: (!trimmed.is_empty()).then(|| trimmed.to_string()),
            threshold: None,
        };
    };

    let operator = &caps[2];
    let value: Option<f64> = caps[3].parse().ok();
    let threshold = match operator {
        "<=" | "<" | "==" | "=" => value,
        other => {
            log::warn!("distance operator '{other}' cannot be used as a threshold, ignoring clause");
            None
        }
    };

    let whole = caps.get(0).map(|m| m.range()).unwrap_or(0..0);
    let mut rest = String::with_capacity(filter.len());
    rest.push_str(&filter[..whole.start]);
    rest.push(' ');
    rest.push_str(&filter[whole.end..]);

    let rest = DOUBLED_CONNECTIVE.replace_all(&rest, "$1");
    let rest = OPENING_CONNECTIVE.replace_all(&rest, "(");
    let rest = CLOSING_CONNECTIVE.replace_all(&rest, ")");
    let rest = EMPTY_GROUP.replace_all(&rest, " ");
    let rest = DOUBLED_CONNECTIVE.replace_all(&rest, "$1");
    let rest = LEADING_CONNECTIVE.replace(&rest, "");
    let rest = TRAILING_CONNECTIVE.replace(&rest, "");
    let rest = rest.split_whitespace().collect::<Vec<_>>().join(" ");

    log::debug!("extracted distance clause '{}' from filter, remaining '{rest}'", &caps[0]);
    ExtractedFilter {
        remaining: (!rest.is_empty()).then_some(rest),
        threshold,
    }
}
