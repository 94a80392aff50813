//! Table-name sanitization.
//!
//! Every table name that reaches the engine goes through
//! [`sanitize_table_name`], which maps arbitrary user input onto the
//! CamelCase alphanumeric form `[A-Z][A-Za-z0-9]*`. Names already in that
//! form pass through untouched, so the mapping is idempotent.

use sha2::{Digest, Sha256};

/// Name used when the caller supplies an empty or whitespace-only name.
pub const FALLBACK_TABLE_NAME: &str = "DefaultTable";

/// Prefix for names derived from a hash or starting with a digit.
const GENERATED_PREFIX: &str = "Table";

/// Returns true when `name` is already in canonical CamelCase form.
pub fn is_canonical(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_uppercase() => chars.all(|c| c.is_ascii_alphanumeric()),
        _ => false,
    }
}

/// Map a user-supplied table name onto a storage-safe identifier.
pub fn sanitize_table_name(name: &str) -> String {
    let original = name.trim();
    if original.is_empty() {
        log::warn!("empty table name provided, using '{FALLBACK_TABLE_NAME}'");
        return FALLBACK_TABLE_NAME.to_string();
    }

    if is_canonical(original) {
        return original.to_string();
    }

    let mut camel: String = original
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(capitalize)
        .collect();

    // A leading digit cannot be upper-cased; anchor it behind the prefix so
    // the result is canonical and sanitizing it again is a no-op.
    if camel.starts_with(|c: char| c.is_ascii_digit()) {
        camel.insert_str(0, GENERATED_PREFIX);
    }

    if camel.is_empty() {
        camel = format!("{GENERATED_PREFIX}{}", name_hash(original) % 10_000);
    }

    log::info!("table name sanitized: '{original}' -> '{camel}'");
    camel
}

/// Upper-case the first letter of a word and lower-case the rest.
fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}

/// Stable hash of the original input, used only for degenerate names.
fn name_hash(input: &str) -> u64 {
    let digest = Sha256::digest(input.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn canonical_name_is_unchanged() {
        assert_eq!(sanitize_table_name("TestTable"), "TestTable");
        assert_eq!(sanitize_table_name("Table42"), "Table42");
    }

    #[test]
    fn separators_become_word_boundaries() {
        assert_eq!(sanitize_table_name("test-table"), "TestTable");
        assert_eq!(sanitize_table_name("my_awesome_table"), "MyAwesomeTable");
        assert_eq!(sanitize_table_name("test.table.name"), "TestTableName");
        assert_eq!(sanitize_table_name("vectool-table"), "VectoolTable");
    }

    #[test]
    fn lowercase_single_word_is_capitalized() {
        assert_eq!(sanitize_table_name("demo"), "Demo");
        assert_eq!(sanitize_table_name("camelCase"), "Camelcase");
    }

    #[test]
    fn empty_and_whitespace_fall_back() {
        assert_eq!(sanitize_table_name(""), "DefaultTable");
        assert_eq!(sanitize_table_name("   \t"), "DefaultTable");
    }

    #[test]
    fn surrounding_whitespace_is_ignored() {
        assert_eq!(sanitize_table_name("  Docs  "), "Docs");
    }

    #[test]
    fn symbols_only_uses_hashed_name() {
        let name = sanitize_table_name("@#$%");
        assert!(name.starts_with("Table"), "got {name}");
        let suffix: u64 = name["Table".len()..].parse().unwrap();
        assert!(suffix < 10_000);
        assert_eq!(name, sanitize_table_name("@#$%"), "hash fallback must be stable");
    }

    #[test]
    fn leading_digit_gets_prefix() {
        assert_eq!(sanitize_table_name("2024-reports"), "Table2024Reports");
    }

    #[test]
    fn distinct_separators_collide() {
        assert_eq!(
            sanitize_table_name("user-docs"),
            sanitize_table_name("user_docs")
        );
    }

    proptest! {
        #[test]
        fn sanitize_is_idempotent(name in ".{0,40}") {
            let once = sanitize_table_name(&name);
            prop_assert_eq!(sanitize_table_name(&once), once.clone());
            prop_assert!(is_canonical(&once));
        }
    }
}
