//! SQL normalization, fingerprinting and pattern-signature derivation (§4.3).
//!
//! Both the Discovery Scheduler and the Pattern Library depend on this
//! being stable: `fingerprint(normalize(sql))` must not move under
//! whitespace, comment or literal changes, and `normalize` must be
//! idempotent.

use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

static LINE_COMMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"--[^\n]*").unwrap());
static BLOCK_COMMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)/\*.*?\*/").unwrap());
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static STRING_LITERAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"'(?:[^']|'')*'").unwrap());
static NUMERIC_LITERAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d+\.?\d*\b").unwrap());
static PARAM_MARKER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\$\d+|\?|:\w+)").unwrap());
static QUESTION_LIST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\(\s*\?(?:\s*,\s*\?){2,}\s*\)").unwrap());
static IDENTIFIER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b[A-Za-z_][A-Za-z0-9_]*\b").unwrap());

/// Shared keyword vocabulary: used both to decide which bare identifiers
/// survive `pattern_signature` and, by the optimizer's response parser, to
/// recognize SQL-dominated text in a completion response.
pub const SQL_KEYWORDS: &[&str] = &[
    "select", "from", "where", "join", "inner", "outer", "left", "right", "on", "group", "by",
    "order", "having", "limit", "offset", "insert", "into", "values", "update", "set", "delete",
    "create", "index", "table", "and", "or", "not", "in", "is", "null", "as", "distinct", "union",
    "all", "exists", "case", "when", "then", "else", "end", "with", "asc", "desc", "like",
    "between",
];

/// Steps 1-5 of §4.3, applied in order. Idempotent: `normalize(normalize(sql)) == normalize(sql)`.
pub fn normalize(sql: &str) -> String {
    let no_block_comments = BLOCK_COMMENT.replace_all(sql, " ");
    let no_comments = LINE_COMMENT.replace_all(&no_block_comments, " ");

    let no_strings = STRING_LITERAL.replace_all(&no_comments, "?");
    let no_params = PARAM_MARKER.replace_all(&no_strings, "?");
    let no_numbers = NUMERIC_LITERAL.replace_all(&no_params, "?");

    let lowercased = lowercase_identifiers(&no_numbers);
    let collapsed_lists = QUESTION_LIST.replace_all(&lowercased, "(?, …)");

    let collapsed_ws = WHITESPACE.replace_all(&collapsed_lists, " ");
    collapsed_ws.trim().to_string()
}

/// Lowercases bare identifiers (keywords included — case doesn't carry
/// meaning for non-quoted SQL identifiers) while leaving already-emitted
/// `?` placeholders untouched.
fn lowercase_identifiers(sql: &str) -> String {
    IDENTIFIER.replace_all(sql, |caps: &regex::Captures| caps[0].to_lowercase()).to_string()
}

/// `SHA-256(normalized_sql)` truncated to 16 hex chars.
pub fn fingerprint(normalized_sql: &str) -> String {
    let digest = Sha256::digest(normalized_sql.as_bytes());
    hex_prefix(&digest, 16)
}

fn hex_prefix(bytes: &[u8], chars: usize) -> String {
    let mut out = String::with_capacity(chars);
    for byte in bytes {
        if out.len() >= chars {
            break;
        }
        out.push_str(&format!("{byte:02x}"));
    }
    out.truncate(chars);
    out
}

/// Strips table and column identifiers from an already-normalized query,
/// keeping only clause shape (keyword skeleton plus operator tree), so
/// semantically similar queries over different tables share a signature.
pub fn pattern_signature(normalized_sql: &str) -> String {
    let stripped = IDENTIFIER.replace_all(normalized_sql, |caps: &regex::Captures| {
        let word = caps[0].to_lowercase();
        if SQL_KEYWORDS.contains(&word.as_str()) { word } else { "id".to_string() }
    });
    WHITESPACE.replace_all(stripped.trim(), " ").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_stable_under_whitespace_and_comments() {
        let a = "SELECT  *  FROM users WHERE id = 1";
        let b = "select * from users -- trailing\n where id = 1";
        assert_eq!(fingerprint(&normalize(a)), fingerprint(&normalize(b)));
    }

    #[test]
    fn fingerprint_stable_under_literal_changes() {
        let a = "SELECT * FROM users WHERE id = 1";
        let b = "SELECT * FROM users WHERE id = 999";
        assert_eq!(fingerprint(&normalize(a)), fingerprint(&normalize(b)));
    }

    #[test]
    fn normalize_is_idempotent() {
        let sql = "SELECT * FROM Orders WHERE status IN ('a','b','c','d')";
        let once = normalize(sql);
        let twice = normalize(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn different_tables_same_shape_share_signature() {
        let a = normalize("SELECT * FROM users WHERE email = 'x@y.com'");
        let b = normalize("SELECT * FROM customers WHERE address = 'z'");
        assert_eq!(pattern_signature(&a), pattern_signature(&b));
    }

    #[test]
    fn different_table_names_produce_different_fingerprints() {
        let a = normalize("SELECT * FROM users WHERE id = 1");
        let b = normalize("SELECT * FROM accounts WHERE id = 1");
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn collapses_in_list() {
        let sql = "SELECT id FROM orders WHERE status IN (1, 2, 3, 4)";
        let normalized = normalize(sql);
        assert!(normalized.contains("in (?, …)"), "got: {normalized}");
    }
}
