//! Layered response parsing (§4.5). Strategies are tried in order; the
//! first to produce non-empty SQL wins and its name is recorded. Strategy
//! 7 (raw response) always succeeds, so this function never fails — the
//! fallback is data (an ordered list), not exception-driven control flow.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::ParsingStrategy;

const SQL_LEADING_KEYWORDS: &[&str] = &["select", "with", "insert", "update", "delete", "create"];

static TAGGED_SQL: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<SQL>(.*?)</SQL>").unwrap());
static TAGGED_DASH_SECTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)-{2,}\s*OPTIMIZED SQL\s*-{2,}\s*(.*?)(?:-{2,}|\z)").unwrap());
static FENCED_SQL_BLOCK: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)```(?:sql)?\s*\n?(.*?)```").unwrap());
static EMERGENCY_KEYWORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)\b(select|with|insert|update|delete|create)\b.*").unwrap());

/// Parses a `CompletionService` response into `(sql, strategy)`.
pub fn parse_response(raw: &str) -> (String, ParsingStrategy) {
    if let Some(sql) = try_tagged_section(raw) {
        return (sql, ParsingStrategy::TaggedSection);
    }
    if let Some(sql) = try_fenced_code_block(raw) {
        return (sql, ParsingStrategy::FencedCodeBlock);
    }
    if let Some(sql) = try_leading_keyword_block(raw) {
        return (sql, ParsingStrategy::LeadingKeywordBlock);
    }
    if let Some(sql) = try_keyword_dominated_span(raw) {
        return (sql, ParsingStrategy::KeywordDominatedSpan);
    }
    if let Some(sql) = try_full_response_validation(raw) {
        return (sql, ParsingStrategy::FullResponseValidation);
    }
    if let Some(sql) = try_emergency_regex_extraction(raw) {
        return (sql, ParsingStrategy::EmergencyRegexExtraction);
    }
    (raw.trim().to_string(), ParsingStrategy::RawResponse)
}

fn try_tagged_section(raw: &str) -> Option<String> {
    if let Some(caps) = TAGGED_SQL.captures(raw) {
        return non_empty(caps[1].trim());
    }
    if let Some(caps) = TAGGED_DASH_SECTION.captures(raw) {
        return non_empty(caps[1].trim());
    }
    None
}

fn try_fenced_code_block(raw: &str) -> Option<String> {
    FENCED_SQL_BLOCK.captures(raw).and_then(|caps| non_empty(caps[1].trim()))
}

/// First block whose first non-comment token is a DML/DDL keyword: scan
/// line by line, skip blank/comment lines, and once a keyword line is
/// found collect until a blank line or end of input.
fn try_leading_keyword_block(raw: &str) -> Option<String> {
    let lines: Vec<&str> = raw.lines().collect();
    for (i, line) in lines.iter().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with("--") || trimmed.starts_with("//") {
            continue;
        }
        let first_word = trimmed.split_whitespace().next().unwrap_or("").to_lowercase();
        if SQL_LEADING_KEYWORDS.contains(&first_word.as_str()) {
            let block: Vec<&str> = lines[i..].iter().take_while(|l| !l.trim().is_empty()).copied().collect();
            return non_empty(block.join("\n").trim());
        }
        break;
    }
    None
}

/// Heuristic: the longest contiguous span of lines whose tokens are
/// dominated (>50%) by SQL keywords.
fn try_keyword_dominated_span(raw: &str) -> Option<String> {
    let lines: Vec<&str> = raw.lines().collect();
    let mut best: Option<(usize, usize)> = None;
    let mut current_start: Option<usize> = None;

    for (i, line) in lines.iter().enumerate() {
        if is_keyword_dominated(line) {
            if current_start.is_none() {
                current_start = Some(i);
            }
        } else if let Some(start) = current_start.take() {
            update_best(&mut best, start, i);
        }
    }
    if let Some(start) = current_start {
        update_best(&mut best, start, lines.len());
    }

    best.and_then(|(start, end)| non_empty(lines[start..end].join("\n").trim()))
}

fn update_best(best: &mut Option<(usize, usize)>, start: usize, end: usize) {
    if best.map(|(s, e)| end - start > e - s).unwrap_or(true) {
        *best = Some((start, end));
    }
}

fn is_keyword_dominated(line: &str) -> bool {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.is_empty() {
        return false;
    }
    let matches = tokens.iter().filter(|t| crate::normalize::SQL_KEYWORDS.contains(&t.to_lowercase().as_str())).count();
    matches as f64 / tokens.len() as f64 > 0.5
}

/// Strips obvious prose lines (ending in a period, no SQL punctuation) and
/// validates what remains starts with a recognized keyword.
fn try_full_response_validation(raw: &str) -> Option<String> {
    let candidate: String = raw
        .lines()
        .filter(|line| {
            let t = line.trim();
            !t.is_empty() && !(t.ends_with('.') && !t.to_lowercase().contains("select"))
        })
        .collect::<Vec<_>>()
        .join("\n");
    let trimmed = candidate.trim();
    let first_word = trimmed.split_whitespace().next()?.to_lowercase();
    if SQL_LEADING_KEYWORDS.contains(&first_word.as_str()) {
        non_empty(trimmed)
    } else {
        None
    }
}

fn try_emergency_regex_extraction(raw: &str) -> Option<String> {
    EMERGENCY_KEYWORD
        .find_iter(raw)
        .map(|m| m.as_str())
        .max_by_key(|s| s.len())
        .and_then(|s| non_empty(s.trim()))
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() { None } else { Some(s.to_string()) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tagged_section_wins_when_present() {
        let raw = "Here is the fix:\n<SQL>SELECT id FROM users WHERE email = ?</SQL>\nExplanation follows.";
        let (sql, strategy) = parse_response(raw);
        assert_eq!(strategy, ParsingStrategy::TaggedSection);
        assert_eq!(sql, "SELECT id FROM users WHERE email = ?");
    }

    #[test]
    fn malformed_response_still_produces_raw_response() {
        let raw = "the model just rambled about nothing relevant at all";
        let (sql, strategy) = parse_response(raw);
        assert_eq!(strategy, ParsingStrategy::RawResponse);
        assert_eq!(sql, raw);
    }

    #[test]
    fn fenced_block_recognized() {
        let raw = "```sql\nSELECT 1\n```";
        let (sql, strategy) = parse_response(raw);
        assert_eq!(strategy, ParsingStrategy::FencedCodeBlock);
        assert_eq!(sql, "SELECT 1");
    }
}
