//! Pre-flight PubMed query syntax validation.
//!
//! Catches the syntax slips that would otherwise fail silently upstream.
//! A reliable automatic fix exists only for unbalanced parens/quotes and
//! dangling boolean operators; anything else is reported, not rewritten.

use std::sync::OnceLock;

use regex::Regex;

const MAX_QUERY_LENGTH: usize = 4096;

const VALID_FIELD_TAGS: &[&str] = &[
    "title", "ti", "title/abstract", "tiab", "abstract", "ab", "text word", "tw", "all fields",
    "all", "mesh terms", "mesh", "mesh major topic", "majr", "mesh subheading", "sh",
    "mesh:noexp", "journal", "ta", "volume", "vi", "issue", "ip", "page", "pg",
    "publication type", "pt", "publication date", "dp", "edat", "pdat", "mdat", "crdt",
    "author", "au", "first author", "1au", "last author", "lastau", "full author name", "fau",
    "corporate author", "cn", "author identifier", "auid", "pmid", "doi", "pmcid", "lid",
    "language", "la", "affiliation", "ad", "filter", "sb", "subset", "grant number", "gr",
    "investigator", "ir", "pharmacological action", "pa", "supplementary concept", "nm",
    "place of publication", "pl", "publisher", "pubn", "other term", "ot",
];

#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    /// Auto-corrected form, present only when it differs from the input.
    pub corrected_query: Option<String>,
}

fn field_tag_pattern() -> &'static Regex {
    static P: OnceLock<Regex> = OnceLock::new();
    P.get_or_init(|| Regex::new(r"\[([^\]]+)\]").expect("static regex"))
}

fn consecutive_bool_pattern() -> &'static Regex {
    static P: OnceLock<Regex> = OnceLock::new();
    P.get_or_init(|| Regex::new(r"(?i)\b(AND|OR|NOT)\s+(AND|OR|NOT)\b").expect("static regex"))
}

fn leading_bool_pattern() -> &'static Regex {
    static P: OnceLock<Regex> = OnceLock::new();
    P.get_or_init(|| Regex::new(r"(?i)^\s*(AND|OR)\s+").expect("static regex"))
}

fn trailing_bool_pattern() -> &'static Regex {
    static P: OnceLock<Regex> = OnceLock::new();
    P.get_or_init(|| Regex::new(r"(?i)\s+(AND|OR|NOT)\s*$").expect("static regex"))
}

pub fn validate(query: &str) -> ValidationReport {
    let mut report = ValidationReport::default();

    if query.trim().is_empty() {
        report.errors.push("Empty query".into());
        return report;
    }

    let mut corrected = query.to_string();

    if query.len() > MAX_QUERY_LENGTH {
        report.warnings.push(format!(
            "Query length ({}) exceeds the recommended limit ({MAX_QUERY_LENGTH}); PubMed may truncate or reject it",
            query.len()
        ));
    }

    if let Some(err) = check_parentheses(query) {
        report.errors.push(err);
        corrected = fix_parentheses(&corrected);
    }

    if let Some(err) = check_quotes(query) {
        report.errors.push(err);
        corrected = fix_quotes(&corrected);
    }

    check_field_tags(query, &mut report);

    let had_bool_errors = check_boolean_operators(query, &mut report);
    if had_bool_errors {
        corrected = fix_boolean_operators(&corrected);
    }

    if corrected.contains("()") {
        report
            .warnings
            .push("Query contains empty parentheses \"()\"".into());
        corrected = corrected.replace("()", "");
        corrected = corrected.split_whitespace().collect::<Vec<_>>().join(" ");
    }

    report.is_valid = report.errors.is_empty();
    if corrected != query {
        report.corrected_query = Some(corrected);
    }
    report
}

fn check_parentheses(query: &str) -> Option<String> {
    let mut in_quote = false;
    let mut depth = 0i32;
    for ch in query.chars() {
        match ch {
            '"' => in_quote = !in_quote,
            '(' if !in_quote => depth += 1,
            ')' if !in_quote => {
                depth -= 1;
                if depth < 0 {
                    return Some(
                        "Unbalanced parentheses: closing ')' without matching opening '('".into(),
                    );
                }
            }
            _ => {}
        }
    }
    (depth > 0).then(|| {
        format!("Unbalanced parentheses: {depth} opening '(' without matching closing ')'")
    })
}

fn check_quotes(query: &str) -> Option<String> {
    let count = query.chars().filter(|c| *c == '"').count();
    (count % 2 != 0)
        .then(|| format!("Unbalanced quotes: {count} double quote(s) found (should be even)"))
}

fn check_field_tags(query: &str, report: &mut ValidationReport) {
    for caps in field_tag_pattern().captures_iter(query) {
        let tag = caps[1].trim().to_lowercase();
        if VALID_FIELD_TAGS.contains(&tag.as_str()) {
            continue;
        }
        let close = VALID_FIELD_TAGS
            .iter()
            .find(|candidate| is_close_match(&tag, candidate));
        match close {
            Some(suggestion) => report
                .errors
                .push(format!("Invalid field tag [{}]. Did you mean [{suggestion}]?", &caps[1])),
            None => report.warnings.push(format!(
                "Unrecognized field tag [{}]; it may be valid but is not a known tag",
                &caps[1]
            )),
        }
    }
}

fn check_boolean_operators(query: &str, report: &mut ValidationReport) -> bool {
    static QUOTED: OnceLock<Regex> = OnceLock::new();
    let quoted = QUOTED.get_or_init(|| Regex::new(r#""[^"]*""#).expect("static regex"));
    let stripped = quoted.replace_all(query, "\"\"");
    let trimmed = stripped.trim();
    let before = report.errors.len();

    if consecutive_bool_pattern().is_match(&stripped) {
        report
            .errors
            .push("Consecutive boolean operators without an operand between them".into());
    }
    if leading_bool_pattern().is_match(trimmed) {
        report
            .errors
            .push("Query starts with a boolean operator (AND/OR); missing left operand".into());
    }
    if trailing_bool_pattern().is_match(trimmed) {
        report
            .errors
            .push("Query ends with a boolean operator; missing right operand".into());
    }
    if trimmed.to_ascii_uppercase().starts_with("NOT ") {
        report
            .warnings
            .push("Query starts with NOT; PubMed may interpret this differently".into());
    }

    report.errors.len() > before
}

fn fix_parentheses(query: &str) -> String {
    let mut in_quote = false;
    let mut depth = 0i32;
    for ch in query.chars() {
        match ch {
            '"' => in_quote = !in_quote,
            '(' if !in_quote => depth += 1,
            ')' if !in_quote => depth -= 1,
            _ => {}
        }
    }

    if depth > 0 {
        let mut fixed = query.to_string();
        fixed.extend(std::iter::repeat_n(')', depth as usize));
        return fixed;
    }
    if depth < 0 {
        let mut excess = (-depth) as usize;
        let mut chars: Vec<char> = query.chars().collect();
        for i in (0..chars.len()).rev() {
            if excess == 0 {
                break;
            }
            if chars[i] == ')' {
                chars.remove(i);
                excess -= 1;
            }
        }
        return chars.into_iter().collect();
    }
    query.to_string()
}

fn fix_quotes(query: &str) -> String {
    let count = query.chars().filter(|c| *c == '"').count();
    if count % 2 == 0 {
        return query.to_string();
    }

    let last_open = query.rfind('"').expect("odd count implies a quote");
    // Close before the next field tag if one follows, else at the end.
    match query[last_open + 1..].find('[') {
        Some(offset) => {
            let mut fixed = query.to_string();
            fixed.insert(last_open + 1 + offset, '"');
            fixed
        }
        None => format!("{query}\""),
    }
}

fn fix_boolean_operators(query: &str) -> String {
    let fixed = leading_bool_pattern().replace(query, "");
    let fixed = trailing_bool_pattern().replace(&fixed, "");
    consecutive_bool_pattern().replace_all(&fixed, "$1").into_owned()
}

fn is_close_match(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    if a.len().abs_diff(b.len()) > 2 {
        return false;
    }
    if a.contains(b) || b.contains(a) {
        return true;
    }
    edit_distance(a, b) <= 2
}

fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut distances: Vec<usize> = (0..=a.len()).collect();

    for (j, ch_b) in b.iter().enumerate() {
        let mut next = vec![j + 1];
        for (i, ch_a) in a.iter().enumerate() {
            if ch_a == ch_b {
                next.push(distances[i]);
            } else {
                next.push(1 + distances[i].min(distances[i + 1]).min(next[i]));
            }
        }
        distances = next;
    }
    distances[a.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_query_passes_clean() {
        let report = validate("aspirin[Title] AND stroke[tiab]");
        assert!(report.is_valid);
        assert!(report.errors.is_empty());
        assert!(report.corrected_query.is_none());
    }

    #[test]
    fn empty_query_is_an_error() {
        let report = validate("   ");
        assert!(!report.is_valid);
        assert_eq!(report.errors, vec!["Empty query"]);
    }

    #[test]
    fn unbalanced_parens_are_closed() {
        let report = validate("(aspirin AND stroke");
        assert!(!report.is_valid);
        assert_eq!(report.corrected_query.as_deref(), Some("(aspirin AND stroke)"));
    }

    #[test]
    fn excess_closing_parens_are_removed() {
        let report = validate("aspirin AND stroke)");
        assert!(!report.is_valid);
        assert_eq!(report.corrected_query.as_deref(), Some("aspirin AND stroke"));
    }

    #[test]
    fn unbalanced_quote_is_closed_before_field_tag() {
        let report = validate("\"aspirin[Title] AND stroke");
        assert!(!report.is_valid);
        assert_eq!(
            report.corrected_query.as_deref(),
            Some("\"aspirin\"[Title] AND stroke")
        );
    }

    #[test]
    fn leading_boolean_is_dropped() {
        let report = validate("AND aspirin");
        assert!(!report.is_valid);
        assert_eq!(report.corrected_query.as_deref(), Some("aspirin"));
    }

    #[test]
    fn trailing_boolean_is_dropped() {
        let report = validate("aspirin AND");
        assert!(!report.is_valid);
        assert_eq!(report.corrected_query.as_deref(), Some("aspirin"));
    }

    #[test]
    fn consecutive_booleans_keep_the_first() {
        let report = validate("aspirin AND OR stroke");
        assert!(!report.is_valid);
        assert_eq!(report.corrected_query.as_deref(), Some("aspirin AND stroke"));
    }

    #[test]
    fn misspelled_field_tag_gets_a_suggestion() {
        let report = validate("aspirin[Titel]");
        assert!(!report.is_valid);
        assert!(report.errors[0].contains("Did you mean"));
        // Tag mistakes are reported, never rewritten.
        assert!(report.corrected_query.is_none());
    }

    #[test]
    fn unknown_but_plausible_tag_is_a_warning() {
        let report = validate("aspirin[xyzzy]");
        assert!(report.is_valid);
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn not_at_start_warns_only() {
        let report = validate("NOT aspirin");
        assert!(report.is_valid);
        assert!(report.warnings[0].contains("NOT"));
    }

    #[test]
    fn quoted_content_is_ignored_for_boolean_checks() {
        let report = validate("\"alive AND well\" AND sepsis");
        assert!(report.is_valid, "errors: {:?}", report.errors);
    }

    #[test]
    fn long_query_warns_but_validates() {
        let long = "aspirin ".repeat(600);
        let report = validate(&long);
        assert!(report.is_valid);
        assert!(report.warnings.iter().any(|w| w.contains("length")));
    }
}
