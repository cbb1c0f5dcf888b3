//! Redaction of secret-like fields in logged values.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

/// Replacement for secret-like values.
const MASK: &str = "[REDACTED]";

/// Maximum length of a logged argument summary.
const SUMMARY_LIMIT: usize = 200;

fn secret_key_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"(?i)(key|token|secret|password|authorization)").expect("regex compiles")
    })
}

/// Returns a copy of `value` with secret-like fields masked.
#[must_use]
pub fn redact_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, inner)| {
                    if secret_key_regex().is_match(key) {
                        (key.clone(), Value::String(MASK.to_string()))
                    } else {
                        (key.clone(), redact_value(inner))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact_value).collect()),
        other => other.clone(),
    }
}

/// Compact, redacted, length-capped argument summary for turn logs.
#[must_use]
pub fn summarize_args(args: &Value) -> String {
    let mut summary = redact_value(args).to_string();
    if summary.len() > SUMMARY_LIMIT {
        let mut cut = SUMMARY_LIMIT;
        while !summary.is_char_boundary(cut) {
            cut -= 1;
        }
        summary.truncate(cut);
        summary.push('…');
    }
    summary
}

/// Redacted prefix of an emitted program, for turn logs.
#[must_use]
pub fn code_prefix(code: &str, limit: usize) -> String {
    let masked = secret_key_regex()
        .replace_all(code, MASK)
        .into_owned();
    let mut cut = limit.min(masked.len());
    while !masked.is_char_boundary(cut) {
        cut -= 1;
    }
    masked[..cut].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn secret_like_fields_are_masked() {
        let redacted = redact_value(&json!({
            "query": "weather",
            "apiKey": "sk-very-secret",
            "nested": {"auth_token": "abc", "plain": 1}
        }));

        assert_eq!(redacted["query"], "weather");
        assert_eq!(redacted["apiKey"], MASK);
        assert_eq!(redacted["nested"]["auth_token"], MASK);
        assert_eq!(redacted["nested"]["plain"], 1);
    }

    #[test]
    fn summaries_are_capped() {
        let summary = summarize_args(&json!({"text": "x".repeat(1000)}));
        assert!(summary.len() <= SUMMARY_LIMIT + '…'.len_utf8());
    }
}
