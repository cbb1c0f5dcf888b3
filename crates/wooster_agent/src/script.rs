//! Program extraction and parsing for code-script mode.

use crate::error::SandboxError;
use serde::Deserialize;
use serde_json::Value;

/// One step of a script program.
#[derive(Debug, Clone, Deserialize)]
pub struct Step {
    /// Tool API function to call.
    pub call: String,
    /// Arguments; may contain `{"$ref": "binding.path"}` nodes.
    #[serde(default)]
    pub args: Value,
    /// Name to bind the (truncated) result under for later steps.
    #[serde(default)]
    pub bind: Option<String>,
}

/// Extracts the contents of exactly one fenced code block.
///
/// Zero blocks or more than one is a format failure; the caller retries
/// with a reminder. The language tag on the opening fence, if any, is
/// discarded.
pub fn extract_single_fenced_block(text: &str) -> Result<String, String> {
    let mut blocks = Vec::new();
    let mut current: Option<String> = None;

    for line in text.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") {
            match current.take() {
                Some(block) => blocks.push(block),
                None => current = Some(String::new()),
            }
            continue;
        }
        if let Some(block) = &mut current {
            block.push_str(line);
            block.push('\n');
        }
    }

    match (blocks.len(), current) {
        (1, None) => Ok(blocks.remove(0)),
        (0, None) => Err("response contains no fenced code block".to_string()),
        (0, Some(_)) => Err("fenced code block is not terminated".to_string()),
        (n, _) => Err(format!("response contains {n} fenced code blocks, expected exactly one")),
    }
}

/// Parses the extracted block as a step program.
///
/// # Errors
///
/// Returns [`SandboxError::InvalidProgram`] for anything that is not a
/// non-empty JSON array of steps.
pub fn parse_program(code: &str) -> Result<Vec<Step>, SandboxError> {
    let steps: Vec<Step> = serde_json::from_str(code)
        .map_err(|err| SandboxError::InvalidProgram(err.to_string()))?;
    if steps.is_empty() {
        return Err(SandboxError::InvalidProgram(
            "program has no steps".to_string(),
        ));
    }
    Ok(steps)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_block_extracts() {
        let text = "Here is the program:\n```json\n[{\"call\": \"finalAnswer\"}]\n```\n";
        let code = extract_single_fenced_block(text).unwrap();
        assert_eq!(code.trim(), "[{\"call\": \"finalAnswer\"}]");
    }

    #[test]
    fn zero_blocks_is_a_format_failure() {
        assert!(extract_single_fenced_block("no code here").is_err());
    }

    #[test]
    fn two_blocks_is_a_format_failure() {
        let text = "```\na\n```\ntext\n```\nb\n```\n";
        let err = extract_single_fenced_block(text).unwrap_err();
        assert!(err.contains("2"));
    }

    #[test]
    fn unterminated_block_is_a_format_failure() {
        assert!(extract_single_fenced_block("```json\n[1,2]\n").is_err());
    }

    #[test]
    fn program_parses_steps_with_refs() {
        let code = r#"[
            {"call": "webSearch", "args": {"query": "headlines"}, "bind": "r"},
            {"call": "finalAnswer", "args": {"text": {"$ref": "r.results.0.title"}}}
        ]"#;
        let steps = parse_program(code).unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].bind.as_deref(), Some("r"));
        assert_eq!(steps[1].call, "finalAnswer");
    }

    #[test]
    fn empty_or_malformed_programs_are_rejected() {
        assert!(matches!(
            parse_program("[]"),
            Err(SandboxError::InvalidProgram(_))
        ));
        assert!(matches!(
            parse_program("{\"call\": \"x\"}"),
            Err(SandboxError::InvalidProgram(_))
        ));
    }
}
