//! Shared prompt assembly.

use crate::error::TurnError;
use std::path::PathBuf;

/// Fallback system prompt when no base prompt file is present on disk.
const DEFAULT_BASE_PROMPT: &str = "You are Wooster, a personal assistant with access to the \
user's notes, calendar, and tools. Be concise and concrete.";

/// Appended in classic mode: the scratchpad grows as tool observations.
const CLASSIC_SUFFIX: &str = "Use the available tools when they help. Prior tool calls and \
their observations appear in the conversation; treat them as your scratchpad.";

/// Appended in script mode: the strict one-program contract.
const SCRIPT_SUFFIX: &str = "Respond with exactly one fenced code block and nothing else. The \
block must contain a JSON array of steps. Each step is an object \
{\"call\": <function>, \"args\": {...}, \"bind\": <optional name>}. Later steps may reference \
earlier results with {\"$ref\": \"name.path.0\"} nodes inside args. Use only the provided Tool \
API functions: webSearch, fetchText, queryRAG, writeNote, schedule, discordNotify, \
signalNotify, finalAnswer. Call finalAnswer exactly once with the answer text.";

/// Assembles the system prompt from the base file plus the supplemental
/// prompt directory.
///
/// Supplemental `.txt` files concatenate in lexicographic order, separated
/// by blank lines. Files are re-read on every turn so edits take effect
/// without a restart.
#[derive(Debug, Clone)]
pub struct PromptAssembler {
    base_path: PathBuf,
    supplemental_dir: PathBuf,
}

impl PromptAssembler {
    /// Creates an assembler over the configured prompt locations.
    #[must_use]
    pub fn new(base_path: PathBuf, supplemental_dir: PathBuf) -> Self {
        Self {
            base_path,
            supplemental_dir,
        }
    }

    /// Builds the system prompt for a classic-tools turn.
    ///
    /// # Errors
    ///
    /// Returns [`TurnError::PromptAssembly`] when a present file cannot be
    /// read (a missing base file falls back to the built-in prompt).
    pub fn classic(&self) -> Result<String, TurnError> {
        Ok(format!("{}\n\n{CLASSIC_SUFFIX}", self.shared()?))
    }

    /// Builds the system prompt for a code-script turn.
    ///
    /// # Errors
    ///
    /// Same as [`classic`](Self::classic).
    pub fn script(&self) -> Result<String, TurnError> {
        Ok(format!("{}\n\n{SCRIPT_SUFFIX}", self.shared()?))
    }

    fn shared(&self) -> Result<String, TurnError> {
        let mut sections = Vec::new();

        match std::fs::read_to_string(&self.base_path) {
            Ok(base) => sections.push(base.trim_end().to_string()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                sections.push(DEFAULT_BASE_PROMPT.to_string());
            }
            Err(err) => {
                return Err(TurnError::PromptAssembly(format!(
                    "cannot read {}: {err}",
                    self.base_path.display()
                )));
            }
        }

        for path in self.supplemental_files() {
            let text = std::fs::read_to_string(&path).map_err(|err| {
                TurnError::PromptAssembly(format!("cannot read {}: {err}", path.display()))
            })?;
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                sections.push(trimmed.to_string());
            }
        }

        Ok(sections.join("\n\n"))
    }

    /// Supplemental `.txt` files in deterministic lexicographic order.
    fn supplemental_files(&self) -> Vec<PathBuf> {
        let Ok(entries) = std::fs::read_dir(&self.supplemental_dir) else {
            return Vec::new();
        };
        let mut files: Vec<PathBuf> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "txt"))
            .collect();
        files.sort();
        files
    }
}
