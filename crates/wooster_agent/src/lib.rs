//! Dual-mode agent executor.
//!
//! One external signature, two execution styles:
//!
//! - **Classic tools** - an explicit tool-call/observation loop: the model
//!   either calls a tool (validated, executed, observed) or produces the
//!   final answer.
//! - **Code script** - the model emits exactly one fenced program in a
//!   strict JSON step DSL, evaluated in-process against the Tool API with
//!   no reachable host state. Format failures retry with a reminder, then
//!   fall back to classic mode on the same input.
//!
//! Both modes share prompt assembly, router-based model selection, the
//! per-step and total deadlines from the `codeAgent` configuration group,
//! and redacted turn logging.

mod error;
mod executor;
mod prompt;
mod redact;
mod sandbox;
mod script;
pub mod services;
mod toolapi;

pub use error::{SandboxError, TurnError};
pub use executor::{AgentExecutor, TurnMode, TurnOutcome, TurnState};
pub use prompt::PromptAssembler;
pub use sandbox::Sandbox;
pub use script::{Step, extract_single_fenced_block, parse_program};
pub use toolapi::{ToolApiDeps, install_tool_api};
