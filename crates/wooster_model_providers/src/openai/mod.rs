//! OpenAI-compatible provider.
//!
//! Speaks the chat-completions and embeddings wire protocol shared by the
//! OpenAI cloud API and the common local servers. The health probe is a
//! model-listing call with a short timeout.

mod client;
mod provider;
mod types;

pub use client::OpenAiClient;
pub use provider::OpenAiCompatProvider;
