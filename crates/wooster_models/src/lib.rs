//! Model provider interface, registry, and task-profile router.
//!
//! This crate owns everything between "a component needs a model" and "an
//! HTTP request leaves the process":
//!
//! - [`chat`] - Chat provider trait, message types, and the [`ChatModel`](chat::ChatModel) handle
//! - [`embedding`] - Embedding provider trait and the [`Embedder`](embedding::Embedder) handle
//! - [`ProviderRegistry`] - Maps provider names to implementations
//! - [`router`] - Task-tag profiles, cached health, cascading fallback
//!
//! # Selection flow
//!
//! Callers never pick a concrete model. They ask the [`ModelRouter`](router::ModelRouter)
//! for a model suited to a [`TaskTag`](router::TaskTag); the router walks the
//! profile's preferred candidates, skips the unhealthy ones, falls back down
//! the global chain, and records a routing decision for diagnostics.

pub mod chat;
pub mod embedding;
mod error;
mod registry;
pub mod router;

pub use error::{CreateModelError, EmbeddingError, GenerationError, RoutingError};
pub use registry::ProviderRegistry;
