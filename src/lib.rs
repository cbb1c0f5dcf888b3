//! A local-first personal exocortex service in Rust.
//!

pub use wooster_internal::*;

/// Re-export all common types for easy access.
pub mod prelude {
    pub use wooster_internal::prelude::*;
}
