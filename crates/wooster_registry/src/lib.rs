//! Process-wide service registry with just-in-time lookup.
//!
//! The [`ServiceRegistry`] is the single place where Wooster components and
//! plugins publish capabilities for each other. Entries are keyed by a
//! canonical service name (e.g. `"emailService"`) and hold an opaque,
//! type-erased handle. The registry never interprets a handle; consumers
//! downcast it to the capability trait or struct they expect.
//!
//! # Just-in-time lookup
//!
//! Consumers must resolve services at the point of use, not at their own
//! initialization. A plugin loaded before its provider still finds the
//! provider's service when its tool is eventually invoked, so the service
//! graph is resilient to load order.
//!
//! ```
//! use std::sync::Arc;
//! use wooster_registry::ServiceRegistry;
//!
//! struct EmailService {
//!     smtp_host: String,
//! }
//!
//! let registry = ServiceRegistry::new();
//! registry.register("emailService", Arc::new(EmailService {
//!     smtp_host: "localhost".into(),
//! }));
//!
//! // Much later, at the call site:
//! let email = registry.lookup_as::<EmailService>("emailService");
//! assert!(email.is_some());
//! ```

use downcast_rs::{DowncastSync, impl_downcast};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

// ─────────────────────────────────────────────────────────────────────────────
// Service
// ─────────────────────────────────────────────────────────────────────────────

/// Marker trait for values that can be published in the [`ServiceRegistry`].
///
/// Blanket-implemented for every `Send + Sync + 'static` type, so any
/// concrete service struct or boxed capability can be registered without
/// ceremony.
pub trait Service: DowncastSync {}
impl_downcast!(sync Service);

impl<T: Send + Sync + 'static> Service for T {}

// ─────────────────────────────────────────────────────────────────────────────
// ServiceRegistry
// ─────────────────────────────────────────────────────────────────────────────

/// Name-keyed map of shared service handles.
///
/// The registry is read-mostly: writes happen during plugin initialization
/// and shutdown, lookups happen on every tool invocation. A failed lookup
/// returns `None`; it never panics and never blocks for long.
///
/// Cloning the registry is cheap and yields a handle to the same underlying
/// map, which is how the registry travels inside the capability bundle
/// passed to plugins.
#[derive(Clone, Default)]
pub struct ServiceRegistry {
    entries: Arc<RwLock<HashMap<String, Arc<dyn Service>>>>,
}

impl core::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("services", &self.names())
            .finish()
    }
}

impl ServiceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes a service under `name`.
    ///
    /// If a service with the same name already exists it is replaced and the
    /// previous handle is returned; replacement is logged so a misbehaving
    /// plugin overwriting a peer is diagnosable.
    pub fn register(
        &self,
        name: impl Into<String>,
        service: Arc<dyn Service>,
    ) -> Option<Arc<dyn Service>> {
        let name = name.into();
        let previous = self.entries.write().insert(name.clone(), service);
        if previous.is_some() {
            tracing::debug!(service = %name, "replaced existing service registration");
        } else {
            tracing::debug!(service = %name, "registered service");
        }
        previous
    }

    /// Looks up a service handle by name.
    ///
    /// Absence is an expected condition, not an error: callers decide whether
    /// to degrade or to surface `ToolUnavailable` to the agent.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<Arc<dyn Service>> {
        self.entries.read().get(name).cloned()
    }

    /// Looks up a service and downcasts it to a concrete type.
    ///
    /// Returns `None` when the name is unregistered *or* the registered
    /// handle is of a different type. The two cases are logged distinctly.
    #[must_use]
    pub fn lookup_as<T: Service>(&self, name: &str) -> Option<Arc<T>> {
        let handle = self.lookup(name)?;
        match handle.downcast_arc::<T>() {
            Ok(typed) => Some(typed),
            Err(_) => {
                tracing::warn!(
                    service = %name,
                    expected = core::any::type_name::<T>(),
                    "service registered under this name has a different type"
                );
                None
            }
        }
    }

    /// Removes a service, returning its handle if it was registered.
    pub fn unregister(&self, name: &str) -> Option<Arc<dyn Service>> {
        let removed = self.entries.write().remove(name);
        if removed.is_some() {
            tracing::debug!(service = %name, "unregistered service");
        }
        removed
    }

    /// Returns whether a service is currently registered under `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.read().contains_key(name)
    }

    /// Returns the names of all registered services, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.read().keys().cloned().collect();
        names.sort();
        names
    }
}
