//! Debounced file watching.

use crate::error::KbError;
use crate::ingest::IngestionService;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Default per-path debounce window.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(250);

/// Keeps the watcher and its dispatch task alive.
///
/// Dropping the handle stops watching. The dispatch task also ends when the
/// watcher side hangs up.
pub struct WatchHandle {
    _watcher: RecommendedWatcher,
    task: tokio::task::JoinHandle<()>,
}

impl WatchHandle {
    /// Stops the dispatch task.
    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl core::fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WatchHandle").finish_non_exhaustive()
    }
}

/// Watches `roots` recursively and feeds debounced Markdown changes into
/// the ingestion service.
///
/// Events for the same path within the debounce window collapse into one
/// ingestion; a path that no longer exists when its window expires is
/// treated as a deletion.
///
/// # Errors
///
/// Returns [`KbError::Watch`] when the native watcher cannot be created or
/// a root cannot be registered.
pub fn watch(
    roots: &[PathBuf],
    service: Arc<IngestionService>,
    debounce: Duration,
) -> Result<WatchHandle, KbError> {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<PathBuf>();

    let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
        let Ok(event) = result else { return };
        for path in event.paths {
            if path.extension().is_some_and(|ext| ext == "md") {
                let _ = tx.send(path);
            }
        }
    })
    .map_err(|err| KbError::Watch(err.to_string()))?;

    for root in roots {
        watcher
            .watch(root, RecursiveMode::Recursive)
            .map_err(|err| KbError::Watch(format!("{}: {err}", root.display())))?;
    }

    let task = tokio::spawn(async move {
        let mut pending: HashMap<PathBuf, Instant> = HashMap::new();
        loop {
            let next_deadline = pending.values().min().copied();
            tokio::select! {
                received = rx.recv() => match received {
                    Some(path) => {
                        pending.insert(path, Instant::now() + debounce);
                    }
                    None => break,
                },
                () = sleep_until_or_forever(next_deadline) => {
                    let now = Instant::now();
                    let due: Vec<PathBuf> = pending
                        .iter()
                        .filter(|(_, deadline)| **deadline <= now)
                        .map(|(path, _)| path.clone())
                        .collect();
                    for path in due {
                        pending.remove(&path);
                        dispatch(&service, &path);
                    }
                }
            }
        }
    });

    Ok(WatchHandle {
        _watcher: watcher,
        task,
    })
}

async fn sleep_until_or_forever(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn dispatch(service: &IngestionService, path: &Path) {
    let result = if path.exists() {
        service.ingest_file(path).map(|_| ())
    } else {
        service.remove_file(path).map(|_| ())
    };
    if let Err(err) = result {
        tracing::warn!(path = %path.display(), %err, "watched change failed to apply");
    }
}
