//! File watcher for rate limit hot-reload.
//!
//! Watches the settings file with `notify` and pushes changes through
//! [`RateLimitRegistry::reload_from_file`]. A broken or half-written file
//! never disturbs the running limits: reload failures are logged and the
//! previous configuration stays in effect.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use scan_throttle::RateLimitRegistry;
//! use scan_throttle::config::watcher::watch_limits_file;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = Arc::new(RateLimitRegistry::new());
//!     tokio::spawn(watch_limits_file(
//!         "config/settings.json".into(),
//!         registry.clone(),
//!     ));
//!     // ... scanner startup continues; limits now follow the file.
//!     Ok(())
//! }
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::limiter::RateLimitRegistry;

/// Watch a settings file and reload the registry on every change.
///
/// Runs until the watcher backend shuts down; callers normally spawn it
/// as a background task. Create/modify events trigger a reload; other
/// filesystem noise is ignored.
pub async fn watch_limits_file(
    path: PathBuf,
    registry: Arc<RateLimitRegistry>,
) -> Result<(), notify::Error> {
    // Bridge the synchronous watcher callback into the async task.
    let (tx, mut rx) = mpsc::channel(1);

    let mut watcher = RecommendedWatcher::new(
        move |res: Result<Event, notify::Error>| {
            if let Err(e) = tx.blocking_send(res) {
                // Receiver dropped: the watch task has ended.
                tracing::debug!("Failed to forward limits file event: {}", e);
            }
        },
        notify::Config::default(),
    )?;

    watcher.watch(&path, RecursiveMode::NonRecursive)?;
    tracing::info!("Watching limits file for changes: {}", path.display());

    while let Some(res) = rx.recv().await {
        match res {
            Ok(event) if should_reload(&event) => {
                tracing::info!(
                    "Limits file change detected ({:?}), reloading",
                    event.kind
                );
                reload(&path, &registry).await;
            }
            Ok(event) => {
                tracing::debug!("Ignoring filesystem event: {:?}", event.kind);
            }
            Err(e) => {
                tracing::error!("Error watching limits file: {}", e);
            }
        }
    }

    tracing::warn!("Limits file watcher is shutting down");
    Ok(())
}

/// Only modifications and creations warrant a reload.
fn should_reload(event: &Event) -> bool {
    matches!(
        event.kind,
        notify::EventKind::Modify(_) | notify::EventKind::Create(_)
    )
}

/// Reload the file into the registry, keeping the old limits on failure.
async fn reload(path: &Path, registry: &RateLimitRegistry) {
    match registry.reload_from_file(path).await {
        Ok(errors) if errors.is_empty() => {
            tracing::info!("Rate limits reloaded from {}", path.display());
        }
        Ok(errors) => {
            tracing::warn!(
                "Rate limits reloaded from {} with {} rejected entries",
                path.display(),
                errors.len()
            );
        }
        Err(e) => {
            tracing::error!(
                "Failed to reload limits from {}: {}. Keeping previous limits.",
                path.display(),
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    // The watcher plumbing is exercised through the reload helper; the
    // notify backend itself is not driven in unit tests.
    #[tokio::test]
    async fn test_reload_applies_valid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        tokio::fs::write(
            &path,
            r#"{"rate_limiting": {"network_request": {"calls": 7, "period": 60.0}}}"#,
        )
        .await
        .unwrap();

        let registry = Arc::new(RateLimitRegistry::new());
        reload(&path, &registry).await;

        let limits = registry.get_current_limits();
        assert_eq!(limits["network_request"].calls(), 7);
    }

    #[tokio::test]
    async fn test_reload_keeps_limits_on_broken_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        tokio::fs::write(&path, "{broken").await.unwrap();

        let registry = Arc::new(RateLimitRegistry::new());
        let before = registry.get_current_limits();
        reload(&path, &registry).await;
        assert_eq!(registry.get_current_limits(), before);
    }

    #[test]
    fn test_should_reload_filters_events() {
        use notify::event::{CreateKind, EventKind, ModifyKind, RemoveKind};

        let modify = Event::new(EventKind::Modify(ModifyKind::Any));
        assert!(should_reload(&modify));

        let create = Event::new(EventKind::Create(CreateKind::File));
        assert!(should_reload(&create));

        let remove = Event::new(EventKind::Remove(RemoveKind::File));
        assert!(!should_reload(&remove));
    }

    #[tokio::test]
    async fn test_watcher_picks_up_file_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        tokio::fs::write(&path, r#"{"rate_limiting": {}}"#).await.unwrap();

        let registry = Arc::new(RateLimitRegistry::new());
        let task = tokio::spawn(watch_limits_file(path.clone(), registry.clone()));

        // Give the watcher a moment to register, then rewrite the file.
        tokio::time::sleep(Duration::from_millis(200)).await;
        tokio::fs::write(
            &path,
            r#"{"rate_limiting": {"quarantine_action": {"calls": 3, "period": 60.0}}}"#,
        )
        .await
        .unwrap();

        // Poll until the reload lands or we give up.
        let mut applied = false;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            if registry.get_current_limits()["quarantine_action"].calls() == 3 {
                applied = true;
                break;
            }
        }
        task.abort();
        assert!(applied, "watcher never applied the rewritten file");
    }
}
