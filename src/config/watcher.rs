//! Configuration file watcher for hot reload.
//!
//! # Data Flow
//! ```text
//! notify event in the file's directory
//!     → kept only when it names the watched file
//!     → bursts collapsed until the file is quiet for the debounce window
//!     → loader.rs reloads and validates
//!     → ConfigUpdate::Loaded / Invalid / WatchFailed
//! ```
//!
//! # Design Decisions
//! - The parent directory is watched, not the file: editors that save by
//!   rename replace the inode and would silently end a file watch
//! - Watch errors and rejected files are handed to the consumer instead of
//!   being logged here

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::{load_config, ConfigError};
use crate::config::schema::RelayConfig;

/// Quiet period before a changed file is reloaded.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(200);

/// Outcome of one settled change to the watched file.
#[derive(Debug)]
pub enum ConfigUpdate {
    /// The file parsed and validated.
    Loaded(RelayConfig),
    /// The file changed but was rejected; the running config stays.
    Invalid(ConfigError),
    /// The underlying watch reported an error.
    WatchFailed(String),
}

type Signal = Result<(), String>;

/// A watcher that monitors the configuration file for changes.
#[derive(Debug, Clone)]
pub struct ConfigWatcher {
    path: PathBuf,
    debounce: Duration,
}

impl ConfigWatcher {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            debounce: DEFAULT_DEBOUNCE,
        }
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Start watching. Drop the returned watcher to stop; the update
    /// stream then ends.
    pub fn run(self) -> Result<(RecommendedWatcher, ConfigUpdates), notify::Error> {
        let (tx, rx) = mpsc::unbounded_channel();
        let file_name: Option<OsString> = self.path.file_name().map(|n| n.to_os_string());
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                let signal = match res {
                    Ok(event) => {
                        let relevant = (event.kind.is_modify() || event.kind.is_create())
                            && event
                                .paths
                                .iter()
                                .any(|p| p.file_name() == file_name.as_deref());
                        if !relevant {
                            return;
                        }
                        Ok(())
                    }
                    Err(e) => Err(e.to_string()),
                };
                let _ = tx.send(signal);
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, debounce_ms = self.debounce.as_millis() as u64, "Config watcher started");
        Ok((watcher, ConfigUpdates::new(self.path, self.debounce, rx)))
    }
}

/// Stream of settled updates produced by [`ConfigWatcher::run`].
#[derive(Debug)]
pub struct ConfigUpdates {
    path: PathBuf,
    debounce: Duration,
    signals: mpsc::UnboundedReceiver<Signal>,
}

impl ConfigUpdates {
    fn new(path: PathBuf, debounce: Duration, signals: mpsc::UnboundedReceiver<Signal>) -> Self {
        Self {
            path,
            debounce,
            signals,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Next update, or `None` once the watcher is gone.
    pub async fn next(&mut self) -> Option<ConfigUpdate> {
        match self.signals.recv().await? {
            Err(reason) => Some(ConfigUpdate::WatchFailed(reason)),
            Ok(()) => {
                self.settle().await;
                tracing::info!(path = ?self.path, "Config file change detected, reloading");
                Some(match load_config(&self.path) {
                    Ok(config) => ConfigUpdate::Loaded(config),
                    Err(e) => ConfigUpdate::Invalid(e),
                })
            }
        }
    }

    async fn settle(&mut self) {
        while let Ok(Some(signal)) = tokio::time::timeout(self.debounce, self.signals.recv()).await {
            if let Err(reason) = signal {
                tracing::warn!(%reason, "Watch error while a config change was settling");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::level::Level;

    fn updates(path: &Path) -> (mpsc::UnboundedSender<Signal>, ConfigUpdates) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, ConfigUpdates::new(path.to_path_buf(), Duration::from_millis(100), rx))
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_of_changes_reloads_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.toml");
        std::fs::write(&path, "level = \"warn\"\n").unwrap();
        let (tx, mut updates) = updates(&path);

        for _ in 0..3 {
            tx.send(Ok(())).unwrap();
        }
        match updates.next().await {
            Some(ConfigUpdate::Loaded(config)) => assert_eq!(config.level, Level::Warn),
            other => panic!("expected loaded config, got {other:?}"),
        }

        drop(tx);
        assert!(updates.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_file_and_watch_error_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.toml");
        std::fs::write(&path, "shutdown_timeout_ms = 0\n").unwrap();
        let (tx, mut updates) = updates(&path);

        tx.send(Ok(())).unwrap();
        assert!(matches!(
            updates.next().await,
            Some(ConfigUpdate::Invalid(ConfigError::Validation(_)))
        ));

        tx.send(Err("inotify watch limit reached".into())).unwrap();
        match updates.next().await {
            Some(ConfigUpdate::WatchFailed(reason)) => assert!(reason.contains("inotify")),
            other => panic!("expected watch failure, got {other:?}"),
        }
    }

    #[test]
    fn test_with_debounce() {
        let watcher = ConfigWatcher::new(Path::new("relay.toml")).with_debounce(Duration::from_millis(5));
        assert_eq!(watcher.path(), Path::new("relay.toml"));
        assert_eq!(watcher.debounce, Duration::from_millis(5));
    }
}
