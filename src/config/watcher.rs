//! Configuration file watcher for hot reload.
//!
//! Only configurations that parse and validate are forwarded; the server
//! still rebuilds the firewalls and may reject the update (see
//! `AppState::reload`).

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::GatehouseConfig;

const POLL_INTERVAL: Duration = Duration::from_secs(2);

pub struct ConfigWatcher {
    path: PathBuf,
    update_tx: mpsc::UnboundedSender<GatehouseConfig>,
}

impl ConfigWatcher {
    /// Returns the watcher and a receiver for validated configuration updates.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<GatehouseConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        (
            Self {
                path: path.to_path_buf(),
                update_tx,
            },
            update_rx,
        )
    }

    /// Start watching. The returned watcher must be kept alive.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let Self { path, update_tx } = self;
        let watched = path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if is_content_change(&event.kind) => reload(&watched, &update_tx),
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "Config watch error"),
            },
            Config::default().with_poll_interval(POLL_INTERVAL),
        )?;
        watcher.watch(&path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = %path.display(), "Config watcher started");
        Ok(watcher)
    }
}

fn is_content_change(kind: &EventKind) -> bool {
    kind.is_modify() || kind.is_create()
}

fn reload(path: &Path, tx: &mpsc::UnboundedSender<GatehouseConfig>) {
    match load_config(path) {
        Ok(config) => {
            tracing::info!(
                path = %path.display(),
                firewalls = config.firewalls.len(),
                "Config file changed, forwarding new configuration"
            );
            if tx.send(config).is_err() {
                tracing::debug!("Config receiver closed, update dropped");
            }
        }
        Err(e) => tracing::error!(
            path = %path.display(),
            error = %e,
            "Ignoring invalid configuration, keeping current one"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, ModifyKind};
    use std::io::Write;

    #[test]
    fn test_only_content_changes_trigger_reload() {
        assert!(is_content_change(&EventKind::Modify(ModifyKind::Any)));
        assert!(is_content_change(&EventKind::Create(CreateKind::File)));
        assert!(!is_content_change(&EventKind::Access(AccessKind::Any)));
    }

    #[test]
    fn test_reload_forwards_valid_config_only() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut file = tempfile::NamedTempFile::new().unwrap();

        writeln!(file, "[[firewalls]]\nname = \"main\"").unwrap();
        reload(file.path(), &tx);
        assert_eq!(rx.try_recv().unwrap().firewalls[0].name, "main");

        writeln!(file, "[[firewalls]]\nname = \"main\"").unwrap();
        reload(file.path(), &tx);
        assert!(rx.try_recv().is_err());
    }
}
