//! Hot reload of the bridge configuration
//!
//! Every accepted reload tears down the console session, so the watcher is
//! strict about what counts as a change: bursts of filesystem events from a
//! single save collapse into one read, and saves that leave the file
//! byte-identical are ignored.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::AppConfig;

/// Quiet period after the last filesystem event before the file is read
const SETTLE: Duration = Duration::from_millis(100);

pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
    rx: mpsc::Receiver<AppConfig>,
}

impl ConfigWatcher {
    /// Load `config_path` and start watching it for edits
    pub async fn new(config_path: impl Into<PathBuf>) -> Result<(Self, Arc<AppConfig>)> {
        let path: PathBuf = config_path.into();

        let contents = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let initial = AppConfig::from_yaml(&contents)
            .with_context(|| format!("Invalid config file: {}", path.display()))?;

        let (ping_tx, ping_rx) = mpsc::unbounded_channel::<()>();
        let (tx, rx) = mpsc::channel(4);

        // Editors often save by writing a temp file and renaming it over the
        // original, which drops a watch placed on the file itself.
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let file_name = path.file_name().map(|n| n.to_os_string());

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                let touches_config = event
                    .paths
                    .iter()
                    .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
                if touches_config && matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_))
                {
                    let _ = ping_tx.send(());
                }
            }
            Err(e) => error!("Watch error: {}", e),
        })?;

        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch config directory: {}", dir.display()))?;

        tokio::spawn(reload_loop(path.clone(), ping_rx, tx, contents));
        info!("👀 Watching {} for changes", path.display());

        Ok((
            Self {
                _watcher: watcher,
                rx,
            },
            Arc::new(initial),
        ))
    }

    /// Next valid configuration. `None` once the watcher has stopped.
    pub async fn next_config(&mut self) -> Option<AppConfig> {
        self.rx.recv().await
    }
}

async fn reload_loop(
    path: PathBuf,
    mut pings: mpsc::UnboundedReceiver<()>,
    tx: mpsc::Sender<AppConfig>,
    mut last_applied: String,
) {
    while pings.recv().await.is_some() {
        if !settle(&mut pings).await {
            return;
        }

        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) => {
                // Mid-rename; the Create event that follows retries
                debug!("Config not readable yet: {}", e);
                continue;
            }
        };
        if contents == last_applied {
            debug!("Config saved without changes");
            continue;
        }

        match AppConfig::from_yaml(&contents) {
            Ok(config) => {
                last_applied = contents;
                if tx.send(config).await.is_err() {
                    return;
                }
            }
            Err(e) => warn!(
                "Failed to reload {} (keeping old config): {:#}",
                path.display(),
                e
            ),
        }
    }
}

/// Swallow events until the file has been quiet for `SETTLE`.
/// Returns false if the watcher went away.
async fn settle(pings: &mut mpsc::UnboundedReceiver<()>) -> bool {
    loop {
        match timeout(SETTLE, pings.recv()).await {
            Ok(Some(())) => continue,
            Ok(None) => return false,
            Err(_) => return true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_initial_load() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let config_path = temp_dir.path().join("bridge.yaml");
        fs::write(&config_path, "console:\n  host: \"192.168.1.50\"\n")?;

        let (_watcher, config) = ConfigWatcher::new(&config_path).await?;
        assert_eq!(config.console.host, "192.168.1.50");
        assert_eq!(config.fades.fps, 10);
        Ok(())
    }

    #[tokio::test]
    async fn test_invalid_initial_config_fails() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let config_path = temp_dir.path().join("bridge.yaml");
        fs::write(&config_path, "console:\n  host: \"\"\n")?;

        assert!(ConfigWatcher::new(&config_path).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_burst_of_events_reads_once() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bridge.yaml");
        fs::write(&path, "console:\n  host: \"10.0.0.2\"\n").unwrap();

        let (ping_tx, ping_rx) = mpsc::unbounded_channel();
        let (tx, mut rx) = mpsc::channel(4);
        tokio::spawn(reload_loop(
            path.clone(),
            ping_rx,
            tx,
            "console:\n  host: \"10.0.0.1\"\n".to_string(),
        ));

        for _ in 0..5 {
            ping_tx.send(()).unwrap();
        }
        let config = timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(config.console.host, "10.0.0.2");

        // Same bytes again: no reload
        ping_tx.send(()).unwrap();
        assert!(timeout(Duration::from_millis(400), rx.recv()).await.is_err());
    }

    #[tokio::test]
    async fn test_invalid_edit_keeps_waiting() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bridge.yaml");
        fs::write(&path, "console:\n  host: \"10.0.0.1\"\nfades:\n  fps: 500\n").unwrap();

        let (ping_tx, ping_rx) = mpsc::unbounded_channel();
        let (tx, mut rx) = mpsc::channel(4);
        tokio::spawn(reload_loop(path.clone(), ping_rx, tx, String::new()));

        ping_tx.send(()).unwrap();
        assert!(timeout(Duration::from_millis(400), rx.recv()).await.is_err());

        fs::write(&path, "console:\n  host: \"10.0.0.1\"\nfades:\n  fps: 30\n").unwrap();
        ping_tx.send(()).unwrap();
        let config = timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(config.fades.fps, 30);
    }

    #[tokio::test]
    async fn test_file_edit_is_picked_up() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let config_path = temp_dir.path().join("bridge.yaml");
        fs::write(&config_path, "console:\n  host: \"192.168.1.50\"\n")?;

        let (mut watcher, _) = ConfigWatcher::new(&config_path).await?;

        tokio::time::sleep(Duration::from_millis(100)).await;
        fs::write(&config_path, "console:\n  host: \"192.168.1.51\"\n")?;

        // Some platforms coalesce or drop events; only check when one arrived
        if let Ok(Some(config)) = timeout(Duration::from_secs(2), watcher.next_config()).await {
            assert_eq!(config.console.host, "192.168.1.51");
        }
        Ok(())
    }
}
