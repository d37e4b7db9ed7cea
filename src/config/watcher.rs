//! Configuration File Watcher
//!
//! Hot-reloads the settings file. Evaluations read an immutable snapshot;
//! a reload that fails to parse or validate keeps the previous settings.

use super::{Config, ConfigManager};
use crate::Result;
use anyhow::{bail, Context};
use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, error, info, warn};

/// Configuration change event
#[derive(Debug, Clone)]
pub struct ConfigChangeEvent {
    pub config: Arc<Config>,
    pub timestamp: std::time::SystemTime,
    pub file_path: PathBuf,
}

/// Configuration file watcher
pub struct ConfigWatcher {
    config_path: PathBuf,
    current_config: Arc<RwLock<Arc<Config>>>,
    change_sender: broadcast::Sender<ConfigChangeEvent>,
    _watcher: RecommendedWatcher,
}

impl ConfigWatcher {
    /// Create a new configuration watcher
    pub fn new(config_path: PathBuf) -> Result<Self> {
        let (change_sender, _) = broadcast::channel(16);

        let initial_config = ConfigManager::load_from_file(&config_path)?;
        let current_config = Arc::new(RwLock::new(Arc::new(initial_config)));

        let sender_clone = change_sender.clone();
        let config_clone = current_config.clone();
        let path_clone = config_path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    Self::handle_file_event(event, &path_clone, &config_clone, &sender_clone)
                }
                Err(e) => error!("File watcher error: {}", e),
            },
            NotifyConfig::default(),
        )
        .context("Failed to create file watcher")?;

        // Watch the directory; editors often replace the file instead of writing it
        match config_path.parent() {
            Some(parent_dir) => {
                let parent_dir = if parent_dir.as_os_str().is_empty() {
                    Path::new(".")
                } else {
                    parent_dir
                };
                watcher
                    .watch(parent_dir, RecursiveMode::NonRecursive)
                    .with_context(|| format!("Failed to watch directory: {}", parent_dir.display()))?;
                info!("Started watching configuration directory: {}", parent_dir.display());
            }
            None => bail!("Configuration file has no parent directory: {}", config_path.display()),
        }

        Ok(Self {
            config_path,
            current_config,
            change_sender,
            _watcher: watcher,
        })
    }

    /// Snapshot of the current configuration
    pub async fn get_config(&self) -> Arc<Config> {
        self.current_config.read().await.clone()
    }

    /// Subscribe to configuration changes
    pub fn subscribe(&self) -> BroadcastStream<ConfigChangeEvent> {
        BroadcastStream::new(self.change_sender.subscribe())
    }

    /// Force reload the configuration
    pub async fn reload(&self) -> Result<()> {
        info!("Force reloading configuration from: {}", self.config_path.display());

        match ConfigManager::load_from_file(&self.config_path) {
            Ok(new_config) => {
                let config_arc = Arc::new(new_config);
                *self.current_config.write().await = config_arc.clone();
                Self::notify(&self.change_sender, config_arc, &self.config_path);
                info!("Configuration reloaded successfully");
                Ok(())
            }
            Err(e) => {
                error!("Failed to reload configuration, keeping current config: {:#}", e);
                Err(e)
            }
        }
    }

    fn notify(sender: &broadcast::Sender<ConfigChangeEvent>, config: Arc<Config>, path: &Path) {
        let event = ConfigChangeEvent {
            config,
            timestamp: std::time::SystemTime::now(),
            file_path: path.to_path_buf(),
        };

        if let Err(e) = sender.send(event) {
            debug!("No subscribers for config change event: {}", e);
        }
    }

    /// Handle file system events. Runs on the watcher thread.
    fn handle_file_event(
        event: Event,
        config_path: &Path,
        current_config: &Arc<RwLock<Arc<Config>>>,
        sender: &broadcast::Sender<ConfigChangeEvent>,
    ) {
        debug!("File event: {:?}", event);

        let affects_config = event
            .paths
            .iter()
            .any(|path| path.file_name() == config_path.file_name());

        if !affects_config {
            return;
        }

        match event.kind {
            EventKind::Modify(_) | EventKind::Create(_) => {
                info!("Configuration file changed, reloading...");

                // give the writer a moment to finish
                std::thread::sleep(std::time::Duration::from_millis(100));

                match ConfigManager::load_from_file(config_path) {
                    Ok(new_config) => {
                        let config_arc = Arc::new(new_config);
                        *current_config.blocking_write() = config_arc.clone();
                        Self::notify(sender, config_arc, config_path);
                        info!("Configuration reloaded successfully");
                    }
                    Err(e) => {
                        error!("Failed to reload configuration, keeping current config: {:#}", e);
                    }
                }
            }
            EventKind::Remove(_) => {
                warn!("Configuration file was removed: {}", config_path.display());
            }
            _ => {
                debug!("Ignoring file event type: {:?}", event.kind);
            }
        }
    }
}
