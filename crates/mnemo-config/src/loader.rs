use mnemo_core::{MnemoError, Result};
use notify::{Event as NotifyEvent, EventKind, RecursiveMode, Watcher};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::schema::MnemoConfig;

/// Environment variables applied on top of the file, in order.
const ENV_OVERRIDES: &[(&str, fn(&mut MnemoConfig, String))] = &[
    ("MNEMO_LOG_LEVEL", |c, v| c.logging.level = v),
    ("MNEMO_LOG_FORMAT", |c, v| c.logging.format = v),
    ("MNEMO_LLM_MODEL", |c, v| c.llm.model = v),
    ("MNEMO_EMBEDDING_MODEL", |c, v| c.embedding.model = v),
    ("MNEMO_DATABASE", |c, v| c.storage.database = PathBuf::from(v)),
    ("MNEMO_REFLECTION_THRESHOLD", |c, v| {
        match v.trim().parse::<i64>() {
            Ok(threshold) => c.reflection.threshold = threshold,
            Err(_) => warn!(value = %v, "ignoring non-numeric MNEMO_REFLECTION_THRESHOLD"),
        }
    }),
];

/// The effective configuration, shared with anything that wants live updates.
pub struct ConfigLoader {
    config: Arc<RwLock<MnemoConfig>>,
    config_path: PathBuf,
}

impl ConfigLoader {
    /// explicit path > `MNEMO_CONFIG` > `~/.mnemo/mnemo.toml`
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(p) = explicit {
            return p.to_path_buf();
        }
        if let Ok(p) = std::env::var("MNEMO_CONFIG") {
            return PathBuf::from(p);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".mnemo")
            .join("mnemo.toml")
    }

    /// A missing file means defaults. A file that fails to parse or validate is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = Self::resolve_path(path);
        let config = if config_path.exists() {
            info!(?config_path, "loading configuration");
            read_validated(&config_path)?
        } else {
            warn!(?config_path, "config file not found, using defaults");
            let mut config = MnemoConfig::default();
            apply_env(&mut config);
            check(&config)?;
            config
        };

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_path,
        })
    }

    pub fn get(&self) -> MnemoConfig {
        self.config.read().clone()
    }

    pub fn shared(&self) -> Arc<RwLock<MnemoConfig>> {
        Arc::clone(&self.config)
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Re-read the file. The current config is kept if the new one is invalid.
    pub fn reload(&self) -> Result<()> {
        if !self.config_path.exists() {
            return Err(MnemoError::Config(format!(
                "config file not found: {}",
                self.config_path.display()
            )));
        }
        *self.config.write() = read_validated(&self.config_path)?;
        info!("configuration reloaded");
        Ok(())
    }

    /// Reload whenever the file changes. Dropping the watcher stops it.
    pub fn watch(&self) -> Result<notify::RecommendedWatcher> {
        let shared = Arc::clone(&self.config);
        let path = self.config_path.clone();
        info!(config_path = ?path, "starting config file watcher");

        let file_name = path.file_name().map(|n| n.to_os_string());
        let on_event = move |res: std::result::Result<NotifyEvent, notify::Error>| {
            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    warn!(error = %e, "file watcher error");
                    return;
                }
            };
            let touches_config = event
                .paths
                .iter()
                .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
            if !touches_config || !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                return;
            }
            match read_validated(&path) {
                Ok(config) => {
                    *shared.write() = config;
                    info!("configuration hot-reloaded");
                }
                Err(e) => warn!(error = %e, "config change rejected, keeping current config"),
            }
        };

        let mut watcher = notify::recommended_watcher(on_event)
            .map_err(|e| MnemoError::Config(format!("failed to create file watcher: {e}")))?;
        // Editors often replace the file by rename, so watch the directory.
        let dir = self.config_path.parent().unwrap_or(Path::new("."));
        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .map_err(|e| MnemoError::Config(format!("failed to watch {}: {e}", dir.display())))?;
        Ok(watcher)
    }
}

/// Parse, apply env overrides, validate.
fn read_validated(path: &Path) -> Result<MnemoConfig> {
    let raw = std::fs::read_to_string(path)?;
    let mut config = toml::from_str::<MnemoConfig>(&raw)
        .map_err(|e| MnemoError::Config(format!("failed to parse {}: {e}", path.display())))?;
    apply_env(&mut config);
    check(&config)?;
    Ok(config)
}

fn check(config: &MnemoConfig) -> Result<()> {
    for warning in config.validate().map_err(MnemoError::Config)? {
        warn!("{warning}");
    }
    Ok(())
}

fn apply_env(config: &mut MnemoConfig) {
    for (name, apply) in ENV_OVERRIDES {
        if let Ok(value) = std::env::var(name) {
            apply(config, value);
        }
    }
    // Keys in the file win; the environment only fills gaps.
    if config.llm.api_key.is_none() {
        config.llm.api_key = std::env::var("OPENAI_API_KEY").ok();
    }
    if config.embedding.api_key.is_none() {
        config.embedding.api_key = config.llm.api_key.clone();
    }
}
