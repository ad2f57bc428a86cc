//! Configuration management utilities.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, TryRecvError};

use anyhow::{Context, Result};
use dirs_next::config_dir;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::app::payload::PayloadOptions;
use crate::domain::model::{ExecutionTarget, Language};

static DEFAULT_CONFIG: Lazy<&'static str> =
    Lazy::new(|| include_str!("../../assets/default-config.toml"));
static DEFAULT_WORKSPACE_CONFIG_PATH: &str = ".mayasend/config.toml";

/// Resolved settings used by one dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Config {
    pub host: String,
    pub python_command_port: u16,
    pub mel_command_port: u16,
    pub strip_sending_comments: bool,
    pub no_collisions: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            python_command_port: 7002,
            mel_command_port: 7001,
            strip_sending_comments: true,
            no_collisions: true,
        }
    }
}

/// One configuration file. Unset keys fall through to lower layers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigLayer {
    #[serde(default, alias = "maya_hostname")]
    pub host: Option<String>,
    #[serde(default)]
    pub python_command_port: Option<u16>,
    #[serde(default)]
    pub mel_command_port: Option<u16>,
    #[serde(default)]
    pub strip_sending_comments: Option<bool>,
    #[serde(default)]
    pub no_collisions: Option<bool>,
}

impl ConfigLayer {
    fn from_file(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        Self::from_str(&data)
            .with_context(|| format!("invalid config file: {}", path.display()))
    }

    fn from_str(contents: &str) -> Result<Self> {
        let layer: ConfigLayer =
            toml::from_str(contents).with_context(|| "failed to parse TOML config".to_string())?;
        Ok(layer)
    }
}

impl Config {
    /// Port of the command port for `language`.
    pub fn port_for(&self, language: Language) -> u16 {
        match language {
            Language::Python => self.python_command_port,
            Language::Mel => self.mel_command_port,
        }
    }

    pub fn target_for(&self, language: Language) -> ExecutionTarget {
        ExecutionTarget {
            host: self.host.clone(),
            port: self.port_for(language),
            language,
        }
    }

    pub fn payload_options(&self) -> PayloadOptions {
        PayloadOptions {
            strip_comments: self.strip_sending_comments,
            no_collisions: self.no_collisions,
        }
    }

    /// Load configuration from defaults, user/global config, workspace config, and env overrides.
    pub fn load() -> Result<Self> {
        Self::load_with_layers(&ConfigSources::discover()?, &EnvOverrides::from_env())
    }

    fn load_with_layers(sources: &ConfigSources, env: &EnvOverrides) -> Result<Self> {
        let mut config = Config::default().apply(ConfigLayer::from_str(&DEFAULT_CONFIG)?);

        for path in sources.existing() {
            config = config.apply(ConfigLayer::from_file(path)?);
        }

        if let Some(explicit) = &sources.explicit {
            config = config.apply(ConfigLayer::from_file(explicit)?);
        }

        Ok(env.apply(config))
    }

    fn apply(mut self, layer: ConfigLayer) -> Self {
        if let Some(host) = layer.host {
            self.host = host;
        }
        if let Some(port) = layer.python_command_port {
            self.python_command_port = port;
        }
        if let Some(port) = layer.mel_command_port {
            self.mel_command_port = port;
        }
        if let Some(value) = layer.strip_sending_comments {
            self.strip_sending_comments = value;
        }
        if let Some(value) = layer.no_collisions {
            self.no_collisions = value;
        }
        self
    }

    /// Copy with a different host and/or port for both languages.
    pub fn with_endpoint(mut self, host: Option<String>, port: Option<u16>) -> Self {
        if let Some(host) = host {
            self.host = host;
        }
        if let Some(port) = port {
            self.python_command_port = port;
            self.mel_command_port = port;
        }
        self
    }
}

/// Files consulted when loading, lowest precedence first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigSources {
    pub global: Option<PathBuf>,
    pub workspace: Option<PathBuf>,
    /// Passed with `--config`; must exist.
    pub explicit: Option<PathBuf>,
}

impl ConfigSources {
    pub fn discover() -> Result<Self> {
        Ok(Self {
            global: global_config_path(),
            workspace: workspace_config_path()?,
            explicit: None,
        })
    }

    pub fn with_explicit(mut self, path: Option<PathBuf>) -> Self {
        self.explicit = path;
        self
    }

    /// Optional layers that are present on disk.
    fn existing(&self) -> impl Iterator<Item = &PathBuf> {
        [self.global.as_ref(), self.workspace.as_ref()]
            .into_iter()
            .flatten()
            .filter(|path| path.exists())
    }

    fn all(&self) -> impl Iterator<Item = &PathBuf> {
        [
            self.global.as_ref(),
            self.workspace.as_ref(),
            self.explicit.as_ref(),
        ]
        .into_iter()
        .flatten()
    }
}

/// Environment overrides for connection settings.
#[derive(Debug, Default, Clone)]
pub struct EnvOverrides {
    host: Option<String>,
    python_port: Option<u16>,
    mel_port: Option<u16>,
}

impl EnvOverrides {
    pub fn from_env() -> Self {
        Self {
            host: env::var("MAYASEND_HOST").ok(),
            python_port: parse_port_var("MAYASEND_PYTHON_PORT"),
            mel_port: parse_port_var("MAYASEND_MEL_PORT"),
        }
    }

    #[cfg(test)]
    fn for_tests(host: &str, python_port: u16) -> Self {
        Self {
            host: Some(host.to_owned()),
            python_port: Some(python_port),
            mel_port: None,
        }
    }

    fn apply(&self, mut config: Config) -> Config {
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.python_port {
            config.python_command_port = port;
        }
        if let Some(port) = self.mel_port {
            config.mel_command_port = port;
        }
        config
    }
}

fn parse_port_var(name: &str) -> Option<u16> {
    let raw = env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(port) => Some(port),
        Err(err) => {
            tracing::warn!(var = name, value = %raw, error = %err, "ignoring invalid port");
            None
        }
    }
}

fn global_config_path() -> Option<PathBuf> {
    config_dir().map(|base| base.join("mayasend/config.toml"))
}

fn workspace_config_path() -> Result<Option<PathBuf>> {
    let cwd = env::current_dir()?;
    let root = find_repo_root(&cwd).unwrap_or(cwd);
    Ok(Some(root.join(DEFAULT_WORKSPACE_CONFIG_PATH)))
}

fn find_repo_root(start: &Path) -> Option<PathBuf> {
    let mut current = start;
    loop {
        if current.join(".git").exists() {
            return Some(current.to_path_buf());
        }
        match current.parent() {
            Some(parent) => current = parent,
            None => return None,
        }
    }
}

type WatchEvent = notify::Result<notify::Event>;

/// Live watcher plus the queue it feeds.
struct ConfigWatch {
    /// `None` when events are queued by hand.
    _watcher: Option<RecommendedWatcher>,
    events: Receiver<WatchEvent>,
}

/// Owner of the live configuration snapshot.
///
/// Readers take a whole [`Arc<Config>`] per action; reloads build a new config and swap the
/// pointer, so a dispatch never sees fields from two different loads.
pub struct ConfigStore {
    sources: ConfigSources,
    env: EnvOverrides,
    current: RwLock<Arc<Config>>,
    watch: Option<ConfigWatch>,
}

impl std::fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigStore")
            .field("sources", &self.sources)
            .field("current", &self.current.read())
            .field("watching", &self.watch.is_some())
            .finish()
    }
}

impl ConfigStore {
    /// Discover config files from the environment and load them.
    pub fn open(explicit: Option<PathBuf>) -> Result<Self> {
        let sources = ConfigSources::discover()?.with_explicit(explicit);
        Self::with_sources(sources, EnvOverrides::from_env())
    }

    pub fn with_sources(sources: ConfigSources, env: EnvOverrides) -> Result<Self> {
        let config = Config::load_with_layers(&sources, &env)?;
        Ok(Self {
            sources,
            env,
            current: RwLock::new(Arc::new(config)),
            watch: None,
        })
    }

    pub fn snapshot(&self) -> Arc<Config> {
        Arc::clone(&self.current.read())
    }

    /// Rebuild from all layers. The previous snapshot stays in place if loading fails.
    pub fn reload(&self) -> Result<Arc<Config>> {
        let config = Arc::new(Config::load_with_layers(&self.sources, &self.env)?);
        *self.current.write() = Arc::clone(&config);
        tracing::info!(host = %config.host, "configuration reloaded");
        Ok(config)
    }

    /// Start watching the directories that hold config files.
    ///
    /// Events are queued; call [`ConfigStore::poll_changes`] from the dispatching thread to
    /// apply them.
    pub fn watch(&mut self) -> Result<()> {
        let (tx, rx) = mpsc::channel();
        let mut watcher =
            notify::recommended_watcher(tx).context("failed to create config watcher")?;

        for path in self.sources.all() {
            let Some(dir) = path.parent().filter(|dir| dir.is_dir()) else {
                continue;
            };
            watcher
                .watch(dir, RecursiveMode::NonRecursive)
                .with_context(|| format!("failed to watch {}", dir.display()))?;
        }

        self.watch = Some(ConfigWatch {
            _watcher: Some(watcher),
            events: rx,
        });
        Ok(())
    }

    /// Queue change events without a filesystem watcher.
    #[cfg(test)]
    fn watch_events(&mut self) -> mpsc::Sender<WatchEvent> {
        let (tx, rx) = mpsc::channel();
        self.watch = Some(ConfigWatch {
            _watcher: None,
            events: rx,
        });
        tx
    }

    /// Drain queued change events and reload if any touched a config file.
    pub fn poll_changes(&self) -> Result<bool> {
        let Some(ConfigWatch { events: rx, .. }) = &self.watch else {
            return Ok(false);
        };

        let mut changed = false;
        loop {
            match rx.try_recv() {
                Ok(Ok(event)) => {
                    if !matches!(event.kind, EventKind::Access(_))
                        && event.paths.iter().any(|path| self.is_source(path))
                    {
                        changed = true;
                    }
                }
                Ok(Err(err)) => tracing::warn!(error = %err, "config watcher error"),
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }

        if changed {
            self.reload()?;
        }
        Ok(changed)
    }

    fn is_source(&self, path: &Path) -> bool {
        self.sources
            .all()
            .any(|source| source == path || source.file_name() == path.file_name())
    }
}
