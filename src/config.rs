/*!
 * Configuration structures and defaults for Tidemark
 */

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::Level;

use crate::error::{Result, TidemarkError};

/// Log verbosity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl LogLevel {
    pub fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

/// Runtime configuration for one replication session
#[derive(Debug, Clone)]
pub struct Config {
    /// Root of the tree being replicated
    pub master_root: PathBuf,

    /// Root of the mirror
    pub slave_root: PathBuf,

    /// Exit after this many clean turns (0 = run forever)
    pub turns: u64,

    /// Keep-alive cadence in seconds (0 disables keep-alives)
    pub timeout: u64,

    /// Number of sync pool workers
    pub sync_jobs: usize,

    /// Preset master volume uuid; also updated when a foreign master
    /// establishes itself
    pub volume_id: Option<String>,

    /// Where the supervisor publishes its state
    pub state_file: Option<PathBuf>,

    /// Log verbosity
    pub log_level: LogLevel,

    /// Log destination (None = stdout)
    pub log_file: Option<PathBuf>,

    /// The TOML file this configuration was loaded from, if any; volume id
    /// changes are persisted back to it
    pub config_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            master_root: PathBuf::from("."),
            slave_root: PathBuf::from("."),
            turns: 0,
            timeout: 120,
            sync_jobs: 3,
            volume_id: None,
            state_file: None,
            log_level: LogLevel::default(),
            log_file: None,
            config_path: None,
        }
    }
}

impl Config {
    /// Record a newly established master identity, persisting it to the
    /// backing TOML file when there is one.
    pub fn set_volume_id(&mut self, uuid: &str) -> Result<()> {
        self.volume_id = Some(uuid.to_string());
        let path = match &self.config_path {
            Some(p) => p.clone(),
            None => return Ok(()),
        };
        let mut file = if path.exists() {
            ConfigFile::load(&path)?
        } else {
            ConfigFile::default()
        };
        file.replication.volume_id = Some(uuid.to_string());
        let rendered = toml::to_string_pretty(&file)
            .map_err(|e| TidemarkError::Config(format!("Failed to render config: {}", e)))?;
        write_atomic(&path, rendered.as_bytes())?;
        Ok(())
    }
}

/// Configuration file structure (loaded from TOML)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConfigFile {
    #[serde(default)]
    pub replication: ReplicationConfig,

    #[serde(default)]
    pub monitor: MonitorConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ReplicationConfig {
    pub turns: Option<u64>,
    pub timeout: Option<u64>,
    pub sync_jobs: Option<usize>,
    pub volume_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MonitorConfig {
    pub state_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LoggingConfig {
    pub level: Option<LogLevel>,
    pub file: Option<PathBuf>,
}

impl ConfigFile {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| TidemarkError::Config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| TidemarkError::Config(format!("Failed to parse config file: {}", e)))
    }

    /// Apply this config file to a runtime Config
    pub fn apply_to(&self, config: &mut Config) {
        if let Some(turns) = self.replication.turns {
            config.turns = turns;
        }
        if let Some(timeout) = self.replication.timeout {
            config.timeout = timeout;
        }
        if let Some(sync_jobs) = self.replication.sync_jobs {
            config.sync_jobs = sync_jobs.max(1);
        }
        if let Some(ref volume_id) = self.replication.volume_id {
            config.volume_id = Some(volume_id.clone());
        }
        if let Some(ref state_file) = self.monitor.state_file {
            config.state_file = Some(state_file.clone());
        }
        if let Some(level) = self.logging.level {
            config.log_level = level;
        }
        if let Some(ref file) = self.logging.file {
            config.log_file = Some(file.clone());
        }
    }
}

/// Replace the contents of `path` through a temp file and rename, so
/// readers never observe a partial write.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
    let mut tmp = match dir {
        Some(d) => tempfile::NamedTempFile::new_in(d)?,
        None => tempfile::NamedTempFile::new_in(".")?,
    };
    tmp.write_all(contents)?;
    tmp.persist(path)
        .map_err(|e| TidemarkError::Io(e.error))?;
    Ok(())
}
