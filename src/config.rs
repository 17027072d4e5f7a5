/*!
 * Configuration for the Lattice controller
 *
 * Settings are read from TOML files organised in sections. Top-level keys form
 * the `DEFAULT` section, every table is a section of its own and nested tables
 * get dotted names (`[compute.local]` is the `compute.local` section). Looking
 * up a section that does not exist yields the default section; keys missing
 * from a section fall back to the default section.
 */

use lattice_connect::ComputeRecord;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn, Level};

use crate::error::{ControllerError, Result};

/// Name of the fallback section
pub const DEFAULT_SECTION: &str = "DEFAULT";

/// Prefix of the sections describing compute engines
pub const COMPUTE_SECTION_PREFIX: &str = "compute.";

const APP_NAME: &str = "lattice";
const CONFIG_FILE_NAME: &str = "controller.toml";

/// One section of settings
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Section {
    values: BTreeMap<String, toml::Value>,
}

impl Section {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<toml::Value>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&toml::Value> {
        self.values.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.values.keys()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Scalar value rendered as a string
    pub fn get_str(&self, key: &str) -> Option<String> {
        match self.values.get(key)? {
            toml::Value::String(s) => Some(s.clone()),
            toml::Value::Integer(i) => Some(i.to_string()),
            toml::Value::Float(f) => Some(f.to_string()),
            toml::Value::Boolean(b) => Some(b.to_string()),
            _ => None,
        }
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        match self.values.get(key)? {
            toml::Value::Integer(i) => u64::try_from(*i).ok(),
            toml::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Boolean, also accepting the usual textual spellings (yes/no, on/off, 1/0)
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.values.get(key)? {
            toml::Value::Boolean(b) => Some(*b),
            toml::Value::Integer(i) => Some(*i != 0),
            toml::Value::String(s) => match s.trim().to_lowercase().as_str() {
                "1" | "yes" | "true" | "on" => Some(true),
                "0" | "no" | "false" | "off" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn get_duration_secs(&self, key: &str) -> Option<Duration> {
        self.get_u64(key).map(Duration::from_secs)
    }

    /// Overlay `other` on top of this section
    pub fn merge(&mut self, other: &Section) {
        for (key, value) in &other.values {
            self.values.insert(key.clone(), value.clone());
        }
    }
}

impl<K: Into<String>, V: Into<toml::Value>> FromIterator<(K, V)> for Section {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut section = Section::new();
        for (key, value) in iter {
            section.set(key, value);
        }
        section
    }
}

/// Settings loaded from one or more TOML files
#[derive(Debug, Clone)]
pub struct Config {
    /// Candidate files, read in order (later files win)
    files: Vec<PathBuf>,

    sections: BTreeMap<String, Section>,

    /// Files that were read, with their modification time at read
    watched: HashMap<PathBuf, SystemTime>,

    /// In-memory settings re-applied after every reload
    overrides: BTreeMap<String, Section>,
}

impl Config {
    /// Standard locations of the controller configuration file
    ///
    /// 1. `$XDG_CONFIG_HOME/lattice/controller.toml` (platform config dir)
    /// 2. `/etc/xdg/lattice/controller.toml`
    /// 3. `controller.toml` in the current working directory
    pub fn default_files() -> Vec<PathBuf> {
        let mut files = Vec::new();
        if let Some(dir) = dirs::config_dir() {
            files.push(dir.join(APP_NAME).join(CONFIG_FILE_NAME));
        }
        files.push(Path::new("/etc/xdg").join(APP_NAME).join(CONFIG_FILE_NAME));
        files.push(PathBuf::from(CONFIG_FILE_NAME));
        files
    }

    /// Load settings from the standard locations
    pub fn load() -> Result<Self> {
        Self::from_files(Self::default_files())
    }

    /// Load settings from an explicit list of files
    ///
    /// Missing files are skipped; a file that exists but does not parse is an
    /// error.
    pub fn from_files(files: Vec<PathBuf>) -> Result<Self> {
        let mut config = Self::empty(files);
        config.read_config()?;
        Ok(config)
    }

    /// Build settings from TOML text (no file is watched)
    pub fn parse(text: &str) -> Result<Self> {
        let mut config = Self::empty(Vec::new());
        let table: toml::Table = toml::from_str(text)?;
        flatten(None, &table, &mut config.sections);
        Ok(config)
    }

    fn empty(files: Vec<PathBuf>) -> Self {
        Self {
            files,
            sections: BTreeMap::new(),
            watched: HashMap::new(),
            overrides: BTreeMap::new(),
        }
    }

    /// Read (or re-read) every candidate file
    pub fn read_config(&mut self) -> Result<()> {
        let mut sections = BTreeMap::new();
        let mut watched = HashMap::new();

        for file in &self.files {
            if !file.is_file() {
                continue;
            }
            let text = std::fs::read_to_string(file)?;
            let table: toml::Table = toml::from_str(&text).map_err(|e: toml::de::Error| {
                ControllerError::Config(format!("{}: {}", file.display(), e))
            })?;
            flatten(None, &table, &mut sections);

            info!("Load configuration file {}", file.display());
            watched.insert(file.clone(), std::fs::metadata(file)?.modified()?);
        }

        if watched.is_empty() {
            warn!("No configuration file could be found or read");
        }

        self.sections = sections;
        self.watched = watched;
        for (name, values) in self.overrides.clone() {
            self.apply(&name, &values);
        }
        Ok(())
    }

    /// Files that were successfully read
    pub fn loaded_files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = self.watched.keys().cloned().collect();
        files.sort();
        files
    }

    pub fn default_section(&self) -> Section {
        self.sections
            .get(DEFAULT_SECTION)
            .cloned()
            .unwrap_or_default()
    }

    /// Get a section, overlaid on the default section
    ///
    /// Returns the default section if the name is unknown.
    pub fn section(&self, name: &str) -> Section {
        let mut section = self.default_section();
        if let Some(values) = self.sections.get(name) {
            section.merge(values);
        }
        section
    }

    pub fn has_section(&self, name: &str) -> bool {
        self.sections.contains_key(name)
    }

    /// Names of every section (including `DEFAULT` when present)
    pub fn section_names(&self) -> Vec<String> {
        self.sections.keys().cloned().collect()
    }

    /// Set values of a section in memory
    ///
    /// Not written to disk; the values survive reloads of the files.
    pub fn set_section(&mut self, name: &str, values: Section) {
        self.apply(name, &values);
        self.overrides
            .entry(name.to_string())
            .or_default()
            .merge(&values);
    }

    fn apply(&mut self, name: &str, values: &Section) {
        self.sections
            .entry(name.to_string())
            .or_default()
            .merge(values);
    }

    /// Re-read the files if any of them changed on disk
    ///
    /// Returns whether a reload happened.
    pub fn reload_if_changed(&mut self) -> Result<bool> {
        let changed = self.watched.iter().any(|(file, mtime)| {
            match std::fs::metadata(file).and_then(|m| m.modified()) {
                Ok(current) => current != *mtime,
                // A vanished file is picked up on the next change
                Err(_) => false,
            }
        });

        if changed {
            self.read_config()?;
        }
        Ok(changed)
    }
}

fn flatten(prefix: Option<&str>, table: &toml::Table, out: &mut BTreeMap<String, Section>) {
    let name = prefix.unwrap_or(DEFAULT_SECTION).to_string();
    for (key, value) in table {
        match value {
            toml::Value::Table(inner) => {
                let child = match prefix {
                    Some(parent) => format!("{}.{}", parent, key),
                    None => key.clone(),
                };
                out.entry(child.clone()).or_default();
                flatten(Some(&child), inner, out);
            }
            other => out
                .entry(name.clone())
                .or_default()
                .set(key.clone(), other.clone()),
        }
    }
}

/// Poll the configuration files for changes from a background task
///
/// The returned receiver holds the number of reloads so far; consumers wait
/// on it and read the shared `Config` again when it moves.
pub fn spawn_watcher(
    config: Arc<RwLock<Config>>,
    interval: Duration,
) -> (JoinHandle<()>, watch::Receiver<u64>) {
    let (tx, rx) = watch::channel(0u64);
    let handle = tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            let reloaded = config.write().await.reload_if_changed();
            match reloaded {
                Ok(true) => {
                    info!("Configuration reloaded");
                    tx.send_modify(|generation| *generation += 1);
                }
                Ok(false) => {}
                Err(e) => warn!("Could not reload configuration: {}", e),
            }
            if tx.is_closed() {
                break;
            }
        }
    });
    (handle, rx)
}

/// Logging verbosity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn to_tracing_level(&self) -> Level {
        match self {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

impl FromStr for LogLevel {
    type Err = ControllerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(ControllerError::Config(format!("unknown log level '{}'", other))),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        };
        f.write_str(s)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogSettings {
    pub level: LogLevel,

    /// Log file path (None = stdout)
    pub file: Option<PathBuf>,

    /// Shorthand for level = debug
    pub verbose: bool,
}

/// Typed view over the controller settings
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    /// Root directory holding one directory per project
    pub projects_path: PathBuf,

    /// Timeout of every request to a compute engine
    pub rpc_timeout: Duration,

    /// Interval at which the configuration files are polled for changes
    pub reload_interval: Duration,

    pub logging: LogSettings,

    /// Compute engines declared in `compute.<id>` sections
    pub computes: Vec<ComputeRecord>,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            projects_path: default_projects_path(),
            rpc_timeout: lattice_connect::DEFAULT_RPC_TIMEOUT,
            reload_interval: Duration::from_secs(1),
            logging: LogSettings::default(),
            computes: Vec::new(),
        }
    }
}

fn default_projects_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
        .join("projects")
}

impl ControllerSettings {
    /// Extract the typed settings from a loaded configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        let defaults = Self::default();
        let controller = config.section("controller");
        let logging = config.section("logging");

        let level = match logging.get_str("level") {
            Some(level) => level.parse()?,
            None => LogLevel::default(),
        };

        let mut computes = Vec::new();
        for name in config.section_names() {
            if let Some(id) = name.strip_prefix(COMPUTE_SECTION_PREFIX) {
                computes.push(compute_record(id, &config.section(&name))?);
            }
        }

        Ok(Self {
            projects_path: controller
                .get_str("projects_path")
                .map(PathBuf::from)
                .unwrap_or(defaults.projects_path),
            rpc_timeout: controller
                .get_duration_secs("rpc_timeout_secs")
                .unwrap_or(defaults.rpc_timeout),
            reload_interval: controller
                .get_duration_secs("reload_interval_secs")
                .unwrap_or(defaults.reload_interval),
            logging: LogSettings {
                level,
                file: logging.get_str("file").map(PathBuf::from),
                verbose: logging.get_bool("verbose").unwrap_or(false),
            },
            computes,
        })
    }
}

fn compute_record(id: &str, section: &Section) -> Result<ComputeRecord> {
    let host = section
        .get_str("host")
        .ok_or_else(|| ControllerError::Config(format!("compute {}: missing host", id)))?;

    let port = section.get_u64("port").unwrap_or(3080);
    let port = u16::try_from(port)
        .map_err(|_| ControllerError::Config(format!("compute {}: invalid port {}", id, port)))?;

    let protocol = section
        .get_str("protocol")
        .unwrap_or_else(|| "http".to_string());

    let mut record = ComputeRecord::new(id, protocol, host, port);
    if let Some(version) = section.get_u64("api_version") {
        record.api_version = u32::try_from(version).map_err(|_| {
            ControllerError::Config(format!("compute {}: invalid api_version {}", id, version))
        })?;
    }
    if let Some(user) = section.get_str("user") {
        record = record.with_credentials(user, section.get_str("password").unwrap_or_default());
    }
    if let Some(name) = section.get_str("name") {
        record = record.with_name(name);
    }
    Ok(record)
}
