/*
[INPUT]:  YAML configuration file, runtime key/value updates
[OUTPUT]: String key/value config store with change notifications, parsed break handler config
[POS]:    Configuration layer - per-task break bounds, account selection, automation settings
[UPDATE]: When adding new configuration options or config keys
[UPDATE]: 2026-10-14 Flatten YAML file into the namespaced key store
*/

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::debug;

const CONFIG_CHANGE_CAPACITY: usize = 64;

/// Config key names consumed by the break handler
pub mod keys {
    pub const ACCOUNT_SELECTION: &str = "accountselection";
    pub const MANUAL_USERNAME: &str = "accountselection-manual-username";
    pub const MANUAL_PASSWORD: &str = "accountselection-manual-password";
    pub const PROFILES_ACCOUNT: &str = "accountselection-profiles-account";

    pub fn threshold_from(namespace: &str) -> String {
        format!("{namespace}-thresholdfrom")
    }

    pub fn threshold_to(namespace: &str) -> String {
        format!("{namespace}-thresholdto")
    }

    pub fn break_from(namespace: &str) -> String {
        format!("{namespace}-breakfrom")
    }

    pub fn break_to(namespace: &str) -> String {
        format!("{namespace}-breakto")
    }

    pub fn logout(namespace: &str) -> String {
        format!("{namespace}-logout")
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("no config directory available on this platform")]
    NoConfigDir,
}

/// A config value was written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigChanged {
    pub key: String,
    pub old_value: Option<String>,
    pub new_value: String,
}

/// String key/value store the scheduler reads its settings from
pub trait ConfigStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    /// Write a value and notify subscribers
    fn set(&self, key: &str, value: &str);

    /// Stream of writes made through [`ConfigStore::set`]
    fn subscribe(&self) -> broadcast::Receiver<ConfigChanged>;

    fn get_bool(&self, key: &str) -> bool {
        self.get(key)
            .is_some_and(|value| value.trim().eq_ignore_ascii_case("true"))
    }
}

/// In-memory [`ConfigStore`]
#[derive(Debug)]
pub struct MemoryConfig {
    values: RwLock<HashMap<String, String>>,
    changes: broadcast::Sender<ConfigChanged>,
}

impl MemoryConfig {
    pub fn new() -> Self {
        let (changes, _rx) = broadcast::channel(CONFIG_CHANGE_CAPACITY);
        Self {
            values: RwLock::new(HashMap::new()),
            changes,
        }
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let config = Self::new();
        {
            let mut values = config.values.write().unwrap_or_else(PoisonError::into_inner);
            for (key, value) in pairs {
                values.insert(key.into(), value.into());
            }
        }
        config
    }

    pub fn len(&self) -> usize {
        self.values.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigStore for MemoryConfig {
    fn get(&self, key: &str) -> Option<String> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: &str) {
        let old_value = self
            .values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_string());
        if old_value.as_deref() == Some(value) {
            return;
        }
        debug!(key, "config value changed");
        // No subscribers is fine.
        let _ = self.changes.send(ConfigChanged {
            key: key.to_string(),
            old_value,
            new_value: value.to_string(),
        });
    }

    fn subscribe(&self) -> broadcast::Receiver<ConfigChanged> {
        self.changes.subscribe()
    }
}

/// Top-level configuration file for the break handler
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BreakHandlerConfig {
    /// Tasks that may request breaks
    #[serde(default)]
    pub tasks: Vec<TaskConfig>,
    /// How re-login credentials are chosen
    #[serde(default)]
    pub account: AccountSelectionConfig,
    /// FSM pacing
    #[serde(default)]
    pub automation: AutomationConfig,
}

/// Break settings for a single task
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TaskConfig {
    /// Display name; the config namespace is derived from it
    pub name: String,
    /// Whether the task takes idle-only breaks (false forces logout breaks)
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Log out for every break
    #[serde(default)]
    pub logout: bool,
    /// Minutes until the next break, lower bound
    #[serde(default = "default_threshold_from")]
    pub threshold_from: String,
    #[serde(default = "default_threshold_to")]
    pub threshold_to: String,
    /// Break length in minutes, lower bound
    #[serde(default = "default_break_from")]
    pub break_from: String,
    #[serde(default = "default_break_to")]
    pub break_to: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AccountSelectionConfig {
    /// Use the manual username/password instead of a profile
    #[serde(default)]
    pub manual: bool,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Profile label looked up in the credential blob
    #[serde(default)]
    pub profile: String,
    /// File holding `label:username[:password]` lines
    #[serde(default)]
    pub profiles_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AutomationConfig {
    /// Simulated host tick period
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Idle ticks above which the idle timers are reset
    #[serde(default = "default_idle_high_water")]
    pub idle_high_water: u32,
    /// Settle delay after clicking logout, in ticks
    #[serde(default = "default_settle_ticks_from")]
    pub settle_ticks_from: u32,
    #[serde(default = "default_settle_ticks_to")]
    pub settle_ticks_to: u32,
    /// Ticks spent in one automation step before a stall warning
    #[serde(default = "default_stall_warn_ticks")]
    pub stall_warn_ticks: u32,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            idle_high_water: default_idle_high_water(),
            settle_ticks_from: default_settle_ticks_from(),
            settle_ticks_to: default_settle_ticks_to(),
            stall_warn_ticks: default_stall_warn_ticks(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_threshold_from() -> String {
    "60".to_string()
}

fn default_threshold_to() -> String {
    "120".to_string()
}

fn default_break_from() -> String {
    "5".to_string()
}

fn default_break_to() -> String {
    "15".to_string()
}

fn default_tick_interval_ms() -> u64 {
    600
}

pub(crate) fn default_idle_high_water() -> u32 {
    14_900
}

pub(crate) fn default_settle_ticks_from() -> u32 {
    20
}

pub(crate) fn default_settle_ticks_to() -> u32 {
    25
}

pub(crate) fn default_stall_warn_ticks() -> u32 {
    100
}

impl BreakHandlerConfig {
    /// Load configuration from YAML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// `<config dir>/breakhandler/config.yaml`
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|dir| dir.join("breakhandler").join("config.yaml"))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Flatten into the namespaced key store the scheduler reads
    pub fn to_store(&self) -> MemoryConfig {
        let mut pairs: Vec<(String, String)> = Vec::new();
        for task in &self.tasks {
            let namespace = crate::task::Task::new(&task.name).sanitized_name();
            pairs.push((keys::threshold_from(&namespace), task.threshold_from.clone()));
            pairs.push((keys::threshold_to(&namespace), task.threshold_to.clone()));
            pairs.push((keys::break_from(&namespace), task.break_from.clone()));
            pairs.push((keys::break_to(&namespace), task.break_to.clone()));
            pairs.push((keys::logout(&namespace), task.logout.to_string()));
        }
        pairs.push((keys::ACCOUNT_SELECTION.to_string(), self.account.manual.to_string()));
        pairs.push((keys::MANUAL_USERNAME.to_string(), self.account.username.clone()));
        pairs.push((keys::MANUAL_PASSWORD.to_string(), self.account.password.clone()));
        pairs.push((keys::PROFILES_ACCOUNT.to_string(), self.account.profile.clone()));
        MemoryConfig::from_pairs(pairs)
    }

    /// Read the credential blob, if one is configured
    pub fn load_credential_blob(&self) -> Result<Option<String>, ConfigError> {
        let Some(path) = self.account.profiles_file.as_ref() else {
            return Ok(None);
        };
        std::fs::read_to_string(path)
            .map(Some)
            .map_err(|source| ConfigError::Io {
                path: path.clone(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
tasks:
  - name: Power Miner
    logout: true
    threshold_from: "1"
    threshold_to: "1"
  - name: fisher
    enabled: false
account:
  manual: true
  username: alice
  password: pw1
automation:
  idle_high_water: 12000
"#;

    #[test]
    fn parses_yaml_with_defaults() {
        let config = BreakHandlerConfig::from_yaml(SAMPLE).unwrap();

        assert_eq!(config.tasks.len(), 2);
        assert!(config.tasks[0].enabled);
        assert!(config.tasks[0].logout);
        assert_eq!(config.tasks[1].threshold_from, "60");
        assert!(!config.tasks[1].enabled);
        assert_eq!(config.automation.idle_high_water, 12_000);
        assert_eq!(config.automation.settle_ticks_from, 20);
        assert_eq!(config.automation.settle_ticks_to, 25);
    }

    #[test]
    fn flattens_into_namespaced_keys() {
        let store = BreakHandlerConfig::from_yaml(SAMPLE).unwrap().to_store();

        assert_eq!(store.get("powerminer-thresholdfrom").as_deref(), Some("1"));
        assert_eq!(store.get("powerminer-logout").as_deref(), Some("true"));
        assert_eq!(store.get("fisher-breakto").as_deref(), Some("15"));
        assert!(store.get_bool(keys::ACCOUNT_SELECTION));
        assert_eq!(store.get(keys::MANUAL_USERNAME).as_deref(), Some("alice"));
    }

    #[test]
    fn set_publishes_only_real_changes() {
        let store = MemoryConfig::from_pairs([("a-logout", "false")]);
        let mut rx = store.subscribe();

        store.set("a-logout", "false");
        store.set("a-logout", "true");

        let change = rx.try_recv().unwrap();
        assert_eq!(change.key, "a-logout");
        assert_eq!(change.old_value.as_deref(), Some("false"));
        assert_eq!(change.new_value, "true");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn get_bool_is_lenient_about_case() {
        let store = MemoryConfig::from_pairs([("x", " TRUE "), ("y", "yes")]);
        assert!(store.get_bool("x"));
        assert!(!store.get_bool("y"));
        assert!(!store.get_bool("missing"));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = BreakHandlerConfig::from_file(Path::new("/nonexistent/breakhandler.yaml"))
            .unwrap_err();
        assert!(err.to_string().contains("/nonexistent/breakhandler.yaml"));
    }
}
