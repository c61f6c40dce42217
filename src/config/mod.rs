use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Cache file written by the Find My app, relative to `$HOME`
pub const DEFAULT_SOURCE_PATH: &str = "Library/Caches/com.apple.findmy.fmipcore/Items.data";

/// Output directory for per-device logs, relative to `$HOME`
pub const DEFAULT_OUTPUT_DIR: &str = "AirTag_History_Data";

/// Complete tracker configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TrackerConfig {
    /// Snapshot file to poll. Defaults to the Find My item cache under `$HOME`.
    #[serde(default)]
    pub source_path: Option<PathBuf>,

    /// Directory holding one CSV log per device
    #[serde(default)]
    pub output_dir: Option<PathBuf>,

    /// Delay between poll cycles (milliseconds)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Extra delay while the producer app is not running (milliseconds)
    #[serde(default = "default_absent_backoff_ms")]
    pub absent_backoff_ms: u64,

    /// Process name passed to `pgrep`. Empty disables the liveness check.
    #[serde(default = "default_producer_process")]
    pub producer_process: String,

    /// Only track the device with this display name (case-insensitive)
    #[serde(default)]
    pub device: Option<String>,

    #[serde(default)]
    pub keep_awake: KeepAwakeConfig,
}

/// Sleep-prevention helper configuration
#[derive(Debug, Clone, Deserialize)]
pub struct KeepAwakeConfig {
    #[serde(default = "default_keep_awake_enabled")]
    pub enabled: bool,

    /// Program and arguments. An argument of `{pid}` is replaced with our
    /// process id so the helper exits with us even if we are killed.
    #[serde(default = "default_keep_awake_command")]
    pub command: Vec<String>,
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_absent_backoff_ms() -> u64 {
    5000
}

fn default_producer_process() -> String {
    "FindMy".to_string()
}

fn default_keep_awake_enabled() -> bool {
    true
}

fn default_keep_awake_command() -> Vec<String> {
    ["caffeinate", "-di", "-w", "{pid}"]
        .iter()
        .map(|arg| arg.to_string())
        .collect()
}

impl Default for KeepAwakeConfig {
    fn default() -> Self {
        Self {
            enabled: default_keep_awake_enabled(),
            command: default_keep_awake_command(),
        }
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            source_path: None,
            output_dir: None,
            poll_interval_ms: default_poll_interval_ms(),
            absent_backoff_ms: default_absent_backoff_ms(),
            producer_process: default_producer_process(),
            device: None,
            keep_awake: KeepAwakeConfig::default(),
        }
    }
}

impl TrackerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn absent_backoff(&self) -> Duration {
        Duration::from_millis(self.absent_backoff_ms)
    }

    /// Device filter, or None when unset or blank
    pub fn device_filter(&self) -> Option<&str> {
        self.device
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }

    /// Snapshot path, resolving the default against `home`
    pub fn source_path_in(&self, home: &Path) -> PathBuf {
        match &self.source_path {
            Some(path) => path.clone(),
            None => home.join(DEFAULT_SOURCE_PATH),
        }
    }

    /// Output directory, resolving the default against `home`
    pub fn output_dir_in(&self, home: &Path) -> PathBuf {
        match &self.output_dir {
            Some(path) => path.clone(),
            None => home.join(DEFAULT_OUTPUT_DIR),
        }
    }

    /// Resolve both paths against the current user's home directory
    pub fn resolve_paths(&self) -> Result<(PathBuf, PathBuf)> {
        if let (Some(source), Some(output)) = (&self.source_path, &self.output_dir) {
            return Ok((source.clone(), output.clone()));
        }
        let home = home_dir()?;
        Ok((self.source_path_in(&home), self.output_dir_in(&home)))
    }
}

fn home_dir() -> Result<PathBuf> {
    std::env::var_os("HOME")
        .filter(|home| !home.is_empty())
        .map(PathBuf::from)
        .context("HOME is not set; cannot locate default source and output paths")
}

/// Load configuration from TOML file
pub fn load_config(path: &Path) -> Result<TrackerConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: TrackerConfig = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TrackerConfig::default();
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.absent_backoff(), Duration::from_secs(5));
        assert_eq!(config.producer_process, "FindMy");
        assert!(config.keep_awake.enabled);
        assert_eq!(
            config.keep_awake.command,
            vec!["caffeinate", "-di", "-w", "{pid}"]
        );
        assert!(config.device_filter().is_none());
    }

    #[test]
    fn test_default_paths_resolve_under_home() {
        let config = TrackerConfig::default();
        let home = Path::new("/Users/alice");
        assert_eq!(
            config.source_path_in(home),
            PathBuf::from("/Users/alice/Library/Caches/com.apple.findmy.fmipcore/Items.data")
        );
        assert_eq!(
            config.output_dir_in(home),
            PathBuf::from("/Users/alice/AirTag_History_Data")
        );
    }

    #[test]
    fn test_config_deserialization() {
        let toml = r#"
            source_path = "/tmp/Items.data"
            output_dir = "/tmp/history"
            poll_interval_ms = 250
            absent_backoff_ms = 2000
            producer_process = ""
            device = "Keys"

            [keep_awake]
            enabled = false
        "#;

        let config: TrackerConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.source_path, Some(PathBuf::from("/tmp/Items.data")));
        assert_eq!(config.poll_interval_ms, 250);
        assert_eq!(config.absent_backoff_ms, 2000);
        assert_eq!(config.producer_process, "");
        assert_eq!(config.device_filter(), Some("Keys"));
        assert!(!config.keep_awake.enabled);
        // Unset field in a present section keeps its default
        assert_eq!(config.keep_awake.command[0], "caffeinate");

        let (source, output) = config.resolve_paths().unwrap();
        assert_eq!(source, PathBuf::from("/tmp/Items.data"));
        assert_eq!(output, PathBuf::from("/tmp/history"));
    }

    #[test]
    fn test_partial_config() {
        let toml = r#"
            poll_interval_ms = 3000
        "#;

        let config: TrackerConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.poll_interval_ms, 3000);
        assert_eq!(config.absent_backoff_ms, 5000); // Default
        assert_eq!(config.producer_process, "FindMy"); // Default
        assert!(config.keep_awake.enabled); // Default
    }

    #[test]
    fn test_blank_device_filter_is_ignored() {
        let config = TrackerConfig {
            device: Some("   ".to_string()),
            ..TrackerConfig::default()
        };
        assert!(config.device_filter().is_none());
    }

    #[test]
    fn test_load_config_missing_file() {
        let err = load_config(Path::new("/nonexistent/tagtrail.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
