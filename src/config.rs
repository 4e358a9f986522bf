use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

fn empty_path_none<'de, D>(deserializer: D) -> Result<Option<PathBuf>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt = Option::<PathBuf>::deserialize(deserializer)?;
    Ok(opt.and_then(|path| {
        if path.as_os_str().is_empty() {
            None
        } else {
            Some(path)
        }
    }))
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "config io error: {}", err),
            ConfigError::Parse(err) => write!(f, "config parse error: {}", err),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub run: RunConfig,
    pub output: OutputConfig,
    pub tracker: TrackerConfig,
    pub stats: StatsConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        toml::from_str(&raw).map_err(ConfigError::Parse)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub interface: Option<String>,
    pub promiscuous: bool,
    pub snaplen: i32,
    pub timeout_ms: i32,
    pub filter: Option<String>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        CaptureConfig {
            interface: None,
            promiscuous: true,
            snaplen: 65535,
            timeout_ms: 100,
            filter: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Stop after this many captured packets (0 = unlimited).
    pub count: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig { count: 0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    #[serde(deserialize_with = "empty_path_none")]
    pub export_json: Option<PathBuf>,
    #[serde(deserialize_with = "empty_path_none")]
    pub export_csv: Option<PathBuf>,
    pub quiet: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig {
            export_json: None,
            export_csv: None,
            quiet: false,
        }
    }
}

/// Settings for the flow tracking core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Initial capacity reserved for the flow map.
    pub table_size: usize,
    /// Hard cap on tracked flows; insertion fails beyond this.
    pub max_flows: usize,
    /// Idle age after which a flow is eligible for eviction.
    pub flow_timeout_us: u64,
    /// Collect application payload bytes per flow direction.
    pub payload_capture: bool,
    /// Cap on each per-direction payload buffer.
    pub payload_max_size: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        TrackerConfig {
            table_size: 65_536,
            max_flows: 100_000,
            flow_timeout_us: 300_000_000, // 5 minutes
            payload_capture: false,
            payload_max_size: 65_536,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    /// Print a periodic throughput line during capture.
    pub enabled: bool,
    pub interval_ms: u64,
    /// How many rows to show in top-talker/port/protocol listings.
    pub top_k: usize,
}

impl Default for StatsConfig {
    fn default() -> Self {
        StatsConfig {
            enabled: false,
            interval_ms: 1000,
            top_k: 10,
        }
    }
}
