//! Configuration loading and SIGHUP reload.
//!
//! Mirrors the original `config_get_double(cfg, key, default)` accessor pattern as serde
//! defaults: every field has a programmatic fallback, so a missing file or a file missing
//! whole sections still produces a usable `Config`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{error, info};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::errors::{FusionError, FusionResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    pub association_threshold: f64,
    pub confidence_threshold: f64,
    pub max_track_age: u32,
    pub max_tracks: usize,
    /// Reserved: parsed but not consumed by any algorithm (see DESIGN.md Open Questions).
    pub position_weight: f64,
    /// Reserved: parsed but not consumed by any algorithm (see DESIGN.md Open Questions).
    pub velocity_weight: f64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            association_threshold: 5.0,
            confidence_threshold: 0.3,
            max_track_age: 50,
            max_tracks: 100,
            position_weight: 1.0,
            velocity_weight: 0.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub data_path: String,
    pub playback_speed: f64,
    pub looping: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            data_path: "scenarios/demo.txt".to_string(),
            playback_speed: 1.0,
            looping: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub rtsp_url: String,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            rtsp_url: "rtsp://127.0.0.1/mock".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RadarConfig {
    pub device_path: String,
    pub baud_rate: u32,
}

impl Default for RadarConfig {
    fn default() -> Self {
        Self {
            device_path: "/dev/ttyUSB0".to_string(),
            baud_rate: 115_200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { capacity: 50 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub socket_path: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            socket_path: "/tmp/mec_fusion.sock".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub fusion: FusionConfig,
    pub sim: SimConfig,
    pub video: VideoConfig,
    pub radar: RadarConfig,
    pub queue: QueueConfig,
    pub monitor: MonitorConfig,
}

impl Config {
    /// Loads from `path`, falling back to all-defaults when the file is absent.
    pub fn load(path: &Path) -> FusionResult<Self> {
        if !path.exists() {
            info!("config file {:?} not found, using defaults", path);
            return Ok(Config::default());
        }
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text)
            .map_err(|e| FusionError::InvalidArgument(format!("malformed config {:?}: {}", path, e)))
    }
}

/// Reloadable config snapshot shared across threads.
///
/// Readers clone the inner `Arc` (cheap, never blocks the SIGHUP writer for longer than
/// the swap itself); the writer is the signal-handling thread.
#[derive(Clone)]
pub struct ConfigHandle {
    inner: Arc<RwLock<Arc<Config>>>,
    path: PathBuf,
}

impl ConfigHandle {
    pub fn new(path: PathBuf, initial: Config) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(initial))),
            path,
        }
    }

    pub fn current(&self) -> Arc<Config> {
        self.inner.read().clone()
    }

    /// Re-reads the config file and swaps it in. A malformed reload is logged and the
    /// previous config is kept.
    pub fn reload(&self) {
        match Config::load(&self.path) {
            Ok(cfg) => {
                *self.inner.write() = Arc::new(cfg);
                info!("config reloaded from {:?}", self.path);
            }
            Err(e) => {
                error!("config reload failed, keeping previous config: {}", e);
            }
        }
    }
}
