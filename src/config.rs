// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Configuration file loading.
//!
//! Lives at `<config dir>/remote-input/config.toml` unless
//! `REMOTE_INPUT_CONFIG` points elsewhere. Every key is optional.

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::bluetooth::ble_constants::config as defaults;
use crate::bluetooth::{LinkOptions, Timeouts};

/// Environment variable overriding the config file location.
pub const CONFIG_PATH_ENV: &str = "REMOTE_INPUT_CONFIG";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bluetooth: BluetoothConfig,
    pub reports: ReportConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BluetoothConfig {
    /// Power the adapter on at start-up if it is off.
    pub power_on_adapter: bool,
    /// Connect to the first dongle found while scanning.
    pub auto_connect: bool,
    pub device_timeout_ms: u64,
    pub liveness_tick_ms: u64,
    /// 0 disables the connect timeout.
    pub connect_timeout_ms: u64,
    /// 0 disables the pairing timeout.
    pub pairing_timeout_ms: u64,
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        Self {
            power_on_adapter: true,
            auto_connect: true,
            device_timeout_ms: millis(defaults::DEVICE_TIMEOUT),
            liveness_tick_ms: millis(defaults::LIVENESS_TICK),
            connect_timeout_ms: millis(defaults::CONNECT_TIMEOUT),
            pairing_timeout_ms: millis(defaults::PAIRING_TIMEOUT),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub drain_interval_ms: u64,
    /// 0 leaves the queue unbounded.
    pub queue_capacity: usize,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            drain_interval_ms: millis(defaults::DRAIN_INTERVAL),
            queue_capacity: defaults::QUEUE_CAPACITY,
        }
    }
}

impl Config {
    /// Default location of the config file, if the platform has a config
    /// directory.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("remote-input").join("config.toml"))
    }

    /// Load from `REMOTE_INPUT_CONFIG` or the default location.
    pub fn load_default() -> Result<Self> {
        let path = std::env::var_os(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .or_else(Self::default_path);
        match path {
            Some(path) => Self::load(&path),
            None => {
                debug!("No config directory, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Load from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("Config file {:?} doesn't exist, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {:?}", path))?;
        let config = Self::parse(&content).with_context(|| format!("Invalid config {:?}", path))?;

        info!("Loaded config from {:?}", path);
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("Failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.reports.drain_interval_ms > 0,
            "reports.drain_interval_ms must be non-zero"
        );
        ensure!(
            self.bluetooth.liveness_tick_ms > 0,
            "bluetooth.liveness_tick_ms must be non-zero"
        );
        Ok(())
    }

    pub fn drain_interval(&self) -> Duration {
        Duration::from_millis(self.reports.drain_interval_ms)
    }

    pub fn link_options(&self) -> LinkOptions {
        let bt = &self.bluetooth;
        LinkOptions {
            auto_connect: bt.auto_connect,
            liveness_tick: Duration::from_millis(bt.liveness_tick_ms),
            timeouts: Timeouts {
                device: Duration::from_millis(bt.device_timeout_ms),
                connect: optional_millis(bt.connect_timeout_ms),
                pairing: optional_millis(bt.pairing_timeout_ms),
            },
        }
    }
}

fn millis(duration: Duration) -> u64 {
    duration.as_millis() as u64
}

fn optional_millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}
