// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Run-time settings for the link-management core.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;

use common::logging::LogFormat;

/// How a device learns about link changes.  This is chosen once, when the
/// device is created, and applies to every port on it.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Deserialize,
    Serialize,
    JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum MonitoringMode {
    /// A thread samples every port on a fixed interval.
    #[default]
    Polled,
    /// The hardware raises an interrupt, and a bottom-half thread scans the
    /// ports.  Down edges are only reported when forced.
    Interrupt,
}

impl std::fmt::Display for MonitoringMode {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            MonitoringMode::Polled => write!(f, "polled"),
            MonitoringMode::Interrupt => write!(f, "interrupt"),
        }
    }
}

/// The LinkConfig structure captures the tunable settings of a device.  Every
/// field has a default, so a config file need only name the settings it
/// changes.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(default)]
pub struct LinkConfig {
    pub monitoring_mode: MonitoringMode,

    /// How often the poll thread samples the ports.  In interrupt mode, this
    /// bounds how long the bottom half sleeps between checks for shutdown.
    pub poll_interval_ms: u64,

    /// Error-hold threshold given to each newly added port.  0 means no
    /// threshold.
    pub error_hold_threshold: u32,

    /// Number of attempts made to read a counter before giving up.
    pub read_retries: u32,

    /// If set, where the log should be written.  If not set, the log goes to
    /// stdout.
    pub log_file: Option<String>,

    /// Output log info in unstructured text or json?
    pub log_format: LogFormat,
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfig {
            monitoring_mode: MonitoringMode::Polled,
            poll_interval_ms: 1000,
            error_hold_threshold: 0,
            read_retries: 3,
            log_file: None,
            log_format: LogFormat::Human,
        }
    }
}

impl LinkConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn from_toml(txt: &str) -> anyhow::Result<Self> {
        let config: LinkConfig =
            toml::from_str(txt).context("parsing link config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let txt = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        LinkConfig::from_toml(&txt)
            .with_context(|| format!("loading {}", path.display()))
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.poll_interval_ms == 0 {
            anyhow::bail!("poll_interval_ms must be non-zero");
        }
        if self.read_retries == 0 {
            anyhow::bail!("read_retries must be non-zero");
        }
        Ok(())
    }
}
