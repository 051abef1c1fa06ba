// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use std::fs::OpenOptions;
use std::str::FromStr;

use anyhow::Context;
use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;
use slog::Drain;

/// Should log output be formatted for people or for machines?
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
pub enum LogFormat {
    #[default]
    Human,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "human" => Ok(LogFormat::Human),
            "json" => Ok(LogFormat::Json),
            x => Err(format!("invalid log format: {x}")),
        }
    }
}

/// Build the root logger for a component.  Output goes to `log_file` if one
/// is provided, and to stdout otherwise.  In either case the records pass
/// through an async drain, so logging never blocks the calling thread on I/O.
pub fn init(
    name: &str,
    log_file: &Option<String>,
    log_format: LogFormat,
) -> anyhow::Result<slog::Logger> {
    let sink: Box<dyn std::io::Write + Send> = match log_file {
        Some(path) => Box::new(
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {path}"))?,
        ),
        None => Box::new(std::io::stdout()),
    };

    let drain = match log_format {
        LogFormat::Human => {
            let decorator = slog_term::PlainDecorator::new(sink);
            let drain = slog_term::FullFormat::new(decorator).build().fuse();
            slog_async::Async::new(drain).build().fuse()
        }
        LogFormat::Json => {
            let drain = slog_bunyan::default(sink).fuse();
            slog_async::Async::new(drain).build().fuse()
        }
    };

    let component = name.to_string();
    Ok(slog::Logger::root(drain, slog::o!("component" => component)))
}

/// A logger that discards everything, for unit tests that don't care about
/// output.
pub fn discard() -> slog::Logger {
    slog::Logger::root(slog::Discard, slog::o!())
}
