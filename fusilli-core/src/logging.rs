// Copyright 2025 Fusilli Contributors
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
//
// SPDX-License-Identifier: Apache-2.0

//! Log line format and subscriber setup.
//!
//! Every event is written as one line:
//!
//! ```text
//! [2025-01-15T09:30:00.123Z][INFO]Tailer started tailer=1 address=localhost:27017
//! ```
//!
//! In [`LoggingMode::Production`] the filter is `info`, so per-entry debug
//! lines are dropped; [`LoggingMode::Debug`] lowers it to `debug`. `RUST_LOG`
//! overrides both.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Verbosity of the pipeline logs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoggingMode {
    /// Per-entry diagnostics enabled
    Debug,
    /// Lifecycle and errors only
    #[default]
    Production,
}

impl LoggingMode {
    /// Default filter directive for this mode.
    #[must_use]
    pub const fn directive(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Production => "info",
        }
    }

    /// Returns true if per-entry diagnostics should be emitted.
    #[must_use]
    pub const fn is_debug(&self) -> bool {
        matches!(self, Self::Debug)
    }
}

impl std::str::FromStr for LoggingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "production" | "prod" => Ok(Self::Production),
            other => Err(format!("unknown logging mode: {other}")),
        }
    }
}

impl fmt::Display for LoggingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Debug => write!(f, "debug"),
            Self::Production => write!(f, "production"),
        }
    }
}

/// Errors raised while installing the subscriber.
#[derive(Debug, Error)]
pub enum LoggingError {
    /// Log destination could not be opened
    #[error("cannot open log destination {path}: {source}")]
    Destination {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// A global subscriber is already installed
    #[error("logging already initialized: {0}")]
    AlreadyInitialized(String),
}

/// `[<RFC 3339 UTC>][<LEVEL>]<message> key=value` event format.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogLineFormat;

impl<S, N> FormatEvent<S, N> for LogLineFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        write!(
            writer,
            "[{}][{}]",
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            event.metadata().level()
        )?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

fn env_filter(mode: LoggingMode) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(mode.directive()))
}

/// Installs the global subscriber.
///
/// Lines are appended to `destination` when given, otherwise written to
/// stderr.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or a subscriber is already
/// installed.
pub fn init(destination: Option<&Path>, mode: LoggingMode) -> Result<(), LoggingError> {
    let registry = tracing_subscriber::registry().with(env_filter(mode));

    let installed = match destination {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| LoggingError::Destination {
                    path: path.display().to_string(),
                    source,
                })?;

            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .event_format(LogLineFormat)
                        .with_ansi(false)
                        .with_writer(Mutex::new(file)),
                )
                .try_init()
        }
        None => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .event_format(LogLineFormat)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
    };

    installed.map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn capture(mode: LoggingMode, emit: impl FnOnce()) -> String {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .event_format(LogLineFormat)
            .with_env_filter(EnvFilter::new(mode.directive()))
            .with_writer(move || writer.clone())
            .finish();

        tracing::subscriber::with_default(subscriber, emit);

        let bytes = captured.0.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn test_line_format() {
        let output = capture(LoggingMode::Production, || {
            tracing::info!(tailer = 1, "Tailer started");
        });

        assert!(output.starts_with('['));
        assert!(output.contains("][INFO]Tailer started tailer=1"));
        assert!(output.ends_with('\n'));
        assert_eq!(output.lines().count(), 1);
    }

    #[test]
    fn test_production_suppresses_debug() {
        let output = capture(LoggingMode::Production, || {
            tracing::debug!("entry delivered");
            tracing::warn!("cursor exhausted");
        });

        assert!(!output.contains("entry delivered"));
        assert!(output.contains("[WARN]cursor exhausted"));
    }

    #[test]
    fn test_debug_mode_keeps_debug() {
        let output = capture(LoggingMode::Debug, || {
            tracing::debug!("entry delivered");
        });

        assert!(output.contains("[DEBUG]entry delivered"));
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("debug".parse::<LoggingMode>(), Ok(LoggingMode::Debug));
        assert_eq!("PRODUCTION".parse::<LoggingMode>(), Ok(LoggingMode::Production));
        assert!("verbose".parse::<LoggingMode>().is_err());
        assert_eq!(LoggingMode::default(), LoggingMode::Production);
    }
}
