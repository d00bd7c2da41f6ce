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

//! Process configuration.
//!
//! Settings are read from a TOML file (`fusilli.toml` by default) and then
//! overridden by command-line flags or `FUSILLI_*` environment variables.

use crate::cli::Cli;
use fusilli_core::entry::OperationKind;
use fusilli_core::filter::OplogFilter;
use fusilli_core::logging::LoggingMode;
use fusilli_core::sink::SinkConfig;
use fusilli_core::tailer::TailerConfig;
use fusilli_destinations::elasticsearch::ElasticsearchConfig;
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration file read when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "fusilli.toml";

/// Log destination value that selects standard error instead of a file.
pub const STDERR_DESTINATION: &str = "-";

/// Errors raised while loading or validating settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for '{field}': {message}")]
    InvalidValue {
        field: &'static str,
        message: String,
    },
}

impl ConfigError {
    fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field,
            message: message.into(),
        }
    }
}

/// Every setting of the `fusilli` process.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// MongoDB address, `host:port` or a full connection string
    pub source_address: String,

    /// Oplog entries to forward
    pub filter: OplogFilter,

    /// Target index
    pub index_name: String,

    /// Document type; empty selects the typeless endpoint
    pub doc_type: String,

    pub logging_mode: LoggingMode,

    /// Log file, or `-` for standard error
    pub log_destination: PathBuf,

    /// Capacity of the tailer to sink queue
    pub queue_capacity: usize,

    /// Await window of the oplog cursor
    pub poll_interval_ms: u64,

    pub elasticsearch_url: String,
    pub elasticsearch_username: Option<String>,
    pub elasticsearch_password: Option<String>,
    pub request_timeout_ms: u64,

    /// Field holding the document id. When unset, inserts are mapped as
    /// articles keyed by `article_id`.
    pub id_field: Option<String>,

    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub max_reopen_attempts: u32,

    pub max_retries: u32,
    pub retry_delay_ms: u64,

    /// Prometheus scrape endpoint (needs the `metrics-export` feature)
    pub metrics_address: Option<SocketAddr>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            source_address: "localhost:27017".to_string(),
            filter: OplogFilter::builder()
                .operation(OperationKind::Insert)
                .namespace("test.articles")
                .build(),
            index_name: "tdid".to_string(),
            doc_type: "article".to_string(),
            logging_mode: LoggingMode::Production,
            log_destination: PathBuf::from("tailer.log"),
            queue_capacity: 10,
            poll_interval_ms: 1000,
            elasticsearch_url: fusilli_destinations::elasticsearch::DEFAULT_URL.to_string(),
            elasticsearch_username: None,
            elasticsearch_password: None,
            request_timeout_ms: 10_000,
            id_field: None,
            initial_backoff_ms: 100,
            max_backoff_ms: 30_000,
            max_reopen_attempts: 5,
            max_retries: 3,
            retry_delay_ms: 100,
            metrics_address: None,
        }
    }
}

impl Settings {
    /// Parses settings from TOML text. Missing keys keep their defaults.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Reads settings from a file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_toml(&text)
    }

    /// Loads the configuration file named on the command line, applies the
    /// flag overrides and validates the result.
    ///
    /// Without `--config`, `fusilli.toml` is read when it exists and the
    /// defaults are used otherwise.
    pub fn load(cli: &Cli) -> Result<Self, ConfigError> {
        let mut settings = match &cli.config {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(DEFAULT_CONFIG_FILE)?
            }
            None => Self::default(),
        };
        settings.apply_overrides(cli);
        settings.validate()?;
        Ok(settings)
    }

    /// Replaces every setting given on the command line.
    pub fn apply_overrides(&mut self, cli: &Cli) {
        macro_rules! set {
            ($($field:ident),* $(,)?) => {
                $(if let Some(value) = &cli.$field {
                    self.$field = value.clone();
                })*
            };
        }
        set!(
            source_address,
            index_name,
            doc_type,
            logging_mode,
            log_destination,
            queue_capacity,
            poll_interval_ms,
            elasticsearch_url,
            request_timeout_ms,
            initial_backoff_ms,
            max_backoff_ms,
            max_reopen_attempts,
            max_retries,
            retry_delay_ms,
        );

        if cli.elasticsearch_username.is_some() {
            self.elasticsearch_username.clone_from(&cli.elasticsearch_username);
        }
        if cli.elasticsearch_password.is_some() {
            self.elasticsearch_password.clone_from(&cli.elasticsearch_password);
        }
        if cli.id_field.is_some() {
            self.id_field.clone_from(&cli.id_field);
        }
        if cli.metrics_address.is_some() {
            self.metrics_address = cli.metrics_address;
        }

        if !cli.op.is_empty() {
            self.filter.operations = cli.op.iter().map(|op| OperationKind::parse(op)).collect();
        }
        if !cli.ns.is_empty() {
            self.filter.namespaces.clone_from(&cli.ns);
        }
    }

    /// Checks every value and the component configurations derived from them.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source_address.trim().is_empty() {
            return Err(ConfigError::invalid("source_address", "cannot be empty"));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::invalid("queue_capacity", "must be greater than 0"));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::invalid("poll_interval_ms", "must be greater than 0"));
        }
        if self.log_destination.as_os_str().is_empty() {
            return Err(ConfigError::invalid("log_destination", "cannot be empty"));
        }
        if self.elasticsearch_password.is_some() && self.elasticsearch_username.is_none() {
            return Err(ConfigError::invalid(
                "elasticsearch_password",
                "requires elasticsearch_username",
            ));
        }
        if let Some(field) = &self.id_field {
            if field.trim().is_empty() {
                return Err(ConfigError::invalid("id_field", "cannot be empty"));
            }
        }

        self.tailer_config()?;
        self.sink_config()?;
        self.elasticsearch_config()?;
        Ok(())
    }

    /// Log file, or `None` for standard error.
    #[must_use]
    pub fn log_file(&self) -> Option<&Path> {
        if self.log_destination.as_os_str() == STDERR_DESTINATION {
            None
        } else {
            Some(&self.log_destination)
        }
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn tailer_config(&self) -> Result<TailerConfig, ConfigError> {
        TailerConfig::builder()
            .initial_backoff_ms(self.initial_backoff_ms)
            .max_backoff_ms(self.max_backoff_ms)
            .max_reopen_attempts(self.max_reopen_attempts)
            .logging_mode(self.logging_mode)
            .build()
            .map_err(|e| ConfigError::invalid("tailer", e.to_string()))
    }

    pub fn sink_config(&self) -> Result<SinkConfig, ConfigError> {
        SinkConfig::builder()
            .index_name(self.index_name.clone())
            .doc_type(self.doc_type.clone())
            .max_retries(self.max_retries)
            .retry_delay(Duration::from_millis(self.retry_delay_ms))
            .build()
            .map_err(|e| ConfigError::invalid("sink", e.to_string()))
    }

    pub fn elasticsearch_config(&self) -> Result<ElasticsearchConfig, ConfigError> {
        let mut builder = ElasticsearchConfig::builder()
            .url(self.elasticsearch_url.clone())
            .request_timeout(Duration::from_millis(self.request_timeout_ms));
        if let Some(username) = &self.elasticsearch_username {
            builder = builder.credentials(
                username.clone(),
                self.elasticsearch_password.clone().unwrap_or_default(),
            );
        }
        builder
            .build()
            .map_err(|message| ConfigError::invalid("elasticsearch_url", message))
    }
}
