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

//! Command-line flags.
//!
//! Every flag can also be set through the `FUSILLI_*` environment variable
//! shown in `--help`; both win over the configuration file.

use clap::Parser;
use fusilli_core::logging::LoggingMode;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Tails a MongoDB oplog and indexes matching documents into Elasticsearch
#[derive(Parser, Debug)]
#[command(name = "fusilli")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to the configuration file [default: fusilli.toml when present]
    #[arg(short, long, env = "FUSILLI_CONFIG")]
    pub config: Option<PathBuf>,

    /// MongoDB address (host:port or connection string)
    #[arg(short = 's', long, env = "FUSILLI_SOURCE_ADDRESS")]
    pub source_address: Option<String>,

    /// Operations to forward (insert, update, delete or raw codes)
    #[arg(long, env = "FUSILLI_OP", value_delimiter = ',')]
    pub op: Vec<String>,

    /// Namespaces to forward (database.collection)
    #[arg(long, env = "FUSILLI_NS", value_delimiter = ',')]
    pub ns: Vec<String>,

    /// Target index name
    #[arg(short, long, env = "FUSILLI_INDEX_NAME")]
    pub index_name: Option<String>,

    /// Document type, empty for the typeless endpoint
    #[arg(long, env = "FUSILLI_DOC_TYPE")]
    pub doc_type: Option<String>,

    /// Logging mode (debug, production)
    #[arg(short, long, env = "FUSILLI_LOGGING_MODE")]
    pub logging_mode: Option<LoggingMode>,

    /// Log file, or - for standard error
    #[arg(long, env = "FUSILLI_LOG_DESTINATION")]
    pub log_destination: Option<PathBuf>,

    /// Capacity of the tailer to sink queue
    #[arg(long, env = "FUSILLI_QUEUE_CAPACITY")]
    pub queue_capacity: Option<usize>,

    /// Cursor await window in milliseconds
    #[arg(long, env = "FUSILLI_POLL_INTERVAL_MS")]
    pub poll_interval_ms: Option<u64>,

    /// Elasticsearch base URL
    #[arg(long, env = "FUSILLI_ELASTICSEARCH_URL")]
    pub elasticsearch_url: Option<String>,

    #[arg(long, env = "FUSILLI_ELASTICSEARCH_USERNAME")]
    pub elasticsearch_username: Option<String>,

    #[arg(long, env = "FUSILLI_ELASTICSEARCH_PASSWORD", hide_env_values = true)]
    pub elasticsearch_password: Option<String>,

    /// Elasticsearch request timeout in milliseconds
    #[arg(long, env = "FUSILLI_REQUEST_TIMEOUT_MS")]
    pub request_timeout_ms: Option<u64>,

    /// Document field used as the index id (generic JSON mapping)
    #[arg(long, env = "FUSILLI_ID_FIELD")]
    pub id_field: Option<String>,

    #[arg(long, env = "FUSILLI_INITIAL_BACKOFF_MS")]
    pub initial_backoff_ms: Option<u64>,

    #[arg(long, env = "FUSILLI_MAX_BACKOFF_MS")]
    pub max_backoff_ms: Option<u64>,

    /// Cursor reopen attempts before giving up, 0 for unlimited
    #[arg(long, env = "FUSILLI_MAX_REOPEN_ATTEMPTS")]
    pub max_reopen_attempts: Option<u32>,

    /// Retries of a failed index write
    #[arg(long, env = "FUSILLI_MAX_RETRIES")]
    pub max_retries: Option<u32>,

    #[arg(long, env = "FUSILLI_RETRY_DELAY_MS")]
    pub retry_delay_ms: Option<u64>,

    /// Prometheus listen address, e.g. 0.0.0.0:9000
    #[arg(long, env = "FUSILLI_METRICS_ADDRESS")]
    pub metrics_address: Option<SocketAddr>,
}
