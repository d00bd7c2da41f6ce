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

//! `fusilli` - tails a MongoDB oplog into an Elasticsearch index.
//!
//! # Usage
//!
//! ```bash
//! # Use ./fusilli.toml when present, defaults otherwise
//! fusilli
//!
//! # Override single settings
//! fusilli --source-address mongo-1:27017 --ns shop.orders --id-field order_id
//! FUSILLI_LOGGING_MODE=debug fusilli --log-destination -
//! ```
//!
//! Exit codes: 0 after an intentional stop (Ctrl-C), 1 when the tailer
//! failed, 2 on configuration errors.

mod article;
mod cli;
mod config;

use crate::article::ArticleMapper;
use crate::cli::Cli;
use crate::config::Settings;
use clap::Parser;
use fusilli_core::index::SearchIndex;
use fusilli_core::logging;
use fusilli_core::mapping::{DocumentMapper, JsonMapper};
use fusilli_core::metrics;
use fusilli_core::registry::TailerRegistry;
use fusilli_core::sink::IndexingSink;
use fusilli_core::source::mongo::MongoOplogSource;
use fusilli_core::tailer::{Tailer, TailerOutcome};
use fusilli_destinations::elasticsearch::ElasticsearchIndex;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info};

const EXIT_TAILER_ERROR: u8 = 1;
const EXIT_CONFIG_ERROR: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings = match Settings::load(&cli) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("fusilli: {e}");
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    if let Err(e) = logging::init(settings.log_file(), settings.logging_mode) {
        eprintln!("fusilli: {e}");
        return ExitCode::from(EXIT_CONFIG_ERROR);
    }

    if let Err(e) = init_metrics(&settings) {
        error!(error = %e, "Failed to start metrics exporter");
        return ExitCode::from(EXIT_CONFIG_ERROR);
    }

    let pipeline = match Pipeline::build(&settings) {
        Ok(pipeline) => pipeline,
        Err(message) => {
            error!(error = %message, "Invalid configuration");
            eprintln!("fusilli: {message}");
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    pipeline.run(settings.queue_capacity).await
}

/// Describes the metrics and, with `metrics-export`, serves them to Prometheus.
fn init_metrics(settings: &Settings) -> Result<(), String> {
    metrics::init_metrics();

    let Some(address) = settings.metrics_address else {
        return Ok(());
    };

    #[cfg(feature = "metrics-export")]
    {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(address)
            .install()
            .map_err(|e| e.to_string())?;
        info!(%address, "Prometheus exporter listening");
    }

    #[cfg(not(feature = "metrics-export"))]
    tracing::warn!(
        %address,
        "metrics_address is set but fusilli was built without the metrics-export feature"
    );

    Ok(())
}

/// One tailer feeding one sink.
struct Pipeline {
    registry: Arc<TailerRegistry>,
    tailer: Arc<Tailer>,
    sink: IndexingSink,
}

impl Pipeline {
    fn build(settings: &Settings) -> Result<Self, String> {
        let registry = TailerRegistry::new();

        let source = MongoOplogSource::new().with_poll_interval(settings.poll_interval());
        let tailer = Tailer::builder()
            .source(Arc::new(source))
            .address(settings.source_address.clone())
            .filter(settings.filter.clone())
            .config(settings.tailer_config().map_err(|e| e.to_string())?)
            .registry(&registry)
            .build()
            .map_err(|e| e.to_string())?;
        tailer.assign_identity().map_err(|e| e.to_string())?;

        let es_config = settings
            .elasticsearch_config()
            .map_err(|e| e.to_string())?;
        let index: Arc<dyn SearchIndex> =
            Arc::new(ElasticsearchIndex::new(es_config).map_err(|e| e.to_string())?);

        let mapper: Arc<dyn DocumentMapper> = match &settings.id_field {
            Some(field) => Arc::new(JsonMapper::new(field.clone())),
            None => Arc::new(ArticleMapper::new()),
        };

        let sink_config = settings.sink_config().map_err(|e| e.to_string())?;
        let sink = IndexingSink::new(sink_config, mapper, index);

        Ok(Self {
            registry,
            tailer,
            sink,
        })
    }

    async fn run(self, queue_capacity: usize) -> ExitCode {
        let (tx, rx) = mpsc::channel(queue_capacity);

        info!(
            tailer = %self.tailer.id().map(|id| id.to_string()).unwrap_or_default(),
            address = %self.tailer.address(),
            index = %self.sink.config().index_name,
            "Starting fusilli"
        );

        let monitor = tokio::spawn({
            let tailer = Arc::clone(&self.tailer);
            async move { tailer.monitor(tx).await }
        });

        let interrupt = tokio::spawn({
            let registry = Arc::clone(&self.registry);
            async move {
                if signal::ctrl_c().await.is_ok() {
                    info!("Interrupt received, stopping tailers");
                    registry.stop_all();
                }
            }
        });

        // Returns once the tailer closes the queue.
        let report = self.sink.run(rx).await;
        interrupt.abort();

        info!(
            received = report.received,
            indexed = report.indexed,
            decode_failures = report.decode_failures,
            write_failures = report.write_failures,
            retries = report.retries,
            "Sink finished"
        );

        let code = match monitor.await {
            Ok(Ok(TailerOutcome::Stopped(reason))) => {
                info!(reason = %reason, "Tailer stopped");
                ExitCode::SUCCESS
            }
            Ok(Ok(TailerOutcome::Errored(reason))) => {
                error!(error = %reason, "Tailer failed");
                eprintln!("fusilli: {reason}");
                ExitCode::from(EXIT_TAILER_ERROR)
            }
            Ok(Err(e)) => {
                error!(error = %e, "Tailer could not start");
                ExitCode::from(EXIT_TAILER_ERROR)
            }
            Err(e) => {
                error!(error = %e, "Tailer task failed");
                ExitCode::from(EXIT_TAILER_ERROR)
            }
        };

        self.tailer.remove();
        code
    }
}
