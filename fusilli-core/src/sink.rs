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

//! Indexing sink.
//!
//! The [`IndexingSink`] drains the tailer's output queue and upserts each
//! entry into a [`SearchIndex`]:
//!
//! ```text
//! mpsc::Receiver<OplogEntry> ──► DocumentMapper::decode ──► SearchIndex::upsert
//!                                       │                          │
//!                                       └────── EntryReport ◄──────┘
//! ```
//!
//! Entries are processed one at a time, in queue order. A failed entry never
//! stops the sink: decode failures are reported immediately, retryable write
//! failures are retried with exponential backoff up to
//! [`SinkConfig::max_retries`], and whatever still fails is reported and
//! skipped. The sink ends when the queue is closed and drained.

use crate::entry::{LogPosition, Namespace, OperationKind, OplogEntry};
use crate::index::{IndexWriteError, SearchIndex};
use crate::mapping::{DecodeError, DocumentMapper};
use crate::metrics::{self, ErrorCategory, Timer};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Errors raised when building a sink.
#[derive(Debug, Error)]
pub enum SinkError {
    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Where and how the sink writes.
#[derive(Debug, Clone)]
pub struct SinkConfig {
    /// Target index name
    pub index_name: String,

    /// Document type; empty for typeless backends
    pub doc_type: String,

    /// Retries of a retryable write before giving up
    pub max_retries: u32,

    /// Delay before the first retry
    pub retry_delay: Duration,

    /// Upper bound of the retry delay
    pub max_retry_delay: Duration,
}

impl SinkConfig {
    /// Creates a new builder.
    #[must_use]
    pub fn builder() -> SinkConfigBuilder {
        SinkConfigBuilder::default()
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), SinkError> {
        if self.index_name.trim().is_empty() {
            return Err(SinkError::Configuration(
                "index_name cannot be empty".to_string(),
            ));
        }

        if self.retry_delay > self.max_retry_delay {
            return Err(SinkError::Configuration(format!(
                "retry_delay ({:?}) must be <= max_retry_delay ({:?})",
                self.retry_delay, self.max_retry_delay
            )));
        }

        Ok(())
    }
}

/// Builder for [`SinkConfig`].
#[derive(Debug, Default)]
pub struct SinkConfigBuilder {
    index_name: Option<String>,
    doc_type: Option<String>,
    max_retries: Option<u32>,
    retry_delay: Option<Duration>,
    max_retry_delay: Option<Duration>,
}

impl SinkConfigBuilder {
    /// Sets the target index. Required.
    #[must_use]
    pub fn index_name(mut self, name: impl Into<String>) -> Self {
        self.index_name = Some(name.into());
        self
    }

    /// Sets the document type.
    #[must_use]
    pub fn doc_type(mut self, doc_type: impl Into<String>) -> Self {
        self.doc_type = Some(doc_type.into());
        self
    }

    /// Sets the retry limit for retryable writes.
    #[must_use]
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    /// Sets the delay before the first retry.
    #[must_use]
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    /// Sets the retry delay cap.
    #[must_use]
    pub fn max_retry_delay(mut self, delay: Duration) -> Self {
        self.max_retry_delay = Some(delay);
        self
    }

    /// Builds and validates the configuration.
    pub fn build(self) -> Result<SinkConfig, SinkError> {
        let config = SinkConfig {
            index_name: self
                .index_name
                .ok_or_else(|| SinkError::Configuration("index_name is required".to_string()))?,
            doc_type: self.doc_type.unwrap_or_default(),
            max_retries: self.max_retries.unwrap_or(3),
            retry_delay: self.retry_delay.unwrap_or(Duration::from_millis(100)),
            max_retry_delay: self.max_retry_delay.unwrap_or(Duration::from_secs(5)),
        };

        config.validate()?;
        Ok(config)
    }
}

/// What happened to one entry.
#[derive(Debug)]
pub enum EntryOutcome {
    /// Upserted under `id`
    Indexed {
        /// Document id
        id: String,
        /// Retries needed
        retries: u32,
    },
    /// The payload could not be mapped
    DecodeFailed(DecodeError),
    /// The write failed for good
    WriteFailed {
        /// Document id
        id: String,
        /// Last write error
        error: IndexWriteError,
    },
}

impl EntryOutcome {
    /// Returns true if the document was indexed.
    #[must_use]
    pub fn is_indexed(&self) -> bool {
        matches!(self, Self::Indexed { .. })
    }
}

/// Per-entry report sent to the optional report channel.
#[derive(Debug)]
pub struct EntryReport {
    /// Position of the entry in the log
    pub position: LogPosition,
    /// Namespace of the entry
    pub namespace: Namespace,
    /// Operation of the entry
    pub operation: OperationKind,
    /// Result
    pub outcome: EntryOutcome,
}

/// Totals of one sink run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkReport {
    /// Entries taken from the queue
    pub received: u64,
    /// Documents upserted
    pub indexed: u64,
    /// Entries whose payload could not be mapped
    pub decode_failures: u64,
    /// Entries whose write failed for good
    pub write_failures: u64,
    /// Write retries across all entries
    pub retries: u64,
}

impl SinkReport {
    fn record(&mut self, outcome: &EntryOutcome) {
        self.received += 1;
        match outcome {
            EntryOutcome::Indexed { retries, .. } => {
                self.indexed += 1;
                self.retries += u64::from(*retries);
            }
            EntryOutcome::DecodeFailed(_) => self.decode_failures += 1,
            EntryOutcome::WriteFailed { .. } => self.write_failures += 1,
        }
    }
}

/// Consumes oplog entries and upserts them into a search index.
pub struct IndexingSink {
    config: SinkConfig,
    mapper: Arc<dyn DocumentMapper>,
    index: Arc<dyn SearchIndex>,
    reports: Option<mpsc::UnboundedSender<EntryReport>>,
}

impl std::fmt::Debug for IndexingSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexingSink")
            .field("config", &self.config)
            .field("mapper", &self.mapper.name())
            .field("index", &self.index.metadata())
            .finish_non_exhaustive()
    }
}

impl IndexingSink {
    /// Creates a sink.
    pub fn new(
        config: SinkConfig,
        mapper: Arc<dyn DocumentMapper>,
        index: Arc<dyn SearchIndex>,
    ) -> Self {
        Self {
            config,
            mapper,
            index,
            reports: None,
        }
    }

    /// Sends an [`EntryReport`] for every processed entry to `reports`.
    #[must_use]
    pub fn with_reports(mut self, reports: mpsc::UnboundedSender<EntryReport>) -> Self {
        self.reports = Some(reports);
        self
    }

    /// The sink configuration.
    #[must_use]
    pub fn config(&self) -> &SinkConfig {
        &self.config
    }

    /// Processes entries until `input` is closed and drained.
    pub async fn run(&self, mut input: mpsc::Receiver<OplogEntry>) -> SinkReport {
        let mut totals = SinkReport::default();
        let backend = self.index.metadata().backend;

        info!(
            index = %self.config.index_name,
            doc_type = %self.config.doc_type,
            backend = %backend,
            mapper = self.mapper.name(),
            "Indexing sink started"
        );

        while let Some(entry) = input.recv().await {
            let report = self.process(entry).await;
            totals.record(&report.outcome);

            if let Some(reports) = &self.reports {
                reports.send(report).ok();
            }
        }

        info!(
            received = totals.received,
            indexed = totals.indexed,
            decode_failures = totals.decode_failures,
            write_failures = totals.write_failures,
            retries = totals.retries,
            "Input queue closed, indexing sink finished"
        );

        if let Err(e) = self.index.close().await {
            warn!(error = %e, "Failed to close search index");
        }

        totals
    }

    /// Maps and upserts one entry.
    pub async fn process(&self, entry: OplogEntry) -> EntryReport {
        let position = entry.position();
        let outcome = match self.mapper.decode(&entry) {
            Ok(mapped) => match serde_json::to_string(&mapped.body) {
                Ok(body) => match self.upsert_with_retry(&mapped.id, &body).await {
                    Ok(retries) => {
                        metrics::increment_documents_indexed(&self.config.index_name);
                        debug!(id = %mapped.id, position = %position, "Document indexed");
                        EntryOutcome::Indexed {
                            id: mapped.id,
                            retries,
                        }
                    }
                    Err(error) => {
                        metrics::increment_entries_failed(&self.config.index_name, error.category());
                        error!(id = %mapped.id, position = %position, error = %error, "Failed to index document");
                        EntryOutcome::WriteFailed {
                            id: mapped.id,
                            error,
                        }
                    }
                },
                Err(e) => {
                    metrics::increment_entries_failed(
                        &self.config.index_name,
                        ErrorCategory::Serialization,
                    );
                    error!(id = %mapped.id, position = %position, error = %e, "Failed to serialize document");
                    EntryOutcome::WriteFailed {
                        id: mapped.id,
                        error: IndexWriteError::serialization(e),
                    }
                }
            },
            Err(e) => {
                metrics::increment_entries_failed(&self.config.index_name, ErrorCategory::Decode);
                warn!(
                    position = %position,
                    ns = %entry.namespace,
                    op = %entry.operation,
                    error = %e,
                    "Failed to decode oplog payload"
                );
                EntryOutcome::DecodeFailed(e)
            }
        };

        EntryReport {
            position,
            namespace: entry.namespace,
            operation: entry.operation,
            outcome,
        }
    }

    /// Upserts with exponential backoff; returns the number of retries used.
    async fn upsert_with_retry(&self, id: &str, body: &str) -> Result<u32, IndexWriteError> {
        let index_name = self.config.index_name.as_str();
        let _timer = Timer::new(index_name, |duration, index| {
            metrics::record_index_write_duration(duration, index);
        });

        let mut retry_delay = self.config.retry_delay;
        let mut attempt: u32 = 0;

        loop {
            match self
                .index
                .upsert(index_name, &self.config.doc_type, id, body)
                .await
            {
                Ok(()) => {
                    if attempt > 0 {
                        info!(id, attempts = attempt + 1, "Write succeeded after retries");
                    }
                    return Ok(attempt);
                }
                Err(e) => {
                    if !e.is_retryable() {
                        return Err(e);
                    }

                    attempt += 1;
                    if attempt > self.config.max_retries {
                        error!(id, attempts = attempt, error = %e, "Write failed after max retries");
                        return Err(e);
                    }

                    warn!(
                        id,
                        attempt,
                        max_retries = self.config.max_retries,
                        retry_delay_ms = retry_delay.as_millis() as u64,
                        error = %e,
                        "Write failed, retrying"
                    );
                    metrics::increment_index_retries(index_name);

                    tokio::time::sleep(retry_delay).await;
                    retry_delay = std::cmp::min(retry_delay * 2, self.config.max_retry_delay);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::LogTimestamp;
    use crate::index::MemoryIndex;
    use crate::mapping::JsonMapper;
    use bson::{doc, Document};

    fn entry(tick: u32, document: Document) -> OplogEntry {
        OplogEntry {
            timestamp: LogTimestamp::new(tick, 1),
            sequence: 1,
            history_id: None,
            schema_version: 2,
            operation: OperationKind::Insert,
            namespace: Namespace::parse("test.articles"),
            document,
        }
    }

    fn sink(index: &Arc<MemoryIndex>, max_retries: u32) -> IndexingSink {
        let config = SinkConfig::builder()
            .index_name("tdid")
            .doc_type("article")
            .max_retries(max_retries)
            .retry_delay(Duration::from_millis(1))
            .max_retry_delay(Duration::from_millis(4))
            .build()
            .unwrap();
        IndexingSink::new(config, Arc::new(JsonMapper::new("article_id")), index.clone())
    }

    #[test]
    fn test_config_validation() {
        assert!(SinkConfig::builder().build().is_err());
        assert!(SinkConfig::builder().index_name(" ").build().is_err());
        assert!(SinkConfig::builder()
            .index_name("tdid")
            .retry_delay(Duration::from_secs(10))
            .max_retry_delay(Duration::from_secs(1))
            .build()
            .is_err());

        let config = SinkConfig::builder().index_name("tdid").build().unwrap();
        assert_eq!(config.max_retries, 3);
        assert!(config.doc_type.is_empty());
    }

    #[tokio::test]
    async fn test_process_indexes_document() {
        let index = Arc::new(MemoryIndex::new());
        let report = sink(&index, 0)
            .process(entry(1, doc! { "article_id": "a1", "title": "Hello" }))
            .await;

        assert!(report.outcome.is_indexed());
        assert_eq!(
            index.get("tdid", "article", "a1"),
            Some(serde_json::json!({ "article_id": "a1", "title": "Hello" }))
        );
    }

    #[tokio::test]
    async fn test_retryable_failure_is_retried() {
        let index = Arc::new(MemoryIndex::new());
        index.fail_next(2, true);

        let report = sink(&index, 3)
            .process(entry(1, doc! { "article_id": "a1" }))
            .await;

        assert!(matches!(report.outcome, EntryOutcome::Indexed { retries: 2, .. }));
        assert_eq!(index.attempts(), 3);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let index = Arc::new(MemoryIndex::new());
        index.fail_next(10, true);

        let report = sink(&index, 2)
            .process(entry(1, doc! { "article_id": "a1" }))
            .await;

        assert!(matches!(report.outcome, EntryOutcome::WriteFailed { .. }));
        assert_eq!(index.attempts(), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_failure_is_not_retried() {
        let index = Arc::new(MemoryIndex::new());
        index.reject_id("a1");

        let report = sink(&index, 3)
            .process(entry(1, doc! { "article_id": "a1" }))
            .await;

        assert!(matches!(report.outcome, EntryOutcome::WriteFailed { .. }));
        assert_eq!(index.attempts(), 1);
    }

    #[tokio::test]
    async fn test_empty_id_is_decode_failure() {
        let index = Arc::new(MemoryIndex::new());
        let report = sink(&index, 3)
            .process(entry(1, doc! { "article_id": "", "title": "x" }))
            .await;

        assert!(matches!(
            report.outcome,
            EntryOutcome::DecodeFailed(DecodeError::MissingId(_))
        ));
        assert_eq!(index.attempts(), 0);
    }

    #[tokio::test]
    async fn test_run_continues_past_failures() {
        let index = Arc::new(MemoryIndex::new());
        index.reject_id("bad");

        let (tx, rx) = mpsc::channel(10);
        let (report_tx, mut report_rx) = mpsc::unbounded_channel();
        let sink = sink(&index, 0).with_reports(report_tx);

        tx.send(entry(1, doc! { "article_id": "a1" })).await.unwrap();
        tx.send(entry(2, doc! { "title": "no id" })).await.unwrap();
        tx.send(entry(3, doc! { "article_id": "bad" })).await.unwrap();
        tx.send(entry(4, doc! { "article_id": "a4" })).await.unwrap();
        drop(tx);

        let totals = sink.run(rx).await;
        assert_eq!(
            totals,
            SinkReport {
                received: 4,
                indexed: 2,
                decode_failures: 1,
                write_failures: 1,
                retries: 0,
            }
        );
        assert_eq!(index.len(), 2);

        let mut positions = Vec::new();
        while let Ok(report) = report_rx.try_recv() {
            positions.push(report.position.timestamp.time);
        }
        assert_eq!(positions, vec![1, 2, 3, 4]);
    }
}
