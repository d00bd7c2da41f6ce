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

//! Metrics instrumentation for Fusilli pipelines.
//!
//! Uses the `metrics` facade; nothing is recorded until an exporter installs
//! a recorder (the CLI installs Prometheus behind the `metrics-export`
//! feature).
//!
//! # Naming Conventions
//!
//! All metrics follow Prometheus naming conventions:
//! - Prefix with application name (fusilli\_)
//! - Include unit suffix (\_seconds, \_total)
//! - Counter metrics end with \_total
//!
//! # Labels
//!
//! - **namespace**: oplog namespace "db.collection" (low cardinality)
//! - **operation**: "insert", "update", "delete" (very low cardinality)
//! - **index**: search index name (very low cardinality)
//! - **error\_type**: [`ErrorCategory`] (fixed set)
//!
//! Never use document ids, positions or error messages as labels.
//!
//! # Examples
//!
//! ```rust
//! use fusilli_core::metrics::{self, ErrorCategory, TailerStatus};
//!
//! metrics::set_tailer_status(TailerStatus::Running);
//! metrics::increment_entries_delivered("test.articles", "insert");
//! metrics::increment_entries_failed("tdid", ErrorCategory::Decode);
//! ```

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::time::Duration;

/// Metric name prefix for all Fusilli metrics.
#[doc(hidden)]
pub const METRIC_PREFIX: &str = "fusilli";

/// Entries handed to the output queue.
///
/// Type: Counter
/// Labels: namespace, operation
#[doc(hidden)]
pub const ENTRIES_DELIVERED_TOTAL: &str = "fusilli_entries_delivered_total";

/// Entries read from the cursor but rejected by the filter.
///
/// Type: Counter
/// Labels: namespace
const ENTRIES_FILTERED_TOTAL: &str = "fusilli_entries_filtered_total";

/// Malformed oplog documents skipped by the tailer.
///
/// Type: Counter
const ENTRIES_MALFORMED_TOTAL: &str = "fusilli_entries_malformed_total";

/// Cursor reopen attempts.
///
/// Type: Counter
/// Labels: reason
const CURSOR_REOPENS_TOTAL: &str = "fusilli_cursor_reopens_total";

/// Current tailer phase.
///
/// Type: Gauge
const TAILER_STATUS: &str = "fusilli_tailer_status";

/// Documents upserted into the index.
///
/// Type: Counter
/// Labels: index
#[doc(hidden)]
pub const DOCUMENTS_INDEXED_TOTAL: &str = "fusilli_documents_indexed_total";

/// Entries the sink could not index.
///
/// Type: Counter
/// Labels: index, error_type
const ENTRIES_FAILED_TOTAL: &str = "fusilli_entries_failed_total";

/// Index write retries.
///
/// Type: Counter
/// Labels: index
const INDEX_RETRIES_TOTAL: &str = "fusilli_index_retries_total";

/// Duration of a single upsert including retries.
///
/// Type: Histogram
/// Labels: index
/// Unit: seconds
#[doc(hidden)]
pub const INDEX_WRITE_DURATION_SECONDS: &str = "fusilli_index_write_duration_seconds";

/// Registers metric descriptions with the installed recorder.
///
/// Call once after installing an exporter.
pub fn init_metrics() {
    describe_counter!(
        ENTRIES_DELIVERED_TOTAL,
        "Total number of oplog entries delivered to the output queue"
    );

    describe_counter!(
        ENTRIES_FILTERED_TOTAL,
        "Total number of oplog entries rejected by the tailer filter"
    );

    describe_counter!(
        ENTRIES_MALFORMED_TOTAL,
        "Total number of malformed oplog documents skipped"
    );

    describe_counter!(
        CURSOR_REOPENS_TOTAL,
        "Total number of oplog cursor reopen attempts"
    );

    describe_gauge!(
        TAILER_STATUS,
        "Current tailer phase: 0=ready, 1=running, 2=stopped, 3=errored"
    );

    describe_counter!(
        DOCUMENTS_INDEXED_TOTAL,
        "Total number of documents successfully upserted into the search index"
    );

    describe_counter!(
        ENTRIES_FAILED_TOTAL,
        "Total number of entries the sink failed to index"
    );

    describe_counter!(
        INDEX_RETRIES_TOTAL,
        "Total number of index write retries"
    );

    describe_histogram!(
        INDEX_WRITE_DURATION_SECONDS,
        metrics::Unit::Seconds,
        "Time taken to upsert one document, including retries"
    );
}

// ============================================================================
// Tailer
// ============================================================================

/// Increments the count of delivered entries.
pub fn increment_entries_delivered(namespace: &str, operation: &str) {
    counter!(ENTRIES_DELIVERED_TOTAL, "namespace" => namespace.to_string(), "operation" => operation.to_string())
        .increment(1);
}

/// Increments the count of entries rejected by the filter.
pub fn increment_entries_filtered(namespace: &str) {
    counter!(ENTRIES_FILTERED_TOTAL, "namespace" => namespace.to_string()).increment(1);
}

/// Increments the count of malformed oplog documents.
pub fn increment_entries_malformed() {
    counter!(ENTRIES_MALFORMED_TOTAL).increment(1);
}

/// Increments the count of cursor reopen attempts.
///
/// `reason` is "exhausted" or an error category.
pub fn increment_cursor_reopens(reason: &str) {
    counter!(CURSOR_REOPENS_TOTAL, "reason" => reason.to_string()).increment(1);
}

/// Sets the tailer phase gauge.
///
/// ```rust
/// use fusilli_core::metrics::{self, TailerStatus};
///
/// metrics::set_tailer_status(TailerStatus::Stopped);
/// ```
pub fn set_tailer_status(status: TailerStatus) {
    gauge!(TAILER_STATUS).set(f64::from(status as u8));
}

// ============================================================================
// Sink
// ============================================================================

/// Increments the count of indexed documents.
pub fn increment_documents_indexed(index: &str) {
    counter!(DOCUMENTS_INDEXED_TOTAL, "index" => index.to_string()).increment(1);
}

/// Increments the count of entries the sink failed to index.
pub fn increment_entries_failed(index: &str, error_category: ErrorCategory) {
    counter!(
        ENTRIES_FAILED_TOTAL,
        "index" => index.to_string(),
        "error_type" => error_category.as_str()
    )
    .increment(1);
}

/// Increments the count of index write retries.
pub fn increment_index_retries(index: &str) {
    counter!(INDEX_RETRIES_TOTAL, "index" => index.to_string()).increment(1);
}

/// Records how long an upsert took, retries included.
pub fn record_index_write_duration(duration: Duration, index: &str) {
    histogram!(INDEX_WRITE_DURATION_SECONDS, "index" => index.to_string())
        .record(duration.as_secs_f64());
}

// ============================================================================
// Labels
// ============================================================================

/// Tailer phase for the `tailer_status` gauge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TailerStatus {
    /// Configured, not running.
    Ready = 0,
    /// Reading the oplog.
    Running = 1,
    /// Halted on request.
    Stopped = 2,
    /// Halted by a failure.
    Errored = 3,
}

/// Error categories for consistent metric labeling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Payload could not be mapped to a document
    Decode,
    /// Transport failure reaching the index
    Connection,
    /// Index rejected the write
    Rejected,
    /// Index throttled the write
    RateLimit,
    /// Document could not be serialized
    Serialization,
    /// Unclassified
    Unknown,
}

impl ErrorCategory {
    /// Returns the error category as a static string for metrics labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Decode => "decode_error",
            Self::Connection => "connection_error",
            Self::Rejected => "rejected_error",
            Self::RateLimit => "rate_limit_error",
            Self::Serialization => "serialization_error",
            Self::Unknown => "unknown_error",
        }
    }
}

/// Times an operation and records the duration when dropped.
///
/// ```rust
/// use fusilli_core::metrics::Timer;
///
/// {
///     let _timer = Timer::new("tdid", |duration, index| {
///         fusilli_core::metrics::record_index_write_duration(duration, index);
///     });
///     // ... operation to time ...
/// }
/// ```
pub struct Timer<F>
where
    F: FnOnce(Duration, &str),
{
    start: std::time::Instant,
    label: String,
    record_fn: Option<F>,
}

impl<F> Timer<F>
where
    F: FnOnce(Duration, &str),
{
    /// Creates a new timer that will record the duration when dropped.
    pub fn new(label: impl Into<String>, record_fn: F) -> Self {
        Self {
            start: std::time::Instant::now(),
            label: label.into(),
            record_fn: Some(record_fn),
        }
    }
}

impl<F> Drop for Timer<F>
where
    F: FnOnce(Duration, &str),
{
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        if let Some(record_fn) = self.record_fn.take() {
            record_fn(duration, &self.label);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_category_labels() {
        assert_eq!(ErrorCategory::Decode.as_str(), "decode_error");
        assert_eq!(ErrorCategory::RateLimit.as_str(), "rate_limit_error");
    }

    #[test]
    fn test_timer_records_on_drop() {
        let recorded = std::cell::Cell::new(None);
        {
            let _timer = Timer::new("tdid", |duration, label| {
                recorded.set(Some((duration, label.to_string())));
            });
        }
        let (_, label) = recorded.take().unwrap();
        assert_eq!(label, "tdid");
    }
}
