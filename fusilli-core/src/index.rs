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

//! Search index abstraction.
//!
//! A [`SearchIndex`] stores JSON documents addressed by
//! `(index name, document type, id)`. Writes are upserts: writing the same id
//! twice leaves the second body in place.
//!
//! # Error Handling
//!
//! Implementations classify failures through [`IndexWriteError::is_retryable`]:
//! transport failures, throttling and server errors are retryable; rejected
//! documents are not. The [`IndexingSink`](crate::sink::IndexingSink) retries
//! the former with backoff and reports the latter.
//!
//! # Implementations
//!
//! - [`MemoryIndex`] in this module, for tests.
//! - `ElasticsearchIndex` in the `fusilli-destinations` crate.

use crate::metrics::ErrorCategory;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;

/// Errors raised by index writes.
#[derive(Debug, Error)]
pub enum IndexWriteError {
    /// The index could not be reached.
    ///
    /// Retryable: timeouts, refused connections, DNS failures.
    #[error("Connection error: {message}")]
    Connection {
        /// Human-readable error message
        message: String,
        /// The underlying transport error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The index answered with an error status.
    #[error("Index rejected write ({status}): {message}")]
    Rejected {
        /// HTTP-like status code
        status: u16,
        /// Response body or reason
        message: String,
        /// Whether the same write may succeed later
        retryable: bool,
    },

    /// The document body could not be encoded.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Human-readable error message
        message: String,
        /// The underlying serialization error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Invalid index configuration.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Human-readable error message
        message: String,
    },
}

impl IndexWriteError {
    /// Creates a connection error from any transport error.
    pub fn connection(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Connection {
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a connection error from a message.
    pub fn connection_msg(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a rejection, retryable for 408, 429 and 5xx statuses.
    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        Self::Rejected {
            status,
            message: message.into(),
            retryable: status == 408 || status == 429 || status >= 500,
        }
    }

    /// Creates a serialization error.
    pub fn serialization(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Serialization {
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Returns true if the same write may succeed when retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection { .. } => true,
            Self::Rejected { retryable, .. } => *retryable,
            Self::Serialization { .. } | Self::Configuration { .. } => false,
        }
    }

    /// Metric label for this error.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Connection { .. } => ErrorCategory::Connection,
            Self::Rejected { status: 429, .. } => ErrorCategory::RateLimit,
            Self::Rejected { .. } => ErrorCategory::Rejected,
            Self::Serialization { .. } => ErrorCategory::Serialization,
            Self::Configuration { .. } => ErrorCategory::Unknown,
        }
    }
}

/// Descriptive information about an index backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexMetadata {
    /// Human-readable name
    pub name: String,
    /// Backend type, used as a log field (e.g., "elasticsearch", "memory")
    pub backend: String,
}

impl IndexMetadata {
    /// Creates metadata.
    pub fn new(name: impl Into<String>, backend: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            backend: backend.into(),
        }
    }
}

/// A document store addressed by `(index, doc_type, id)`.
///
/// Implementations must be shareable across tasks.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Inserts or replaces the document `id`.
    ///
    /// `doc_type` may be empty for backends without mapping types.
    /// `body` is serialized JSON.
    ///
    /// # Errors
    ///
    /// Returns an [`IndexWriteError`] classified by retryability.
    async fn upsert(
        &self,
        index: &str,
        doc_type: &str,
        id: &str,
        body: &str,
    ) -> Result<(), IndexWriteError>;

    /// Releases resources held by the backend.
    async fn close(&self) -> Result<(), IndexWriteError> {
        Ok(())
    }

    /// Describes the backend.
    fn metadata(&self) -> IndexMetadata {
        IndexMetadata::new("Unknown", "unknown")
    }
}

type DocumentKey = (String, String, String);

#[derive(Debug, Default)]
struct MemoryIndexFaults {
    failing_ids: HashSet<String>,
    fail_next: usize,
    retryable: bool,
}

/// In-memory [`SearchIndex`] for tests.
///
/// Stores bodies as parsed JSON and supports failure injection per id or
/// for the next N writes.
#[derive(Debug, Default)]
pub struct MemoryIndex {
    documents: Mutex<HashMap<DocumentKey, serde_json::Value>>,
    faults: Mutex<MemoryIndexFaults>,
    attempts: AtomicUsize,
}

impl MemoryIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every write of `id` fail with a non-retryable rejection.
    pub fn reject_id(&self, id: impl Into<String>) {
        self.faults.lock().failing_ids.insert(id.into());
    }

    /// Makes the next `count` writes fail with a 503.
    ///
    /// With `retryable = false` they fail with a 400 instead.
    pub fn fail_next(&self, count: usize, retryable: bool) {
        let mut faults = self.faults.lock();
        faults.fail_next = count;
        faults.retryable = retryable;
    }

    /// Stored body of a document.
    #[must_use]
    pub fn get(&self, index: &str, doc_type: &str, id: &str) -> Option<serde_json::Value> {
        self.documents
            .lock()
            .get(&(index.to_string(), doc_type.to_string(), id.to_string()))
            .cloned()
    }

    /// Number of stored documents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.documents.lock().len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of upsert calls, failed ones included.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    fn injected_failure(&self, id: &str) -> Option<IndexWriteError> {
        let mut faults = self.faults.lock();
        if faults.failing_ids.contains(id) {
            return Some(IndexWriteError::rejected(400, format!("document {id} rejected")));
        }
        if faults.fail_next > 0 {
            faults.fail_next -= 1;
            let status = if faults.retryable { 503 } else { 400 };
            return Some(IndexWriteError::rejected(status, "injected failure"));
        }
        None
    }
}

#[async_trait]
impl SearchIndex for MemoryIndex {
    async fn upsert(
        &self,
        index: &str,
        doc_type: &str,
        id: &str,
        body: &str,
    ) -> Result<(), IndexWriteError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        if let Some(err) = self.injected_failure(id) {
            return Err(err);
        }

        let value: serde_json::Value =
            serde_json::from_str(body).map_err(IndexWriteError::serialization)?;
        self.documents.lock().insert(
            (index.to_string(), doc_type.to_string(), id.to_string()),
            value,
        );
        Ok(())
    }

    fn metadata(&self) -> IndexMetadata {
        IndexMetadata::new("Memory", "memory")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_retryable_classification() {
        assert!(IndexWriteError::connection_msg("refused").is_retryable());
        assert!(IndexWriteError::rejected(503, "unavailable").is_retryable());
        assert!(IndexWriteError::rejected(429, "slow down").is_retryable());
        assert!(!IndexWriteError::rejected(400, "mapper_parsing_exception").is_retryable());
        assert!(!IndexWriteError::configuration("no url").is_retryable());

        assert_eq!(
            IndexWriteError::rejected(429, "x").category(),
            ErrorCategory::RateLimit
        );
    }

    #[tokio::test]
    async fn test_upsert_replaces() {
        let index = MemoryIndex::new();
        index.upsert("tdid", "article", "1", r#"{"v":1}"#).await.unwrap();
        index.upsert("tdid", "article", "1", r#"{"v":2}"#).await.unwrap();

        assert_eq!(index.len(), 1);
        assert_eq!(index.get("tdid", "article", "1"), Some(json!({ "v": 2 })));
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let index = MemoryIndex::new();
        index.reject_id("bad");
        index.fail_next(1, true);

        let err = index.upsert("i", "t", "good", "{}").await.unwrap_err();
        assert!(err.is_retryable());
        index.upsert("i", "t", "good", "{}").await.unwrap();

        let err = index.upsert("i", "t", "bad", "{}").await.unwrap_err();
        assert!(!err.is_retryable());
        assert_eq!(index.attempts(), 3);
    }
}
