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

//! Oplog sources.
//!
//! A source is split in three layers so the [`Tailer`](crate::tailer::Tailer)
//! can drive connection lifecycle and cursor recovery independently:
//!
//! ```text
//! OplogSource ──connect(address)──► OplogSession ──tail(filter, after)──► OplogCursor
//!                                        │                                    │
//!                                     close()                           next_event()
//! ```
//!
//! - [`mongo::MongoOplogSource`] reads `local.oplog.rs` of a replica set
//!   through a tailable await cursor.
//! - [`memory::MemoryOplog`] is an in-process log for tests, benchmarks and
//!   demos, with fault injection.
//!
//! A cursor never blocks indefinitely: when its await window elapses without
//! new data it yields [`CursorEvent::Idle`], which is the poll boundary at
//! which the tailer observes stop requests.

pub mod memory;
pub mod mongo;

use crate::entry::{EntryDecodeError, LogPosition, OplogEntry};
use crate::filter::OplogFilter;
use async_trait::async_trait;
use mongodb::error::{Error as MongoError, ErrorKind as MongoErrorKind};
use thiserror::Error;

/// Database holding the replica set oplog.
pub const OPLOG_DATABASE: &str = "local";

/// Collection holding the replica set oplog.
pub const OPLOG_COLLECTION: &str = "oplog.rs";

/// Errors raised by oplog sources.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Could not establish a session with the source
    #[error("Connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The cursor failed while reading
    #[error("Cursor error: {message}")]
    Cursor {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        /// MongoDB error code
        code: Option<i32>,
        /// MongoDB error labels (e.g., "RetryableReadError")
        labels: Vec<String>,
    },

    /// The cursor kept closing and could not be reopened
    #[error("Cursor exhausted after {attempts} reopen attempts")]
    Exhausted { attempts: u32 },

    /// A raw oplog document could not be decoded
    #[error("Entry decode error: {0}")]
    Decode(#[from] EntryDecodeError),

    /// Invalid source address or options
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl SourceError {
    /// Wraps an error raised while establishing a session.
    #[must_use]
    pub fn connection(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Connection {
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a connection error from a message.
    #[must_use]
    pub fn connection_msg(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a cursor error from a message, optionally retryable.
    ///
    /// Retryable cursor errors carry the `RetryableReadError` label so they
    /// classify the same way as driver errors.
    #[must_use]
    pub fn cursor_msg(message: impl Into<String>, retryable: bool) -> Self {
        Self::Cursor {
            message: message.into(),
            source: None,
            code: None,
            labels: if retryable {
                vec!["RetryableReadError".to_string()]
            } else {
                Vec::new()
            },
        }
    }

    /// Creates a cursor error from a MongoDB driver error, keeping its code
    /// and labels for classification.
    pub fn from_mongo_error(err: MongoError) -> Self {
        let code = match err.kind.as_ref() {
            MongoErrorKind::Command(cmd_err) => Some(cmd_err.code),
            _ => None,
        };

        let mut labels: Vec<String> = err.labels().iter().cloned().collect();
        if matches!(err.kind.as_ref(), MongoErrorKind::Io(_))
            && !labels.iter().any(|l| l == "NetworkError")
        {
            labels.push("NetworkError".to_string());
        }

        Self::Cursor {
            message: err.to_string(),
            source: Some(Box::new(err)),
            code,
            labels,
        }
    }

    /// Returns true if reopening the cursor may succeed.
    ///
    /// Uses MongoDB error labels and transient error codes:
    /// - Labels: RetryableReadError, NetworkError
    /// - Codes: 6, 7, 43, 89, 91, 189, 10107, 11600, 11602, 13435, 13436
    ///
    /// Decode, configuration and exhaustion errors are never retryable.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Cursor { code, labels, .. } => {
                if labels
                    .iter()
                    .any(|l| l == "RetryableReadError" || l == "NetworkError")
                {
                    return true;
                }

                code.is_some_and(|c| {
                    matches!(
                        c,
                        6 |    // HostUnreachable
                        7 |    // HostNotFound
                        43 |   // CursorNotFound
                        89 |   // NetworkTimeout
                        91 |   // ShutdownInProgress
                        189 |  // PrimarySteppedDown
                        10107 | // NotWritablePrimary
                        11600 | // InterruptedAtShutdown
                        11602 | // InterruptedDueToReplStateChange
                        13435 | // NotPrimaryNoSecondaryOk
                        13436 // NotPrimaryOrSecondary
                    )
                })
            }
            Self::Connection { .. }
            | Self::Exhausted { .. }
            | Self::Decode(_)
            | Self::Configuration(_) => false,
        }
    }

    /// Returns the error category for metrics/logging.
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            Self::Connection { .. } => "connection",
            Self::Cursor { .. } => "cursor",
            Self::Exhausted { .. } => "exhausted",
            Self::Decode(_) => "decode",
            Self::Configuration(_) => "configuration",
        }
    }
}

/// Result of one cursor poll.
#[derive(Debug, Clone, PartialEq)]
pub enum CursorEvent {
    /// The next entry in log order
    Entry(OplogEntry),

    /// The await window elapsed without new entries
    Idle,

    /// The server closed the cursor; it must be reopened to continue
    Exhausted,
}

/// Factory for sessions against an oplog.
#[async_trait]
pub trait OplogSource: Send + Sync {
    /// Establishes a session with the source at `address`.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Connection`] if the source is unreachable or
    /// [`SourceError::Configuration`] if the address is invalid.
    async fn connect(&self, address: &str) -> Result<Box<dyn OplogSession>, SourceError>;

    /// Short name used in logs.
    fn name(&self) -> &str {
        "unknown"
    }
}

/// An established session, able to open cursors over the oplog.
#[async_trait]
pub trait OplogSession: Send {
    /// Opens a tailing cursor restricted by `filter`.
    ///
    /// With `after = None` the cursor starts at the current end of the log and
    /// never returns entries written before the call. With `Some(position)`
    /// it starts at `position`'s timestamp; the entry at `position` itself
    /// may be returned again and is discarded by the tailer.
    ///
    /// The cursor reports where it started through
    /// [`OplogCursor::start_position`].
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Cursor`] if the cursor cannot be opened.
    async fn tail(
        &mut self,
        filter: &OplogFilter,
        after: Option<LogPosition>,
    ) -> Result<Box<dyn OplogCursor>, SourceError>;

    /// Releases the session. Cursors opened from it must not be used afterwards.
    async fn close(&mut self);
}

/// A live, forward-only cursor over the oplog.
#[async_trait]
pub trait OplogCursor: Send {
    /// Waits for the next entry, at most one await window.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Cursor`] on read failure or
    /// [`SourceError::Decode`] if an entry is malformed.
    async fn next_event(&mut self) -> Result<CursorEvent, SourceError>;

    /// Position a replacement cursor can be opened `after` without skipping
    /// anything this cursor would have returned.
    ///
    /// `None` when the source cannot tell.
    fn start_position(&self) -> Option<LogPosition> {
        None
    }
}
