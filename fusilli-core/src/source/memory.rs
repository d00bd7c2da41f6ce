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

//! In-memory oplog for testing and benchmarks.
//!
//! [`MemoryOplog`] behaves like a capped oplog collection: entries are
//! appended in position order and cursors tail them. Entries are stored as
//! raw documents and decoded on read, so fixtures exercise the same decoding
//! path as MongoDB.
//!
//! Faults can be injected to drive recovery paths:
//!
//! - [`MemoryOplog::refuse_connections`] makes `connect` fail
//! - [`MemoryOplog::fail_next_read`] makes the next cursor poll fail
//! - [`MemoryOplog::exhaust_cursors`] makes the next polls report exhaustion
//! - [`MemoryOplog::fail_next_tail`] makes the next cursor opens fail
//!
//! # Example
//!
//! ```rust
//! use fusilli_core::source::memory::MemoryOplog;
//! use std::sync::Arc;
//!
//! let oplog = Arc::new(MemoryOplog::new());
//! oplog.insert("test.articles", bson::doc! { "article_id": "a1" });
//! assert_eq!(oplog.len(), 1);
//! ```

use super::{CursorEvent, OplogCursor, OplogSession, OplogSource, SourceError};
use crate::entry::{LogPosition, LogTimestamp, Namespace, OperationKind, OplogEntry};
use crate::filter::OplogFilter;
use async_trait::async_trait;
use bson::Document;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Default await window of in-memory cursors.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Default)]
struct Faults {
    refuse_connections: AtomicBool,
    pending_read_failure: Mutex<Option<bool>>,
    pending_exhaustions: AtomicUsize,
    pending_tail_failures: AtomicUsize,
}

#[derive(Debug, Default)]
struct Counters {
    connections: AtomicUsize,
    cursors_opened: AtomicUsize,
    sessions_closed: AtomicUsize,
}

#[derive(Debug)]
struct Shared {
    entries: Mutex<Vec<Document>>,
    appended: Notify,
    faults: Faults,
    counters: Counters,
    clock: AtomicU32,
    poll_interval: Duration,
}

/// In-process oplog implementing [`OplogSource`].
///
/// Cheap to clone; clones share the same log.
#[derive(Debug, Clone)]
pub struct MemoryOplog {
    shared: Arc<Shared>,
}

impl Default for MemoryOplog {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryOplog {
    /// Creates an empty log with the default poll interval.
    #[must_use]
    pub fn new() -> Self {
        Self::with_poll_interval(DEFAULT_POLL_INTERVAL)
    }

    /// Creates an empty log whose cursors report `Idle` after `poll_interval`.
    #[must_use]
    pub fn with_poll_interval(poll_interval: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                entries: Mutex::new(Vec::new()),
                appended: Notify::new(),
                faults: Faults::default(),
                counters: Counters::default(),
                clock: AtomicU32::new(0),
                poll_interval,
            }),
        }
    }

    /// Appends an entry and wakes waiting cursors.
    pub fn append(&self, entry: &OplogEntry) {
        self.append_raw(entry.to_document());
    }

    /// Appends a raw document, which may be malformed.
    pub fn append_raw(&self, raw: Document) {
        self.shared.entries.lock().push(raw);
        self.shared.appended.notify_waiters();
    }

    /// Appends an entry at the next timestamp and returns it.
    pub fn push(&self, operation: OperationKind, ns: &str, document: Document) -> OplogEntry {
        let tick = self.shared.clock.fetch_add(1, Ordering::SeqCst) + 1;
        let entry = OplogEntry {
            timestamp: LogTimestamp::new(tick, 1),
            sequence: 1,
            history_id: None,
            schema_version: 2,
            operation,
            namespace: Namespace::parse(ns),
            document,
        };
        self.append(&entry);
        entry
    }

    /// Appends an insert at the next timestamp.
    pub fn insert(&self, ns: &str, document: Document) -> OplogEntry {
        self.push(OperationKind::Insert, ns, document)
    }

    /// Number of entries in the log.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.entries.lock().len()
    }

    /// Returns true if the log is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Makes `connect` fail while set.
    pub fn refuse_connections(&self, refuse: bool) {
        self.shared
            .faults
            .refuse_connections
            .store(refuse, Ordering::SeqCst);
    }

    /// Makes the next cursor poll fail once.
    pub fn fail_next_read(&self, retryable: bool) {
        *self.shared.faults.pending_read_failure.lock() = Some(retryable);
    }

    /// Makes the next `count` cursor polls report exhaustion.
    pub fn exhaust_cursors(&self, count: usize) {
        self.shared
            .faults
            .pending_exhaustions
            .store(count, Ordering::SeqCst);
    }

    /// Makes the next `count` cursor opens fail with a retryable error.
    pub fn fail_next_tail(&self, count: usize) {
        self.shared
            .faults
            .pending_tail_failures
            .store(count, Ordering::SeqCst);
    }

    /// Number of successful connections.
    #[must_use]
    pub fn connections(&self) -> usize {
        self.shared.counters.connections.load(Ordering::SeqCst)
    }

    /// Number of cursors opened, including reopens.
    #[must_use]
    pub fn cursors_opened(&self) -> usize {
        self.shared.counters.cursors_opened.load(Ordering::SeqCst)
    }

    /// Number of sessions released with `close`.
    #[must_use]
    pub fn sessions_closed(&self) -> usize {
        self.shared.counters.sessions_closed.load(Ordering::SeqCst)
    }
}

/// Decrements `counter` if positive; returns whether it did.
fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl OplogSource for MemoryOplog {
    async fn connect(&self, address: &str) -> Result<Box<dyn OplogSession>, SourceError> {
        if self.shared.faults.refuse_connections.load(Ordering::SeqCst) {
            return Err(SourceError::connection_msg(format!(
                "connection refused: {address}"
            )));
        }

        self.shared
            .counters
            .connections
            .fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(MemorySession {
            shared: Arc::clone(&self.shared),
            closed: false,
        }))
    }

    fn name(&self) -> &str {
        "memory"
    }
}

struct MemorySession {
    shared: Arc<Shared>,
    closed: bool,
}

#[async_trait]
impl OplogSession for MemorySession {
    async fn tail(
        &mut self,
        filter: &OplogFilter,
        after: Option<LogPosition>,
    ) -> Result<Box<dyn OplogCursor>, SourceError> {
        if self.closed {
            return Err(SourceError::cursor_msg("session is closed", false));
        }
        if take_one(&self.shared.faults.pending_tail_failures) {
            return Err(SourceError::cursor_msg("injected cursor open failure", true));
        }

        let entries = self.shared.entries.lock();
        let next_index = match after {
            None => entries.len(),
            // Same lower bound as the MongoDB query: ts >= after.timestamp.
            Some(position) => entries
                .iter()
                .position(|raw| {
                    raw.get_timestamp("ts")
                        .map(|ts| LogTimestamp::from(ts) >= position.timestamp)
                        .unwrap_or(true)
                })
                .unwrap_or(entries.len()),
        };
        let start = match after {
            Some(position) => position,
            None => entries
                .iter()
                .rev()
                .find_map(LogPosition::from_raw)
                .unwrap_or(LogPosition::ORIGIN),
        };
        drop(entries);

        self.shared
            .counters
            .cursors_opened
            .fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(MemoryCursor {
            shared: Arc::clone(&self.shared),
            filter: filter.clone(),
            next_index,
            start,
        }))
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.shared
                .counters
                .sessions_closed
                .fetch_add(1, Ordering::SeqCst);
        }
    }
}

struct MemoryCursor {
    shared: Arc<Shared>,
    filter: OplogFilter,
    next_index: usize,
    start: LogPosition,
}

#[async_trait]
impl OplogCursor for MemoryCursor {
    async fn next_event(&mut self) -> Result<CursorEvent, SourceError> {
        if let Some(retryable) = self.shared.faults.pending_read_failure.lock().take() {
            return Err(SourceError::cursor_msg("injected read failure", retryable));
        }
        if take_one(&self.shared.faults.pending_exhaustions) {
            return Ok(CursorEvent::Exhausted);
        }

        let deadline = tokio::time::Instant::now() + self.shared.poll_interval;
        loop {
            // Register before checking so an append in between is not missed.
            let appended = self.shared.appended.notified();

            let next = self.shared.entries.lock().get(self.next_index).cloned();
            if let Some(raw) = next {
                self.next_index += 1;
                let entry = OplogEntry::try_from(raw)?;
                if self.filter.matches(&entry) {
                    return Ok(CursorEvent::Entry(entry));
                }
                continue;
            }

            if tokio::time::timeout_at(deadline, appended).await.is_err() {
                return Ok(CursorEvent::Idle);
            }
        }
    }

    fn start_position(&self) -> Option<LogPosition> {
        Some(self.start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    async fn open(oplog: &MemoryOplog) -> (Box<dyn OplogSession>, Box<dyn OplogCursor>) {
        let mut session = oplog.connect("memory").await.unwrap();
        let cursor = session.tail(&OplogFilter::any(), None).await.unwrap();
        (session, cursor)
    }

    #[tokio::test]
    async fn test_tail_starts_at_end() {
        let oplog = MemoryOplog::new();
        oplog.insert("test.articles", doc! { "n": 1 });

        let (_session, mut cursor) = open(&oplog).await;
        assert_eq!(cursor.next_event().await.unwrap(), CursorEvent::Idle);

        let second = oplog.insert("test.articles", doc! { "n": 2 });
        assert_eq!(
            cursor.next_event().await.unwrap(),
            CursorEvent::Entry(second)
        );
    }

    #[tokio::test]
    async fn test_start_position() {
        let oplog = MemoryOplog::new();
        let (_session, cursor) = open(&oplog).await;
        assert_eq!(cursor.start_position(), Some(LogPosition::ORIGIN));

        let first = oplog.insert("test.articles", doc! { "n": 1 });
        let (mut session, cursor) = open(&oplog).await;
        assert_eq!(cursor.start_position(), Some(first.position()));

        // Reopening from the start position returns the boundary entry again,
        // then everything appended since.
        let second = oplog.insert("test.articles", doc! { "n": 2 });
        let mut reopened = session
            .tail(&OplogFilter::any(), cursor.start_position())
            .await
            .unwrap();
        assert_eq!(reopened.next_event().await.unwrap(), CursorEvent::Entry(first));
        assert_eq!(reopened.next_event().await.unwrap(), CursorEvent::Entry(second));
    }

    #[tokio::test]
    async fn test_waiting_cursor_wakes_on_append() {
        let oplog = MemoryOplog::with_poll_interval(Duration::from_secs(5));
        let (_session, mut cursor) = open(&oplog).await;

        let writer = oplog.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            writer.insert("test.articles", doc! { "n": 1 });
        });

        let event = tokio::time::timeout(Duration::from_secs(2), cursor.next_event())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, CursorEvent::Entry(_)));
    }

    #[tokio::test]
    async fn test_tail_after_position() {
        let oplog = MemoryOplog::new();
        let first = oplog.insert("test.articles", doc! { "n": 1 });
        let second = oplog.insert("test.articles", doc! { "n": 2 });

        let mut session = oplog.connect("memory").await.unwrap();
        let mut cursor = session
            .tail(&OplogFilter::any(), Some(first.position()))
            .await
            .unwrap();

        assert_eq!(cursor.next_event().await.unwrap(), CursorEvent::Entry(first));
        assert_eq!(cursor.next_event().await.unwrap(), CursorEvent::Entry(second));
    }

    #[tokio::test]
    async fn test_cursor_applies_filter() {
        let oplog = MemoryOplog::new();
        let mut session = oplog.connect("memory").await.unwrap();
        let filter = OplogFilter::builder().namespace("test.articles").build();
        let mut cursor = session.tail(&filter, None).await.unwrap();

        oplog.insert("test.users", doc! {});
        let wanted = oplog.insert("test.articles", doc! {});

        assert_eq!(cursor.next_event().await.unwrap(), CursorEvent::Entry(wanted));
    }

    #[tokio::test]
    async fn test_injected_faults() {
        let oplog = MemoryOplog::new();

        oplog.refuse_connections(true);
        assert!(oplog.connect("memory").await.is_err());
        oplog.refuse_connections(false);

        let (mut session, mut cursor) = open(&oplog).await;

        oplog.fail_next_read(true);
        let err = cursor.next_event().await.unwrap_err();
        assert!(err.is_retryable());

        oplog.exhaust_cursors(1);
        assert_eq!(cursor.next_event().await.unwrap(), CursorEvent::Exhausted);

        oplog.fail_next_tail(1);
        assert!(session.tail(&OplogFilter::any(), None).await.is_err());
        assert!(session.tail(&OplogFilter::any(), None).await.is_ok());

        session.close().await;
        assert_eq!(oplog.sessions_closed(), 1);
        assert_eq!(oplog.connections(), 1);
    }

    #[tokio::test]
    async fn test_malformed_entry_is_decode_error() {
        let oplog = MemoryOplog::new();
        let (_session, mut cursor) = open(&oplog).await;

        oplog.append_raw(doc! { "op": "i" });
        let err = cursor.next_event().await.unwrap_err();
        assert_eq!(err.category(), "decode");
    }
}
