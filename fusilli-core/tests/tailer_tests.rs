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

//! Tailer lifecycle tests against the in-memory oplog.
//!
//! These tests verify:
//! - Ordered delivery of matching entries
//! - Stop, reset and terminal phase semantics
//! - Cursor recovery and its limits
//! - Queue closure on every terminal transition

use bson::doc;
use fusilli_core::entry::{OperationKind, OplogEntry};
use fusilli_core::filter::OplogFilter;
use fusilli_core::source::memory::MemoryOplog;
use fusilli_core::source::SourceError;
use fusilli_core::tailer::{Tailer, TailerConfig, TailerError, TailerOutcome, TailerPhase};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

fn fast_config(max_reopen_attempts: u32) -> TailerConfig {
    TailerConfig::builder()
        .initial_backoff_ms(1)
        .max_backoff_ms(5)
        .backoff_jitter(0.0)
        .max_reopen_attempts(max_reopen_attempts)
        .build()
        .unwrap()
}

fn articles_filter() -> OplogFilter {
    OplogFilter::builder()
        .operation(OperationKind::Insert)
        .namespace("test.articles")
        .build()
}

fn build_tailer(oplog: &MemoryOplog, config: TailerConfig) -> Arc<Tailer> {
    Tailer::builder()
        .source(Arc::new(oplog.clone()))
        .address("localhost:27017")
        .filter(articles_filter())
        .config(config)
        .build()
        .unwrap()
}

fn spawn_monitor(
    tailer: &Arc<Tailer>,
    capacity: usize,
) -> (
    JoinHandle<Result<TailerOutcome, TailerError>>,
    mpsc::Receiver<OplogEntry>,
) {
    let (tx, rx) = mpsc::channel(capacity);
    let runner = Arc::clone(tailer);
    let handle = tokio::spawn(async move { runner.monitor(tx).await });
    (handle, rx)
}

async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
}

async fn recv(rx: &mut mpsc::Receiver<OplogEntry>) -> Option<OplogEntry> {
    timeout(WAIT, rx.recv()).await.expect("queue stalled")
}

async fn finish(handle: JoinHandle<Result<TailerOutcome, TailerError>>) -> TailerOutcome {
    timeout(WAIT, handle)
        .await
        .expect("tailer did not halt")
        .unwrap()
        .unwrap()
}

#[tokio::test]
async fn test_delivers_matching_entries_in_order() {
    let oplog = MemoryOplog::new();
    oplog.insert("test.articles", doc! { "article_id": "before-start" });

    let tailer = build_tailer(&oplog, fast_config(5));
    let (handle, mut rx) = spawn_monitor(&tailer, 10);
    wait_until("cursor", || oplog.cursors_opened() == 1).await;
    assert_eq!(tailer.phase(), TailerPhase::Running);

    let mut expected = Vec::new();
    for i in 0..5 {
        expected.push(oplog.insert("test.articles", doc! { "article_id": format!("a{i}") }));
        oplog.insert("test.users", doc! { "name": "ignored" });
        oplog.push(OperationKind::Update, "test.articles", doc! { "$set": { "x": 1 } });
    }

    for want in &expected {
        assert_eq!(recv(&mut rx).await.as_ref(), Some(want));
    }

    tailer.stop();
    let outcome = finish(handle).await;
    assert!(!outcome.is_failure());
    assert!(matches!(outcome.reason(), TailerError::StopRequested));
    assert!(recv(&mut rx).await.is_none());

    assert_eq!(tailer.phase(), TailerPhase::Stopped);
    assert!(!tailer.has_error());
    assert!(tailer.error().is_none());
    assert_eq!(oplog.sessions_closed(), 1);
}

#[tokio::test]
async fn test_stop_with_no_traffic_closes_queue() {
    let oplog = MemoryOplog::new();
    let tailer = build_tailer(&oplog, fast_config(5));
    let (handle, mut rx) = spawn_monitor(&tailer, 10);
    wait_until("cursor", || oplog.cursors_opened() == 1).await;

    tailer.stop();
    assert!(recv(&mut rx).await.is_none());
    assert!(matches!(finish(handle).await, TailerOutcome::Stopped(_)));
    assert!(matches!(
        tailer.halt_reason().as_deref(),
        Some(TailerError::StopRequested)
    ));
}

#[tokio::test]
async fn test_stop_allows_at_most_one_in_flight_delivery() {
    let oplog = MemoryOplog::new();
    let tailer = build_tailer(&oplog, fast_config(5));
    let (handle, mut rx) = spawn_monitor(&tailer, 1);
    wait_until("cursor", || oplog.cursors_opened() == 1).await;

    for i in 0..5 {
        oplog.insert("test.articles", doc! { "article_id": format!("a{i}") });
    }
    // One entry buffered, the next blocked in send.
    wait_until("queue full", || rx.len() == 1).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    tailer.stop();

    let mut drained = 0;
    while recv(&mut rx).await.is_some() {
        drained += 1;
    }
    assert!(drained <= 2, "drained {drained} entries after stop");
    assert!(!finish(handle).await.is_failure());
}

#[tokio::test]
async fn test_connection_failure_is_errored() {
    let oplog = MemoryOplog::new();
    oplog.refuse_connections(true);

    let tailer = build_tailer(&oplog, fast_config(5));
    let (handle, mut rx) = spawn_monitor(&tailer, 10);

    let outcome = finish(handle).await;
    assert!(outcome.is_failure());
    assert!(recv(&mut rx).await.is_none());

    assert_eq!(tailer.phase(), TailerPhase::Errored);
    assert!(tailer.has_error());
    assert!(matches!(
        tailer.error().as_deref(),
        Some(TailerError::Connection(_))
    ));

    // stop has no effect once errored
    tailer.stop();
    assert_eq!(tailer.phase(), TailerPhase::Errored);
}

#[tokio::test]
async fn test_reset_does_not_replay() {
    let oplog = MemoryOplog::new();
    let tailer = build_tailer(&oplog, fast_config(5));

    let (handle, mut rx) = spawn_monitor(&tailer, 10);
    wait_until("first cursor", || oplog.cursors_opened() == 1).await;
    let first = oplog.insert("test.articles", doc! { "article_id": "first" });
    assert_eq!(recv(&mut rx).await, Some(first));
    tailer.stop();
    finish(handle).await;

    // A second run is only possible after reset.
    let (tx, _rx) = mpsc::channel(1);
    assert!(matches!(
        tailer.monitor(tx).await,
        Err(TailerError::InvalidTransition { .. })
    ));

    tailer.reset().unwrap();
    assert_eq!(tailer.phase(), TailerPhase::Ready);
    assert!(tailer.halt_reason().is_none());

    let (handle, mut rx) = spawn_monitor(&tailer, 10);
    wait_until("second cursor", || oplog.cursors_opened() == 2).await;
    let second = oplog.insert("test.articles", doc! { "article_id": "second" });
    assert_eq!(recv(&mut rx).await, Some(second));

    tailer.stop();
    finish(handle).await;
    assert_eq!(oplog.connections(), 2);
}

#[tokio::test]
async fn test_reset_after_error() {
    let oplog = MemoryOplog::new();
    oplog.refuse_connections(true);
    let tailer = build_tailer(&oplog, fast_config(5));

    let (handle, _rx) = spawn_monitor(&tailer, 10);
    assert!(finish(handle).await.is_failure());

    oplog.refuse_connections(false);
    tailer.reset().unwrap();
    assert!(!tailer.has_error());
    assert!(tailer.error().is_none());

    let (handle, _rx) = spawn_monitor(&tailer, 10);
    wait_until("cursor", || oplog.cursors_opened() == 1).await;
    tailer.stop();
    assert!(!finish(handle).await.is_failure());
}

#[tokio::test]
async fn test_exhausted_cursor_is_reopened_without_duplicates() {
    let oplog = MemoryOplog::new();
    let tailer = build_tailer(&oplog, fast_config(3));
    let (handle, mut rx) = spawn_monitor(&tailer, 10);
    wait_until("cursor", || oplog.cursors_opened() == 1).await;

    let first = oplog.insert("test.articles", doc! { "article_id": "a1" });
    assert_eq!(recv(&mut rx).await, Some(first));

    oplog.exhaust_cursors(1);
    wait_until("reopen", || oplog.cursors_opened() == 2).await;

    let second = oplog.insert("test.articles", doc! { "article_id": "a2" });
    assert_eq!(recv(&mut rx).await, Some(second));

    tailer.stop();
    assert!(recv(&mut rx).await.is_none(), "entry delivered twice");
    assert!(!finish(handle).await.is_failure());
}

#[tokio::test]
async fn test_retryable_read_failure_is_recovered() {
    let oplog = MemoryOplog::new();
    let tailer = build_tailer(&oplog, fast_config(3));
    let (handle, mut rx) = spawn_monitor(&tailer, 10);
    wait_until("cursor", || oplog.cursors_opened() == 1).await;

    oplog.fail_next_read(true);
    wait_until("reopen", || oplog.cursors_opened() == 2).await;

    let entry = oplog.insert("test.articles", doc! { "article_id": "a1" });
    assert_eq!(recv(&mut rx).await, Some(entry));
    assert_eq!(tailer.phase(), TailerPhase::Running);

    tailer.stop();
    finish(handle).await;
}

#[tokio::test]
async fn test_isolated_exhaustions_do_not_accumulate() {
    let oplog = MemoryOplog::new();
    let tailer = build_tailer(&oplog, fast_config(2));
    let (handle, mut rx) = spawn_monitor(&tailer, 10);
    wait_until("cursor", || oplog.cursors_opened() == 1).await;

    // Each blip recovers and is followed by idle polls, with no traffic.
    for round in 1..=4 {
        oplog.exhaust_cursors(1);
        wait_until("reopen", || oplog.cursors_opened() == round + 1).await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(tailer.phase(), TailerPhase::Running, "round {round}");
    }
    assert!(!tailer.has_error());

    let entry = oplog.insert("test.articles", doc! { "article_id": "a1" });
    assert_eq!(recv(&mut rx).await, Some(entry));

    tailer.stop();
    assert!(!finish(handle).await.is_failure());
}

#[tokio::test]
async fn test_entries_written_during_backoff_before_first_entry() {
    let oplog = MemoryOplog::new();
    oplog.insert("test.articles", doc! { "article_id": "old" });
    let config = TailerConfig::builder()
        .initial_backoff_ms(50)
        .max_backoff_ms(50)
        .backoff_jitter(0.0)
        .max_reopen_attempts(3)
        .build()
        .unwrap();
    let tailer = build_tailer(&oplog, config);
    let (handle, mut rx) = spawn_monitor(&tailer, 10);
    wait_until("cursor", || oplog.cursors_opened() == 1).await;

    oplog.exhaust_cursors(1);
    tokio::time::sleep(Duration::from_millis(25)).await;
    let written = oplog.insert("test.articles", doc! { "article_id": "a1" });

    wait_until("reopen", || oplog.cursors_opened() == 2).await;
    assert_eq!(recv(&mut rx).await, Some(written));

    tailer.stop();
    assert!(recv(&mut rx).await.is_none(), "entry from before the start was replayed");
    assert!(!finish(handle).await.is_failure());
}

#[tokio::test]
async fn test_reopen_limit_leads_to_errored() {
    let oplog = MemoryOplog::new();
    let tailer = build_tailer(&oplog, fast_config(2));
    let (handle, mut rx) = spawn_monitor(&tailer, 10);
    wait_until("cursor", || oplog.cursors_opened() == 1).await;

    oplog.fail_next_tail(10);
    oplog.exhaust_cursors(1);

    let outcome = finish(handle).await;
    assert!(outcome.is_failure());
    assert!(matches!(
        outcome.reason(),
        TailerError::Cursor(SourceError::Exhausted { attempts: 2 })
    ));
    assert!(recv(&mut rx).await.is_none());
    assert!(tailer.has_error());
    assert_eq!(oplog.sessions_closed(), 1);
}

#[tokio::test]
async fn test_non_retryable_read_failure_is_errored() {
    let oplog = MemoryOplog::new();
    let tailer = build_tailer(&oplog, fast_config(5));
    let (handle, _rx) = spawn_monitor(&tailer, 10);
    wait_until("cursor", || oplog.cursors_opened() == 1).await;

    oplog.fail_next_read(false);

    let outcome = finish(handle).await;
    assert!(matches!(outcome, TailerOutcome::Errored(_)));
    assert!(matches!(
        tailer.error().as_deref(),
        Some(TailerError::Cursor(_))
    ));
    assert_eq!(oplog.cursors_opened(), 1);
}

#[tokio::test]
async fn test_malformed_entry_is_skipped() {
    let oplog = MemoryOplog::new();
    let tailer = build_tailer(&oplog, fast_config(5));
    let (handle, mut rx) = spawn_monitor(&tailer, 10);
    wait_until("cursor", || oplog.cursors_opened() == 1).await;

    oplog.append_raw(doc! { "op": "i", "ns": "test.articles" });
    let entry = oplog.insert("test.articles", doc! { "article_id": "a1" });
    assert_eq!(recv(&mut rx).await, Some(entry));

    tailer.stop();
    assert!(!finish(handle).await.is_failure());
}

#[tokio::test]
async fn test_dropped_consumer_stops_tailer() {
    let oplog = MemoryOplog::new();
    let tailer = build_tailer(&oplog, fast_config(5));
    let (handle, rx) = spawn_monitor(&tailer, 10);
    wait_until("cursor", || oplog.cursors_opened() == 1).await;

    drop(rx);

    let outcome = finish(handle).await;
    assert!(!outcome.is_failure());
    assert!(matches!(outcome.reason(), TailerError::OutputClosed));
    assert_eq!(tailer.phase(), TailerPhase::Stopped);
}

#[tokio::test]
async fn test_configure_source_halts_active_run() {
    let oplog = MemoryOplog::new();
    let tailer = build_tailer(&oplog, fast_config(5));
    let (handle, _rx) = spawn_monitor(&tailer, 10);
    wait_until("cursor", || oplog.cursors_opened() == 1).await;

    tailer.configure_source("replica:27018");

    assert!(!finish(handle).await.is_failure());
    assert_eq!(tailer.address(), "replica:27018");
    assert_eq!(tailer.phase(), TailerPhase::Stopped);
}
