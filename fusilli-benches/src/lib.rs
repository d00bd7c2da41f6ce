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

//! Shared fixtures for the Fusilli benchmarks.

use bson::{doc, Document};
use fusilli_core::entry::{LogTimestamp, Namespace, OperationKind, OplogEntry};

/// Namespace the fixtures write to.
pub const BENCH_NAMESPACE: &str = "bench.articles";

/// An article payload with a numeric id.
#[must_use]
pub fn article(i: usize) -> Document {
    doc! {
        "article_id": i as i64,
        "article_title": format!("Article {i}"),
        "article_content": "Lorem ipsum dolor sit amet, consectetur adipiscing elit.",
        "tags": ["pasta", "cdc"],
    }
}

/// `count` entries with ascending positions, every fourth one an update of
/// another namespace.
#[must_use]
pub fn mixed_entries(count: usize) -> Vec<OplogEntry> {
    (0..count)
        .map(|i| {
            let (operation, ns) = if i % 4 == 3 {
                (OperationKind::Update, "bench.users")
            } else {
                (OperationKind::Insert, BENCH_NAMESPACE)
            };
            OplogEntry {
                timestamp: LogTimestamp::new(i as u32 + 1, 1),
                sequence: i as i64,
                history_id: None,
                schema_version: 2,
                operation,
                namespace: Namespace::parse(ns),
                document: article(i),
            }
        })
        .collect()
}

/// Raw oplog documents as read from `local.oplog.rs`.
#[must_use]
pub fn raw_entries(count: usize) -> Vec<Document> {
    mixed_entries(count)
        .iter()
        .map(OplogEntry::to_document)
        .collect()
}
