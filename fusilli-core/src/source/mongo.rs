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

//! MongoDB oplog source.
//!
//! Reads `local.oplog.rs` through a tailable await cursor. The server must be
//! a replica set member; standalone servers have no oplog.
//!
//! # Positioning
//!
//! A fresh cursor starts after the newest entry present when it is opened,
//! found with a reverse natural-order `find_one`; that entry's position is
//! the cursor's start position. A reopened cursor starts at the last observed
//! timestamp, or the start position if nothing was read yet (`$gte`), and the
//! tailer discards the boundary entry it already observed.
//!
//! # Example
//!
//! ```rust,no_run
//! use fusilli_core::source::mongo::MongoOplogSource;
//! use fusilli_core::source::OplogSource;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let source = MongoOplogSource::new().with_poll_interval(Duration::from_millis(500));
//! let session = source.connect("localhost:27017").await?;
//! # Ok(())
//! # }
//! ```

use super::{
    CursorEvent, OplogCursor, OplogSession, OplogSource, SourceError, OPLOG_COLLECTION,
    OPLOG_DATABASE,
};
use crate::entry::{LogPosition, OplogEntry};
use crate::filter::OplogFilter;
use async_trait::async_trait;
use bson::{doc, Bson, Document};
use futures::StreamExt;
use mongodb::options::{ClientOptions, CursorType};
use mongodb::{Client, Collection, Cursor};
use std::time::Duration;
use tracing::{debug, info};

/// Default server-side await window for tailable cursors.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Application name reported to the server.
const APP_NAME: &str = "fusilli";

/// Oplog source backed by a MongoDB replica set.
#[derive(Debug, Clone)]
pub struct MongoOplogSource {
    poll_interval: Duration,
}

impl Default for MongoOplogSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MongoOplogSource {
    /// Creates a source with the default poll interval.
    #[must_use]
    pub fn new() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Sets the await window of each cursor poll.
    ///
    /// Stop requests are observed at most one window late.
    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Returns the configured poll interval.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}

/// Turns `host:port` into a connection string; full URIs pass through.
pub fn normalize_address(address: &str) -> String {
    let address = address.trim();
    if address.starts_with("mongodb://") || address.starts_with("mongodb+srv://") {
        address.to_string()
    } else {
        format!("mongodb://{address}")
    }
}

#[async_trait]
impl OplogSource for MongoOplogSource {
    async fn connect(&self, address: &str) -> Result<Box<dyn OplogSession>, SourceError> {
        if address.trim().is_empty() {
            return Err(SourceError::Configuration(
                "source address cannot be empty".to_string(),
            ));
        }

        let uri = normalize_address(address);
        let mut options = ClientOptions::parse(&uri)
            .await
            .map_err(|e| SourceError::Configuration(e.to_string()))?;
        options.app_name = Some(APP_NAME.to_string());

        let client = Client::with_options(options).map_err(SourceError::connection)?;

        // Server selection is lazy; ping so an unreachable server fails here.
        client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(SourceError::connection)?;

        info!(address = %address, "Connected to MongoDB");

        let oplog = client
            .database(OPLOG_DATABASE)
            .collection::<Document>(OPLOG_COLLECTION);

        Ok(Box::new(MongoOplogSession {
            client: Some(client),
            oplog,
            poll_interval: self.poll_interval,
        }))
    }

    fn name(&self) -> &str {
        "mongodb"
    }
}

struct MongoOplogSession {
    client: Option<Client>,
    oplog: Collection<Document>,
    poll_interval: Duration,
}

impl MongoOplogSession {
    async fn newest_position(&self) -> Result<Option<LogPosition>, SourceError> {
        let newest = self
            .oplog
            .find_one(doc! {})
            .sort(doc! { "$natural": -1 })
            .projection(doc! { "ts": 1, "t": 1 })
            .await
            .map_err(SourceError::from_mongo_error)?;

        Ok(newest.as_ref().and_then(LogPosition::from_raw))
    }
}

#[async_trait]
impl OplogSession for MongoOplogSession {
    async fn tail(
        &mut self,
        filter: &OplogFilter,
        after: Option<LogPosition>,
    ) -> Result<Box<dyn OplogCursor>, SourceError> {
        if self.client.is_none() {
            return Err(SourceError::cursor_msg("session is closed", false));
        }

        let mut query = filter.to_document();
        let start = match after {
            Some(position) => {
                query.insert(
                    "ts",
                    doc! { "$gte": Bson::Timestamp(position.timestamp.into()) },
                );
                position
            }
            None => match self.newest_position().await? {
                Some(newest) => {
                    query.insert(
                        "ts",
                        doc! { "$gt": Bson::Timestamp(newest.timestamp.into()) },
                    );
                    newest
                }
                None => LogPosition::ORIGIN,
            },
        };

        debug!(query = %query, "Opening tailable oplog cursor");

        let cursor = self
            .oplog
            .find(query)
            .cursor_type(CursorType::TailableAwait)
            .max_await_time(self.poll_interval)
            .no_cursor_timeout(true)
            .await
            .map_err(SourceError::from_mongo_error)?;

        Ok(Box::new(MongoOplogCursor {
            cursor,
            poll_interval: self.poll_interval,
            start,
        }))
    }

    async fn close(&mut self) {
        if self.client.take().is_some() {
            debug!("MongoDB session closed");
        }
    }
}

struct MongoOplogCursor {
    cursor: Cursor<Document>,
    poll_interval: Duration,
    start: LogPosition,
}

#[async_trait]
impl OplogCursor for MongoOplogCursor {
    async fn next_event(&mut self) -> Result<CursorEvent, SourceError> {
        // Cursor::next is cancel-safe; a timed out poll loses nothing.
        match tokio::time::timeout(self.poll_interval, self.cursor.next()).await {
            Err(_) => Ok(CursorEvent::Idle),
            Ok(None) => Ok(CursorEvent::Exhausted),
            Ok(Some(Err(e))) => Err(SourceError::from_mongo_error(e)),
            Ok(Some(Ok(raw))) => Ok(CursorEvent::Entry(OplogEntry::try_from(raw)?)),
        }
    }

    fn start_position(&self) -> Option<LogPosition> {
        Some(self.start)
    }
}
