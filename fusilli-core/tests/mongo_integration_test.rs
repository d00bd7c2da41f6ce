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

//! Integration tests against a MongoDB replica set.
//!
//! The oplog only exists on replica set members, so a standalone server is
//! not enough. A single-node set is:
//! ```bash
//! docker run -d -p 27017:27017 mongo:7 --replSet rs0
//! docker exec <container> mongosh --eval 'rs.initiate()'
//! ```
//!
//! To run these tests:
//! ```bash
//! cargo test --package fusilli-core --test mongo_integration_test -- --ignored
//! ```
//!
//! Set `FUSILLI_TEST_MONGODB` to override the default address
//! `localhost:27017/?directConnection=true`.

use bson::{doc, Document};
use fusilli_core::entry::OperationKind;
use fusilli_core::filter::OplogFilter;
use fusilli_core::source::mongo::MongoOplogSource;
use fusilli_core::tailer::{Tailer, TailerConfig, TailerPhase};
use mongodb::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

fn test_address() -> String {
    std::env::var("FUSILLI_TEST_MONGODB")
        .unwrap_or_else(|_| "localhost:27017/?directConnection=true".to_string())
}

async fn create_test_client() -> Result<Client, Box<dyn std::error::Error>> {
    let uri = format!("mongodb://{}", test_address());
    Ok(Client::with_uri_str(&uri).await?)
}

#[tokio::test]
#[ignore] // Remove this to run the test with a real MongoDB replica set
async fn test_tails_inserts_in_order() -> Result<(), Box<dyn std::error::Error>> {
    let client = create_test_client().await?;
    let collection = client
        .database("fusilli_test")
        .collection::<Document>("articles");
    collection.drop().await.ok();

    let tailer = Tailer::builder()
        .source(Arc::new(
            MongoOplogSource::new().with_poll_interval(Duration::from_millis(200)),
        ))
        .address(test_address())
        .filter(
            OplogFilter::builder()
                .operation(OperationKind::Insert)
                .namespace("fusilli_test.articles")
                .build(),
        )
        .config(TailerConfig::default())
        .build()?;

    let (tx, mut rx) = mpsc::channel(10);
    let runner = Arc::clone(&tailer);
    let handle = tokio::spawn(async move { runner.monitor(tx).await });

    // Give the cursor time to open at the end of the log.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(tailer.phase(), TailerPhase::Running);

    for i in 0..5 {
        collection
            .insert_one(doc! { "article_id": format!("a{i}"), "title": "t" })
            .await?;
    }

    for i in 0..5 {
        let entry = timeout(Duration::from_secs(5), rx.recv())
            .await?
            .expect("queue closed early");
        assert!(entry.is_insert());
        assert_eq!(entry.document.get_str("article_id")?, format!("a{i}"));
    }

    tailer.stop();
    let outcome = timeout(Duration::from_secs(5), handle).await???;
    assert!(!outcome.is_failure());
    assert!(rx.recv().await.is_none());

    collection.drop().await.ok();
    Ok(())
}

#[tokio::test]
#[ignore] // Remove this to run the test with a real MongoDB replica set
async fn test_unreachable_server_is_errored() -> Result<(), Box<dyn std::error::Error>> {
    let tailer = Tailer::builder()
        .source(Arc::new(MongoOplogSource::new()))
        .address("localhost:1/?serverSelectionTimeoutMS=500")
        .build()?;

    let (tx, mut rx) = mpsc::channel(1);
    let outcome = tailer.monitor(tx).await?;

    assert!(outcome.is_failure());
    assert!(tailer.has_error());
    assert!(rx.recv().await.is_none());
    Ok(())
}
