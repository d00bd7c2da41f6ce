//! In-Memory Pipeline Example
//!
//! Runs a tailer and an indexing sink against the in-memory oplog and index,
//! so no MongoDB or Elasticsearch is needed. Handy to watch the log format
//! and the tailer lifecycle.
//!
//! # Running the Example
//!
//! ```bash
//! cargo run --package fusilli-core --example memory_pipeline
//! ```

use bson::doc;
use fusilli_core::entry::OperationKind;
use fusilli_core::filter::OplogFilter;
use fusilli_core::index::MemoryIndex;
use fusilli_core::logging::{self, LoggingMode};
use fusilli_core::mapping::JsonMapper;
use fusilli_core::registry::TailerRegistry;
use fusilli_core::sink::{EntryOutcome, IndexingSink, SinkConfig};
use fusilli_core::source::memory::MemoryOplog;
use fusilli_core::tailer::{Tailer, TailerConfig};
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    logging::init(None, LoggingMode::Debug)?;

    let oplog = MemoryOplog::new();
    let registry = TailerRegistry::new();

    let tailer = Tailer::builder()
        .source(Arc::new(oplog.clone()))
        .address("memory://demo")
        .filter(
            OplogFilter::builder()
                .operation(OperationKind::Insert)
                .namespace("shop.products")
                .build(),
        )
        .config(
            TailerConfig::builder()
                .logging_mode(LoggingMode::Debug)
                .build()?,
        )
        .registry(&registry)
        .build()?;
    let id = tailer.assign_identity()?;
    info!(tailer = %id, "Tailer registered");

    let index = Arc::new(MemoryIndex::new());
    // "bad-sku" is refused by the index to show a per-entry failure
    index.reject_id("bad-sku");

    let (report_tx, mut report_rx) = mpsc::unbounded_channel();
    let sink = IndexingSink::new(
        SinkConfig::builder()
            .index_name("products")
            .doc_type("product")
            .build()?,
        Arc::new(JsonMapper::new("sku")),
        index.clone(),
    )
    .with_reports(report_tx);

    let (tx, rx) = mpsc::channel(10);
    let runner = Arc::clone(&tailer);
    let monitor = tokio::spawn(async move { runner.monitor(tx).await });
    let consumer = tokio::spawn(async move { sink.run(rx).await });

    // Let the cursor open at the current tail before writing.
    tokio::time::sleep(Duration::from_millis(100)).await;

    oplog.insert("shop.products", doc! { "sku": "p-1", "name": "Fusilli", "price": 2.5 });
    oplog.insert("shop.users", doc! { "sku": "ignored", "name": "Not a product" });
    oplog.insert("shop.products", doc! { "sku": "bad-sku", "name": "Rejected" });
    oplog.insert("shop.products", doc! { "name": "No sku" });
    oplog.insert("shop.products", doc! { "sku": "p-2", "name": "Penne", "price": 2.0 });

    for _ in 0..4 {
        let Some(report) = report_rx.recv().await else {
            break;
        };
        match report.outcome {
            EntryOutcome::Indexed { id, .. } => info!(%id, "Indexed"),
            EntryOutcome::DecodeFailed(e) => info!(error = %e, "Skipped"),
            EntryOutcome::WriteFailed { id, error } => info!(%id, %error, "Rejected"),
        }
    }

    tailer.stop();
    let outcome = monitor.await??;
    let totals = consumer.await?;

    info!(
        outcome = %outcome.reason(),
        indexed = totals.indexed,
        failed = totals.decode_failures + totals.write_failures,
        stored = index.len(),
        "Pipeline finished"
    );
    println!("{:#}", index.get("products", "product", "p-1").unwrap_or_default());

    tailer.remove();
    Ok(())
}
