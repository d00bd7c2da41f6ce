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

//! Elasticsearch search index.
//!
//! Documents are written one at a time through the index API, which replaces
//! any existing document with the same id.
//!
//! # Example
//!
//! ```rust,no_run
//! use fusilli_core::index::SearchIndex;
//! use fusilli_destinations::elasticsearch::{ElasticsearchConfig, ElasticsearchIndex};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ElasticsearchConfig::builder()
//!     .url("http://localhost:9200")
//!     .build()?;
//! let index = ElasticsearchIndex::new(config)?;
//!
//! index
//!     .upsert("tdid", "article", "a1", r#"{"title":"hello"}"#)
//!     .await?;
//! # Ok(())
//! # }
//! ```

mod config;
mod index;

pub use config::{
    ElasticsearchConfig, ElasticsearchConfigBuilder, DEFAULT_REQUEST_TIMEOUT, DEFAULT_URL,
};
pub use index::ElasticsearchIndex;
