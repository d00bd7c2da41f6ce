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

//! Fusilli Destinations - Search Index Implementations
//!
//! This crate provides [`SearchIndex`](fusilli_core::index::SearchIndex)
//! implementations for the indexing sink of the Fusilli pipeline.
//!
//! # Available Indexes
//!
//! - **Elasticsearch**: HTTP index API with optional basic authentication
//!
//! # Features
//!
//! - `elasticsearch` - Elasticsearch index (default)

// Elasticsearch index module (enabled with "elasticsearch" feature)
#[cfg(feature = "elasticsearch")]
pub mod elasticsearch;
