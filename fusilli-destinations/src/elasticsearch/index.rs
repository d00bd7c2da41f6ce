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

//! Elasticsearch [`SearchIndex`] implementation.

use super::config::ElasticsearchConfig;
use async_trait::async_trait;
use fusilli_core::index::{IndexMetadata, IndexWriteError, SearchIndex};
use reqwest::{Client, Url};
use tracing::{debug, info};

/// Path segment used when no document type is configured.
const TYPELESS_ENDPOINT: &str = "_doc";

/// Longest response excerpt kept in error messages.
const MAX_ERROR_BODY: usize = 512;

/// Writes documents with the index API: `PUT /{index}/{type}/{id}`.
///
/// With an empty document type the typeless `/{index}/_doc/{id}` endpoint of
/// Elasticsearch 7+ is used. Path segments are percent-encoded, so ids may
/// contain any character.
#[derive(Debug, Clone)]
pub struct ElasticsearchIndex {
    config: ElasticsearchConfig,
    base: Url,
    client: Client,
}

impl ElasticsearchIndex {
    /// Creates an index client.
    ///
    /// No request is sent; connection problems surface on the first write.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the URL cannot be parsed or the HTTP
    /// client cannot be built.
    pub fn new(config: ElasticsearchConfig) -> Result<Self, IndexWriteError> {
        let base = Url::parse(&config.url)
            .map_err(|e| IndexWriteError::configuration(format!("invalid url {}: {e}", config.url)))?;
        if base.cannot_be_a_base() {
            return Err(IndexWriteError::configuration(format!(
                "url cannot be used as a base: {}",
                config.url
            )));
        }

        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| IndexWriteError::configuration(format!("failed to create HTTP client: {e}")))?;

        info!(url = %config.url, "Elasticsearch index client created");

        Ok(Self {
            config,
            base,
            client,
        })
    }

    /// Configuration in use.
    #[must_use]
    pub fn config(&self) -> &ElasticsearchConfig {
        &self.config
    }

    /// Builds the document URL, percent-encoding every segment.
    pub fn document_url(&self, index: &str, doc_type: &str, id: &str) -> Result<Url, IndexWriteError> {
        let mut url = self.base.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|()| {
                IndexWriteError::configuration(format!("url cannot be used as a base: {}", self.base))
            })?;
            segments.pop_if_empty();
            segments.push(index);
            segments.push(if doc_type.is_empty() {
                TYPELESS_ENDPOINT
            } else {
                doc_type
            });
            segments.push(id);
        }
        Ok(url)
    }
}

#[async_trait]
impl SearchIndex for ElasticsearchIndex {
    async fn upsert(
        &self,
        index: &str,
        doc_type: &str,
        id: &str,
        body: &str,
    ) -> Result<(), IndexWriteError> {
        if index.is_empty() {
            return Err(IndexWriteError::configuration("index name cannot be empty"));
        }

        let url = self.document_url(index, doc_type, id)?;
        let mut request = self
            .client
            .put(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body.to_string());

        if let Some(ref username) = self.config.username {
            request = request.basic_auth(username, self.config.password.as_ref());
        }

        let response = request.send().await.map_err(IndexWriteError::connection)?;
        let status = response.status();

        if status.is_success() {
            debug!(index, id, status = status.as_u16(), "Document written");
            return Ok(());
        }

        let mut message = response.text().await.unwrap_or_default();
        if message.len() > MAX_ERROR_BODY {
            let mut cut = MAX_ERROR_BODY;
            while !message.is_char_boundary(cut) {
                cut -= 1;
            }
            message.truncate(cut);
        }

        Err(IndexWriteError::rejected(status.as_u16(), message))
    }

    fn metadata(&self) -> IndexMetadata {
        IndexMetadata::new(format!("Elasticsearch ({})", self.config.url), "elasticsearch")
    }
}
