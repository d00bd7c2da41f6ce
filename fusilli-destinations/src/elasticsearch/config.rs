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

//! Elasticsearch index configuration.

use std::time::Duration;

/// Default cluster address.
pub const DEFAULT_URL: &str = "http://localhost:9200";

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection settings for an Elasticsearch cluster.
///
/// # Examples
///
/// ```rust
/// use fusilli_destinations::elasticsearch::ElasticsearchConfig;
/// use std::time::Duration;
///
/// let config = ElasticsearchConfig::builder()
///     .url("https://search.internal:9200")
///     .credentials("indexer", "secret")
///     .request_timeout(Duration::from_secs(5))
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ElasticsearchConfig {
    /// Base URL of the cluster, without trailing slash
    pub url: String,

    /// Basic auth user
    pub username: Option<String>,

    /// Basic auth password
    pub password: Option<String>,

    /// Timeout of each HTTP request
    pub request_timeout: Duration,
}

impl std::fmt::Debug for ElasticsearchConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElasticsearchConfig")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl Default for ElasticsearchConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            username: None,
            password: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl ElasticsearchConfig {
    /// Creates a new builder.
    #[must_use]
    pub fn builder() -> ElasticsearchConfigBuilder {
        ElasticsearchConfigBuilder::default()
    }
}

/// Builder for [`ElasticsearchConfig`].
#[derive(Debug, Default)]
pub struct ElasticsearchConfigBuilder {
    url: Option<String>,
    username: Option<String>,
    password: Option<String>,
    request_timeout: Option<Duration>,
}

impl ElasticsearchConfigBuilder {
    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Enables basic authentication.
    #[must_use]
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is not `http` or `https` or the timeout
    /// is zero.
    pub fn build(self) -> Result<ElasticsearchConfig, String> {
        let url = self.url.unwrap_or_else(|| DEFAULT_URL.to_string());
        let url = url.trim().trim_end_matches('/').to_string();

        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(format!("url must start with http:// or https://: {url}"));
        }
        if url.split_once("://").map_or(true, |(_, host)| host.is_empty()) {
            return Err("url has no host".to_string());
        }

        let request_timeout = self.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT);
        if request_timeout.is_zero() {
            return Err("request_timeout must be greater than 0".to_string());
        }

        Ok(ElasticsearchConfig {
            url,
            username: self.username,
            password: self.password,
            request_timeout,
        })
    }
}
