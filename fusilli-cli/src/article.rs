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

//! Article documents of the reference deployment.

use fusilli_core::mapping::{IndexDocument, TypedMapper};
use serde::{Deserialize, Serialize};

/// A row of `test.articles`, indexed under its numeric `article_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub article_id: i64,
    #[serde(default)]
    pub article_title: String,
    #[serde(default)]
    pub article_content: String,
    #[serde(default)]
    pub creation_date: String,
    #[serde(default)]
    pub last_update: String,
    #[serde(default)]
    pub author_id: i64,
    #[serde(default)]
    pub last_update_id: i64,
    #[serde(default)]
    pub author_name: String,
    #[serde(default)]
    pub last_update_name: String,
}

impl IndexDocument for Article {
    fn document_id(&self) -> String {
        self.article_id.to_string()
    }
}

/// Maps oplog payloads to [`Article`] documents.
pub type ArticleMapper = TypedMapper<Article>;

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use fusilli_core::entry::{LogTimestamp, Namespace, OperationKind, OplogEntry};
    use fusilli_core::mapping::{DecodeError, DocumentMapper};
    use serde_json::json;

    fn insert(document: bson::Document) -> OplogEntry {
        OplogEntry {
            timestamp: LogTimestamp::new(1, 1),
            sequence: 1,
            history_id: None,
            schema_version: 2,
            operation: OperationKind::Insert,
            namespace: Namespace::parse("test.articles"),
            document,
        }
    }

    #[test]
    fn test_maps_article() {
        let mapped = ArticleMapper::new()
            .decode(&insert(doc! {
                "_id": bson::oid::ObjectId::new(),
                "article_id": 42,
                "article_title": "Fusilli",
                "article_content": "Spiral pasta",
                "creation_date": "2024-03-01",
                "last_update": "2024-03-02",
                "author_id": 3,
                "last_update_id": 4_i64,
                "author_name": "Ada",
                "last_update_name": "Grace",
            }))
            .unwrap();

        assert_eq!(mapped.id, "42");
        assert_eq!(
            mapped.body,
            json!({
                "article_id": 42,
                "article_title": "Fusilli",
                "article_content": "Spiral pasta",
                "creation_date": "2024-03-01",
                "last_update": "2024-03-02",
                "author_id": 3,
                "last_update_id": 4,
                "author_name": "Ada",
                "last_update_name": "Grace",
            })
        );
    }

    #[test]
    fn test_optional_text_fields() {
        let mapped = ArticleMapper::new()
            .decode(&insert(doc! { "article_id": 7_i64 }))
            .unwrap();
        assert_eq!(mapped.id, "7");
        assert_eq!(mapped.body["article_title"], "");
        assert_eq!(mapped.body["author_name"], "");
        assert_eq!(mapped.body["author_id"], 0);
    }

    #[test]
    fn test_missing_id_is_decode_error() {
        let result = ArticleMapper::new().decode(&insert(doc! { "article_title": "no id" }));
        assert!(matches!(result, Err(DecodeError::Shape(_))));
    }
}
