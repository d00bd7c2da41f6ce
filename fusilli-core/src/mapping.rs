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

//! Mapping oplog payloads to index documents.
//!
//! A [`DocumentMapper`] turns the opaque payload of an [`OplogEntry`] into a
//! [`MappedDocument`]: the id to index under and the JSON body to store.
//!
//! Two mappers are provided:
//!
//! - [`JsonMapper`] keeps the payload as-is (relaxed Extended JSON) and reads
//!   the id from a configured field.
//! - [`TypedMapper`] decodes the payload into a Rust type implementing
//!   [`IndexDocument`], which enforces its shape.
//!
//! ```rust
//! use fusilli_core::mapping::{DocumentMapper, IndexDocument, TypedMapper};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct Post {
//!     slug: String,
//!     title: String,
//! }
//!
//! impl IndexDocument for Post {
//!     fn document_id(&self) -> String {
//!         self.slug.clone()
//!     }
//! }
//!
//! let mapper = TypedMapper::<Post>::new();
//! ```

use crate::entry::OplogEntry;
use bson::Bson;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use thiserror::Error;

/// A payload ready to be indexed.
#[derive(Debug, Clone, PartialEq)]
pub struct MappedDocument {
    /// Document id in the index
    pub id: String,
    /// Document body
    pub body: serde_json::Value,
}

/// Errors raised while mapping a payload.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The id field is absent
    #[error("missing identifier field `{0}`")]
    MissingId(String),

    /// The id field has a type that cannot be used as an id
    #[error("identifier field `{field}` has unsupported type {found:?}")]
    InvalidId {
        field: String,
        found: bson::spec::ElementType,
    },

    /// The payload does not have the expected shape
    #[error("payload does not match document type: {0}")]
    Shape(#[from] bson::de::Error),

    /// The decoded document could not be turned into JSON
    #[error("document is not representable as JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Turns oplog payloads into index documents.
pub trait DocumentMapper: Send + Sync {
    /// Maps the entry payload.
    ///
    /// # Errors
    ///
    /// Returns a [`DecodeError`] if the payload lacks an id or has the wrong
    /// shape. The sink reports the entry and moves on.
    fn decode(&self, entry: &OplogEntry) -> Result<MappedDocument, DecodeError>;

    /// Short name used in logs.
    fn name(&self) -> &str {
        "custom"
    }
}

/// Maps payloads verbatim, taking the id from one field.
#[derive(Debug, Clone)]
pub struct JsonMapper {
    id_field: String,
}

impl Default for JsonMapper {
    fn default() -> Self {
        Self::new("_id")
    }
}

impl JsonMapper {
    /// Creates a mapper reading the id from `id_field`.
    #[must_use]
    pub fn new(id_field: impl Into<String>) -> Self {
        Self {
            id_field: id_field.into(),
        }
    }

    /// The field the id is read from.
    #[must_use]
    pub fn id_field(&self) -> &str {
        &self.id_field
    }
}

impl DocumentMapper for JsonMapper {
    fn decode(&self, entry: &OplogEntry) -> Result<MappedDocument, DecodeError> {
        let id = match entry.document.get(&self.id_field) {
            None | Some(Bson::Null) => return Err(DecodeError::MissingId(self.id_field.clone())),
            Some(Bson::String(s)) if s.is_empty() => {
                return Err(DecodeError::MissingId(self.id_field.clone()))
            }
            Some(Bson::String(s)) => s.clone(),
            Some(Bson::ObjectId(oid)) => oid.to_hex(),
            Some(Bson::Int32(n)) => n.to_string(),
            Some(Bson::Int64(n)) => n.to_string(),
            Some(other) => {
                return Err(DecodeError::InvalidId {
                    field: self.id_field.clone(),
                    found: other.element_type(),
                })
            }
        };

        let body = Bson::Document(entry.document.clone()).into_relaxed_extjson();
        Ok(MappedDocument { id, body })
    }

    fn name(&self) -> &str {
        "json"
    }
}

/// A document type with a known shape and an id.
pub trait IndexDocument: Serialize + DeserializeOwned + Send + Sync {
    /// The id to index the document under.
    fn document_id(&self) -> String;
}

/// Decodes payloads into `T`, rejecting payloads of another shape.
pub struct TypedMapper<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> std::fmt::Debug for TypedMapper<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypedMapper")
            .field("type", &std::any::type_name::<T>())
            .finish()
    }
}

impl<T> Default for TypedMapper<T> {
    fn default() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> TypedMapper<T> {
    /// Creates a mapper for `T`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl<T: IndexDocument> DocumentMapper for TypedMapper<T> {
    fn decode(&self, entry: &OplogEntry) -> Result<MappedDocument, DecodeError> {
        let typed: T = bson::from_document(entry.document.clone())?;
        Ok(MappedDocument {
            id: typed.document_id(),
            body: serde_json::to_value(&typed)?,
        })
    }

    fn name(&self) -> &str {
        std::any::type_name::<T>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{LogTimestamp, Namespace, OperationKind};
    use bson::{doc, oid::ObjectId, Document};
    use serde::Deserialize;
    use serde_json::json;

    fn entry(document: Document) -> OplogEntry {
        OplogEntry {
            timestamp: LogTimestamp::new(1, 1),
            sequence: 1,
            history_id: None,
            schema_version: 2,
            operation: OperationKind::Insert,
            namespace: Namespace::parse("test.posts"),
            document,
        }
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Post {
        slug: String,
        views: i64,
    }

    impl IndexDocument for Post {
        fn document_id(&self) -> String {
            self.slug.clone()
        }
    }

    #[test]
    fn test_json_mapper_string_id() {
        let mapper = JsonMapper::new("slug");
        let mapped = mapper
            .decode(&entry(doc! { "slug": "hello", "views": 3 }))
            .unwrap();

        assert_eq!(mapped.id, "hello");
        assert_eq!(mapped.body, json!({ "slug": "hello", "views": 3 }));
    }

    #[test]
    fn test_json_mapper_object_id() {
        let oid = ObjectId::new();
        let mapped = JsonMapper::default()
            .decode(&entry(doc! { "_id": oid, "title": "x" }))
            .unwrap();

        assert_eq!(mapped.id, oid.to_hex());
        assert_eq!(mapped.body["_id"]["$oid"], json!(oid.to_hex()));
    }

    #[test]
    fn test_json_mapper_missing_or_invalid_id() {
        let mapper = JsonMapper::new("slug");
        assert!(matches!(
            mapper.decode(&entry(doc! { "title": "x" })),
            Err(DecodeError::MissingId(_))
        ));
        assert!(matches!(
            mapper.decode(&entry(doc! { "slug": "" })),
            Err(DecodeError::MissingId(_))
        ));
        assert!(matches!(
            mapper.decode(&entry(doc! { "slug": [1, 2] })),
            Err(DecodeError::InvalidId { .. })
        ));
    }

    #[test]
    fn test_typed_mapper() {
        let mapper = TypedMapper::<Post>::new();
        let mapped = mapper
            .decode(&entry(doc! { "slug": "hello", "views": 7_i64 }))
            .unwrap();

        assert_eq!(mapped.id, "hello");
        assert_eq!(mapped.body, json!({ "slug": "hello", "views": 7 }));
    }

    #[test]
    fn test_typed_mapper_rejects_wrong_shape() {
        let mapper = TypedMapper::<Post>::new();
        let result = mapper.decode(&entry(doc! { "slug": 42 }));
        assert!(matches!(result, Err(DecodeError::Shape(_))));
    }
}
