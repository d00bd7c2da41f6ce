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

//! Entry filter applied by the tailer.
//!
//! An [`OplogFilter`] constrains the `op` and `ns` fields of oplog entries.
//! It is evaluated twice: pushed down to MongoDB as a query document so the
//! server only returns candidate entries, and re-checked in process before
//! delivery so that sources without query support still honour it.
//!
//! ```rust
//! use fusilli_core::entry::OperationKind;
//! use fusilli_core::filter::OplogFilter;
//! use bson::doc;
//!
//! let filter = OplogFilter::builder()
//!     .operation(OperationKind::Insert)
//!     .namespace("test.articles")
//!     .build();
//!
//! assert_eq!(filter.to_document(), doc! { "op": "i", "ns": "test.articles" });
//! ```

use crate::entry::{OperationKind, OplogEntry};
use bson::{doc, Bson, Document};
use serde::{Deserialize, Deserializer, Serialize};

/// Predicate over the `op` and `ns` fields of an oplog entry.
///
/// An empty set means "any value" for that field, so the default filter
/// matches every entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OplogFilter {
    /// Allowed operations
    #[serde(rename = "op", default, deserialize_with = "one_or_many_operations")]
    pub operations: Vec<OperationKind>,

    /// Allowed fully qualified namespaces ("database.collection")
    #[serde(rename = "ns", default, deserialize_with = "one_or_many_strings")]
    pub namespaces: Vec<String>,
}

impl OplogFilter {
    /// Creates a new builder.
    #[must_use]
    pub fn builder() -> OplogFilterBuilder {
        OplogFilterBuilder::default()
    }

    /// Returns a filter that matches every entry.
    #[must_use]
    pub fn any() -> Self {
        Self::default()
    }

    /// Returns true if the entry satisfies every constraint.
    #[must_use]
    pub fn matches(&self, entry: &OplogEntry) -> bool {
        let op_ok = self.operations.is_empty() || self.operations.contains(&entry.operation);
        let ns_ok = self.namespaces.is_empty()
            || self
                .namespaces
                .iter()
                .any(|ns| *ns == entry.namespace.full_name());
        op_ok && ns_ok
    }

    /// Builds the MongoDB query document equivalent to this filter.
    ///
    /// Single values become equality constraints; several values use `$in`.
    #[must_use]
    pub fn to_document(&self) -> Document {
        let mut query = Document::new();

        match self.operations.as_slice() {
            [] => {}
            [op] => {
                query.insert("op", op.code());
            }
            ops => {
                let codes: Vec<Bson> = ops.iter().map(|op| Bson::from(op.code())).collect();
                query.insert("op", doc! { "$in": codes });
            }
        }

        match self.namespaces.as_slice() {
            [] => {}
            [ns] => {
                query.insert("ns", ns.as_str());
            }
            many => {
                let values: Vec<Bson> = many.iter().map(|ns| Bson::from(ns.as_str())).collect();
                query.insert("ns", doc! { "$in": values });
            }
        }

        query
    }
}

/// Builder for [`OplogFilter`].
#[derive(Debug, Default)]
pub struct OplogFilterBuilder {
    operations: Vec<OperationKind>,
    namespaces: Vec<String>,
}

impl OplogFilterBuilder {
    /// Allows an operation. May be called several times.
    #[must_use]
    pub fn operation(mut self, op: OperationKind) -> Self {
        if !self.operations.contains(&op) {
            self.operations.push(op);
        }
        self
    }

    /// Allows a namespace ("database.collection"). May be called several times.
    #[must_use]
    pub fn namespace(mut self, ns: impl Into<String>) -> Self {
        let ns = ns.into();
        if !self.namespaces.contains(&ns) {
            self.namespaces.push(ns);
        }
        self
    }

    /// Builds the filter.
    #[must_use]
    pub fn build(self) -> OplogFilter {
        OplogFilter {
            operations: self.operations,
            namespaces: self.namespaces,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(value) => vec![value],
            Self::Many(values) => values,
        }
    }
}

fn one_or_many_strings<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(OneOrMany::deserialize(deserializer)?.into_vec())
}

fn one_or_many_operations<'de, D>(deserializer: D) -> Result<Vec<OperationKind>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(OneOrMany::deserialize(deserializer)?
        .into_vec()
        .iter()
        .map(|op| OperationKind::parse(op))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{LogTimestamp, Namespace};

    fn entry(op: OperationKind, ns: &str) -> OplogEntry {
        OplogEntry {
            timestamp: LogTimestamp::new(1, 1),
            sequence: 0,
            history_id: None,
            schema_version: 2,
            operation: op,
            namespace: Namespace::parse(ns),
            document: doc! {},
        }
    }

    #[test]
    fn test_default_matches_everything() {
        let filter = OplogFilter::any();
        assert!(filter.matches(&entry(OperationKind::Delete, "a.b")));
        assert!(filter.to_document().is_empty());
    }

    #[test]
    fn test_op_and_ns_constraints() {
        let filter = OplogFilter::builder()
            .operation(OperationKind::Insert)
            .namespace("test.articles")
            .build();

        assert!(filter.matches(&entry(OperationKind::Insert, "test.articles")));
        assert!(!filter.matches(&entry(OperationKind::Update, "test.articles")));
        assert!(!filter.matches(&entry(OperationKind::Insert, "test.users")));
    }

    #[test]
    fn test_multiple_values_use_in() {
        let filter = OplogFilter::builder()
            .operation(OperationKind::Insert)
            .operation(OperationKind::Update)
            .build();

        assert_eq!(
            filter.to_document(),
            doc! { "op": { "$in": ["i", "u"] } }
        );
    }

    #[test]
    fn test_builder_deduplicates() {
        let filter = OplogFilter::builder()
            .namespace("a.b")
            .namespace("a.b")
            .build();
        assert_eq!(filter.namespaces.len(), 1);
    }

    #[test]
    fn test_deserialize_single_and_list() {
        let filter: OplogFilter =
            serde_json::from_str(r#"{ "op": "insert", "ns": ["test.articles", "test.posts"] }"#)
                .unwrap();

        assert_eq!(filter.operations, vec![OperationKind::Insert]);
        assert_eq!(filter.namespaces.len(), 2);

        let empty: OplogFilter = serde_json::from_str("{}").unwrap();
        assert_eq!(empty, OplogFilter::any());
    }
}
