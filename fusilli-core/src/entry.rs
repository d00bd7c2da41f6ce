//! MongoDB Oplog Entry Representation
//!
//! This module defines the entry type that flows from the tailer to the
//! indexing sink. An [`OplogEntry`] is one record of the replica set's
//! operation log (`local.oplog.rs`), decoded from its raw BSON form.
//!
//! # Examples
//!
//! ```rust
//! use fusilli_core::entry::{LogTimestamp, Namespace, OperationKind, OplogEntry};
//! use bson::doc;
//!
//! let entry = OplogEntry {
//!     timestamp: LogTimestamp::new(1_700_000_000, 1),
//!     sequence: 1,
//!     history_id: None,
//!     schema_version: 2,
//!     operation: OperationKind::Insert,
//!     namespace: Namespace::new("test", "articles"),
//!     document: doc! { "article_id": 7, "article_title": "Hello" },
//! };
//!
//! assert!(entry.is_insert());
//! assert_eq!(entry.namespace.full_name(), "test.articles");
//! ```

use bson::{Bson, Document};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error that can occur when decoding a raw oplog document into an [`OplogEntry`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EntryDecodeError {
    /// A required field is absent
    #[error("oplog entry is missing field `{0}`")]
    MissingField(&'static str),

    /// A field is present but has an unexpected BSON type
    #[error("oplog field `{field}` has unexpected type {found:?}")]
    UnexpectedType {
        field: &'static str,
        found: bson::spec::ElementType,
    },
}

/// Logical time of a write in the oplog.
///
/// Mirrors BSON `Timestamp`: seconds since the epoch plus an increment that
/// orders writes within the same second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LogTimestamp {
    /// Seconds since the Unix epoch
    pub time: u32,

    /// Ordinal of the write within `time`
    pub increment: u32,
}

impl LogTimestamp {
    /// Creates a timestamp from its two components.
    #[must_use]
    pub const fn new(time: u32, increment: u32) -> Self {
        Self { time, increment }
    }
}

impl From<bson::Timestamp> for LogTimestamp {
    fn from(ts: bson::Timestamp) -> Self {
        Self {
            time: ts.time,
            increment: ts.increment,
        }
    }
}

impl From<LogTimestamp> for bson::Timestamp {
    fn from(ts: LogTimestamp) -> Self {
        Self {
            time: ts.time,
            increment: ts.increment,
        }
    }
}

impl fmt::Display for LogTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.time, self.increment)
    }
}

/// Position of an entry in the log: `(timestamp, sequence)`.
///
/// Positions are totally ordered; entries read from one cursor have strictly
/// increasing positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LogPosition {
    pub timestamp: LogTimestamp,
    pub sequence: i64,
}

impl LogPosition {
    /// Position ordered before every entry of any log.
    pub const ORIGIN: Self = Self {
        timestamp: LogTimestamp::new(0, 0),
        sequence: i64::MIN,
    };

    /// Reads the position of a raw oplog document.
    ///
    /// Returns `None` if `ts` is missing or not a timestamp; `t` defaults to
    /// 0 the same way full decoding does.
    #[must_use]
    pub fn from_raw(raw: &Document) -> Option<Self> {
        let timestamp = match raw.get("ts") {
            Some(Bson::Timestamp(ts)) => LogTimestamp::from(*ts),
            _ => return None,
        };
        let sequence = integer_field(raw, "t").ok().flatten().unwrap_or_default();
        Some(Self {
            timestamp,
            sequence,
        })
    }
}

impl fmt::Display for LogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.timestamp, self.sequence)
    }
}

/// Oplog operation kinds.
///
/// The oplog encodes operations as single-letter codes. Codes the pipeline
/// does not interpret (commands `c`, no-ops `n`, ...) are kept verbatim in
/// [`OperationKind::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    /// A document was inserted (`i`)
    Insert,

    /// A document was updated (`u`)
    Update,

    /// A document was deleted (`d`)
    Delete,

    /// Any other oplog operation, holding its raw code
    #[serde(untagged)]
    Other(String),
}

impl OperationKind {
    /// Parses the raw oplog code (`i`, `u`, `d`, ...).
    #[must_use]
    pub fn from_code(code: &str) -> Self {
        match code {
            "i" => Self::Insert,
            "u" => Self::Update,
            "d" => Self::Delete,
            other => Self::Other(other.to_string()),
        }
    }

    /// Parses either a raw code or a long name (`insert`, `update`, `delete`).
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "insert" => Self::Insert,
            "update" => Self::Update,
            "delete" => Self::Delete,
            _ => Self::from_code(value),
        }
    }

    /// Returns the raw oplog code for this operation.
    #[must_use]
    pub fn code(&self) -> &str {
        match self {
            Self::Insert => "i",
            Self::Update => "u",
            Self::Delete => "d",
            Self::Other(code) => code,
        }
    }

    /// Returns a lowercase label suitable for logs and metrics.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Other(code) => code,
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// MongoDB namespace (database + collection).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Namespace {
    /// Database name
    pub database: String,

    /// Collection name
    pub collection: String,
}

impl Namespace {
    /// Creates a new namespace from database and collection names.
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
        }
    }

    /// Parses `"database.collection"`, splitting on the first dot.
    ///
    /// Collection names may themselves contain dots (`db.system.views`).
    /// A value without a dot is treated as a database-level namespace.
    #[must_use]
    pub fn parse(ns: &str) -> Self {
        match ns.split_once('.') {
            Some((database, collection)) => Self::new(database, collection),
            None => Self::new(ns, ""),
        }
    }

    /// Returns the fully qualified namespace as "database.collection".
    pub fn full_name(&self) -> String {
        if self.collection.is_empty() {
            self.database.clone()
        } else {
            format!("{}.{}", self.database, self.collection)
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_name())
    }
}

/// One change captured from the oplog.
///
/// The `document` payload is opaque at this stage: the full document for
/// inserts, the update delta for updates, the `_id` selector for deletes.
/// It is only given a shape by the sink's [`DocumentMapper`](crate::mapping::DocumentMapper).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OplogEntry {
    /// Logical time of the write (`ts`)
    #[serde(rename = "ts")]
    pub timestamp: LogTimestamp,

    /// Tie-breaker for entries sharing a timestamp (`t`)
    #[serde(rename = "t")]
    pub sequence: i64,

    /// Opaque identifier grouping related writes (`h`), absent on newer servers
    #[serde(rename = "h", skip_serializing_if = "Option::is_none")]
    pub history_id: Option<i64>,

    /// Version of the oplog wire format (`v`)
    #[serde(rename = "v")]
    pub schema_version: i32,

    /// Operation that produced the entry (`op`)
    #[serde(rename = "op")]
    pub operation: OperationKind,

    /// Affected namespace (`ns`)
    #[serde(rename = "ns")]
    pub namespace: Namespace,

    /// Operation payload (`o`)
    #[serde(rename = "o")]
    pub document: Document,
}

impl OplogEntry {
    /// Returns the `(timestamp, sequence)` position of this entry.
    #[inline]
    pub fn position(&self) -> LogPosition {
        LogPosition {
            timestamp: self.timestamp,
            sequence: self.sequence,
        }
    }

    /// Returns true if this is an insert operation.
    #[inline]
    pub fn is_insert(&self) -> bool {
        self.operation == OperationKind::Insert
    }

    /// Returns true if this is an update operation.
    #[inline]
    pub fn is_update(&self) -> bool {
        self.operation == OperationKind::Update
    }

    /// Returns true if this is a delete operation.
    #[inline]
    pub fn is_delete(&self) -> bool {
        self.operation == OperationKind::Delete
    }

    /// Converts the entry back to the raw oplog document layout.
    ///
    /// Used by the in-memory source so test fixtures travel through the
    /// same decoding path as entries read from MongoDB.
    pub fn to_document(&self) -> Document {
        let mut doc = Document::new();
        doc.insert("ts", Bson::Timestamp(self.timestamp.into()));
        doc.insert("t", self.sequence);
        if let Some(h) = self.history_id {
            doc.insert("h", h);
        }
        doc.insert("v", self.schema_version);
        doc.insert("op", self.operation.code());
        doc.insert("ns", self.namespace.full_name());
        doc.insert("o", self.document.clone());
        doc
    }
}

fn integer_field(doc: &Document, field: &'static str) -> Result<Option<i64>, EntryDecodeError> {
    match doc.get(field) {
        None | Some(Bson::Null) => Ok(None),
        Some(Bson::Int32(v)) => Ok(Some(i64::from(*v))),
        Some(Bson::Int64(v)) => Ok(Some(*v)),
        Some(other) => Err(EntryDecodeError::UnexpectedType {
            field,
            found: other.element_type(),
        }),
    }
}

/// Decodes a raw `local.oplog.rs` document.
///
/// `ts`, `op`, `ns` and `o` are required. `t`, `h` and `v` default when absent
/// since their presence varies across server versions.
impl TryFrom<Document> for OplogEntry {
    type Error = EntryDecodeError;

    fn try_from(mut raw: Document) -> Result<Self, Self::Error> {
        let timestamp = match raw.get("ts") {
            Some(Bson::Timestamp(ts)) => LogTimestamp::from(*ts),
            Some(other) => {
                return Err(EntryDecodeError::UnexpectedType {
                    field: "ts",
                    found: other.element_type(),
                })
            }
            None => return Err(EntryDecodeError::MissingField("ts")),
        };

        let operation = match raw.get("op") {
            Some(Bson::String(op)) => OperationKind::from_code(op),
            Some(other) => {
                return Err(EntryDecodeError::UnexpectedType {
                    field: "op",
                    found: other.element_type(),
                })
            }
            None => return Err(EntryDecodeError::MissingField("op")),
        };

        let namespace = match raw.get("ns") {
            Some(Bson::String(ns)) => Namespace::parse(ns),
            Some(other) => {
                return Err(EntryDecodeError::UnexpectedType {
                    field: "ns",
                    found: other.element_type(),
                })
            }
            None => return Err(EntryDecodeError::MissingField("ns")),
        };

        let sequence = integer_field(&raw, "t")?.unwrap_or_default();
        let history_id = integer_field(&raw, "h")?;
        let schema_version = integer_field(&raw, "v")?
            .and_then(|v| i32::try_from(v).ok())
            .unwrap_or_default();

        let document = match raw.remove("o") {
            Some(Bson::Document(doc)) => doc,
            Some(other) => {
                return Err(EntryDecodeError::UnexpectedType {
                    field: "o",
                    found: other.element_type(),
                })
            }
            None => return Err(EntryDecodeError::MissingField("o")),
        };

        Ok(Self {
            timestamp,
            sequence,
            history_id,
            schema_version,
            operation,
            namespace,
            document,
        })
    }
}
