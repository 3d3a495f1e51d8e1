//! Document storage behind the entity-access layer.
//!
//! Every entity is stored as one JSON document in a single shared collection,
//! disambiguated by the kind prefix of its id. [`postgres::PgStore`] keeps the
//! collection in a JSONB table; [`memory::MemoryStore`] keeps it in a map and
//! backs the tests and dry-run fixture loads.

use crate::models::{EntityId, EntityKind};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::{cmp::Ordering, fmt};
use thiserror::Error;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Document fields fed to the full-text index. The postgres migration
/// builds its generated `search` column from the same list.
pub const SEARCH_FIELDS: [&str; 9] = [
    "name",
    "title",
    "description",
    "text",
    "username",
    "major",
    "location",
    "city",
    "state",
];

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: EntityId,
    pub body: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredDocument {
    pub document: Document,
    pub score: f32,
}

/// Fields that must be unique across every stored document carrying them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniqueField {
    Id,
    Username,
    Email,
}

impl UniqueField {
    pub const DOCUMENT_FIELDS: [UniqueField; 2] = [UniqueField::Username, UniqueField::Email];

    pub fn key(self) -> &'static str {
        match self {
            UniqueField::Id => "id",
            UniqueField::Username => "username",
            UniqueField::Email => "email",
        }
    }
}

impl fmt::Display for UniqueField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UniqueField::Id => f.write_str("identifier"),
            other => f.write_str(other.key()),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} has been taken")]
    Duplicate(UniqueField),
    #[error("stored document `{id}` is malformed: {reason}")]
    Corrupt { id: String, reason: String },
    #[error("{id} is not a {expected}")]
    KindMismatch { id: EntityId, expected: EntityKind },
    #[error("{0} does not exist")]
    Missing(EntityId),
    #[error(transparent)]
    Database(#[from] diesel::result::Error),
    #[error("database pool: {0}")]
    Pool(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Structured document filter. Field names address top-level document keys.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    All,
    /// Field equals the value.
    Eq(String, Value),
    /// Array field contains the value.
    Contains(String, Value),
    /// Field equals one of the values.
    In(String, Vec<Value>),
    /// Array field shares at least one element with the values.
    Overlaps(String, Vec<Value>),
    And(Vec<Filter>),
}

impl Filter {
    pub fn eq(field: &str, value: impl Into<Value>) -> Filter {
        Filter::Eq(field.to_string(), value.into())
    }

    pub fn contains(field: &str, value: impl Into<Value>) -> Filter {
        Filter::Contains(field.to_string(), value.into())
    }

    pub fn is_in<V: Into<Value>>(field: &str, values: impl IntoIterator<Item = V>) -> Filter {
        Filter::In(field.to_string(), values.into_iter().map(Into::into).collect())
    }

    pub fn overlaps<V: Into<Value>>(field: &str, values: impl IntoIterator<Item = V>) -> Filter {
        Filter::Overlaps(field.to_string(), values.into_iter().map(Into::into).collect())
    }

    pub fn and(self, other: Filter) -> Filter {
        match self {
            Filter::All => other,
            Filter::And(mut filters) => {
                filters.push(other);
                Filter::And(filters)
            }
            first => Filter::And(vec![first, other]),
        }
    }

    pub fn matches(&self, body: &Value) -> bool {
        match self {
            Filter::All => true,
            Filter::Eq(field, value) => body.get(field) == Some(value),
            Filter::Contains(field, value) => body
                .get(field)
                .and_then(Value::as_array)
                .map_or(false, |items| items.contains(value)),
            Filter::In(field, values) => body.get(field).map_or(false, |v| values.contains(v)),
            Filter::Overlaps(field, values) => body
                .get(field)
                .and_then(Value::as_array)
                .map_or(false, |items| items.iter().any(|item| values.contains(item))),
            Filter::And(filters) => filters.iter().all(|f| f.matches(body)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sort {
    pub field: String,
    pub descending: bool,
}

impl Sort {
    pub fn asc(field: &str) -> Sort {
        Sort {
            field: field.to_string(),
            descending: false,
        }
    }

    pub fn desc(field: &str) -> Sort {
        Sort {
            field: field.to_string(),
            descending: true,
        }
    }
}

/// A filtered read over one or more kinds.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub kinds: Vec<EntityKind>,
    pub filter: Filter,
    pub sort: Option<Sort>,
    /// When set, returned bodies only carry `id` plus these fields.
    pub projection: Option<Vec<String>>,
}

impl Query {
    pub fn new(kinds: &[EntityKind]) -> Query {
        Query {
            kinds: kinds.to_vec(),
            filter: Filter::All,
            sort: None,
            projection: None,
        }
    }

    pub fn filter(mut self, filter: Filter) -> Query {
        self.filter = filter;
        self
    }

    pub fn sort(mut self, sort: Option<Sort>) -> Query {
        self.sort = sort;
        self
    }

    pub fn project(mut self, fields: &[&str]) -> Query {
        self.projection = Some(fields.iter().map(|f| f.to_string()).collect());
        self
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Allocates an id from the store's sequence. Never hands out the same
    /// sequence number twice.
    async fn next_id(&self, kind: EntityKind) -> StoreResult<EntityId>;

    /// Inserts every document or none of them.
    async fn insert(&self, documents: Vec<Document>) -> StoreResult<()>;

    /// Replaces an existing document.
    async fn replace(&self, document: Document) -> StoreResult<()>;

    /// Loads the documents of one kind with the given ids. Missing ids are
    /// skipped.
    async fn fetch(&self, kind: EntityKind, ids: &[EntityId]) -> StoreResult<Vec<Document>>;

    async fn query(&self, query: &Query) -> StoreResult<Vec<Document>>;

    /// Full-text search across all kinds, best match first.
    async fn search(&self, text: &str, skip: usize, limit: usize)
        -> StoreResult<Vec<ScoredDocument>>;
}

/// Orders two optional JSON values: missing first, then by type, then by
/// value. Strings compare byte-wise, matching the `COLLATE "C"` sort key the
/// postgres backend uses for text.
pub(crate) fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::String(_) => 1,
            Value::Number(_) => 2,
            Value::Bool(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }

    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => match (a, b) {
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Number(a), Value::Number(b)) => a
                .as_f64()
                .partial_cmp(&b.as_f64())
                .unwrap_or(Ordering::Equal),
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (a, b) => rank(a).cmp(&rank(b)),
        },
    }
}

/// Keeps `id` and the requested fields of a document body. Every requested
/// field is present in the result, `null` when the body lacks it.
pub(crate) fn project(body: &Value, fields: &[String]) -> Value {
    let mut projected = Map::new();
    projected.insert(
        "id".to_string(),
        body.get("id").cloned().unwrap_or(Value::Null),
    );
    for field in fields {
        projected.insert(
            field.clone(),
            body.get(field).cloned().unwrap_or(Value::Null),
        );
    }
    Value::Object(projected)
}
