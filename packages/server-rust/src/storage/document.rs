//! Document store contract used by the domain services.

use std::cmp::Ordering;

use serde::Serialize;
use serde_json::Value;

/// A record a [`DocumentStore`] can hold.
pub trait Document: Clone + Serialize + Send + Sync + 'static {
    /// Storage key.
    fn id(&self) -> String;

    /// Fields visible to [`DocumentStore::find_one`] and [`DocumentStore::query`].
    ///
    /// Defaults to the document's JSON form.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be serialized.
    fn index(&self) -> anyhow::Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Sort key for [`FieldQuery`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sort {
    pub field: String,
    pub descending: bool,
}

impl Sort {
    #[must_use]
    pub fn descending(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: true,
        }
    }

    #[must_use]
    pub fn ascending(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: false,
        }
    }

    /// `-field` for descending, `field` for ascending.
    #[must_use]
    pub fn to_sortor(&self) -> String {
        if self.descending {
            format!("-{}", self.field)
        } else {
            self.field.clone()
        }
    }
}

/// Equality filter on one field, paged and sorted.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldQuery {
    pub field: String,
    pub value: Value,
    /// 1-based page number; 0 is read as 1.
    pub page: usize,
    /// Page size; 0 returns every match.
    pub page_size: usize,
    pub sort: Option<Sort>,
}

impl FieldQuery {
    #[must_use]
    pub fn new(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
            page: 1,
            page_size: 0,
            sort: None,
        }
    }

    #[must_use]
    pub fn page(mut self, page: usize, page_size: usize) -> Self {
        self.page = page;
        self.page_size = page_size;
        self
    }

    #[must_use]
    pub fn sort(mut self, sort: Sort) -> Self {
        self.sort = Some(sort);
        self
    }
}

/// One page of matches plus the total match count.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
}

/// Synchronous, one-record-per-call persistence.
pub trait DocumentStore<T: Document>: Send + Sync {
    /// Inserts or replaces the document stored under `doc.id()`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend rejects the write.
    fn upsert(&self, doc: T) -> anyhow::Result<()>;

    /// Inserts `doc` unless a stored document already has the same `field`
    /// value. Returns `false`, storing nothing, when the value is taken.
    ///
    /// The check and the insert are one atomic step.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend rejects the write.
    fn insert_unique(&self, doc: T, field: &str) -> anyhow::Result<bool>;

    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn get(&self, id: &str) -> anyhow::Result<Option<T>>;

    /// Removes and returns the document, if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend rejects the delete.
    fn remove(&self, id: &str) -> anyhow::Result<Option<T>>;

    /// First document whose `field` equals `value`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn find_one(&self, field: &str, value: &Value) -> anyhow::Result<Option<T>>;

    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn query(&self, query: &FieldQuery) -> anyhow::Result<Page<T>>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Orders two JSON values: numbers numerically, strings lexically, missing last.
#[must_use]
pub fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            match (x.as_u64(), y.as_u64()) {
                (Some(x), Some(y)) => x.cmp(&y),
                _ => x
                    .as_f64()
                    .partial_cmp(&y.as_f64())
                    .unwrap_or(Ordering::Equal),
            }
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}
