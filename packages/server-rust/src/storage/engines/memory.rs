//! In-memory [`DocumentStore`] implementation backed by [`DashMap`].
//!
//! Provides concurrent read/write access without external locking. Each
//! entry keeps the document next to its JSON index so queries never
//! re-serialize.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;

use crate::storage::document::{compare_values, Document, DocumentStore, FieldQuery, Page};

/// In-memory storage backed by [`DashMap`].
pub struct MemoryStore<T> {
    entries: DashMap<String, (T, Value)>,
    /// `field=value` claims taken by [`DocumentStore::insert_unique`], mapped to the owning id.
    claims: DashMap<String, String>,
}

impl<T> MemoryStore<T> {
    /// Creates a new, empty `MemoryStore`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            claims: DashMap::new(),
        }
    }
}

impl<T> Default for MemoryStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for MemoryStore<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl<T: Document> DocumentStore<T> for MemoryStore<T> {
    fn upsert(&self, doc: T) -> anyhow::Result<()> {
        let index = doc.index()?;
        self.entries.insert(doc.id(), (doc, index));
        Ok(())
    }

    fn insert_unique(&self, doc: T, field: &str) -> anyhow::Result<bool> {
        let index = doc.index()?;
        let value = index.get(field).cloned().unwrap_or(Value::Null);
        // The vacant entry holds its shard lock until the document is stored,
        // so competing claims for the same value wait and then see it taken.
        match self.claims.entry(format!("{field}={value}")) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                if self.find_one(field, &value)?.is_some() {
                    return Ok(false);
                }
                let id = doc.id();
                self.entries.insert(id.clone(), (doc, index));
                slot.insert(id);
                Ok(true)
            }
        }
    }

    fn get(&self, id: &str) -> anyhow::Result<Option<T>> {
        Ok(self.entries.get(id).map(|entry| entry.0.clone()))
    }

    fn remove(&self, id: &str) -> anyhow::Result<Option<T>> {
        let removed = self.entries.remove(id).map(|(_, (doc, _))| doc);
        if removed.is_some() {
            self.claims.retain(|_, owner| owner != id);
        }
        Ok(removed)
    }

    fn find_one(&self, field: &str, value: &Value) -> anyhow::Result<Option<T>> {
        Ok(self
            .entries
            .iter()
            .find(|entry| entry.value().1.get(field) == Some(value))
            .map(|entry| entry.value().0.clone()))
    }

    fn query(&self, query: &FieldQuery) -> anyhow::Result<Page<T>> {
        let mut matches: Vec<(String, T, Value)> = self
            .entries
            .iter()
            .filter(|entry| entry.value().1.get(&query.field) == Some(&query.value))
            .map(|entry| {
                let (doc, index) = entry.value();
                (entry.key().clone(), doc.clone(), index.clone())
            })
            .collect();

        matches.sort_by(|(a_id, _, a), (b_id, _, b)| {
            let ordering = match &query.sort {
                Some(sort) => {
                    let ordering = compare_values(a.get(&sort.field), b.get(&sort.field));
                    if sort.descending {
                        ordering.reverse()
                    } else {
                        ordering
                    }
                }
                None => std::cmp::Ordering::Equal,
            };
            ordering.then_with(|| a_id.cmp(b_id))
        });

        let total = matches.len();
        let items = if query.page_size == 0 {
            matches.into_iter().map(|(_, doc, _)| doc).collect()
        } else {
            let skip = query.page.max(1).saturating_sub(1).saturating_mul(query.page_size);
            matches
                .into_iter()
                .skip(skip)
                .take(query.page_size)
                .map(|(_, doc, _)| doc)
                .collect()
        };

        Ok(Page { items, total })
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}
