//! Concurrent, keyed, in-memory entity store.
//!
//! Every component reads and mutates entities through a [`MemoryStore`];
//! nothing else holds entity memory. Each store instance is guarded by a
//! single reader/writer lock: reads run concurrently, writes are exclusive,
//! and the last write wins.
//!
//! # Field search
//!
//! [`MemoryStore::search_by`] matches entities whose value at a dotted field
//! path (`"manifest.trigger.cron"`) deep-equals the requested value. Values
//! are produced by [`Entity::field`]; the default extractor walks the
//! entity's serde representation. Paths declared with
//! [`MemoryStore::with_index`] are answered from an index (value -> id set)
//! instead of a scan. A path that does not resolve on an entity excludes that
//! entity only.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{BoquitaError, Result};

const DEFAULT_MAX_ENTITIES: usize = 100_000;

/// An entity that can live in a [`MemoryStore`].
pub trait Entity: Clone + Serialize + Send + Sync + 'static {
    /// Human readable entity kind, used in errors and logs
    const KIND: &'static str;

    /// Value of the field at `path`, or `None` when the path does not resolve.
    fn field(&self, path: &str) -> Option<Value> {
        let document = serde_json::to_value(self).ok()?;
        lookup_path(&document, path).cloned()
    }
}

/// Walk a dotted path through nested JSON objects.
pub fn lookup_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return None;
    }
    path.split('.').try_fold(root, |value, segment| match value {
        Value::Object(map) if !segment.is_empty() => map.get(segment),
        _ => None,
    })
}

fn index_key(value: &Value) -> String {
    value.to_string()
}

#[derive(Debug, Default)]
struct FieldIndex {
    by_value: HashMap<String, HashSet<Uuid>>,
}

impl FieldIndex {
    fn insert(&mut self, key: String, id: Uuid) {
        self.by_value.entry(key).or_default().insert(id);
    }

    fn remove(&mut self, key: &str, id: &Uuid) {
        if let Some(ids) = self.by_value.get_mut(key) {
            ids.remove(id);
            if ids.is_empty() {
                self.by_value.remove(key);
            }
        }
    }
}

#[derive(Debug)]
struct Inner<T> {
    data: HashMap<Uuid, T>,
    indices: HashMap<String, FieldIndex>,
}

impl<T: Entity> Inner<T> {
    fn unindex(&mut self, id: &Uuid, entity: &T) {
        for (path, index) in self.indices.iter_mut() {
            if let Some(value) = entity.field(path) {
                index.remove(&index_key(&value), id);
            }
        }
    }

    fn index(&mut self, id: Uuid, entity: &T) {
        for (path, index) in self.indices.iter_mut() {
            if let Some(value) = entity.field(path) {
                index.insert(index_key(&value), id);
            }
        }
    }
}

/// In-memory store for one entity type.
#[derive(Debug)]
pub struct MemoryStore<T> {
    inner: RwLock<Inner<T>>,
    max_entities: usize,
}

impl<T: Entity> Default for MemoryStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Entity> MemoryStore<T> {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_ENTITIES)
    }

    pub fn with_capacity(max_entities: usize) -> Self {
        Self {
            inner: RwLock::new(Inner {
                data: HashMap::new(),
                indices: HashMap::new(),
            }),
            max_entities,
        }
    }

    /// Maintain an index for `path`. Must be declared before entities are inserted.
    pub fn with_index(mut self, path: &str) -> Self {
        self.inner
            .get_mut()
            .indices
            .insert(path.to_string(), FieldIndex::default());
        self
    }

    pub async fn get(&self, id: &Uuid) -> Result<T> {
        let inner = self.inner.read().await;
        inner
            .data
            .get(id)
            .cloned()
            .ok_or_else(|| BoquitaError::not_found(T::KIND, id))
    }

    /// Up to `limit` entities after skipping `skip`; order is unspecified.
    pub async fn list(&self, limit: usize, skip: usize) -> Result<Vec<T>> {
        let inner = self.inner.read().await;
        Ok(inner
            .data
            .values()
            .skip(skip)
            .take(limit)
            .cloned()
            .collect())
    }

    /// Entities whose field at `path` deep-equals `value`.
    pub async fn search_by(&self, path: &str, value: &Value) -> Result<Vec<T>> {
        let inner = self.inner.read().await;

        if let Some(index) = inner.indices.get(path) {
            let matches = index
                .by_value
                .get(&index_key(value))
                .map(|ids| {
                    ids.iter()
                        .filter_map(|id| inner.data.get(id).cloned())
                        .collect()
                })
                .unwrap_or_default();
            return Ok(matches);
        }

        Ok(inner
            .data
            .values()
            .filter(|entity| entity.field(path).as_ref() == Some(value))
            .cloned()
            .collect())
    }

    /// Insert or fully replace the entity stored under `id`.
    pub async fn set(&self, id: Uuid, entity: T) -> Result<()> {
        let mut inner = self.inner.write().await;

        if let Some(previous) = inner.data.remove(&id) {
            inner.unindex(&id, &previous);
        } else if inner.data.len() >= self.max_entities {
            return Err(BoquitaError::Store(format!(
                "{} store at capacity ({} entities)",
                T::KIND,
                self.max_entities
            )));
        }

        inner.index(id, &entity);
        inner.data.insert(id, entity);
        Ok(())
    }

    /// Assign a fresh id, build the entity with it and store it.
    pub async fn insert_with<F>(&self, build: F) -> Result<Uuid>
    where
        F: FnOnce(Uuid) -> T,
    {
        let mut inner = self.inner.write().await;
        if inner.data.len() >= self.max_entities {
            return Err(BoquitaError::Store(format!(
                "{} store at capacity ({} entities)",
                T::KIND,
                self.max_entities
            )));
        }

        let mut id = Uuid::new_v4();
        while inner.data.contains_key(&id) {
            id = Uuid::new_v4();
        }

        let entity = build(id);
        inner.index(id, &entity);
        inner.data.insert(id, entity);
        Ok(id)
    }

    /// Delete the entity if present; unknown ids are a no-op.
    pub async fn remove(&self, id: &Uuid) -> Result<()> {
        let mut inner = self.inner.write().await;
        if let Some(previous) = inner.data.remove(id) {
            inner.unindex(id, &previous);
        }
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.data.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.data.is_empty()
    }
}
