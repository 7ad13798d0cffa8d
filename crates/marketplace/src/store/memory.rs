//! In-process document store.
//!
//! Holds the whole tree as a single JSON value. Subscribers are notified
//! synchronously, after the tree lock is released, with the full value at
//! their path whenever a mutation touches an overlapping path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::{Map, Value};
use uuid::Uuid;

use super::{
    ChangeHandler, CreateOutcome, DocumentStore, ErrorHandler, StoreError, StorePath, Subscription,
    non_empty,
};

/// In-memory [`DocumentStore`].
///
/// Cheaply cloneable; clones share the same tree.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    root: Mutex<Value>,
    subscribers: Mutex<HashMap<u64, Subscriber>>,
    next_subscriber: AtomicU64,
    writes: AtomicUsize,
    offline: AtomicBool,
}

struct Subscriber {
    path: StorePath,
    on_change: ChangeHandler,
    on_error: ErrorHandler,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl InMemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with `tree`.
    #[must_use]
    pub fn with_tree(tree: Value) -> Self {
        let store = Self::default();
        *lock(&store.inner.root) = tree;
        store
    }

    /// Number of successful mutations performed so far.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.inner.writes.load(Ordering::SeqCst)
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner.subscribers).len()
    }

    /// Simulate losing (or regaining) the connection.
    ///
    /// While offline every call fails with `StoreError::Unavailable`. Going
    /// offline also reports the failure to every live subscriber.
    pub fn set_offline(&self, offline: bool) {
        let was_offline = self.inner.offline.swap(offline, Ordering::SeqCst);
        if offline && !was_offline {
            let handlers: Vec<ErrorHandler> = lock(&self.inner.subscribers)
                .values()
                .map(|s| Arc::clone(&s.on_error))
                .collect();
            for on_error in handlers {
                on_error(StoreError::Unavailable("connection lost".to_owned()));
            }
        }
    }

    /// Snapshot of the whole tree.
    #[must_use]
    pub fn dump(&self) -> Value {
        lock(&self.inner.root).clone()
    }

    fn ensure_online(&self) -> Result<(), StoreError> {
        if self.inner.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("store is offline".to_owned()));
        }
        Ok(())
    }

    /// Apply a mutation, then notify every overlapping subscriber.
    fn mutate<R>(&self, path: &StorePath, apply: impl FnOnce(&mut Value) -> R) -> R {
        let (result, notifications) = {
            let mut root = lock(&self.inner.root);
            let result = apply(&mut root);
            prune(&mut root);
            self.inner.writes.fetch_add(1, Ordering::SeqCst);

            let notifications: Vec<(ChangeHandler, Option<Value>)> =
                lock(&self.inner.subscribers)
                    .values()
                    .filter(|s| s.path.overlaps(path))
                    .map(|s| (Arc::clone(&s.on_change), value_at(&root, &s.path)))
                    .collect();
            (result, notifications)
        };

        for (on_change, value) in notifications {
            on_change(value);
        }
        result
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn read(&self, path: &StorePath) -> Result<Option<Value>, StoreError> {
        self.ensure_online()?;
        Ok(value_at(&lock(&self.inner.root), path))
    }

    async fn write(&self, path: &StorePath, value: Value) -> Result<(), StoreError> {
        self.ensure_online()?;
        self.mutate(path, |root| set_at(root, path, value));
        Ok(())
    }

    async fn update(&self, path: &StorePath, fields: Map<String, Value>) -> Result<(), StoreError> {
        self.ensure_online()?;
        self.mutate(path, |root| {
            for (key, value) in fields {
                let mut segments = path.segments().to_vec();
                segments.push(key);
                set_segments(root, &segments, value);
            }
        });
        Ok(())
    }

    async fn remove(&self, path: &StorePath) -> Result<(), StoreError> {
        self.ensure_online()?;
        self.mutate(path, |root| set_at(root, path, Value::Null));
        Ok(())
    }

    async fn push(&self, path: &StorePath, value: Value) -> Result<String, StoreError> {
        self.ensure_online()?;
        let key = format!("-{}", Uuid::new_v4().simple());
        let child = path.child(&key)?;
        self.mutate(&child, |root| set_at(root, &child, value));
        Ok(key)
    }

    async fn create_if_absent(
        &self,
        path: &StorePath,
        value: Value,
    ) -> Result<CreateOutcome, StoreError> {
        self.ensure_online()?;
        // Check and write under one lock so two racing creators cannot both win.
        {
            let root = lock(&self.inner.root);
            if let Some(existing) = value_at(&root, path) {
                return Ok(CreateOutcome::Existing(existing));
            }
        }
        let outcome = self.mutate(path, |root| match value_at(root, path) {
            Some(existing) => CreateOutcome::Existing(existing),
            None => {
                set_at(root, path, value);
                CreateOutcome::Created
            }
        });
        Ok(outcome)
    }

    async fn subscribe(
        &self,
        path: &StorePath,
        on_change: ChangeHandler,
        on_error: ErrorHandler,
    ) -> Result<Subscription, StoreError> {
        self.ensure_online()?;
        let id = self.inner.next_subscriber.fetch_add(1, Ordering::SeqCst);

        let initial = value_at(&lock(&self.inner.root), path);
        lock(&self.inner.subscribers).insert(
            id,
            Subscriber {
                path: path.clone(),
                on_change: Arc::clone(&on_change),
                on_error,
            },
        );
        on_change(initial);

        let inner = Arc::downgrade(&self.inner);
        Ok(Subscription::new(move || {
            if let Some(inner) = inner.upgrade() {
                lock(&inner.subscribers).remove(&id);
            }
        }))
    }
}

// =============================================================================
// Tree helpers
// =============================================================================

pub(super) fn value_at(root: &Value, path: &StorePath) -> Option<Value> {
    let mut node = root;
    for segment in path.segments() {
        node = node.as_object()?.get(segment)?;
    }
    non_empty(node.clone())
}

fn set_at(root: &mut Value, path: &StorePath, value: Value) {
    set_segments(root, path.segments(), value);
}

pub(super) fn set_segments(root: &mut Value, segments: &[String], value: Value) {
    let Some((last, parents)) = segments.split_last() else {
        *root = value;
        return;
    };

    let mut node = root;
    for segment in parents {
        if !node.is_object() {
            if value.is_null() {
                return;
            }
            *node = Value::Object(Map::new());
        }
        let Some(map) = node.as_object_mut() else {
            return;
        };
        node = map
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Map::new()));
    }

    if !node.is_object() {
        if value.is_null() {
            return;
        }
        *node = Value::Object(Map::new());
    }
    if let Some(map) = node.as_object_mut() {
        if value.is_null() {
            map.remove(last);
        } else {
            map.insert(last.clone(), value);
        }
    }
}

/// Drop nulls and empty objects so absent data stays absent.
pub(super) fn prune(node: &mut Value) {
    if let Value::Object(map) = node {
        for child in map.values_mut() {
            prune(child);
        }
        map.retain(|_, child| non_empty(child.clone()).is_some());
    }
}
