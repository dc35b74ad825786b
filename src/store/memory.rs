//! In-memory [`KeyValueStore`] backend.
//!
//! The default backend for tests and for hosts without durable storage.
//! Operations complete on the first poll but still go through the async
//! interface, so callers exercise the same code paths as with a real
//! backend.

use std::collections::BTreeMap;

use futures::future::{FutureExt, LocalBoxFuture};

use super::{KeyValueStore, StoreError, StoreValue};
use crate::rc::MutRc;

type PutGuard = Box<dyn Fn(&str, &StoreValue) -> Result<(), StoreError>>;

/// Map-backed store. Clones share the same underlying map, which makes it
/// easy to simulate "restart the app, reopen the store" in tests.
#[derive(Clone, Default)]
pub struct MemoryStore {
  entries: MutRc<BTreeMap<String, StoreValue>>,
  put_guard: MutRc<Option<PutGuard>>,
}

impl MemoryStore {
  pub fn new() -> Self { Self::default() }

  /// Install a predicate that can veto writes. Used to simulate a backend
  /// rejecting shapes it cannot persist.
  pub fn with_put_guard(
    self,
    guard: impl Fn(&str, &StoreValue) -> Result<(), StoreError> + 'static,
  ) -> Self {
    *self.put_guard.rc_deref_mut() = Some(Box::new(guard));
    self
  }

  pub fn len(&self) -> usize { self.entries.rc_deref().len() }

  pub fn is_empty(&self) -> bool { self.entries.rc_deref().is_empty() }

  /// Synchronous peek, for assertions.
  pub fn peek(&self, key: &str) -> Option<StoreValue> { self.entries.rc_deref().get(key).cloned() }
}

impl KeyValueStore for MemoryStore {
  fn get(&self, key: &str) -> LocalBoxFuture<'_, Result<Option<StoreValue>, StoreError>> {
    let value = self.entries.rc_deref().get(key).cloned();
    async move { Ok(value) }.boxed_local()
  }

  fn put(&self, key: &str, value: StoreValue) -> LocalBoxFuture<'_, Result<(), StoreError>> {
    let result = match &*self.put_guard.rc_deref() {
      Some(guard) => guard(key, &value),
      None => Ok(()),
    };
    let entries = self.entries.clone();
    let key = key.to_owned();
    async move {
      result?;
      entries.rc_deref_mut().insert(key, value);
      Ok(())
    }
    .boxed_local()
  }

  fn delete(&self, key: &str) -> LocalBoxFuture<'_, Result<(), StoreError>> {
    let entries = self.entries.clone();
    let key = key.to_owned();
    async move {
      entries.rc_deref_mut().remove(&key);
      Ok(())
    }
    .boxed_local()
  }

  fn clear(&self) -> LocalBoxFuture<'_, Result<(), StoreError>> {
    let entries = self.entries.clone();
    async move {
      entries.rc_deref_mut().clear();
      Ok(())
    }
    .boxed_local()
  }
}
