//! Persistence-backed observable container.
//!
//! A [`CachedWatcher<T, S>`] is a [`Watcher<T>`] whose value survives
//! restarts: construction kicks off an asynchronous read-through from a
//! [`StoreHandle`], and every accepted change writes through to the store in
//! the background. The in-memory value is always authoritative — persistence
//! failures are logged, recorded in
//! [`last_cache_error`](CachedWatcher::last_cache_error), and never roll back
//! or block a change.
//!
//! Values cross the store boundary through a [`CacheCodec`]. For types that
//! convert to and from [`StoreValue`] directly, [`PrimitiveCodec`] is the
//! default.

use std::{
  cell::{Cell, RefCell},
  rc::Rc,
  time::Duration,
};

use crate::{
  scheduler::Scheduler,
  store::{StoreError, StoreHandle, StoreValue},
  subscription::Subscription,
  watcher::{DebounceHandle, WatchHandle, Watcher},
};

/// Translates values of `T` to and from the store's primitive set.
///
/// `encode` may fail (a value the store cannot express); `decode` is lenient
/// and yields `None` for anything it does not recognize, in which case the
/// in-memory value is left alone.
pub trait CacheCodec<T> {
  fn encode(&self, value: &T) -> Result<StoreValue, StoreError>;

  fn decode(&self, value: StoreValue) -> Option<T>;
}

/// Codec for types with direct [`StoreValue`] conversions (bool, integers,
/// floats, strings, byte buffers). Encoding is infallible for these.
#[derive(Clone, Copy, Default)]
pub struct PrimitiveCodec;

impl<T> CacheCodec<T> for PrimitiveCodec
where
  T: Clone + Into<StoreValue> + TryFrom<StoreValue>,
{
  fn encode(&self, value: &T) -> Result<StoreValue, StoreError> { Ok(value.clone().into()) }

  fn decode(&self, value: StoreValue) -> Option<T> { T::try_from(value).ok() }
}

struct Core<T, S> {
  watcher: Watcher<T>,
  key: String,
  caching: Cell<bool>,
  initial: T,
  codec: Box<dyn CacheCodec<T>>,
  store: StoreHandle,
  scheduler: S,
  last_error: RefCell<Option<StoreError>>,
  // Monotonic per-container write sequence; a queued write-through that is no
  // longer the newest by the time it reaches the store is dropped.
  write_seq: Cell<u64>,
}

impl<T, S> Core<T, S> {
  fn record_error(&self, stage: &str, err: StoreError) {
    tracing::warn!(key = %self.key, stage, error = %err, "cache operation failed");
    *self.last_error.borrow_mut() = Some(err);
  }
}

/// A [`Watcher<T>`] with write-through persistence under a string key.
///
/// Clones share one container. The key defaults to the type name of `T`;
/// construct with an explicit key when two live containers share a value
/// type, otherwise the last writer wins.
pub struct CachedWatcher<T, S> {
  core: Rc<Core<T, S>>,
}

impl<T, S> Clone for CachedWatcher<T, S> {
  fn clone(&self) -> Self { Self { core: self.core.clone() } }
}

impl<T, S> CachedWatcher<T, S>
where
  T: Clone + 'static,
  S: Scheduler + 'static,
{
  /// A cached watcher keyed by `std::any::type_name::<T>()`, using
  /// [`PrimitiveCodec`]. Starts from `initial`, then asynchronously restores
  /// any persisted value without notifying.
  pub fn new(initial: T, store: StoreHandle, scheduler: S) -> Self
  where
    T: Into<StoreValue> + TryFrom<StoreValue>,
  {
    Self::with_key(std::any::type_name::<T>(), initial, store, scheduler)
  }

  /// Like [`new`](CachedWatcher::new) with an explicit key.
  pub fn with_key(key: impl Into<String>, initial: T, store: StoreHandle, scheduler: S) -> Self
  where
    T: Into<StoreValue> + TryFrom<StoreValue>,
  {
    Self::with_codec(key, initial, PrimitiveCodec, store, scheduler)
  }

  /// Full control: explicit key and codec.
  pub fn with_codec(
    key: impl Into<String>, initial: T, codec: impl CacheCodec<T> + 'static, store: StoreHandle,
    scheduler: S,
  ) -> Self {
    let core = Rc::new(Core {
      watcher: Watcher::new(initial.clone()),
      key: key.into(),
      caching: Cell::new(true),
      initial,
      codec: Box::new(codec),
      store,
      scheduler,
      last_error: RefCell::new(None),
      write_seq: Cell::new(0),
    });

    // Read-through: restore the persisted value, if any, as a silent state
    // restore. An absent key, undecodable shape, or unavailable store leaves
    // the initial value in place.
    let task_core = core.clone();
    core.scheduler.schedule(
      async move {
        let Some(store) = task_core.store.acquire().await else { return };
        match store.get(&task_core.key).await {
          Ok(Some(raw)) => {
            if let Some(value) = task_core.codec.decode(raw) {
              task_core.watcher.set_silent(value);
            }
          }
          Ok(None) => {}
          Err(err) => task_core.record_error("read", err),
        }
      },
      None,
    );

    Self { core }
  }

  /// Assign a new value; equality-gated exactly like [`Watcher::set`]. When
  /// the change is accepted and caching is on, the new value is written
  /// through to the store in the background.
  pub fn set(&self, value: T) -> bool
  where
    T: PartialEq,
  {
    let changed = self.core.watcher.set(value);
    if changed && self.core.caching.get() {
      self.persist_current();
    }
    changed
  }

  fn persist_current(&self) {
    let seq = self.core.write_seq.get() + 1;
    self.core.write_seq.set(seq);

    let raw = match self.core.watcher.read(|v| self.core.codec.encode(v)) {
      Ok(raw) => raw,
      Err(err) => {
        self.core.record_error("encode", err);
        return;
      }
    };

    let core = self.core.clone();
    self.core.scheduler.schedule(
      async move {
        let Some(store) = core.store.acquire().await else { return };
        if core.write_seq.get() != seq {
          // Superseded by a newer change while queued.
          return;
        }
        if let Err(err) = store.put(&core.key, raw).await {
          core.record_error("write", err);
        }
      },
      None,
    );
  }

  /// Resume write-through and notify listeners of the current value.
  pub fn start_caching(&self) {
    self.core.caching.set(true);
    self.core.watcher.refresh();
  }

  /// Suspend write-through (the persisted value goes stale) and notify.
  pub fn stop_caching(&self) {
    self.core.caching.set(false);
    self.core.watcher.refresh();
  }

  pub fn is_caching(&self) -> bool { self.core.caching.get() }

  pub fn key(&self) -> &str { &self.core.key }

  /// Reset to the initial value (a normal, notifying change that is not
  /// re-persisted) and delete the persisted entry. Any queued write-through
  /// is invalidated first so it cannot resurrect the deleted entry.
  pub fn delete_cache(&self)
  where
    T: PartialEq,
  {
    self.core.write_seq.set(self.core.write_seq.get() + 1);
    self.core.watcher.set(self.core.initial.clone());

    let core = self.core.clone();
    self.core.scheduler.schedule(
      async move {
        let Some(store) = core.store.acquire().await else { return };
        if let Err(err) = store.delete(&core.key).await {
          core.record_error("delete", err);
        }
      },
      None,
    );
  }

  /// The raw persisted primitive under this watcher's key, bypassing the
  /// codec. `None` when nothing is persisted.
  pub async fn cache(&self) -> Result<Option<StoreValue>, StoreError> {
    match self.core.store.acquire().await {
      Some(store) => store.get(&self.core.key).await,
      None => Err(StoreError::Unavailable("store not initialized".into())),
    }
  }

  /// Last error from the asynchronous persistence path, if any. In-memory
  /// state is unaffected by whatever is reported here.
  pub fn last_cache_error(&self) -> Option<StoreError> { self.core.last_error.borrow().clone() }

  // Plain observable surface, delegated to the inner watcher.

  pub fn get(&self) -> T { self.core.watcher.get() }

  pub fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R { self.core.watcher.read(f) }

  /// Unconditional notify; does not touch the store.
  pub fn refresh(&self) { self.core.watcher.refresh() }

  pub fn on_change(&self, cb: impl FnMut(&T) + 'static) -> WatchHandle<T> {
    self.core.watcher.on_change(cb)
  }

  pub fn debounce(
    &self, duration: Duration, cb: impl FnMut(T) + 'static,
  ) -> DebounceHandle<T>
  where
    S: Clone,
  {
    self.core.watcher.debounce(duration, &self.core.scheduler, cb)
  }

  pub fn dispose(&self) { self.core.watcher.dispose() }

  pub fn is_disposed(&self) -> bool { self.core.watcher.is_disposed() }
}

impl<T, S> crate::watcher::Listenable for CachedWatcher<T, S>
where
  T: Clone + 'static,
  S: Scheduler + 'static,
{
  fn add_listener(&self, mut cb: Box<dyn FnMut()>) -> Box<dyn Subscription> {
    Box::new(self.core.watcher.on_change(move |_| cb()))
  }
}

impl<T: std::fmt::Debug, S> std::fmt::Debug for CachedWatcher<T, S> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("CachedWatcher")
      .field("key", &self.core.key)
      .field("caching", &self.core.caching.get())
      .field("watcher", &self.core.watcher)
      .finish()
  }
}
