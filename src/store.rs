//! The asynchronous key-value storage seam.
//!
//! The observable layer does not implement persistence itself. It talks to a
//! [`KeyValueStore`], an async keyed backend restricted to the closed
//! [`StoreValue`] primitive set. [`StoreHandle`] wraps a backend factory and
//! performs the lazy, memoized, single-flight initialization that cached
//! watchers share.
//!
//! Persistence is best-effort. A backend that fails to open degrades every
//! cache operation to a no-op instead of failing watcher construction, and
//! the in-memory value always stays authoritative.

pub mod memory;

use std::{
  cell::{Cell, RefCell},
  collections::BTreeMap,
  rc::Rc,
};

use futures::future::{FutureExt, LocalBoxFuture, Shared};
use once_cell::unsync::OnceCell;
use thiserror::Error;

/// The closed set of shapes a store can persist.
///
/// Everything a cache codec produces is one of these; the type system takes
/// the place of a runtime "is this a primitive?" check. Collections compose
/// recursively.
#[derive(Clone, Debug, PartialEq)]
pub enum StoreValue {
  Bool(bool),
  Int(i64),
  Float(f64),
  Text(String),
  /// Arbitrary-precision integer, carried as base-10 digits (with optional
  /// leading `-`). A wire shape, not an arithmetic type.
  BigInt(String),
  /// Milliseconds since the Unix epoch.
  Timestamp(i64),
  Bytes(Vec<u8>),
  List(Vec<StoreValue>),
  /// Order-preserving set; writers are responsible for deduplication.
  Set(Vec<StoreValue>),
  Map(BTreeMap<String, StoreValue>),
}

impl StoreValue {
  pub fn timestamp_millis(millis: i64) -> Self { StoreValue::Timestamp(millis) }

  pub fn big_int(digits: impl Into<String>) -> Self { StoreValue::BigInt(digits.into()) }

  pub fn list<V: Into<StoreValue>>(items: impl IntoIterator<Item = V>) -> Self {
    StoreValue::List(items.into_iter().map(Into::into).collect())
  }

  /// Shape name used in diagnostics.
  pub fn kind(&self) -> &'static str {
    match self {
      StoreValue::Bool(_) => "bool",
      StoreValue::Int(_) => "int",
      StoreValue::Float(_) => "float",
      StoreValue::Text(_) => "text",
      StoreValue::BigInt(_) => "bigint",
      StoreValue::Timestamp(_) => "timestamp",
      StoreValue::Bytes(_) => "bytes",
      StoreValue::List(_) => "list",
      StoreValue::Set(_) => "set",
      StoreValue::Map(_) => "map",
    }
  }
}

macro_rules! impl_store_value_conversions {
  ($($variant:ident => $ty:ty),* $(,)?) => {
    $(
      impl From<$ty> for StoreValue {
        fn from(v: $ty) -> Self { StoreValue::$variant(v.into()) }
      }

      impl TryFrom<StoreValue> for $ty {
        type Error = StoreError;

        fn try_from(v: StoreValue) -> Result<Self, StoreError> {
          match v {
            StoreValue::$variant(inner) => inner.try_into().map_err(|_| {
              StoreError::UnsupportedValueType { reason: concat!("out of range for ", stringify!($ty)) }
            }),
            other => Err(StoreError::UnsupportedValueType { reason: other.kind() }),
          }
        }
      }
    )*
  };
}

impl_store_value_conversions! {
  Bool => bool,
  Int => i64,
  Float => f64,
  Text => String,
  Bytes => Vec<u8>,
}

impl From<i32> for StoreValue {
  fn from(v: i32) -> Self { StoreValue::Int(v as i64) }
}

impl TryFrom<StoreValue> for i32 {
  type Error = StoreError;

  fn try_from(v: StoreValue) -> Result<Self, StoreError> {
    i64::try_from(v)?
      .try_into()
      .map_err(|_| StoreError::UnsupportedValueType { reason: "out of range for i32" })
  }
}

impl From<&str> for StoreValue {
  fn from(v: &str) -> Self { StoreValue::Text(v.to_owned()) }
}

/// Errors produced by the persistence path. Never fatal to the in-memory
/// container: they are reported and the cache degrades.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum StoreError {
  /// A codec or backend was handed a shape it cannot express or persist.
  #[error("value shape not supported by the store: {reason}")]
  UnsupportedValueType { reason: &'static str },

  /// The backend failed to open; cache operations are no-ops until a retry.
  #[error("storage backend unavailable: {0}")]
  Unavailable(String),

  /// Any other backend failure (I/O, corruption, quota).
  #[error("storage backend failure: {0}")]
  Backend(String),
}

/// An asynchronous, keyed storage backend.
///
/// All operations are object-safe and single-threaded; implementations back
/// onto whatever the host platform offers (preference stores, embedded KV
/// databases). Internal durability is the backend's concern, not this
/// crate's.
pub trait KeyValueStore {
  fn get(&self, key: &str) -> LocalBoxFuture<'_, Result<Option<StoreValue>, StoreError>>;

  fn put(&self, key: &str, value: StoreValue) -> LocalBoxFuture<'_, Result<(), StoreError>>;

  fn delete(&self, key: &str) -> LocalBoxFuture<'_, Result<(), StoreError>>;

  /// Remove every entry. Destructive and global to the backend; the
  /// `delete_all_caches` equivalent.
  fn clear(&self) -> LocalBoxFuture<'_, Result<(), StoreError>>;
}

type StoreRc = Rc<dyn KeyValueStore>;
type StoreFactory = Box<dyn Fn() -> LocalBoxFuture<'static, Result<StoreRc, StoreError>>>;
type InitFuture = Shared<LocalBoxFuture<'static, Result<StoreRc, StoreError>>>;

struct HandleInner {
  factory: Option<StoreFactory>,
  store: OnceCell<StoreRc>,
  inflight: RefCell<Option<InitFuture>>,
  failed: Cell<bool>,
}

/// Explicitly constructed, shared client for one storage backend.
///
/// Opening the backend is lazy, asynchronous, and single-flight: the first
/// [`acquire`](StoreHandle::acquire) runs the factory, concurrent callers
/// await the same in-flight future, and the opened client is memoized for
/// the life of the handle. A failed open is remembered — later acquires
/// yield `None` (cache operations silently degrade) until
/// [`retry`](StoreHandle::retry).
///
/// Cached watchers sharing persisted state share one handle; the handle is
/// the unit that replaces a process-wide implicit global.
#[derive(Clone)]
pub struct StoreHandle {
  inner: Rc<HandleInner>,
}

impl StoreHandle {
  /// A handle that opens its backend on first use.
  pub fn new(
    factory: impl Fn() -> LocalBoxFuture<'static, Result<StoreRc, StoreError>> + 'static,
  ) -> Self {
    Self {
      inner: Rc::new(HandleInner {
        factory: Some(Box::new(factory)),
        store: OnceCell::new(),
        inflight: RefCell::new(None),
        failed: Cell::new(false),
      }),
    }
  }

  /// Wrap an already-open backend. Initialization is a no-op.
  pub fn with_store(store: impl KeyValueStore + 'static) -> Self {
    let cell = OnceCell::new();
    let _ = cell.set(Rc::new(store) as StoreRc);
    Self {
      inner: Rc::new(HandleInner {
        factory: None,
        store: cell,
        inflight: RefCell::new(None),
        failed: Cell::new(false),
      }),
    }
  }

  /// The opened backend, initializing it if necessary. `None` means the
  /// backend is unavailable and the caller should skip its cache operation.
  pub async fn acquire(&self) -> Option<StoreRc> {
    if let Some(store) = self.inner.store.get() {
      return Some(store.clone());
    }
    if self.inner.failed.get() {
      return None;
    }

    let init = {
      let mut inflight = self.inner.inflight.borrow_mut();
      match &*inflight {
        Some(fut) => fut.clone(),
        None => {
          let Some(factory) = &self.inner.factory else {
            // No factory and no store: a handle built from parts it lost.
            self.inner.failed.set(true);
            return None;
          };
          let fut = factory().shared();
          *inflight = Some(fut.clone());
          fut
        }
      }
    };

    match init.await {
      Ok(store) => {
        let _ = self.inner.store.set(store.clone());
        *self.inner.inflight.borrow_mut() = None;
        Some(store)
      }
      Err(err) => {
        tracing::warn!(error = %err, "key-value store failed to open; caching disabled");
        self.inner.failed.set(true);
        *self.inner.inflight.borrow_mut() = None;
        None
      }
    }
  }

  /// Whether the last open attempt failed.
  pub fn is_failed(&self) -> bool { self.inner.failed.get() }

  /// Forget a recorded failure so the next [`acquire`](StoreHandle::acquire)
  /// re-runs the factory.
  pub fn retry(&self) { self.inner.failed.set(false); }

  /// Clear the entire backend: every key, every watcher, irreversibly.
  pub async fn clear_all(&self) -> Result<(), StoreError> {
    match self.acquire().await {
      Some(store) => store.clear().await,
      None => Err(StoreError::Unavailable("store not initialized".into())),
    }
  }
}

#[cfg(test)]
mod tests {
  use std::future::ready;

  use futures::executor::block_on;

  use super::{memory::MemoryStore, *};

  #[test]
  fn conversions_round_trip() {
    assert_eq!(bool::try_from(StoreValue::from(true)), Ok(true));
    assert_eq!(i64::try_from(StoreValue::from(42i64)), Ok(42));
    assert_eq!(i32::try_from(StoreValue::from(7i32)), Ok(7));
    assert_eq!(String::try_from(StoreValue::from("hi")), Ok("hi".to_owned()));
    assert_eq!(
      Vec::<u8>::try_from(StoreValue::from(vec![1u8, 2])),
      Ok(vec![1, 2])
    );
  }

  #[test]
  fn mismatched_shape_is_rejected() {
    let err = bool::try_from(StoreValue::Int(1)).unwrap_err();
    assert!(matches!(err, StoreError::UnsupportedValueType { reason: "int" }));
  }

  #[test]
  fn list_constructor_converts_elementwise() {
    let v = StoreValue::list(["a", "b"]);
    assert_eq!(
      v,
      StoreValue::List(vec![StoreValue::Text("a".into()), StoreValue::Text("b".into())])
    );
  }

  #[test]
  fn acquire_initializes_once() {
    let opens = Rc::new(Cell::new(0));
    let o = opens.clone();
    let handle = StoreHandle::new(move || {
      o.set(o.get() + 1);
      let store: StoreRc = Rc::new(MemoryStore::new());
      ready(Ok(store)).boxed_local()
    });

    block_on(async {
      let first = handle.acquire().await;
      let second = handle.acquire().await;
      assert!(first.is_some());
      assert!(second.is_some());
    });
    assert_eq!(opens.get(), 1);
  }

  #[test]
  fn concurrent_first_acquires_share_one_open() {
    let opens = Rc::new(Cell::new(0));
    let o = opens.clone();
    let handle = StoreHandle::new(move || {
      o.set(o.get() + 1);
      let store: StoreRc = Rc::new(MemoryStore::new());
      ready(Ok(store)).boxed_local()
    });

    let a = handle.clone();
    let b = handle.clone();
    block_on(async move {
      let (ra, rb) = futures::join!(a.acquire(), b.acquire());
      assert!(ra.is_some() && rb.is_some());
    });
    assert_eq!(opens.get(), 1);
  }

  #[test]
  fn failed_open_degrades_until_retry() {
    let attempts = Rc::new(Cell::new(0));
    let a = attempts.clone();
    let handle = StoreHandle::new(move || {
      a.set(a.get() + 1);
      let result: Result<StoreRc, StoreError> =
        if a.get() == 1 { Err(StoreError::Unavailable("disk gone".into())) } else {
          Ok(Rc::new(MemoryStore::new()) as StoreRc)
        };
      ready(result).boxed_local()
    });

    block_on(async {
      assert!(handle.acquire().await.is_none());
      assert!(handle.is_failed());
      // Still failed: no new attempt without an explicit retry.
      assert!(handle.acquire().await.is_none());
      assert_eq!(attempts.get(), 1);

      handle.retry();
      assert!(handle.acquire().await.is_some());
    });
    assert_eq!(attempts.get(), 2);
  }

  #[test]
  fn clear_all_wipes_every_key() {
    let store = MemoryStore::new();
    let handle = StoreHandle::with_store(store.clone());

    block_on(async {
      let backend = handle.acquire().await.unwrap();
      backend.put("a", StoreValue::Int(1)).await.unwrap();
      backend.put("b", StoreValue::Int(2)).await.unwrap();
      handle.clear_all().await.unwrap();
    });
    assert_eq!(store.len(), 0);
  }
}
