pub use crate::{
  cached::{CacheCodec, CachedWatcher, PrimitiveCodec},
  gate::{Binding, MultiWatch, RebuildGate, SourceWatch, ValueWatch},
  rc::{MutRc, WeakRc},
  scheduler::{LocalScheduler, LocalSchedulerPool, Scheduler, TaskHandle},
  store::{memory::MemoryStore, KeyValueStore, StoreError, StoreHandle, StoreValue},
  subscription::{Subscription, SubscriptionGuard},
  watcher::{DebounceHandle, Listenable, WatchHandle, Watcher},
};
