//! Rebuild gating: deciding when a change notification becomes a rebuild.
//!
//! UI bindings rarely want every notification. [`RebuildGate`] implements
//! the two suppression mechanisms, an optional predicate and an optional
//! throttle window. Three binding builders apply it to different source
//! shapes:
//!
//! - [`ValueWatch`]: one [`Watcher<T>`] with a value-aware predicate over
//!   the previous and current values.
//! - [`SourceWatch`]: one [`Listenable`], value-agnostic.
//! - [`MultiWatch`]: several optional [`Listenable`] sources funnelled
//!   through a single shared gate, with live source-list swapping.
//!
//! Every bind returns a handle whose teardown removes exactly the listeners
//! it attached.

use std::{
  cell::RefCell,
  rc::Rc,
  time::{Duration, Instant},
};

use smallvec::SmallVec;

use crate::{
  rc::MutRc,
  subscription::Subscription,
  watcher::{Listenable, Watcher},
};

/// Throttle state shared by all bindings.
///
/// With no threshold every call fires. With one, the first call always fires
/// (a fresh binding never waits) and later calls fire only once strictly more
/// than the threshold has elapsed since the last fire.
pub struct RebuildGate {
  threshold: Option<Duration>,
  last_fire: Option<Instant>,
}

impl RebuildGate {
  pub fn new(threshold: Option<Duration>) -> Self { Self { threshold, last_fire: None } }

  /// Whether an event at `now` should fire; records `now` when it does.
  pub fn should_fire(&mut self, now: Instant) -> bool {
    let pass = match (self.threshold, self.last_fire) {
      (None, _) | (_, None) => true,
      (Some(threshold), Some(last)) => now.duration_since(last) > threshold,
    };
    if pass {
      self.last_fire = Some(now);
    }
    pass
  }
}

/// Teardown handle for a gate binding. Unbinding (or dropping) removes every
/// listener the bind attached; both are idempotent.
#[must_use]
pub struct Binding {
  subs: SmallVec<[Box<dyn Subscription>; 1]>,
}

impl Binding {
  fn single(sub: Box<dyn Subscription>) -> Self {
    let mut subs = SmallVec::new();
    subs.push(sub);
    Self { subs }
  }

  pub fn unbind(&mut self) {
    for sub in &mut self.subs {
      sub.unsubscribe();
    }
  }
}

impl Subscription for Binding {
  fn unsubscribe(&mut self) { self.unbind() }

  fn is_closed(&self) -> bool { self.subs.iter().all(|s| s.is_closed()) }
}

impl Drop for Binding {
  fn drop(&mut self) { self.unbind() }
}

/// Value-aware binding builder over one [`Watcher<T>`].
///
/// The predicate sees the value at the last fire (initially the value at
/// bind time) and the current value; the rebuild callback receives the
/// current value. The previous snapshot advances only when the binding
/// actually fires.
pub struct ValueWatch<T> {
  source: Watcher<T>,
  predicate: Option<Box<dyn Fn(&T, &T) -> bool>>,
  threshold: Option<Duration>,
}

impl<T: Clone + 'static> ValueWatch<T> {
  pub fn new(source: &Watcher<T>) -> Self {
    Self { source: source.clone(), predicate: None, threshold: None }
  }

  /// Fire only when `predicate(previous, current)` holds.
  pub fn when(mut self, predicate: impl Fn(&T, &T) -> bool + 'static) -> Self {
    self.predicate = Some(Box::new(predicate));
    self
  }

  /// Fire at most once per `threshold` window. The first fire is immediate.
  pub fn throttle(mut self, threshold: Duration) -> Self {
    self.threshold = Some(threshold);
    self
  }

  pub fn bind(self, mut rebuild: impl FnMut(&T) + 'static) -> Binding {
    let mut gate = RebuildGate::new(self.threshold);
    let predicate = self.predicate;
    let mut previous = self.source.get();
    let handle = self.source.on_change(move |current| {
      if let Some(p) = &predicate {
        if !p(&previous, current) {
          return;
        }
      }
      if !gate.should_fire(Instant::now()) {
        return;
      }
      previous = current.clone();
      rebuild(current);
    });
    Binding::single(Box::new(handle))
  }
}

/// Value-agnostic binding builder over any single [`Listenable`].
pub struct SourceWatch<'a, L: Listenable + ?Sized> {
  source: &'a L,
  predicate: Option<Box<dyn Fn() -> bool>>,
  threshold: Option<Duration>,
}

impl<'a, L: Listenable + ?Sized> SourceWatch<'a, L> {
  pub fn new(source: &'a L) -> Self { Self { source, predicate: None, threshold: None } }

  pub fn when(mut self, predicate: impl Fn() -> bool + 'static) -> Self {
    self.predicate = Some(Box::new(predicate));
    self
  }

  pub fn throttle(mut self, threshold: Duration) -> Self {
    self.threshold = Some(threshold);
    self
  }

  pub fn bind(self, mut rebuild: impl FnMut() + 'static) -> Binding {
    let mut gate = RebuildGate::new(self.threshold);
    let predicate = self.predicate;
    let sub = self.source.add_listener(Box::new(move || {
      if let Some(p) = &predicate {
        if !p() {
          return;
        }
      }
      if !gate.should_fire(Instant::now()) {
        return;
      }
      rebuild();
    }));
    Binding::single(sub)
  }
}

type SourceSlot = Option<Rc<dyn Listenable>>;

struct MultiState {
  sources: Vec<SourceSlot>,
  // Parallel to `sources`; None for empty slots.
  subs: Vec<Option<Box<dyn Subscription>>>,
  gate: RebuildGate,
}

/// Builder for [`MultiWatch`].
pub struct MultiWatchBuilder {
  sources: Vec<SourceSlot>,
  predicate: Option<Rc<dyn Fn() -> bool>>,
  threshold: Option<Duration>,
}

impl MultiWatchBuilder {
  pub fn when(mut self, predicate: impl Fn() -> bool + 'static) -> Self {
    self.predicate = Some(Rc::new(predicate));
    self
  }

  pub fn throttle(mut self, threshold: Duration) -> Self {
    self.threshold = Some(threshold);
    self
  }

  pub fn bind(self, rebuild: impl FnMut() + 'static) -> MultiWatch {
    let watch = MultiWatch {
      state: MutRc::own(MultiState {
        sources: Vec::new(),
        subs: Vec::new(),
        gate: RebuildGate::new(self.threshold),
      }),
      predicate: self.predicate,
      rebuild: Rc::new(RefCell::new(Box::new(rebuild))),
    };
    watch.set_sources(self.sources);
    watch
  }
}

/// N sources, one gate: a notification from any attached source is a single
/// event through the shared predicate and throttle window.
///
/// Empty (`None`) slots are skipped. [`set_sources`](MultiWatch::set_sources)
/// swaps the source list in place, re-subscribing only what actually changed.
/// Dropping the watch detaches every listener.
pub struct MultiWatch {
  state: MutRc<MultiState>,
  predicate: Option<Rc<dyn Fn() -> bool>>,
  rebuild: Rc<RefCell<Box<dyn FnMut()>>>,
}

impl MultiWatch {
  pub fn builder(sources: Vec<SourceSlot>) -> MultiWatchBuilder {
    MultiWatchBuilder { sources, predicate: None, threshold: None }
  }

  /// Replace the source list. Sources present in both lists (by identity)
  /// keep their existing listener; removed sources are detached and added
  /// ones attached. A retained source therefore never double-fires.
  pub fn set_sources(&self, sources: Vec<SourceSlot>) {
    let (old_sources, mut old_subs) = {
      let mut state = self.state.rc_deref_mut();
      (std::mem::take(&mut state.sources), std::mem::take(&mut state.subs))
    };

    let mut subs: Vec<Option<Box<dyn Subscription>>> = Vec::with_capacity(sources.len());
    for slot in &sources {
      let sub = match slot {
        None => None,
        Some(source) => {
          let retained = old_sources.iter().position(|old| {
            old
              .as_ref()
              .is_some_and(|o| Rc::ptr_eq(o, source))
          });
          match retained.and_then(|i| old_subs[i].take()) {
            Some(existing) => Some(existing),
            None => Some(self.attach(source)),
          }
        }
      };
      subs.push(sub);
    }

    for sub in old_subs.iter_mut().flatten() {
      sub.unsubscribe();
    }

    let mut state = self.state.rc_deref_mut();
    state.sources = sources;
    state.subs = subs;
  }

  fn attach(&self, source: &Rc<dyn Listenable>) -> Box<dyn Subscription> {
    let state = self.state.clone();
    let predicate = self.predicate.clone();
    let rebuild = self.rebuild.clone();
    source.add_listener(Box::new(move || {
      if let Some(p) = &predicate {
        if !p() {
          return;
        }
      }
      // Release the state borrow before running the callback, which may
      // re-enter (e.g. call set_sources).
      let fire = state.rc_deref_mut().gate.should_fire(Instant::now());
      if fire {
        (&mut *rebuild.borrow_mut())();
      }
    }))
  }

  /// Detach every listener. Idempotent; also runs on drop.
  pub fn unbind(&self) {
    let mut state = self.state.rc_deref_mut();
    for sub in state.subs.iter_mut().flatten() {
      sub.unsubscribe();
    }
    state.sources.clear();
    state.subs.clear();
  }

  pub fn source_count(&self) -> usize {
    self.state.rc_deref().sources.iter().filter(|s| s.is_some()).count()
  }
}

impl Drop for MultiWatch {
  fn drop(&mut self) { self.unbind() }
}
