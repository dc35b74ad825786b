//! The core observable value container.
//!
//! A [`Watcher<T>`] wraps a value and notifies listeners when it changes.
//! Handles are cheap clones sharing one underlying container, so a watcher
//! can be captured by view-model code, bindings, and background tasks at the
//! same time.
//!
//! The setter is equality-gated: assigning a value equal to the current one
//! neither stores nor notifies. Code that mutates interior state through a
//! shared reference (a `Vec` edited in place, say) must call [`Watcher::refresh`]
//! or go through [`Watcher::update`] — identity-based change detection cannot
//! see in-place edits.
//!
//! # Disposal
//!
//! Disposing a watcher releases its listeners. Under safe mode (the default)
//! every later mutation or notification is a silent no-op; this protects
//! asynchronous callbacks that resolve after the owning UI element was torn
//! down. Constructing with safe mode off opts out of that protection.
//!
//! # Re-entrancy
//!
//! Listeners run synchronously against a snapshot of the listener list.
//! Subscribing or unsubscribing from inside a listener is fine and takes
//! effect from the next notification. Mutating the watcher from inside one
//! of its own listeners panics.

use std::{cell::Cell, cell::RefCell, rc::Rc, time::Duration};

use smallvec::SmallVec;

use crate::{
  rc::{MutRc, WeakRc},
  scheduler::{Scheduler, TaskHandle},
  subscription::Subscription,
};

type ListenerFn<T> = Rc<RefCell<Box<dyn FnMut(&T)>>>;

pub type ListenerId = usize;

struct Listener<T> {
  id: ListenerId,
  cb: ListenerFn<T>,
}

struct ListenerSet<T> {
  next_id: ListenerId,
  items: SmallVec<[Listener<T>; 1]>,
}

impl<T> Default for ListenerSet<T> {
  fn default() -> Self { Self { next_id: 0, items: SmallVec::new() } }
}

struct Flags {
  disposed: Cell<bool>,
  safe_mode: bool,
}

/// An observable value container.
pub struct Watcher<T> {
  value: MutRc<T>,
  listeners: MutRc<ListenerSet<T>>,
  flags: Rc<Flags>,
}

impl<T> Clone for Watcher<T> {
  fn clone(&self) -> Self {
    Self {
      value: self.value.clone(),
      listeners: self.listeners.clone(),
      flags: self.flags.clone(),
    }
  }
}

impl<T> From<T> for Watcher<T> {
  fn from(value: T) -> Self { Watcher::new(value) }
}

impl<T> Watcher<T> {
  /// A watcher with safe mode on: after [`dispose`](Watcher::dispose), every
  /// mutating operation becomes a silent no-op.
  pub fn new(value: T) -> Self { Self::with_safe_mode(value, true) }

  /// Explicit control over the disposal policy. With `safe_mode` off a
  /// disposed watcher keeps accepting mutations and notifications.
  pub fn with_safe_mode(value: T, safe_mode: bool) -> Self {
    Self {
      value: MutRc::own(value),
      listeners: MutRc::own(ListenerSet::default()),
      flags: Rc::new(Flags { disposed: Cell::new(false), safe_mode }),
    }
  }

  /// Current value, cloned out of the container.
  pub fn get(&self) -> T
  where
    T: Clone,
  {
    self.value.rc_deref().clone()
  }

  /// Borrow the current value without cloning.
  pub fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R { f(&self.value.rc_deref()) }

  /// Assign a new value. Skip-on-equal: when `value` compares equal to the
  /// current one nothing is stored and no notification fires. Returns whether
  /// a change was applied.
  ///
  /// Call sites that rely on a notification for every assignment should use
  /// [`refresh`](Watcher::refresh) or [`update_on_action`](Watcher::update_on_action)
  /// instead of assigning an equal value.
  pub fn set(&self, value: T) -> bool
  where
    T: PartialEq,
  {
    if self.is_inert() {
      return false;
    }
    {
      let Some(mut current) = self.value.try_rc_deref_mut() else {
        panic!("re-entrant Watcher mutation: set() called from inside a listener of the same watcher");
      };
      if *current == value {
        return false;
      }
      *current = value;
    }
    self.notify();
    true
  }

  /// Overwrite the current value without an equality check and without
  /// notifying. This is a state restore (e.g. applying a cached value), not
  /// an application-initiated change.
  pub fn set_silent(&self, value: T) {
    if self.is_inert() {
      return;
    }
    let Some(mut current) = self.value.try_rc_deref_mut() else {
      panic!("re-entrant Watcher mutation: set_silent() called from inside a listener of the same watcher");
    };
    *current = value;
  }

  /// Notify listeners unconditionally, bypassing the equality gate. The
  /// escape hatch for values whose interior state changed without identity
  /// replacement.
  pub fn refresh(&self) { self.notify() }

  /// Mutate the value in place, then notify once unconditionally. Returns
  /// `None` when the watcher is disposed under safe mode.
  pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
    if self.is_inert() {
      return None;
    }
    let result = {
      let Some(mut current) = self.value.try_rc_deref_mut() else {
        panic!("re-entrant Watcher mutation: update() called from inside a listener of the same watcher");
      };
      f(&mut current)
    };
    self.notify();
    Some(result)
  }

  /// Run `action`, then notify exactly once regardless of what the action
  /// did, and return its result. Batches several mutations behind a single
  /// notification.
  pub fn update_on_action<R>(&self, action: impl FnOnce() -> R) -> R {
    let result = action();
    self.notify();
    result
  }

  /// Register a listener invoked with a reference to the current value on
  /// every notification. The returned handle removes exactly this listener.
  pub fn on_change(&self, cb: impl FnMut(&T) + 'static) -> WatchHandle<T> {
    if self.is_inert() {
      return WatchHandle::closed();
    }
    let mut set = self.listeners.rc_deref_mut();
    let id = set.next_id;
    set.next_id += 1;
    set
      .items
      .push(Listener { id, cb: Rc::new(RefCell::new(Box::new(cb))) });
    WatchHandle { listeners: self.listeners.downgrade(), id, closed: Cell::new(false) }
  }

  /// Register a trailing-edge debounced listener: `cb` receives the latest
  /// value once `duration` has elapsed with no further notifications. Each
  /// new notification cancels the pending timer and starts a fresh one;
  /// unsubscribing cancels any pending timer, so no callback fires after
  /// teardown.
  pub fn debounce<S>(
    &self, duration: Duration, scheduler: &S, cb: impl FnMut(T) + 'static,
  ) -> DebounceHandle<T>
  where
    T: Clone + 'static,
    S: Scheduler + Clone + 'static,
  {
    let pending: MutRc<Option<TaskHandle>> = MutRc::own(None);
    let trailing: MutRc<Option<T>> = MutRc::own(None);
    let cb = MutRc::own(cb);
    let scheduler = scheduler.clone();
    let flags = self.flags.clone();

    let task_pending = pending.clone();
    let inner = self.on_change(move |value: &T| {
      *trailing.rc_deref_mut() = Some(value.clone());
      if let Some(mut stale) = task_pending.rc_deref_mut().take() {
        stale.unsubscribe();
      }
      let trailing = trailing.clone();
      let cb = cb.clone();
      let flags = flags.clone();
      let handle = scheduler.schedule(
        async move {
          // The watcher may be disposed between arming and firing; under
          // safe mode the late callback must stay silent.
          if flags.disposed.get() && flags.safe_mode {
            return;
          }
          if let Some(value) = trailing.rc_deref_mut().take() {
            (&mut *cb.rc_deref_mut())(value);
          }
        },
        Some(duration),
      );
      *task_pending.rc_deref_mut() = Some(handle);
    });

    DebounceHandle { inner, pending }
  }

  /// Dispose the watcher: release all listeners and (under safe mode) turn
  /// every later mutation into a no-op. Idempotent.
  pub fn dispose(&self) {
    if self.flags.disposed.get() {
      return;
    }
    self.flags.disposed.set(true);
    self.listeners.rc_deref_mut().items.clear();
  }

  pub fn is_disposed(&self) -> bool { self.flags.disposed.get() }

  /// Number of currently registered listeners.
  pub fn listener_count(&self) -> usize { self.listeners.rc_deref().items.len() }

  #[inline]
  fn is_inert(&self) -> bool { self.flags.disposed.get() && self.flags.safe_mode }

  fn notify(&self) {
    if self.is_inert() {
      return;
    }
    // Snapshot so listeners may subscribe/unsubscribe mid-broadcast; such
    // changes take effect from the next notification.
    let snapshot: SmallVec<[ListenerFn<T>; 1]> = self
      .listeners
      .rc_deref()
      .items
      .iter()
      .map(|l| l.cb.clone())
      .collect();
    let value = self.value.rc_deref();
    for cb in snapshot {
      (&mut *cb.borrow_mut())(&value);
    }
  }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Watcher<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Watcher")
      .field("value", &*self.value.rc_deref())
      .field("disposed", &self.flags.disposed.get())
      .field("listeners", &self.listener_count())
      .finish()
  }
}

/// Handle returned by [`Watcher::on_change`]; removes exactly the listener
/// it was created for. Holds only a weak reference, so an outstanding handle
/// never keeps a watcher alive.
pub struct WatchHandle<T> {
  listeners: WeakRc<ListenerSet<T>>,
  id: ListenerId,
  closed: Cell<bool>,
}

impl<T> WatchHandle<T> {
  fn closed() -> Self {
    Self { listeners: MutRc::own(ListenerSet::default()).downgrade(), id: 0, closed: Cell::new(true) }
  }
}

impl<T> Subscription for WatchHandle<T> {
  fn unsubscribe(&mut self) {
    if self.closed.get() {
      return;
    }
    self.closed.set(true);
    if let Some(listeners) = self.listeners.upgrade() {
      listeners
        .rc_deref_mut()
        .items
        .retain(|l| l.id != self.id);
    }
  }

  fn is_closed(&self) -> bool {
    if self.closed.get() {
      return true;
    }
    match self.listeners.upgrade() {
      Some(listeners) => !listeners.rc_deref().items.iter().any(|l| l.id == self.id),
      None => true,
    }
  }
}

/// Handle returned by [`Watcher::debounce`]: tears down the listener and
/// cancels any pending timer.
pub struct DebounceHandle<T> {
  inner: WatchHandle<T>,
  pending: MutRc<Option<TaskHandle>>,
}

impl<T> Subscription for DebounceHandle<T> {
  fn unsubscribe(&mut self) {
    self.inner.unsubscribe();
    if let Some(mut task) = self.pending.rc_deref_mut().take() {
      task.unsubscribe();
    }
  }

  fn is_closed(&self) -> bool { self.inner.is_closed() }
}

/// The change-source seam consumed by the gate bindings: anything that can
/// notify value-agnostic listeners. [`Watcher<T>`] implements it, and so can
/// host-framework sources (scroll controllers, focus nodes) via an adapter.
pub trait Listenable {
  /// Register a callback fired on every notification; the returned handle
  /// removes it.
  fn add_listener(&self, cb: Box<dyn FnMut()>) -> Box<dyn Subscription>;
}

impl<T: 'static> Listenable for Watcher<T> {
  fn add_listener(&self, mut cb: Box<dyn FnMut()>) -> Box<dyn Subscription> {
    Box::new(self.on_change(move |_| cb()))
  }
}

#[cfg(test)]
mod tests {
  use std::{cell::RefCell, rc::Rc};

  use super::*;
  use crate::scheduler::test_scheduler::TestScheduler;

  #[test]
  fn equality_gated_notification() {
    let w = Watcher::new(0);
    let fired = Rc::new(RefCell::new(vec![]));

    let f = fired.clone();
    let _h = w.on_change(move |v| f.borrow_mut().push(*v));

    assert!(!w.set(0));
    assert!(fired.borrow().is_empty());

    assert!(w.set(1));
    assert_eq!(*fired.borrow(), vec![1]);
    assert_eq!(w.get(), 1);

    assert!(!w.set(1));
    assert_eq!(*fired.borrow(), vec![1]);
  }

  #[test]
  fn refresh_bypasses_equality_gate() {
    let w = Watcher::new(vec![1, 2]);
    let count = Rc::new(Cell::new(0));

    let c = count.clone();
    let _h = w.on_change(move |_| c.set(c.get() + 1));

    w.refresh();
    w.refresh();
    assert_eq!(count.get(), 2);
  }

  #[test]
  fn set_silent_skips_notification() {
    let w = Watcher::new(1);
    let count = Rc::new(Cell::new(0));

    let c = count.clone();
    let _h = w.on_change(move |_| c.set(c.get() + 1));

    w.set_silent(9);
    assert_eq!(w.get(), 9);
    assert_eq!(count.get(), 0);
  }

  #[test]
  fn disposed_safe_watcher_is_inert() {
    let w = Watcher::new(0);
    let count = Rc::new(Cell::new(0));

    let c = count.clone();
    let _h = w.on_change(move |_| c.set(c.get() + 1));

    w.dispose();
    assert!(w.is_disposed());
    assert!(!w.set(5));
    w.refresh();
    w.set_silent(7);

    assert_eq!(w.get(), 0);
    assert_eq!(count.get(), 0);

    // Idempotent.
    w.dispose();
  }

  #[test]
  fn unsafe_mode_keeps_mutating_after_dispose() {
    let w = Watcher::with_safe_mode(0, false);
    w.dispose();
    assert!(w.set(5));
    assert_eq!(w.get(), 5);
  }

  #[test]
  fn update_mutates_in_place_and_notifies() {
    let w = Watcher::new(vec![1]);
    let seen = Rc::new(RefCell::new(vec![]));

    let s = seen.clone();
    let _h = w.on_change(move |v: &Vec<i32>| s.borrow_mut().push(v.len()));

    let len = w.update(|v| {
      v.push(2);
      v.len()
    });
    assert_eq!(len, Some(2));
    assert_eq!(*seen.borrow(), vec![2]);
  }

  #[test]
  fn update_on_action_notifies_exactly_once() {
    let w = Watcher::new(0);
    let count = Rc::new(Cell::new(0));

    let c = count.clone();
    let _h = w.on_change(move |_| c.set(c.get() + 1));

    let result = w.update_on_action(|| "done");
    assert_eq!(result, "done");
    assert_eq!(count.get(), 1);
  }

  #[test]
  fn unsubscribe_removes_exactly_one_listener() {
    let w = Watcher::new(0);
    let a = Rc::new(Cell::new(0));
    let b = Rc::new(Cell::new(0));

    let ca = a.clone();
    let mut ha = w.on_change(move |_| ca.set(ca.get() + 1));
    let cb = b.clone();
    let _hb = w.on_change(move |_| cb.set(cb.get() + 1));

    w.set(1);
    ha.unsubscribe();
    assert!(ha.is_closed());
    w.set(2);

    assert_eq!(a.get(), 1);
    assert_eq!(b.get(), 2);
  }

  #[test]
  fn listener_added_during_broadcast_sees_only_later_notifications() {
    let w = Watcher::new(0);
    let late_hits = Rc::new(Cell::new(0));
    let handle: Rc<RefCell<Option<WatchHandle<i32>>>> = Rc::new(RefCell::new(None));

    let w2 = w.clone();
    let late = late_hits.clone();
    let slot = handle.clone();
    let _h = w.on_change(move |v| {
      if *v == 1 && slot.borrow().is_none() {
        let late = late.clone();
        let h = w2.on_change(move |_| late.set(late.get() + 1));
        *slot.borrow_mut() = Some(h);
      }
    });

    w.set(1);
    assert_eq!(late_hits.get(), 0);
    w.set(2);
    assert_eq!(late_hits.get(), 1);
  }

  #[test]
  #[should_panic(expected = "re-entrant Watcher mutation")]
  fn reentrant_set_panics() {
    let w = Watcher::new(0);
    let w2 = w.clone();
    let _h = w.on_change(move |_| {
      w2.set(99);
    });
    w.set(1);
  }

  #[test]
  fn handle_outliving_watcher_is_closed() {
    let mut handle = {
      let w = Watcher::new(0);
      w.on_change(|_| {})
    };
    assert!(handle.is_closed());
    handle.unsubscribe();
  }

  #[test]
  fn debounce_fires_once_with_last_value() {
    TestScheduler::init();
    let w = Watcher::new(0);
    let seen = Rc::new(RefCell::new(vec![]));

    let s = seen.clone();
    let _h = w.debounce(Duration::from_millis(50), &TestScheduler, move |v| {
      s.borrow_mut().push(v)
    });

    // Notifications every 10ms for 200ms.
    for i in 1..=20 {
      w.set(i);
      TestScheduler::advance_by(Duration::from_millis(10));
    }
    assert!(seen.borrow().is_empty());

    TestScheduler::advance_by(Duration::from_millis(40));
    assert_eq!(*seen.borrow(), vec![20]);
  }

  #[test]
  fn debounce_spaced_notifications_fire_individually() {
    TestScheduler::init();
    let w = Watcher::new(0);
    let seen = Rc::new(RefCell::new(vec![]));

    let s = seen.clone();
    let _h = w.debounce(Duration::from_millis(50), &TestScheduler, move |v| {
      s.borrow_mut().push(v)
    });

    w.set(1);
    TestScheduler::advance_by(Duration::from_millis(60));
    w.set(2);
    TestScheduler::advance_by(Duration::from_millis(60));

    assert_eq!(*seen.borrow(), vec![1, 2]);
  }

  #[test]
  fn debounce_teardown_cancels_pending_timer() {
    TestScheduler::init();
    let w = Watcher::new(0);
    let seen = Rc::new(RefCell::new(vec![]));

    let s = seen.clone();
    let mut h = w.debounce(Duration::from_millis(50), &TestScheduler, move |v: i32| {
      s.borrow_mut().push(v)
    });

    w.set(1);
    h.unsubscribe();
    TestScheduler::advance_by(Duration::from_millis(100));

    assert!(seen.borrow().is_empty());
  }

  #[test]
  fn debounce_timer_armed_before_dispose_stays_silent() {
    TestScheduler::init();
    let w = Watcher::new(0);
    let seen = Rc::new(RefCell::new(vec![]));

    let s = seen.clone();
    let _h = w.debounce(Duration::from_millis(50), &TestScheduler, move |v: i32| {
      s.borrow_mut().push(v)
    });

    w.set(1);
    w.dispose();
    TestScheduler::advance_by(Duration::from_millis(100));

    assert!(seen.borrow().is_empty());
  }

  #[test]
  fn debounce_after_dispose_fires_without_safe_mode() {
    TestScheduler::init();
    let w = Watcher::with_safe_mode(0, false);
    let seen = Rc::new(RefCell::new(vec![]));

    let s = seen.clone();
    let _h = w.debounce(Duration::from_millis(50), &TestScheduler, move |v: i32| {
      s.borrow_mut().push(v)
    });

    w.set(1);
    w.dispose();
    TestScheduler::advance_by(Duration::from_millis(100));

    assert_eq!(*seen.borrow(), vec![1]);
  }

  #[test]
  fn guard_detaches_listener_when_dropped() {
    let w = Watcher::new(0);
    let count = Rc::new(Cell::new(0));

    let c = count.clone();
    {
      let _g = w
        .on_change(move |_| c.set(c.get() + 1))
        .unsubscribe_when_dropped();
      w.set(1);
    }
    assert_eq!(w.listener_count(), 0);

    w.set(2);
    assert_eq!(count.get(), 1);
  }

  #[test]
  fn listenable_adapter_fires_without_value() {
    let w = Watcher::new(0);
    let count = Rc::new(Cell::new(0));

    let c = count.clone();
    let mut sub = (&w as &dyn Listenable).add_listener(Box::new(move || c.set(c.get() + 1)));

    w.set(1);
    assert_eq!(count.get(), 1);
    sub.unsubscribe();
    w.set(2);
    assert_eq!(count.get(), 1);
  }
}
