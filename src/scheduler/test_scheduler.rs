//! Virtual-time scheduler for deterministic tests.
//!
//! Time only advances when a test says so, which makes debounce windows and
//! cache write-through ordering reproducible. State is thread-local, so
//! tests stay isolated when the harness runs them in parallel.
//!
//! ```
//! use std::{cell::Cell, rc::Rc, time::Duration};
//!
//! use watchkit::scheduler::{test_scheduler::TestScheduler, Scheduler};
//!
//! TestScheduler::init();
//! let fired = Rc::new(Cell::new(false));
//! let f = fired.clone();
//! TestScheduler.schedule(async move { f.set(true) }, Some(Duration::from_millis(50)));
//!
//! TestScheduler::advance_by(Duration::from_millis(40));
//! assert!(!fired.get());
//! TestScheduler::advance_by(Duration::from_millis(10));
//! assert!(fired.get());
//! ```

use std::{
  cell::RefCell,
  cmp::Ordering,
  collections::BinaryHeap,
  future::Future,
  pin::Pin,
  task::{Context, Poll},
  time::Duration,
};

use super::{Scheduler, TaskHandle};
use crate::subscription::Subscription;

struct QueuedTask {
  due: Duration,
  id: usize,
  fut: Pin<Box<dyn Future<Output = ()>>>,
  handle: TaskHandle,
}

impl PartialEq for QueuedTask {
  fn eq(&self, other: &Self) -> bool { self.due == other.due && self.id == other.id }
}
impl Eq for QueuedTask {}
impl PartialOrd for QueuedTask {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> { Some(self.cmp(other)) }
}
impl Ord for QueuedTask {
  // Min-heap: earliest due time first, FIFO by id within a tick.
  fn cmp(&self, other: &Self) -> Ordering {
    other
      .due
      .cmp(&self.due)
      .then_with(|| other.id.cmp(&self.id))
  }
}

#[derive(Default)]
struct State {
  now: Duration,
  queue: BinaryHeap<QueuedTask>,
  next_id: usize,
  initialized: bool,
}

thread_local! {
  static STATE: RefCell<State> = RefCell::new(State::default());
}

/// Zero-sized virtual-time scheduler; every instance on a thread shares the
/// same clock and task queue.
#[derive(Clone, Copy, Default)]
pub struct TestScheduler;

impl TestScheduler {
  /// Reset the clock to zero and drop any queued tasks. Call at the start of
  /// each test; the other methods panic without it.
  pub fn init() {
    STATE.with(|s| {
      let mut s = s.borrow_mut();
      s.now = Duration::ZERO;
      s.queue.clear();
      s.next_id = 0;
      s.initialized = true;
    });
  }

  fn ensure_initialized() {
    STATE.with(|s| {
      assert!(
        s.borrow().initialized,
        "TestScheduler::init() must be called before using the scheduler"
      );
    });
  }

  /// Current virtual time.
  pub fn now() -> Duration {
    Self::ensure_initialized();
    STATE.with(|s| s.borrow().now)
  }

  /// Number of queued (not yet executed) tasks.
  pub fn pending_count() -> usize {
    Self::ensure_initialized();
    STATE.with(|s| s.borrow().queue.len())
  }

  /// Advance the clock by `duration`, executing every task that falls due.
  pub fn advance_by(duration: Duration) {
    Self::ensure_initialized();
    let target = STATE.with(|s| s.borrow().now + duration);
    Self::run_due(Some(target));
    STATE.with(|s| s.borrow_mut().now = target);
  }

  /// Execute all queued tasks, advancing the clock to each one's due time.
  pub fn flush() {
    Self::ensure_initialized();
    Self::run_due(None);
  }

  fn run_due(target: Option<Duration>) {
    loop {
      let task = STATE.with(|s| {
        let mut s = s.borrow_mut();
        let beyond = s
          .queue
          .peek()
          .map_or(true, |t| target.is_some_and(|limit| t.due > limit));
        if beyond {
          return None;
        }
        let task = s.queue.pop().unwrap();
        s.now = task.due;
        Some(task)
      });

      let Some(mut task) = task else { break };
      if task.handle.is_closed() {
        continue;
      }

      let waker = futures::task::noop_waker();
      let mut cx = Context::from_waker(&waker);
      match task.fut.as_mut().poll(&mut cx) {
        Poll::Ready(()) => task.handle.mark_finished(),
        // Not ready on this tick: try again immediately, like a yield.
        Poll::Pending => STATE.with(|s| {
          let mut s = s.borrow_mut();
          let id = s.next_id;
          s.next_id += 1;
          let due = s.now;
          s.queue
            .push(QueuedTask { due, id, fut: task.fut, handle: task.handle });
        }),
      }
    }
  }
}

impl Scheduler for TestScheduler {
  fn schedule<F>(&self, fut: F, delay: Option<Duration>) -> TaskHandle
  where
    F: Future<Output = ()> + 'static,
  {
    Self::ensure_initialized();
    let handle = TaskHandle::new();
    STATE.with(|s| {
      let mut s = s.borrow_mut();
      let id = s.next_id;
      s.next_id += 1;
      let due = s.now + delay.unwrap_or(Duration::ZERO);
      s.queue.push(QueuedTask {
        due,
        id,
        fut: Box::pin(fut),
        handle: handle.clone(),
      });
    });
    handle
  }
}

#[cfg(test)]
mod tests {
  use std::{cell::Cell, cell::RefCell, rc::Rc};

  use super::*;

  #[test]
  fn immediate_and_delayed_ordering() {
    TestScheduler::init();
    let order = Rc::new(RefCell::new(vec![]));

    let o = order.clone();
    TestScheduler.schedule(async move { o.borrow_mut().push("immediate") }, None);
    let o = order.clone();
    TestScheduler.schedule(
      async move { o.borrow_mut().push("delayed") },
      Some(Duration::from_millis(100)),
    );

    assert_eq!(TestScheduler::pending_count(), 2);

    TestScheduler::advance_by(Duration::ZERO);
    assert_eq!(*order.borrow(), vec!["immediate"]);

    TestScheduler::advance_by(Duration::from_millis(100));
    assert_eq!(*order.borrow(), vec!["immediate", "delayed"]);
  }

  #[test]
  fn fifo_within_one_tick() {
    TestScheduler::init();
    let order = Rc::new(RefCell::new(vec![]));

    for i in 0..5 {
      let o = order.clone();
      TestScheduler.schedule(async move { o.borrow_mut().push(i) }, Some(Duration::from_millis(10)));
    }

    TestScheduler::advance_by(Duration::from_millis(10));
    assert_eq!(*order.borrow(), vec![0, 1, 2, 3, 4]);
  }

  #[test]
  fn cancelled_task_is_discarded_unrun() {
    TestScheduler::init();
    let fired = Rc::new(Cell::new(false));

    let f = fired.clone();
    let mut handle =
      TestScheduler.schedule(async move { f.set(true) }, Some(Duration::from_millis(20)));
    handle.unsubscribe();

    TestScheduler::advance_by(Duration::from_millis(50));
    assert!(!fired.get());
  }

  #[test]
  fn tasks_beyond_target_stay_queued() {
    TestScheduler::init();
    let hits = Rc::new(RefCell::new(vec![]));

    for ms in [50u64, 150] {
      let h = hits.clone();
      TestScheduler.schedule(
        async move { h.borrow_mut().push(ms) },
        Some(Duration::from_millis(ms)),
      );
    }

    TestScheduler::advance_by(Duration::from_millis(100));
    assert_eq!(*hits.borrow(), vec![50]);
    assert_eq!(TestScheduler::pending_count(), 1);

    TestScheduler::flush();
    assert_eq!(*hits.borrow(), vec![50, 150]);
  }

  #[test]
  fn clock_advances_cumulatively() {
    TestScheduler::init();
    TestScheduler::advance_by(Duration::from_millis(100));
    TestScheduler::advance_by(Duration::from_millis(50));
    assert_eq!(TestScheduler::now(), Duration::from_millis(150));
  }
}
