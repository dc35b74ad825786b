//! Task scheduling for the asynchronous edges of the crate.
//!
//! Containers themselves are synchronous; only cache reads/writes and
//! debounce timers leave the current call stack. A [`Scheduler`] turns a
//! future (plus an optional delay) into a running task and hands back a
//! [`TaskHandle`] that can cancel it. The default implementation rides on
//! `futures`' single-threaded executor; [`test_scheduler::TestScheduler`]
//! provides deterministic virtual time for tests.

pub mod test_scheduler;

use std::{cell::Cell, future::Future, pin::Pin, rc::Rc, task::Poll, time::Duration};

use futures::{
  executor::{LocalPool, LocalSpawner},
  task::LocalSpawnExt,
};
use pin_project_lite::pin_project;

use crate::subscription::Subscription;

/// Schedules futures on a single cooperative execution context.
pub trait Scheduler {
  /// Run `fut` after `delay` (immediately when `None`). The returned handle
  /// cancels the task: a task cancelled before its delay elapses never runs
  /// at all.
  fn schedule<F>(&self, fut: F, delay: Option<Duration>) -> TaskHandle
  where
    F: Future<Output = ()> + 'static;
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum TaskState {
  Pending,
  Cancelled,
  Finished,
}

/// Cancellation handle for a scheduled task.
///
/// Cloning shares the same task; `unsubscribe` on any clone cancels it.
#[derive(Clone, Debug)]
pub struct TaskHandle(Rc<Cell<TaskState>>);

impl TaskHandle {
  pub fn new() -> Self { Self(Rc::new(Cell::new(TaskState::Pending))) }

  /// A handle whose task already ran. Useful as an inert initial value.
  pub fn finished() -> Self { Self(Rc::new(Cell::new(TaskState::Finished))) }

  #[inline]
  pub fn is_cancelled(&self) -> bool { self.0.get() == TaskState::Cancelled }

  pub(crate) fn mark_finished(&self) {
    if self.0.get() == TaskState::Pending {
      self.0.set(TaskState::Finished);
    }
  }
}

impl Default for TaskHandle {
  fn default() -> Self { Self::new() }
}

impl Subscription for TaskHandle {
  fn unsubscribe(&mut self) {
    if self.0.get() == TaskState::Pending {
      self.0.set(TaskState::Cancelled);
    }
  }

  #[inline]
  fn is_closed(&self) -> bool { self.0.get() != TaskState::Pending }
}

pin_project! {
  /// Future combinator gating an inner future on its [`TaskHandle`].
  ///
  /// Each poll first consults the handle: once cancelled, the inner future
  /// is never polled again, so no partial work runs after cancellation.
  pub struct Cancellable<F> {
    #[pin]
    inner: F,
    handle: TaskHandle,
  }
}

impl<F> Cancellable<F> {
  pub fn new(inner: F, handle: TaskHandle) -> Self { Self { inner, handle } }
}

impl<F: Future<Output = ()>> Future for Cancellable<F> {
  type Output = ();

  fn poll(self: Pin<&mut Self>, cx: &mut std::task::Context<'_>) -> Poll<()> {
    let this = self.project();
    if this.handle.is_cancelled() {
      return Poll::Ready(());
    }
    match this.inner.poll(cx) {
      Poll::Ready(()) => {
        this.handle.mark_finished();
        Poll::Ready(())
      }
      Poll::Pending => Poll::Pending,
    }
  }
}

/// The default scheduler: a thin wrapper over `futures`' local spawner.
///
/// Obtain one from [`LocalSchedulerPool::spawner`] and drive the pool from
/// the host event loop.
#[derive(Clone)]
pub struct LocalScheduler(LocalSpawner);

impl Scheduler for LocalScheduler {
  fn schedule<F>(&self, fut: F, delay: Option<Duration>) -> TaskHandle
  where
    F: Future<Output = ()> + 'static,
  {
    let handle = TaskHandle::new();
    let task_handle = handle.clone();
    let task = Cancellable::new(
      async move {
        if let Some(delay) = delay {
          futures_time::task::sleep(delay.into()).await;
        }
        fut.await;
      },
      handle.clone(),
    );
    if self.0.spawn_local(task).is_err() {
      // Executor already shut down; the task can never run.
      tracing::warn!("scheduler executor is gone, dropping task");
      task_handle.mark_finished();
    }
    handle
  }
}

/// Owns the single-threaded executor behind [`LocalScheduler`].
pub struct LocalSchedulerPool(LocalPool);

impl LocalSchedulerPool {
  pub fn new() -> Self { Self(LocalPool::new()) }

  pub fn spawner(&self) -> LocalScheduler { LocalScheduler(self.0.spawner()) }

  /// Run until every spawned task (including pending timers) completes.
  pub fn run(&mut self) { self.0.run() }

  /// Run tasks that are ready right now, without waiting on timers.
  pub fn run_until_stalled(&mut self) { self.0.run_until_stalled() }
}

impl Default for LocalSchedulerPool {
  fn default() -> Self { Self::new() }
}
