//! Subscription handles.
//!
//! Every way of listening to a container returns a value implementing
//! [`Subscription`]: the capability to detach exactly that listener.
//! Handles are idempotent; unsubscribing twice is a no-op.

/// A capability to cancel an active subscription.
pub trait Subscription {
  /// Detach the listener and cancel any pending scheduled work tied to it.
  fn unsubscribe(&mut self);

  /// `true` once the subscription has been torn down, either explicitly or
  /// because its source was disposed.
  fn is_closed(&self) -> bool;

  /// Wrap this subscription in a guard that unsubscribes when dropped.
  fn unsubscribe_when_dropped(self) -> SubscriptionGuard<Self>
  where
    Self: Sized,
  {
    SubscriptionGuard::new(self)
  }
}

impl<T: ?Sized + Subscription> Subscription for Box<T> {
  #[inline]
  fn unsubscribe(&mut self) { (**self).unsubscribe() }

  #[inline]
  fn is_closed(&self) -> bool { (**self).is_closed() }
}

/// RAII wrapper: unsubscribes when dropped.
///
/// If you don't assign the guard to a variable it is dropped, and therefore
/// unsubscribed, immediately, which is probably not what you want.
#[derive(Debug)]
#[must_use]
pub struct SubscriptionGuard<T: Subscription>(Option<T>);

impl<T: Subscription> SubscriptionGuard<T> {
  pub fn new(subscription: T) -> Self { Self(Some(subscription)) }

  /// Consume the guard and return the raw subscription without
  /// unsubscribing.
  pub fn into_inner(mut self) -> T {
    // Only drop takes the slot, and drop has not run yet.
    self.0.take().unwrap()
  }
}

impl<T: Subscription> Drop for SubscriptionGuard<T> {
  fn drop(&mut self) {
    if let Some(mut sub) = self.0.take() {
      sub.unsubscribe();
    }
  }
}
