//! Shared-ownership wrapper used across the crate.
//!
//! The whole crate runs on a single cooperative execution context, so shared
//! state lives behind `Rc<RefCell<_>>`. `MutRc` names that pattern once and
//! gives it a small, uniform API.

use std::{
  cell::{Ref, RefCell, RefMut},
  rc::{Rc, Weak},
};

#[derive(Default, Debug)]
pub struct MutRc<T>(Rc<RefCell<T>>);

/// Weak counterpart of [`MutRc`], used by subscription handles so that an
/// unsubscribe capability does not keep the container alive.
pub struct WeakRc<T>(Weak<RefCell<T>>);

impl<T> MutRc<T> {
  pub fn own(t: T) -> Self { Self(Rc::new(RefCell::new(t))) }

  #[inline]
  pub fn rc_deref(&self) -> Ref<'_, T> { self.0.borrow() }

  #[inline]
  pub fn rc_deref_mut(&self) -> RefMut<'_, T> { self.0.borrow_mut() }

  /// Mutable access that fails instead of panicking when the cell is already
  /// borrowed. Callers use this to detect re-entrant mutation and report it
  /// with a meaningful message.
  #[inline]
  pub fn try_rc_deref_mut(&self) -> Option<RefMut<'_, T>> { self.0.try_borrow_mut().ok() }

  #[inline]
  pub fn downgrade(&self) -> WeakRc<T> { WeakRc(Rc::downgrade(&self.0)) }

  #[inline]
  pub fn ptr_eq(&self, other: &Self) -> bool { Rc::ptr_eq(&self.0, &other.0) }
}

impl<T> WeakRc<T> {
  #[inline]
  pub fn upgrade(&self) -> Option<MutRc<T>> { self.0.upgrade().map(MutRc) }
}

impl<T> Clone for MutRc<T> {
  #[inline]
  fn clone(&self) -> Self { Self(self.0.clone()) }
}

impl<T> Clone for WeakRc<T> {
  #[inline]
  fn clone(&self) -> Self { Self(self.0.clone()) }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn shared_mutation_is_visible_through_clones() {
    let a = MutRc::own(1);
    let b = a.clone();
    *a.rc_deref_mut() = 5;
    assert_eq!(*b.rc_deref(), 5);
    assert!(a.ptr_eq(&b));
  }

  #[test]
  fn try_deref_mut_detects_active_borrow() {
    let a = MutRc::own(0);
    let guard = a.rc_deref_mut();
    assert!(a.try_rc_deref_mut().is_none());
    drop(guard);
    assert!(a.try_rc_deref_mut().is_some());
  }

  #[test]
  fn weak_does_not_keep_value_alive() {
    let weak = {
      let strong = MutRc::own(3);
      strong.downgrade()
    };
    assert!(weak.upgrade().is_none());
  }
}
