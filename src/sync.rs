//! A reader/writer lock without lock poisoning.
//!
//! [`std::sync::RwLock`] "poisons" itself when a thread panics while holding it, and every later
//! access has to deal with a [`PoisonError`][std::sync::PoisonError]. The containers in this crate
//! have no fallible operations, and a panic inside a [`Map::range`] callback (which runs under the
//! read lock) must not turn the map into a permanently failing object. So the poison flag is simply
//! ignored here. A panic in the middle of a mutation (say, in the iterator passed to
//! [`Map::merge`]) can leave that mutation partially applied, but the data is never structurally
//! broken.
//!
//! [`Map::range`]: crate::Map::range
//! [`Map::merge`]: crate::Map::merge

use std::{
    ops::{Deref, DerefMut},
    sync,
};

pub(crate) struct RwLock<T: ?Sized> {
    inner: sync::RwLock<T>,
}

impl<T> RwLock<T> {
    pub(crate) const fn new(t: T) -> RwLock<T> {
        Self {
            inner: sync::RwLock::new(t),
        }
    }

    pub(crate) fn into_inner(self) -> T {
        match self.inner.into_inner() {
            Ok(inner) => inner,
            Err(poison) => poison.into_inner(),
        }
    }
}

impl<T: ?Sized> RwLock<T> {
    pub(crate) fn read(&self) -> RwLockReadGuard<'_, T> {
        let guard = match self.inner.read() {
            Ok(guard) => guard,
            Err(poison) => poison.into_inner(),
        };
        RwLockReadGuard { inner: guard }
    }

    /// Acquires the read lock if that is possible without blocking.
    pub(crate) fn try_read(&self) -> Option<RwLockReadGuard<'_, T>> {
        let guard = match self.inner.try_read() {
            Ok(guard) => guard,
            Err(sync::TryLockError::Poisoned(poison)) => poison.into_inner(),
            Err(sync::TryLockError::WouldBlock) => return None,
        };
        Some(RwLockReadGuard { inner: guard })
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, T> {
        let guard = match self.inner.write() {
            Ok(guard) => guard,
            Err(poison) => poison.into_inner(),
        };
        RwLockWriteGuard { inner: guard }
    }

    pub(crate) fn get_mut(&mut self) -> &mut T {
        match self.inner.get_mut() {
            Ok(t) => t,
            Err(poison) => poison.into_inner(),
        }
    }
}

pub(crate) struct RwLockReadGuard<'a, T: ?Sized + 'a> {
    inner: sync::RwLockReadGuard<'a, T>,
}

impl<'a, T: ?Sized> Deref for RwLockReadGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

pub(crate) struct RwLockWriteGuard<'a, T: ?Sized + 'a> {
    inner: sync::RwLockWriteGuard<'a, T>,
}

impl<'a, T: ?Sized> Deref for RwLockWriteGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<'a, T: ?Sized> DerefMut for RwLockWriteGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};

    use super::*;

    #[test]
    fn panic_does_not_poison() {
        let lock = RwLock::new(1);
        catch_unwind(AssertUnwindSafe(|| {
            let mut guard = lock.write();
            *guard = 2;
            resume_unwind(Box::new("writer panic"));
        }))
        .unwrap_err();

        assert_eq!(*lock.read(), 2);
        *lock.write() = 3;
        assert_eq!(lock.into_inner(), 3);
    }
}
