use std::{cell::UnsafeCell, mem};

use crate::error::{ErrorKind, Result, raise_os};

/// Error-checking `pthread` mutex.
///
/// Unlike [`std::sync::Mutex`], locking it twice from the same thread fails
/// with `EDEADLK` instead of hanging, and unlocking it from a thread that
/// doesn't own it fails with `EPERM`. The mutex is boxed so its address stays
/// put when the owner moves.
pub(crate) struct Lock {
  raw: Box<UnsafeCell<libc::pthread_mutex_t>>,
}

unsafe impl Send for Lock {}
unsafe impl Sync for Lock {}

impl Lock {
  #[track_caller]
  pub fn new() -> Result<Self> {
    let raw = Box::new(UnsafeCell::new(unsafe { mem::zeroed::<libc::pthread_mutex_t>() }));

    unsafe {
      let mut attr = mem::MaybeUninit::<libc::pthread_mutexattr_t>::uninit();

      let code = libc::pthread_mutexattr_init(attr.as_mut_ptr());
      if code != 0 {
        return Err(raise_os(ErrorKind::LockInit, "new", code));
      }

      let mut code = libc::pthread_mutexattr_settype(attr.as_mut_ptr(), libc::PTHREAD_MUTEX_ERRORCHECK);
      if code == 0 {
        code = libc::pthread_mutex_init(raw.get(), attr.as_ptr());
      }
      libc::pthread_mutexattr_destroy(attr.as_mut_ptr());

      if code != 0 {
        return Err(raise_os(ErrorKind::LockInit, "new", code));
      }
    }

    Ok(Self { raw })
  }

  /// Blocks until the lock is held. Fails without blocking when the calling
  /// thread already holds it.
  #[track_caller]
  pub fn acquire(
    &self,
    operation: &'static str,
  ) -> Result<LockGuard<'_>> {
    let code = unsafe { libc::pthread_mutex_lock(self.raw.get()) };
    if code != 0 {
      return Err(raise_os(ErrorKind::LockAcquire, operation, code));
    }

    Ok(LockGuard {
      lock: self,
      operation,
      held: true,
    })
  }

  fn unlock(&self) -> i32 {
    unsafe { libc::pthread_mutex_unlock(self.raw.get()) }
  }
}

impl Drop for Lock {
  fn drop(&mut self) {
    unsafe { libc::pthread_mutex_destroy(self.raw.get()) };
  }
}

/// Held lock. Released by [`LockGuard::release`], which reports failures, or
/// on drop for early returns.
pub(crate) struct LockGuard<'a> {
  lock: &'a Lock,
  operation: &'static str,
  held: bool,
}

impl LockGuard<'_> {
  /// Releases the lock. Work done while holding it stays committed even if
  /// this fails.
  #[track_caller]
  pub fn release(mut self) -> Result<()> {
    self.held = false;

    match self.lock.unlock() {
      0 => Ok(()),
      code => Err(raise_os(ErrorKind::LockRelease, self.operation, code)),
    }
  }
}

impl Drop for LockGuard<'_> {
  fn drop(&mut self) {
    if !self.held {
      return;
    }

    let code = self.lock.unlock();
    if code != 0 {
      log::error!(
        "{}: failed to release allocator lock: {}",
        self.operation,
        std::io::Error::from_raw_os_error(code)
      );
    }
  }
}

#[cfg(test)]
mod tests {
  use std::{
    sync::Arc,
    sync::atomic::{AtomicUsize, Ordering},
    thread,
  };

  use super::*;

  #[test]
  fn test_acquire_release() {
    let lock = Lock::new().unwrap();

    let guard = lock.acquire("test").unwrap();
    guard.release().unwrap();

    let guard = lock.acquire("test").unwrap();
    drop(guard);

    lock.acquire("test").unwrap().release().unwrap();
  }

  #[test]
  fn test_relock_from_same_thread_is_reported() {
    let lock = Lock::new().unwrap();

    let guard = lock.acquire("outer").unwrap();
    let error = lock.acquire("inner").err().unwrap();

    assert_eq!(error.kind(), ErrorKind::LockAcquire);
    assert_eq!(error.operation(), "inner");
    assert_eq!(error.os_code(), Some(libc::EDEADLK));

    guard.release().unwrap();
  }

  #[test]
  fn test_serializes_threads() {
    let lock = Arc::new(Lock::new().unwrap());
    let inside = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..8)
      .map(|_| {
        let lock = Arc::clone(&lock);
        let inside = Arc::clone(&inside);
        thread::spawn(move || {
          for _ in 0..1000 {
            let guard = lock.acquire("test").unwrap();
            assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
            inside.fetch_sub(1, Ordering::SeqCst);
            guard.release().unwrap();
          }
        })
      })
      .collect();

    for h in handles {
      h.join().unwrap();
    }
  }
}
