//! Error values returned by every allocator operation.
//!
//! Failures travel back to the caller as [`AllocError`]. Each raised error is
//! also remembered per thread so the most recent failure can be inspected
//! after the fact with [`last_error`], or printed with [`perror`].

use std::{cell::Cell, fmt, io, panic::Location};

pub type Result<T> = std::result::Result<T, AllocError>;

/// Longest prefix [`AllocError::report`] keeps, in bytes.
pub const MAX_PREFIX_LENGTH: usize = 1023;

thread_local! {
  static LAST_ERROR: Cell<Option<AllocError>> = const { Cell::new(None) };
}

/// What went wrong. The numeric codes are stable, see [`ErrorKind::code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
  None,
  AllocationFailed,
  NullInstance,
  HeapAlreadyMapped,
  HeapMapFailed,
  HeapUnmapFailed,
  BadDealloc,
  LockInit,
  LockAcquire,
  LockRelease,
  BreakOutOfRange,
}

impl ErrorKind {
  pub fn code(self) -> i32 {
    match self {
      ErrorKind::None => 0,
      ErrorKind::AllocationFailed => 1,
      ErrorKind::NullInstance => 2,
      ErrorKind::HeapAlreadyMapped => 3,
      ErrorKind::HeapMapFailed => 4,
      ErrorKind::HeapUnmapFailed => 5,
      ErrorKind::BadDealloc => 6,
      ErrorKind::LockInit => 7,
      ErrorKind::LockAcquire => 8,
      ErrorKind::LockRelease => 9,
      ErrorKind::BreakOutOfRange => 10,
    }
  }

  pub fn message(self) -> &'static str {
    match self {
      ErrorKind::None => "",
      ErrorKind::AllocationFailed => "Unable to reserve memory",
      ErrorKind::NullInstance => "Allocator is not initialised",
      ErrorKind::HeapAlreadyMapped => "Managed heap has already been allocated",
      ErrorKind::HeapMapFailed => "Failed to map memory for heap",
      ErrorKind::HeapUnmapFailed => "Failed to unmap anonymous memory for heap",
      ErrorKind::BadDealloc => "Unable to destruct Allocator instance",
      ErrorKind::LockInit => "Failed to initialise allocator lock",
      ErrorKind::LockAcquire => "Failed to acquire allocator lock",
      ErrorKind::LockRelease => "Failed to release allocator lock",
      ErrorKind::BreakOutOfRange => "Program break outside of managed heap",
    }
  }
}

/// A failed allocator call.
///
/// Carries the [`ErrorKind`], the public operation that failed, the source
/// location where the failure was detected and, for errors coming from the
/// OS (mutex and mapping calls), the raw `errno` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocError {
  kind: ErrorKind,
  operation: &'static str,
  location: &'static Location<'static>,
  os_code: Option<i32>,
}

impl AllocError {
  pub fn kind(&self) -> ErrorKind {
    self.kind
  }

  pub fn code(&self) -> i32 {
    self.kind.code()
  }

  pub fn operation(&self) -> &'static str {
    self.operation
  }

  pub fn location(&self) -> &'static Location<'static> {
    self.location
  }

  pub fn os_code(&self) -> Option<i32> {
    self.os_code
  }

  /// Renders the error the way `perror(3)` would, behind `prefix`.
  ///
  /// ```text
  /// {prefix}{message}
  ///     at {operation}({file}:{line})
  /// ```
  pub fn report(
    &self,
    prefix: &str,
  ) -> String {
    format!(
      "{}{}\n\tat {}({}:{})",
      truncate(prefix, MAX_PREFIX_LENGTH),
      self,
      self.operation,
      self.location.file(),
      self.location.line()
    )
  }
}

impl fmt::Display for AllocError {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    f.write_str(self.kind.message())?;

    if let Some(code) = self.os_code {
      write!(f, ": {}", io::Error::from_raw_os_error(code))?;
    }

    Ok(())
  }
}

impl std::error::Error for AllocError {}

/// Builds an error at the caller's location and stores it as this thread's
/// last error.
#[track_caller]
pub(crate) fn raise(
  kind: ErrorKind,
  operation: &'static str,
) -> AllocError {
  record(AllocError {
    kind,
    operation,
    location: Location::caller(),
    os_code: None,
  })
}

/// Same as [`raise`] but keeps the OS error number around.
#[track_caller]
pub(crate) fn raise_os(
  kind: ErrorKind,
  operation: &'static str,
  os_code: i32,
) -> AllocError {
  record(AllocError {
    kind,
    operation,
    location: Location::caller(),
    os_code: Some(os_code),
  })
}

fn record(error: AllocError) -> AllocError {
  log::warn!(
    "{} failed: {} at {}:{}",
    error.operation,
    error,
    error.location.file(),
    error.location.line()
  );
  LAST_ERROR.with(|last| last.set(Some(error)));
  error
}

/// Most recent error raised on the calling thread. Successful calls never
/// reset it, so only return values say whether a call succeeded.
pub fn last_error() -> Option<AllocError> {
  LAST_ERROR.with(Cell::get)
}

pub fn clear_last_error() {
  LAST_ERROR.with(|last| last.set(None));
}

/// Prints this thread's last error to stderr behind `prefix`.
pub fn perror(prefix: &str) {
  match last_error() {
    Some(error) => eprintln!("{}", error.report(prefix)),
    None => eprintln!("{}", truncate(prefix, MAX_PREFIX_LENGTH)),
  }
}

fn truncate(
  s: &str,
  max: usize,
) -> &str {
  if s.len() <= max {
    return s;
  }

  let mut end = max;
  while !s.is_char_boundary(end) {
    end -= 1;
  }

  &s[..end]
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_codes_are_stable() {
    assert_eq!(ErrorKind::None.code(), 0);
    assert_eq!(ErrorKind::AllocationFailed.code(), 1);
    assert_eq!(ErrorKind::NullInstance.code(), 2);
    assert_eq!(ErrorKind::HeapAlreadyMapped.code(), 3);
    assert_eq!(ErrorKind::HeapMapFailed.code(), 4);
    assert_eq!(ErrorKind::HeapUnmapFailed.code(), 5);
    assert_eq!(ErrorKind::BadDealloc.code(), 6);
  }

  #[test]
  fn test_raise_records_last_error() {
    clear_last_error();
    assert!(last_error().is_none());

    let line = line!() + 1;
    let error = raise(ErrorKind::NullInstance, "allocate");

    let last = last_error().unwrap();
    assert_eq!(last, error);
    assert_eq!(last.kind(), ErrorKind::NullInstance);
    assert_eq!(last.operation(), "allocate");
    assert_eq!(last.location().line(), line);
    assert!(last.location().file().ends_with("error.rs"));
  }

  #[test]
  fn test_last_error_is_per_thread() {
    raise(ErrorKind::BadDealloc, "destruct");

    std::thread::spawn(|| assert!(last_error().is_none()))
      .join()
      .unwrap();

    assert_eq!(last_error().unwrap().kind(), ErrorKind::BadDealloc);
  }

  #[test]
  fn test_newer_error_overwrites() {
    raise(ErrorKind::HeapMapFailed, "init");
    raise(ErrorKind::AllocationFailed, "allocate");

    assert_eq!(last_error().unwrap().kind(), ErrorKind::AllocationFailed);
  }

  #[test]
  fn test_report_format() {
    let error = raise(ErrorKind::HeapAlreadyMapped, "init");
    let report = error.report("Test: ");

    assert!(report.starts_with("Test: Managed heap has already been allocated\n\tat init("));
    assert!(report.ends_with(&format!(":{})", error.location().line())));
  }

  #[test]
  fn test_os_code_in_message() {
    let error = raise_os(ErrorKind::LockAcquire, "free", libc::EDEADLK);

    assert_eq!(error.os_code(), Some(libc::EDEADLK));
    assert!(error.to_string().starts_with("Failed to acquire allocator lock: "));
  }

  #[test]
  fn test_prefix_truncation() {
    let long = "x".repeat(4096);
    let report = raise(ErrorKind::BadDealloc, "destruct").report(&long);

    let prefix_len = report.find("Unable").unwrap();
    assert_eq!(prefix_len, MAX_PREFIX_LENGTH);
  }
}
