use std::ptr::{self, NonNull};

use crate::error::{ErrorKind, Result, raise_os};

/// The single contiguous range of memory an allocator manages. Mapped once at
/// initialization and never resized; growth only moves the program break
/// inside it.
#[derive(Debug)]
pub(crate) struct Region {
  start: NonNull<u8>,
  size: usize,
}

impl Region {
  /// Requests `size` bytes of anonymous, zero filled, read-write memory
  /// private to this process.
  pub fn map(size: usize) -> Result<Self> {
    // Memory protection. Read-Write only.
    let protection = libc::PROT_READ | libc::PROT_WRITE;

    // Not backed by any file and not shared with other processes.
    let flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;

    let address = unsafe { libc::mmap(ptr::null_mut(), size, protection, flags, -1, 0) };

    if address == libc::MAP_FAILED {
      return Err(raise_os(ErrorKind::HeapMapFailed, "init", errno()));
    }

    match NonNull::new(address.cast::<u8>()) {
      Some(start) => Ok(Self { start, size }),
      None => Err(raise_os(ErrorKind::HeapMapFailed, "init", libc::ENOMEM)),
    }
  }

  /// Returns the mapping to the OS.
  ///
  /// # Safety
  ///
  /// Nothing may touch the region afterwards. The caller drops it right away
  /// on success.
  pub unsafe fn unmap(&self) -> Result<()> {
    if unsafe { libc::munmap(self.start.as_ptr().cast(), self.size) } != 0 {
      return Err(raise_os(ErrorKind::HeapUnmapFailed, "destruct", errno()));
    }

    Ok(())
  }

  pub fn start(&self) -> *mut u8 {
    self.start.as_ptr()
  }

  pub fn size(&self) -> usize {
    self.size
  }

  /// Address one past the last mapped byte.
  pub fn end(&self) -> *mut u8 {
    self.start().wrapping_add(self.size)
  }

  pub fn contains(
    &self,
    address: *const u8,
  ) -> bool {
    let address = address as usize;
    let start = self.start() as usize;

    address >= start && address - start < self.size
  }
}

fn errno() -> i32 {
  std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}
