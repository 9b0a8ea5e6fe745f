use std::ptr::NonNull;

use crate::{
  block::{Header, UNIT},
  region::Region,
};

/// A private program break over a mapped [`Region`].
///
/// ```text
///   start                      current                         end
///     ┌──────────────────────────┬──────────────────────────────┐
///     │  free-listed / in use    │          untouched           │
///     └──────────────────────────┴──────────────────────────────┘
/// ```
///
/// Everything below the break belongs to some block. Everything at or above
/// it has never been handed to the free list. The cursor only ever moves
/// inside `[start, end]`.
#[derive(Debug)]
pub(crate) struct ProgramBreak {
  region: Region,
  current: usize,
}

impl ProgramBreak {
  pub fn new(region: Region) -> Self {
    Self { region, current: 0 }
  }

  pub fn region(&self) -> &Region {
    &self.region
  }

  pub fn into_region(self) -> Region {
    self.region
  }

  /// Current break as an address.
  pub fn current(&self) -> *mut u8 {
    self.region.start().wrapping_add(self.current)
  }

  /// Bytes between the start of the region and the break.
  pub fn reserved(&self) -> usize {
    self.current
  }

  /// Moves the break to `address`. Returns `false`, leaving the break where
  /// it was, when `address` falls outside the region.
  pub fn brk(
    &mut self,
    address: *mut u8,
  ) -> bool {
    if address < self.region.start() || address > self.region.end() {
      return false;
    }

    self.current = address as usize - self.region.start() as usize;
    true
  }

  /// Moves the break by `delta` bytes and returns where it was before, which
  /// is where freshly reserved space begins.
  pub fn sbrk(
    &mut self,
    delta: isize,
  ) -> Option<*mut u8> {
    let previous = self.current();

    if delta == 0 {
      return Some(previous);
    }

    let next = (previous as usize).checked_add_signed(delta)?;

    if !self.brk(next as *mut u8) {
      return None;
    }

    Some(previous)
  }

  /// Pointer to the header at unit `index`.
  ///
  /// # Safety
  ///
  /// The header must lie entirely below the break.
  pub unsafe fn header(
    &self,
    index: usize,
  ) -> *mut Header {
    debug_assert!((index + 1) * UNIT <= self.current, "header {index} above the break");
    unsafe { self.region.start().add(index * UNIT).cast() }
  }

  /// Unit index of the address `address` points to. `address` must be inside
  /// the region.
  pub fn unit_of(
    &self,
    address: *const u8,
  ) -> usize {
    (address as usize - self.region.start() as usize) / UNIT
  }

  /// First byte after the header at unit `index`, the pointer users get.
  pub fn payload(
    &self,
    index: usize,
  ) -> NonNull<u8> {
    let address = self.region.start().wrapping_add((index + 1) * UNIT);
    // The region start is non-null and the offset stays inside the mapping.
    unsafe { NonNull::new_unchecked(address) }
  }

  /// Header index for a pointer previously produced by [`Self::payload`].
  pub fn block_of(
    &self,
    payload: NonNull<u8>,
  ) -> usize {
    self.unit_of(payload.as_ptr()) - 1
  }
}
