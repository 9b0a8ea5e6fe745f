//! Next-fit free list with address-ordered coalescing.
//!
//! Free blocks form a circular singly linked list sorted by address. The
//! sentinel (size 0, index [`SENTINEL`]) is always a member and, since it sorts
//! after every real block, it is the one place where the list wraps from its
//! highest block back to its lowest:
//!
//! ```text
//!        ┌─────────────────────────────────────────────────────┐
//!        ▼                                                     │
//!   ┌─────────┐     ┌─────────┐     ┌─────────┐     ┌──────────┴─┐
//!   │ free @3 │ ──▶ │ free @9 │ ──▶ │ free @40│ ──▶ │  sentinel  │
//!   └─────────┘     └─────────┘     └─────────┘     └────────────┘
//! ```
//!
//! The cursor remembers where the last request was satisfied so the next
//! search starts there instead of at the lowest block.

use std::ptr;

use crate::{
  block::{Header, SENTINEL, UNIT},
  brk::ProgramBreak,
};

/// Free-list state of one allocator. The blocks themselves live inside the
/// heap region, only the sentinel's link and the cursor live here.
#[derive(Debug)]
pub(crate) struct FreeList {
  sentinel_next: usize,
  cursor: Option<usize>,
}

impl FreeList {
  pub const fn new() -> Self {
    Self {
      sentinel_next: SENTINEL,
      cursor: None,
    }
  }

  /// Takes `units` units off the free list and returns the header index of
  /// the block, growing the heap through `heap` when nothing fits.
  ///
  /// Returns `None` when the heap cannot grow any further. The list is left
  /// exactly as it was in that case.
  pub fn allocate(
    &mut self,
    heap: &mut ProgramBreak,
    units: usize,
    min_growth_units: usize,
  ) -> Option<usize> {
    let mut prev = self.cursor_or_init();
    let mut p = self.next(heap, prev);

    loop {
      let size = self.size(heap, p);

      if size >= units {
        let block = if size == units {
          let next = self.next(heap, p);
          self.set_next(heap, prev, next);
          p
        } else {
          // Hand out the tail so the remainder keeps its place in the list.
          let remaining = size - units;
          self.set_size(heap, p, remaining);
          let block = p + remaining;
          unsafe { ptr::write(heap.header(block), Header::new(block, units)) };
          block
        };

        self.cursor = Some(prev);
        log::trace!("allocated {units} units at block {block}");
        return Some(block);
      }

      if Some(p) == self.cursor {
        p = self.grow(heap, units, min_growth_units)?;
      }

      prev = p;
      p = self.next(heap, p);
    }
  }

  /// Puts the block at header index `block` back on the list, merging it with
  /// whichever neighbours it touches.
  ///
  /// # Safety
  ///
  /// `block` must have come from [`Self::allocate`] and must not be on the
  /// list already.
  pub unsafe fn free(
    &mut self,
    heap: &mut ProgramBreak,
    block: usize,
  ) {
    let mut p = self.cursor_or_init();

    loop {
      let next = self.next(heap, p);

      if block > p && block < next {
        break;
      }

      // `p` is the highest node; `block` goes past the end or before the start.
      if p >= next && (block > p || block < next) {
        break;
      }

      p = next;
    }

    let next = self.next(heap, p);
    let size = self.size(heap, block);

    if block + size == next {
      let merged = size + self.size(heap, next);
      let after = self.next(heap, next);
      self.set_size(heap, block, merged);
      self.set_next(heap, block, after);
    } else {
      self.set_next(heap, block, next);
    }

    if p.wrapping_add(self.size(heap, p)) == block {
      let merged = self.size(heap, p) + self.size(heap, block);
      let after = self.next(heap, block);
      self.set_size(heap, p, merged);
      self.set_next(heap, p, after);
    } else {
      self.set_next(heap, p, block);
    }

    self.cursor = Some(p);
    log::trace!("freed block {block} after {p}");
  }

  /// Size in units of the block at `block`, allocated or free.
  pub fn block_size(
    &self,
    heap: &ProgramBreak,
    block: usize,
  ) -> usize {
    self.size(heap, block)
  }

  /// Visits every free block as `(header index, units)`, lowest address
  /// first. The sentinel is skipped.
  pub fn for_each(
    &self,
    heap: &ProgramBreak,
    mut f: impl FnMut(usize, usize),
  ) {
    let mut p = self.sentinel_next;
    while p != SENTINEL {
      f(p, self.size(heap, p));
      p = self.next(heap, p);
    }
  }

  /// Reserves at least `units` (and no less than `min_growth_units`) fresh
  /// units past the break and frees them into the list. Returns the cursor
  /// afterwards, from which the search resumes.
  fn grow(
    &mut self,
    heap: &mut ProgramBreak,
    units: usize,
    min_growth_units: usize,
  ) -> Option<usize> {
    let units = units.max(min_growth_units);

    // The break may have been moved to an odd address by hand.
    let padding = crate::align!(heap.reserved(), UNIT) - heap.reserved();
    let bytes = units.checked_mul(UNIT)?.checked_add(padding)?;
    let previous = heap.sbrk(isize::try_from(bytes).ok()?)?;

    let block = heap.unit_of(previous.wrapping_add(padding));
    unsafe {
      ptr::write(heap.header(block), Header::new(block, units));
      self.free(heap, block);
    }

    log::debug!("heap grew by {units} units at block {block}, break now {:?}", heap.current());
    self.cursor
  }

  fn cursor_or_init(&mut self) -> usize {
    match self.cursor {
      Some(cursor) => cursor,
      None => {
        self.sentinel_next = SENTINEL;
        self.cursor = Some(SENTINEL);
        SENTINEL
      }
    }
  }

  fn next(
    &self,
    heap: &ProgramBreak,
    block: usize,
  ) -> usize {
    if block == SENTINEL {
      return self.sentinel_next;
    }

    unsafe { (*heap.header(block)).next }
  }

  fn set_next(
    &mut self,
    heap: &mut ProgramBreak,
    block: usize,
    next: usize,
  ) {
    if block == SENTINEL {
      self.sentinel_next = next;
      return;
    }

    unsafe { (*heap.header(block)).next = next };
  }

  fn size(
    &self,
    heap: &ProgramBreak,
    block: usize,
  ) -> usize {
    if block == SENTINEL {
      return 0;
    }

    unsafe { (*heap.header(block)).size }
  }

  fn set_size(
    &mut self,
    heap: &mut ProgramBreak,
    block: usize,
    size: usize,
  ) {
    debug_assert_ne!(block, SENTINEL, "the sentinel never changes size");
    unsafe { (*heap.header(block)).size = size };
  }
}
