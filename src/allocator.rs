use std::{cell::UnsafeCell, ptr, ptr::NonNull};

use crate::{
  align::units_for,
  block::UNIT,
  brk::ProgramBreak,
  config::{Config, Method},
  error::{ErrorKind, Result, raise},
  freelist::FreeList,
  lock::Lock,
  region::Region,
};

/// Snapshot of an allocator's heap, taken under its lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapStats {
  /// Bytes mapped for the heap.
  pub heap_size: usize,
  /// Bytes below the program break, handed to the free list at some point.
  pub reserved: usize,
  /// Bytes in free blocks, headers included.
  pub free_bytes: usize,
  /// Number of free blocks.
  pub free_blocks: usize,
}

/// General purpose allocator over one fixed heap region.
///
/// The region is mapped once by [`Allocator::init`]; after that the allocator
/// never asks the OS for memory again, it only moves its private program
/// break forward inside the region when the free list runs dry. Every public
/// call runs under a single per-instance lock, so one allocator can be shared
/// freely between threads.
///
/// ```text
///   ┌────────┬───────────┬────────┬─────────────────┬───────────────────┐
///   │ Header │   data    │ Header │      data       │     untouched     │
///   └────────┴───────────┴────────┴─────────────────┴───────────────────┘
///   ▲         ▲                                      ▲                   ▲
///   start     pointer returned to the user           break             end
/// ```
pub struct Allocator {
  lock: Lock,
  state: UnsafeCell<State>,
}

// All access to `state` happens while `lock` is held.
unsafe impl Send for Allocator {}
unsafe impl Sync for Allocator {}

#[derive(Debug)]
struct State {
  method: Method,
  min_growth_units: usize,
  heap: Option<ProgramBreak>,
  free: FreeList,
}

impl State {
  const fn empty() -> Self {
    Self {
      method: Method::NextFit,
      min_growth_units: 0,
      heap: None,
      free: FreeList::new(),
    }
  }

  #[track_caller]
  fn ensure_heap(
    &self,
    operation: &'static str,
  ) -> Result<()> {
    match self.heap {
      Some(_) => Ok(()),
      None => Err(raise(ErrorKind::NullInstance, operation)),
    }
  }

  fn allocate(
    &mut self,
    nbytes: usize,
    operation: &'static str,
  ) -> Result<NonNull<u8>> {
    let Some(heap) = self.heap.as_mut() else {
      return Err(raise(ErrorKind::NullInstance, operation));
    };

    let Some(units) = units_for(nbytes) else {
      return Err(raise(ErrorKind::AllocationFailed, operation));
    };

    let block = match self.method {
      Method::NextFit => self.free.allocate(heap, units, self.min_growth_units),
    };

    match block {
      Some(block) => Ok(heap.payload(block)),
      None => Err(raise(ErrorKind::AllocationFailed, operation)),
    }
  }

  /// # Safety
  ///
  /// `address` must be a live pointer returned by [`Self::allocate`].
  unsafe fn release(
    &mut self,
    address: NonNull<u8>,
    operation: &'static str,
  ) -> Result<()> {
    let Some(heap) = self.heap.as_mut() else {
      return Err(raise(ErrorKind::NullInstance, operation));
    };

    debug_assert!(
      is_payload(heap, address),
      "{operation}: {address:?} was not returned by this allocator"
    );

    let block = heap.block_of(address);
    unsafe { self.free.free(heap, block) };

    Ok(())
  }

  /// # Safety
  ///
  /// `address` must be a live pointer returned by [`Self::allocate`].
  unsafe fn usable_size(
    &self,
    address: NonNull<u8>,
    operation: &'static str,
  ) -> Result<usize> {
    let Some(heap) = self.heap.as_ref() else {
      return Err(raise(ErrorKind::NullInstance, operation));
    };

    let units = self.free.block_size(heap, heap.block_of(address));
    Ok((units - 1) * UNIT)
  }
}

/// Whether `address` could be a pointer handed out by the heap: unit aligned,
/// past the first header and below the break.
fn is_payload(
  heap: &ProgramBreak,
  address: NonNull<u8>,
) -> bool {
  let region = heap.region();
  let offset = (address.as_ptr() as usize).wrapping_sub(region.start() as usize);

  region.contains(address.as_ptr()) && offset >= UNIT && offset < heap.reserved() && offset % UNIT == 0
}

impl Allocator {
  /// Creates an allocator with no heap yet. Call [`Allocator::init`] before
  /// anything else.
  pub fn new() -> Result<Self> {
    Ok(Self {
      lock: Lock::new()?,
      state: UnsafeCell::new(State::empty()),
    })
  }

  /// Maps a heap of `heap_size` bytes. Fails with
  /// [`ErrorKind::HeapAlreadyMapped`] if this instance already has one; the
  /// existing heap is left alone in that case.
  ///
  /// The break grows by at least [`config::MIN_GROWTH_UNITS`] units at a
  /// time and never partially, so a heap smaller than that many
  /// [`UNIT`]s (16 KiB) cannot serve any allocation. Use
  /// [`Allocator::init_with`] with a smaller growth step for tiny heaps.
  ///
  /// [`config::MIN_GROWTH_UNITS`]: crate::config::MIN_GROWTH_UNITS
  pub fn init(
    &self,
    method: Method,
    heap_size: usize,
  ) -> Result<()> {
    self.init_with(&Config::new(method, heap_size))
  }

  pub fn init_with(
    &self,
    config: &Config,
  ) -> Result<()> {
    self.locked("init", |state| {
      if state.heap.is_some() {
        return Err(raise(ErrorKind::HeapAlreadyMapped, "init"));
      }

      let region = Region::map(config.heap_size)?;
      log::debug!(
        "mapped {} byte heap at {:?} ({:?})",
        region.size(),
        region.start(),
        config.method
      );

      *state = State {
        method: config.method,
        min_growth_units: config.min_growth_units.max(1),
        heap: Some(ProgramBreak::new(region)),
        free: FreeList::new(),
      };

      Ok(())
    })
  }

  /// Unmaps the heap. Every pointer handed out so far dangles afterwards.
  /// The instance goes back to its uninitialized state and may be
  /// initialized again.
  pub fn destruct(&self) -> Result<()> {
    self.locked("destruct", |state| {
      let Some(heap) = state.heap.as_ref() else {
        return Err(raise(ErrorKind::BadDealloc, "destruct"));
      };

      unsafe { heap.region().unmap()? };
      log::debug!("unmapped {} byte heap", heap.region().size());

      *state = State::empty();
      Ok(())
    })
  }

  /// Returns a unit aligned pointer to at least `nbytes` bytes inside the
  /// heap. Grows the break when no free block fits and fails with
  /// [`ErrorKind::AllocationFailed`] when the region is exhausted.
  pub fn allocate(
    &self,
    nbytes: usize,
  ) -> Result<NonNull<u8>> {
    self.locked("allocate", |state| state.allocate(nbytes, "allocate"))
  }

  /// Gives a block back to the heap, merging it with adjacent free blocks.
  ///
  /// # Safety
  ///
  /// `address` must have been returned by [`Allocator::allocate`],
  /// [`Allocator::calloc`] or [`Allocator::realloc`] on this instance and not
  /// freed since. Anything else silently corrupts the free list; debug builds
  /// catch pointers that are obviously outside the heap.
  pub unsafe fn free(
    &self,
    address: NonNull<u8>,
  ) -> Result<()> {
    self.locked("free", |state| unsafe { state.release(address, "free") })
  }

  /// Allocates `count * nbytes` zeroed bytes.
  pub fn calloc(
    &self,
    count: usize,
    nbytes: usize,
  ) -> Result<NonNull<u8>> {
    self.locked("calloc", |state| {
      state.ensure_heap("calloc")?;

      let Some(total) = count.checked_mul(nbytes) else {
        return Err(raise(ErrorKind::AllocationFailed, "calloc"));
      };

      let address = state.allocate(total, "calloc")?;
      unsafe { ptr::write_bytes(address.as_ptr(), 0, total) };

      Ok(address)
    })
  }

  /// Resizes the allocation at `address` to `nbytes`, keeping as much of its
  /// contents as fits. Requests that still fit the current block return
  /// `address` unchanged; otherwise the data moves to a new block and the old
  /// one is freed. On failure the original allocation is untouched.
  ///
  /// # Safety
  ///
  /// Same contract as [`Allocator::free`].
  pub unsafe fn realloc(
    &self,
    address: NonNull<u8>,
    nbytes: usize,
  ) -> Result<NonNull<u8>> {
    self.locked("realloc", |state| {
      let usable = unsafe { state.usable_size(address, "realloc")? };

      if nbytes <= usable {
        return Ok(address);
      }

      let moved = state.allocate(nbytes, "realloc")?;
      unsafe {
        ptr::copy_nonoverlapping(address.as_ptr(), moved.as_ptr(), usable.min(nbytes));
        state.release(address, "realloc")?;
      }

      Ok(moved)
    })
  }

  /// Bytes that can be written at `address`. At least what was requested.
  ///
  /// # Safety
  ///
  /// `address` must be a live allocation of this instance.
  pub unsafe fn usable_size(
    &self,
    address: NonNull<u8>,
  ) -> Result<usize> {
    self.locked("usable_size", |state| unsafe { state.usable_size(address, "usable_size") })
  }

  /// Moves the program break to `address`, which must lie inside the heap.
  ///
  /// # Safety
  ///
  /// Moving the break below memory that is free-listed or in use hands that
  /// memory out twice.
  pub unsafe fn brk(
    &self,
    address: *mut u8,
  ) -> Result<()> {
    self.locked("brk", |state| {
      let Some(heap) = state.heap.as_mut() else {
        return Err(raise(ErrorKind::NullInstance, "brk"));
      };

      if !heap.brk(address) {
        return Err(raise(ErrorKind::BreakOutOfRange, "brk"));
      }

      Ok(())
    })
  }

  /// Moves the program break by `delta` bytes and returns its previous
  /// value. `sbrk(0)` just reads the break.
  ///
  /// # Safety
  ///
  /// Same as [`Allocator::brk`] for negative deltas.
  pub unsafe fn sbrk(
    &self,
    delta: isize,
  ) -> Result<*mut u8> {
    self.locked("sbrk", |state| {
      let Some(heap) = state.heap.as_mut() else {
        return Err(raise(ErrorKind::NullInstance, "sbrk"));
      };

      heap
        .sbrk(delta)
        .ok_or_else(|| raise(ErrorKind::BreakOutOfRange, "sbrk"))
    })
  }

  pub fn stats(&self) -> Result<HeapStats> {
    self.locked("stats", |state| {
      let Some(heap) = state.heap.as_ref() else {
        return Err(raise(ErrorKind::NullInstance, "stats"));
      };

      let mut free_bytes = 0;
      let mut free_blocks = 0;
      state.free.for_each(heap, |_, units| {
        free_bytes += units * UNIT;
        free_blocks += 1;
      });

      Ok(HeapStats {
        heap_size: heap.region().size(),
        reserved: heap.reserved(),
        free_bytes,
        free_blocks,
      })
    })
  }

  /// Runs `f` with the lock held. A failed release is reported even when `f`
  /// succeeded, but whatever `f` did stays done.
  #[track_caller]
  fn locked<T>(
    &self,
    operation: &'static str,
    f: impl FnOnce(&mut State) -> Result<T>,
  ) -> Result<T> {
    let guard = self.lock.acquire(operation)?;
    let result = f(unsafe { &mut *self.state.get() });
    let released = guard.release();

    let value = result?;
    released?;
    Ok(value)
  }
}

impl Drop for Allocator {
  fn drop(&mut self) {
    if let Some(heap) = self.state.get_mut().heap.take() {
      let region = heap.into_region();
      if let Err(err) = unsafe { region.unmap() } {
        log::error!("leaking {} byte heap at {:?}: {err}", region.size(), region.start());
      }
    }
  }
}
