use std::mem;

/// Metadata in front of every block, free or allocated.
///
/// Blocks are addressed by their unit index inside the heap region, so `next`
/// is an index as well, not an address. `size` counts header-sized units and
/// includes the header itself. `next` only means something while the block
/// sits in the free list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C, align(16))]
pub(crate) struct Header {
  pub next: usize,
  pub size: usize,
}

impl Header {
  pub fn new(
    next: usize,
    size: usize,
  ) -> Self {
    Self { next, size }
  }
}

/// Size of one header unit in bytes. Every block spans a whole number of
/// units and user pointers are always unit aligned.
pub const UNIT: usize = mem::size_of::<Header>();

/// Index of the zero-sized sentinel. It lives outside the region and sorts
/// after every real block, which makes it the wrap-around point of the
/// address-ordered free list.
pub(crate) const SENTINEL: usize = usize::MAX;
