//! # fixheap - A Fixed Heap Memory Allocator Library
//!
//! This crate provides a general purpose **free-list allocator** that manages
//! one fixed-size heap region. The region is mapped from the OS once, when
//! the allocator is initialized; every later request is served from inside
//! it by moving a private program break, never by another system call.
//!
//! ## Overview
//!
//! ```text
//!   Managed Heap:
//!
//!   ┌──────────────────────────────────────────────────────────────────────┐
//!   │                       HEAP REGION (mmap'd once)                      │
//!   │                                                                      │
//!   │   ┌─────┬──────┬─────┬──────────┬─────┬───────────────────────────┐  │
//!   │   │ A1  │ free │ A2  │   free   │ A3  │         untouched         │  │
//!   │   └─────┴──────┴─────┴──────────┴─────┴───────────────────────────┘  │
//!   │   ▲                                   ▲                           ▲  │
//!   │   │                                   │                           │  │
//!   │  start                             Program                       end │
//!   │                                     Break                            │
//!   └──────────────────────────────────────────────────────────────────────┘
//!
//!   Free blocks are linked in address order. Freed neighbours merge.
//!   When nothing fits, the break moves forward and the new span is freed
//!   into the list.
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   fixheap
//!   ├── align      - Alignment macro (align!) and header unit arithmetic
//!   ├── allocator  - Allocator, the public, thread safe entry point
//!   ├── block      - Block header (internal)
//!   ├── brk        - Private program break over the heap region (internal)
//!   ├── config     - Method and Config
//!   ├── error      - AllocError, ErrorKind, last error and perror
//!   ├── freelist   - Next-fit free list with coalescing (internal)
//!   ├── lock       - Error checking pthread mutex (internal)
//!   └── region     - mmap / munmap of the heap region (internal)
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use fixheap::{Allocator, Method};
//!
//! let allocator = Allocator::new().unwrap();
//! allocator.init(Method::NextFit, 100_000).unwrap();
//!
//! let ptr = allocator.allocate(8).unwrap().cast::<u64>();
//!
//! unsafe {
//!     ptr.as_ptr().write(42);
//!     assert_eq!(ptr.as_ptr().read(), 42);
//!
//!     allocator.free(ptr.cast()).unwrap();
//! }
//!
//! allocator.destruct().unwrap();
//! ```
//!
//! A step by step walkthrough lives in `demos/heap.rs`
//! (`cargo run --example heap`).
//!
//! ## How It Works
//!
//! Every block starts with a header measured in header-sized units, so user
//! pointers always satisfy the platform's strictest alignment:
//!
//! ```text
//!   Single Allocation:
//!   ┌───────────────────────┬────────────────────────────────┐
//!   │    Block Header       │         User Data              │
//!   │  ┌─────────────────┐  │                                │
//!   │  │ next: index     │  │  ┌──────────────────────────┐  │
//!   │  │ size: N units   │  │  │  (N - 1) units usable    │  │
//!   │  └─────────────────┘  │  └──────────────────────────┘  │
//!   │      1 unit           │                                │
//!   └───────────────────────┴────────────────────────────────┘
//!                           ▲
//!                           └── Pointer returned to user
//! ```
//!
//! Allocation walks the circular free list starting where the last request
//! was satisfied (next fit) and carves the block off the *tail* of the first
//! free block that is large enough. Freeing inserts the block back in address
//! order and merges it with the free blocks right before and after it.
//!
//! ## Errors
//!
//! Every operation returns [`Result`]. Failures are also remembered per
//! thread, see [`last_error`] and [`perror`].
//!
//! ## Safety
//!
//! `free`, `realloc`, `usable_size`, `brk` and `sbrk` are `unsafe`: handing
//! them pointers this allocator did not produce, or moving the break under
//! live blocks, corrupts the heap without any error being reported.

mod align;
mod allocator;
mod block;
mod brk;
pub mod config;
pub mod error;
mod freelist;
mod lock;
mod region;

pub use allocator::{Allocator, HeapStats};
pub use block::UNIT;
pub use config::{Config, Method};
pub use error::{AllocError, ErrorKind, Result, clear_last_error, last_error, perror};
