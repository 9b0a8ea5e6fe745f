//! Multi-threaded integration tests: one allocator shared by many threads.

use std::{ptr::NonNull, sync::Arc, thread};

use fixheap::{Allocator, Config, Method, UNIT};
use proptest::prelude::*;

const HEAP_SIZE: usize = 8 * 1024 * 1024;

fn shared_allocator() -> Arc<Allocator> {
  let allocator = Allocator::new().unwrap();
  allocator.init_with(&Config::new(Method::NextFit, HEAP_SIZE)).unwrap();
  Arc::new(allocator)
}

/// One step of a worker: allocate `size` bytes, or free the live block at
/// `index % live.len()`.
#[derive(Debug, Clone, Copy)]
enum Op {
  Allocate(usize),
  Free(usize),
}

fn op() -> impl Strategy<Value = Op> {
  prop_oneof![
    (0usize..1024).prop_map(Op::Allocate),
    any::<usize>().prop_map(Op::Free),
  ]
}

/// Runs `ops` against `allocator`, filling every block with `tag` and
/// checking the fill before freeing it. Returns the blocks still live as
/// `(address, size)`.
fn run_worker(
  allocator: &Allocator,
  tag: u8,
  ops: &[Op],
) -> Vec<(usize, usize)> {
  let mut live: Vec<(usize, usize)> = Vec::new();

  for op in ops {
    match *op {
      Op::Allocate(size) => {
        let p = allocator.allocate(size).unwrap();
        unsafe { p.as_ptr().write_bytes(tag, size) };
        live.push((p.as_ptr() as usize, size));
      }
      Op::Free(index) if !live.is_empty() => {
        let (address, size) = live.swap_remove(index % live.len());
        let bytes = unsafe { std::slice::from_raw_parts(address as *const u8, size) };
        assert!(bytes.iter().all(|&b| b == tag), "block {address:#x} was overwritten");
        unsafe { allocator.free(NonNull::new(address as *mut u8).unwrap()).unwrap() };
      }
      Op::Free(_) => {}
    }
  }

  live
}

fn live_bytes(
  allocator: &Allocator,
  live: &[(usize, usize)],
) -> usize {
  live
    .iter()
    .map(|&(address, _)| {
      let p = NonNull::new(address as *mut u8).unwrap();
      unsafe { allocator.usable_size(p).unwrap() + UNIT }
    })
    .sum()
}

#[test]
fn test_multithreaded_alloc_free() {
  let allocator = shared_allocator();
  let num_threads = 8;
  let iterations = 1000;

  let handles: Vec<_> = (0..num_threads)
    .map(|t| {
      let allocator = Arc::clone(&allocator);
      thread::spawn(move || {
        let mut window: Vec<(usize, usize)> = Vec::new();
        for i in 0..iterations {
          let size = 8 + (i * 7 + t * 31) % 512;
          let p = allocator.allocate(size).unwrap();
          unsafe { p.as_ptr().write_bytes(t as u8, size) };
          window.push((p.as_ptr() as usize, size));

          if window.len() > 10 {
            let (address, _) = window.remove(0);
            unsafe { allocator.free(NonNull::new(address as *mut u8).unwrap()).unwrap() };
          }
        }
        window
      })
    })
    .collect();

  let mut live = Vec::new();
  for h in handles {
    live.extend(h.join().unwrap());
  }

  let stats = allocator.stats().unwrap();
  assert_eq!(stats.free_bytes + live_bytes(&allocator, &live), stats.reserved);
}

#[test]
fn test_cross_thread_free() {
  let allocator = shared_allocator();
  let (tx, rx) = std::sync::mpsc::channel::<Vec<usize>>();

  let producers: Vec<_> = (0..4)
    .map(|_| {
      let allocator = Arc::clone(&allocator);
      let tx = tx.clone();
      thread::spawn(move || {
        let items = (0..500)
          .map(|_| allocator.allocate(64).unwrap().as_ptr() as usize)
          .collect();
        tx.send(items).unwrap();
      })
    })
    .collect();

  drop(tx);

  let mut total = 0;
  for items in rx {
    total += items.len();
    for address in items {
      unsafe { allocator.free(NonNull::new(address as *mut u8).unwrap()).unwrap() };
    }
  }

  for p in producers {
    p.join().unwrap();
  }

  assert_eq!(total, 4 * 500);

  let stats = allocator.stats().unwrap();
  assert_eq!(stats.free_bytes, stats.reserved);
  assert_eq!(stats.free_blocks, 1);
}

proptest! {
  #![proptest_config(ProptestConfig::with_cases(16))]

  #[test]
  fn prop_conservation_under_contention(
    workloads in prop::collection::vec(prop::collection::vec(op(), 0..200), 1..6),
  ) {
    let allocator = shared_allocator();

    let handles: Vec<_> = workloads
      .into_iter()
      .enumerate()
      .map(|(t, ops)| {
        let allocator = Arc::clone(&allocator);
        thread::spawn(move || run_worker(&allocator, t as u8 + 1, &ops))
      })
      .collect();

    let mut live = Vec::new();
    for h in handles {
      live.extend(h.join().unwrap());
    }

    let stats = allocator.stats().unwrap();
    prop_assert_eq!(stats.free_bytes + live_bytes(&allocator, &live), stats.reserved);
    prop_assert!(stats.reserved <= HEAP_SIZE);
  }
}
