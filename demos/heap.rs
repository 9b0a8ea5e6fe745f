use std::{io::Read, ptr::NonNull};

use fixheap::{Allocator, Config, perror};

/// Waits until the user presses ENTER.
/// Handy for inspecting the process with `pmap` or `gdb` between steps.
fn block_until_enter_pressed() {
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

/// Prints the allocator's program break and free list summary.
fn print_heap(
  allocator: &Allocator,
  label: &str,
) {
  let brk = unsafe { allocator.sbrk(0) };
  match (brk, allocator.stats()) {
    (Ok(brk), Ok(stats)) => println!(
      "[{}] break = {:?}, reserved = {} / {} bytes, free = {} bytes in {} block(s)",
      label, brk, stats.reserved, stats.heap_size, stats.free_bytes, stats.free_blocks
    ),
    _ => perror("stats: "),
  }
}

fn print_alloc(
  nbytes: usize,
  address: NonNull<u8>,
) {
  println!("Allocated {} bytes, address = {:?}", nbytes, address);
}

fn main() {
  // Heap size and growth quantum can be tuned through the environment.
  let config = Config::from_env();

  let allocator = match Allocator::new() {
    Ok(allocator) => allocator,
    Err(_) => return perror(""),
  };

  if allocator.init_with(&config).is_err() {
    return perror("Initialisation failed for heap: ");
  }

  print_heap(&allocator, "start");
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 1) Allocate a u32. The first request grows the break by one quantum.
  // --------------------------------------------------------------------
  let Ok(first) = allocator.allocate(size_of::<u32>()) else {
    return perror("allocate: ");
  };
  println!("\n[1] Allocate u32");
  print_alloc(size_of::<u32>(), first);

  unsafe {
    let first_ptr = first.cast::<u32>().as_ptr();
    first_ptr.write(0xDEADBEEF);
    println!("[1] Value written to first block = 0x{:X}", first_ptr.read());
  }
  print_heap(&allocator, "1");
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 2) Allocate 12 zeroed bytes with calloc.
  // --------------------------------------------------------------------
  let Ok(second) = allocator.calloc(12, 1) else {
    return perror("calloc: ");
  };
  println!("\n[2] calloc [u8; 12]");
  print_alloc(12, second);
  print_heap(&allocator, "2");
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 3) Free the first block and ask for the same size again: the freed
  //    block comes straight back.
  // --------------------------------------------------------------------
  unsafe {
    if allocator.free(first).is_err() {
      return perror("free: ");
    }
  }
  let Ok(third) = allocator.allocate(size_of::<u32>()) else {
    return perror("allocate: ");
  };
  println!("\n[3] Free first block, allocate u32 again");
  print_alloc(size_of::<u32>(), third);
  println!(
    "[3] third == first? {}",
    if third == first {
      "Yes, it reused the freed block"
    } else {
      "No, it allocated somewhere else"
    }
  );
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 4) Grow the second block past its usable size with realloc.
  // --------------------------------------------------------------------
  let Ok(fourth) = (unsafe { allocator.realloc(second, 4096) }) else {
    return perror("realloc: ");
  };
  println!("\n[4] realloc second block to 4096 bytes");
  print_alloc(4096, fourth);
  print_heap(&allocator, "4");
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 5) Ask for more than the whole heap. This fails and the error can be
  //    printed after the fact.
  // --------------------------------------------------------------------
  println!("\n[5] Allocate {} bytes", config.heap_size * 2);
  if allocator.allocate(config.heap_size * 2).is_err() {
    perror("[5] ");
  }
  print_heap(&allocator, "5");

  // --------------------------------------------------------------------
  // 6) Give the heap back to the OS.
  // --------------------------------------------------------------------
  if allocator.destruct().is_err() {
    return perror("destruct: ");
  }
  println!("\n[6] Heap unmapped.");
}
