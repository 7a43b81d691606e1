use std::{io::Read, ptr::NonNull};

use brkalloc::{Arena, Heap};

/// Waits until the user presses ENTER, but only with `--step`.
/// Useful to follow each step by hand, or to attach `gdb` and inspect the
/// arena while the walkthrough is paused.
fn block_until_enter_pressed(step: bool) {
  if !step {
    return;
  }
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

/// Prints where the break of the arena is and how far it moved.
fn print_program_break(
  label: &str,
  heap: &Heap<Arena>,
) {
  let arena = heap.program_break();
  println!(
    "[{}] break = {:?}, used = {} of {} bytes",
    label,
    arena.start().wrapping_add(arena.used()),
    arena.used(),
    arena.capacity(),
  );
}

/// Prints every block between the heap start and the break.
fn print_blocks(heap: &Heap<Arena>) {
  for block in heap.blocks() {
    println!(
      "    {:?}  capacity = {:>6}  size = {:>6}  {}",
      block.address,
      block.capacity,
      block.size,
      if block.free { "free" } else { "used" },
    );
  }
}

fn print_alloc(
  label: &str,
  size: usize,
  data: NonNull<u8>,
  heap: &Heap<Arena>,
) {
  println!(
    "\n{} {} bytes -> {:?} (usable {})",
    label,
    size,
    data,
    unsafe { heap.usable_size(data.as_ptr()) },
  );
}

fn main() -> brkalloc::Result<()> {
  let step = std::env::args().any(|arg| arg == "--step");

  // The heap gets a private 1 MiB region with its own break, so the walk
  // does not fight the process allocator over the real one.
  let mut heap = Heap::new(Arena::new(1 << 20));

  print_program_break("start", &heap);
  block_until_enter_pressed(step);

  // --------------------------------------------------------------------
  // 1) Three allocations grow the heap one block at a time.
  //    Sizes are rounded up to the word size.
  // --------------------------------------------------------------------
  let first = heap.malloc(4)?;
  print_alloc("[1] malloc", 4, first, &heap);
  let second = heap.malloc(100)?;
  print_alloc("[1] malloc", 100, second, &heap);
  let third = heap.malloc(32)?;
  print_alloc("[1] malloc", 32, third, &heap);

  unsafe { first.cast::<u32>().write(0xDEADBEEF) };
  println!("[1] Value written to first = 0x{:X}", unsafe {
    first.cast::<u32>().read()
  });

  print_program_break("after growth", &heap);
  print_blocks(&heap);
  block_until_enter_pressed(step);

  // --------------------------------------------------------------------
  // 2) Free the middle block. It lands on the free list; the break stays.
  // --------------------------------------------------------------------
  unsafe { heap.free(second.as_ptr()) };
  println!("\n[2] Freed {:?}", second);
  print_blocks(&heap);
  block_until_enter_pressed(step);

  // --------------------------------------------------------------------
  // 3) A small request reuses the free block and splits off the rest.
  // --------------------------------------------------------------------
  let reused = heap.malloc(16)?;
  print_alloc("[3] malloc", 16, reused, &heap);
  println!(
    "[3] reused == second? {}",
    if reused == second {
      "Yes, the free block was split"
    } else {
      "No, it allocated somewhere else"
    }
  );
  print_blocks(&heap);
  block_until_enter_pressed(step);

  // --------------------------------------------------------------------
  // 4) Freeing the neighbours coalesces everything back into one block.
  // --------------------------------------------------------------------
  unsafe {
    heap.free(first.as_ptr());
    heap.free(reused.as_ptr());
  }
  println!("\n[4] Freed first and reused: {:?}", heap);
  print_blocks(&heap);
  block_until_enter_pressed(step);

  // --------------------------------------------------------------------
  // 5) A large block at the end of the heap is given back to the arena
  //    as soon as it is freed.
  // --------------------------------------------------------------------
  let big = heap.malloc(64 * 1024)?;
  print_alloc("[5] malloc", 64 * 1024, big, &heap);
  print_program_break("after large alloc", &heap);

  unsafe { heap.free(big.as_ptr()) };
  print_program_break("after large free", &heap);
  block_until_enter_pressed(step);

  // --------------------------------------------------------------------
  // 6) End of the walk: the counters, as the exit report prints them.
  // --------------------------------------------------------------------
  unsafe { heap.free(third.as_ptr()) };
  println!("\n[6] Final report:\n{}", heap.stats());

  Ok(())
}
