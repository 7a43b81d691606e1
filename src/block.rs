use core::{mem, ptr::NonNull};

use crate::{
  Pointer, align,
  align::WORD,
  brk::ProgramBreak,
  counters::{Counter, Counters},
  error::{AllocError, Result},
  freelist::FreeList,
};

/// Header written right before every payload.
///
/// ```text
///   ┌──────────────────────┬─────────────────────────────────┐
///   │        Block         │            payload              │
///   │  capacity: aligned   │  ◄──────── capacity ─────────►  │
///   │  size: requested     │  ◄── size ──►                   │
///   │  prev, next          │                                 │
///   └──────────────────────┴─────────────────────────────────┘
///                          ▲
///                          └── address handed to callers
/// ```
///
/// `size == 0` marks a free block. `prev`/`next` link the block into exactly
/// one circular list: an in-use block points at itself, a free block points
/// at its free list neighbours, where `None` stands for the list sentinel.
#[repr(C)]
pub(crate) struct Block {
  pub capacity: usize,
  pub size: usize,
  pub prev: Pointer<Block>,
  pub next: Pointer<Block>,
}

/// Bytes taken by [`Block`] in front of each payload.
pub(crate) const HEADER: usize = mem::size_of::<Block>();

const _: () = assert!(HEADER % WORD == 0);

impl Block {
  /// Payload address of `block`.
  #[inline]
  pub unsafe fn data(block: NonNull<Self>) -> NonNull<u8> {
    unsafe { block.cast::<u8>().add(HEADER) }
  }

  /// Inverse of [`Block::data`]. `data` must be an address previously
  /// returned by it.
  #[inline]
  pub unsafe fn from_data(data: NonNull<u8>) -> NonNull<Self> {
    unsafe { data.sub(HEADER).cast() }
  }

  /// First byte after the payload, which is where the next physical block
  /// (or the break) starts.
  #[inline]
  pub unsafe fn end(block: NonNull<Self>) -> *mut u8 {
    unsafe { Self::data(block).as_ptr().add(block.as_ref().capacity) }
  }

  #[inline]
  pub unsafe fn is_self_linked(block: NonNull<Self>) -> bool {
    unsafe {
      let header = block.as_ref();
      header.prev == Some(block) && header.next == Some(block)
    }
  }

  /// Whether `src` starts exactly where `dst` ends. This is about addresses
  /// only and says nothing about list order.
  #[inline]
  pub unsafe fn is_adjacent(
    dst: NonNull<Self>,
    src: NonNull<Self>,
  ) -> bool {
    unsafe { Self::end(dst) == src.as_ptr().cast() }
  }
}

/// Grows the heap by one block able to hold `size` bytes.
pub(crate) fn allocate<B: ProgramBreak>(
  brk: &mut B,
  counters: &mut Counters,
  size: usize,
) -> Result<NonNull<Block>> {
  let capacity = align::align(size).ok_or(AllocError::OutOfMemory)?;
  let allocated = capacity
    .checked_add(HEADER)
    .ok_or(AllocError::OutOfMemory)?;

  let block = brk
    .extend(allocated)
    .ok_or(AllocError::OutOfMemory)?
    .cast::<Block>();

  unsafe {
    block.write(Block {
      capacity,
      size,
      prev: Some(block),
      next: Some(block),
    });
  }

  counters[Counter::HeapSize] += allocated;
  counters[Counter::Blocks] += 1;
  counters[Counter::Grows] += 1;

  event!(trace, "grow: {allocated} bytes at {block:?}");

  Ok(block)
}

/// Gives `block` back to the operating system if it is the last block before
/// the break and its capacity is above `trim_threshold`.
pub(crate) unsafe fn release<B: ProgramBreak>(
  brk: &mut B,
  list: &mut FreeList,
  counters: &mut Counters,
  block: NonNull<Block>,
  trim_threshold: usize,
) -> bool {
  unsafe {
    let capacity = block.as_ref().capacity;
    let allocated = HEADER + capacity;

    if Block::end(block) != brk.current() || capacity <= trim_threshold {
      return false;
    }

    let listed = !Block::is_self_linked(block);
    detach(list, block);

    if !brk.shrink(allocated) {
      if listed {
        list.link(block);
      }
      return false;
    }

    counters[Counter::Blocks] -= 1;
    counters[Counter::Shrinks] += 1;
    counters[Counter::HeapSize] -= allocated;

    event!(trace, "shrink: {allocated} bytes at {block:?}");

    true
  }
}

/// Unlinks `block` from whatever list holds it and makes it self-linked.
pub(crate) unsafe fn detach(
  list: &mut FreeList,
  block: NonNull<Block>,
) -> NonNull<Block> {
  unsafe {
    let prev = block.as_ref().prev;
    let next = block.as_ref().next;

    list.set_next(prev, next);
    list.set_prev(next, prev);

    let header = &mut *block.as_ptr();
    header.prev = Some(block);
    header.next = Some(block);
  }

  block
}

/// Absorbs `src` into `dst` when `src` starts right where `dst` ends. `src`
/// must be the list successor of `dst`.
pub(crate) unsafe fn merge(
  list: &mut FreeList,
  counters: &mut Counters,
  dst: NonNull<Block>,
  src: NonNull<Block>,
) -> bool {
  unsafe {
    if !Block::is_adjacent(dst, src) {
      return false;
    }

    let next = src.as_ref().next;
    let absorbed = HEADER + src.as_ref().capacity;

    let header = &mut *dst.as_ptr();
    header.next = next;
    header.capacity += absorbed;
    list.set_prev(next, Some(dst));
  }

  counters[Counter::Blocks] -= 1;
  counters[Counter::Merges] += 1;

  event!(trace, "merge: {src:?} into {dst:?}");

  true
}

/// Hands `block` to an occupant of `size` bytes and, if the aligned leftover
/// can hold a header plus some payload, carves it into a new free block that
/// takes over `block`'s old list position successor.
pub(crate) unsafe fn split(
  list: &mut FreeList,
  counters: &mut Counters,
  block: NonNull<Block>,
  size: usize,
) -> NonNull<Block> {
  unsafe {
    let aligned = align!(size);
    let header = &mut *block.as_ptr();

    debug_assert!(header.capacity >= aligned);
    header.size = size;

    if header.capacity - aligned > HEADER {
      let fragment = Block::data(block).add(aligned).cast::<Block>();
      let next = header.next;

      fragment.write(Block {
        capacity: header.capacity - aligned - HEADER,
        size: 0,
        prev: Some(block),
        next,
      });

      header.capacity = aligned;
      header.next = Some(fragment);
      list.set_prev(next, Some(fragment));

      counters[Counter::Splits] += 1;
      counters[Counter::Blocks] += 1;

      event!(trace, "split: {block:?} keeps {aligned} bytes, {fragment:?} is free");
    }
  }

  block
}
