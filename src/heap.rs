use core::{fmt, marker::PhantomData, ptr, ptr::NonNull};
use std::os::fd::AsFd;

use crate::{
  Pointer,
  align,
  block::{self, Block},
  brk::ProgramBreak,
  config::Config,
  counters::{Counter, Counters, FdWriter, Stats},
  error::{AllocError, Result},
  freelist::FreeList,
};

/// The allocator: a program break, the free list carved out of it and the
/// counters describing both.
///
/// ```text
///   heap start                                                     break
///   ┌──────┬───────┬──────┬───────────┬──────┬──────┬──────┬─────────┐
///   │ hdr  │ used  │ hdr  │   free    │ hdr  │ used │ hdr  │  free   │
///   └──────┴───────┴──────┴───────────┴──────┴──────┴──────┴─────────┘
///                     ▲                               ▲
///        free list ───┴───────────────────────────────┘
/// ```
///
/// Not thread safe: every method takes `&mut self` and the raw pointers it
/// holds keep it `!Send` and `!Sync`.
pub struct Heap<B: ProgramBreak> {
  brk: B,
  free_list: FreeList,
  counters: Counters,
  config: Config,
}

impl<B: ProgramBreak> Heap<B> {
  pub const fn new(brk: B) -> Self {
    Self::with_config(brk, Config::new())
  }

  pub const fn with_config(
    brk: B,
    config: Config,
  ) -> Self {
    Self {
      brk,
      free_list: FreeList::new(),
      counters: Counters::new(),
      config,
    }
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  pub fn program_break(&self) -> &B {
    &self.brk
  }

  /// Raw value of a single counter.
  pub fn counter(
    &self,
    counter: Counter,
  ) -> usize {
    self.counters[counter]
  }

  /// Allocates `size` bytes, reusing a free block when the configured search
  /// finds one and growing the heap otherwise.
  pub fn malloc(
    &mut self,
    size: usize,
  ) -> Result<NonNull<u8>> {
    self.counters.init();

    if size == 0 {
      return Err(AllocError::ZeroSize);
    }

    let aligned = align::align(size).ok_or(AllocError::OutOfMemory)?;

    let found = self
      .free_list
      .search(self.config.search, aligned, &mut self.counters);

    let block = match found {
      Some(block) => unsafe {
        block::split(&mut self.free_list, &mut self.counters, block, size);
        block::detach(&mut self.free_list, block)
      },
      None => block::allocate(&mut self.brk, &mut self.counters, size)?,
    };

    unsafe {
      let header = block.as_ref();
      assert!(
        header.capacity >= header.size,
        "block capacity {} below size {}",
        header.capacity,
        header.size
      );
      assert_eq!(header.size, size, "block size does not match the request");
      assert!(Block::is_self_linked(block), "allocated block is still linked");
    }

    self.counters[Counter::Mallocs] += 1;
    self.counters[Counter::Requested] += size;

    Ok(unsafe { Block::data(block) })
  }

  /// Returns the block behind `ptr` to the free list and trims the heap if
  /// the last free block ends at the break. Null is ignored.
  ///
  /// # Safety
  ///
  /// `ptr` must be null or an address returned by this heap that has not
  /// been freed since.
  pub unsafe fn free(
    &mut self,
    ptr: *mut u8,
  ) {
    let Some(data) = NonNull::new(ptr) else {
      return;
    };

    self.counters[Counter::Frees] += 1;

    unsafe {
      let block = Block::from_data(data);
      (*block.as_ptr()).size = 0;
      self.reclaim(block);
    }
  }

  /// Allocates `nmemb * size` bytes and zeroes the whole block capacity.
  pub fn calloc(
    &mut self,
    nmemb: usize,
    size: usize,
  ) -> Result<NonNull<u8>> {
    if nmemb == 0 || size == 0 {
      return Err(AllocError::ZeroSize);
    }

    let total = nmemb.checked_mul(size).ok_or(AllocError::Overflow)?;
    let data = self.malloc(total)?;

    unsafe {
      let capacity = Block::from_data(data).as_ref().capacity;
      ptr::write_bytes(data.as_ptr(), 0, capacity);
    }

    self.counters[Counter::Callocs] += 1;

    Ok(data)
  }

  /// Resizes the allocation behind `ptr`. Stays in place when the block
  /// capacity already covers `size`, otherwise moves to a new block and
  /// copies the old contents over.
  ///
  /// # Safety
  ///
  /// Same contract as [`Heap::free`] for `ptr`.
  pub unsafe fn realloc(
    &mut self,
    ptr: *mut u8,
    size: usize,
  ) -> Result<NonNull<u8>> {
    self.counters[Counter::Reallocs] += 1;

    let Some(data) = NonNull::new(ptr) else {
      return self.malloc(size);
    };

    if size == 0 {
      return Err(AllocError::ZeroSize);
    }

    unsafe {
      let block = Block::from_data(data);
      let header = block.as_ref();

      if header.capacity >= size {
        block::split(&mut self.free_list, &mut self.counters, block, size);

        // A leftover carved from an in-use block is linked only to it.
        if let Some(fragment) = block.as_ref().next.filter(|&next| next != block) {
          block::detach(&mut self.free_list, block);
          self.reclaim(fragment);
        }

        return Ok(data);
      }

      let copied = header.size;
      let moved = self.malloc(size)?;

      ptr::copy_nonoverlapping(data.as_ptr(), moved.as_ptr(), copied);
      self.free(data.as_ptr());

      Ok(moved)
    }
  }

  /// Capacity of the block behind `ptr`, 0 for null.
  ///
  /// # Safety
  ///
  /// `ptr` must be null or a live address returned by this heap.
  pub unsafe fn usable_size(
    &self,
    ptr: *mut u8,
  ) -> usize {
    match NonNull::new(ptr) {
      Some(data) => unsafe { Block::from_data(data).as_ref().capacity },
      None => 0,
    }
  }

  unsafe fn reclaim(
    &mut self,
    block: NonNull<Block>,
  ) {
    unsafe {
      self.free_list.insert(&mut self.counters, block);

      if let Some(last) = self.free_list.tail() {
        block::release(
          &mut self.brk,
          &mut self.free_list,
          &mut self.counters,
          last,
          self.config.trim_threshold,
        );
      }
    }
  }

  /// First byte of the heap. Equal to the break while the heap is empty.
  pub fn start(&self) -> *mut u8 {
    self
      .brk
      .current()
      .wrapping_sub(self.counters[Counter::HeapSize])
  }

  /// Every block between the heap start and the break, in address order.
  pub fn blocks(&self) -> Blocks<'_> {
    Blocks {
      cursor: self.start(),
      end: self.brk.current(),
      free: self.free_list.head(),
      marker: PhantomData,
    }
  }

  pub fn free_blocks(&self) -> usize {
    self.free_list.len()
  }

  /// Percentage of the heap reserved inside in-use blocks but not requested.
  pub fn internal_fragmentation(&self) -> f64 {
    let heap_size = self.counters[Counter::HeapSize];

    if heap_size == 0 {
      return 0.0;
    }

    let wasted: usize = self
      .blocks()
      .filter(|block| !block.free)
      .map(|block| block.capacity - block.size)
      .sum();

    wasted as f64 * 100.0 / heap_size as f64
  }

  /// How scattered the free capacity is: 0 when it is all in one block.
  pub fn external_fragmentation(&self) -> f64 {
    if self.free_list.is_empty() {
      return 0.0;
    }

    let (largest, total) = self
      .free_list
      .iter()
      .map(|block| unsafe { block.as_ref().capacity })
      .fold((0, 0), |(largest, total), capacity| {
        (largest.max(capacity), total + capacity)
      });

    if total == 0 {
      return 0.0;
    }

    (1.0 - largest as f64 / total as f64) * 100.0
  }

  pub fn stats(&self) -> Stats {
    Stats::collect(
      &self.counters,
      self.free_blocks(),
      self.internal_fragmentation(),
      self.external_fragmentation(),
    )
  }

  /// Renders the report into any writer.
  pub fn report<W: fmt::Write>(
    &self,
    out: &mut W,
  ) -> fmt::Result {
    write!(out, "{}", self.stats())
  }

  /// Writes the report to the descriptor captured on the first allocation
  /// and closes it. Later calls do nothing.
  pub fn finalize(&mut self) {
    let Some(output) = self.counters.take_output() else {
      return;
    };

    event!(debug, "finalize: reporting to fd {output:?}");

    if self.report(&mut FdWriter::new(output.as_fd())).is_err() {
      event!(debug, "finalize: report to fd {output:?} failed");
    }
  }
}

impl<B: ProgramBreak> fmt::Debug for Heap<B> {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    f.debug_struct("Heap")
      .field("start", &self.start())
      .field("break", &self.brk.current())
      .field("config", &self.config)
      .field("free_list", &self.free_list)
      .finish()
  }
}

/// A block as seen by [`Heap::blocks`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockInfo {
  /// Payload address.
  pub address: NonNull<u8>,
  pub capacity: usize,
  pub size: usize,
  /// Resident in the free list.
  pub free: bool,
}

impl BlockInfo {
  /// One past the last payload byte.
  pub fn end(&self) -> *mut u8 {
    self.address.as_ptr().wrapping_add(self.capacity)
  }
}

/// Physical walk over the heap. Blocks are told apart from free ones by
/// advancing a cursor through the address ordered free list in step.
pub struct Blocks<'heap> {
  cursor: *mut u8,
  end: *mut u8,
  free: Pointer<Block>,
  marker: PhantomData<&'heap FreeList>,
}

impl Iterator for Blocks<'_> {
  type Item = BlockInfo;

  fn next(&mut self) -> Option<BlockInfo> {
    if self.cursor >= self.end {
      return None;
    }

    let block = NonNull::new(self.cursor)?.cast::<Block>();

    unsafe {
      let header = block.as_ref();
      let free = self.free == Some(block);

      if free {
        self.free = header.next;
      }

      self.cursor = Block::end(block);

      Some(BlockInfo {
        address: Block::data(block),
        capacity: header.capacity,
        size: header.size,
        free,
      })
    }
  }
}
