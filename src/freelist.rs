use core::{fmt, marker::PhantomData, ptr::NonNull};

use crate::{
  Pointer,
  block::{Block, merge},
  counters::{Counter, Counters},
};

/// How [`FreeList::search`] picks among the blocks that are large enough.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SearchMode {
  /// Lowest address that fits. Stops at the first hit.
  FirstFit,
  /// Smallest capacity that fits, first one on ties.
  BestFit,
  /// Largest capacity that fits, first one on ties.
  WorstFit,
}

impl SearchMode {
  /// Mode selected by the crate features. `best-fit` beats `worst-fit`,
  /// which beats the default `first-fit`.
  pub const DEFAULT: Self = if cfg!(feature = "best-fit") {
    Self::BestFit
  } else if cfg!(feature = "worst-fit") {
    Self::WorstFit
  } else {
    Self::FirstFit
  };
}

impl Default for SearchMode {
  fn default() -> Self {
    Self::DEFAULT
  }
}

/// Circular, address ordered, doubly linked list of free blocks.
///
/// ```text
///           ┌───────────────────────────────────────────────┐
///           ▼                                               │
///   ┌──────────────┐    ┌─────────┐    ┌─────────┐    ┌─────────┐
///   │   sentinel   │───►│ 0x1000  │───►│ 0x1400  │───►│ 0x2c00  │
///   │ (head, tail) │◄───│         │◄───│         │◄───│         │
///   └──────────────┘    └─────────┘    └─────────┘    └─────────┘
///           │                                               ▲
///           └───────────────────────────────────────────────┘
/// ```
///
/// The sentinel is not a real block. A link equal to `None` points at it, and
/// `head`/`tail` are its own `next`/`prev`, so an empty list is a sentinel
/// linked to itself.
pub(crate) struct FreeList {
  head: Pointer<Block>,
  tail: Pointer<Block>,
}

impl FreeList {
  pub const fn new() -> Self {
    Self {
      head: None,
      tail: None,
    }
  }

  pub fn is_empty(&self) -> bool {
    self.head.is_none()
  }

  /// Lowest addressed free block.
  pub fn head(&self) -> Pointer<Block> {
    self.head
  }

  /// Highest addressed free block, the only one that may end at the break.
  pub fn tail(&self) -> Pointer<Block> {
    self.tail
  }

  /// Predecessor of `link`, where `None` is the sentinel.
  pub unsafe fn prev(
    &self,
    link: Pointer<Block>,
  ) -> Pointer<Block> {
    match link {
      Some(block) => unsafe { block.as_ref().prev },
      None => self.tail,
    }
  }

  pub unsafe fn set_next(
    &mut self,
    link: Pointer<Block>,
    next: Pointer<Block>,
  ) {
    match link {
      Some(block) => unsafe { (*block.as_ptr()).next = next },
      None => self.head = next,
    }
  }

  pub unsafe fn set_prev(
    &mut self,
    link: Pointer<Block>,
    prev: Pointer<Block>,
  ) {
    match link {
      Some(block) => unsafe { (*block.as_ptr()).prev = prev },
      None => self.tail = prev,
    }
  }

  pub fn iter(&self) -> Iter<'_> {
    Iter {
      next: self.head,
      marker: PhantomData,
    }
  }

  pub fn len(&self) -> usize {
    self.iter().count()
  }

  /// Finds a free block with at least `size` bytes of capacity and counts a
  /// reuse if there is one. The block stays in the list.
  pub fn search(
    &self,
    mode: SearchMode,
    size: usize,
    counters: &mut Counters,
  ) -> Pointer<Block> {
    let found = match mode {
      SearchMode::FirstFit => self.search_first_fit(size),
      SearchMode::BestFit => self.search_by(size, |candidate, target| candidate < target),
      SearchMode::WorstFit => self.search_by(size, |candidate, target| candidate > target),
    };

    if found.is_some() {
      counters[Counter::Reuses] += 1;
      event!(trace, "reuse: {found:?} for {size} bytes ({mode:?})");
    }

    found
  }

  fn search_first_fit(
    &self,
    size: usize,
  ) -> Pointer<Block> {
    self
      .iter()
      .find(|&block| unsafe { block.as_ref().capacity } >= size)
  }

  /// Full scan keeping the fitting block for which `better(candidate,
  /// current)` holds. Ties keep the earlier block.
  fn search_by(
    &self,
    size: usize,
    better: impl Fn(usize, usize) -> bool,
  ) -> Pointer<Block> {
    let mut target: Option<(NonNull<Block>, usize)> = None;

    for block in self.iter() {
      let capacity = unsafe { block.as_ref().capacity };

      if capacity >= size && target.is_none_or(|(_, current)| better(capacity, current)) {
        target = Some((block, capacity));
      }
    }

    target.map(|(block, _)| block)
  }

  /// Splices `block` in front of the first resident block with a higher
  /// address, without merging.
  pub unsafe fn link(
    &mut self,
    block: NonNull<Block>,
  ) {
    let successor = self.iter().find(|&resident| resident > block);

    unsafe {
      let prev = self.prev(successor);

      let header = &mut *block.as_ptr();
      header.prev = prev;
      header.next = successor;

      self.set_next(prev, Some(block));
      self.set_prev(successor, Some(block));
    }
  }

  /// Puts a free block back in address order and coalesces it with both
  /// list neighbours. Since the list is sorted, those are the only blocks it
  /// can be physically adjacent to.
  pub unsafe fn insert(
    &mut self,
    counters: &mut Counters,
    block: NonNull<Block>,
  ) {
    unsafe {
      self.link(block);

      if let Some(next) = block.as_ref().next {
        merge(self, counters, block, next);
      }

      if let Some(prev) = block.as_ref().prev {
        merge(self, counters, prev, block);
      }
    }
  }
}

impl fmt::Debug for FreeList {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    let mut blocks = f.debug_map();

    for block in self.iter() {
      unsafe {
        blocks.entry(&Block::data(block), &block.as_ref().capacity);
      }
    }

    blocks.finish()
  }
}

/// Walks the list from the sentinel's successor back to the sentinel.
pub(crate) struct Iter<'list> {
  next: Pointer<Block>,
  marker: PhantomData<&'list FreeList>,
}

impl Iterator for Iter<'_> {
  type Item = NonNull<Block>;

  fn next(&mut self) -> Option<Self::Item> {
    let block = self.next?;
    // Only blocks handed to the unsafe `link`/`insert` are ever reachable.
    self.next = unsafe { block.as_ref().next };
    Some(block)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    block::{HEADER, allocate},
    brk::{Arena, ProgramBreak},
  };

  /// Grows one block per size, each separated by a small in-use block so
  /// nothing coalesces, then frees the big ones.
  fn scattered(
    arena: &mut Arena,
    list: &mut FreeList,
    counters: &mut Counters,
    sizes: &[usize],
  ) -> Vec<NonNull<Block>> {
    let mut blocks = Vec::new();

    for &size in sizes {
      let block = allocate(arena, counters, size).unwrap();
      allocate(arena, counters, 8).unwrap();
      blocks.push(block);
    }

    for &block in blocks.iter().rev() {
      unsafe {
        (*block.as_ptr()).size = 0;
        list.insert(counters, block);
      }
    }

    blocks
  }

  #[test]
  fn empty_list() {
    let list = FreeList::new();
    let mut counters = Counters::new();

    assert!(list.is_empty());
    assert_eq!(list.len(), 0);
    assert_eq!(list.search(SearchMode::FirstFit, 8, &mut counters), None);
    assert_eq!(counters[Counter::Reuses], 0);
  }

  #[test]
  fn insert_keeps_address_order() {
    let mut arena = Arena::new(4096);
    let mut list = FreeList::new();
    let mut counters = Counters::new();

    let blocks = scattered(&mut arena, &mut list, &mut counters, &[64, 32, 128, 16]);

    let resident: Vec<_> = list.iter().collect();
    assert_eq!(resident, blocks);
    assert_eq!(list.head(), Some(blocks[0]));
    assert_eq!(list.tail(), Some(blocks[3]));

    unsafe {
      assert_eq!(blocks[0].as_ref().prev, None);
      assert_eq!(blocks[3].as_ref().next, None);
      assert_eq!(list.prev(None), Some(blocks[3]));
    }
    assert_eq!(counters[Counter::Merges], 0);
  }

  #[test]
  fn search_modes() {
    let mut arena = Arena::new(4096);
    let mut list = FreeList::new();
    let mut counters = Counters::new();

    let blocks = scattered(&mut arena, &mut list, &mut counters, &[64, 32, 128, 32, 256]);

    let found = |mode, size, counters: &mut Counters| list.search(mode, size, counters);

    assert_eq!(found(SearchMode::FirstFit, 24, &mut counters), Some(blocks[0]));
    assert_eq!(found(SearchMode::FirstFit, 100, &mut counters), Some(blocks[2]));
    assert_eq!(found(SearchMode::BestFit, 24, &mut counters), Some(blocks[1]));
    assert_eq!(found(SearchMode::BestFit, 100, &mut counters), Some(blocks[2]));
    assert_eq!(found(SearchMode::WorstFit, 24, &mut counters), Some(blocks[4]));
    assert_eq!(counters[Counter::Reuses], 5);

    for mode in [SearchMode::FirstFit, SearchMode::BestFit, SearchMode::WorstFit] {
      assert_eq!(found(mode, 512, &mut counters), None);
    }
    assert_eq!(counters[Counter::Reuses], 5);
  }

  #[test]
  fn insert_coalesces_both_sides() {
    let mut arena = Arena::new(4096);
    let mut list = FreeList::new();
    let mut counters = Counters::new();

    let left = allocate(&mut arena, &mut counters, 32).unwrap();
    let middle = allocate(&mut arena, &mut counters, 48).unwrap();
    let right = allocate(&mut arena, &mut counters, 64).unwrap();

    unsafe {
      list.insert(&mut counters, left);
      list.insert(&mut counters, right);
      assert_eq!(list.len(), 2);

      list.insert(&mut counters, middle);
      assert_eq!(list.len(), 1);
      assert_eq!(list.head(), Some(left));
      assert_eq!(list.tail(), Some(left));
      assert_eq!(left.as_ref().capacity, 32 + 48 + 64 + 2 * HEADER);
      assert_eq!(Block::end(left), arena.current());
    }

    assert_eq!(counters[Counter::Merges], 2);
    assert_eq!(counters[Counter::Blocks], 1);
  }

  #[test]
  fn debug_lists_capacities() {
    let mut arena = Arena::new(4096);
    let mut list = FreeList::new();
    let mut counters = Counters::new();

    scattered(&mut arena, &mut list, &mut counters, &[40]);

    let rendered = format!("{list:?}");
    assert!(rendered.ends_with(": 40}"), "{rendered}");
  }
}
