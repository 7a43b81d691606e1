//! Random operation sequences against a heap on a private arena, checking the
//! heap layout and the caller's data after every step.

use std::ptr::{self, NonNull};

use brkalloc::{Arena, Config, Counter, HEADER_SIZE, Heap, SearchMode};
use proptest::prelude::*;

#[derive(Clone, Debug)]
enum Op {
  Malloc(usize),
  Calloc(usize, usize),
  /// Index into the live allocations, taken modulo their count.
  Realloc(usize, usize),
  Free(usize),
}

fn op() -> impl Strategy<Value = Op> {
  prop_oneof![
    4 => (1usize..2048).prop_map(Op::Malloc),
    1 => (1usize..16, 1usize..64).prop_map(|(nmemb, size)| Op::Calloc(nmemb, size)),
    2 => (any::<usize>(), 1usize..2048).prop_map(|(index, size)| Op::Realloc(index, size)),
    3 => any::<usize>().prop_map(Op::Free),
  ]
}

fn search_mode() -> impl Strategy<Value = SearchMode> {
  prop_oneof![
    Just(SearchMode::FirstFit),
    Just(SearchMode::BestFit),
    Just(SearchMode::WorstFit),
  ]
}

struct Live {
  data: NonNull<u8>,
  len: usize,
  fill: u8,
}

impl Live {
  unsafe fn bytes(&self) -> &[u8] {
    unsafe { std::slice::from_raw_parts(self.data.as_ptr(), self.len) }
  }
}

fn check_layout(heap: &Heap<Arena>) -> Result<(), TestCaseError> {
  let blocks: Vec<_> = heap.blocks().collect();

  prop_assert_eq!(blocks.len(), heap.counter(Counter::Blocks));
  prop_assert_eq!(
    blocks.iter().filter(|block| block.free).count(),
    heap.free_blocks()
  );
  prop_assert_eq!(
    blocks
      .iter()
      .map(|block| HEADER_SIZE + block.capacity)
      .sum::<usize>(),
    heap.counter(Counter::HeapSize)
  );
  prop_assert_eq!(
    heap.program_break().used(),
    heap.counter(Counter::HeapSize)
  );

  for pair in blocks.windows(2) {
    prop_assert!(!(pair[0].free && pair[1].free));
    prop_assert_eq!(pair[0].end().wrapping_add(HEADER_SIZE), pair[1].address.as_ptr());
  }

  for block in &blocks {
    prop_assert!(block.capacity >= block.size);
    prop_assert_eq!(block.capacity % size_of::<usize>(), 0);
  }

  let stats = heap.stats();
  prop_assert!((0.0..=100.0).contains(&stats.internal));
  prop_assert!((0.0..=100.0).contains(&stats.external));

  Ok(())
}

proptest! {
  #![proptest_config(ProptestConfig::with_cases(256))]

  #[test]
  fn random_sequences_keep_heap_consistent(
    mode in search_mode(),
    trim_threshold in prop_oneof![Just(0usize), Just(1024), Just(usize::MAX)],
    ops in prop::collection::vec(op(), 1..120),
  ) {
    let config = Config::new()
      .with_search(mode)
      .with_trim_threshold(trim_threshold);
    let mut heap = Heap::with_config(Arena::new(1 << 20), config);
    let mut live: Vec<Live> = Vec::new();

    for (step, op) in ops.into_iter().enumerate() {
      let fill = step as u8;

      match op {
        Op::Malloc(size) => {
          let data = heap.malloc(size).unwrap();
          let usable = unsafe { heap.usable_size(data.as_ptr()) };
          prop_assert!(usable >= size);
          unsafe { ptr::write_bytes(data.as_ptr(), fill, size) };
          live.push(Live { data, len: size, fill });
        }
        Op::Calloc(nmemb, size) => {
          let data = heap.calloc(nmemb, size).unwrap();
          let len = nmemb * size;
          let zeroed = unsafe { std::slice::from_raw_parts(data.as_ptr(), len) };
          prop_assert!(zeroed.iter().all(|&byte| byte == 0));
          unsafe { ptr::write_bytes(data.as_ptr(), fill, len) };
          live.push(Live { data, len, fill });
        }
        Op::Realloc(index, size) if !live.is_empty() => {
          let entry = live.swap_remove(index % live.len());
          let data = unsafe { heap.realloc(entry.data.as_ptr(), size).unwrap() };
          let kept = entry.len.min(size);
          let bytes = unsafe { std::slice::from_raw_parts(data.as_ptr(), kept) };
          prop_assert!(bytes.iter().all(|&byte| byte == entry.fill));
          unsafe { ptr::write_bytes(data.as_ptr(), fill, size) };
          live.push(Live { data, len: size, fill });
        }
        Op::Free(index) if !live.is_empty() => {
          let entry = live.swap_remove(index % live.len());
          unsafe { heap.free(entry.data.as_ptr()) };
        }
        Op::Realloc(..) | Op::Free(_) => {}
      }

      for entry in &live {
        let bytes = unsafe { entry.bytes() };
        prop_assert!(bytes.iter().all(|&byte| byte == entry.fill));
      }

      check_layout(&heap)?;
    }

    for entry in live.drain(..) {
      unsafe { heap.free(entry.data.as_ptr()) };
    }

    check_layout(&heap)?;
    prop_assert!(heap.counter(Counter::Blocks) <= 1);
  }
}

proptest! {
  #![proptest_config(ProptestConfig::with_cases(500))]

  /* freeing everything in any order coalesces into a single free block */
  #[test]
  fn free_order_does_not_matter(
    sizes in prop::collection::vec(1usize..512, 1..32),
    order in any::<u64>(),
  ) {
    let mut heap = Heap::with_config(
      Arena::new(1 << 20),
      Config::new().with_trim_threshold(usize::MAX),
    );

    let mut pointers: Vec<_> = sizes.iter().map(|&size| heap.malloc(size).unwrap()).collect();
    let total = heap.counter(Counter::HeapSize);

    let shift = order as usize % pointers.len();
    pointers.rotate_left(shift);
    if order & 1 == 1 {
      pointers.reverse();
    }

    for data in pointers {
      unsafe { heap.free(data.as_ptr()) };
    }

    let blocks: Vec<_> = heap.blocks().collect();
    prop_assert_eq!(blocks.len(), 1);
    prop_assert!(blocks[0].free);
    prop_assert_eq!(blocks[0].capacity + HEADER_SIZE, total);
    prop_assert_eq!(heap.stats().external, 0.0);
  }
}
