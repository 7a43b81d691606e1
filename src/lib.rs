//! # brkalloc - A `malloc` Built on the Program Break
//!
//! This crate implements the `malloc`/`free`/`calloc`/`realloc` family on top
//! of `sbrk(2)`, with an address ordered free list that splits blocks on
//! reuse and coalesces them on release.
//!
//! ## Overview
//!
//! ```text
//!   Heap Layout:
//!
//!   ┌──────────────────────────────────────────────────────────────────────┐
//!   │                              HEAP MEMORY                             │
//!   │                                                                      │
//!   │   ┌─────┬─────┬──────┬─────┬─────┬──────────┬─────┬──────────────┐   │
//!   │   │ hdr │ A1  │ hdr  │free │ hdr │    A2    │ hdr │     free     │   │
//!   │   └─────┴─────┴──────┴─────┴─────┴──────────┴─────┴──────────────┘   │
//!   │   ▲                  ▲                            ▲              ▲   │
//!   │   │                  └──── free list (sorted) ────┘              │   │
//!   │  Heap                                                       Program  │
//!   │  Start                                                        Break  │
//!   └──────────────────────────────────────────────────────────────────────┘
//!
//!   malloc: search the free list (first, best or worst fit), split the hit,
//!           or move the break up for a fresh block.
//!   free:   insert by address, merge with physical neighbours, move the
//!           break down if the last block is big enough.
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   brkalloc
//!   ├── align      - Word alignment (align!, align)
//!   ├── brk        - ProgramBreak trait, Sbrk and Arena
//!   ├── block      - Block header, grow/release/detach/merge/split (internal)
//!   ├── freelist   - Sorted circular free list and SearchMode
//!   ├── counters   - Counters, Stats and the exit report
//!   ├── config     - Config and build-time defaults
//!   ├── error      - AllocError
//!   ├── heap       - Heap: malloc, free, calloc, realloc, diagnostics
//!   └── global     - Process heap, GlobalAlloc and the C ABI (c_api)
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use brkalloc::{Arena, Heap};
//!
//! let mut heap = Heap::new(Arena::new(64 * 1024));
//!
//! let ptr = heap.malloc(12).unwrap();
//! unsafe {
//!     ptr.as_ptr().copy_from_nonoverlapping(b"hello, world".as_ptr(), 12);
//!
//!     let ptr = heap.realloc(ptr.as_ptr(), 64).unwrap();
//!     assert_eq!(std::slice::from_raw_parts(ptr.as_ptr(), 12), b"hello, world");
//!
//!     heap.free(ptr.as_ptr());
//! }
//!
//! // The move to a bigger block freed the old one.
//! assert_eq!(heap.stats().frees, 2);
//! ```
//!
//! ## Using It As The Process Allocator
//!
//! Build with `--features c_api` and the resulting `cdylib` exports
//! `malloc`, `free`, `calloc`, `realloc` and `malloc_usable_size`, so it can
//! be `LD_PRELOAD`ed under any program. When that program exits, the
//! counters are printed to wherever its stdout pointed at the first
//! allocation:
//!
//! ```text
//!   blocks:      3
//!   free blocks: 1
//!   mallocs:     42
//!   ...
//!   internal:    1.27
//!   external:    0.00
//! ```
//!
//! The free list search is picked with the `first-fit` (default),
//! `best-fit` or `worst-fit` features, and the trim threshold with the
//! `BRKALLOC_TRIM_THRESHOLD` environment variable at build time.
//!
//! ## Limitations
//!
//! - **Single-threaded only**: No synchronization primitives
//! - **Word alignment only**: Payloads are aligned to `usize`, no more
//! - **Unix-only**: Requires `libc` and `sbrk` (POSIX systems)
//!
//! ## Safety
//!
//! Handing out and taking back raw memory is inherently unsafe: `free`,
//! `realloc` and `usable_size` trust the pointer they are given.

use core::ptr::NonNull;

/// `log` events from inside the allocator. Compiled out of the C ABI build,
/// where a logger that allocates would call straight back into `malloc`.
macro_rules! event {
  ($level:ident, $($arg:tt)+) => {
    #[cfg(not(feature = "c_api"))]
    log::$level!($($arg)+);
  };
}

pub mod align;
mod block;
pub mod brk;
pub mod config;
pub mod counters;
pub mod error;
mod freelist;
mod global;
mod heap;

/// Link to another block, `None` being the free list sentinel.
pub(crate) type Pointer<T> = Option<NonNull<T>>;

/// Bytes every block spends on its header.
pub const HEADER_SIZE: usize = block::HEADER;

pub use brk::{Arena, ProgramBreak, Sbrk};
pub use config::{Config, TRIM_THRESHOLD};
pub use counters::{Counter, Stats};
pub use error::{AllocError, Result};
pub use freelist::SearchMode;
pub use global::{Global, brk_calloc, brk_free, brk_malloc, brk_realloc, brk_usable_size};
pub use heap::{BlockInfo, Blocks, Heap};
