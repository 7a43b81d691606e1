//! The heap growth primitive.
//!
//! ```text
//!   heap start                                   break
//!        │                                         │
//!        ▼                                         ▼
//!        ┌────────┬────────┬────────┬──────────────┐
//!        │ block  │ block  │ block  │    block     │  extend(n) ──► moves right
//!        └────────┴────────┴────────┴──────────────┘  shrink(n) ◄── moves left
//! ```
//!
//! The heap only ever asks for bytes right at the break and only ever hands
//! back bytes that end at the break, so anything that can move a single
//! boundary up and down can back it.

use std::{
  alloc::{self, Layout},
  ptr::NonNull,
};

use libc::{c_void, intptr_t, sbrk};

use crate::align::WORD;

/// A contiguous region whose end (the break) can be moved.
///
/// # Safety
///
/// Implementors guarantee that the bytes returned by [`Self::extend`] start
/// exactly at the previous [`Self::current`], are word aligned, are valid for
/// reads and writes until they are given back with [`Self::shrink`], and are
/// not touched by anybody else in the meantime.
pub unsafe trait ProgramBreak {
  /// Current end of the region.
  fn current(&self) -> *mut u8;

  /// Moves the break up by `increment` bytes and returns where the new bytes
  /// start, or `None` if the region cannot grow.
  fn extend(
    &mut self,
    increment: usize,
  ) -> Option<NonNull<u8>>;

  /// Moves the break down by `decrement` bytes.
  fn shrink(
    &mut self,
    decrement: usize,
  ) -> bool;
}

const SBRK_FAILURE: *mut c_void = usize::MAX as *mut c_void;

/// The real program break, moved with `sbrk(2)`.
pub struct Sbrk {
  aligned: bool,
}

impl Sbrk {
  /// # Safety
  ///
  /// Nothing else in the process may move the program break while the heap
  /// built on this value is alive. In practice that means this crate must be
  /// the process allocator (see the `c_api` feature), otherwise the libc
  /// allocator will interleave its own `brk` calls with ours.
  pub const unsafe fn new() -> Self {
    Self { aligned: false }
  }
}

unsafe impl ProgramBreak for Sbrk {
  fn current(&self) -> *mut u8 {
    unsafe { sbrk(0) as *mut u8 }
  }

  fn extend(
    &mut self,
    increment: usize,
  ) -> Option<NonNull<u8>> {
    let increment = intptr_t::try_from(increment).ok()?;

    unsafe {
      // The initial break has no alignment guarantee.
      if !self.aligned {
        let padding = (sbrk(0) as usize).wrapping_neg() & (WORD - 1);
        if padding != 0 && sbrk(padding as intptr_t) == SBRK_FAILURE {
          return None;
        }
        self.aligned = true;
      }

      let address = sbrk(increment);

      if address == SBRK_FAILURE {
        return None;
      }

      NonNull::new(address as *mut u8)
    }
  }

  fn shrink(
    &mut self,
    decrement: usize,
  ) -> bool {
    match intptr_t::try_from(decrement) {
      Ok(decrement) => unsafe { sbrk(-decrement) != SBRK_FAILURE },
      Err(_) => false,
    }
  }
}

/// A fixed-size region reserved up front with a private break. Used to run a
/// [`crate::Heap`] without touching the process break, which is what tests,
/// benches and embedders want.
pub struct Arena {
  base: NonNull<u8>,
  capacity: usize,
  top: usize,
}

impl Arena {
  const ALIGN: usize = 16;

  /// Reserves `capacity` bytes. Aborts through [`alloc::handle_alloc_error`]
  /// if the reservation itself fails.
  pub fn new(capacity: usize) -> Self {
    let layout = Self::layout(capacity);
    let base = unsafe { alloc::alloc(layout) };

    match NonNull::new(base) {
      Some(base) => Self {
        base,
        capacity,
        top: 0,
      },
      None => alloc::handle_alloc_error(layout),
    }
  }

  fn layout(capacity: usize) -> Layout {
    match Layout::from_size_align(capacity.max(Self::ALIGN), Self::ALIGN) {
      Ok(layout) => layout,
      Err(_) => panic!("arena capacity {capacity} is too large"),
    }
  }

  /// First byte of the region.
  pub fn start(&self) -> *mut u8 {
    self.base.as_ptr()
  }

  /// Bytes reserved in total.
  pub fn capacity(&self) -> usize {
    self.capacity
  }

  /// Bytes currently below the break.
  pub fn used(&self) -> usize {
    self.top
  }
}

unsafe impl ProgramBreak for Arena {
  fn current(&self) -> *mut u8 {
    unsafe { self.base.as_ptr().add(self.top) }
  }

  fn extend(
    &mut self,
    increment: usize,
  ) -> Option<NonNull<u8>> {
    let top = self.top.checked_add(increment)?;

    if top > self.capacity {
      return None;
    }

    let address = unsafe { self.base.add(self.top) };
    self.top = top;

    Some(address)
  }

  fn shrink(
    &mut self,
    decrement: usize,
  ) -> bool {
    match self.top.checked_sub(decrement) {
      Some(top) => {
        self.top = top;
        true
      }
      None => false,
    }
  }
}

impl Drop for Arena {
  fn drop(&mut self) {
    unsafe { alloc::dealloc(self.base.as_ptr(), Self::layout(self.capacity)) }
  }
}
