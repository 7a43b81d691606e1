//! The process-wide heap on top of the real program break, plus the entry
//! points that expose it: [`Global`] for Rust programs, `brk_*` functions
//! and, with the `c_api` feature, the unmangled `malloc` family.
//!
//! The heap is created in a `static` and never moves. Nothing here locks:
//! calling into it from two threads at once is undefined behaviour.

use core::{
  alloc::{GlobalAlloc, Layout},
  cell::{Cell, UnsafeCell},
  ptr::{NonNull, null_mut},
};

use crate::{align::WORD, brk::Sbrk, error::Result, heap::Heap};

struct GlobalHeap {
  heap: UnsafeCell<Heap<Sbrk>>,
  hooked: Cell<bool>,
}

// Single threaded by contract, see the module docs.
unsafe impl Sync for GlobalHeap {}

static HEAP: GlobalHeap = GlobalHeap {
  heap: UnsafeCell::new(Heap::new(unsafe { Sbrk::new() })),
  hooked: Cell::new(false),
};

extern "C" fn report_at_exit() {
  unsafe { (*HEAP.heap.get()).finalize() }
}

/// Runs `f` on the process heap. The first call registers the exit report,
/// before any reference to the heap exists in case `atexit` allocates.
unsafe fn with_heap<R>(f: impl FnOnce(&mut Heap<Sbrk>) -> R) -> R {
  if !HEAP.hooked.replace(true) {
    // A full atexit table only costs us the report.
    unsafe { libc::atexit(report_at_exit) };
  }

  f(unsafe { &mut *HEAP.heap.get() })
}

fn into_raw(result: Result<NonNull<u8>>) -> *mut u8 {
  result.map_or(null_mut(), NonNull::as_ptr)
}

/// `malloc` on the process heap. Null on failure or for zero bytes.
///
/// # Safety
///
/// Single threaded use only, and the process break must belong to this
/// crate (see [`Sbrk::new`]).
pub unsafe fn brk_malloc(size: usize) -> *mut u8 {
  unsafe { with_heap(|heap| into_raw(heap.malloc(size))) }
}

/// # Safety
///
/// As [`brk_malloc`]; `ptr` must be null or a live pointer from this heap.
pub unsafe fn brk_free(ptr: *mut u8) {
  unsafe { with_heap(|heap| heap.free(ptr)) }
}

/// # Safety
///
/// As [`brk_malloc`].
pub unsafe fn brk_calloc(
  nmemb: usize,
  size: usize,
) -> *mut u8 {
  unsafe { with_heap(|heap| into_raw(heap.calloc(nmemb, size))) }
}

/// # Safety
///
/// As [`brk_free`].
pub unsafe fn brk_realloc(
  ptr: *mut u8,
  size: usize,
) -> *mut u8 {
  unsafe { with_heap(|heap| into_raw(heap.realloc(ptr, size))) }
}

/// # Safety
///
/// As [`brk_free`].
pub unsafe fn brk_usable_size(ptr: *mut u8) -> usize {
  unsafe { with_heap(|heap| heap.usable_size(ptr)) }
}

/// [`GlobalAlloc`] front end for the process heap, for single threaded
/// programs that want it as `#[global_allocator]`. Alignments above the word
/// size are refused with null.
pub struct Global;

unsafe impl GlobalAlloc for Global {
  unsafe fn alloc(
    &self,
    layout: Layout,
  ) -> *mut u8 {
    if layout.align() > WORD {
      return null_mut();
    }

    unsafe { brk_malloc(layout.size().max(1)) }
  }

  unsafe fn dealloc(
    &self,
    ptr: *mut u8,
    _layout: Layout,
  ) {
    unsafe { brk_free(ptr) }
  }

  unsafe fn alloc_zeroed(
    &self,
    layout: Layout,
  ) -> *mut u8 {
    if layout.align() > WORD {
      return null_mut();
    }

    unsafe { brk_calloc(1, layout.size().max(1)) }
  }

  unsafe fn realloc(
    &self,
    ptr: *mut u8,
    layout: Layout,
    new_size: usize,
  ) -> *mut u8 {
    if layout.align() > WORD {
      return null_mut();
    }

    unsafe { brk_realloc(ptr, new_size.max(1)) }
  }
}

// =============================================================================
// C API (enabled with --features c_api)
// =============================================================================

#[cfg(feature = "c_api")]
mod c_api {
  use libc::{c_void, size_t};

  #[unsafe(no_mangle)]
  pub unsafe extern "C" fn malloc(size: size_t) -> *mut c_void {
    unsafe { super::brk_malloc(size).cast() }
  }

  #[unsafe(no_mangle)]
  pub unsafe extern "C" fn free(ptr: *mut c_void) {
    unsafe { super::brk_free(ptr.cast()) }
  }

  #[unsafe(no_mangle)]
  pub unsafe extern "C" fn calloc(
    nmemb: size_t,
    size: size_t,
  ) -> *mut c_void {
    unsafe { super::brk_calloc(nmemb, size).cast() }
  }

  #[unsafe(no_mangle)]
  pub unsafe extern "C" fn realloc(
    ptr: *mut c_void,
    size: size_t,
  ) -> *mut c_void {
    unsafe { super::brk_realloc(ptr.cast(), size).cast() }
  }

  #[unsafe(no_mangle)]
  pub unsafe extern "C" fn malloc_usable_size(ptr: *mut c_void) -> size_t {
    unsafe { super::brk_usable_size(ptr.cast()) }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  // The process break is shared with the test harness's own allocator, so
  // only the paths that never reach it are exercised here.
  #[test]
  fn over_aligned_layouts_are_refused() {
    let layout = Layout::from_size_align(64, 4 * WORD).unwrap();

    unsafe {
      assert!(Global.alloc(layout).is_null());
      assert!(Global.alloc_zeroed(layout).is_null());
      assert!(Global.realloc(null_mut(), layout, 128).is_null());
    }

    assert!(!HEAP.hooked.get());
  }

  #[test]
  fn failures_become_null() {
    assert!(into_raw(Err(crate::error::AllocError::ZeroSize)).is_null());

    let mut byte = 0u8;
    let ptr = NonNull::from(&mut byte);
    assert_eq!(into_raw(Ok(ptr)), ptr.as_ptr());
  }
}
