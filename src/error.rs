use core::fmt;

/// Why an allocation produced no memory. The C entry points collapse every
/// variant into a null pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
  /// `malloc(0)`, `calloc` with a zero argument or `realloc` to zero bytes.
  ZeroSize,
  /// `nmemb * size` does not fit in a `usize`.
  Overflow,
  /// The program break cannot be extended any further.
  OutOfMemory,
}

impl fmt::Display for AllocError {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    match self {
      Self::ZeroSize => write!(f, "zero sized allocation"),
      Self::Overflow => write!(f, "allocation size overflows usize"),
      Self::OutOfMemory => write!(f, "heap cannot grow any further"),
    }
  }
}

impl std::error::Error for AllocError {}

pub type Result<T> = core::result::Result<T, AllocError>;
