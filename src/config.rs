//! Allocator tuning. The defaults are fixed when the crate is built: the
//! `first-fit`/`best-fit`/`worst-fit` features pick [`SearchMode::DEFAULT`]
//! and the `BRKALLOC_TRIM_THRESHOLD` environment variable, if set at build
//! time, replaces [`TRIM_THRESHOLD`].

use crate::freelist::SearchMode;

/// Trailing free blocks must have more payload capacity than this before the
/// heap gives them back to the operating system.
pub const TRIM_THRESHOLD: usize = parse_threshold(option_env!("BRKALLOC_TRIM_THRESHOLD"), 1024);

const fn parse_threshold(
  value: Option<&str>,
  default: usize,
) -> usize {
  let bytes = match value {
    Some(value) => value.as_bytes(),
    None => return default,
  };

  assert!(!bytes.is_empty(), "BRKALLOC_TRIM_THRESHOLD is empty");

  let mut threshold: usize = 0;
  let mut i = 0;
  while i < bytes.len() {
    let digit = bytes[i];
    assert!(
      digit.is_ascii_digit(),
      "BRKALLOC_TRIM_THRESHOLD must be a decimal byte count"
    );

    threshold = match threshold.checked_mul(10) {
      Some(shifted) => match shifted.checked_add((digit - b'0') as usize) {
        Some(sum) => sum,
        None => panic!("BRKALLOC_TRIM_THRESHOLD overflows usize"),
      },
      None => panic!("BRKALLOC_TRIM_THRESHOLD overflows usize"),
    };
    i += 1;
  }

  threshold
}

/// Runtime configuration injected into [`crate::Heap::with_config`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Config {
  pub search: SearchMode,
  pub trim_threshold: usize,
}

impl Config {
  pub const fn new() -> Self {
    Self {
      search: SearchMode::DEFAULT,
      trim_threshold: TRIM_THRESHOLD,
    }
  }

  pub const fn with_search(
    mut self,
    search: SearchMode,
  ) -> Self {
    self.search = search;
    self
  }

  pub const fn with_trim_threshold(
    mut self,
    trim_threshold: usize,
  ) -> Self {
    self.trim_threshold = trim_threshold;
    self
  }
}

impl Default for Config {
  fn default() -> Self {
    Self::new()
  }
}
