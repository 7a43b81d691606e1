use core::{
  fmt,
  ops::{Index, IndexMut},
};
use std::{
  io,
  os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd},
};

/// Statistics the heap keeps while it runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(usize)]
pub enum Counter {
  /// Blocks currently carved out of the heap, free or not.
  Blocks,
  Mallocs,
  Frees,
  Callocs,
  Reallocs,
  /// Allocations served from the free list.
  Reuses,
  /// Times the break moved up.
  Grows,
  /// Times the break moved down.
  Shrinks,
  Splits,
  Merges,
  /// Sum of every size passed to `malloc`.
  Requested,
  /// Bytes between the heap start and the break, headers included.
  HeapSize,
}

impl Counter {
  pub const COUNT: usize = 12;
}

/// Counter array plus the descriptor the final report goes to.
pub struct Counters {
  values: [usize; Counter::COUNT],
  initialized: bool,
  output: Option<OwnedFd>,
}

impl Counters {
  pub const fn new() -> Self {
    Self {
      values: [0; Counter::COUNT],
      initialized: false,
      output: None,
    }
  }

  /// Duplicates standard output so the report lands where stdout pointed at
  /// the first allocation, whatever the program does with fd 1 afterwards.
  /// Only the first call does anything; it returns whether it was that call.
  pub fn init(&mut self) -> bool {
    self.init_to(libc::STDOUT_FILENO)
  }

  /// [`Counters::init`] with the report going to a duplicate of `fd`.
  pub(crate) fn init_to(
    &mut self,
    fd: RawFd,
  ) -> bool {
    if self.initialized {
      return false;
    }

    self.initialized = true;

    let fd = unsafe { libc::dup(fd) };
    if fd >= 0 {
      self.output = Some(unsafe { OwnedFd::from_raw_fd(fd) });
    }

    true
  }

  pub fn is_initialized(&self) -> bool {
    self.initialized
  }

  /// Hands over the report descriptor. Returns `None` on every call after
  /// the first one, which is what makes the report happen at most once.
  pub fn take_output(&mut self) -> Option<OwnedFd> {
    self.output.take()
  }
}

impl Index<Counter> for Counters {
  type Output = usize;

  fn index(
    &self,
    counter: Counter,
  ) -> &usize {
    &self.values[counter as usize]
  }
}

impl IndexMut<Counter> for Counters {
  fn index_mut(
    &mut self,
    counter: Counter,
  ) -> &mut usize {
    &mut self.values[counter as usize]
  }
}

/// Point-in-time copy of every counter together with the derived metrics.
/// Its [`fmt::Display`] output is the exit report.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Stats {
  pub blocks: usize,
  pub free_blocks: usize,
  pub mallocs: usize,
  pub frees: usize,
  pub callocs: usize,
  pub reallocs: usize,
  pub reuses: usize,
  pub grows: usize,
  pub shrinks: usize,
  pub splits: usize,
  pub merges: usize,
  pub requested: usize,
  pub heap_size: usize,
  /// Internal fragmentation, percent.
  pub internal: f64,
  /// External fragmentation, percent.
  pub external: f64,
}

impl Stats {
  pub(crate) fn collect(
    counters: &Counters,
    free_blocks: usize,
    internal: f64,
    external: f64,
  ) -> Self {
    Self {
      blocks: counters[Counter::Blocks],
      free_blocks,
      mallocs: counters[Counter::Mallocs],
      frees: counters[Counter::Frees],
      callocs: counters[Counter::Callocs],
      reallocs: counters[Counter::Reallocs],
      reuses: counters[Counter::Reuses],
      grows: counters[Counter::Grows],
      shrinks: counters[Counter::Shrinks],
      splits: counters[Counter::Splits],
      merges: counters[Counter::Merges],
      requested: counters[Counter::Requested],
      heap_size: counters[Counter::HeapSize],
      internal,
      external,
    }
  }
}

impl fmt::Display for Stats {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    let lines = [
      ("blocks:", self.blocks),
      ("free blocks:", self.free_blocks),
      ("mallocs:", self.mallocs),
      ("frees:", self.frees),
      ("callocs:", self.callocs),
      ("reallocs:", self.reallocs),
      ("reuses:", self.reuses),
      ("grows:", self.grows),
      ("shrinks:", self.shrinks),
      ("splits:", self.splits),
      ("merges:", self.merges),
      ("requested:", self.requested),
      ("heap size:", self.heap_size),
    ];

    for (label, value) in lines {
      writeln!(f, "{label:<13}{value}")?;
    }

    writeln!(f, "{:<13}{:4.2}", "internal:", self.internal)?;
    writeln!(f, "{:<13}{:4.2}", "external:", self.external)
  }
}

/// [`fmt::Write`] straight into a file descriptor with `write(2)`. No
/// buffering and no allocation, so it is usable from inside the allocator.
pub struct FdWriter<'fd> {
  fd: BorrowedFd<'fd>,
}

impl<'fd> FdWriter<'fd> {
  pub fn new(fd: BorrowedFd<'fd>) -> Self {
    Self { fd }
  }
}

impl fmt::Write for FdWriter<'_> {
  fn write_str(
    &mut self,
    s: &str,
  ) -> fmt::Result {
    let mut bytes = s.as_bytes();

    while !bytes.is_empty() {
      let written = unsafe {
        libc::write(
          self.fd.as_raw_fd(),
          bytes.as_ptr().cast(),
          bytes.len(),
        )
      };

      if written < 0 {
        if io::Error::last_os_error().kind() == io::ErrorKind::Interrupted {
          continue;
        }
        return Err(fmt::Error);
      }

      if written == 0 {
        return Err(fmt::Error);
      }

      bytes = &bytes[written as usize..];
    }

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use std::{fmt::Write, fs::File, io::Read, os::fd::AsFd};

  use super::*;

  #[test]
  fn counters_index_by_name() {
    let mut counters = Counters::new();

    counters[Counter::Mallocs] += 3;
    counters[Counter::HeapSize] += 4096;
    counters[Counter::HeapSize] -= 1024;

    assert_eq!(counters[Counter::Mallocs], 3);
    assert_eq!(counters[Counter::HeapSize], 3072);
    assert_eq!(counters[Counter::Frees], 0);
  }

  #[test]
  fn init_happens_once() {
    let mut counters = Counters::new();

    assert!(!counters.is_initialized());
    assert!(counters.init());
    assert!(counters.is_initialized());
    assert!(!counters.init());

    assert!(counters.take_output().is_some());
    assert!(counters.take_output().is_none());
  }

  #[test]
  fn report_layout() {
    let stats = Stats {
      blocks: 2,
      free_blocks: 1,
      mallocs: 5,
      requested: 300,
      heap_size: 512,
      internal: 1.5,
      ..Stats::default()
    };

    let report = stats.to_string();
    let lines: Vec<&str> = report.lines().collect();

    assert_eq!(lines.len(), 15);
    assert_eq!(lines[0], "blocks:      2");
    assert_eq!(lines[1], "free blocks: 1");
    assert_eq!(lines[2], "mallocs:     5");
    assert_eq!(lines[11], "requested:   300");
    assert_eq!(lines[12], "heap size:   512");
    assert_eq!(lines[13], "internal:    1.50");
    assert_eq!(lines[14], "external:    0.00");
  }

  #[test]
  fn fd_writer_writes_everything() {
    let mut fds = [0; 2];
    assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);

    let (reader, writer) = unsafe {
      (
        File::from_raw_fd(fds[0]),
        OwnedFd::from_raw_fd(fds[1]),
      )
    };

    writeln!(FdWriter::new(writer.as_fd()), "heap size:   {}", 64).unwrap();
    drop(writer);

    let mut output = String::new();
    let mut reader = reader;
    reader.read_to_string(&mut output).unwrap();

    assert_eq!(output, "heap size:   64\n");
  }

  #[test]
  fn fd_writer_stops_on_failed_write() {
    let full = File::options().write(true).open("/dev/full").unwrap();

    let result = write!(FdWriter::new(full.as_fd()), "blocks:      {}", 1);
    assert_eq!(result, Err(fmt::Error));
  }
}
