use std::{
  ffi::{OsStr, c_void},
  fmt::{self, Write as _},
  path::Path,
};

use backtrace::SymbolName;

use crate::stack::StackSignature;

/// Allocation-free writer over a caller-supplied byte buffer.
///
/// Output that does not fit is silently dropped: a partial trace is still a
/// useful diagnostic, so writes never fail.
#[derive(Debug)]
pub struct TraceBuffer<'a> {
  buf: &'a mut [u8],
  truncated: bool,
  written: usize,
}

impl<'a> TraceBuffer<'a> {
  #[must_use]
  pub fn new(buf: &'a mut [u8]) -> Self {
    Self {
      buf,
      truncated: false,
      written: 0,
    }
  }

  pub fn push_bytes(&mut self, bytes: &[u8]) {
    let room = self.buf.len() - self.written;
    let take = bytes.len().min(room);
    self.buf[self.written..self.written + take].copy_from_slice(&bytes[..take]);
    self.written += take;
    if take < bytes.len() {
      self.truncated = true;
    }
  }

  #[must_use]
  pub fn is_full(&self) -> bool {
    self.written == self.buf.len()
  }

  #[must_use]
  pub fn truncated(&self) -> bool {
    self.truncated
  }

  #[must_use]
  pub fn written(&self) -> usize {
    self.written
  }
}

impl fmt::Write for TraceBuffer<'_> {
  fn write_str(&mut self, s: &str) -> fmt::Result {
    self.push_bytes(s.as_bytes());
    Ok(())
  }
}

/// Turns a captured stack into text. Implementations must not assume the
/// buffer has room for everything they write.
pub trait TraceFormatter {
  fn write_frames(&self, stack: &StackSignature, out: &mut TraceBuffer<'_>);
}

/// Writes one hexadecimal return address per line.
#[derive(Debug, Default, Clone, Copy)]
pub struct RawFormatter;

impl TraceFormatter for RawFormatter {
  fn write_frames(&self, stack: &StackSignature, out: &mut TraceBuffer<'_>) {
    for pc in stack.frames() {
      if out.is_full() {
        break;
      }
      let _ = writeln!(out, "\t{pc:#x}");
    }
  }
}

/// Resolves each address through the platform's debug information.
///
/// Symbol resolution may allocate, so this formatter is meant for tooling and
/// tests rather than for dumps taken from inside an allocator.
#[derive(Debug, Default, Clone, Copy)]
pub struct SymbolizingFormatter;

impl TraceFormatter for SymbolizingFormatter {
  fn write_frames(&self, stack: &StackSignature, out: &mut TraceBuffer<'_>) {
    for &pc in stack.frames() {
      if out.is_full() {
        break;
      }

      let mut resolved = false;
      backtrace::resolve(pc as *mut c_void, |symbol| {
        if resolved {
          return;
        }
        resolved = true;

        match symbol.name() {
          Some(name) => {
            let _ = writeln!(out, "{}", symbol_name_to_string(&name));
          }
          None => {
            let _ = writeln!(out, "<unknown>");
          }
        }

        let file = symbol
          .filename()
          .and_then(path_to_str)
          .unwrap_or("<native>");
        let line = symbol.lineno().unwrap_or(0);
        let _ = writeln!(out, "\t{file}:{line} pc={pc:#x}");
      });

      if !resolved {
        let _ = writeln!(out, "<unknown>\n\tpc={pc:#x}");
      }
    }
  }
}

fn path_to_str(path: &Path) -> Option<&str> {
  path
    .to_str()
    .or_else(|| path.file_name().and_then(OsStr::to_str))
}

fn symbol_name_to_string(name: &SymbolName<'_>) -> String {
  format!("{name}")
}
