use crate::config::ProfilerConfig;
use crate::stack::{STACK_DEPTH, StackSignature};

/// Captures the calling thread's raw return addresses into a signature.
#[derive(Debug, Clone)]
pub struct StackCollector {
  max_depth: usize,
  skip_frames: usize,
}

impl StackCollector {
  /// Walk the current stack without symbolizing it.
  ///
  /// The walk stops once `max_depth` addresses have been collected, so the
  /// signature never needs a heap buffer. Null instruction pointers are
  /// skipped because exported records use zero as the terminator.
  #[inline(never)]
  #[must_use]
  pub fn capture(&self) -> StackSignature {
    let mut frames = [0usize; STACK_DEPTH];
    let mut len = 0;
    let mut remaining_skip = self.skip_frames;

    backtrace::trace(|frame| {
      let ip = frame.ip() as usize;
      if ip == 0 {
        return true;
      }

      if remaining_skip > 0 {
        remaining_skip -= 1;
        return true;
      }

      if len >= self.max_depth {
        return false;
      }

      frames[len] = ip;
      len += 1;
      true
    });

    StackSignature::new(&frames[..len])
  }

  #[must_use]
  pub fn max_depth(&self) -> usize {
    self.max_depth
  }

  #[must_use]
  pub fn new(config: &ProfilerConfig) -> Self {
    Self {
      max_depth: config.max_stack_depth.clamp(1, STACK_DEPTH),
      skip_frames: config.skip_frames,
    }
  }
}
