use crate::stack::STACK_DEPTH;

/// Controls how the profiler captures stacks and sizes its bucket table.
#[derive(Debug, Clone)]
pub struct ProfilerConfig {
  /// Buckets reserved in the arena up front. Creating a bucket beyond this
  /// grows the arena through the global allocator while the profile lock is
  /// held.
  pub bucket_capacity: usize,
  /// Number of hash chains in the bucket table.
  pub hash_chains: usize,
  /// Maximum number of return addresses captured per event.
  pub max_stack_depth: usize,
  /// Innermost frames dropped from captured stacks, on top of the profiler's
  /// own frames.
  pub skip_frames: usize,
  /// Whether recording is enabled as soon as the profiler is constructed.
  pub start_enabled: bool,
}

impl Default for ProfilerConfig {
  fn default() -> Self {
    Self {
      bucket_capacity: 1024,
      hash_chains: 16_381,
      max_stack_depth: STACK_DEPTH,
      skip_frames: 0,
      start_enabled: true,
    }
  }
}

impl ProfilerConfig {
  /// Explicitly disable recording until `Profiler::enable` is called.
  #[must_use]
  pub fn disabled(mut self) -> Self {
    self.start_enabled = false;
    self
  }

  /// Builder-style helper to adjust the maximum stack depth, clamped to
  /// `1..=STACK_DEPTH`.
  #[must_use]
  pub fn with_max_stack_depth(mut self, depth: usize) -> Self {
    self.max_stack_depth = depth.clamp(1, STACK_DEPTH);
    self
  }

  #[must_use]
  pub fn with_hash_chains(mut self, chains: usize) -> Self {
    self.hash_chains = chains.max(1);
    self
  }
}
