use crate::stack::StackSignature;

/// Event family a bucket aggregates. Fixed when the bucket is created.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum BucketKind {
  Memory,
  Blocking,
}

impl BucketKind {
  pub(crate) fn seed(self) -> u64 {
    match self {
      Self::Memory => 0x6d65_6d00,
      Self::Blocking => 0x626c_6b00,
    }
  }
}

/// Stable arena index of a bucket inside its `BucketTable`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct BucketId(pub(crate) usize);

impl BucketId {
  #[must_use]
  pub fn index(self) -> usize {
    self.0
  }
}

/// Allocation and free totals for one generation.
#[derive(Debug, Default, Clone, Copy, Eq, PartialEq)]
pub struct MemCounts {
  pub alloc_bytes: u64,
  pub allocs: u64,
  pub free_bytes: u64,
  pub frees: u64,
}

impl MemCounts {
  pub const ZERO: Self = Self {
    alloc_bytes: 0,
    allocs: 0,
    free_bytes: 0,
    frees: 0,
  };

  fn absorb(&mut self, other: &Self) {
    self.alloc_bytes = self.alloc_bytes.saturating_add(other.alloc_bytes);
    self.allocs = self.allocs.saturating_add(other.allocs);
    self.free_bytes = self.free_bytes.saturating_add(other.free_bytes);
    self.frees = self.frees.saturating_add(other.frees);
  }

  #[must_use]
  pub fn is_zero(&self) -> bool {
    *self == Self::ZERO
  }
}

/// Memory statistics split into three generations.
///
/// Fresh events land in `recent`; each collection cycle shifts `recent` into
/// `previous` and folds `previous` into `cumulative`.
#[derive(Debug, Default, Clone, Copy, Eq, PartialEq)]
pub struct MemoryCounters {
  pub cumulative: MemCounts,
  pub previous: MemCounts,
  pub recent: MemCounts,
}

impl MemoryCounters {
  pub(crate) fn on_allocation(&mut self, bytes: u64) {
    self.recent.allocs = self.recent.allocs.saturating_add(1);
    self.recent.alloc_bytes = self.recent.alloc_bytes.saturating_add(bytes);
  }

  pub(crate) fn on_free(&mut self, bytes: u64) {
    self.recent.frees = self.recent.frees.saturating_add(1);
    self.recent.free_bytes = self.recent.free_bytes.saturating_add(bytes);
  }

  pub(crate) fn rotate(&mut self) {
    self.cumulative.absorb(&self.previous);
    self.previous = self.recent;
    self.recent = MemCounts::ZERO;
  }

  /// Whether the bucket belongs in a profile that omits fully freed sites.
  #[must_use]
  pub fn in_use(&self) -> bool {
    self.cumulative.alloc_bytes != self.cumulative.free_bytes
  }
}

/// Blocking statistics. Not generational: blocking is unrelated to
/// collection cycles.
#[derive(Debug, Default, Clone, Copy, Eq, PartialEq)]
pub struct BlockCounters {
  pub count: u64,
  pub cycles: u64,
}

impl BlockCounters {
  pub(crate) fn on_event(&mut self, cycles: u64) {
    self.count = self.count.saturating_add(1);
    self.cycles = self.cycles.saturating_add(cycles);
  }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Counters {
  Memory(MemoryCounters),
  Blocking(BlockCounters),
}

impl Counters {
  fn zeroed(kind: BucketKind) -> Self {
    match kind {
      BucketKind::Memory => Self::Memory(MemoryCounters::default()),
      BucketKind::Blocking => Self::Blocking(BlockCounters::default()),
    }
  }
}

/// Aggregation record for one distinct `(kind, stack)` pair.
///
/// Buckets live in the table's arena for the rest of the process. The two
/// link fields thread the bucket through its hash chain and through the
/// creation-order list of its kind.
#[derive(Debug, Clone)]
pub struct Bucket {
  pub(crate) all_next: Option<BucketId>,
  counters: Counters,
  pub(crate) hash: u64,
  pub(crate) hash_next: Option<BucketId>,
  kind: BucketKind,
  signature: StackSignature,
}

impl Bucket {
  pub(crate) fn new(
    kind: BucketKind,
    signature: StackSignature,
    hash: u64,
    hash_next: Option<BucketId>,
  ) -> Self {
    Self {
      all_next: None,
      counters: Counters::zeroed(kind),
      hash,
      hash_next,
      kind,
      signature,
    }
  }

  #[must_use]
  pub fn kind(&self) -> BucketKind {
    self.kind
  }

  #[must_use]
  pub fn signature(&self) -> &StackSignature {
    &self.signature
  }

  #[must_use]
  pub fn counters(&self) -> &Counters {
    &self.counters
  }

  #[must_use]
  pub fn memory(&self) -> Option<&MemoryCounters> {
    match &self.counters {
      Counters::Memory(counters) => Some(counters),
      Counters::Blocking(_) => None,
    }
  }

  #[must_use]
  pub fn blocking(&self) -> Option<&BlockCounters> {
    match &self.counters {
      Counters::Blocking(counters) => Some(counters),
      Counters::Memory(_) => None,
    }
  }

  pub(crate) fn memory_mut(&mut self) -> Option<&mut MemoryCounters> {
    match &mut self.counters {
      Counters::Memory(counters) => Some(counters),
      Counters::Blocking(_) => None,
    }
  }

  pub(crate) fn blocking_mut(&mut self) -> Option<&mut BlockCounters> {
    match &mut self.counters {
      Counters::Blocking(counters) => Some(counters),
      Counters::Memory(_) => None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn rotation_delays_recent_by_one_cycle() {
    let mut counters = MemoryCounters::default();
    counters.on_allocation(64);
    counters.on_free(16);

    counters.rotate();
    assert!(counters.cumulative.is_zero());
    assert_eq!(counters.previous.alloc_bytes, 64);
    assert!(counters.recent.is_zero());

    counters.rotate();
    assert_eq!(
      counters.cumulative,
      MemCounts {
        alloc_bytes: 64,
        allocs: 1,
        free_bytes: 16,
        frees: 1,
      }
    );
    assert!(counters.previous.is_zero());
    assert!(counters.in_use());
  }

  #[test]
  fn counters_match_bucket_kind() {
    let memory =
      Bucket::new(BucketKind::Memory, StackSignature::EMPTY, 0, None);
    assert!(memory.memory().is_some());
    assert!(memory.blocking().is_none());

    let mut blocking =
      Bucket::new(BucketKind::Blocking, StackSignature::EMPTY, 0, None);
    blocking
      .blocking_mut()
      .expect("blocking counters")
      .on_event(100);
    assert_eq!(
      blocking.blocking(),
      Some(&BlockCounters {
        count: 1,
        cycles: 100,
      })
    );
  }
}
