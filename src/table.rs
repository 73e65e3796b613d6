use tracing::trace;

use crate::bucket::{Bucket, BucketId, BucketKind};
use crate::config::ProfilerConfig;
use crate::stack::StackSignature;

#[derive(Debug, Default, Clone, Copy)]
struct KindList {
  head: Option<BucketId>,
  len: usize,
  tail: Option<BucketId>,
}

/// Deduplicating store mapping `(kind, signature)` to exactly one bucket.
///
/// Buckets sit in an append-only arena and are addressed by `BucketId`. Hash
/// chains and the per-kind creation-order lists are intrusive index links
/// stored on the buckets themselves, so neither lookup nor iteration needs
/// any allocation beyond arena growth.
#[derive(Debug)]
pub struct BucketTable {
  blocking: KindList,
  buckets: Vec<Bucket>,
  chains: Box<[Option<BucketId>]>,
  memory: KindList,
}

impl Default for BucketTable {
  fn default() -> Self {
    Self::new()
  }
}

impl BucketTable {
  #[must_use]
  pub fn new() -> Self {
    Self::with_config(&ProfilerConfig::default())
  }

  #[must_use]
  pub fn with_config(config: &ProfilerConfig) -> Self {
    Self::with_capacity(config.hash_chains, config.bucket_capacity)
  }

  #[must_use]
  pub fn with_capacity(hash_chains: usize, bucket_capacity: usize) -> Self {
    Self {
      blocking: KindList::default(),
      buckets: Vec::with_capacity(bucket_capacity),
      chains: vec![None; hash_chains.max(1)].into_boxed_slice(),
      memory: KindList::default(),
    }
  }

  /// Return the bucket for `(kind, signature)`, creating a zeroed one on
  /// first sight.
  ///
  /// A new bucket is pushed onto the front of its hash chain and appended to
  /// the creation-order list of its kind. Allocates only once the arena's
  /// reserved capacity is used up.
  pub fn lookup_or_create(
    &mut self,
    kind: BucketKind,
    signature: &StackSignature,
  ) -> BucketId {
    let hash = signature.mix(kind.seed());
    let chain = (hash % self.chains.len() as u64) as usize;

    let mut cursor = self.chains[chain];
    while let Some(id) = cursor {
      let bucket = &self.buckets[id.0];
      if bucket.hash == hash
        && bucket.kind() == kind
        && bucket.signature() == signature
      {
        return id;
      }
      cursor = bucket.hash_next;
    }

    let id = BucketId(self.buckets.len());
    self
      .buckets
      .push(Bucket::new(kind, *signature, hash, self.chains[chain]));
    self.chains[chain] = Some(id);

    if let Some(tail) = self.list(kind).tail {
      self.buckets[tail.0].all_next = Some(id);
    }
    let list = self.list_mut(kind);
    list.head = list.head.or(Some(id));
    list.tail = Some(id);
    list.len += 1;

    trace!(?kind, bucket = id.0, depth = signature.len(), "created bucket");

    id
  }

  #[must_use]
  pub fn get(&self, id: BucketId) -> Option<&Bucket> {
    self.buckets.get(id.0)
  }

  pub(crate) fn get_mut(&mut self, id: BucketId) -> Option<&mut Bucket> {
    self.buckets.get_mut(id.0)
  }

  /// Walk the buckets of one kind in creation order.
  #[must_use]
  pub fn iter(&self, kind: BucketKind) -> Buckets<'_> {
    Buckets {
      cursor: self.list(kind).head,
      table: self,
    }
  }

  #[must_use]
  pub fn is_empty(&self) -> bool {
    self.buckets.is_empty()
  }

  /// Number of buckets of one kind.
  #[must_use]
  pub fn len(&self, kind: BucketKind) -> usize {
    self.list(kind).len
  }

  /// Advance every memory bucket one generation: fold `previous` into
  /// `cumulative`, move `recent` to `previous`, zero `recent`.
  ///
  /// Rotating with no intervening events only shifts empty generations
  /// through, so calling it back to back is safe.
  pub fn rotate(&mut self) {
    let mut cursor = self.memory.head;
    while let Some(id) = cursor {
      let bucket = &mut self.buckets[id.0];
      if let Some(counters) = bucket.memory_mut() {
        counters.rotate();
      }
      cursor = bucket.all_next;
    }
  }

  /// True when no memory bucket has ever accumulated an allocation or free
  /// into its cumulative generation.
  #[must_use]
  pub fn memory_pristine(&self) -> bool {
    self.iter(BucketKind::Memory).all(|bucket| {
      bucket.memory().is_none_or(|counters| {
        counters.cumulative.allocs == 0 && counters.cumulative.frees == 0
      })
    })
  }

  fn list(&self, kind: BucketKind) -> &KindList {
    match kind {
      BucketKind::Memory => &self.memory,
      BucketKind::Blocking => &self.blocking,
    }
  }

  fn list_mut(&mut self, kind: BucketKind) -> &mut KindList {
    match kind {
      BucketKind::Memory => &mut self.memory,
      BucketKind::Blocking => &mut self.blocking,
    }
  }
}

/// Creation-order iterator over the buckets of one kind.
#[derive(Debug, Clone)]
pub struct Buckets<'a> {
  cursor: Option<BucketId>,
  table: &'a BucketTable,
}

impl<'a> Iterator for Buckets<'a> {
  type Item = &'a Bucket;

  fn next(&mut self) -> Option<Self::Item> {
    let bucket = self.table.buckets.get(self.cursor?.0)?;
    self.cursor = bucket.all_next;
    Some(bucket)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn sig(frames: &[usize]) -> StackSignature {
    StackSignature::new(frames)
  }

  #[test]
  fn reserved_buckets_are_created_without_growing_the_arena() {
    let mut table = BucketTable::with_capacity(7, 4);
    let reserved = table.buckets.capacity();
    assert!(reserved >= 4);

    for pc in 1..=4 {
      table.lookup_or_create(BucketKind::Memory, &sig(&[pc]));
    }

    assert_eq!(table.buckets.capacity(), reserved);
  }

  #[test]
  fn deduplicates_by_kind_and_signature() {
    let mut table = BucketTable::with_capacity(7, 4);

    let first = table.lookup_or_create(BucketKind::Memory, &sig(&[1, 2]));
    let again = table.lookup_or_create(BucketKind::Memory, &sig(&[1, 2]));
    let other_kind =
      table.lookup_or_create(BucketKind::Blocking, &sig(&[1, 2]));
    let other_stack = table.lookup_or_create(BucketKind::Memory, &sig(&[2]));

    assert_eq!(first, again);
    assert_ne!(first, other_kind);
    assert_ne!(first, other_stack);
    assert_eq!(table.len(BucketKind::Memory), 2);
    assert_eq!(table.len(BucketKind::Blocking), 1);
  }

  #[test]
  fn single_chain_still_resolves_every_signature() {
    let mut table = BucketTable::with_capacity(1, 0);
    let ids: Vec<_> = (0..64)
      .map(|pc| table.lookup_or_create(BucketKind::Memory, &sig(&[pc])))
      .collect();

    for (pc, id) in ids.iter().enumerate() {
      assert_eq!(
        table.lookup_or_create(BucketKind::Memory, &sig(&[pc])),
        *id
      );
    }
    assert_eq!(table.len(BucketKind::Memory), 64);
  }

  #[test]
  fn iterates_each_kind_in_creation_order() {
    let mut table = BucketTable::with_capacity(3, 0);
    table.lookup_or_create(BucketKind::Memory, &sig(&[30]));
    table.lookup_or_create(BucketKind::Blocking, &sig(&[99]));
    table.lookup_or_create(BucketKind::Memory, &sig(&[10]));
    table.lookup_or_create(BucketKind::Memory, &sig(&[20]));

    let order: Vec<usize> = table
      .iter(BucketKind::Memory)
      .map(|bucket| bucket.signature().frames()[0])
      .collect();
    assert_eq!(order, vec![30, 10, 20]);

    assert_eq!(table.iter(BucketKind::Blocking).count(), 1);
  }

  #[test]
  fn rotation_only_touches_memory_buckets() {
    let mut table = BucketTable::with_capacity(5, 0);
    let mem = table.lookup_or_create(BucketKind::Memory, &sig(&[1]));
    let blk = table.lookup_or_create(BucketKind::Blocking, &sig(&[1]));

    table
      .get_mut(mem)
      .and_then(Bucket::memory_mut)
      .expect("memory bucket")
      .on_allocation(32);
    table
      .get_mut(blk)
      .and_then(Bucket::blocking_mut)
      .expect("blocking bucket")
      .on_event(7);

    assert!(table.memory_pristine());
    table.rotate();
    assert!(table.memory_pristine());
    table.rotate();
    assert!(!table.memory_pristine());

    let counters = table
      .get(mem)
      .and_then(Bucket::memory)
      .expect("memory bucket");
    assert_eq!(counters.cumulative.alloc_bytes, 32);
    assert_eq!(
      table.get(blk).and_then(Bucket::blocking).map(|b| b.cycles),
      Some(7)
    );
  }
}
