//! Property-based tests for the bucket table and the exporters.

use std::collections::HashSet;

use proptest::prelude::*;
use stackprof::{
  Bucket, BucketKind, BucketTable, MemCounts, MemProfileRecord, Profiler,
  StackSignature,
};

fn kind() -> impl Strategy<Value = BucketKind> {
  prop_oneof![Just(BucketKind::Memory), Just(BucketKind::Blocking)]
}

/// Short stacks over a small address alphabet, so duplicates are common.
fn signature() -> impl Strategy<Value = StackSignature> {
  prop::collection::vec(1usize..6, 0..4)
    .prop_map(|frames| StackSignature::new(&frames))
}

#[derive(Debug, Clone)]
enum Event {
  Alloc(u8, u64),
  Free(u8, u64),
  Cycle,
}

fn event() -> impl Strategy<Value = Event> {
  prop_oneof![
    (0u8..4, 1u64..512).prop_map(|(site, bytes)| Event::Alloc(site, bytes)),
    (0u8..4, 1u64..512).prop_map(|(site, bytes)| Event::Free(site, bytes)),
    Just(Event::Cycle),
  ]
}

fn site(index: u8) -> StackSignature {
  StackSignature::new(&[0x100 + usize::from(index)])
}

proptest! {
  /// Buckets created equals distinct (kind, signature) pairs seen.
  #[test]
  fn lookup_or_create_deduplicates(
    calls in prop::collection::vec((kind(), signature()), 0..200),
    chains in 1usize..32,
  ) {
    let mut table = BucketTable::with_capacity(chains, 0);
    let mut distinct = HashSet::new();

    for (kind, signature) in &calls {
      let id = table.lookup_or_create(*kind, signature);
      prop_assert_eq!(table.lookup_or_create(*kind, signature), id);
      distinct.insert((*kind, *signature));
    }

    let created =
      table.len(BucketKind::Memory) + table.len(BucketKind::Blocking);
    prop_assert_eq!(created, distinct.len());
  }

  /// Cumulative counters never decrease, and after two quiet rotations they
  /// hold everything ever recorded.
  #[test]
  fn rotation_is_monotone_and_drains(events in prop::collection::vec(event(), 0..100)) {
    let profiler = Profiler::new();
    let mut expected = [MemCounts::ZERO; 4];
    let mut last = vec![MemProfileRecord::default(); 4];

    for event in &events {
      match *event {
        Event::Alloc(index, bytes) => {
          profiler.record_allocation(&site(index), bytes);
          let counts = &mut expected[usize::from(index)];
          counts.allocs += 1;
          counts.alloc_bytes += bytes;
        }
        Event::Free(index, bytes) => {
          profiler.record_free(&site(index), bytes);
          let counts = &mut expected[usize::from(index)];
          counts.frees += 1;
          counts.free_bytes += bytes;
        }
        Event::Cycle => profiler.on_collection_cycle_complete(),
      }

      let snapshot = profiler.mem_snapshot(true);
      for record in snapshot.records() {
        let index = record.stack()[0] - 0x100;
        prop_assert!(record.alloc_bytes >= last[index].alloc_bytes);
        prop_assert!(record.free_bytes >= last[index].free_bytes);
        last[index] = *record;
      }
    }

    profiler.on_collection_cycle_complete();
    profiler.on_collection_cycle_complete();

    let snapshot = profiler.mem_snapshot(true);
    for record in snapshot.records() {
      let counts = expected[record.stack()[0] - 0x100];
      prop_assert_eq!(record.alloc_bytes as u64, counts.alloc_bytes);
      prop_assert_eq!(record.alloc_objects as u64, counts.allocs);
      prop_assert_eq!(record.free_bytes as u64, counts.free_bytes);
      prop_assert_eq!(record.free_objects as u64, counts.frees);
    }
  }

  /// Exporting twice with no events in between gives the same answer, and a
  /// zero-capacity export never reports completion for a non-empty profile.
  #[test]
  fn exports_are_stable(
    events in prop::collection::vec(event(), 0..60),
    include_zeroed in any::<bool>(),
  ) {
    let profiler = Profiler::new();
    for event in &events {
      match *event {
        Event::Alloc(index, bytes) => profiler.record_allocation(&site(index), bytes),
        Event::Free(index, bytes) => profiler.record_free(&site(index), bytes),
        Event::Cycle => profiler.on_collection_cycle_complete(),
      }
    }

    let (n, complete) = profiler.mem_profile(&mut [], include_zeroed);
    prop_assert_eq!(complete, n == 0);

    let mut first = vec![MemProfileRecord::default(); 4];
    let mut second = vec![MemProfileRecord::default(); 4];
    let first_result = profiler.mem_profile(&mut first, include_zeroed);
    let second_result = profiler.mem_profile(&mut second, include_zeroed);

    prop_assert_eq!(first_result, (n, true));
    prop_assert_eq!(first_result, second_result);
    prop_assert_eq!(first, second);
  }

  /// Bucket iteration follows creation order within each kind.
  #[test]
  fn iteration_follows_creation_order(
    calls in prop::collection::vec((kind(), signature()), 0..100),
  ) {
    let mut table = BucketTable::with_capacity(7, 0);
    let mut order: Vec<(BucketKind, StackSignature)> = Vec::new();

    for (kind, signature) in &calls {
      table.lookup_or_create(*kind, signature);
      if !order.contains(&(*kind, *signature)) {
        order.push((*kind, *signature));
      }
    }

    for kind in [BucketKind::Memory, BucketKind::Blocking] {
      let expected: Vec<StackSignature> = order
        .iter()
        .filter(|(k, _)| *k == kind)
        .map(|(_, signature)| *signature)
        .collect();
      let actual: Vec<StackSignature> =
        table.iter(kind).map(|bucket: &Bucket| *bucket.signature()).collect();
      prop_assert_eq!(actual, expected);
    }
  }
}
