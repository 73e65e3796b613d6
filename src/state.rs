use std::{
  cell::Cell,
  sync::{
    Arc, Mutex, MutexGuard,
    atomic::{AtomicBool, AtomicU64, Ordering},
  },
};

use tracing::{debug, trace};

use crate::bucket::{Bucket, BucketKind};
use crate::config::ProfilerConfig;
use crate::dump::StackDumper;
use crate::record::{BlockProfileRecord, MemProfileRecord, StackRecord};
use crate::registry::{WorkerId, WorkerRegistry};
use crate::snapshot::{BlockSnapshot, MemSnapshot};
use crate::stack::StackSignature;
use crate::stack_capture::StackCollector;
use crate::table::BucketTable;
use crate::trace::TraceFormatter;
use crate::world::World;

/// Extra records requested on each retry of an undersized snapshot buffer.
const SNAPSHOT_SLACK: usize = 50;

thread_local! {
  static IN_PROFILER: Cell<bool> = const { Cell::new(false) };
}

/// Run `func` with the reentrancy flag set, unless it is already set on this
/// thread.
fn with_guard<F, R>(func: F) -> Option<R>
where
  F: FnOnce() -> R,
{
  IN_PROFILER.with(|flag| {
    if flag.get() {
      None
    } else {
      Some(hold_flag(flag, func))
    }
  })
}

/// Run `func` with the reentrancy flag set, whatever its current value.
fn hold<F, R>(func: F) -> R
where
  F: FnOnce() -> R,
{
  IN_PROFILER.with(|flag| hold_flag(flag, func))
}

fn hold_flag<F, R>(flag: &Cell<bool>, func: F) -> R
where
  F: FnOnce() -> R,
{
  struct Reset<'a>(&'a Cell<bool>, bool);

  impl Drop for Reset<'_> {
    fn drop(&mut self) {
      self.0.set(self.1);
    }
  }

  let _reset = Reset(flag, flag.replace(true));

  func()
}

/// Thin builder that customizes `ProfilerConfig` without exposing all knobs
/// up front.
#[derive(Debug, Default)]
pub struct ProfilerBuilder {
  config: ProfilerConfig,
}

impl ProfilerBuilder {
  #[must_use]
  pub fn new() -> Self {
    Self {
      config: ProfilerConfig::default(),
    }
  }

  #[must_use]
  pub fn with_config(mut self, config: ProfilerConfig) -> Self {
    self.config = config;
    self
  }

  /// Reserve room for `capacity` buckets when the profiler is built.
  ///
  /// Recording never allocates under the profile lock until this many
  /// distinct stacks have been seen. Past that point the arena grows through
  /// the global allocator with the lock held, so an allocator that records
  /// into this profiler should size it for its expected number of sites.
  #[must_use]
  pub fn bucket_capacity(mut self, capacity: usize) -> Self {
    self.config.bucket_capacity = capacity;
    self
  }

  #[must_use]
  pub fn hash_chains(mut self, chains: usize) -> Self {
    self.config = self.config.with_hash_chains(chains);
    self
  }

  #[must_use]
  pub fn max_stack_depth(mut self, depth: usize) -> Self {
    self.config = self.config.with_max_stack_depth(depth);
    self
  }

  #[must_use]
  pub fn skip_frames(mut self, frames: usize) -> Self {
    self.config.skip_frames = frames;
    self
  }

  #[must_use]
  pub fn start_enabled(mut self, enabled: bool) -> Self {
    self.config.start_enabled = enabled;
    self
  }

  #[must_use]
  pub fn finish(self) -> Profiler {
    Profiler::with_config(self.config)
  }
}

#[derive(Debug)]
struct ProfilerInner {
  collection_cycles: AtomicU64,
  collector: StackCollector,
  config: ProfilerConfig,
  dropped_events: AtomicU64,
  enabled: AtomicBool,
  table: Mutex<BucketTable>,
  workers: WorkerRegistry,
}

/// Entry point for recording events and exporting profiles.
///
/// All bucket state sits behind one lock. Recording, epoch rotation and the
/// memory and blocking exporters take it; the thread creation exporter reads
/// the lock-free worker registry instead.
///
/// Every entry point marks the calling thread as inside the profiler. A
/// recording call that arrives while the mark is set (for example from an
/// allocator hook triggered by the profiler itself) is dropped and counted
/// rather than recursing into the table.
#[derive(Clone, Debug)]
pub struct Profiler {
  inner: Arc<ProfilerInner>,
}

impl Default for Profiler {
  fn default() -> Self {
    Self::new()
  }
}

impl Profiler {
  #[must_use]
  pub fn new() -> Self {
    Self::with_config(ProfilerConfig::default())
  }

  #[must_use]
  pub fn with_config(config: ProfilerConfig) -> Self {
    let inner = ProfilerInner {
      collection_cycles: AtomicU64::new(0),
      collector: StackCollector::new(&config),
      dropped_events: AtomicU64::new(0),
      enabled: AtomicBool::new(config.start_enabled),
      table: Mutex::new(BucketTable::with_config(&config)),
      workers: WorkerRegistry::new(),
      config,
    };

    Self {
      inner: Arc::new(inner),
    }
  }

  #[must_use]
  pub fn builder() -> ProfilerBuilder {
    ProfilerBuilder::new()
  }

  #[must_use]
  pub fn config(&self) -> &ProfilerConfig {
    &self.inner.config
  }

  #[must_use]
  pub fn collector(&self) -> &StackCollector {
    &self.inner.collector
  }

  pub fn enable(&self) {
    self.inner.enabled.store(true, Ordering::Release);
  }

  pub fn disable(&self) {
    self.inner.enabled.store(false, Ordering::Release);
  }

  #[must_use]
  pub fn enabled(&self) -> bool {
    self.inner.enabled.load(Ordering::Acquire)
  }

  /// Events discarded because they arrived from inside the profiler.
  #[must_use]
  pub fn dropped_events(&self) -> u64 {
    self.inner.dropped_events.load(Ordering::Relaxed)
  }

  /// Completed collection cycles reported through
  /// `on_collection_cycle_complete`.
  #[must_use]
  pub fn collection_cycles(&self) -> u64 {
    self.inner.collection_cycles.load(Ordering::Relaxed)
  }

  #[must_use]
  pub fn bucket_count(&self, kind: BucketKind) -> usize {
    hold(|| self.lock_table().len(kind))
  }

  pub fn record_allocation(&self, signature: &StackSignature, bytes: u64) {
    self.record(BucketKind::Memory, signature, |bucket| {
      if let Some(counters) = bucket.memory_mut() {
        counters.on_allocation(bytes);
      }
    });
  }

  pub fn record_free(&self, signature: &StackSignature, bytes: u64) {
    self.record(BucketKind::Memory, signature, |bucket| {
      if let Some(counters) = bucket.memory_mut() {
        counters.on_free(bytes);
      }
    });
  }

  pub fn record_blocking_event(&self, signature: &StackSignature, cycles: u64) {
    self.record(BucketKind::Blocking, signature, |bucket| {
      if let Some(counters) = bucket.blocking_mut() {
        counters.on_event(cycles);
      }
    });
  }

  /// Record an allocation attributed to the caller's current stack.
  pub fn record_allocation_here(&self, bytes: u64) {
    if let Some(signature) = self.capture_here() {
      self.record_allocation(&signature, bytes);
    }
  }

  /// Record a free attributed to the caller's current stack.
  pub fn record_free_here(&self, bytes: u64) {
    if let Some(signature) = self.capture_here() {
      self.record_free(&signature, bytes);
    }
  }

  /// Record a blocking event attributed to the caller's current stack.
  pub fn record_blocking_event_here(&self, cycles: u64) {
    if let Some(signature) = self.capture_here() {
      self.record_blocking_event(&signature, cycles);
    }
  }

  fn capture_here(&self) -> Option<StackSignature> {
    if !self.enabled() {
      return None;
    }

    let signature = with_guard(|| self.inner.collector.capture());
    if signature.is_none() {
      self.inner.dropped_events.fetch_add(1, Ordering::Relaxed);
    }
    signature
  }

  fn record<F>(&self, kind: BucketKind, signature: &StackSignature, apply: F)
  where
    F: FnOnce(&mut Bucket),
  {
    if !self.enabled() {
      return;
    }

    let recorded = with_guard(|| {
      let mut table = self.lock_table();
      let id = table.lookup_or_create(kind, signature);
      if let Some(bucket) = table.get_mut(id) {
        apply(bucket);
      }
    });

    if recorded.is_none() {
      self.inner.dropped_events.fetch_add(1, Ordering::Relaxed);
      trace!(?kind, "dropped reentrant profiling event");
    }
  }

  /// Register a worker, remembering the stack that created it.
  pub fn register_worker(&self, create_stack: StackSignature) -> WorkerId {
    self.inner.workers.register(create_stack)
  }

  /// Register a worker created from the caller's current stack.
  pub fn register_worker_here(&self) -> WorkerId {
    let create_stack = hold(|| self.inner.collector.capture());
    self.register_worker(create_stack)
  }

  #[must_use]
  pub fn workers(&self) -> &WorkerRegistry {
    &self.inner.workers
  }

  /// Advance every memory bucket by one generation. Called once per
  /// completed collection cycle.
  pub fn on_collection_cycle_complete(&self) {
    let buckets = hold(|| {
      let mut table = self.lock_table();
      table.rotate();
      table.len(BucketKind::Memory)
    });

    let cycle = self.inner.collection_cycles.fetch_add(1, Ordering::Relaxed);
    debug!(cycle = cycle + 1, buckets, "rotated memory profile generations");
  }

  /// Copy the memory profile into `out`.
  ///
  /// Returns the number of records the profile holds and whether they were
  /// copied. When `out` is too short nothing is written and the caller should
  /// retry with at least the returned count. Buckets whose cumulative
  /// allocated and freed bytes are equal are skipped unless `include_zeroed`
  /// is set.
  ///
  /// If no collection cycle has folded anything into the cumulative
  /// generation yet, two rotations are forced first so that allocations are
  /// visible before the collector has ever run.
  pub fn mem_profile(
    &self,
    out: &mut [MemProfileRecord],
    include_zeroed: bool,
  ) -> (usize, bool) {
    let (n, complete, flushed) = hold(|| {
      let mut table = self.lock_table();

      let included = |bucket: &&Bucket| {
        bucket
          .memory()
          .is_some_and(|counters| include_zeroed || counters.in_use())
      };

      let mut n = table.iter(BucketKind::Memory).filter(included).count();

      let flushed = table.memory_pristine();
      if flushed {
        table.rotate();
        table.rotate();
        n = table.iter(BucketKind::Memory).filter(included).count();
      }

      if n > out.len() {
        return (n, false, flushed);
      }

      for (record, bucket) in out
        .iter_mut()
        .zip(table.iter(BucketKind::Memory).filter(included))
      {
        if let Some(counters) = bucket.memory() {
          record.fill(counters, bucket.signature());
        }
      }

      (n, true, flushed)
    });

    if flushed {
      debug!("no cumulative memory data yet, flushed pending generations");
    }
    if !complete {
      debug!(needed = n, capacity = out.len(), "memory profile truncated");
    }

    (n, complete)
  }

  /// Copy the blocking profile into `out`, with the same capacity contract
  /// as `mem_profile`. Every blocking bucket is reported.
  pub fn block_profile(&self, out: &mut [BlockProfileRecord]) -> (usize, bool) {
    let (n, complete) = hold(|| {
      let table = self.lock_table();

      let n = table.len(BucketKind::Blocking);
      if n > out.len() {
        return (n, false);
      }

      for (record, bucket) in
        out.iter_mut().zip(table.iter(BucketKind::Blocking))
      {
        if let Some(counters) = bucket.blocking() {
          record.fill(counters, bucket.signature());
        }
      }

      (n, true)
    });

    if !complete {
      debug!(needed = n, capacity = out.len(), "block profile truncated");
    }

    (n, complete)
  }

  /// Copy the creation stack of every registered worker into `out`.
  ///
  /// Reads one point-in-time snapshot of the registry and never takes the
  /// profile lock.
  pub fn thread_create_profile(&self, out: &mut [StackRecord]) -> (usize, bool) {
    let snapshot = self.inner.workers.snapshot();

    let n = snapshot.clone().count();
    if n > out.len() {
      debug!(needed = n, capacity = out.len(), "thread profile truncated");
      return (n, false);
    }

    for (record, worker) in out.iter_mut().zip(snapshot) {
      record.fill(worker.create_stack());
    }

    (n, true)
  }

  /// Owned copy of the memory profile, growing the buffer until the export
  /// completes.
  #[must_use]
  pub fn mem_snapshot(&self, include_zeroed: bool) -> MemSnapshot {
    let mut records = Vec::new();
    loop {
      let (n, complete) = self.mem_profile(&mut records, include_zeroed);
      if complete {
        records.truncate(n);
        return MemSnapshot::new(records, self.collection_cycles());
      }
      records.resize(n + SNAPSHOT_SLACK, MemProfileRecord::default());
    }
  }

  /// Owned copy of the blocking profile.
  #[must_use]
  pub fn block_snapshot(&self) -> BlockSnapshot {
    let mut records = Vec::new();
    loop {
      let (n, complete) = self.block_profile(&mut records);
      if complete {
        records.truncate(n);
        return BlockSnapshot::new(records);
      }
      records.resize(n + SNAPSHOT_SLACK, BlockProfileRecord::default());
    }
  }

  /// Format the calling task's stack into `buf`, followed by every other
  /// task's when `include_all_tasks` is set. Returns the bytes written.
  pub fn capture_stack<W, F>(
    &self,
    world: &W,
    formatter: &F,
    buf: &mut [u8],
    include_all_tasks: bool,
  ) -> usize
  where
    W: World + ?Sized,
    F: TraceFormatter + ?Sized,
  {
    StackDumper::new(world, formatter, self.inner.collector.clone())
      .capture_trace(buf, include_all_tasks)
  }

  fn lock_table(&self) -> MutexGuard<'_, BucketTable> {
    match self.inner.table.lock() {
      Ok(guard) => guard,
      Err(err) => err.into_inner(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::stack::STACK_DEPTH;

  fn sig(frames: &[usize]) -> StackSignature {
    StackSignature::new(frames)
  }

  #[test]
  fn disabled_profiler_drops_events() {
    let profiler = Profiler::builder().start_enabled(false).finish();
    profiler.record_allocation(&sig(&[1]), 16);
    profiler.record_blocking_event(&sig(&[1]), 5);

    assert_eq!(profiler.bucket_count(BucketKind::Memory), 0);
    assert_eq!(profiler.bucket_count(BucketKind::Blocking), 0);

    profiler.enable();
    profiler.record_allocation(&sig(&[1]), 16);
    assert_eq!(profiler.bucket_count(BucketKind::Memory), 1);
  }

  #[test]
  fn reentrant_recording_is_dropped() {
    let profiler = Profiler::new();

    hold(|| profiler.record_allocation(&sig(&[1]), 16));

    assert_eq!(profiler.dropped_events(), 1);
    assert_eq!(profiler.bucket_count(BucketKind::Memory), 0);

    profiler.record_allocation(&sig(&[1]), 16);
    assert_eq!(profiler.bucket_count(BucketKind::Memory), 1);
  }

  #[test]
  fn recording_here_uses_captured_stack() {
    let profiler = Profiler::builder().max_stack_depth(8).finish();
    profiler.record_allocation_here(64);

    let snapshot = profiler.mem_snapshot(true);
    assert_eq!(snapshot.records().len(), 1);
    let record = &snapshot.records()[0];
    assert_eq!(record.alloc_bytes, 64);
    assert!(!record.stack().is_empty());
    assert!(record.stack().len() <= 8);
  }

  #[test]
  fn mem_profile_reports_cumulative_after_cycles() {
    let profiler = Profiler::new();
    profiler.record_allocation(&sig(&[1]), 100);
    profiler.on_collection_cycle_complete();
    profiler.on_collection_cycle_complete();
    profiler.record_allocation(&sig(&[1]), 7);

    let mut records = [MemProfileRecord::default(); 2];
    assert_eq!(profiler.mem_profile(&mut records, true), (1, true));
    assert_eq!(records[0].alloc_bytes, 100);
    assert_eq!(records[0].alloc_objects, 1);
    assert_eq!(profiler.collection_cycles(), 2);
  }

  #[test]
  fn thread_create_profile_copies_creation_stacks() {
    let profiler = Profiler::new();
    profiler.register_worker(sig(&[0xa]));
    profiler.register_worker(sig(&[0xb, 0xc]));

    let mut short = [StackRecord::default(); 1];
    assert_eq!(profiler.thread_create_profile(&mut short), (2, false));
    assert_eq!(short[0], StackRecord::default());

    let mut records = [StackRecord::default(); 3];
    assert_eq!(profiler.thread_create_profile(&mut records), (2, true));
    assert_eq!(records[0].stack(), &[0xb, 0xc]);
    assert_eq!(records[1].stack(), &[0xa]);
    assert_eq!(records[2].stack0, [0; STACK_DEPTH]);
  }

  #[test]
  fn register_worker_here_captures_a_stack() {
    let profiler = Profiler::new();
    let id = profiler.register_worker_here();

    let worker = profiler
      .workers()
      .snapshot()
      .find(|worker| worker.id() == id)
      .expect("registered worker");
    assert!(!worker.create_stack().is_empty());
  }

  #[test]
  fn snapshots_grow_until_complete() {
    let profiler = Profiler::new();
    for pc in 1..=120 {
      profiler.record_allocation(&sig(&[pc]), 8);
      profiler.record_blocking_event(&sig(&[pc]), 3);
    }

    assert_eq!(profiler.mem_snapshot(true).records().len(), 120);
    assert_eq!(profiler.block_snapshot().records().len(), 120);
  }
}
