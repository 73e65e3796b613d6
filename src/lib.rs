//! Stack-keyed allocation and blocking profiles for a managed runtime.
//!
//! Events are aggregated into buckets keyed by the call stack that produced
//! them. Memory buckets rotate their counters through three generations once
//! per collection cycle, so exporters always read totals that no in-flight
//! cycle can still change. Profiles are copied out with a count-then-copy
//! protocol into caller-owned buffers, and a stop-the-world coordinator can
//! dump the stacks of every task.

mod bucket;
mod config;
mod dump;
mod export;
mod proto;
mod record;
mod registry;
mod snapshot;
mod stack;
mod stack_capture;
mod state;
mod table;
mod trace;
mod world;

use {
  prost::Message,
  proto::{Location, Profile, Sample, ValueType},
  serde::{Serialize, Serializer, ser::SerializeStruct},
  std::{
    collections::HashMap,
    io::{self, Write},
  },
  thiserror::Error,
};

pub use {
  bucket::{
    BlockCounters, Bucket, BucketId, BucketKind, Counters, MemCounts,
    MemoryCounters,
  },
  config::ProfilerConfig,
  dump::{Rescheduled, StackDumper},
  export::{ExportError, build_block_profile, build_mem_profile},
  record::{BlockProfileRecord, MemProfileRecord, StackRecord},
  registry::{Worker, WorkerId, WorkerRegistry, Workers},
  snapshot::{BlockSnapshot, MemSnapshot},
  stack::{STACK_DEPTH, StackSignature},
  stack_capture::StackCollector,
  state::{Profiler, ProfilerBuilder},
  table::{BucketTable, Buckets},
  trace::{RawFormatter, SymbolizingFormatter, TraceBuffer, TraceFormatter},
  world::{
    PauseToken, SafepointWorld, TaskId, TaskInfo, TaskRegistration,
    TaskSnapshot, TaskStatus, World, WorldPause,
  },
};

pub mod pprof {
  //! Protobuf messages produced by the pprof exporters.
  pub use crate::proto::{Location, Profile, Sample, ValueType};
}
