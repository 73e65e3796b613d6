use serde::Serialize;

use crate::bucket::{BlockCounters, MemoryCounters};
use crate::stack::{STACK_DEPTH, StackSignature};

fn trimmed(stack0: &[usize]) -> &[usize] {
  let end = stack0.iter().position(|&pc| pc == 0).unwrap_or(stack0.len());
  &stack0[..end]
}

/// Raw stack of a profile entry, zero-padded past its true length.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize)]
pub struct StackRecord {
  #[serde(rename = "stack", serialize_with = "serialize_stack")]
  pub stack0: [usize; STACK_DEPTH],
}

impl Default for StackRecord {
  fn default() -> Self {
    Self {
      stack0: [0; STACK_DEPTH],
    }
  }
}

impl StackRecord {
  pub(crate) fn fill(&mut self, signature: &StackSignature) {
    signature.copy_into(&mut self.stack0);
  }

  /// The addresses up to the first zero slot.
  #[must_use]
  pub fn stack(&self) -> &[usize] {
    trimmed(&self.stack0)
  }
}

/// Cumulative allocation statistics for one call site.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize)]
pub struct MemProfileRecord {
  pub alloc_bytes: i64,
  pub alloc_objects: i64,
  pub free_bytes: i64,
  pub free_objects: i64,
  #[serde(rename = "stack", serialize_with = "serialize_stack")]
  pub stack0: [usize; STACK_DEPTH],
}

impl Default for MemProfileRecord {
  fn default() -> Self {
    Self {
      alloc_bytes: 0,
      alloc_objects: 0,
      free_bytes: 0,
      free_objects: 0,
      stack0: [0; STACK_DEPTH],
    }
  }
}

impl MemProfileRecord {
  pub(crate) fn fill(
    &mut self,
    counters: &MemoryCounters,
    signature: &StackSignature,
  ) {
    let cumulative = &counters.cumulative;
    self.alloc_bytes = saturating_i64(cumulative.alloc_bytes);
    self.alloc_objects = saturating_i64(cumulative.allocs);
    self.free_bytes = saturating_i64(cumulative.free_bytes);
    self.free_objects = saturating_i64(cumulative.frees);
    signature.copy_into(&mut self.stack0);
  }

  /// Bytes still live at this site.
  #[must_use]
  pub fn in_use_bytes(&self) -> i64 {
    self.alloc_bytes.saturating_sub(self.free_bytes)
  }

  /// Objects still live at this site.
  #[must_use]
  pub fn in_use_objects(&self) -> i64 {
    self.alloc_objects.saturating_sub(self.free_objects)
  }

  #[must_use]
  pub fn stack(&self) -> &[usize] {
    trimmed(&self.stack0)
  }
}

/// Blocking statistics for one call site.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize)]
pub struct BlockProfileRecord {
  pub count: i64,
  pub cycles: i64,
  #[serde(rename = "stack", serialize_with = "serialize_stack")]
  pub stack0: [usize; STACK_DEPTH],
}

impl Default for BlockProfileRecord {
  fn default() -> Self {
    Self {
      count: 0,
      cycles: 0,
      stack0: [0; STACK_DEPTH],
    }
  }
}

impl BlockProfileRecord {
  pub(crate) fn fill(
    &mut self,
    counters: &BlockCounters,
    signature: &StackSignature,
  ) {
    self.count = saturating_i64(counters.count);
    self.cycles = saturating_i64(counters.cycles);
    signature.copy_into(&mut self.stack0);
  }

  #[must_use]
  pub fn stack(&self) -> &[usize] {
    trimmed(&self.stack0)
  }
}

fn saturating_i64(value: u64) -> i64 {
  i64::try_from(value).unwrap_or(i64::MAX)
}

fn serialize_stack<S>(
  stack0: &[usize; STACK_DEPTH],
  serializer: S,
) -> Result<S::Ok, S::Error>
where
  S: serde::Serializer,
{
  serializer.collect_seq(trimmed(stack0))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::bucket::MemCounts;

  #[test]
  fn mem_record_copies_cumulative_generation_only() {
    let counters = MemoryCounters {
      cumulative: MemCounts {
        alloc_bytes: 48,
        allocs: 3,
        free_bytes: 16,
        frees: 1,
      },
      previous: MemCounts {
        alloc_bytes: 1000,
        allocs: 1,
        free_bytes: 0,
        frees: 0,
      },
      recent: MemCounts::ZERO,
    };

    let mut record = MemProfileRecord::default();
    record.stack0 = [7; STACK_DEPTH];
    record.fill(&counters, &StackSignature::new(&[0xa, 0xb]));

    assert_eq!(record.alloc_bytes, 48);
    assert_eq!(record.in_use_bytes(), 32);
    assert_eq!(record.in_use_objects(), 2);
    assert_eq!(record.stack(), &[0xa, 0xb]);
    assert!(record.stack0[2..].iter().all(|&pc| pc == 0));
  }

  #[test]
  fn serializes_trimmed_stack() {
    let mut record = BlockProfileRecord::default();
    record.fill(
      &BlockCounters {
        count: 2,
        cycles: 150,
      },
      &StackSignature::new(&[1, 2]),
    );

    let json = serde_json::to_value(record).expect("serialize record");
    assert_eq!(json["count"], 2);
    assert_eq!(json["cycles"], 150);
    assert_eq!(json["stack"], serde_json::json!([1, 2]));
  }
}
