use std::{
  fmt::{self, Debug, Formatter},
  sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
  },
};

use arc_swap::ArcSwapOption;

use crate::stack::StackSignature;

pub type WorkerId = u64;

/// A registered worker and the stack that created it.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Worker {
  create_stack: StackSignature,
  id: WorkerId,
}

impl Worker {
  #[must_use]
  pub fn create_stack(&self) -> &StackSignature {
    &self.create_stack
  }

  #[must_use]
  pub fn id(&self) -> WorkerId {
    self.id
  }
}

struct Node {
  next: Option<Arc<Node>>,
  worker: Worker,
}

/// Append-only list of workers, published through a single atomic head.
///
/// Registration swings the head to a new node that links to the old one, so
/// readers never take a lock: they load the head once and follow links that
/// never change after publication.
pub struct WorkerRegistry {
  head: ArcSwapOption<Node>,
  next_id: AtomicU64,
}

impl WorkerRegistry {
  #[must_use]
  pub fn new() -> Self {
    Self {
      head: ArcSwapOption::empty(),
      next_id: AtomicU64::new(1),
    }
  }

  /// Publish a new worker and return its identifier.
  pub fn register(&self, create_stack: StackSignature) -> WorkerId {
    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
    let worker = Worker { create_stack, id };

    self.head.rcu(|head| {
      Some(Arc::new(Node {
        next: head.clone(),
        worker,
      }))
    });

    id
  }

  /// Point-in-time view of the list, newest worker first.
  #[must_use]
  pub fn snapshot(&self) -> Workers {
    Workers {
      cursor: self.head.load_full(),
    }
  }

  #[must_use]
  pub fn len(&self) -> usize {
    self.snapshot().count()
  }

  #[must_use]
  pub fn is_empty(&self) -> bool {
    self.head.load().is_none()
  }
}

impl Default for WorkerRegistry {
  fn default() -> Self {
    Self::new()
  }
}

impl Debug for WorkerRegistry {
  fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
    f.debug_list().entries(self.snapshot()).finish()
  }
}

/// Iterator over a registry snapshot. Holds the head it started from, so
/// later registrations are never observed.
#[derive(Clone)]
pub struct Workers {
  cursor: Option<Arc<Node>>,
}

impl Iterator for Workers {
  type Item = Worker;

  fn next(&mut self) -> Option<Self::Item> {
    let node = self.cursor.take()?;
    self.cursor = node.next.clone();
    Some(node.worker)
  }
}
