//! Stop-the-world plumbing used by full-process stack dumps.
//!
//! ```text
//!  caller ──acquire──▶ WorldPause (one pause at a time)
//!                          │ hold current task from collection
//!                          │ World::stop_the_world()   (blocks until every
//!                          ▼                             other task is parked)
//!                     PauseToken ── walk stacks ──▶ drop
//!                          │ release hold, release semaphore
//!                          ▼ World::start_the_world()
//! ```

use std::{
  collections::HashMap,
  fmt::{self, Display, Formatter},
  sync::{
    Condvar, Mutex, MutexGuard,
    atomic::{AtomicBool, Ordering},
  },
  thread::{self, ThreadId},
};

use tracing::debug;

use crate::registry::WorkerId;
use crate::stack::StackSignature;

pub type TaskId = u64;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum TaskStatus {
  Running,
  Runnable,
  Waiting,
}

impl Display for TaskStatus {
  fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      Self::Running => "running",
      Self::Runnable => "runnable",
      Self::Waiting => "waiting",
    })
  }
}

/// Identity and state of a task, as reported in a stack dump header.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct TaskInfo {
  pub id: TaskId,
  pub status: TaskStatus,
}

/// A task parked at a safe point, with the stack it was parked at.
#[derive(Debug, Clone)]
pub struct TaskSnapshot {
  pub info: TaskInfo,
  pub stack: StackSignature,
}

/// Runtime services the stack dump coordinator needs.
pub trait World {
  /// The task executing the caller.
  fn current_task(&self) -> TaskInfo;

  /// The worker currently running the caller's task.
  fn current_worker(&self) -> WorkerId;

  /// Keep `task` from being preempted for collection while it dumps stacks.
  fn set_collection_hold(&self, task: TaskId, held: bool);

  /// Mark `task` as blocked on a pause held by another task. A blocked task
  /// counts as being at a safe point. Clearing the mark does not return until
  /// any stop in progress has been lifted.
  fn set_blocked(&self, task: TaskId, blocked: bool);

  /// Block until every task except the caller is at a safe point.
  fn stop_the_world(&self);

  /// Let every paused task run again.
  fn start_the_world(&self);

  /// Visit every task the runtime knows about, in a stable order. `visit`
  /// must not call back into the world.
  fn for_each_task(&self, visit: &mut dyn FnMut(&TaskSnapshot));
}

/// Process-wide binary semaphore serializing world pauses.
#[derive(Debug)]
pub struct WorldPause {
  held: Mutex<bool>,
  released: Condvar,
}

static GLOBAL_PAUSE: WorldPause = WorldPause::new();

impl Default for WorldPause {
  fn default() -> Self {
    Self::new()
  }
}

impl WorldPause {
  #[must_use]
  pub const fn new() -> Self {
    Self {
      held: Mutex::new(false),
      released: Condvar::new(),
    }
  }

  #[must_use]
  pub fn global() -> &'static Self {
    &GLOBAL_PAUSE
  }

  /// Take the semaphore, hold `task` from collection, and stop every other
  /// task. Everything is undone when the returned token drops.
  ///
  /// While another pause is held, `task` is reported blocked so the holder's
  /// stop does not wait for it.
  pub fn acquire<'a, W>(&'a self, world: &'a W, task: TaskId) -> PauseToken<'a, W>
  where
    W: World + ?Sized,
  {
    let mut held = lock(&self.held);
    if *held {
      drop(held);
      world.set_blocked(task, true);

      held = lock(&self.held);
      while *held {
        held = match self.released.wait(held) {
          Ok(guard) => guard,
          Err(err) => err.into_inner(),
        };
      }
      *held = true;
      drop(held);

      world.set_blocked(task, false);
    } else {
      *held = true;
      drop(held);
    }

    world.set_collection_hold(task, true);
    world.stop_the_world();
    debug!(task, "world paused");

    PauseToken {
      pause: self,
      task,
      world,
    }
  }

  #[must_use]
  pub fn is_held(&self) -> bool {
    *lock(&self.held)
  }

  fn release(&self) {
    *lock(&self.held) = false;
    self.released.notify_one();
  }
}

/// Scoped ownership of a world pause.
#[must_use = "the world resumes as soon as the token is dropped"]
pub struct PauseToken<'a, W: World + ?Sized> {
  pause: &'a WorldPause,
  task: TaskId,
  world: &'a W,
}

impl<W: World + ?Sized> Drop for PauseToken<'_, W> {
  fn drop(&mut self) {
    self.world.set_collection_hold(self.task, false);
    self.pause.release();
    self.world.start_the_world();
    debug!(task = self.task, "world resumed");
  }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  match mutex.lock() {
    Ok(guard) => guard,
    Err(err) => err.into_inner(),
  }
}

#[derive(Debug)]
struct TaskSlot {
  blocked: bool,
  held: bool,
  id: TaskId,
  parked: bool,
  stack: StackSignature,
  status: TaskStatus,
  worker: WorkerId,
}

#[derive(Debug, Default)]
struct WorldState {
  next_task: TaskId,
  next_worker: WorkerId,
  stopper: Option<ThreadId>,
  tasks: Vec<TaskSlot>,
  threads: HashMap<ThreadId, usize>,
}

impl WorldState {
  fn slot(&self, thread: ThreadId) -> Option<&TaskSlot> {
    self.threads.get(&thread).and_then(|&index| self.tasks.get(index))
  }

  fn slot_mut(&mut self, thread: ThreadId) -> Option<&mut TaskSlot> {
    let index = *self.threads.get(&thread)?;
    self.tasks.get_mut(index)
  }

  fn all_parked_except(&self, thread: ThreadId) -> bool {
    let own = self.threads.get(&thread).copied();
    self.tasks.iter().enumerate().all(|(index, task)| {
      Some(index) == own
        || task.parked
        || task.blocked
        || task.status != TaskStatus::Running
    })
  }
}

/// Cooperative world where each task is an OS thread that polls
/// `safepoint` while it runs.
///
/// `stop_the_world` raises a flag and waits until every other running task
/// has parked inside `safepoint`. A running task that never polls keeps the
/// stopper waiting. Tasks in `Waiting` or `Runnable` state, and tasks blocked
/// on a pause, are already at a safe point and are not waited for.
#[derive(Debug, Default)]
pub struct SafepointWorld {
  changed: Condvar,
  state: Mutex<WorldState>,
  stop_requested: AtomicBool,
}

/// Membership of the calling thread in a `SafepointWorld`.
///
/// Dropping it removes the task, including when the thread unwinds, so an
/// exited thread can never hold up a later stop.
#[derive(Debug)]
#[must_use = "the task is unregistered as soon as the registration drops"]
pub struct TaskRegistration<'a> {
  id: TaskId,
  owned: bool,
  thread: ThreadId,
  world: &'a SafepointWorld,
}

impl TaskRegistration<'_> {
  #[must_use]
  pub fn id(&self) -> TaskId {
    self.id
  }
}

impl Drop for TaskRegistration<'_> {
  fn drop(&mut self) {
    if self.owned {
      self.world.unregister(self.thread);
    }
  }
}

impl SafepointWorld {
  #[must_use]
  pub fn new() -> Self {
    Self::default()
  }

  /// Register the calling thread as a running task on its own worker.
  ///
  /// Registering an already registered thread returns a registration for the
  /// existing task that leaves it in place when dropped.
  pub fn register_current(&self) -> TaskRegistration<'_> {
    let thread = thread::current().id();
    let mut state = lock(&self.state);

    if let Some(slot) = state.slot(thread) {
      return TaskRegistration {
        id: slot.id,
        owned: false,
        thread,
        world: self,
      };
    }

    state.next_task += 1;
    state.next_worker += 1;
    let id = state.next_task;
    let worker = state.next_worker;

    let index = state.tasks.len();
    state.tasks.push(TaskSlot {
      blocked: false,
      held: false,
      id,
      parked: false,
      stack: StackSignature::EMPTY,
      status: TaskStatus::Running,
      worker,
    });
    state.threads.insert(thread, index);

    TaskRegistration {
      id,
      owned: true,
      thread,
      world: self,
    }
  }

  fn unregister(&self, thread: ThreadId) {
    let mut state = lock(&self.state);

    if let Some(index) = state.threads.remove(&thread) {
      state.tasks.remove(index);
      for slot in state.threads.values_mut() {
        if *slot > index {
          *slot -= 1;
        }
      }
    }
    drop(state);

    self.changed.notify_all();
  }

  /// Update the calling task's status. Leaving `Running` counts as reaching a
  /// safe point.
  pub fn set_status(&self, status: TaskStatus) {
    let thread = thread::current().id();
    let mut state = lock(&self.state);
    if let Some(slot) = state.slot_mut(thread) {
      slot.status = status;
    }
    drop(state);

    self.changed.notify_all();
  }

  /// Park here if a stop has been requested, publishing `stack` as this
  /// task's current stack until the world restarts.
  pub fn safepoint(&self, stack: StackSignature) {
    if !self.stop_requested.load(Ordering::Acquire) {
      return;
    }

    let thread = thread::current().id();
    let mut state = lock(&self.state);

    if state.stopper == Some(thread) {
      return;
    }

    match state.slot_mut(thread) {
      Some(slot) if !slot.held => {
        slot.parked = true;
        slot.stack = stack;
      }
      _ => return,
    }
    self.changed.notify_all();

    while state.stopper.is_some() {
      state = self.wait(state);
    }

    if let Some(slot) = state.slot_mut(thread) {
      slot.parked = false;
    }
  }

  #[must_use]
  pub fn stop_requested(&self) -> bool {
    self.stop_requested.load(Ordering::Acquire)
  }

  fn wait<'a>(
    &self,
    state: MutexGuard<'a, WorldState>,
  ) -> MutexGuard<'a, WorldState> {
    match self.changed.wait(state) {
      Ok(guard) => guard,
      Err(err) => err.into_inner(),
    }
  }
}

impl World for SafepointWorld {
  fn current_task(&self) -> TaskInfo {
    let state = lock(&self.state);
    state
      .slot(thread::current().id())
      .map_or(
        TaskInfo {
          id: 0,
          status: TaskStatus::Running,
        },
        |slot| TaskInfo {
          id: slot.id,
          status: slot.status,
        },
      )
  }

  fn current_worker(&self) -> WorkerId {
    let state = lock(&self.state);
    state
      .slot(thread::current().id())
      .map_or(0, |slot| slot.worker)
  }

  fn set_collection_hold(&self, task: TaskId, held: bool) {
    let mut state = lock(&self.state);
    if let Some(slot) = state.tasks.iter_mut().find(|slot| slot.id == task) {
      slot.held = held;
    }
  }

  fn set_blocked(&self, task: TaskId, blocked: bool) {
    let thread = thread::current().id();
    let mut state = lock(&self.state);

    if !blocked {
      while state.stopper.is_some_and(|stopper| stopper != thread) {
        state = self.wait(state);
      }
    }

    if let Some(slot) = state.tasks.iter_mut().find(|slot| slot.id == task) {
      slot.blocked = blocked;
    }
    drop(state);

    self.changed.notify_all();
  }

  fn stop_the_world(&self) {
    let thread = thread::current().id();
    let mut state = lock(&self.state);
    state.stopper = Some(thread);
    self.stop_requested.store(true, Ordering::Release);

    while !state.all_parked_except(thread) {
      state = self.wait(state);
    }
  }

  fn start_the_world(&self) {
    let mut state = lock(&self.state);
    state.stopper = None;
    self.stop_requested.store(false, Ordering::Release);
    drop(state);

    self.changed.notify_all();
  }

  fn for_each_task(&self, visit: &mut dyn FnMut(&TaskSnapshot)) {
    let state = lock(&self.state);
    for slot in &state.tasks {
      let status = if slot.parked {
        TaskStatus::Runnable
      } else if slot.blocked {
        TaskStatus::Waiting
      } else {
        slot.status
      };

      visit(&TaskSnapshot {
        info: TaskInfo {
          id: slot.id,
          status,
        },
        stack: slot.stack,
      });
    }
  }
}
