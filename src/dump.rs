use std::fmt::Write as _;

use thiserror::Error;
use tracing::error;

use crate::registry::WorkerId;
use crate::stack_capture::StackCollector;
use crate::trace::{TraceBuffer, TraceFormatter};
use crate::world::{PauseToken, TaskInfo, World, WorldPause};

/// The dumping task came back from a world pause on a different worker.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Error)]
#[error("stack dump rescheduled from worker {before} to worker {after}")]
pub struct Rescheduled {
  pub after: WorkerId,
  pub before: WorkerId,
}

pub(crate) fn check_worker(
  before: WorkerId,
  after: WorkerId,
) -> Result<(), Rescheduled> {
  if before == after {
    Ok(())
  } else {
    Err(Rescheduled { after, before })
  }
}

/// Abort the process. The pause is released first so an upstream handler
/// that intercepts the abort does not find the world stuck.
fn fatal<W: World + ?Sized>(err: &Rescheduled, token: PauseToken<'_, W>) -> ! {
  error!(%err, "runtime invariant broken during world pause");
  drop(token);
  std::process::abort()
}

/// Formats the calling task's stack and, on request, every other task's.
pub struct StackDumper<'a, W: ?Sized, F: ?Sized> {
  collector: StackCollector,
  formatter: &'a F,
  pause: &'a WorldPause,
  world: &'a W,
}

impl<'a, W, F> StackDumper<'a, W, F>
where
  W: World + ?Sized,
  F: TraceFormatter + ?Sized,
{
  #[must_use]
  pub fn new(world: &'a W, formatter: &'a F, collector: StackCollector) -> Self {
    Self {
      collector,
      formatter,
      pause: WorldPause::global(),
      world,
    }
  }

  /// Serialize pauses through `pause` instead of the process-wide semaphore.
  #[must_use]
  pub fn with_pause(mut self, pause: &'a WorldPause) -> Self {
    self.pause = pause;
    self
  }

  /// Write the calling task's trace into `buf`, then, if
  /// `include_all_tasks` is set, the trace of every other task while the
  /// world is paused. Returns the number of bytes written.
  ///
  /// An empty buffer returns 0 without pausing anything. A buffer too short
  /// for the output holds as much as fits.
  ///
  /// # Panics
  ///
  /// Never panics, but aborts the process if the world pause moves the
  /// caller to a different worker.
  pub fn capture_trace(&self, buf: &mut [u8], include_all_tasks: bool) -> usize {
    if buf.is_empty() {
      return 0;
    }

    let stack = self.collector.capture();
    let current = self.world.current_task();

    let token = if include_all_tasks {
      let worker = self.world.current_worker();
      let token = self.pause.acquire(self.world, current.id);
      if let Err(err) = check_worker(worker, self.world.current_worker()) {
        fatal(&err, token);
      }
      Some(token)
    } else {
      None
    };

    let mut out = TraceBuffer::new(buf);
    write_header(&mut out, current);
    self.formatter.write_frames(&stack, &mut out);

    if token.is_some() {
      self.world.for_each_task(&mut |task| {
        if task.info.id == current.id {
          return;
        }
        out.push_bytes(b"\n");
        write_header(&mut out, task.info);
        self.formatter.write_frames(&task.stack, &mut out);
      });
    }

    let written = out.written();
    drop(token);
    written
  }
}

fn write_header(out: &mut TraceBuffer<'_>, task: TaskInfo) {
  let _ = writeln!(out, "task {} [{}]:", task.id, task.status);
}
