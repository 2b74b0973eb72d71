// Cb execution core: Event Loop (C8, spec.md §4.8, §5).
//
// No teacher counterpart (udashboard has no async model); built
// directly from spec.md plus
// `original_source/src/backend/interpreter/event_loop/event_loop.cpp`,
// which confirms timers are a flat, linearly-scanned list (not a
// heap) and that `run`/`run_until` share one step function.
//
// The loop is deliberately decoupled from *what* a task does: it owns
// only the FIFO queue, the timer list, and the drain/yield control
// flow. The caller supplies an `executor` closure that knows how to
// actually run a `ScheduledTask` (the Interpreter, in practice). This
// keeps the loop testable on its own and avoids a self-referential
// "the interpreter schedules closures that borrow the interpreter"
// design.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::error::CbError;
use crate::future_cell::FutureRef;
use crate::value::{TypedValue, Value};

/// One unit of deferred work. `Sleep` resolves its cell to `Void`
/// once the timer fires; `Call` re-enters the dispatcher for an async
/// function body and fills `result` with its return value.
pub enum ScheduledTask {
    Call { function_name: String, args: Vec<TypedValue>, result: FutureRef },
    Sleep { result: FutureRef },
}

struct TimerEntry {
    deadline: Instant,
    task: ScheduledTask,
    seq: u64,
}

/// Single-threaded, cooperative FIFO-plus-timer scheduler.
pub struct EventLoop {
    queue: VecDeque<ScheduledTask>,
    timers: Vec<TimerEntry>,
    running: bool,
    timer_seq: u64,
    max_tasks: Option<u64>,
    scheduled_count: u64,
    granularity: Duration,
}

impl EventLoop {
    pub fn new() -> Self {
        EventLoop {
            queue: VecDeque::new(),
            timers: Vec::new(),
            running: false,
            timer_seq: 0,
            max_tasks: None,
            scheduled_count: 0,
            granularity: Duration::from_millis(1),
        }
    }

    /// Build a loop honoring `InterpreterConfig`'s `max_scheduled_tasks`
    /// ceiling and `timer_granularity_ms` poll interval.
    pub fn with_config(max_tasks: Option<u64>, granularity_ms: u64) -> Self {
        EventLoop { max_tasks, granularity: Duration::from_millis(granularity_ms.max(1)), ..Self::new() }
    }

    /// How long a caller polling `pop_ready`/`has_pending_timers` in a
    /// wait loop should sleep between checks (spec.md §6 host knobs).
    pub fn granularity(&self) -> Duration {
        self.granularity
    }

    fn check_budget(&mut self) -> Result<(), CbError> {
        if let Some(limit) = self.max_tasks {
            if self.scheduled_count >= limit {
                return Err(CbError::TaskQueueOverflow { limit, span: None });
            }
        }
        self.scheduled_count += 1;
        Ok(())
    }

    pub fn schedule(&mut self, task: ScheduledTask) -> Result<(), CbError> {
        self.check_budget()?;
        self.queue.push_back(task);
        Ok(())
    }

    /// Schedule `task` to become eligible at or after `delay` from
    /// now. Two timers with the same deadline resolve FIFO by
    /// insertion order (spec.md §5).
    pub fn schedule_after(&mut self, delay: Duration, task: ScheduledTask) -> Result<(), CbError> {
        self.check_budget()?;
        let seq = self.timer_seq;
        self.timer_seq += 1;
        self.timers.push(TimerEntry { deadline: Instant::now() + delay, task, seq });
        Ok(())
    }

    pub fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.timers.is_empty()
    }

    pub fn stop(&mut self) {
        self.running = false;
    }

    /// Move every timer whose deadline has passed into the FIFO
    /// queue, in deadline order (ties broken by insertion order).
    fn promote_ready_timers(&mut self) {
        let now = Instant::now();
        let mut ready: Vec<usize> = self
            .timers
            .iter()
            .enumerate()
            .filter(|(_, t)| t.deadline <= now)
            .map(|(i, _)| i)
            .collect();
        ready.sort_by_key(|&i| (self.timers[i].deadline, self.timers[i].seq));
        for i in ready.into_iter().rev() {
            let entry = self.timers.remove(i);
            self.queue.push_back(entry.task);
        }
    }

    /// Execute exactly one unit of work if any is ready; returns
    /// `true` if something ran.
    fn step(&mut self, executor: &mut impl FnMut(ScheduledTask) -> Result<(), CbError>) -> Result<bool, CbError> {
        self.promote_ready_timers();
        if let Some(task) = self.queue.pop_front() {
            executor(task)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Pop one ready task without running it, releasing the borrow of
    /// `self` before the caller executes it. Used when the executor
    /// itself needs mutable access to state the loop is embedded in
    /// (the Interpreter owns its `EventLoop`; see `interpreter.rs`).
    pub fn pop_ready(&mut self) -> Option<ScheduledTask> {
        self.promote_ready_timers();
        self.queue.pop_front()
    }

    pub fn has_pending_timers(&self) -> bool {
        !self.timers.is_empty()
    }

    /// Drain both queues to completion (spec.md §4.8 `run`).
    pub fn run(&mut self, mut executor: impl FnMut(ScheduledTask) -> Result<(), CbError>) -> Result<(), CbError> {
        self.running = true;
        while self.running {
            let ran = self.step(&mut executor)?;
            if !ran {
                if self.timers.is_empty() {
                    break;
                }
                std::thread::sleep(self.granularity);
            }
        }
        self.running = false;
        Ok(())
    }

    /// Identical to `run`, but yields as soon as `predicate` is true
    /// after any step — even with work remaining (spec.md §4.8, §5).
    pub fn run_until(
        &mut self,
        mut predicate: impl FnMut() -> bool,
        mut executor: impl FnMut(ScheduledTask) -> Result<(), CbError>,
    ) -> Result<(), CbError> {
        self.running = true;
        while self.running {
            if predicate() {
                break;
            }
            let ran = self.step(&mut executor)?;
            if predicate() {
                break;
            }
            if !ran {
                if self.timers.is_empty() {
                    break;
                }
                std::thread::sleep(self.granularity);
            }
        }
        self.running = false;
        Ok(())
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

/// Convenience for the `sleep(ms)` builtin / async `await` plumbing:
/// resolve `cell` to `Value::Void` once its timer fires.
pub fn resolve_sleep(result: &FutureRef) -> Result<(), CbError> {
    result.borrow_mut().set(Value::Void)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::future_cell::FutureCell;
    use crate::value::TypeTag;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn fifo_tasks_run_in_order() {
        let mut loop_ = EventLoop::new();
        let order = Rc::new(RefCell::new(Vec::new()));
        let cell1 = FutureCell::new(TypeTag::Void);
        let cell2 = FutureCell::new(TypeTag::Void);
        loop_.schedule(ScheduledTask::Sleep { result: cell1.clone() }).unwrap();
        loop_.schedule(ScheduledTask::Sleep { result: cell2.clone() }).unwrap();

        let order_clone = order.clone();
        loop_
            .run(move |task| {
                match task {
                    ScheduledTask::Sleep { result } => {
                        order_clone.borrow_mut().push(Rc::as_ptr(&result) as usize);
                        resolve_sleep(&result)?;
                    }
                    _ => unreachable!(),
                }
                Ok(())
            })
            .unwrap();

        assert_eq!(order.borrow().len(), 2);
        assert!(cell1.borrow().is_ready());
        assert!(cell2.borrow().is_ready());
    }

    #[test]
    fn timer_fires_and_loop_drains_to_empty() {
        let mut loop_ = EventLoop::new();
        let cell = FutureCell::new(TypeTag::Void);
        loop_.schedule_after(Duration::from_millis(2), ScheduledTask::Sleep { result: cell.clone() }).unwrap();
        loop_
            .run(|task| match task {
                ScheduledTask::Sleep { result } => resolve_sleep(&result),
                _ => unreachable!(),
            })
            .unwrap();
        assert!(cell.borrow().is_ready());
        assert!(loop_.is_idle());
    }

    #[test]
    fn run_until_yields_even_with_work_remaining() {
        let mut loop_ = EventLoop::new();
        let cell1 = FutureCell::new(TypeTag::Void);
        let cell2 = FutureCell::new(TypeTag::Void);
        loop_.schedule(ScheduledTask::Sleep { result: cell1.clone() }).unwrap();
        loop_.schedule(ScheduledTask::Sleep { result: cell2.clone() }).unwrap();

        let target = cell1.clone();
        loop_
            .run_until(
                move || target.borrow().is_ready(),
                |task| match task {
                    ScheduledTask::Sleep { result } => resolve_sleep(&result),
                    _ => unreachable!(),
                },
            )
            .unwrap();

        assert!(cell1.borrow().is_ready());
        assert!(!loop_.is_idle() || cell2.borrow().is_ready());
    }

    #[test]
    fn max_scheduled_tasks_is_enforced() {
        let mut loop_ = EventLoop::with_config(Some(1), 1);
        let cell1 = FutureCell::new(TypeTag::Void);
        let cell2 = FutureCell::new(TypeTag::Void);
        assert!(loop_.schedule(ScheduledTask::Sleep { result: cell1 }).is_ok());
        let second = loop_.schedule(ScheduledTask::Sleep { result: cell2 });
        assert!(matches!(second, Err(CbError::TaskQueueOverflow { limit: 1, .. })));
    }

    #[test]
    fn with_config_honors_granularity() {
        let loop_ = EventLoop::with_config(None, 7);
        assert_eq!(loop_.granularity(), Duration::from_millis(7));
    }
}
