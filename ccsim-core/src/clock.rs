//! The virtual clock.
//!
//! All activity in a simulation is an *action* registered on the
//! [`Scheduler`] for a given [`SimTime`]. The [`Clock`] pops actions in
//! time order and runs each of them to completion; actions registered for
//! the same instant run in the order they were registered.
//!
//! Actions only ever see the [`Scheduler`]: they can register further
//! actions but they cannot stop the clock. Halting is reserved to whoever
//! owns the [`Clock`].
//!
//! ```
//! use ccsim_core::{clock::Clock, SimTime};
//!
//! let mut clock: Clock<Vec<SimTime>> = Clock::new();
//! clock.scheduler().schedule_recurring(
//!     SimTime::ZERO,
//!     SimTime::from_millis(100),
//!     "tick",
//!     |scheduler, ticks| {
//!         ticks.push(scheduler.now());
//!         Ok(())
//!     },
//! );
//! clock.stop_at(SimTime::from_millis(350));
//!
//! let mut ticks = Vec::new();
//! clock.run(&mut ticks).unwrap();
//! assert_eq!(ticks.len(), 4);
//! ```

use crate::{error::SimError, time::SimTime};
use core::cmp::Reverse;
use std::{cmp::Ordering, collections::BinaryHeap, fmt};
use tracing::{debug, trace};

type Action<W> = Box<dyn FnMut(&mut Scheduler<W>, &mut W) -> Result<(), SimError>>;

/// Identifier of a registered action, unique for the lifetime of a
/// [`Scheduler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventId(u64);

struct Task<W> {
    name: &'static str,
    period: Option<SimTime>,
    action: Action<W>,
}

struct Entry<W> {
    at: SimTime,
    id: EventId,
    task: Task<W>,
}

impl<W> PartialEq for Entry<W> {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.id == other.id
    }
}

impl<W> Eq for Entry<W> {}

impl<W> PartialOrd for Entry<W> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<W> Ord for Entry<W> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.at
            .cmp(&other.at)
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// Registration side of the virtual clock.
pub struct Scheduler<W> {
    now: SimTime,
    next_id: u64,
    queue: BinaryHeap<Reverse<Entry<W>>>,
}

impl<W> Scheduler<W> {
    fn new() -> Self {
        Self {
            now: SimTime::ZERO,
            next_id: 0,
            queue: BinaryHeap::new(),
        }
    }

    /// The current virtual time.
    #[inline]
    pub fn now(&self) -> SimTime {
        self.now
    }

    /// Number of actions still waiting to run.
    #[inline]
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Time of the next action, if any.
    pub fn next_time(&self) -> Option<SimTime> {
        self.queue.peek().map(|entry| entry.0.at)
    }

    fn push(&mut self, at: SimTime, task: Task<W>) -> EventId {
        // nothing runs in the past: an action registered for an instant
        // that has already gone runs now, after the ones already due.
        let at = at.max(self.now);
        let id = EventId(self.next_id);
        self.next_id += 1;
        self.queue.push(Reverse(Entry { at, id, task }));
        id
    }

    /// Run `action` once at `at`.
    pub fn schedule<F>(&mut self, at: SimTime, name: &'static str, action: F) -> EventId
    where
        F: FnOnce(&mut Scheduler<W>, &mut W) -> Result<(), SimError> + 'static,
    {
        let mut action = Some(action);
        self.push(
            at,
            Task {
                name,
                period: None,
                action: Box::new(move |scheduler, world| match action.take() {
                    Some(action) => action(scheduler, world),
                    None => Ok(()),
                }),
            },
        )
    }

    /// Run `action` once, `delay` after now.
    pub fn schedule_in<F>(&mut self, delay: SimTime, name: &'static str, action: F) -> EventId
    where
        F: FnOnce(&mut Scheduler<W>, &mut W) -> Result<(), SimError> + 'static,
    {
        let at = self.now + delay;
        self.schedule(at, name, action)
    }

    /// Run `action` at `start` and then every `period` until the clock
    /// stops.
    ///
    /// A zero period would never let time advance; it is bumped to one
    /// microsecond.
    pub fn schedule_recurring<F>(
        &mut self,
        start: SimTime,
        period: SimTime,
        name: &'static str,
        action: F,
    ) -> EventId
    where
        F: FnMut(&mut Scheduler<W>, &mut W) -> Result<(), SimError> + 'static,
    {
        let period = period.max(SimTime::from_micros(1));
        self.push(
            start,
            Task {
                name,
                period: Some(period),
                action: Box::new(action),
            },
        )
    }
}

/// Why [`Clock::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The stop time was reached; actions due at or after it did not run.
    StopTime,
    /// No action remained.
    Exhausted,
}

/// Summary of a call to [`Clock::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub reason: StopReason,
    pub end_time: SimTime,
    pub executed: u64,
}

/// The virtual clock: owns the [`Scheduler`] and advances time.
pub struct Clock<W> {
    scheduler: Scheduler<W>,
    stop_at: Option<SimTime>,
    halted: bool,
    executed: u64,
}

impl<W> Clock<W> {
    pub fn new() -> Self {
        Self {
            scheduler: Scheduler::new(),
            stop_at: None,
            halted: false,
            executed: 0,
        }
    }

    #[inline]
    pub fn now(&self) -> SimTime {
        self.scheduler.now
    }

    /// Access the [`Scheduler`] to register actions before (or between)
    /// runs.
    #[inline]
    pub fn scheduler(&mut self) -> &mut Scheduler<W> {
        &mut self.scheduler
    }

    /// Stop advancing time at `at`: actions due at or after `at` do not
    /// run and the clock reads `at` once [`Clock::run`] returns.
    pub fn stop_at(&mut self, at: SimTime) {
        self.stop_at = Some(at);
    }

    #[inline]
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Total number of actions executed so far.
    #[inline]
    pub fn executed(&self) -> u64 {
        self.executed
    }

    /// Advance virtual time, running every due action, until the stop
    /// time is reached or no action remains.
    ///
    /// # Errors
    ///
    /// The first action returning an error halts the clock and the error
    /// is returned; nothing else runs afterwards.
    pub fn run(&mut self, world: &mut W) -> Result<RunSummary, SimError> {
        if self.halted {
            return Ok(self.summary(StopReason::Exhausted));
        }

        loop {
            let Some(next) = self.scheduler.next_time() else {
                debug!(now = %self.now(), "clock exhausted");
                return Ok(self.summary(StopReason::Exhausted));
            };

            if let Some(stop) = self.stop_at
                && next >= stop
            {
                self.scheduler.now = stop;
                debug!(now = %stop, "clock reached stop time");
                return Ok(self.summary(StopReason::StopTime));
            }

            let Some(Reverse(Entry { at, mut task, .. })) = self.scheduler.queue.pop() else {
                unreachable!("We just peeked the queue, so a pop should always work");
            };

            self.scheduler.now = at;
            self.executed += 1;
            trace!(now = %at, action = task.name, "run");

            if let Err(error) = (task.action)(&mut self.scheduler, world) {
                debug!(now = %at, action = task.name, %error, "action failed, halting");
                self.halt();
                return Err(error);
            }

            if let Some(period) = task.period
                && let Some(next) = at.checked_add(period)
            {
                self.scheduler.push(next, task);
            }
        }
    }

    /// Stop the clock for good: every pending action is dropped and later
    /// calls to [`Clock::run`] do nothing.
    pub fn halt(&mut self) {
        self.halted = true;
        self.scheduler.queue.clear();
    }

    fn summary(&self, reason: StopReason) -> RunSummary {
        RunSummary {
            reason,
            end_time: self.now(),
            executed: self.executed,
        }
    }
}

impl<W> Default for Clock<W> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W> fmt::Debug for Clock<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Clock")
            .field("now", &self.now())
            .field("pending", &self.scheduler.pending())
            .field("stop_at", &self.stop_at)
            .field("halted", &self.halted)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SimError;

    #[test]
    fn empty() {
        let mut clock = Clock::<()>::new();
        let summary = clock.run(&mut ()).unwrap();
        assert_eq!(summary.reason, StopReason::Exhausted);
        assert_eq!(summary.end_time, SimTime::ZERO);
        assert_eq!(summary.executed, 0);
    }

    #[test]
    fn time_order_then_insertion_order() {
        let mut clock = Clock::<Vec<&'static str>>::new();
        let t = SimTime::from_millis(5);
        clock.scheduler().schedule(t, "b", |_, log| {
            log.push("b");
            Ok(())
        });
        clock.scheduler().schedule(SimTime::from_millis(1), "a", |_, log| {
            log.push("a");
            Ok(())
        });
        clock.scheduler().schedule(t, "c", |_, log| {
            log.push("c");
            Ok(())
        });

        let mut log = Vec::new();
        let summary = clock.run(&mut log).unwrap();
        assert_eq!(log, vec!["a", "b", "c"]);
        assert_eq!(summary.end_time, t);
    }

    #[test]
    fn actions_can_schedule_more() {
        let mut clock = Clock::<Vec<SimTime>>::new();
        clock.scheduler().schedule(SimTime::ZERO, "first", |scheduler, log| {
            log.push(scheduler.now());
            scheduler.schedule_in(SimTime::from_millis(10), "second", |scheduler, log| {
                log.push(scheduler.now());
                Ok(())
            });
            Ok(())
        });

        let mut log = Vec::new();
        clock.run(&mut log).unwrap();
        assert_eq!(log, vec![SimTime::ZERO, SimTime::from_millis(10)]);
    }

    #[test]
    fn recurring_stops_at_stop_time() {
        let mut clock = Clock::<Vec<SimTime>>::new();
        clock.scheduler().schedule_recurring(
            SimTime::ZERO,
            SimTime::from_millis(100),
            "tick",
            |scheduler, log| {
                log.push(scheduler.now());
                Ok(())
            },
        );
        clock.stop_at(SimTime::from_secs(1));

        let mut log = Vec::new();
        let summary = clock.run(&mut log).unwrap();

        assert_eq!(summary.reason, StopReason::StopTime);
        assert_eq!(summary.end_time, SimTime::from_secs(1));
        // [0, 1s) at 100ms steps, the tick due at 1s does not run
        assert_eq!(log.len(), 10);
        for (i, t) in log.iter().enumerate() {
            assert_eq!(*t, SimTime::from_millis(100) * i as u64);
        }
    }

    #[test]
    fn past_actions_run_now() {
        let mut clock = Clock::<Vec<SimTime>>::new();
        clock
            .scheduler()
            .schedule(SimTime::from_secs(2), "late", |scheduler, _| {
                scheduler.schedule(SimTime::from_secs(1), "past", |scheduler, log| {
                    log.push(scheduler.now());
                    Ok(())
                });
                Ok(())
            });
        let mut log = Vec::new();
        clock.run(&mut log).unwrap();
        assert_eq!(log, vec![SimTime::from_secs(2)]);
    }

    #[test]
    fn error_halts_the_clock() {
        let mut clock = Clock::<u32>::new();
        clock.scheduler().schedule(SimTime::from_secs(1), "fail", |_, _| {
            Err(SimError::Halted("boom".to_owned()))
        });
        clock.scheduler().schedule(SimTime::from_secs(2), "never", |_, count| {
            *count += 1;
            Ok(())
        });

        let mut count = 0;
        assert!(clock.run(&mut count).is_err());
        assert!(clock.is_halted());
        assert_eq!(clock.scheduler().pending(), 0);

        clock.run(&mut count).unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn halt_drops_pending() {
        let mut clock = Clock::<()>::new();
        clock.scheduler().schedule_recurring(
            SimTime::ZERO,
            SimTime::from_millis(1),
            "tick",
            |_, _| Ok(()),
        );
        clock.stop_at(SimTime::from_millis(10));
        clock.run(&mut ()).unwrap();
        assert_eq!(clock.scheduler().pending(), 1);

        clock.halt();
        assert_eq!(clock.scheduler().pending(), 0);
        assert_eq!(clock.now(), SimTime::from_millis(10));
    }
}
