//! Cooperative timer queue driven by an explicit clock.
//!
//! Nothing here sleeps. The owner advances the queue's notion of "now" and
//! pulls due timers one at a time, so every timer callback runs as its own
//! turn after the previous turn's side effects completed.
//!
//! Scheduling returns a [`TimerHandle`]. Dropping the handle cancels the
//! timer: the queue only keeps a weak reference to the handle's liveness
//! token, and entries whose token is gone are discarded instead of fired.

use std::fmt;
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};

use crate::windowing::SurfaceId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

/// What a timer is for. The owner routes fired timers by kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    GrabRetry(SurfaceId),
    DeferredTeardown,
    ClockRefresh(SurfaceId),
}

/// Owning handle for a scheduled timer. Dropping it cancels the timer.
#[must_use = "dropping a TimerHandle cancels the timer"]
pub struct TimerHandle {
    id: TimerId,
    deadline: Instant,
    _alive: Rc<()>,
}

impl TimerHandle {
    pub fn id(&self) -> TimerId {
        self.id
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }
}

impl fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerHandle")
            .field("id", &self.id)
            .field("deadline", &self.deadline)
            .finish()
    }
}

/// A timer that came due and whose handle is still alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FiredTimer {
    pub id: TimerId,
    pub kind: TimerKind,
}

struct Entry {
    id: TimerId,
    kind: TimerKind,
    deadline: Instant,
    period: Option<Duration>,
    alive: Weak<()>,
}

pub struct TimerQueue {
    now: Instant,
    next_id: u64,
    entries: Vec<Entry>,
}

impl TimerQueue {
    pub fn new(now: Instant) -> Self {
        Self {
            now,
            next_id: 1,
            entries: Vec::new(),
        }
    }

    pub fn now(&self) -> Instant {
        self.now
    }

    /// Schedule a one-shot timer `delay` from now.
    pub fn schedule(&mut self, delay: Duration, kind: TimerKind) -> TimerHandle {
        self.insert(delay, None, kind)
    }

    /// Schedule a timer that re-fires every `interval` until its handle drops.
    pub fn schedule_repeating(&mut self, interval: Duration, kind: TimerKind) -> TimerHandle {
        self.insert(interval, Some(interval), kind)
    }

    fn insert(&mut self, delay: Duration, period: Option<Duration>, kind: TimerKind) -> TimerHandle {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        let alive = Rc::new(());
        let deadline = self.now + delay;
        self.entries.push(Entry {
            id,
            kind,
            deadline,
            period,
            alive: Rc::downgrade(&alive),
        });
        TimerHandle {
            id,
            deadline,
            _alive: alive,
        }
    }

    /// Move the clock forward. Time never runs backwards.
    pub fn advance_to(&mut self, now: Instant) {
        if now > self.now {
            self.now = now;
        }
    }

    pub fn advance_by(&mut self, delta: Duration) {
        self.now += delta;
    }

    /// Earliest deadline among live timers.
    pub fn next_deadline(&mut self) -> Option<Instant> {
        self.prune();
        self.entries.iter().map(|entry| entry.deadline).min()
    }

    /// Pop the earliest due live timer, rescheduling it if it repeats.
    pub fn pop_due(&mut self) -> Option<FiredTimer> {
        self.prune();
        let now = self.now;
        let idx = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.deadline <= now)
            .min_by_key(|(_, entry)| (entry.deadline, entry.id))
            .map(|(idx, _)| idx)?;

        let fired = FiredTimer {
            id: self.entries[idx].id,
            kind: self.entries[idx].kind,
        };
        match self.entries[idx].period {
            // Missed periods fire on later pops, one per call.
            Some(period) => self.entries[idx].deadline += period,
            None => {
                self.entries.swap_remove(idx);
            }
        }
        Some(fired)
    }

    /// Number of live timers.
    pub fn pending(&mut self) -> usize {
        self.prune();
        self.entries.len()
    }

    fn prune(&mut self) {
        self.entries.retain(|entry| entry.alive.strong_count() > 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_shot_fires_once_after_deadline() {
        let start = Instant::now();
        let mut queue = TimerQueue::new(start);
        let handle = queue.schedule(Duration::from_millis(200), TimerKind::DeferredTeardown);

        queue.advance_by(Duration::from_millis(199));
        assert!(queue.pop_due().is_none());

        queue.advance_by(Duration::from_millis(1));
        let fired = queue.pop_due().unwrap();
        assert_eq!(fired.id, handle.id());
        assert!(queue.pop_due().is_none());
    }

    #[test]
    fn dropping_handle_cancels() {
        let mut queue = TimerQueue::new(Instant::now());
        let handle = queue.schedule(Duration::from_millis(10), TimerKind::DeferredTeardown);
        assert_eq!(queue.pending(), 1);
        drop(handle);
        assert_eq!(queue.pending(), 0);
        queue.advance_by(Duration::from_secs(1));
        assert!(queue.pop_due().is_none());
    }

    #[test]
    fn repeating_timer_rearms() {
        let mut queue = TimerQueue::new(Instant::now());
        let surface = SurfaceId::new(7);
        let _handle = queue.schedule_repeating(Duration::from_secs(1), TimerKind::ClockRefresh(surface));
        queue.advance_by(Duration::from_secs(1));
        assert!(queue.pop_due().is_some());
        assert!(queue.pop_due().is_none());
        queue.advance_by(Duration::from_secs(1));
        assert!(queue.pop_due().is_some());
        assert_eq!(queue.pending(), 1);
    }

    #[test]
    fn repeating_timer_catches_up_one_pop_at_a_time() {
        let mut queue = TimerQueue::new(Instant::now());
        let _handle = queue.schedule_repeating(
            Duration::from_secs(1),
            TimerKind::ClockRefresh(SurfaceId::new(1)),
        );
        queue.advance_by(Duration::from_millis(3500));
        let mut fired = 0;
        while queue.pop_due().is_some() {
            fired += 1;
        }
        assert_eq!(fired, 3);
    }

    #[test]
    fn due_timers_fire_in_deadline_order() {
        let mut queue = TimerQueue::new(Instant::now());
        let late = queue.schedule(Duration::from_millis(300), TimerKind::DeferredTeardown);
        let early = queue.schedule(Duration::from_millis(100), TimerKind::GrabRetry(SurfaceId::new(1)));
        queue.advance_by(Duration::from_millis(500));
        assert_eq!(queue.pop_due().unwrap().id, early.id());
        assert_eq!(queue.pop_due().unwrap().id, late.id());
    }

    #[test]
    fn clock_never_goes_backwards() {
        let start = Instant::now();
        let mut queue = TimerQueue::new(start + Duration::from_secs(5));
        queue.advance_to(start);
        assert_eq!(queue.now(), start + Duration::from_secs(5));
    }
}
