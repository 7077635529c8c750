use std::{
    cell::Cell,
    cmp::Ordering,
    collections::BinaryHeap,
    rc::Rc,
    time::{Duration, Instant},
};

const MIN_TIMER_PERIOD: Duration = Duration::from_millis(1);

/// Owning handle to a timer registered with a `TimerQueue`.
/// Dropping the guard cancels the timer.
#[derive(Debug)]
pub struct TimerGuard {
    cancelled: Rc<Cell<bool>>,
}

impl TimerGuard {
    /// Cancels the timer. Safe to call more than once.
    pub fn cancel(&self) {
        self.cancelled.set(true);
    }

    /// Whether the timer may still fire
    pub fn is_set(&self) -> bool {
        !self.cancelled.get()
    }
}

impl Drop for TimerGuard {
    fn drop(&mut self) {
        self.cancelled.set(true);
    }
}

struct TimerEntry<T> {
    deadline: Instant,
    id: u64,
    period: Option<Duration>,
    target: T,
    cancelled: Rc<Cell<bool>>,
}

impl<T> PartialEq for TimerEntry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.id == other.id
    }
}

impl<T> Eq for TimerEntry<T> {}

impl<T> PartialOrd for TimerEntry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// Reversed so that the max-heap yields the earliest deadline first
impl<T> Ord for TimerEntry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.id.cmp(&self.id))
    }
}

/// Recurring and one-shot timers, ordered by deadline. Entries carry a plain
/// `target` value and a shared cancellation flag, never a reference to the
/// object that armed them.
pub struct TimerQueue<T> {
    heap: BinaryHeap<TimerEntry<T>>,
    next_id: u64,
}

impl<T: Clone> TimerQueue<T> {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_id: 0,
        }
    }

    /// Registers a timer that first fires one `period` after `now`, then
    /// every `period` until cancelled
    pub fn add_timer(&mut self, now: Instant, period: Duration, target: T) -> TimerGuard {
        let period = period.max(MIN_TIMER_PERIOD);
        self.push(now + period, Some(period), target)
    }

    /// Registers a timer that fires once at `deadline`
    pub fn add_once_off_timer(&mut self, deadline: Instant, target: T) -> TimerGuard {
        self.push(deadline, None, target)
    }

    fn push(&mut self, deadline: Instant, period: Option<Duration>, target: T) -> TimerGuard {
        let cancelled = Rc::new(Cell::new(false));
        self.next_id += 1;
        self.heap.push(TimerEntry {
            deadline,
            id: self.next_id,
            period,
            target,
            cancelled: cancelled.clone(),
        });
        TimerGuard { cancelled }
    }

    fn discard_cancelled(&mut self) {
        while let Some(entry) = self.heap.peek() {
            if !entry.cancelled.get() {
                break;
            }
            self.heap.pop();
        }
    }

    /// Earliest deadline of any live timer
    pub fn next_deadline(&mut self) -> Option<Instant> {
        self.discard_cancelled();
        self.heap.peek().map(|entry| entry.deadline)
    }

    /// Removes and returns the target of the earliest timer due at `now`.
    /// Recurring timers are re-armed for their next period.
    pub fn pop_expired(&mut self, now: Instant) -> Option<T> {
        self.discard_cancelled();

        if self.heap.peek()?.deadline > now {
            return None;
        }
        let mut entry = self.heap.pop()?;
        let target = entry.target.clone();

        match entry.period {
            Some(period) => {
                let mut next = entry.deadline + period;
                if next <= now {
                    next = now + period;
                }
                entry.deadline = next;
                self.next_id += 1;
                entry.id = self.next_id;
                self.heap.push(entry);
            }
            None => {
                entry.cancelled.set(true);
            }
        }

        Some(target)
    }

    /// Number of live timers
    pub fn len(&self) -> usize {
        self.heap
            .iter()
            .filter(|entry| !entry.cancelled.get())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone> Default for TimerQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

struct TimedItem<T> {
    instant: Instant,
    order: u64,
    item: T,
}

impl<T> PartialEq for TimedItem<T> {
    fn eq(&self, other: &Self) -> bool {
        self.instant == other.instant && self.order == other.order
    }
}

impl<T> Eq for TimedItem<T> {}

impl<T> PartialOrd for TimedItem<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for TimedItem<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .instant
            .cmp(&self.instant)
            .then_with(|| other.order.cmp(&self.order))
    }
}

/// Items that become available at a given instant, released in instant order
/// and FIFO among equal instants
pub struct TimeQueue<T> {
    queue: BinaryHeap<TimedItem<T>>,
    next_order: u64,
}

impl<T> TimeQueue<T> {
    pub fn new() -> Self {
        Self {
            queue: BinaryHeap::new(),
            next_order: 0,
        }
    }

    pub fn add_item(&mut self, instant: Instant, item: T) {
        self.next_order += 1;
        self.queue.push(TimedItem {
            instant,
            order: self.next_order,
            item,
        });
    }

    /// Whether an item is due at `now`
    pub fn has_item(&self, now: Instant) -> bool {
        self.queue
            .peek()
            .map(|timed| timed.instant <= now)
            .unwrap_or(false)
    }

    pub fn pop_item(&mut self, now: Instant) -> Option<T> {
        if self.has_item(now) {
            return self.queue.pop().map(|timed| timed.item);
        }
        None
    }

    pub fn next_instant(&self) -> Option<Instant> {
        self.queue.peek().map(|timed| timed.instant)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl<T> Default for TimeQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// A simple interval timer polled with explicit instants
#[derive(Clone, Debug)]
pub struct Timer {
    duration: Duration,
    last: Instant,
}

impl Timer {
    pub fn new(duration: Duration, now: Instant) -> Self {
        Self { duration, last: now }
    }

    pub fn reset(&mut self, now: Instant) {
        self.last = now;
    }

    /// Whether a full interval has elapsed since the last reset
    pub fn ringing(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last) >= self.duration
    }

    pub fn deadline(&self) -> Instant {
        self.last + self.duration
    }
}
