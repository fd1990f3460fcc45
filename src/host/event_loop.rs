use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};
use std::thread;
use std::time::{Duration, Instant};

use crate::pump::EventPump;

type Task = Box<dyn FnOnce()>;

/// Longer delays are clamped so deadlines stay representable.
const MAX_DELAY: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Single-threaded task queue standing in for the native toolkit's loop.
///
/// Immediate tasks run in FIFO order. Delayed tasks are promoted onto the
/// queue once their deadline passes, in deadline order.
pub struct HostLoop {
    ready: RefCell<VecDeque<Task>>,
    delayed: RefCell<BTreeMap<(Instant, u64), Task>>,
    next_seq: Cell<u64>,
    idle_wait: Duration,
}

impl Default for HostLoop {
    fn default() -> Self {
        Self::new(Duration::from_millis(5))
    }
}

impl HostLoop {
    pub fn new(idle_wait: Duration) -> Self {
        Self {
            ready: RefCell::new(VecDeque::new()),
            delayed: RefCell::new(BTreeMap::new()),
            next_seq: Cell::new(0),
            idle_wait,
        }
    }

    pub fn post(&self, task: impl FnOnce() + 'static) {
        self.ready.borrow_mut().push_back(Box::new(task));
    }

    pub fn post_delayed(&self, delay: Duration, task: impl FnOnce() + 'static) {
        if delay.is_zero() {
            self.post(task);
            return;
        }
        let seq = self.next_seq.get();
        self.next_seq.set(seq.wrapping_add(1));
        let now = Instant::now();
        let deadline = now.checked_add(delay.min(MAX_DELAY)).unwrap_or(now);
        self.delayed
            .borrow_mut()
            .insert((deadline, seq), Box::new(task));
    }

    pub fn pending(&self) -> usize {
        self.ready.borrow().len() + self.delayed.borrow().len()
    }

    pub fn is_idle(&self) -> bool {
        self.pending() == 0
    }

    fn promote_due(&self, now: Instant) {
        let mut delayed = self.delayed.borrow_mut();
        let mut ready = self.ready.borrow_mut();
        while let Some(entry) = delayed.first_entry() {
            if entry.key().0 > now {
                break;
            }
            ready.push_back(entry.remove());
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.delayed.borrow().keys().next().map(|(deadline, _)| *deadline)
    }
}

impl EventPump for HostLoop {
    fn pump_once(&self) -> bool {
        self.promote_due(Instant::now());

        // The borrow must end before the task runs; tasks post more tasks.
        let task = self.ready.borrow_mut().pop_front();
        if let Some(task) = task {
            task();
            return true;
        }

        let wait = match self.next_deadline() {
            Some(deadline) => deadline
                .saturating_duration_since(Instant::now())
                .min(self.idle_wait),
            None => self.idle_wait,
        };
        if !wait.is_zero() {
            thread::sleep(wait);
        }
        false
    }

    fn pump_until_idle(&self) -> usize {
        let mut processed = 0;
        while !self.is_idle() {
            if self.pump_once() {
                processed += 1;
            }
        }
        processed
    }
}
