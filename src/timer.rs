//! Deferred and periodic executors.
//!
//! One dedicated thread owns the schedule. A periodic event's callback
//! never overlaps with itself: when a firing runs long the next tick fires
//! immediately after it returns. Cancelling an event that is mid-fire lets
//! the current firing finish and clears the periodic flag so it does not
//! re-arm.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

pub type TimerCallback = Box<dyn FnMut() + Send + 'static>;

struct ScheduledEvent {
    fire_at: Instant,
    period: Option<Duration>,
    id: u64,
    callback: TimerCallback,
}

#[derive(Default)]
struct Schedule {
    heap: BinaryHeap<Reverse<HeapEntry>>,
    cancelled: HashSet<u64>,
    stopping: bool,
}

struct HeapEntry(Instant, u64, ScheduledEvent);

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0 && self.1 == other.1
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.0, self.1).cmp(&(other.0, other.1))
    }
}

pub struct TimerManager {
    schedule: Arc<(Mutex<Schedule>, Condvar)>,
    handle: Option<JoinHandle<()>>,
    next_id: AtomicU64,
}

impl Default for TimerManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerManager {
    /// Start the dispatch thread.
    pub fn new() -> Self {
        let schedule = Arc::new((Mutex::new(Schedule::default()), Condvar::new()));
        let thread_schedule = Arc::clone(&schedule);

        let handle = std::thread::Builder::new()
            .name("timer".to_string())
            .spawn(move || Self::run(thread_schedule))
            .expect("failed to spawn timer thread");

        Self {
            schedule,
            handle: Some(handle),
            next_id: AtomicU64::new(1),
        }
    }

    fn run(schedule: Arc<(Mutex<Schedule>, Condvar)>) {
        let (lock, condvar) = &*schedule;
        let mut guard = lock.lock().unwrap();

        loop {
            if guard.stopping {
                return;
            }

            let now = Instant::now();
            let next_due = guard.heap.peek().map(|Reverse(entry)| entry.0);

            match next_due {
                None => {
                    guard = condvar.wait(guard).unwrap();
                }
                Some(due) if due > now => {
                    let (g, _) = condvar.wait_timeout(guard, due - now).unwrap();
                    guard = g;
                }
                Some(_) => {
                    let Reverse(HeapEntry(_, _, mut event)) = guard.heap.pop().unwrap();

                    if guard.cancelled.remove(&event.id) {
                        continue;
                    }

                    // Fire outside the lock so schedule/cancel calls from
                    // the callback (or other threads) do not deadlock.
                    drop(guard);
                    (event.callback)();
                    guard = lock.lock().unwrap();

                    if let Some(period) = event.period {
                        // A cancel that raced with the firing clears the
                        // periodic flag instead of re-arming.
                        if guard.cancelled.remove(&event.id) {
                            continue;
                        }
                        event.fire_at = Instant::now() + period;
                        let key = (event.fire_at, event.id);
                        guard
                            .heap
                            .push(Reverse(HeapEntry(key.0, key.1, event)));
                    }
                }
            }
        }
    }

    fn push(&self, event: ScheduledEvent) {
        let (lock, condvar) = &*self.schedule;
        let mut guard = lock.lock().unwrap();
        guard
            .heap
            .push(Reverse(HeapEntry(event.fire_at, event.id, event)));
        condvar.notify_one();
    }

    /// Run `callback` once after `delay`. Returns an ID usable with
    /// [`TimerManager::cancel`].
    pub fn schedule_in(&self, delay: Duration, callback: TimerCallback) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.push(ScheduledEvent {
            fire_at: Instant::now() + delay,
            period: None,
            id,
            callback,
        });
        id
    }

    /// Run `callback` every `period`, starting one period from now.
    pub fn schedule_periodic(&self, period: Duration, callback: TimerCallback) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.push(ScheduledEvent {
            fire_at: Instant::now() + period,
            period: Some(period),
            id,
            callback,
        });
        id
    }

    /// Cancel an event. A firing already in progress runs to completion and
    /// will not re-arm.
    pub fn cancel(&self, id: u64) {
        let (lock, condvar) = &*self.schedule;
        lock.lock().unwrap().cancelled.insert(id);
        condvar.notify_one();
    }

    /// Stop the dispatch thread and join it. Pending events are dropped.
    pub fn stop(&mut self) {
        {
            let (lock, condvar) = &*self.schedule;
            lock.lock().unwrap().stopping = true;
            condvar.notify_one();
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for TimerManager {
    fn drop(&mut self) {
        self.stop();
    }
}
