//! Thread-safe message queue drained by worker threads.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// Unbounded MPMC queue with blocking drain. Producers are socket reactor
/// callbacks; consumers are worker threads.
#[derive(Default)]
pub struct MessageQueue<T> {
    queue: Mutex<VecDeque<T>>,
    condvar: Condvar,
}

impl<T> MessageQueue<T> {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            condvar: Condvar::new(),
        }
    }

    pub fn enqueue(&self, message: T) {
        self.queue.lock().unwrap().push_back(message);
        self.condvar.notify_one();
    }

    pub fn enqueue_all(&self, messages: impl IntoIterator<Item = T>) {
        let mut queue = self.queue.lock().unwrap();
        queue.extend(messages);
        self.condvar.notify_all();
    }

    /// Block until at least one message is available, then drain everything.
    pub fn dequeue_all(&self) -> Vec<T> {
        let mut queue = self.queue.lock().unwrap();
        while queue.is_empty() {
            queue = self.condvar.wait(queue).unwrap();
        }
        queue.drain(..).collect()
    }

    /// Drain whatever is queued right now without blocking.
    pub fn try_dequeue_all(&self) -> Vec<T> {
        self.queue.lock().unwrap().drain(..).collect()
    }

    /// Block up to `timeout` for a message; may return an empty vector.
    pub fn dequeue_timeout(&self, timeout: Duration) -> Vec<T> {
        let queue = self.queue.lock().unwrap();
        let (mut queue, _) = self
            .condvar
            .wait_timeout_while(queue, timeout, |q| q.is_empty())
            .unwrap();
        queue.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().unwrap().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_fifo_order() {
        let q = MessageQueue::new();
        q.enqueue(1);
        q.enqueue(2);
        q.enqueue(3);
        assert_eq!(q.dequeue_all(), vec![1, 2, 3]);
        assert!(q.is_empty());
    }

    #[test]
    fn test_blocking_dequeue_wakes() {
        let q = Arc::new(MessageQueue::new());
        let q2 = Arc::clone(&q);

        let handle = std::thread::spawn(move || q2.dequeue_all());
        std::thread::sleep(Duration::from_millis(20));
        q.enqueue(42);

        assert_eq!(handle.join().unwrap(), vec![42]);
    }

    #[test]
    fn test_timeout_returns_empty() {
        let q: MessageQueue<u32> = MessageQueue::new();
        let drained = q.dequeue_timeout(Duration::from_millis(10));
        assert!(drained.is_empty());
    }
}
