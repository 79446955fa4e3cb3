//! Worker threads draining the shared message queue.
//!
//! Each worker owns one OS thread and runs every registered handler over
//! each message in arrival order. A `Shutdown` message stops the drain loop
//! after the current batch; `join` then reclaims the thread.

use std::sync::Arc;
use std::thread::JoinHandle;

use crate::network::{Message, MessageQueue};

pub type MessageHandler = Box<dyn Fn(&Message) + Send + 'static>;

pub struct Worker {
    queue: Arc<MessageQueue<Message>>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    pub fn new(queue: Arc<MessageQueue<Message>>) -> Self {
        Self {
            queue,
            handle: None,
        }
    }

    pub fn queue(&self) -> Arc<MessageQueue<Message>> {
        Arc::clone(&self.queue)
    }

    /// Spawn the drain thread. Handlers run on that thread, in registration
    /// order, for every message.
    pub fn start(&mut self, name: &str, handlers: Vec<MessageHandler>) {
        let queue = Arc::clone(&self.queue);
        let thread_name = name.to_string();

        let handle = std::thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                tracing::debug!("[worker] {thread_name} started");

                'drain: loop {
                    for message in queue.dequeue_all() {
                        if matches!(message, Message::Shutdown) {
                            tracing::debug!("[worker] {thread_name} shutting down");
                            break 'drain;
                        }

                        for handler in &handlers {
                            handler(&message);
                        }
                    }
                }
            })
            .expect("failed to spawn worker thread");

        self.handle = Some(handle);
    }

    /// Ask the worker to stop and wait for it.
    pub fn shutdown(&mut self) {
        if self.handle.is_some() {
            self.queue.enqueue(Message::Shutdown);
        }
        self.join();
    }

    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{Packet, PacketView};
    use std::sync::Mutex;

    fn command(code: u16) -> Message {
        let mut p = Packet::new();
        p.write_u16_le(code).unwrap();
        let view: PacketView = p.into();
        Message::Command {
            connection: dummy_connection(),
            command_code: code,
            data: view,
        }
    }

    fn dummy_connection() -> crate::network::ConnectionHandle {
        // A handle not backed by a socket is fine for queue plumbing.
        let queue = Arc::new(MessageQueue::new());
        let conn = crate::network::EncryptedConnection::client(
            tokio::io::duplex(64).0,
            "test".to_string(),
            Arc::downgrade(&queue),
        );
        conn.handle()
    }

    #[test]
    fn test_worker_processes_in_order() {
        let queue = Arc::new(MessageQueue::new());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let seen2 = Arc::clone(&seen);
        let mut worker = Worker::new(Arc::clone(&queue));
        worker.start(
            "test-worker",
            vec![Box::new(move |message| {
                if let Message::Command { command_code, .. } = message {
                    seen2.lock().unwrap().push(*command_code);
                }
            })],
        );

        for code in [1u16, 2, 3] {
            queue.enqueue(command(code));
        }
        worker.shutdown();

        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_shutdown_stops_drain() {
        let queue = Arc::new(MessageQueue::new());
        let mut worker = Worker::new(Arc::clone(&queue));
        worker.start("test-worker", vec![]);

        queue.enqueue(Message::Shutdown);
        worker.join();
        assert!(queue.is_empty());
    }
}
