// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bounded queue of reusable message buffers.
//!
//! Time-data frames arrive at simulation rate; allocating a multi-kilobyte
//! buffer per frame would dominate the forward path, so the queue
//! pre-allocates a fixed ring of [`Message`] slots and cycles each through
//! `Free -> ReadSlot -> WriteSlot -> Free`:
//!
//! ```text
//! acquire_read()  ---> fill from socket ---> publish_write()
//!       ^                                         |
//!       |                                         v
//!    release() <--- transmit by writer <--- take_write()
//! ```
//!
//! A reader that decides not to forward a frame calls [`MessageQueue::release`]
//! directly. [`MessageQueue::terminate`] is idempotent: already-published
//! messages still drain to the writer, every later `take_write` returns
//! `None`, and anything published after termination goes straight back to
//! the free list so no slot leaks.
//!
//! Safe for multiple producers (reader and monitor threads both publish)
//! and one consumer (the writer thread).

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;

use crate::net::{SocketHandle, INVALID_SOCKET};
use crate::protocol::{MessageHeader, MessageKind};

/// A reusable message buffer: destination (or source) socket, decoded
/// header and payload bytes.
#[derive(Debug)]
pub struct Message {
    /// Socket the message was read from, re-stamped with the destination
    /// before publishing. Negative means "discard".
    pub socket: SocketHandle,
    /// Decoded header.
    pub header: MessageHeader,
    /// Payload bytes.
    pub data: Vec<u8>,
}

impl Message {
    fn with_capacity(payload_capacity: usize) -> Self {
        Self {
            socket: INVALID_SOCKET,
            header: MessageHeader::reply(MessageKind::CheckModel),
            data: Vec::with_capacity(payload_capacity),
        }
    }
}

#[derive(Debug)]
struct Shared {
    free: Vec<Box<Message>>,
    write: VecDeque<Box<Message>>,
    terminated: bool,
}

/// Bounded, terminable handoff between the reader/monitor threads and the
/// writer thread.
#[derive(Debug)]
pub struct MessageQueue {
    shared: Mutex<Shared>,
    free_ready: Condvar,
    write_ready: Condvar,
    capacity: usize,
}

impl MessageQueue {
    /// Pre-allocate `slots` buffers with `payload_capacity` bytes reserved
    /// in each.
    pub fn new(slots: usize, payload_capacity: usize) -> Self {
        let free = (0..slots)
            .map(|_| Box::new(Message::with_capacity(payload_capacity)))
            .collect();
        Self {
            shared: Mutex::new(Shared {
                free,
                write: VecDeque::with_capacity(slots),
                terminated: false,
            }),
            free_ready: Condvar::new(),
            write_ready: Condvar::new(),
            capacity: slots,
        }
    }

    /// Number of pre-allocated slots.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current length of the free list (diagnostic).
    pub fn free_len(&self) -> usize {
        self.shared.lock().free.len()
    }

    /// Take a free buffer to fill from a socket, blocking while the ring is
    /// exhausted. After termination an extra buffer may be allocated so
    /// shutdown paths can never deadlock on an empty free list.
    pub fn acquire_read(&self) -> Box<Message> {
        let mut shared = self.shared.lock();
        loop {
            if let Some(msg) = shared.free.pop() {
                return msg;
            }
            if shared.terminated {
                return Box::new(Message::with_capacity(0));
            }
            self.free_ready.wait(&mut shared);
        }
    }

    /// Hand a filled buffer to the writer. After termination the buffer is
    /// returned to the free list instead; the writer may already be gone.
    pub fn publish_write(&self, msg: Box<Message>) {
        let mut shared = self.shared.lock();
        if shared.terminated {
            shared.free.push(msg);
            drop(shared);
            self.free_ready.notify_one();
            return;
        }
        shared.write.push_back(msg);
        drop(shared);
        self.write_ready.notify_one();
    }

    /// Writer side: pop the next buffer to transmit. Blocks while the queue
    /// is empty; returns `None` once terminated and drained.
    pub fn take_write(&self) -> Option<Box<Message>> {
        let mut shared = self.shared.lock();
        loop {
            if let Some(msg) = shared.write.pop_front() {
                return Some(msg);
            }
            if shared.terminated {
                return None;
            }
            self.write_ready.wait(&mut shared);
        }
    }

    /// Return a buffer to the free list (after transmit, or after a
    /// decision not to publish).
    pub fn release(&self, mut msg: Box<Message>) {
        msg.socket = INVALID_SOCKET;
        msg.data.clear();
        let mut shared = self.shared.lock();
        shared.free.push(msg);
        drop(shared);
        self.free_ready.notify_one();
    }

    /// Shut the queue down. Idempotent; wakes every blocked caller.
    pub fn terminate(&self) {
        let mut shared = self.shared.lock();
        shared.terminated = true;
        drop(shared);
        self.write_ready.notify_all();
        self.free_ready.notify_all();
    }

    /// Whether [`MessageQueue::terminate`] has been called.
    pub fn is_terminated(&self) -> bool {
        self.shared.lock().terminated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_slot_cycle_returns_to_free_list() {
        let queue = MessageQueue::new(4, 64);
        assert_eq!(queue.free_len(), 4);

        let mut msg = queue.acquire_read();
        msg.socket = 9;
        msg.data.extend_from_slice(b"payload");
        assert_eq!(queue.free_len(), 3);

        queue.publish_write(msg);
        let msg = queue.take_write().expect("published message");
        assert_eq!(msg.socket, 9);
        assert_eq!(msg.data, b"payload");

        queue.release(msg);
        assert_eq!(queue.free_len(), 4);
    }

    #[test]
    fn test_release_without_publish() {
        let queue = MessageQueue::new(2, 64);
        let msg = queue.acquire_read();
        queue.release(msg);
        assert_eq!(queue.free_len(), 2);
    }

    #[test]
    fn test_terminate_drains_pending_then_signals() {
        let queue = MessageQueue::new(2, 64);
        let msg = queue.acquire_read();
        queue.publish_write(msg);
        queue.terminate();

        // The published message is still delivered, then the sentinel.
        let msg = queue.take_write().expect("pending message survives");
        queue.release(msg);
        assert!(queue.take_write().is_none());
        assert!(queue.take_write().is_none());
        assert_eq!(queue.free_len(), 2);
    }

    #[test]
    fn test_terminate_unblocks_writer() {
        let queue = Arc::new(MessageQueue::new(1, 64));
        let q = Arc::clone(&queue);
        let writer = thread::spawn(move || q.take_write());

        thread::sleep(Duration::from_millis(20));
        queue.terminate();
        assert!(writer.join().unwrap().is_none());
    }

    #[test]
    fn test_publish_after_terminate_goes_to_free_list() {
        let queue = MessageQueue::new(2, 64);
        let msg = queue.acquire_read();
        queue.terminate();
        queue.publish_write(msg);
        assert!(queue.take_write().is_none());
        assert_eq!(queue.free_len(), 2);
    }

    #[test]
    fn test_acquire_blocks_until_release() {
        let queue = Arc::new(MessageQueue::new(1, 64));
        let held = queue.acquire_read();

        let q = Arc::clone(&queue);
        let waiter = thread::spawn(move || {
            let msg = q.acquire_read();
            q.release(msg);
        });

        thread::sleep(Duration::from_millis(20));
        assert!(!waiter.is_finished());
        queue.release(held);
        waiter.join().unwrap();
        assert_eq!(queue.free_len(), 1);
    }

    #[test]
    fn test_no_leaked_buffers_after_mixed_traffic() {
        let queue = Arc::new(MessageQueue::new(8, 64));
        let q = Arc::clone(&queue);
        let writer = thread::spawn(move || {
            while let Some(msg) = q.take_write() {
                q.release(msg);
            }
        });

        for round in 0..1000 {
            let mut msg = queue.acquire_read();
            msg.socket = round;
            if round % 3 == 0 {
                queue.release(msg);
            } else {
                queue.publish_write(msg);
            }
        }
        queue.terminate();
        writer.join().unwrap();
        assert_eq!(queue.free_len(), queue.capacity());
    }
}
