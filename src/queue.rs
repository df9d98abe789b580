//! Bounded packet queue between the reader and assembler threads

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::packet::PACKET_SIZE;

/// Maximum number of packets held between the reader and the assembler.
pub const QUEUE_CAPACITY: usize = 1000;

/// Thread-safe FIFO of raw packet buffers with a capacity cap.
///
/// The reader thread never blocks on a full queue: a push against a full
/// queue drops the new packet and counts it, so a slow assembler costs
/// data, not network reads. `pop` blocks until a packet arrives or the
/// queue is shut down and drained.
pub struct PacketQueue {
    sender: Mutex<Option<Sender<Vec<u8>>>>,
    receiver: Receiver<Vec<u8>>,
    dropped: AtomicU64,
}

impl PacketQueue {
    pub fn new() -> PacketQueue {
        let (sender, receiver) = bounded(QUEUE_CAPACITY);
        PacketQueue {
            sender: Mutex::new(Some(sender)),
            receiver,
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueue one raw packet. Buffers of the wrong size and packets
    /// arriving while the queue is full are dropped and counted. After
    /// `shutdown` this is a no-op.
    pub fn push(&self, buffer: Vec<u8>) {
        if buffer.len() != PACKET_SIZE {
            self.count_drop();
            return;
        }
        let guard = self.sender.lock().unwrap();
        let sender = match guard.as_ref() {
            Some(sender) => sender,
            None => return,
        };
        if sender.try_send(buffer).is_err() {
            self.count_drop();
        }
    }

    /// Dequeue the oldest packet, blocking while the queue is empty.
    /// Returns `None` once the queue has been shut down and drained.
    pub fn pop(&self) -> Option<Vec<u8>> {
        self.receiver.recv().ok()
    }

    /// Close the queue. Wakes a blocked `pop` caller once the remaining
    /// packets are drained; later pushes are discarded.
    pub fn shutdown(&self) {
        self.sender.lock().unwrap().take();
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    /// Total packets dropped since construction.
    pub fn dropped_packets(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn count_drop(&self) {
        let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        // log on powers of two so sustained overload cannot flood the output
        if dropped & (dropped - 1) == 0 {
            log::warn!("dropped a total of {} packets due to full buffer", dropped);
        }
    }
}

impl Default for PacketQueue {
    fn default() -> PacketQueue {
        PacketQueue::new()
    }
}
