// Outbound dispatch queue: bounded FIFO between callers and the send pipeline
// Full queue sheds new requests instead of stalling the caller.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tokio::sync::mpsc::{self, error::TrySendError};

use super::types::SendRequest;

/// Result of a single enqueue attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    /// Queue at capacity, request dropped
    DroppedFull,
    /// Queue closed, request dropped
    Closed,
}

pub struct DispatchQueue {
    tx: mpsc::Sender<SendRequest>,
    rx: Mutex<Option<mpsc::Receiver<SendRequest>>>,
    closed: AtomicBool,
    capacity: usize,
}

impl DispatchQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
            closed: AtomicBool::new(false),
            capacity,
        }
    }

    /// Non-blocking push
    pub fn enqueue(&self, request: SendRequest) -> EnqueueOutcome {
        if self.closed.load(Ordering::Acquire) {
            return EnqueueOutcome::Closed;
        }
        match self.tx.try_send(request) {
            Ok(()) => EnqueueOutcome::Queued,
            Err(TrySendError::Full(_)) => EnqueueOutcome::DroppedFull,
            Err(TrySendError::Closed(_)) => EnqueueOutcome::Closed,
        }
    }

    /// Reject all further enqueues. Items already queued stay for the consumer.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of queued requests not yet taken by the consumer
    pub fn len(&self) -> usize {
        self.capacity - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hand out the single consumer end. Returns None once taken.
    pub fn take_receiver(&self) -> Option<mpsc::Receiver<SendRequest>> {
        self.rx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::types::Payload;

    fn text(target: i64) -> SendRequest {
        SendRequest::group(target, Payload::text("hi"))
    }

    #[test]
    fn test_fifo_order() {
        let queue = DispatchQueue::new(8);
        for i in 0..5 {
            assert_eq!(queue.enqueue(text(i)), EnqueueOutcome::Queued);
        }
        assert_eq!(queue.len(), 5);

        let mut rx = queue.take_receiver().unwrap();
        for i in 0..5 {
            assert_eq!(rx.try_recv().unwrap().target, i);
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn test_full_queue_drops_without_blocking() {
        let queue = DispatchQueue::new(1024);
        for i in 0..1024 {
            assert_eq!(queue.enqueue(text(i)), EnqueueOutcome::Queued);
        }
        assert_eq!(queue.enqueue(text(9999)), EnqueueOutcome::DroppedFull);
        assert_eq!(queue.len(), 1024);

        // the dropped request never reaches the consumer
        let mut rx = queue.take_receiver().unwrap();
        let mut last = -1;
        while let Ok(req) = rx.try_recv() {
            last = req.target;
        }
        assert_eq!(last, 1023);
    }

    #[test]
    fn test_close_rejects_new_items() {
        let queue = DispatchQueue::new(4);
        assert_eq!(queue.enqueue(text(1)), EnqueueOutcome::Queued);
        queue.close();
        assert!(queue.is_closed());
        assert_eq!(queue.enqueue(text(2)), EnqueueOutcome::Closed);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_single_consumer() {
        let queue = DispatchQueue::new(4);
        assert!(queue.take_receiver().is_some());
        assert!(queue.take_receiver().is_none());
    }
}
