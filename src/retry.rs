//! Bounded FIFO queue of batches awaiting re-send.

use std::collections::VecDeque;

use crate::write_service::Batch;

/// Fixed-capacity queue with overwrite-oldest policy.
///
/// Owned exclusively by the writer worker of a pipeline (or by the blocking
/// API through its service), so it carries no synchronization of its own.
#[derive(Debug)]
pub(crate) struct RetryQueue {
    batches: VecDeque<Batch>,
    capacity: usize,
}

impl RetryQueue {
    /// Creates a queue holding at most `capacity` batches; a capacity of
    /// zero is raised to one.
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            batches: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends a batch to the tail. When the queue is full the oldest batch
    /// is evicted first; returns true when that happened.
    pub(crate) fn push(&mut self, batch: Batch) -> bool {
        let mut overwritten = false;
        if self.batches.len() == self.capacity {
            self.batches.pop_front();
            overwritten = true;
        }
        self.batches.push_back(batch);
        overwritten
    }

    /// Removes and returns the oldest batch.
    pub(crate) fn pop(&mut self) -> Option<Batch> {
        self.batches.pop_front()
    }

    /// Oldest batch without removing it.
    pub(crate) fn first(&self) -> Option<&Batch> {
        self.batches.front()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(id: usize) -> Batch {
        Batch::new(format!("m value={}i\n", id), 30)
    }

    #[test]
    fn test_fifo_order() {
        let mut queue = RetryQueue::new(3);
        assert!(queue.is_empty());
        assert!(queue.pop().is_none());
        assert!(queue.first().is_none());

        assert!(!queue.push(batch(1)));
        assert!(!queue.push(batch(2)));
        assert!(!queue.is_empty());

        assert_eq!(queue.first().unwrap().lines(), "m value=1i\n");
        assert_eq!(queue.pop().unwrap().lines(), "m value=1i\n");
        assert_eq!(queue.pop().unwrap().lines(), "m value=2i\n");
        assert!(queue.is_empty());
    }

    #[test]
    fn test_overflow_evicts_oldest() {
        let mut queue = RetryQueue::new(2);
        assert!(!queue.push(batch(1)));
        assert!(!queue.push(batch(2)));
        assert!(queue.push(batch(3)));
        assert!(queue.push(batch(4)));

        assert_eq!(queue.pop().unwrap().lines(), "m value=3i\n");
        assert_eq!(queue.pop().unwrap().lines(), "m value=4i\n");
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_keeps_most_recent_in_insertion_order() {
        let mut queue = RetryQueue::new(3);
        for i in 0..10 {
            queue.push(batch(i));
        }
        let mut kept = Vec::new();
        while let Some(b) = queue.pop() {
            kept.push(b.lines().to_string());
        }
        assert_eq!(kept, vec!["m value=7i\n", "m value=8i\n", "m value=9i\n"]);
    }

    #[test]
    fn test_zero_capacity_is_raised_to_one() {
        let mut queue = RetryQueue::new(0);
        assert!(!queue.push(batch(1)));
        assert!(queue.push(batch(2)));
        assert_eq!(queue.pop().unwrap().lines(), "m value=2i\n");
    }
}
