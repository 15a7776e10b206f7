use alloc::collections::VecDeque;

/// A FIFO with a hard element capacity. `try_push_back` rejects when full;
/// the caller decides whether to drop or retry. Used for the router's TX
/// and RX queues.
#[derive(Debug, Clone)]
pub struct BoundedDeque<T> {
    q: VecDeque<T>,
    capacity: usize,
}

impl<T> BoundedDeque<T> {
    /// Create a new bounded deque with the given element capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            q: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Current length.
    #[inline]
    pub fn len(&self) -> usize {
        self.q.len()
    }

    /// Check if empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.q.is_empty()
    }

    /// Maximum number of elements.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Push to back; `QueueFull` when at capacity.
    pub fn try_push_back(&mut self, v: T) -> crate::TelemetryResult<()> {
        if self.q.len() >= self.capacity {
            return Err(crate::TelemetryError::QueueFull);
        }
        self.q.push_back(v);
        Ok(())
    }

    /// Pop from front.
    pub fn pop_front(&mut self) -> Option<T> {
        self.q.pop_front()
    }

    /// Clear all items.
    pub fn clear(&mut self) {
        self.q.clear();
    }

    /// Iterate items front to back.
    #[allow(dead_code)]
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.q.iter()
    }
}
