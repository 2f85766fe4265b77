//! Fixed-capacity FIFO buffer
//!
//! Appends are O(1); once the buffer is full every append evicts the oldest
//! element. Iteration is always oldest → newest.

use std::collections::VecDeque;

/// A capacity-limited ring buffer with implicit oldest-first eviction.
#[derive(Debug, Clone)]
pub struct BoundedBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> BoundedBuffer<T> {
    /// Create a buffer holding at most `capacity` elements (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// Append an element, returning the evicted oldest element if full.
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.items.len() >= self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Remove every element, returning how many were dropped.
    pub fn clear(&mut self) -> usize {
        let dropped = self.items.len();
        self.items.clear();
        dropped
    }

    /// Iterate oldest → newest
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        self.items.iter()
    }
}

impl<T: Clone> BoundedBuffer<T> {
    /// Copy the current contents, oldest first.
    pub fn to_vec(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_within_capacity() {
        let mut buffer = BoundedBuffer::new(3);
        assert!(buffer.push(1).is_none());
        assert!(buffer.push(2).is_none());
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.to_vec(), vec![1, 2]);
    }

    #[test]
    fn test_eviction_is_fifo() {
        let mut buffer = BoundedBuffer::new(3);
        for i in 0..3 {
            buffer.push(i);
        }
        assert_eq!(buffer.push(3), Some(0));
        assert_eq!(buffer.push(4), Some(1));
        assert_eq!(buffer.to_vec(), vec![2, 3, 4]);
    }

    #[test]
    fn test_never_exceeds_capacity() {
        let mut buffer = BoundedBuffer::new(50);
        for i in 0..1_000 {
            buffer.push(i);
            assert!(buffer.len() <= 50);
        }
        let expected: Vec<i32> = (950..1_000).collect();
        assert_eq!(buffer.to_vec(), expected);
    }

    #[test]
    fn test_zero_capacity_promoted() {
        let mut buffer = BoundedBuffer::new(0);
        assert_eq!(buffer.capacity(), 1);
        buffer.push("a");
        assert_eq!(buffer.push("b"), Some("a"));
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_clear_reports_dropped() {
        let mut buffer = BoundedBuffer::new(5);
        buffer.push(1);
        buffer.push(2);
        assert_eq!(buffer.clear(), 2);
        assert!(buffer.is_empty());
        assert_eq!(buffer.capacity(), 5);
    }

    #[test]
    fn test_iter_reverse_is_newest_first() {
        let mut buffer = BoundedBuffer::new(4);
        for i in 0..4 {
            buffer.push(i);
        }
        let newest_first: Vec<_> = buffer.iter().rev().copied().collect();
        assert_eq!(newest_first, vec![3, 2, 1, 0]);
    }
}
