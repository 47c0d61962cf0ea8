use std::collections::VecDeque;

/// Fixed-capacity ring of the most recent items.
#[derive(Debug, Clone)]
pub struct ReadingBuffer<T> {
    capacity: usize,
    items: VecDeque<T>,
}

impl<T: Clone> ReadingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            items: VecDeque::with_capacity(capacity.max(1)),
        }
    }

    pub fn push(&mut self, item: T) {
        if self.items.len() == self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    pub fn latest(&self) -> Option<&T> {
        self.items.back()
    }

    /// Up to `count` most recent items, oldest first.
    pub fn recent(&self, count: usize) -> Vec<T> {
        let skip = self.items.len().saturating_sub(count);
        self.items.iter().skip(skip).cloned().collect()
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

    pub fn clear(&mut self) {
        self.items.clear();
    }
}
