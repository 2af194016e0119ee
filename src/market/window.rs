use std::collections::VecDeque;

/// Fixed-capacity, insertion-ordered buffer. Oldest entries are evicted once
/// the capacity is exceeded.
#[derive(Debug, Clone)]
pub struct SlidingWindow<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T: Clone> SlidingWindow<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn last(&self) -> Option<&T> {
        self.items.back()
    }

    pub fn append(&mut self, item: T) {
        self.items.push_back(item);
        self.evict_overflow();
    }

    /// Re-derives the visible subset for a new capacity. Shrinking drops the
    /// oldest entries; growing keeps everything retained so far.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        self.evict_overflow();
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn snapshot(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    fn evict_overflow(&mut self) {
        if self.items.len() > self.capacity {
            let overflow = self.items.len() - self.capacity;
            self.items.drain(..overflow);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_exceeds_capacity_after_append() {
        let mut window = SlidingWindow::new(5);
        for value in 0..23 {
            window.append(value);
            assert!(window.len() <= 5);
        }
    }

    #[test]
    fn keeps_last_n_in_insertion_order() {
        let mut window = SlidingWindow::new(4);
        for value in 1..=10 {
            window.append(value);
        }
        assert_eq!(window.snapshot(), vec![7, 8, 9, 10]);
    }

    #[test]
    fn burst_of_appends_keeps_only_the_tail() {
        let mut window = SlidingWindow::new(3);
        for value in 0..=100 {
            window.append(value);
        }
        assert_eq!(window.snapshot(), vec![98, 99, 100]);
    }

    #[test]
    fn shrinking_capacity_truncates_oldest() {
        let mut window = SlidingWindow::new(6);
        for value in 1..=6 {
            window.append(value);
        }
        window.set_capacity(2);
        assert_eq!(window.snapshot(), vec![5, 6]);

        window.set_capacity(4);
        window.append(7);
        window.append(8);
        window.append(9);
        assert_eq!(window.snapshot(), vec![6, 7, 8, 9]);
    }

    #[test]
    fn snapshot_does_not_alias_internal_state() {
        let mut window = SlidingWindow::new(3);
        for value in 1..=3 {
            window.append(value);
        }
        let snapshot = window.snapshot();
        window.append(4);
        assert_eq!(snapshot, vec![1, 2, 3]);
        assert_eq!(window.snapshot(), vec![2, 3, 4]);
    }
}
