/// Default number of items kept per history
pub const HISTORY_CAPACITY: usize = 1000;

/// Fixed-capacity buffer of the most recent items; the oldest is overwritten once full
#[derive(Debug, Clone)]
pub struct History<T> {
    slots: Vec<T>,
    /// Index of the oldest item once the buffer has wrapped
    head: usize,
    capacity: usize,
}

impl<T> Default for History<T> {
    fn default() -> Self {
        Self::new(HISTORY_CAPACITY)
    }
}

impl<T> History<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: Vec::with_capacity(capacity.min(64)),
            head: 0,
            capacity,
        }
    }

    pub fn push(&mut self, item: T) {
        if self.slots.len() < self.capacity {
            self.slots.push(item);
        } else {
            self.slots[self.head] = item;
            self.head = (self.head + 1) % self.capacity;
        }
    }

    /// Oldest to newest
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> {
        let (newer, older) = self.slots.split_at(self.head);
        older.iter().chain(newer.iter())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.head = 0;
    }
}

impl<T: Clone> History<T> {
    /// Copy of every item, oldest to newest
    pub fn all(&self) -> Vec<T> {
        self.iter().cloned().collect()
    }

    /// The last `n` items, newest first
    pub fn latest(&self, n: usize) -> Vec<T> {
        self.iter().rev().take(n).cloned().collect()
    }
}
