use crate::metrics::error::{MetricsError, MetricsResult};

/// Fixed-capacity circular store.  Once full, every `store` overwrites
/// exactly the oldest entry.
///
/// Not synchronized; the owner wraps it in its lock and must hold that
/// lock for the whole of a `traverse`.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    slots: Vec<Option<T>>,
    start: usize,
    end: usize,
    size: usize,
}

impl<T> RingBuffer<T> {
    pub fn new(capacity: usize) -> MetricsResult<Self> {
        if capacity == 0 {
            return Err(MetricsError::InvalidCapacity(capacity));
        }
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Ok(Self {
            slots,
            start: 0,
            end: 0,
            size: 0,
        })
    }

    /// Append `item`, returning the record it displaced when full.
    pub fn store(&mut self, item: T) -> Option<T> {
        let cap = self.slots.len();
        let evicted = self.slots[self.end].replace(item);
        self.end = (self.end + 1) % cap;
        if self.size == cap {
            // Full: the slot we just wrote was the oldest
            self.start = self.end;
        } else {
            self.size += 1;
        }
        evicted
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn is_full(&self) -> bool {
        self.size == self.slots.len()
    }

    /// Lazily walk retained entries, oldest first.
    pub fn traverse(&self) -> impl Iterator<Item = &T> + '_ {
        let cap = self.slots.len();
        (0..self.size).filter_map(move |i| self.slots[(self.start + i) % cap].as_ref())
    }
}
