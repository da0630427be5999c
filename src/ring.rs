//! Bounded event staging ring.
//!
//! The deduplicator clones incoming events onto the heap and stages the
//! boxes here until a batch is cut. Capacity is fixed at construction,
//! the next page-aligned multiple of one pointer per requested event,
//! and a full ring is what forces a batch boundary.

use std::mem;

use crate::fsevent::FsEvent;

const SLOT_SIZE: usize = mem::size_of::<*const FsEvent>();

/// Fixed-capacity FIFO of boxed events.
#[derive(Debug)]
pub struct EventRing {
    slots: Box<[Option<Box<FsEvent>>]>,
    head: usize,
    len: usize,
}

impl EventRing {
    /// Creates a ring able to stage at least `count` events.
    ///
    /// The backing storage is rounded up to a whole number of pages, so
    /// the usable capacity is usually larger than `count`.
    pub fn new(count: usize) -> Self {
        assert!(count > 0, "ring must hold at least one event");
        let page = page_size::get();
        let bytes = (count * SLOT_SIZE).div_ceil(page) * page;
        Self::with_slots(bytes / SLOT_SIZE)
    }

    /// Creates a ring with an exact slot count, bypassing page rounding.
    pub fn with_slots(count: usize) -> Self {
        assert!(count > 0, "ring must hold at least one event");
        EventRing {
            slots: (0..count).map(|_| None).collect(),
            head: 0,
            len: 0,
        }
    }

    /// Number of slots, post rounding.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of staged events.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when nothing is staged.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// True when the next push would be refused.
    pub fn is_full(&self) -> bool {
        self.len == self.slots.len()
    }

    /// Stages an event; hands it back if the ring is full.
    pub fn push(&mut self, event: Box<FsEvent>) -> Result<(), Box<FsEvent>> {
        if self.is_full() {
            return Err(event);
        }
        let tail = (self.head + self.len) % self.slots.len();
        debug_assert!(self.slots[tail].is_none());
        self.slots[tail] = Some(event);
        self.len += 1;
        Ok(())
    }

    /// Removes and returns every staged event in push order.
    pub fn drain(&mut self) -> Vec<Box<FsEvent>> {
        let mut out = Vec::with_capacity(self.len);
        let capacity = self.slots.len();
        for offset in 0..self.len {
            let slot = (self.head + offset) % capacity;
            out.push(self.slots[slot].take().expect("occupied ring slot"));
        }
        self.head = (self.head + self.len) % capacity;
        self.len = 0;
        out
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::fsevent::Id;
    use crate::value::ValueMap;

    fn event(tag: u8) -> Box<FsEvent> {
        Box::new(FsEvent::Delete {
            id: Id::from_bytes(vec![tag]),
            xattrs: ValueMap::new(),
        })
    }

    #[test]
    fn capacity_is_page_aligned() {
        let ring = EventRing::new(2);
        let slots_per_page = page_size::get() / SLOT_SIZE;
        assert_eq!(ring.capacity() % slots_per_page, 0);
        assert!(ring.capacity() >= 2);
    }

    #[test]
    fn push_order_is_preserved() {
        let mut ring = EventRing::with_slots(3);
        for tag in 0..3 {
            ring.push(event(tag)).unwrap();
        }
        let drained = ring.drain();
        let tags: Vec<u8> = drained.iter().map(|e| e.id().as_bytes()[0]).collect();
        assert_eq!(tags, [0, 1, 2]);
    }

    #[test]
    fn overflow_returns_the_event() {
        let mut ring = EventRing::with_slots(1);
        ring.push(event(0)).unwrap();
        let rejected = ring.push(event(1)).unwrap_err();
        assert_eq!(rejected.id().as_bytes(), [1]);
        assert!(ring.is_full());
    }

    #[test]
    fn reuse_after_drain_wraps_around() {
        let mut ring = EventRing::with_slots(2);
        ring.push(event(0)).unwrap();
        assert_eq!(ring.drain().len(), 1);
        // head is now 1; the next two pushes must wrap.
        ring.push(event(1)).unwrap();
        ring.push(event(2)).unwrap();
        assert!(ring.is_full());
        let tags: Vec<u8> = ring.drain().iter().map(|e| e.id().as_bytes()[0]).collect();
        assert_eq!(tags, [1, 2]);
        assert!(ring.is_empty());
    }
}
