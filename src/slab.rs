// src/slab.rs
use crate::conn::{Conn, ConnState};

/// Pre-allocated connection pool with an intrusive free list: a Free entry's
/// `fd` field is the index of the next free slot.
pub struct ConnectionSlab {
    entries: Vec<Conn>,
    head_free: i32,
    active_count: usize,
    high_water: usize,
}

impl ConnectionSlab {
    /// Allocate every slot once at worker startup.
    pub fn new(capacity: usize) -> Self {
        let mut entries = Vec::with_capacity(capacity);
        for i in 0..capacity {
            let mut conn = Conn::empty();
            conn.fd = if i == capacity - 1 { -1 } else { (i + 1) as i32 };
            entries.push(conn);
        }

        Self {
            entries,
            head_free: 0,
            active_count: 0,
            high_water: 0,
        }
    }

    /// O(1): pop the free list and open the slot on `new_fd`.
    /// Returns None when every slot is in use.
    pub fn allocate(&mut self, new_fd: i32, now: u32) -> Option<usize> {
        if self.head_free == -1 {
            return None;
        }

        let idx = self.head_free as usize;
        let conn = &mut self.entries[idx];
        self.head_free = conn.fd;

        conn.open(new_fd, now);

        self.active_count += 1;
        if idx + 1 > self.high_water {
            self.high_water = idx + 1;
        }
        Some(idx)
    }

    /// O(1): push the slot back on the free list.
    pub fn free(&mut self, index: usize) {
        if index >= self.entries.len() {
            return;
        }

        let conn = &mut self.entries[index];
        if conn.state == ConnState::Free {
            return; // double free
        }

        conn.fd = self.head_free;
        conn.state = ConnState::Free;
        self.head_free = index as i32;
        self.active_count -= 1;
    }

    pub fn get(&self, index: usize) -> Option<&Conn> {
        self.entries.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Conn> {
        self.entries.get_mut(index)
    }

    pub fn len(&self) -> usize {
        self.active_count
    }

    pub fn is_empty(&self) -> bool {
        self.active_count == 0
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Highest slot index ever used plus one; bounds timeout sweeps.
    pub fn high_water(&self) -> usize {
        self.high_water
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slab_allocate_free_reuse() {
        let mut slab = ConnectionSlab::new(4);
        assert_eq!(slab.len(), 0);
        assert_eq!(slab.capacity(), 4);

        let a = slab.allocate(100, 1).unwrap();
        assert_eq!(a, 0);
        assert_eq!(slab.get(a).unwrap().fd, 100);
        assert_eq!(slab.get(a).unwrap().state, ConnState::ReadingHeaders);

        let b = slab.allocate(101, 1).unwrap();
        assert_eq!(b, 1);

        slab.free(a);
        assert_eq!(slab.len(), 1);

        // Freed slot is the new head of the free list.
        let c = slab.allocate(102, 2).unwrap();
        assert_eq!(c, 0);
        assert_eq!(slab.high_water(), 2);
    }

    #[test]
    fn test_slab_exhaustion() {
        let mut slab = ConnectionSlab::new(2);
        assert!(slab.allocate(1, 0).is_some());
        assert!(slab.allocate(2, 0).is_some());
        assert!(slab.allocate(3, 0).is_none());
        slab.free(0);
        assert!(slab.allocate(4, 0).is_some());
    }

    #[test]
    fn test_double_free_is_ignored() {
        let mut slab = ConnectionSlab::new(2);
        let idx = slab.allocate(9, 0).unwrap();
        slab.free(idx);
        slab.free(idx);
        assert_eq!(slab.len(), 0);
        // Both slots still allocatable exactly once each.
        assert!(slab.allocate(1, 0).is_some());
        assert!(slab.allocate(2, 0).is_some());
        assert!(slab.allocate(3, 0).is_none());
    }
}
