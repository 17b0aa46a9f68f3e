//! Bounded small-integer identity pools.
//!
//! Both the slot pool (one identity per admitted connection) and the pointer
//! pool (one drawing pointer per participating client) are instances of
//! [`SlotPool`].

/// A fixed-capacity pool of `u8` indices.
///
/// Allocation scans linearly from index 0 and hands out the first free index,
/// so an allocation costs O(capacity). Capacities are bounded by 256 because
/// indices travel as a single byte on the wire, which keeps the scan trivial.
#[derive(Debug, Clone)]
pub struct SlotPool {
    occupied: Vec<bool>,
    in_use: usize,
}

impl SlotPool {
    /// Creates an empty pool. Capacities above 256 are clamped.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.min(u8::MAX as usize + 1);
        Self {
            occupied: vec![false; capacity],
            in_use: 0,
        }
    }

    /// Claims the lowest free index, or `None` when the pool is full.
    pub fn allocate(&mut self) -> Option<u8> {
        let index = self.occupied.iter().position(|taken| !taken)?;
        self.occupied[index] = true;
        self.in_use += 1;
        Some(index as u8)
    }

    /// Returns `index` to the pool.
    ///
    /// Releasing a free or out-of-range index does nothing, so a double
    /// release can never free someone else's identity twice.
    pub fn release(&mut self, index: u8) {
        if let Some(taken) = self.occupied.get_mut(index as usize) {
            if *taken {
                *taken = false;
                self.in_use -= 1;
            }
        }
    }

    pub fn is_occupied(&self, index: u8) -> bool {
        self.occupied.get(index as usize).copied().unwrap_or(false)
    }

    pub fn occupied(&self) -> usize {
        self.in_use
    }

    pub fn capacity(&self) -> usize {
        self.occupied.len()
    }

    pub fn is_full(&self) -> bool {
        self.in_use == self.occupied.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocates_lowest_free_index() {
        let mut pool = SlotPool::new(4);
        assert_eq!(pool.allocate(), Some(0));
        assert_eq!(pool.allocate(), Some(1));
        assert_eq!(pool.allocate(), Some(2));

        pool.release(1);
        assert_eq!(pool.allocate(), Some(1));
        assert_eq!(pool.allocate(), Some(3));
        assert!(pool.is_full());
        assert_eq!(pool.allocate(), None);
    }

    #[test]
    fn test_double_release_is_noop() {
        let mut pool = SlotPool::new(3);
        let a = pool.allocate().unwrap();
        let _b = pool.allocate().unwrap();

        pool.release(a);
        pool.release(a);
        assert_eq!(pool.occupied(), 1);
        assert!(!pool.is_occupied(a));

        // Out of range is ignored too
        pool.release(200);
        assert_eq!(pool.occupied(), 1);
    }

    #[test]
    fn test_max_capacity_pool() {
        let mut pool = SlotPool::new(255);
        for expected in 0..255u16 {
            assert_eq!(pool.allocate(), Some(expected as u8));
        }
        assert_eq!(pool.allocate(), None);
        assert_eq!(pool.occupied(), 255);
        assert_eq!(pool.capacity(), 255);
    }
}
