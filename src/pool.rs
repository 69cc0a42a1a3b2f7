//! Free lists recycling wire headers across the lifetime of one server.
//!
//! An allocation optimization, not a correctness requirement: headers are
//! taken for one call, mutated, and returned cleared. The list is bounded so
//! a burst of traffic cannot pin memory forever.

use std::sync::Mutex;

/// Maximum number of headers kept for reuse.
const FREE_LIST_CAP: usize = 128;

/// Reset a pooled value to its zero state before it goes back on the list.
pub(crate) trait Clear {
    fn clear(&mut self);
}

/// A mutex-guarded free list of header objects.
pub(crate) struct FreeList<T> {
    free: Mutex<Vec<T>>,
}

impl<T: Default + Clear> FreeList<T> {
    pub(crate) fn new() -> Self {
        FreeList {
            free: Mutex::new(Vec::new()),
        }
    }

    /// Take a cleared value, reusing a returned one when available.
    pub(crate) fn get(&self) -> T {
        self.free.lock().unwrap().pop().unwrap_or_default()
    }

    /// Return a value to the list. Dropped on the floor once the list is at
    /// capacity.
    pub(crate) fn put(&self, mut value: T) {
        value.clear();
        let mut free = self.free.lock().unwrap();
        if free.len() < FREE_LIST_CAP {
            free.push(value);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.free.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::RequestHeader;

    #[test]
    fn get_reuses_returned_headers() {
        let pool: FreeList<RequestHeader> = FreeList::new();
        let mut req = pool.get();
        req.service_method.push_str("Arith.Multiply");
        req.seq = 9;
        pool.put(req);
        assert_eq!(pool.len(), 1);

        let req = pool.get();
        assert_eq!(req, RequestHeader::default());
        assert_eq!(pool.len(), 0);
    }

    #[test]
    fn list_growth_is_bounded() {
        let pool: FreeList<RequestHeader> = FreeList::new();
        for _ in 0..FREE_LIST_CAP * 2 {
            pool.put(RequestHeader::default());
        }
        assert_eq!(pool.len(), FREE_LIST_CAP);
    }
}
