//! Size-classed byte buffer pool.
//!
//! Transport read loops allocate the same staging buffers over and over;
//! this pool recycles them in power-of-two classes. `alloc` returns an empty
//! `Vec` with at least the requested capacity, `free` gives it back. Requests
//! above the largest class fall through to the allocator and are never pooled.
//!
//! Correctness never depends on the pool; dropping a buffer instead of
//! freeing it just forfeits the reuse.

use once_cell::sync::Lazy;
use std::sync::{Mutex, PoisonError};

/// Smallest pooled capacity.
const MIN_CLASS: usize = 64;
/// Largest pooled capacity.
const MAX_CLASS: usize = 64 * 1024;
/// Retained buffers per class.
const CLASS_DEPTH: usize = 32;

const NUM_CLASSES: usize = (MAX_CLASS.ilog2() - MIN_CLASS.ilog2() + 1) as usize;

static POOL: Lazy<Vec<Mutex<Vec<Vec<u8>>>>> =
    Lazy::new(|| (0..NUM_CLASSES).map(|_| Mutex::new(Vec::new())).collect());

fn class_index(capacity: usize) -> Option<usize> {
    if capacity > MAX_CLASS {
        return None;
    }
    let rounded = capacity.next_power_of_two().max(MIN_CLASS);
    Some((rounded.ilog2() - MIN_CLASS.ilog2()) as usize)
}

/// Capacity a request of `size` bytes is served with.
#[must_use]
pub fn class_capacity(size: usize) -> usize {
    match class_index(size) {
        Some(_) => size.next_power_of_two().max(MIN_CLASS),
        None => size,
    }
}

/// Get an empty buffer with capacity of at least `size` bytes.
#[must_use]
pub fn alloc(size: usize) -> Vec<u8> {
    let Some(index) = class_index(size) else {
        return Vec::with_capacity(size);
    };
    let recycled = POOL[index]
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .pop();
    recycled.unwrap_or_else(|| Vec::with_capacity(class_capacity(size)))
}

/// Return a buffer for reuse.
pub fn free(mut buf: Vec<u8>) {
    let capacity = buf.capacity();
    // Only exact class capacities go back; anything else came from the
    // allocator or was grown by the caller.
    if !capacity.is_power_of_two() || capacity < MIN_CLASS || capacity > MAX_CLASS {
        return;
    }
    buf.clear();
    let Some(index) = class_index(capacity) else {
        return;
    };
    let mut bucket = POOL[index].lock().unwrap_or_else(PoisonError::into_inner);
    if bucket.len() < CLASS_DEPTH {
        bucket.push(buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_up_to_class() {
        assert_eq!(class_capacity(1), MIN_CLASS);
        assert_eq!(class_capacity(64), 64);
        assert_eq!(class_capacity(65), 128);
        assert_eq!(class_capacity(4000), 4096);
    }

    #[test]
    fn oversize_is_unpooled() {
        assert_eq!(class_capacity(MAX_CLASS + 1), MAX_CLASS + 1);
        let buf = alloc(MAX_CLASS + 1);
        assert!(buf.capacity() >= MAX_CLASS + 1);
        free(buf); // silently not retained
    }

    #[test]
    fn alloc_free_reuses() {
        let mut buf = alloc(100);
        assert!(buf.is_empty());
        assert!(buf.capacity() >= 100);
        buf.extend_from_slice(b"scratch");
        let capacity = buf.capacity();
        free(buf);

        let again = alloc(100);
        assert_eq!(again.capacity(), capacity);
        assert!(again.is_empty());
    }

    #[test]
    fn grown_buffers_are_not_retained() {
        let mut buf = alloc(64);
        buf.reserve_exact(100); // capacity no longer a class size
        let odd_capacity = buf.capacity();
        if !odd_capacity.is_power_of_two() {
            free(buf);
            let fresh = alloc(64);
            assert_ne!(fresh.capacity(), odd_capacity);
        }
    }
}
