//! Recyclable pipe identifier generation.

use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

/// Generates unique non-zero 31-bit identifiers that can be returned for
/// later reuse.
///
/// A wrapping cursor skips zero and any identifier still held. The cursor is
/// seeded randomly so identifiers are not predictable across restarts;
/// correctness does not depend on the seed.
#[derive(Debug)]
pub struct RecyclableIdGenerator {
    inner: Mutex<IdState>,
}

#[derive(Debug)]
struct IdState {
    held: HashSet<u32>,
    next: u32,
}

impl Default for RecyclableIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl RecyclableIdGenerator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(IdState {
                held: HashSet::new(),
                next: rand::random::<u32>(),
            }),
        }
    }

    /// The next identifier not currently held. Never zero.
    pub fn next_id(&self) -> u32 {
        let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            let id = state.next & 0x7fff_ffff;
            state.next = state.next.wrapping_add(1);
            if id == 0 {
                continue;
            }
            if state.held.insert(id) {
                return id;
            }
        }
    }

    /// Return an identifier for future use.
    pub fn recycle(&self, id: u32) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .held
            .remove(&id);
    }

    /// Number of identifiers currently held.
    #[must_use]
    pub fn active(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .held
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_nonzero() {
        let gen = RecyclableIdGenerator::new();
        let mut seen = HashSet::new();
        for _ in 0..1000 {
            let id = gen.next_id();
            assert_ne!(id, 0);
            assert!(id <= 0x7fff_ffff);
            assert!(seen.insert(id), "duplicate id {id}");
        }
        assert_eq!(gen.active(), 1000);
    }

    #[test]
    fn recycled_ids_become_available() {
        let gen = RecyclableIdGenerator::new();
        let id = gen.next_id();
        gen.recycle(id);
        assert_eq!(gen.active(), 0);

        // After a full cursor wrap the recycled id is handed out again.
        // Exercising the wrap directly would take 2^31 steps, so just check
        // the held set no longer blocks it.
        let next = gen.next_id();
        assert_ne!(next, 0);
    }

    #[test]
    fn cursor_skips_held_ids() {
        let gen = RecyclableIdGenerator::new();
        let a = gen.next_id();
        let b = gen.next_id();
        assert_ne!(a, b);
        gen.recycle(a);
        gen.recycle(b);
    }
}
