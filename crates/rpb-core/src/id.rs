//! Process-wide unique id allocation
//!
//! Node ids and protocol ids share one id space. Ids handed out are never
//! reused during a run; loading a configuration raises the counter past
//! every id it contains.

use std::sync::atomic::{AtomicU64, Ordering};

static LAST_ID: AtomicU64 = AtomicU64::new(0);

/// Allocate a fresh id, strictly greater than every id seen so far
pub fn next_unique_id() -> u64 {
    LAST_ID.fetch_add(1, Ordering::SeqCst) + 1
}

/// Record an externally provided id so later allocations never collide with it
pub fn validate_unique_id(id: u64) {
    LAST_ID.fetch_max(id, Ordering::SeqCst);
}

/// Highest id allocated or validated so far
pub fn current_unique_id() -> u64 {
    LAST_ID.load(Ordering::SeqCst)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_increasing() {
        let a = next_unique_id();
        let b = next_unique_id();
        assert!(b > a);
    }

    #[test]
    fn test_validate_raises_counter() {
        let seen = current_unique_id() + 1000;
        validate_unique_id(seen);
        assert!(next_unique_id() > seen);

        // lower ids never move the counter backwards
        validate_unique_id(1);
        assert!(current_unique_id() > seen);
    }
}
