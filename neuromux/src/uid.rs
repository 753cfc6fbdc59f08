//! Process-unique identifier generation.
//!
//! Every module, broker, manager, and connectivity object draws its id from
//! one process-wide counter, so ids never collide within a manager's
//! lifetime. Ids are short opaque strings; nothing should parse them.

use std::sync::atomic::{AtomicU64, Ordering};

use neuromux_communication::ModuleId;

static COUNTER: AtomicU64 = AtomicU64::new(0);

/// Returns a fresh process-unique id string.
pub fn uid() -> String {
    format!("p{:04}", COUNTER.fetch_add(1, Ordering::Relaxed))
}

/// Returns a fresh process-unique [`ModuleId`].
pub fn fresh_id() -> ModuleId {
    ModuleId::new(uid())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn ids_are_unique() {
        let mut seen = HashSet::new();
        for _ in 0..1000 {
            assert!(seen.insert(uid()));
        }
    }

    #[test]
    fn ids_are_unique_across_threads() {
        let handles: Vec<_> = (0..8)
            .map(|_| std::thread::spawn(|| (0..100).map(|_| uid()).collect::<Vec<_>>()))
            .collect();
        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id));
            }
        }
    }
}
