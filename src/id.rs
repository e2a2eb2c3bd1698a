//! Identifier generation.
//!
//! Id uniqueness is decoupled from any particular storage medium by
//! injecting the generator.

use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Generates unique identifiers for intents and grants.
pub trait IdGenerator: Send + Sync {
    /// Produce a new identifier with the given prefix.
    fn next_id(&self, prefix: &str) -> String;
}

/// UUID-v4 backed generator used in production.
#[derive(Debug, Default)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn next_id(&self, prefix: &str) -> String {
        format!("{prefix}-{}", Uuid::new_v4())
    }
}

/// Monotonic sequence generator for deterministic tests.
#[derive(Debug, Default)]
pub struct SequenceGenerator {
    counter: AtomicU64,
}

impl IdGenerator for SequenceGenerator {
    fn next_id(&self, prefix: &str) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{prefix}-{n}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_ids_are_unique_and_prefixed() {
        let ids = UuidGenerator;
        let a = ids.next_id("intent");
        let b = ids.next_id("intent");
        assert_ne!(a, b);
        assert!(a.starts_with("intent-"));
    }

    #[test]
    fn test_sequence_ids_are_deterministic() {
        let ids = SequenceGenerator::default();
        assert_eq!(ids.next_id("grant"), "grant-1");
        assert_eq!(ids.next_id("grant"), "grant-2");
    }
}
