use uuid::Uuid;

/// Prefix for stored task results
pub const TASK_KEY_PREFIX: &str = "task:";

/// Counter bumped once per successfully processed message
pub const PROCESSED_COUNTER: &str = "metric_processed_count";

/// Counter bumped once per message that ended in failure
pub const ERRORED_COUNTER: &str = "metric_errored_count";

/// Source of result-store keys.
///
/// Implementations must not derive keys from payload content or from a
/// counter shared between workers; two workers generating keys at the same
/// instant must not collide.
pub trait KeyGenerator: Send + Sync {
    fn next_key(&self) -> String;
}

/// Random v4 UUIDs (122 bits of entropy) under the `task:` prefix
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidKeyGenerator;

impl KeyGenerator for UuidKeyGenerator {
    fn next_key(&self) -> String {
        task_key(&Uuid::new_v4().simple().to_string())
    }
}

pub fn task_key(id: &str) -> String {
    format!("{}{}", TASK_KEY_PREFIX, id)
}

pub fn is_task_key(key: &str) -> bool {
    key.starts_with(TASK_KEY_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_keys_are_namespaced() {
        let key = UuidKeyGenerator.next_key();
        assert!(is_task_key(&key));
        assert_eq!(key.len(), TASK_KEY_PREFIX.len() + 32);
        assert!(!is_task_key(PROCESSED_COUNTER));
        assert!(!is_task_key(ERRORED_COUNTER));
    }

    #[test]
    fn test_keys_do_not_collide_across_threads() {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                std::thread::spawn(|| {
                    (0..1000).map(|_| UuidKeyGenerator.next_key()).collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for key in handle.join().unwrap() {
                assert!(seen.insert(key), "duplicate key generated");
            }
        }
        assert_eq!(seen.len(), 8000);
    }
}
