use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

use crate::ledger::normalize_address;
use crate::store::models::Role;

/// Process-lifetime address -> role map.
///
/// Entries are written only after a role assignment was accepted by the ledger
/// and are never expired. Last writer wins.
#[derive(Debug, Default)]
pub struct RoleCache {
    entries: RwLock<HashMap<String, Role>>,
}

impl RoleCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assign(&self, address: &str, role: Role) {
        let key = normalize_address(address);
        let previous = self.entries.write().insert(key.clone(), role);
        debug!(address = %key, %role, ?previous, "role cached");
    }

    pub fn lookup(&self, address: &str) -> Option<Role> {
        self.entries.read().get(&normalize_address(address)).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const ADDR: &str = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";

    #[test]
    fn test_assign_overwrites() {
        let cache = RoleCache::new();
        assert!(cache.lookup(ADDR).is_none());

        cache.assign(ADDR, Role::Student);
        cache.assign(ADDR, Role::Teacher);
        assert_eq!(cache.lookup(ADDR), Some(Role::Teacher));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_keys_are_case_insensitive() {
        let cache = RoleCache::new();
        cache.assign(ADDR, Role::Admin);
        assert_eq!(cache.lookup(&ADDR.to_uppercase().replacen("0X", "0x", 1)), Some(Role::Admin));
        assert_eq!(cache.lookup(&ADDR.to_lowercase()), Some(Role::Admin));
    }

    #[test]
    fn test_isolated_instances() {
        let a = RoleCache::new();
        let b = RoleCache::new();
        a.assign(ADDR, Role::Teacher);
        assert!(b.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_lookups_observe_assignment() {
        let cache = Arc::new(RoleCache::new());
        cache.assign(ADDR, Role::Teacher);

        let handles: Vec<_> = (0..64)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.lookup(ADDR) })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.await.unwrap(), Some(Role::Teacher));
        }
    }

    #[test]
    fn test_concurrent_writers_leave_one_entry() {
        let cache = Arc::new(RoleCache::new());
        let threads: Vec<_> = (0..8)
            .map(|i| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    let role = if i % 2 == 0 { Role::Teacher } else { Role::Admin };
                    for _ in 0..100 {
                        cache.assign(ADDR, role);
                        assert!(cache.lookup(ADDR).is_some());
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(cache.len(), 1);
    }
}
