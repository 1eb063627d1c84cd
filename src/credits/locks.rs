use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Per-student async locks serializing credit submissions inside this process.
///
/// Held from the `nextCreditId` read through the read-back so two submissions
/// for one student cannot claim each other's ledger id. Different students
/// never contend. Entries are pruned once no guard or waiter holds them.
#[derive(Default)]
pub struct StudentLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

pub struct StudentGuard {
    _guard: OwnedMutexGuard<()>,
}

impl StudentLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, student_id: &str) -> StudentGuard {
        let lock = {
            let mut locks = self.locks.lock();
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks
                .entry(student_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };

        StudentGuard {
            _guard: lock.lock_owned().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_student_is_serialized() {
        let locks = Arc::new(StudentLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let (locks, inside, max_inside) = (locks.clone(), inside.clone(), max_inside.clone());
                tokio::spawn(async move {
                    let _guard = locks.acquire("0xABC").await;
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    max_inside.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    inside.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_different_students_do_not_block() {
        let locks = StudentLocks::new();
        let _a = locks.acquire("0xA").await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.acquire("0xB")).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_released_entries_are_pruned() {
        let locks = StudentLocks::new();
        {
            let _guard = locks.acquire("0xA").await;
            assert_eq!(locks.locks.lock().len(), 1);
        }
        let _guard = locks.acquire("0xB").await;
        assert_eq!(locks.locks.lock().len(), 1);
    }
}
