// Copyright 2025 Anapaya Systems
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//! Per endpoint mutual exclusion.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use tokio::sync::OwnedMutexGuard;

type LockTable = HashMap<String, Arc<tokio::sync::Mutex<()>>>;

/// Serializes operations on the same endpoint without blocking other endpoints.
///
/// Entries are removed once no task holds or waits for them.
#[derive(Clone, Default)]
pub struct EndpointLocks {
    table: Arc<Mutex<LockTable>>,
}

impl EndpointLocks {
    /// Waits until the endpoint is free and locks it until the guard is dropped.
    ///
    /// Dropping the returned future while it waits leaves no entry behind.
    pub async fn lock(&self, host: &str, endpoint_id: &str) -> EndpointGuard {
        let key = format!("{host}/{endpoint_id}");
        let mutex = self.table().entry(key.clone()).or_default().clone();
        let entry = TableEntry {
            key,
            mutex: Some(mutex.clone()),
            table: self.table.clone(),
        };
        let guard = mutex.lock_owned().await;

        EndpointGuard {
            guard: Some(guard),
            _entry: entry,
        }
    }

    /// Number of endpoints currently locked or waited for.
    pub fn len(&self) -> usize {
        self.table().len()
    }

    /// Returns true if no endpoint is locked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn table(&self) -> MutexGuard<'_, LockTable> {
        // The table is consistent after every operation, a panicking holder cannot corrupt it.
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Reference to a table entry held while waiting for or holding the lock.
struct TableEntry {
    key: String,
    mutex: Option<Arc<tokio::sync::Mutex<()>>>,
    table: Arc<Mutex<LockTable>>,
}

impl Drop for TableEntry {
    fn drop(&mut self) {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        self.mutex.take();
        // Only the table holds the entry once nobody holds or waits for it.
        if table
            .get(&self.key)
            .is_some_and(|entry| Arc::strong_count(entry) == 1)
        {
            table.remove(&self.key);
        }
    }
}

/// Lock on one endpoint.
pub struct EndpointGuard {
    guard: Option<OwnedMutexGuard<()>>,
    _entry: TableEntry,
}

impl Drop for EndpointGuard {
    fn drop(&mut self) {
        // Unlock before the entry is pruned.
        self.guard.take();
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use super::*;

    #[test_log::test(tokio::test)]
    async fn same_endpoint_is_serialized() {
        let locks = EndpointLocks::default();
        let active = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let locks = locks.clone();
                let active = active.clone();
                tokio::spawn(async move {
                    let _guard = locks.lock("host1", "ep").await;
                    assert_eq!(active.fetch_add(1, Ordering::SeqCst), 0);
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert!(locks.is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn different_endpoints_do_not_block() {
        let locks = EndpointLocks::default();
        let _first = locks.lock("host1", "ep1").await;
        let _other_host = locks.lock("host2", "ep1").await;
        let _second = tokio::time::timeout(Duration::from_secs(1), locks.lock("host1", "ep2"))
            .await
            .expect("lock on other endpoint should not block");
        assert_eq!(locks.len(), 3);
    }

    #[test_log::test(tokio::test)]
    async fn abandoned_waiter_leaves_no_entry() {
        let locks = EndpointLocks::default();
        let holder = locks.lock("host1", "ep").await;

        let waited =
            tokio::time::timeout(Duration::from_millis(20), locks.lock("host1", "ep")).await;
        assert!(waited.is_err());
        assert_eq!(locks.len(), 1);

        drop(holder);
        assert!(locks.is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn waiter_abandoned_after_holder_released_leaves_no_entry() {
        let locks = EndpointLocks::default();
        let holder = locks.lock("host1", "ep").await;

        let mut waiter = Box::pin(locks.lock("host1", "ep"));
        assert!(stays_pending(waiter.as_mut()).await);
        drop(holder);
        assert_eq!(locks.len(), 1);

        drop(waiter);
        assert!(locks.is_empty());
    }

    /// Returns true if the future does not complete within a short time.
    async fn stays_pending<F: Future>(future: std::pin::Pin<&mut F>) -> bool {
        tokio::time::timeout(Duration::from_millis(10), future)
            .await
            .is_err()
    }
}
