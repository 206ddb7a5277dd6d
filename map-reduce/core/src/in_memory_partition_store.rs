// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::partition_store::PartitionStore;
use crate::protocol::Record;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Partition store behind a single whole-map mutex
#[derive(Clone, Default)]
pub struct InMemoryPartitionStore {
    map: Arc<Mutex<HashMap<String, u64>>>,
}

impl InMemoryPartitionStore {
    pub fn new() -> Self {
        Self::default()
    }

    // A panicking writer cannot leave a count half-updated
    fn lock(&self) -> MutexGuard<'_, HashMap<String, u64>> {
        self.map.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl PartitionStore for InMemoryPartitionStore {
    async fn merge(&self, token: String, count: u64) {
        *self.lock().entry(token).or_insert(0) += count;
    }

    async fn merge_records(&self, records: Vec<Record>) {
        let mut map = self.lock();
        for record in records {
            *map.entry(record.token).or_insert(0) += record.count;
        }
    }

    async fn snapshot(&self) -> HashMap<String, u64> {
        self.lock().clone()
    }

    async fn len(&self) -> usize {
        self.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_merge_sums_counts() {
        let store = InMemoryPartitionStore::new();

        store.merge("word".to_string(), 2).await;
        store.merge("word".to_string(), 3).await;
        store.merge("other".to_string(), 1).await;

        let snapshot = store.snapshot().await;
        assert_eq!(snapshot.get("word"), Some(&5));
        assert_eq!(snapshot.get("other"), Some(&1));
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_concurrent_writers() {
        let store = InMemoryPartitionStore::new();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..100 {
                    store.merge("shared".to_string(), 1).await;
                }
                store
                    .merge_records(vec![Record::new("batch", 2), Record::new("shared", 1)])
                    .await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let snapshot = store.snapshot().await;
        assert_eq!(snapshot.get("shared"), Some(&808));
        assert_eq!(snapshot.get("batch"), Some(&16));
    }
}
