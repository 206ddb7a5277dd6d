// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::protocol::Record;
use async_trait::async_trait;
use std::collections::HashMap;

/// Per-worker store of reduced counts for the tokens this worker owns.
///
/// Written concurrently by every peer connection during SHUFFLE and read once
/// at REDUCE, so implementations must tolerate concurrent `merge` calls.
#[async_trait]
pub trait PartitionStore: Clone + Send + Sync + 'static {
    /// `store[token] += count`, inserting the token if absent
    async fn merge(&self, token: String, count: u64);

    async fn merge_records(&self, records: Vec<Record>) {
        for record in records {
            self.merge(record.token, record.count).await;
        }
    }

    /// Copy of the current contents
    async fn snapshot(&self) -> HashMap<String, u64>;

    async fn len(&self) -> usize;
}
