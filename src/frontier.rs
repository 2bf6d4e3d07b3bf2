//! Persistent work queue of identifiers awaiting resolution.
//!
//! The queue is a deduplicated FIFO backed by the store, so an interrupted
//! crawl resumes from exactly the discovered-but-unresolved set. Dequeue is
//! a single destructive statement; `FOR UPDATE SKIP LOCKED` keeps concurrent
//! workers from ever receiving the same entry.

use crate::store::{Store, StoreError};
use crate::types::Bssid;

/// Handle to the frontier table.
#[derive(Clone)]
pub struct FrontierQueue {
    store: Store,
}

impl FrontierQueue {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Add identifiers to the back of the queue. Re-adding an identifier
    /// that is already queued is silently absorbed.
    pub async fn enqueue(
        &self,
        bssids: impl IntoIterator<Item = Bssid>,
    ) -> Result<(), StoreError> {
        let keys: Vec<String> = bssids.into_iter().map(|b| b.to_string()).collect();
        if keys.is_empty() {
            return Ok(());
        }

        self.store
            .with_retry(|client| {
                let keys = keys.clone();
                async move {
                    let insert = client
                        .prepare(
                            "INSERT INTO exploration_queue (bssid) VALUES ($1)
                             ON CONFLICT (bssid) DO NOTHING",
                        )
                        .await?;
                    for key in &keys {
                        client.execute(&insert, &[key]).await?;
                    }
                    Ok(())
                }
            })
            .await
    }

    /// Remove and return the oldest entry, or `None` when the queue is
    /// empty. No two concurrent callers receive the same entry.
    pub async fn dequeue_one(&self) -> Result<Option<Bssid>, StoreError> {
        let row = self
            .store
            .with_retry(|client| async move {
                client
                    .query_opt(
                        "DELETE FROM exploration_queue
                         WHERE bssid = (
                             SELECT bssid FROM exploration_queue
                             ORDER BY position
                             LIMIT 1
                             FOR UPDATE SKIP LOCKED
                         )
                         RETURNING bssid",
                        &[],
                    )
                    .await
            })
            .await?;

        match row {
            Some(row) => Ok(Some(row.get::<_, String>(0).parse()?)),
            None => Ok(None),
        }
    }

    /// Entries currently awaiting resolution.
    pub async fn len(&self) -> Result<i64, StoreError> {
        self.store
            .with_retry(|client| async move {
                let row = client
                    .query_one("SELECT COUNT(*) FROM exploration_queue", &[])
                    .await?;
                Ok(row.get(0))
            })
            .await
    }

    pub async fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len().await? == 0)
    }
}
