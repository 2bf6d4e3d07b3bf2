//! Ingest pipeline: persist one batch of resolved positions and feed the
//! frontier with the identifiers it discovered.

use crate::frontier::FrontierQueue;
use crate::store::{Store, StoreError};
use crate::types::{Bssid, Position};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Degrees value the vendor uses for both ordinates of a position it does
/// not actually know. Such pairs never become observation rows.
pub const UNKNOWN_ORDINATE: f64 = -180.0;

/// Writes resolved batches into the store and re-seeds the frontier.
#[derive(Clone)]
pub struct Ingestor {
    store: Store,
    frontier: FrontierQueue,
}

impl Ingestor {
    pub fn new(store: Store, frontier: FrontierQueue) -> Self {
        Self { store, frontier }
    }

    /// Persist `observed` as of `at` and enqueue every written identifier.
    ///
    /// The batch is atomic: all device upserts and observation inserts
    /// commit together or not at all. Returns the number of observations
    /// written, which excludes unknown-sentinel positions.
    pub async fn ingest(
        &self,
        observed: &HashMap<Bssid, Position>,
        at: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let valid: Vec<(Bssid, Position)> = observed
            .iter()
            .filter(|(_, pos)| {
                !(pos.latitude == UNKNOWN_ORDINATE && pos.longitude == UNKNOWN_ORDINATE)
            })
            .map(|(bssid, pos)| (*bssid, *pos))
            .collect();

        if valid.is_empty() {
            return Ok(0);
        }

        let written = self.store.write_observations(&valid, at).await?;
        self.frontier
            .enqueue(valid.iter().map(|(bssid, _)| *bssid))
            .await?;

        tracing::debug!("ingested {} observations at {}", written, at);
        Ok(written)
    }
}
