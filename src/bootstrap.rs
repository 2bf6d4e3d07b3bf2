//! Seeding an empty store from locally visible networks.

use crate::client::{LocatorClient, LocatorError};
use crate::ingest::Ingestor;
use crate::scan::{NetworkScanner, ScanError};
use crate::store::StoreError;
use crate::types::Bssid;
use chrono::Utc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("local scan failed: {0}")]
    Scan(#[from] ScanError),
    #[error("store error while seeding: {0}")]
    Store(#[from] StoreError),
}

/// Result of a bootstrap attempt. `Exhausted` is distinct from failure so
/// the caller can apply a long cooldown instead of tight-looping.
#[derive(Debug)]
pub enum BootstrapOutcome {
    /// A local network resolved; its neighborhood is ingested and queued.
    Seeded { seed: Bssid, pings: usize },
    /// None of the locally visible networks are known to the service.
    Exhausted,
}

/// Try each locally visible network as a neighbor-discovery seed until one
/// resolves. The first success is ingested, which also fills the frontier.
pub async fn run(
    scanner: &dyn NetworkScanner,
    client: &LocatorClient,
    ingestor: &Ingestor,
) -> Result<BootstrapOutcome, BootstrapError> {
    tracing::info!("store is empty; bootstrapping from local wireless scan");

    let networks = scanner.scan()?;
    tracing::info!("found {} local networks to test as seeds", networks.len());

    for network in &networks {
        tracing::info!("testing seed {} ({:?})", network.bssid, network.ssid);
        let scrape_time = Utc::now();

        let locations = match client.find_nearby(network.bssid).await {
            Ok(locations) => locations,
            Err(err @ LocatorError::Denied { .. }) => {
                tracing::warn!("seed {} rejected: {}", network.bssid, err);
                continue;
            }
            Err(err) => {
                tracing::warn!("seed {} did not resolve: {}", network.bssid, err);
                continue;
            }
        };

        if locations.is_empty() {
            tracing::debug!("seed {} returned no positioned neighbors", network.bssid);
            continue;
        }

        let pings = ingestor.ingest(&locations, scrape_time).await?;
        tracing::info!(
            "seeded store from {} with {} pings across {} devices",
            network.bssid,
            pings,
            locations.len()
        );
        return Ok(BootstrapOutcome::Seeded {
            seed: network.bssid,
            pings,
        });
    }

    tracing::error!("bootstrap exhausted: no local network is known to the service");
    Ok(BootstrapOutcome::Exhausted)
}
