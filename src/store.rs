//! PostgreSQL/PostGIS store for devices and location observations.
//!
//! One [`Store`] handle wraps a connection pool and is cloned into every
//! component. Operations run through [`Store::with_retry`], which answers a
//! connection-class failure with exactly one reconnect-and-retry and
//! surfaces every other error unchanged.

use crate::types::{Bssid, BssidParseError, Device, Position, TrackPoint, Trajectory};
use chrono::{DateTime, Utc};
use deadpool_postgres::{
    Config, CreatePoolError, ManagerConfig, Object, Pool, PoolConfig, PoolError,
    RecyclingMethod, Runtime,
};
use std::collections::HashMap;
use std::future::Future;
use thiserror::Error;
use tokio_postgres::NoTls;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("could not create connection pool: {0}")]
    Create(#[from] CreatePoolError),
    #[error("connection pool error: {0}")]
    Pool(#[from] PoolError),
    #[error("database error: {0}")]
    Postgres(#[from] tokio_postgres::Error),
    #[error("stored row holds an invalid identifier: {0}")]
    BadRow(#[from] BssidParseError),
}

const SCHEMA: &str = "
CREATE EXTENSION IF NOT EXISTS postgis;

CREATE TABLE IF NOT EXISTS devices (
    bssid VARCHAR(17) PRIMARY KEY,
    first_seen_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    last_seen_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS location_pings (
    id BIGSERIAL PRIMARY KEY,
    bssid VARCHAR(17) NOT NULL REFERENCES devices(bssid) ON DELETE CASCADE,
    recorded_at TIMESTAMPTZ NOT NULL,
    latitude DOUBLE PRECISION NOT NULL,
    longitude DOUBLE PRECISION NOT NULL,
    location GEOGRAPHY(Point, 4326) NOT NULL
);

CREATE TABLE IF NOT EXISTS exploration_queue (
    position BIGSERIAL,
    bssid VARCHAR(17) PRIMARY KEY
);

CREATE INDEX IF NOT EXISTS idx_location_pings_bssid_recorded_at
    ON location_pings (bssid, recorded_at);
CREATE INDEX IF NOT EXISTS idx_location_pings_location
    ON location_pings USING GIST (location);
";

/// Pooled store handle with explicit open/close-free lifecycle: construct
/// with [`Store::connect`], clone freely, drop when done.
#[derive(Clone)]
pub struct Store {
    pool: Pool,
}

impl Store {
    /// Build the pool and verify connectivity.
    pub async fn connect(database_url: &str, max_pool_size: usize) -> Result<Self, StoreError> {
        let mut cfg = Config::new();
        cfg.url = Some(database_url.to_string());
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        cfg.pool = Some(PoolConfig::new(max_pool_size));

        let pool = cfg.create_pool(Some(Runtime::Tokio1), NoTls)?;
        let store = Self { pool };
        store.ping().await?;
        Ok(store)
    }

    /// Pings the database to verify connectivity.
    pub async fn ping(&self) -> Result<(), StoreError> {
        let client = self.pool.get().await?;
        client.execute("SELECT 1", &[]).await?;
        tracing::debug!("database connection verified");
        Ok(())
    }

    /// Ensure extension, tables and indexes exist.
    pub async fn init_schema(&self) -> Result<(), StoreError> {
        let client = self.pool.get().await?;
        client.batch_execute(SCHEMA).await?;
        tracing::info!("database schema check complete");
        Ok(())
    }

    /// Run `op` with a pooled connection; on a connection-class failure,
    /// fetch a fresh connection and retry exactly once.
    pub(crate) async fn with_retry<T, F, Fut>(&self, op: F) -> Result<T, StoreError>
    where
        F: Fn(Object) -> Fut,
        Fut: Future<Output = Result<T, tokio_postgres::Error>>,
    {
        let client = self.pool.get().await?;
        match op(client).await {
            Ok(value) => Ok(value),
            Err(err) if is_connection_error(&err) => {
                tracing::warn!("connection error: {}; reconnecting and retrying once", err);
                let client = self.pool.get().await?;
                Ok(op(client).await?)
            }
            Err(err) => Err(err.into()),
        }
    }

    pub async fn device_count(&self) -> Result<i64, StoreError> {
        self.with_retry(|client| async move {
            let row = client.query_one("SELECT COUNT(*) FROM devices", &[]).await?;
            Ok(row.get(0))
        })
        .await
    }

    /// Paginated device listing, most recently seen first, with the total
    /// count for pagination metadata.
    pub async fn list_devices(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<(i64, Vec<Device>), StoreError> {
        let (total, rows) = self
            .with_retry(|client| async move {
                let total = client
                    .query_one("SELECT COUNT(*) FROM devices", &[])
                    .await?
                    .get(0);
                let rows = client
                    .query(
                        "SELECT bssid, first_seen_at, last_seen_at
                         FROM devices
                         ORDER BY last_seen_at DESC
                         LIMIT $1 OFFSET $2",
                        &[&limit, &offset],
                    )
                    .await?;
                Ok((total, rows))
            })
            .await?;

        let mut devices = Vec::with_capacity(rows.len());
        for row in rows {
            devices.push(Device {
                bssid: row.get::<_, String>(0).parse()?,
                first_seen_at: row.get(1),
                last_seen_at: row.get(2),
            });
        }
        Ok((total, devices))
    }

    /// All observations of one device, time ascending.
    pub async fn trajectory(&self, bssid: Bssid) -> Result<Vec<TrackPoint>, StoreError> {
        let key = bssid.to_string();
        let rows = self
            .with_retry(|client| {
                let key = key.clone();
                async move {
                    client
                        .query(
                            "SELECT latitude, longitude, recorded_at
                             FROM location_pings
                             WHERE bssid = $1
                             ORDER BY recorded_at ASC",
                            &[&key],
                        )
                        .await
                }
            })
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| TrackPoint {
                latitude: row.get(0),
                longitude: row.get(1),
                recorded_at: row.get(2),
            })
            .collect())
    }

    /// Devices with at least one observation within `radius_m` meters of the
    /// center and inside the half-open `[start, end)` window, each returned
    /// with its full observation sequence — points outside the window
    /// included.
    pub async fn trajectories_in_area(
        &self,
        center: Position,
        radius_m: f64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Trajectory>, StoreError> {
        let rows = self
            .with_retry(|client| async move {
                client
                    .query(
                        "WITH hits AS (
                             SELECT DISTINCT bssid
                             FROM location_pings
                             WHERE ST_DWithin(
                                       location,
                                       ST_SetSRID(ST_MakePoint($1, $2), 4326)::geography,
                                       $3)
                               AND recorded_at >= $4
                               AND recorded_at < $5
                         )
                         SELECT lp.bssid, lp.latitude, lp.longitude, lp.recorded_at
                         FROM location_pings lp
                         JOIN hits USING (bssid)
                         ORDER BY lp.bssid, lp.recorded_at ASC",
                        &[&center.longitude, &center.latitude, &radius_m, &start, &end],
                    )
                    .await
            })
            .await?;

        let mut trajectories: Vec<Trajectory> = Vec::new();
        for row in rows {
            let bssid: Bssid = row.get::<_, String>(0).parse()?;
            let point = TrackPoint {
                latitude: row.get(1),
                longitude: row.get(2),
                recorded_at: row.get(3),
            };
            match trajectories.last_mut() {
                Some(current) if current.bssid == bssid => current.points.push(point),
                _ => trajectories.push(Trajectory {
                    bssid,
                    points: vec![point],
                }),
            }
        }
        Ok(trajectories)
    }

    /// The single most recent observation per requested identifier.
    /// Identifiers never observed are absent from the result.
    pub async fn latest_positions(
        &self,
        bssids: &[Bssid],
    ) -> Result<HashMap<Bssid, Position>, StoreError> {
        if bssids.is_empty() {
            return Ok(HashMap::new());
        }
        let keys: Vec<String> = bssids.iter().map(Bssid::to_string).collect();

        let rows = self
            .with_retry(|client| {
                let keys = keys.clone();
                async move {
                    client
                        .query(
                            "SELECT DISTINCT ON (bssid) bssid, latitude, longitude
                             FROM location_pings
                             WHERE bssid = ANY($1)
                             ORDER BY bssid, recorded_at DESC",
                            &[&keys],
                        )
                        .await
                }
            })
            .await?;

        let mut latest = HashMap::with_capacity(rows.len());
        for row in rows {
            let bssid: Bssid = row.get::<_, String>(0).parse()?;
            latest.insert(bssid, Position::new(row.get(1), row.get(2)));
        }
        Ok(latest)
    }

    /// Upsert devices and append observations for one batch, atomically.
    ///
    /// A never-before-seen identifier gets `first_seen_at = at`; existing
    /// devices have `last_seen_at` advanced. Either every row of the batch
    /// becomes visible or none does.
    pub(crate) async fn write_observations(
        &self,
        observations: &[(Bssid, Position)],
        at: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        if observations.is_empty() {
            return Ok(0);
        }

        let rows: Vec<(String, f64, f64)> = observations
            .iter()
            .map(|(bssid, pos)| (bssid.to_string(), pos.latitude, pos.longitude))
            .collect();

        self.with_retry(|mut client| {
            let rows = rows.clone();
            async move {
                let tx = client.transaction().await?;

                let upsert = tx
                    .prepare(
                        "INSERT INTO devices (bssid, first_seen_at, last_seen_at)
                         VALUES ($1, $2, $2)
                         ON CONFLICT (bssid)
                         DO UPDATE SET last_seen_at = EXCLUDED.last_seen_at",
                    )
                    .await?;
                let insert = tx
                    .prepare(
                        "INSERT INTO location_pings
                             (bssid, recorded_at, latitude, longitude, location)
                         VALUES ($1, $2, $3, $4,
                                 ST_SetSRID(ST_MakePoint($4, $3), 4326)::geography)",
                    )
                    .await?;

                for (bssid, lat, lon) in &rows {
                    tx.execute(&upsert, &[bssid, &at]).await?;
                    tx.execute(&insert, &[bssid, &at, lat, lon]).await?;
                }

                tx.commit().await?;
                Ok(rows.len())
            }
        })
        .await
    }

    /// Remove a device and, by cascade, every observation it owns.
    /// Returns whether the device existed.
    pub async fn purge_device(&self, bssid: Bssid) -> Result<bool, StoreError> {
        let key = bssid.to_string();
        let deleted = self
            .with_retry(|client| {
                let key = key.clone();
                async move {
                    client
                        .execute("DELETE FROM devices WHERE bssid = $1", &[&key])
                        .await
                }
            })
            .await?;
        Ok(deleted > 0)
    }
}

/// Connection-level failures warrant the one reconnect-and-retry; anything
/// carrying a SQL-level meaning does not.
fn is_connection_error(err: &tokio_postgres::Error) -> bool {
    if err.is_closed() {
        return true;
    }
    // SQLSTATE class 08 is "connection exception".
    matches!(err.code(), Some(code) if code.code().starts_with("08"))
}
