//! Store-backed properties, exercised against a disposable PostGIS
//! instance. Requires Docker; run with `--features integration-tests`.

use aptrace::frontier::FrontierQueue;
use aptrace::ingest::{Ingestor, UNKNOWN_ORDINATE};
use aptrace::store::Store;
use aptrace::tools::{self, AreaQuery, LatestQuery, ToolCall, ToolError, ToolOutput};
use aptrace::types::{Bssid, Position};
use chrono::{DateTime, TimeZone, Utc};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use testcontainers::core::{IntoContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage, ImageExt};

async fn start_store() -> (ContainerAsync<GenericImage>, Store) {
    let container = GenericImage::new("postgis/postgis", "16-3.4-alpine")
        .with_wait_for(WaitFor::message_on_stderr(
            "database system is ready to accept connections",
        ))
        .with_exposed_port(5432.tcp())
        .with_env_var("POSTGRES_PASSWORD", "postgres")
        .start()
        .await
        .unwrap();

    let host = container.get_host().await.unwrap();
    let port = container.get_host_port_ipv4(5432.tcp()).await.unwrap();
    let url = format!("postgres://postgres:postgres@{host}:{port}/postgres");

    // The image restarts the server once while initializing, so the first
    // few connection attempts may land in the gap.
    let mut store = None;
    for _ in 0..30 {
        match Store::connect(&url, 8).await {
            Ok(s) => {
                store = Some(s);
                break;
            }
            Err(_) => tokio::time::sleep(Duration::from_millis(500)).await,
        }
    }
    let store = store.expect("database did not become ready");
    store.init_schema().await.unwrap();
    (container, store)
}

fn bssid(last: u8) -> Bssid {
    Bssid::new([0xa0, 0x1c, 0x8d, 0x00, 0x00, last])
}

fn at(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 9, 13, 14, minute, 0).unwrap()
}

fn one(bssid: Bssid, lat: f64, lon: f64) -> HashMap<Bssid, Position> {
    HashMap::from([(bssid, Position::new(lat, lon))])
}

#[tokio::test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
async fn test_enqueue_is_idempotent_and_fifo() {
    let (_container, store) = start_store().await;
    let frontier = FrontierQueue::new(store);

    frontier.enqueue([bssid(1), bssid(2)]).await.unwrap();
    frontier.enqueue([bssid(1)]).await.unwrap();
    frontier.enqueue([bssid(2), bssid(3)]).await.unwrap();
    assert_eq!(frontier.len().await.unwrap(), 3);

    assert_eq!(frontier.dequeue_one().await.unwrap(), Some(bssid(1)));
    assert_eq!(frontier.dequeue_one().await.unwrap(), Some(bssid(2)));
    assert_eq!(frontier.dequeue_one().await.unwrap(), Some(bssid(3)));
    assert_eq!(frontier.dequeue_one().await.unwrap(), None);
}

#[tokio::test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
async fn test_dequeue_is_exclusive_across_workers() {
    let (_container, store) = start_store().await;
    let frontier = FrontierQueue::new(store);

    let entries: Vec<Bssid> = (0..20).map(bssid).collect();
    frontier.enqueue(entries.clone()).await.unwrap();

    let mut workers = Vec::new();
    for _ in 0..4 {
        let frontier = frontier.clone();
        workers.push(tokio::spawn(async move {
            let mut taken = Vec::new();
            while let Some(entry) = frontier.dequeue_one().await.unwrap() {
                taken.push(entry);
            }
            taken
        }));
    }

    let mut all = Vec::new();
    for worker in workers {
        all.extend(worker.await.unwrap());
    }

    assert_eq!(all.len(), entries.len(), "no entry lost");
    let distinct: HashSet<Bssid> = all.iter().copied().collect();
    assert_eq!(distinct.len(), entries.len(), "no entry duplicated");
    assert_eq!(distinct, entries.iter().copied().collect());
}

#[tokio::test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
async fn test_sentinel_positions_are_never_ingested() {
    let (_container, store) = start_store().await;
    let frontier = FrontierQueue::new(store.clone());
    let ingestor = Ingestor::new(store.clone(), frontier);

    let mut batch = one(bssid(1), 43.4715, -80.5287);
    batch.insert(bssid(2), Position::new(UNKNOWN_ORDINATE, UNKNOWN_ORDINATE));

    let written = ingestor.ingest(&batch, at(0)).await.unwrap();
    assert_eq!(written, 1);

    // The sentinel identifier produced neither an observation nor a device.
    assert_eq!(store.device_count().await.unwrap(), 1);
    assert!(store.trajectory(bssid(2)).await.unwrap().is_empty());
    assert_eq!(store.trajectory(bssid(1)).await.unwrap().len(), 1);

    // A batch of only sentinel positions writes nothing at all.
    let written = ingestor
        .ingest(
            &one(bssid(3), UNKNOWN_ORDINATE, UNKNOWN_ORDINATE),
            at(1),
        )
        .await
        .unwrap();
    assert_eq!(written, 0);
    assert_eq!(store.device_count().await.unwrap(), 1);
}

#[tokio::test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
async fn test_reingesting_advances_last_seen_without_duplicates() {
    let (_container, store) = start_store().await;
    let frontier = FrontierQueue::new(store.clone());
    let ingestor = Ingestor::new(store.clone(), frontier);

    ingestor
        .ingest(&one(bssid(1), 43.4715, -80.5287), at(0))
        .await
        .unwrap();
    ingestor
        .ingest(&one(bssid(1), 43.4716, -80.5288), at(5))
        .await
        .unwrap();

    let (total, devices) = store.list_devices(10, 0).await.unwrap();
    assert_eq!(total, 1);
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].bssid, bssid(1));
    assert_eq!(devices[0].first_seen_at, at(0));
    assert_eq!(devices[0].last_seen_at, at(5));

    let points = store.trajectory(bssid(1)).await.unwrap();
    assert_eq!(points.len(), 2);
    assert!(points[0].recorded_at < points[1].recorded_at);
}

#[tokio::test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
async fn test_area_query_selects_devices_but_returns_full_trajectories() {
    let (_container, store) = start_store().await;
    let frontier = FrontierQueue::new(store.clone());
    let ingestor = Ingestor::new(store.clone(), frontier);

    // Device 1: one ping before the window, two inside it, all near campus.
    ingestor
        .ingest(&one(bssid(1), 43.4715, -80.5287), at(0))
        .await
        .unwrap();
    ingestor
        .ingest(&one(bssid(1), 43.4716, -80.5288), at(20))
        .await
        .unwrap();
    ingestor
        .ingest(&one(bssid(1), 43.4717, -80.5289), at(30))
        .await
        .unwrap();

    // Device 2: inside the window but kilometers away.
    ingestor
        .ingest(&one(bssid(2), 43.6532, -79.3832), at(20))
        .await
        .unwrap();

    // Device 3: in the area but only at the exclusive end of the window.
    ingestor
        .ingest(&one(bssid(3), 43.4715, -80.5287), at(40))
        .await
        .unwrap();

    let trajectories = store
        .trajectories_in_area(Position::new(43.4715, -80.5287), 500.0, at(10), at(40))
        .await
        .unwrap();

    assert_eq!(trajectories.len(), 1);
    assert_eq!(trajectories[0].bssid, bssid(1));
    // The window selected the device; the trajectory still carries the
    // out-of-window point.
    assert_eq!(trajectories[0].points.len(), 3);
    assert_eq!(trajectories[0].points[0].recorded_at, at(0));
}

#[tokio::test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
async fn test_window_start_is_inclusive() {
    let (_container, store) = start_store().await;
    let frontier = FrontierQueue::new(store.clone());
    let ingestor = Ingestor::new(store.clone(), frontier);

    ingestor
        .ingest(&one(bssid(1), 43.4715, -80.5287), at(10))
        .await
        .unwrap();

    let trajectories = store
        .trajectories_in_area(Position::new(43.4715, -80.5287), 500.0, at(10), at(40))
        .await
        .unwrap();
    assert_eq!(trajectories.len(), 1);
}

#[tokio::test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
async fn test_latest_position_per_identifier() {
    let (_container, store) = start_store().await;
    let frontier = FrontierQueue::new(store.clone());
    let ingestor = Ingestor::new(store.clone(), frontier);

    ingestor
        .ingest(&one(bssid(1), 43.4715, -80.5287), at(0))
        .await
        .unwrap();
    ingestor
        .ingest(&one(bssid(1), 43.4800, -80.5400), at(10))
        .await
        .unwrap();
    ingestor
        .ingest(&one(bssid(2), 43.6532, -79.3832), at(5))
        .await
        .unwrap();

    let latest = store
        .latest_positions(&[bssid(1), bssid(2), bssid(9)])
        .await
        .unwrap();

    assert_eq!(latest.len(), 2);
    assert!((latest[&bssid(1)].latitude - 43.48).abs() < 1e-9);
    assert!((latest[&bssid(2)].longitude - -79.3832).abs() < 1e-9);
    assert!(!latest.contains_key(&bssid(9)));
}

#[tokio::test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
async fn test_purge_cascades_to_observations() {
    let (_container, store) = start_store().await;
    let frontier = FrontierQueue::new(store.clone());
    let ingestor = Ingestor::new(store.clone(), frontier);

    ingestor
        .ingest(&one(bssid(1), 43.4715, -80.5287), at(0))
        .await
        .unwrap();

    assert!(store.purge_device(bssid(1)).await.unwrap());
    assert_eq!(store.device_count().await.unwrap(), 0);
    assert!(store.trajectory(bssid(1)).await.unwrap().is_empty());
    assert!(!store.purge_device(bssid(1)).await.unwrap());
}

#[tokio::test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
async fn test_tool_dispatch() {
    let (_container, store) = start_store().await;
    let frontier = FrontierQueue::new(store.clone());
    let ingestor = Ingestor::new(store.clone(), frontier);

    ingestor
        .ingest(&one(bssid(1), 43.4715, -80.5287), at(20))
        .await
        .unwrap();

    let call = ToolCall::TrajectoriesInArea(AreaQuery {
        lat: 43.4715,
        lon: -80.5287,
        radius_m: 500.0,
        start: at(10),
        end: at(40),
    });
    match tools::dispatch(&store, &call).await.unwrap() {
        ToolOutput::Trajectories(trajectories) => {
            assert_eq!(trajectories.len(), 1);
            assert_eq!(trajectories[0].bssid, bssid(1));
        }
        other => panic!("unexpected output: {other:?}"),
    }

    let call = ToolCall::LatestPositions(LatestQuery {
        bssids: vec![bssid(1)],
    });
    match tools::dispatch(&store, &call).await.unwrap() {
        ToolOutput::LatestPositions(latest) => assert_eq!(latest.len(), 1),
        other => panic!("unexpected output: {other:?}"),
    }

    let call = ToolCall::TrajectoriesInArea(AreaQuery {
        lat: 43.4715,
        lon: -80.5287,
        radius_m: -1.0,
        start: at(10),
        end: at(40),
    });
    assert!(matches!(
        tools::dispatch(&store, &call).await,
        Err(ToolError::InvalidParams(_))
    ));
}
