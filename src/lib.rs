//! Access point geolocation crawler and trajectory store.
//!
//! This library provides functionality to:
//! - Resolve access point identifiers to positions via an undocumented
//!   vendor geolocation service
//! - Walk the identifier space breadth-first through a persistent frontier
//!   queue seeded by neighbor discovery
//! - Store timestamped location observations in PostgreSQL/PostGIS
//! - Answer spatial-temporal trajectory queries and classify movement
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐    ┌─────────────┐    ┌─────────────┐
//! │   Client    │───▶│  Protocol   │    │    Store    │
//! │ (HTTP POST) │    │ (wire codec)│    │ (PostGIS)   │
//! └─────────────┘    └─────────────┘    └─────────────┘
//!        │                                  ▲      ▲
//!        │          ┌─────────────┐    ┌────┴───┐ ┌┴─────────┐
//!        └─────────▶│   Crawler   │───▶│ Ingest │ │ Frontier │
//!                   │(worker loop)│    └────────┘ └──────────┘
//!                   └─────────────┘
//!                          │ empty store?
//!                   ┌─────────────┐    ┌─────────────┐
//!                   │  Bootstrap  │◀───│ Local scan  │
//!                   └─────────────┘    └─────────────┘
//! ```
//!
//! The crawl loop pops one identifier from the frontier, asks the service
//! for its neighborhood, persists every located neighbor, and enqueues the
//! newly seen identifiers — repeating until the frontier drains. Stored
//! trajectories are queried independently and optionally passed through the
//! movement classifier.

pub mod bootstrap;
pub mod classify;
pub mod client;
pub mod crawler;
pub mod frontier;
pub mod ingest;
pub mod protocol;
pub mod scan;
pub mod store;
pub mod tools;
pub mod types;

pub use classify::{is_static, STATIC_THRESHOLD_METERS};
pub use client::{LocatorClient, LocatorConfig, BATCH_SIZE};
pub use crawler::{Crawler, CrawlerConfig, CrawlerStats};
pub use frontier::FrontierQueue;
pub use ingest::Ingestor;
pub use store::Store;
pub use types::{Bssid, Device, Position, TrackPoint, Trajectory};
