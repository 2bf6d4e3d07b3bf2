//! The read-only tool surface exposed to the assistant layer.
//!
//! The assistant invokes a small fixed set of operations; they are modeled
//! as a closed variant type with validated parameter records and exhaustive
//! dispatch, not name-based lookup.

use crate::store::{Store, StoreError};
use crate::types::{Bssid, Position, Trajectory};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("invalid tool parameters: {0}")]
    InvalidParams(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Parameters for the area+time trajectory lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AreaQuery {
    pub lat: f64,
    pub lon: f64,
    /// Radius of the search area in meters.
    pub radius_m: f64,
    pub start: DateTime<Utc>,
    /// Exclusive end of the time window.
    pub end: DateTime<Utc>,
}

impl AreaQuery {
    pub fn validate(&self) -> Result<(), ToolError> {
        if !(-90.0..=90.0).contains(&self.lat) {
            return Err(ToolError::InvalidParams(format!(
                "latitude {} outside [-90, 90]",
                self.lat
            )));
        }
        if !(-180.0..=180.0).contains(&self.lon) {
            return Err(ToolError::InvalidParams(format!(
                "longitude {} outside [-180, 180]",
                self.lon
            )));
        }
        if !self.radius_m.is_finite() || self.radius_m <= 0.0 {
            return Err(ToolError::InvalidParams(format!(
                "radius {} must be a positive number of meters",
                self.radius_m
            )));
        }
        if self.start >= self.end {
            return Err(ToolError::InvalidParams(format!(
                "window start {} is not before end {}",
                self.start, self.end
            )));
        }
        Ok(())
    }
}

/// Parameters for the latest-position lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatestQuery {
    pub bssids: Vec<Bssid>,
}

impl LatestQuery {
    pub fn validate(&self) -> Result<(), ToolError> {
        if self.bssids.is_empty() {
            return Err(ToolError::InvalidParams(
                "at least one identifier is required".to_string(),
            ));
        }
        Ok(())
    }
}

/// The complete set of operations the assistant layer may invoke.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "tool", rename_all = "snake_case")]
pub enum ToolCall {
    TrajectoriesInArea(AreaQuery),
    LatestPositions(LatestQuery),
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ToolOutput {
    Trajectories(Vec<Trajectory>),
    LatestPositions(HashMap<Bssid, Position>),
}

/// Validate and execute one tool call.
pub async fn dispatch(store: &Store, call: &ToolCall) -> Result<ToolOutput, ToolError> {
    match call {
        ToolCall::TrajectoriesInArea(query) => {
            query.validate()?;
            let trajectories = store
                .trajectories_in_area(
                    Position::new(query.lat, query.lon),
                    query.radius_m,
                    query.start,
                    query.end,
                )
                .await?;
            Ok(ToolOutput::Trajectories(trajectories))
        }
        ToolCall::LatestPositions(query) => {
            query.validate()?;
            let latest = store.latest_positions(&query.bssids).await?;
            Ok(ToolOutput::LatestPositions(latest))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn window() -> (DateTime<Utc>, DateTime<Utc>) {
        (
            Utc.with_ymd_and_hms(2025, 9, 13, 14, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 9, 13, 15, 0, 0).unwrap(),
        )
    }

    #[test]
    fn test_area_query_accepts_valid() {
        let (start, end) = window();
        let query = AreaQuery {
            lat: 43.4715,
            lon: -80.5287,
            radius_m: 500.0,
            start,
            end,
        };
        assert!(query.validate().is_ok());
    }

    #[test]
    fn test_area_query_rejects_bad_params() {
        let (start, end) = window();
        let base = AreaQuery {
            lat: 43.4715,
            lon: -80.5287,
            radius_m: 500.0,
            start,
            end,
        };

        let mut q = base.clone();
        q.lat = 91.0;
        assert!(matches!(q.validate(), Err(ToolError::InvalidParams(_))));

        let mut q = base.clone();
        q.radius_m = 0.0;
        assert!(matches!(q.validate(), Err(ToolError::InvalidParams(_))));

        let mut q = base.clone();
        q.radius_m = f64::NAN;
        assert!(matches!(q.validate(), Err(ToolError::InvalidParams(_))));

        let mut q = base;
        q.end = q.start;
        assert!(matches!(q.validate(), Err(ToolError::InvalidParams(_))));
    }

    #[test]
    fn test_latest_query_requires_identifiers() {
        let query = LatestQuery { bssids: vec![] };
        assert!(matches!(query.validate(), Err(ToolError::InvalidParams(_))));
    }

    #[test]
    fn test_tool_call_wire_format() {
        let json = r#"{
            "tool": "latest_positions",
            "bssids": ["a0:1c:8d:f5:27:81"]
        }"#;
        let call: ToolCall = serde_json::from_str(json).unwrap();
        match call {
            ToolCall::LatestPositions(query) => {
                assert_eq!(query.bssids.len(), 1);
                assert_eq!(query.bssids[0].to_string(), "a0:1c:8d:f5:27:81");
            }
            other => panic!("unexpected call: {other:?}"),
        }
    }
}
