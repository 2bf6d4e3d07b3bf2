//! Binary wire format of the vendor geolocation service.
//!
//! A request is a fixed header followed by a one-byte length-prefixed
//! protobuf payload:
//!
//! ```text
//! ┌──────┬───────────┬──────────────┬───────────────┬──────────┬─────┬─────────┐
//! │ 0001 │ len locale│ len client-id│ len client-ver│ trailer  │ len │ payload │
//! │ (u16)│ (u16 + s) │ (u16 + s)    │ (u16 + s)     │ (7 bytes)│ (u8)│ (proto) │
//! └──────┴───────────┴──────────────┴───────────────┴──────────┴─────┴─────────┘
//! ```
//!
//! Responses carry a 10-byte preamble, then the same protobuf schema.
//! Coordinates travel as fixed-point integers scaled by 1e-8; a latitude of
//! [`NO_FIX_SENTINEL`] marks a device the service knows about but will not
//! place.

use crate::types::{Bssid, Position};
use prost::Message;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("request payload is {len} bytes, exceeding the one-byte length ceiling")]
    PayloadTooLarge { len: usize },
    #[error("undecodable response body: {0}")]
    Malformed(#[from] prost::DecodeError),
}

/// Protocol version word at the start of every request.
const PROTOCOL_VERSION: u16 = 1;
const LOCALE: &str = "en_US";
const CLIENT_ID: &str = "com.apple.locationd";
const CLIENT_VERSION: &str = "8.1.12B411";
/// Reserved bytes between the identity strings and the payload length.
const RESERVED_TRAILER: [u8; 7] = [0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00];
/// Bytes to skip before the response body.
const RESPONSE_PREAMBLE_LEN: usize = 10;

/// Fixed-point scale of wire coordinates.
pub const COORDINATE_SCALE: f64 = 1e-8;
/// Wire latitude meaning "no fix for this device" (-180° at 1e-8 scale).
pub const NO_FIX_SENTINEL: i64 = -18_000_000_000;

/// Request/response body. The service speaks the same schema both ways.
#[derive(Clone, PartialEq, Message)]
pub struct WlocMessage {
    /// Meaning unknown; the service expects it present and zero.
    #[prost(int64, optional, tag = "1")]
    pub unknown_value: Option<i64>,
    #[prost(message, repeated, tag = "2")]
    pub wifi_devices: Vec<WifiDevice>,
    /// 1 to resolve exactly the submitted devices, 0 to let the service
    /// answer with the whole neighborhood.
    #[prost(int32, optional, tag = "4")]
    pub return_single_result: Option<i32>,
}

#[derive(Clone, PartialEq, Message)]
pub struct WifiDevice {
    #[prost(string, tag = "1")]
    pub bssid: String,
    #[prost(message, optional, tag = "2")]
    pub location: Option<WifiLocation>,
}

#[derive(Clone, PartialEq, Message)]
pub struct WifiLocation {
    #[prost(int64, optional, tag = "1")]
    pub latitude: Option<i64>,
    #[prost(int64, optional, tag = "2")]
    pub longitude: Option<i64>,
}

/// Build the framed request for a set of identifiers.
///
/// `single_result` selects resolve-exactly-these mode; neighbor discovery
/// submits one identifier with it unset.
pub fn encode_request(bssids: &[Bssid], single_result: bool) -> Result<Vec<u8>, ProtocolError> {
    let body = WlocMessage {
        unknown_value: Some(0),
        wifi_devices: bssids
            .iter()
            .map(|b| WifiDevice {
                bssid: b.to_string(),
                location: None,
            })
            .collect(),
        return_single_result: Some(if single_result { 1 } else { 0 }),
    };

    let payload = body.encode_to_vec();
    let payload_len =
        u8::try_from(payload.len()).map_err(|_| ProtocolError::PayloadTooLarge {
            len: payload.len(),
        })?;

    let mut out = Vec::with_capacity(64 + payload.len());
    out.extend_from_slice(&PROTOCOL_VERSION.to_be_bytes());
    for field in [LOCALE, CLIENT_ID, CLIENT_VERSION] {
        out.extend_from_slice(&(field.len() as u16).to_be_bytes());
        out.extend_from_slice(field.as_bytes());
    }
    out.extend_from_slice(&RESERVED_TRAILER);
    out.push(payload_len);
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Decode a response into located devices.
///
/// Devices without a location, or with the no-fix sentinel latitude, are
/// omitted. A body short enough to hold no message decodes to no results.
pub fn decode_response(data: &[u8]) -> Result<HashMap<Bssid, Position>, ProtocolError> {
    if data.len() <= RESPONSE_PREAMBLE_LEN {
        return Ok(HashMap::new());
    }

    let msg = WlocMessage::decode(&data[RESPONSE_PREAMBLE_LEN..])?;

    let mut results = HashMap::new();
    for device in &msg.wifi_devices {
        let Some(location) = &device.location else {
            continue;
        };
        let (Some(lat), Some(lon)) = (location.latitude, location.longitude) else {
            continue;
        };
        if lat == NO_FIX_SENTINEL {
            continue;
        }
        let Ok(bssid) = device.bssid.parse::<Bssid>() else {
            tracing::debug!("skipping unparseable identifier in response: {:?}", device.bssid);
            continue;
        };
        results.insert(
            bssid,
            Position::new(lat as f64 * COORDINATE_SCALE, lon as f64 * COORDINATE_SCALE),
        );
    }
    Ok(results)
}
