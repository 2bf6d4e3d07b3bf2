//! Local wireless scan collaborator, used only to seed an empty store.

use crate::types::Bssid;
use regex::Regex;
use std::path::PathBuf;
use std::process::Command;
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("scan command could not be run: {0}")]
    Io(#[from] std::io::Error),
    #[error("scan command failed: {stderr}")]
    CommandFailed { stderr: String },
    #[error("no wireless networks visible")]
    NoNetworks,
}

/// One locally visible network.
#[derive(Debug, Clone)]
pub struct ScannedNetwork {
    pub ssid: String,
    pub bssid: Bssid,
}

/// Source of locally visible networks.
pub trait NetworkScanner: Send + Sync {
    fn scan(&self) -> Result<Vec<ScannedNetwork>, ScanError>;
}

/// The non-standard path of the macOS scan utility.
const AIRPORT_PATH: &str =
    "/System/Library/PrivateFrameworks/Apple80211.framework/Versions/Current/Resources/airport";

/// Scanner backed by the macOS `airport -s` utility.
pub struct AirportScanner {
    path: PathBuf,
}

impl AirportScanner {
    pub fn new() -> Self {
        Self {
            path: PathBuf::from(AIRPORT_PATH),
        }
    }

    pub fn with_path(path: PathBuf) -> Self {
        Self { path }
    }
}

impl Default for AirportScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkScanner for AirportScanner {
    fn scan(&self) -> Result<Vec<ScannedNetwork>, ScanError> {
        let output = Command::new(&self.path).arg("-s").output()?;
        if !output.status.success() {
            return Err(ScanError::CommandFailed {
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        let networks = parse_scan_output(&String::from_utf8_lossy(&output.stdout));
        if networks.is_empty() {
            return Err(ScanError::NoNetworks);
        }
        Ok(networks)
    }
}

fn bssid_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    // Matching the address is more reliable than splitting on whitespace,
    // since network names can contain spaces.
    PATTERN.get_or_init(|| {
        Regex::new(r"([0-9a-fA-F]{1,2}:){5}[0-9a-fA-F]{1,2}").expect("static pattern")
    })
}

/// Extract (name, identifier) pairs from scan-utility output. The first
/// line is a column header; on each following line the name is everything
/// before the address.
fn parse_scan_output(output: &str) -> Vec<ScannedNetwork> {
    let mut networks = Vec::new();
    for line in output.trim().lines().skip(1) {
        let Some(found) = bssid_pattern().find(line) else {
            continue;
        };
        let Ok(bssid) = found.as_str().parse::<Bssid>() else {
            continue;
        };
        networks.push(ScannedNetwork {
            ssid: line[..found.start()].trim().to_string(),
            bssid,
        });
    }
    networks
}
