//! Installed assets as reported by the service's listing endpoint

use chrono::{DateTime, FixedOffset};
use serde::Deserialize;
use tracing::debug;

use crate::core::OrchestratorResult;

/// Tag the service assumes when a name carries none
const DEFAULT_TAG: &str = "latest";

/// One installed asset (model)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    pub name: String,
    /// Size on disk in bytes
    pub size: u64,
    /// Modification time exactly as the service reported it
    pub modified_at: String,
}

impl Asset {
    /// Parsed modification time, if the service sent RFC 3339
    pub fn modified(&self) -> Option<DateTime<FixedOffset>> {
        DateTime::parse_from_rfc3339(&self.modified_at).ok()
    }

    /// Size formatted for display, e.g. "4.7 GB"
    pub fn size_label(&self) -> String {
        const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
        let mut size = self.size as f64;
        let mut unit = 0;
        while size >= 1000.0 && unit < UNITS.len() - 1 {
            size /= 1000.0;
            unit += 1;
        }
        if unit == 0 {
            format!("{} B", self.size)
        } else {
            format!("{:.1} {}", size, UNITS[unit])
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawAsset {
    name: String,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    modified_at: String,
}

/// Decode a `{"models": [...]}` listing
///
/// The envelope must be JSON; entries that fail to decode are skipped so
/// one odd asset never hides the rest.
pub fn parse_tags(body: &[u8]) -> OrchestratorResult<Vec<Asset>> {
    let value: serde_json::Value = serde_json::from_slice(body)?;

    let entries = match value.get("models").and_then(|m| m.as_array()) {
        Some(entries) => entries,
        None => return Ok(Vec::new()),
    };

    let assets = entries
        .iter()
        .filter_map(|entry| match RawAsset::deserialize(entry) {
            Ok(raw) => Some(Asset {
                name: raw.name,
                size: raw.size,
                modified_at: raw.modified_at,
            }),
            Err(e) => {
                debug!(error = %e, "skipping undecodable asset entry");
                None
            }
        })
        .collect();

    Ok(assets)
}

/// Whether an installed name refers to the requested one
///
/// "llama3" and "llama3:latest" are the same asset.
pub fn asset_matches(installed: &str, requested: &str) -> bool {
    with_tag(installed) == with_tag(requested)
}

fn with_tag(name: &str) -> String {
    let name = name.trim();
    // A registry host may carry a port, so only look past the last '/'
    let base = name.rsplit('/').next().unwrap_or(name);
    if base.contains(':') {
        name.to_string()
    } else {
        format!("{}:{}", name, DEFAULT_TAG)
    }
}
