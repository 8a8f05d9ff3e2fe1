//! Provides the target type and the decoder for the line-oriented target feed.

use serde_derive::Deserialize;

/// One endpoint to probe, decoded from a single feed line.
///
/// The upstream feed emits one JSON object per line:
///
/// ```text
/// {"ip": "93.184.216.34", "port": 80}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Target {
    /// Remote address. Usually an IP address literal, but hostnames are
    /// accepted and resolved at probe time.
    #[serde(rename = "ip")]
    pub address: String,
    /// Remote TCP port.
    pub port: u16,
}

/// Decodes one feed line into a [`Target`].
///
/// A line that is not a well-formed JSON object, or whose `ip`/`port` fields
/// are missing or mistyped, is a decode error. The caller drops the line and
/// keeps the pipeline running; a bad line never aborts the run.
pub fn decode_target(line: &str) -> Result<Target, serde_json::Error> {
    serde_json::from_str(line)
}
