//! Single-consumer result stage: enrichment, serialization and aggregate
//! outcome counters.

mod http;

pub use http::{parse_http_metadata, HttpMetadata};

use std::fmt;
use std::io::Write;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use log::debug;
use serde_derive::Serialize;
use tokio::sync::mpsc;

use crate::geo::GeoLookup;
use crate::input::Format;
use crate::scanner::ProbeResult;

/// Protocol recorded when a response does not frame as anything recognized.
const UNKNOWN_PROTOCOL: &str = "unknown";

/// Aggregate outcome counters for one run.
///
/// `Display` renders the shutdown summary line emitted on the diagnostic
/// stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Summary {
    pub ok: u64,
    pub errors: u64,
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Complete (OK={}, errorsCount={})", self.ok, self.errors)
    }
}

/// One fully enriched record, serialized as a single JSON output line.
#[derive(Debug, Serialize)]
struct Record<'a> {
    address: &'a str,
    port: u16,
    protocol: String,
    probed_protocol: &'a str,
    country: String,
    city: String,
    data: String,
    metadata: Option<HttpMetadata>,
    error: &'a str,
}

/// Consumes the result queue strictly one record at a time, so the counters
/// need no locking, and writes one line per probe to the output stream.
///
/// Warnings and the shutdown summary go to stderr; a record that fails to
/// serialize or write is dropped without touching counters already counted
/// for it.
pub struct Reporter<W> {
    format: Format,
    geo: Box<dyn GeoLookup>,
    out: W,
    summary: Summary,
}

impl<W: Write> Reporter<W> {
    pub fn new(format: Format, geo: Box<dyn GeoLookup>, out: W) -> Self {
        Self {
            format,
            geo,
            out,
            summary: Summary::default(),
        }
    }

    /// Drains the result queue, then emits the summary line exactly once and
    /// returns the final counters.
    pub async fn run(mut self, mut results: mpsc::Receiver<ProbeResult>) -> Summary {
        while let Some(result) = results.recv().await {
            self.report(&result);
        }
        debug!("result queue drained");
        eprintln!("{}", self.summary);
        self.summary
    }

    /// Processes one result: count it, render it, write it.
    fn report(&mut self, result: &ProbeResult) {
        if result.error.is_empty() {
            self.summary.ok += 1;
        } else {
            self.summary.errors += 1;
        }

        let line = match self.render(result) {
            Ok(line) => line,
            Err(err) => {
                eprintln!("[error] cannot serialize result for {}: {err}", result.address);
                return;
            }
        };
        if let Err(err) = self.out.write_all(line.as_bytes()) {
            eprintln!("[error] cannot write result for {}: {err}", result.address);
        }
    }

    fn render(&self, result: &ProbeResult) -> Result<String, serde_json::Error> {
        Ok(match self.format {
            Format::Hex => format!("{}: {}\n", result.address, hex::encode(&result.data)),
            Format::Base64 => format!("{}: {}\n", result.address, BASE64.encode(&result.data)),
            Format::Ascii => format!(
                "{}: {}\n",
                result.address,
                String::from_utf8_lossy(&result.data)
            ),
            Format::Json => {
                let metadata = parse_http_metadata(&result.data);
                let protocol = metadata
                    .as_ref()
                    .map_or_else(|| UNKNOWN_PROTOCOL.to_owned(), |m| m.protocol.clone());
                let record = Record {
                    address: &result.address,
                    port: result.port,
                    protocol,
                    probed_protocol: &result.probed_protocol,
                    country: self.geo.country(&result.address).unwrap_or_default(),
                    city: self.geo.city(&result.address).unwrap_or_default(),
                    data: String::from_utf8_lossy(&result.data).into_owned(),
                    metadata,
                    error: &result.error,
                };
                let mut line = serde_json::to_string(&record)?;
                line.push('\n');
                line
            }
        })
    }
}
