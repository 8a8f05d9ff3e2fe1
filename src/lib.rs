//! This crate exposes the internal functionality of the bannergrab mass
//! banner grabber.
//!
//! bannergrab reads a stream of JSON target lines (`{"ip": ..., "port": ...}`),
//! probes each endpoint over TCP through a fixed-size concurrent worker pool,
//! optionally sending a per-port payload from a configurable catalog, and
//! emits one enriched record per probe in a selectable encoding. It is built
//! for internet-scale reconnaissance runs where the target feed is produced
//! upstream (e.g. by a port scanner) and piped in.
//!
//! ## Architecture Overview
//!
//! The pipeline is managed by [`Scanner`](crate::scanner::Scanner):
//!
//! 1. **Target intake**: feed lines are decoded into
//!    [`Target`](crate::target::Target)s; malformed lines are warned about and
//!    dropped.
//! 2. **Probing**: N workers pull targets from a bounded queue, connect under
//!    timeout, send the catalog payload for the port (if any) and capture up
//!    to 1 KiB of response.
//! 3. **Reporting**: a single consumer enriches each result with HTTP
//!    metadata and geo attributes, serializes it in the configured format and
//!    tracks success/failure counters.
//!
//! Results surface in completion order; per-target failures are data in the
//! record's `error` field, never process errors.
//!
//! ## Basic Usage Example
//!
//! ```no_run
//! use std::io;
//! use std::time::Duration;
//!
//! use bannergrab::geo::DisabledGeo;
//! use bannergrab::input::Format;
//! use bannergrab::payloads::PayloadCatalog;
//! use bannergrab::scanner::Scanner;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let scanner = Scanner::new(
//!         5,                            // concurrent probes
//!         Duration::from_secs(4),       // connect timeout
//!         None,                         // read timeout (defaults to connect)
//!         PayloadCatalog::empty(),      // no payloads: listen-only probes
//!         Format::Json,
//!         Box::new(DisabledGeo),
//!     );
//!
//!     let input = tokio::io::BufReader::new(tokio::io::stdin());
//!     let summary = scanner.run(input, io::stdout()).await?;
//!     eprintln!("probed ok={} errors={}", summary.ok, summary.errors);
//!     Ok(())
//! }
//! ```

pub mod geo;

pub mod input;

pub mod payloads;

pub mod report;

pub mod scanner;

pub mod target;
