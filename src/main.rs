//! Binary entry point: option parsing, process setup and one pipeline run.

use std::io;
use std::time::Duration;

use anyhow::Context;
use log::debug;

use bannergrab::geo::{DisabledGeo, GeoLookup, MaxMindGeo};
use bannergrab::input::{Config, Opts};
use bannergrab::payloads::PayloadCatalog;
use bannergrab::scanner::Scanner;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let mut opts = Opts::read();
    let config = Config::read(opts.config_path.clone());
    opts.merge(&config);
    debug!("main() `opts` arguments are {opts:?}");

    if let Some(limit) = opts.ulimit {
        adjust_ulimit_size(limit);
    }

    let catalog = match &opts.port_mappings {
        Some(path) => PayloadCatalog::load(path, opts.data.as_deref())?,
        None => PayloadCatalog::empty(),
    };
    debug!("loaded {} payload mappings", catalog.len());

    let geo: Box<dyn GeoLookup> = match &opts.geoip {
        Some(path) => Box::new(
            MaxMindGeo::open(path)
                .with_context(|| format!("cannot open geoip database {}", path.display()))?,
        ),
        None => Box::new(DisabledGeo),
    };

    let scanner = Scanner::new(
        opts.concurrent,
        Duration::from_secs(opts.timeout),
        opts.read_timeout.map(Duration::from_secs),
        catalog,
        opts.format,
        geo,
    );

    let input = tokio::io::BufReader::new(tokio::io::stdin());
    let summary = scanner.run(input, io::stdout()).await?;
    debug!("run finished: {summary}");
    Ok(())
}

/// Raises the open-file limit so a large pool doesn't starve on descriptors.
/// Failure is a warning; the run proceeds with whatever the OS allows.
fn adjust_ulimit_size(limit: u64) {
    if let Err(err) = rlimit::Resource::NOFILE.set(limit, limit) {
        eprintln!("[error] cannot set rlimit: {err}");
        return;
    }

    if let Ok((soft, _)) = rlimit::Resource::NOFILE.get() {
        debug!("open file limit is now {soft}");
    }
}
