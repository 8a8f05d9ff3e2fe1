//! Core functionality for actual probing behaviour.
//!
//! A [`Scanner`] wires the target decoder, a fixed pool of probe workers and
//! the single reporter together with two bounded queues, runs the pipeline to
//! drain and returns the aggregate [`Summary`]. The per-target network work
//! lives in `ProbeConnector`.

use std::io::Write;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use log::debug;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt};
use tokio::net::{lookup_host, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio::time;

use crate::geo::GeoLookup;
use crate::input::Format;
use crate::payloads::{render_payload, PayloadCatalog};
use crate::report::{Reporter, Summary};
use crate::target::{decode_target, Target};

/// Upper bound on bytes captured from one probed host.
const READ_BUFFER_SIZE: usize = 1024;

/// Outcome of one probe.
///
/// Exactly one of these is produced per enqueued [`Target`] while the
/// pipeline is open. An empty `error` means success even when `data` is
/// empty, since some protocols send no greeting. `probed_protocol` names the
/// catalog payload that was written, or is empty for listen-only probes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub address: String,
    pub port: u16,
    pub probed_protocol: String,
    pub data: Vec<u8>,
    pub error: String,
}

impl ProbeResult {
    pub fn is_success(&self) -> bool {
        self.error.is_empty()
    }
}

/// Performs single probes: resolve, timed connect, optional payload write,
/// bounded timed read. Stateless beyond the shared catalog and timeouts, so
/// one connector serves the whole worker pool.
#[derive(Debug)]
struct ProbeConnector {
    catalog: Arc<PayloadCatalog>,
    connect_timeout: Duration,
    io_timeout: Duration,
}

impl ProbeConnector {
    /// Probes one target. Never fails at the process level: every network
    /// error ends up in the result's `error` field and the connection is
    /// dropped unconditionally on the way out.
    async fn probe(&self, target: &Target) -> ProbeResult {
        let mut result = ProbeResult {
            address: target.address.clone(),
            port: target.port,
            probed_protocol: String::new(),
            data: Vec::new(),
            error: String::new(),
        };

        let socket = match self.resolve(target).await {
            Ok(socket) => socket,
            Err(error) => {
                result.error = error;
                return result;
            }
        };

        let mut stream = match time::timeout(self.connect_timeout, TcpStream::connect(socket)).await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(err)) => {
                result.error = format!("connect {socket}: {err}");
                return result;
            }
            Err(_) => {
                result.error = format!(
                    "connect {socket}: timed out after {:?}",
                    self.connect_timeout
                );
                return result;
            }
        };
        debug!("connected to {socket}");

        if let Some(payload) = self.catalog.lookup(target.port) {
            let bytes = render_payload(&payload.bytes, &target.address);
            match time::timeout(self.io_timeout, stream.write_all(&bytes)).await {
                Ok(Ok(())) => result.probed_protocol = payload.name.clone(),
                Ok(Err(err)) => {
                    result.error = format!("write {socket}: {err}");
                    return result;
                }
                Err(_) => {
                    result.error =
                        format!("write {socket}: timed out after {:?}", self.io_timeout);
                    return result;
                }
            }
        }

        let (data, read_error) = self.read_response(&mut stream).await;
        // A failed read that still captured bytes is a successful partial
        // grab; only a zero-byte failure is an error.
        if data.is_empty() {
            if let Some(error) = read_error {
                result.error = error;
                return result;
            }
        }
        result.data = data;
        result
    }

    /// Resolves the target address: an IP literal directly, anything else
    /// through the system resolver.
    async fn resolve(&self, target: &Target) -> Result<SocketAddr, String> {
        if let Ok(ip) = target.address.parse::<IpAddr>() {
            return Ok(SocketAddr::new(ip, target.port));
        }
        match lookup_host((target.address.as_str(), target.port)).await {
            Ok(mut addrs) => addrs
                .next()
                .ok_or_else(|| format!("resolve {}: no addresses", target.address)),
            Err(err) => Err(format!("resolve {}: {err}", target.address)),
        }
    }

    /// Reads until the buffer fills, the peer closes, an error occurs or the
    /// I/O timeout fires, returning whatever arrived plus the failure if any.
    async fn read_response(&self, stream: &mut TcpStream) -> (Vec<u8>, Option<String>) {
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        let mut filled = 0;

        let outcome = time::timeout(self.io_timeout, async {
            loop {
                match stream.read(&mut buf[filled..]).await {
                    Ok(0) => break Ok(()),
                    Ok(n) => {
                        filled += n;
                        if filled == READ_BUFFER_SIZE {
                            break Ok(());
                        }
                    }
                    Err(err) => break Err(err),
                }
            }
        })
        .await;

        let error = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(format!("read: {err}")),
            Err(_) => Some(format!("read: timed out after {:?}", self.io_timeout)),
        };

        buf.truncate(filled);
        debug!("read {filled} bytes");
        (buf, error)
    }
}

/// The class for a probing run.
///
/// Owns the immutable run configuration: pool size, timeouts, the shared
/// payload catalog, the output format and the geo provider. [`Scanner::run`]
/// consumes it and drives one pipeline to completion.
pub struct Scanner {
    concurrency: usize,
    format: Format,
    geo: Box<dyn GeoLookup>,
    connector: Arc<ProbeConnector>,
}

impl Scanner {
    /// `read_timeout` bounds the payload write and the response read and
    /// defaults to the connect timeout when not given.
    pub fn new(
        concurrency: usize,
        connect_timeout: Duration,
        read_timeout: Option<Duration>,
        catalog: PayloadCatalog,
        format: Format,
        geo: Box<dyn GeoLookup>,
    ) -> Self {
        Self {
            concurrency: concurrency.max(1),
            format,
            geo,
            connector: Arc::new(ProbeConnector {
                catalog: Arc::new(catalog),
                connect_timeout,
                io_timeout: read_timeout.unwrap_or(connect_timeout),
            }),
        }
    }

    /// Runs the pipeline until the input is exhausted and every in-flight
    /// probe has been reported.
    ///
    /// One decoder (this task), N workers and one reporter are joined by two
    /// bounded queues of capacity N, so a slow reporter backpressures all the
    /// way to the input read and memory stays O(N) regardless of feed size.
    /// Shutdown rides the queue closures: dropping the target sender lets the
    /// workers drain and exit, their dropped result senders close the result
    /// queue, and the reporter drains it and returns the counters.
    ///
    /// Malformed feed lines are warned about on stderr and skipped; they
    /// never abort the run.
    pub async fn run<R, W>(self, input: R, output: W) -> anyhow::Result<Summary>
    where
        R: AsyncBufRead + Unpin,
        W: Write + Send + 'static,
    {
        let (target_tx, target_rx) = mpsc::channel::<Target>(self.concurrency);
        let (result_tx, result_rx) = mpsc::channel::<ProbeResult>(self.concurrency);

        let reporter = Reporter::new(self.format, self.geo, output);
        let reporter_task = tokio::spawn(reporter.run(result_rx));

        let target_rx = Arc::new(Mutex::new(target_rx));
        let mut workers = Vec::with_capacity(self.concurrency);
        for id in 0..self.concurrency {
            let targets = Arc::clone(&target_rx);
            let results = result_tx.clone();
            let connector = Arc::clone(&self.connector);
            workers.push(tokio::spawn(async move {
                loop {
                    // Hold the receiver lock only for the dequeue, never
                    // across the network I/O.
                    let target = { targets.lock().await.recv().await };
                    let Some(target) = target else { break };
                    let result = connector.probe(&target).await;
                    if results.send(result).await.is_err() {
                        break;
                    }
                }
                debug!("worker {id} finished");
            }));
        }
        drop(result_tx);

        let mut lines = input.lines();
        while let Some(line) = lines.next_line().await? {
            match decode_target(&line) {
                Ok(target) => {
                    if target_tx.send(target).await.is_err() {
                        break;
                    }
                }
                Err(err) => {
                    debug!("target decode failed: {err}");
                    eprintln!("[error] cannot decode target {line}");
                }
            }
        }
        drop(target_tx);

        join_all(workers).await;
        let summary = reporter_task.await?;
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::{ProbeConnector, Target};
    use crate::payloads::{PayloadCatalog, ProbePayload};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::time;

    fn connector(catalog: PayloadCatalog, timeout_ms: u64) -> ProbeConnector {
        ProbeConnector {
            catalog: Arc::new(catalog),
            connect_timeout: Duration::from_millis(timeout_ms),
            io_timeout: Duration::from_millis(timeout_ms),
        }
    }

    fn target(port: u16) -> Target {
        Target {
            address: "127.0.0.1".to_owned(),
            port,
        }
    }

    #[tokio::test]
    async fn probe_reads_banner_without_payload() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream.write_all(b"SSH-2.0-OpenSSH_9.6\r\n").await.unwrap();
        });

        let result = connector(PayloadCatalog::empty(), 2_000)
            .probe(&target(port))
            .await;

        assert!(result.is_success(), "unexpected error: {}", result.error);
        assert_eq!(result.data, b"SSH-2.0-OpenSSH_9.6\r\n");
        assert_eq!(result.probed_protocol, "");
    }

    #[tokio::test]
    async fn probe_writes_rendered_payload_and_labels_result() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 256];
            loop {
                let n = stream.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                if request.ends_with(b"\r\n\r\n") {
                    break;
                }
            }
            stream.write_all(b"HTTP/1.1 200 OK\r\n\r\n").await.unwrap();
            request
        });

        let catalog = PayloadCatalog::from_entries(vec![(
            port,
            ProbePayload {
                name: "http".to_owned(),
                bytes: b"HEAD / HTTP/1.0\r\nHost: %s\r\n\r\n".to_vec(),
            },
        )]);
        let result = connector(catalog, 2_000).probe(&target(port)).await;

        assert!(result.is_success(), "unexpected error: {}", result.error);
        assert_eq!(result.probed_protocol, "http");
        assert_eq!(result.data, b"HTTP/1.1 200 OK\r\n\r\n");

        let request = server.await.unwrap();
        assert_eq!(
            &request[..],
            &b"HEAD / HTTP/1.0\r\nHost: 127.0.0.1\r\n\r\n"[..]
        );
    }

    #[tokio::test]
    async fn unmapped_port_gets_listen_only_probe() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            // The probe must not send anything for an unmapped port.
            let mut buf = [0u8; 64];
            let received =
                match time::timeout(Duration::from_millis(300), stream.read(&mut buf)).await {
                    Ok(Ok(n)) => n,
                    _ => 0,
                };
            stream.write_all(b"220 ftp ready\r\n").await.unwrap();
            received
        });

        let result = connector(PayloadCatalog::empty(), 2_000)
            .probe(&target(port))
            .await;

        assert!(result.is_success(), "unexpected error: {}", result.error);
        assert_eq!(result.data, b"220 ftp ready\r\n");
        assert_eq!(server.await.unwrap(), 0);
    }

    #[tokio::test]
    async fn zero_byte_read_is_success() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            drop(stream);
        });

        let result = connector(PayloadCatalog::empty(), 2_000)
            .probe(&target(port))
            .await;

        assert!(result.is_success(), "unexpected error: {}", result.error);
        assert!(result.data.is_empty());
    }

    #[tokio::test]
    async fn silent_peer_is_a_read_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            // Hold the connection open without writing anything.
            time::sleep(Duration::from_millis(800)).await;
            drop(stream);
        });

        let result = connector(PayloadCatalog::empty(), 250)
            .probe(&target(port))
            .await;

        assert!(!result.is_success());
        assert!(result.error.contains("timed out"), "got: {}", result.error);
        assert!(result.data.is_empty());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn partial_data_before_timeout_is_success() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream.write_all(b"hello").await.unwrap();
            // Keep the connection open so the read can only end by timeout.
            time::sleep(Duration::from_millis(800)).await;
            drop(stream);
        });

        let result = connector(PayloadCatalog::empty(), 250)
            .probe(&target(port))
            .await;

        assert!(result.is_success(), "unexpected error: {}", result.error);
        assert_eq!(result.data, b"hello");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn refused_connect_is_an_error() {
        // Bind then drop to find a port with no listener.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = connector(PayloadCatalog::empty(), 2_000)
            .probe(&target(port))
            .await;

        assert!(!result.is_success());
        assert!(result.error.contains("connect"), "got: {}", result.error);
        assert!(result.data.is_empty());
    }

    #[tokio::test]
    async fn unroutable_connect_fails_within_the_window() {
        let connector = connector(PayloadCatalog::empty(), 250);
        let started = time::Instant::now();
        let result = connector
            .probe(&Target {
                address: "10.255.255.1".to_owned(),
                port: 81,
            })
            .await;

        assert!(!result.is_success());
        assert!(result.data.is_empty());
        assert!(
            result.error.contains("timed out") || result.error.contains("connect"),
            "got: {}",
            result.error
        );
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn unresolvable_host_is_an_error() {
        let result = connector(PayloadCatalog::empty(), 500)
            .probe(&Target {
                address: "host.invalid".to_owned(),
                port: 80,
            })
            .await;

        assert!(!result.is_success());
        assert!(result.error.contains("resolve"), "got: {}", result.error);
    }

    #[tokio::test]
    async fn read_caps_at_buffer_size() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream.write_all(&[0x41u8; 4096]).await.unwrap();
        });

        let result = connector(PayloadCatalog::empty(), 2_000)
            .probe(&target(port))
            .await;

        assert!(result.is_success(), "unexpected error: {}", result.error);
        assert_eq!(result.data.len(), super::READ_BUFFER_SIZE);
    }
}
