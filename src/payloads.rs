//! Provides the read-only catalog mapping ports to the probe payloads sent to
//! responsive hosts.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::Context;
use log::debug;

/// Token inside payload bytes replaced with the target address before sending.
const ADDRESS_TOKEN: &[u8] = b"%s";

/// One named probe payload.
///
/// The name is the payload file's name and doubles as the protocol label
/// recorded on results produced with this payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbePayload {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// Immutable port → payload catalog, built once before the pipeline starts and
/// shared read-only by every worker.
///
/// Construction joins two inputs: a JSON mapping file of decimal port numbers
/// to payload names (`{"80": "http", "21": "ftp"}`) and a directory whose
/// files hold the raw payload bytes under those names. A port missing from the
/// catalog means the probe sends nothing and only listens.
#[derive(Debug, Default)]
pub struct PayloadCatalog {
    entries: HashMap<u16, ProbePayload>,
}

impl PayloadCatalog {
    /// An empty catalog; every probe becomes a pure listen-and-read.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Loads the catalog from a mapping file and a payload directory.
    ///
    /// Mappings that name a payload file absent from the directory are
    /// skipped; the affected ports fall back to payload-less probes.
    pub fn load(mappings_path: &Path, data_dir: Option<&Path>) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(mappings_path).with_context(|| {
            format!("cannot read port mapping file {}", mappings_path.display())
        })?;
        let mappings: HashMap<u16, String> = serde_json::from_str(&raw).with_context(|| {
            format!("cannot parse port mapping file {}", mappings_path.display())
        })?;

        let mut data = HashMap::new();
        if let Some(dir) = data_dir {
            for entry in fs::read_dir(dir)
                .with_context(|| format!("cannot read payload directory {}", dir.display()))?
            {
                let entry = entry?;
                if !entry.file_type()?.is_file() {
                    continue;
                }
                let name = entry.file_name().to_string_lossy().into_owned();
                let bytes = fs::read(entry.path())
                    .with_context(|| format!("cannot read payload file {}", name))?;
                data.insert(name, bytes);
            }
        }

        let mut entries = HashMap::new();
        for (port, name) in mappings {
            match data.get(&name) {
                Some(bytes) => {
                    entries.insert(
                        port,
                        ProbePayload {
                            name,
                            bytes: bytes.clone(),
                        },
                    );
                }
                None => debug!("no payload file {name:?} for port {port}, skipping"),
            }
        }

        Ok(Self { entries })
    }

    /// Builds a catalog directly from entries. Primarily for tests and
    /// embedding callers that assemble payloads themselves.
    pub fn from_entries(entries: impl IntoIterator<Item = (u16, ProbePayload)>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    /// Looks up the payload for a port. `None` means "send nothing".
    pub fn lookup(&self, port: u16) -> Option<&ProbePayload> {
        self.entries.get(&port)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Renders payload bytes for one target, substituting every `%s` with the
/// target address.
pub fn render_payload(bytes: &[u8], address: &str) -> Vec<u8> {
    let mut rendered = Vec::with_capacity(bytes.len());
    let mut rest = bytes;
    while let Some(pos) = rest
        .windows(ADDRESS_TOKEN.len())
        .position(|w| w == ADDRESS_TOKEN)
    {
        rendered.extend_from_slice(&rest[..pos]);
        rendered.extend_from_slice(address.as_bytes());
        rest = &rest[pos + ADDRESS_TOKEN.len()..];
    }
    rendered.extend_from_slice(rest);
    rendered
}

#[cfg(test)]
mod tests {
    use super::{render_payload, PayloadCatalog, ProbePayload};
    use std::path::Path;

    fn http_payload() -> ProbePayload {
        ProbePayload {
            name: "http".to_owned(),
            bytes: b"GET / HTTP/1.0\r\n\r\n".to_vec(),
        }
    }

    #[test]
    fn lookup_hit_and_miss() {
        let catalog = PayloadCatalog::from_entries(vec![(80, http_payload())]);

        let payload = catalog.lookup(80).unwrap();
        assert_eq!(payload.name, "http");
        assert_eq!(payload.bytes, b"GET / HTTP/1.0\r\n\r\n");
        assert!(catalog.lookup(443).is_none());
    }

    #[test]
    fn empty_catalog() {
        let catalog = PayloadCatalog::empty();
        assert!(catalog.is_empty());
        assert!(catalog.lookup(80).is_none());
    }

    #[test]
    fn loads_mappings_and_payload_dir() {
        let catalog = PayloadCatalog::load(
            Path::new("fixtures/port-mappings.json"),
            Some(Path::new("fixtures/payloads")),
        )
        .unwrap();

        // Port 80 maps to the "http" payload file.
        let payload = catalog.lookup(80).unwrap();
        assert_eq!(payload.name, "http");
        assert!(payload.bytes.starts_with(b"HEAD / HTTP/1.0"));

        // Port 9999 maps to a file that does not exist and is dropped.
        assert!(catalog.lookup(9999).is_none());
    }

    #[test]
    fn load_without_data_dir_yields_empty_catalog() {
        let catalog =
            PayloadCatalog::load(Path::new("fixtures/port-mappings.json"), None).unwrap();
        assert!(catalog.is_empty());
    }

    #[test]
    fn load_missing_mapping_file_fails() {
        assert!(PayloadCatalog::load(Path::new("fixtures/no-such-file.json"), None).is_err());
    }

    #[test]
    fn render_substitutes_address() {
        let rendered = render_payload(b"HEAD / HTTP/1.0\r\nHost: %s\r\n\r\n", "10.0.0.9");
        assert_eq!(&rendered[..], &b"HEAD / HTTP/1.0\r\nHost: 10.0.0.9\r\n\r\n"[..]);
    }

    #[test]
    fn render_without_token_is_verbatim() {
        let rendered = render_payload(b"\x00\x01\x02", "10.0.0.9");
        assert_eq!(rendered, b"\x00\x01\x02");
    }

    #[test]
    fn render_multiple_tokens() {
        let rendered = render_payload(b"%s|%s", "a");
        assert_eq!(rendered, b"a|a");
    }
}
