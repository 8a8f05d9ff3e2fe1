//! Best-effort extraction of HTTP response metadata from raw probe data.
//!
//! Probed hosts answer with arbitrary bytes; when those bytes frame like an
//! HTTP response the reporter records the parsed status line and header block
//! alongside the raw capture. Anything that fails to frame yields no metadata
//! rather than an error.

use std::collections::BTreeMap;

use serde_derive::Serialize;

/// Parsed HTTP response framing.
///
/// Header names are canonicalized (`content-type` → `Content-Type`) so lookups
/// are case-insensitive; values keep their arrival order per name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HttpMetadata {
    pub protocol: String,
    pub status: String,
    pub status_code: u16,
    pub proto_major: u32,
    pub proto_minor: u32,
    pub headers: BTreeMap<String, Vec<String>>,
}

/// Parses raw response bytes as an HTTP response head.
///
/// The first line must read `<token> <status…>` where `token` is an
/// `HTTP/<major>.<minor>` version and the status begins with exactly three
/// ASCII digits. Header lines follow until a blank line or the end of the
/// capture; a header line without a colon (the usual shape of a block cut off
/// mid-line by the read buffer) invalidates the whole parse. Every violation
/// returns `None`.
pub fn parse_http_metadata(raw: &[u8]) -> Option<HttpMetadata> {
    let text = String::from_utf8_lossy(raw);
    let mut rest = text.as_ref();

    let status_line = next_line(&mut rest)?;
    let sp = status_line.find(' ')?;
    let protocol = &status_line[..sp];
    let status = status_line[sp + 1..].trim_start_matches(' ');

    let code = status.split(' ').next().unwrap_or(status);
    if code.len() != 3 || !code.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let status_code: u16 = code.parse().ok()?;

    let (proto_major, proto_minor) = parse_http_version(protocol)?;

    let mut headers: BTreeMap<String, Vec<String>> = BTreeMap::new();
    while let Some(line) = next_line(&mut rest) {
        if line.is_empty() {
            break;
        }
        let (name, value) = line.split_once(':')?;
        if name.is_empty() || name.contains(' ') || name.contains('\t') {
            return None;
        }
        headers
            .entry(canonical_header_name(name))
            .or_default()
            .push(value.trim_start_matches([' ', '\t']).to_owned());
    }

    Some(HttpMetadata {
        protocol: protocol.to_owned(),
        status: status.to_owned(),
        status_code,
        proto_major,
        proto_minor,
        headers,
    })
}

/// Pops the next line off `rest`, tolerating both `\r\n` and `\n` endings.
/// A final unterminated line is still a line; `None` only on exhausted input.
fn next_line<'a>(rest: &mut &'a str) -> Option<&'a str> {
    if rest.is_empty() {
        return None;
    }
    let line = match rest.find('\n') {
        Some(i) => {
            let line = &rest[..i];
            *rest = &rest[i + 1..];
            line
        }
        None => {
            let line = *rest;
            *rest = "";
            line
        }
    };
    Some(line.strip_suffix('\r').unwrap_or(line))
}

/// Validates an `HTTP/<major>.<minor>` version token.
fn parse_http_version(token: &str) -> Option<(u32, u32)> {
    match token {
        "HTTP/1.1" => return Some((1, 1)),
        "HTTP/1.0" => return Some((1, 0)),
        _ => {}
    }
    let (major, minor) = token.strip_prefix("HTTP/")?.split_once('.')?;
    Some((parse_version_part(major)?, parse_version_part(minor)?))
}

fn parse_version_part(part: &str) -> Option<u32> {
    if part.is_empty() || part.len() > 6 || !part.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    part.parse().ok()
}

/// Canonical MIME form: first letter of each `-`-separated run uppercased,
/// the rest lowercased.
fn canonical_header_name(name: &str) -> String {
    let mut canonical = String::with_capacity(name.len());
    let mut upper = true;
    for c in name.chars() {
        if upper {
            canonical.extend(c.to_uppercase());
        } else {
            canonical.extend(c.to_lowercase());
        }
        upper = c == '-';
    }
    canonical
}
