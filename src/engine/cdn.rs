//! Static-resource acceleration.
//!
//! Popular static files are mirrored on a CDN. The mirror publishes a
//! manifest at `<base><latest>/full`: a sequence of little-endian `u32` words,
//! for every version `0..=latest` a count followed by that many URL hashes.
//! A mirrored file lives at `<base><ver>/<hash as 8 hex digits>.txt` and is
//! laid out as
//!
//! ```text
//! [u16 BE header length][JSON object of response headers][body]
//! ```

use std::collections::HashMap;
use std::sync::RwLock;

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, DATE};
use http::{HeaderMap, Method};
use url::Url;

use crate::engine::dates::{format_http_date, now_millis};
use crate::engine::errors::ProxyError;
use crate::net::{Body, OutboundRequest, ProxyResponse, Transport};

pub struct StaticCdn {
    base: String,
    versions: RwLock<HashMap<u32, u32>>,
}

impl StaticCdn {
    pub fn new(base: &str) -> Self {
        Self {
            base: base.to_string(),
            versions: RwLock::new(HashMap::new()),
        }
    }

    /// Number of mirrored URLs known.
    pub fn len(&self) -> usize {
        self.versions.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mirror version holding the file for `url_hash`, if mirrored.
    pub fn version_of(&self, url_hash: u32) -> Option<u32> {
        self.versions.read().unwrap_or_else(|e| e.into_inner()).get(&url_hash).copied()
    }

    /// Downloads the manifest of version `latest` and replaces the table.
    pub async fn load(&self, transport: &dyn Transport, latest: u32) -> Result<usize, ProxyError> {
        let url = self.file_url(latest, "full")?;
        let body = fetch_ok(transport, url).await?;
        let table = parse_manifest(&body, latest);
        let count = table.len();
        *self.versions.write().unwrap_or_else(|e| e.into_inner()) = table;
        log::info!("Static CDN manifest v{} loaded: {} files", latest, count);
        Ok(count)
    }

    /// Fetches a mirrored file and rebuilds the original response from it.
    pub async fn fetch(&self, transport: &dyn Transport, url_hash: u32, ver: u32) -> Result<ProxyResponse, ProxyError> {
        let url = self.file_url(ver, &format!("{:08x}.txt", url_hash))?;
        let raw = fetch_ok(transport, url).await?;
        let (headers, body) = decode_file(raw, now_millis())?;
        Ok(ProxyResponse::new(200, headers, Body::Full(body)))
    }

    fn file_url(&self, ver: u32, file: &str) -> Result<Url, ProxyError> {
        let url = format!("{}{}/{}", self.base, ver, file);
        Url::parse(&url).map_err(|_| ProxyError::InvalidUrl(url))
    }
}

async fn fetch_ok(transport: &dyn Transport, url: Url) -> Result<Bytes, ProxyError> {
    let res = transport.fetch(OutboundRequest::new(Method::GET, url.clone())).await?;
    if res.status != 200 {
        return Err(ProxyError::Transport(format!("{} answered {}", url, res.status)));
    }
    res.body.collect().await
}

/// Hash -> version table. A truncated manifest yields what was read so far.
pub fn parse_manifest(buf: &[u8], latest: u32) -> HashMap<u32, u32> {
    let mut words = buf
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]));
    let mut table = HashMap::new();

    for ver in 0..=latest {
        let Some(count) = words.next() else { break };
        for _ in 0..count {
            let Some(hash) = words.next() else { return table };
            table.insert(hash, ver);
        }
    }
    table
}

/// Splits a mirrored file into headers and body, stamping a fresh `date`.
pub fn decode_file(raw: Bytes, now: i64) -> Result<(HeaderMap, Bytes), ProxyError> {
    if raw.len() < 2 {
        return Err(ProxyError::Protocol("mirrored file too short".into()));
    }
    let header_len = u16::from_be_bytes([raw[0], raw[1]]) as usize;
    let end = 2 + header_len;
    if raw.len() < end {
        return Err(ProxyError::Protocol("mirrored file header truncated".into()));
    }

    let fields: HashMap<String, String> = serde_json::from_slice(&raw[2..end])
        .map_err(|e| ProxyError::Protocol(format!("mirrored file headers: {}", e)))?;
    let mut headers = HeaderMap::new();
    for (name, value) in fields {
        match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(&value)) {
            (Ok(n), Ok(v)) => {
                headers.insert(n, v);
            }
            _ => log::debug!("Skipping unusable mirrored header {}", name),
        }
    }
    if let Ok(date) = HeaderValue::from_str(&format_http_date(now)) {
        headers.insert(DATE, date);
    }

    Ok((headers, raw.slice(end..)))
}
