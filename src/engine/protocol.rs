//! Relay wire protocol.
//!
//! Browsers only send a handful of "simple" request headers without a CORS
//! preflight, and a relay cannot answer preflights without giving itself
//! away. So the outbound request keeps only those simple headers; every other
//! header, together with the protocol's own `--` fields, travels as a
//! query string inside the `referer` header.
//!
//! ```text
//! GET https://relay.example/http
//! accept: text/html
//! referer: https://proxy.example/?--ver=51&--url=https%3A%2F%2Fa.com%2F&--mode=navigate&x-token=1
//! ```
//!
//! The relay answers with the real response headers plus a few fields of its
//! own:
//!
//! | field           | meaning                                            |
//! |-----------------|----------------------------------------------------|
//! | `--s`           | original status                                    |
//! | `--t`           | client may drop `--aceh` (wildcard expose works)   |
//! | `--switched`    | retry one tier up, echoing `--raw-info`            |
//! | `--error`       | acceleration node failed, retry on the primary     |
//! | `<n>-<name>`    | n-th instance of a repeated header                 |
//! | `--<name>`      | escaped real header whose name begins with `--`    |

use std::sync::atomic::{AtomicBool, Ordering};

use http::header::{HeaderName, HeaderValue, REFERER, SET_COOKIE, VARY};
use http::{HeaderMap, Method};
use url::form_urlencoded;
use url::Url;

use crate::engine::errors::ProxyError;
use crate::engine::url_codec::{strip_fragment, UrlCodec};
use crate::net::{InterceptedRequest, OutboundRequest};

pub const FIELD_VER: &str = "--ver";
pub const FIELD_URL: &str = "--url";
pub const FIELD_MODE: &str = "--mode";
pub const FIELD_TYPE: &str = "--type";
pub const FIELD_LEVEL: &str = "--level";
pub const FIELD_ORIGIN: &str = "--origin";
pub const FIELD_REFERER: &str = "--referer";
pub const FIELD_COOKIE: &str = "--cookie";
pub const FIELD_ACEH: &str = "--aceh";
pub const FIELD_RAW_INFO: &str = "--raw-info";

pub const FIELD_STATUS: &str = "--s";
pub const FIELD_PROBE: &str = "--t";
pub const FIELD_SWITCHED: &str = "--switched";
pub const FIELD_ERROR: &str = "--error";

/// Token the relay adds to `vary`.
const VARY_MARKER: &str = "--url";

/// Request headers the engine synthesizes itself or the transport owns.
const DROPPED_REQUEST_HEADERS: &[&str] = &[
    "host",
    "connection",
    "content-length",
    "transfer-encoding",
    "keep-alive",
    "cookie",
    "referer",
    "origin",
];

fn is_simple_header(name: &str, value: &HeaderValue) -> bool {
    match name {
        "accept" | "accept-language" | "content-language" => true,
        "content-type" => {
            let mime = value
                .to_str()
                .unwrap_or_default()
                .split(';')
                .next()
                .unwrap_or_default()
                .trim()
                .to_ascii_lowercase();
            matches!(
                mime.as_str(),
                "application/x-www-form-urlencoded" | "multipart/form-data" | "text/plain"
            )
        }
        _ => false,
    }
}

/// A request in packed form, before a relay line is chosen.
#[derive(Debug, Clone)]
pub struct PackedRequest {
    /// Simple headers sent as real transport headers
    pub headers: HeaderMap,
    fields: Vec<(String, String)>,
}

impl PackedRequest {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }

    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    pub fn set_field(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.fields.iter_mut().find(|(k, _)| k == name) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((name.to_string(), value)),
        }
    }

    pub fn remove_field(&mut self, name: &str) {
        self.fields.retain(|(k, _)| k != name);
    }

    pub fn set_tier(&mut self, tier: u32) {
        self.set_field(FIELD_LEVEL, tier.to_string());
    }

    /// The query string carried in `referer`.
    pub fn query(&self) -> String {
        let mut query = form_urlencoded::Serializer::new(String::new());
        for (k, v) in &self.fields {
            query.append_pair(k, v);
        }
        query.finish()
    }

    /// Builds the request for one relay.
    pub fn to_outbound(
        &self,
        method: Method,
        relay_url: Url,
        body: Option<bytes::Bytes>,
        referer_base: &str,
    ) -> Result<OutboundRequest, ProxyError> {
        let mut out = OutboundRequest::new(method, relay_url);
        out.headers = self.headers.clone();
        out.body = body;

        let referer = format!("{}?{}", referer_base, self.query());
        let value = HeaderValue::try_from(referer).map_err(|e| ProxyError::Protocol(e.to_string()))?;
        out.headers.insert(REFERER, value);
        Ok(out)
    }
}

/// A relay response after unpacking.
#[derive(Debug, Clone, Default)]
pub struct UnpackedResponse {
    pub status: u16,
    pub headers: HeaderMap,
    /// `Set-Cookie` lines, kept apart because merging them is lossy
    pub cookie_lines: Vec<String>,
    pub switched: bool,
    pub raw_info: Option<String>,
    pub node_error: Option<String>,
    /// The relay rejected the request itself (400 without a status override)
    pub protocol_error: bool,
}

/// Packs requests and unpacks responses.
///
/// The only state is the header-echo capability flag. It starts set and is
/// cleared for good by the first response that carries the probe field.
#[derive(Debug)]
pub struct ProtocolCodec {
    codec: UrlCodec,
    js_ver: String,
    header_echo: AtomicBool,
}

impl ProtocolCodec {
    pub fn new(codec: UrlCodec, js_ver: &str) -> Self {
        Self {
            codec,
            js_ver: js_ver.to_string(),
            header_echo: AtomicBool::new(true),
        }
    }

    pub fn wants_header_echo(&self) -> bool {
        self.header_echo.load(Ordering::Relaxed)
    }

    /// Origin carried in front of the packed query.
    pub fn referer_base(&self) -> String {
        self.codec.root_origin()
    }

    /// Packs `req` for `target`, issued by a page at `client`.
    pub fn pack_request(
        &self,
        req: &InterceptedRequest,
        target: &Url,
        client: &Url,
        cookie: Option<&str>,
    ) -> PackedRequest {
        let mut packed = PackedRequest {
            headers: HeaderMap::new(),
            fields: Vec::new(),
        };

        packed.set_field(FIELD_VER, self.js_ver.as_str());
        packed.set_field(FIELD_URL, strip_fragment(target.as_str()));
        packed.set_field(FIELD_MODE, req.mode.as_str());
        packed.set_field(FIELD_TYPE, req.destination.as_str());
        packed.set_tier(1);

        let mut extra = Vec::new();
        for (name, value) in req.headers.iter() {
            let key = name.as_str();
            if DROPPED_REQUEST_HEADERS.contains(&key) {
                continue;
            }
            if is_simple_header(key, value) {
                packed.headers.append(name.clone(), value.clone());
                continue;
            }
            let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
            if key.starts_with("--") {
                extra.push((format!("--{}", key), value));
            } else {
                extra.push((key.to_string(), value));
            }
        }

        let origin = if req.headers.contains_key(http::header::ORIGIN) {
            client.origin().ascii_serialization()
        } else {
            String::new()
        };
        packed.set_field(FIELD_ORIGIN, origin);

        if let Some(referrer) = req.referrer.as_deref().filter(|r| !r.is_empty()) {
            if referrer == self.codec.root_origin() {
                // Origin-only referrer policy
                packed.set_field(FIELD_REFERER, format!("{}/", client.origin().ascii_serialization()));
            } else {
                packed.set_field(FIELD_REFERER, self.codec.decode(referrer));
            }
        }

        if let Some(cookie) = cookie.filter(|c| !c.is_empty()) {
            packed.set_field(FIELD_COOKIE, cookie);
        }

        if self.wants_header_echo() {
            packed.set_field(FIELD_ACEH, "1");
        }

        for (k, v) in extra {
            packed.set_field(&k, v);
        }
        packed
    }

    /// Unpacks the headers of a relay response received with `transport_status`.
    pub fn unpack_response(&self, transport_status: u16, raw: &HeaderMap) -> UnpackedResponse {
        let mut out = UnpackedResponse::default();
        let mut status_override = None;

        for (name, value) in raw.iter() {
            let key = name.as_str();
            match key {
                "access-control-allow-origin" | "access-control-expose-headers" => continue,
                FIELD_STATUS => {
                    status_override = value.to_str().ok().and_then(|s| s.trim().parse::<u16>().ok());
                    continue;
                }
                FIELD_PROBE => {
                    if self.header_echo.swap(false, Ordering::Relaxed) {
                        log::debug!("Relay confirmed wildcard header exposure");
                    }
                    continue;
                }
                FIELD_SWITCHED => {
                    out.switched = true;
                    continue;
                }
                FIELD_RAW_INFO => {
                    out.raw_info = Some(lossy(value));
                    continue;
                }
                FIELD_ERROR => {
                    out.node_error = Some(lossy(value));
                    continue;
                }
                _ => {}
            }

            if let Some(real) = strip_index(key) {
                if real == "set-cookie" {
                    out.cookie_lines.push(lossy(value));
                } else if let Ok(real) = HeaderName::from_bytes(real.as_bytes()) {
                    out.headers.append(real, value.clone());
                }
                continue;
            }

            if name == SET_COOKIE {
                out.cookie_lines.push(lossy(value));
                continue;
            }

            let real = match key.strip_prefix("--") {
                Some(unescaped) => match HeaderName::from_bytes(unescaped.as_bytes()) {
                    Ok(n) => n,
                    Err(_) => continue,
                },
                None => name.clone(),
            };

            if real == VARY {
                let tokens: Vec<&str> = value
                    .to_str()
                    .unwrap_or_default()
                    .split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty() && *t != VARY_MARKER)
                    .collect();
                if tokens.is_empty() {
                    continue;
                }
                if let Ok(v) = HeaderValue::from_str(&tokens.join(", ")) {
                    out.headers.insert(VARY, v);
                }
                continue;
            }

            out.headers.insert(real, value.clone());
        }

        out.protocol_error = transport_status == 400 && status_override.is_none();
        out.status = status_override.unwrap_or(transport_status);
        out
    }
}

/// Relay-side encoding of a response's headers: the status goes to `--s`,
/// repeated headers become `<n>-<name>` and names starting with `--` are
/// escaped.
pub fn pack_response(status: u16, headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::new();
    out.insert(
        HeaderName::from_static(FIELD_STATUS),
        HeaderValue::from(status),
    );

    for name in headers.keys() {
        let values: Vec<&HeaderValue> = headers.get_all(name).iter().collect();
        let repeated = values.len() > 1 || name == SET_COOKIE;
        for (i, value) in values.into_iter().enumerate() {
            let packed = if repeated {
                format!("{}-{}", i, name.as_str())
            } else if name.as_str().starts_with("--") {
                format!("--{}", name.as_str())
            } else {
                name.as_str().to_string()
            };
            if let Ok(n) = HeaderName::from_bytes(packed.as_bytes()) {
                out.append(n, value.clone());
            }
        }
    }
    out
}

/// `"3-set-cookie"` -> `Some("set-cookie")`.
fn strip_index(key: &str) -> Option<&str> {
    let (index, rest) = key.split_once('-')?;
    if index.is_empty() || !index.bytes().all(|b| b.is_ascii_digit()) || rest.is_empty() {
        return None;
    }
    Some(rest)
}

fn lossy(value: &HeaderValue) -> String {
    String::from_utf8_lossy(value.as_bytes()).into_owned()
}
