//! Response models.
//!
//! Bodies are either absent, fully buffered, or a stream of chunks. Streams are
//! only consumed once; [`Body::collect`] buffers whatever form the body has.

use std::fmt;

use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream, StreamExt};
use http::header::{HeaderValue, CONTENT_TYPE};
use http::HeaderMap;

use crate::engine::errors::ProxyError;

pub enum Body {
    Empty,
    Full(Bytes),
    Stream(BoxStream<'static, Result<Bytes, ProxyError>>),
}

impl Body {
    pub fn is_empty(&self) -> bool {
        match self {
            Body::Empty => true,
            Body::Full(b) => b.is_empty(),
            Body::Stream(_) => false,
        }
    }

    /// Buffers the whole body.
    pub async fn collect(self) -> Result<Bytes, ProxyError> {
        match self {
            Body::Empty => Ok(Bytes::new()),
            Body::Full(b) => Ok(b),
            Body::Stream(mut s) => {
                let mut buf = BytesMut::new();
                while let Some(chunk) = s.next().await {
                    buf.extend_from_slice(&chunk?);
                }
                Ok(buf.freeze())
            }
        }
    }

    pub fn into_stream(self) -> BoxStream<'static, Result<Bytes, ProxyError>> {
        match self {
            Body::Empty => stream::empty().boxed(),
            Body::Full(b) => stream::once(async move { Ok(b) }).boxed(),
            Body::Stream(s) => s,
        }
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Empty => write!(f, "Body::Empty"),
            Body::Full(b) => write!(f, "Body::Full({} bytes)", b.len()),
            Body::Stream(_) => write!(f, "Body::Stream"),
        }
    }
}

impl From<Bytes> for Body {
    fn from(b: Bytes) -> Self {
        Body::Full(b)
    }
}

impl From<&'static str> for Body {
    fn from(s: &'static str) -> Self {
        Body::Full(Bytes::from_static(s.as_bytes()))
    }
}

/// A response as received from a transport, before unpacking.
#[derive(Debug)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Body,
}

impl TransportResponse {
    pub fn new(status: u16, headers: HeaderMap, body: Body) -> Self {
        Self { status, headers, body }
    }
}

/// The response handed back to the host environment.
#[derive(Debug)]
pub struct ProxyResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Body,
}

impl ProxyResponse {
    pub fn new(status: u16, headers: HeaderMap, body: Body) -> Self {
        Self { status, headers, body }
    }

    /// Status with the given headers and no body.
    pub fn empty(status: u16, headers: HeaderMap) -> Self {
        Self::new(status, headers, Body::Empty)
    }

    /// Synthesized plain-text response.
    pub fn text(status: u16, text: impl Into<String>) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
        Self::new(status, headers, Body::Full(Bytes::from(text.into())))
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}
