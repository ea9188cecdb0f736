//! Transport used to reach relays and direct hosts.
//!
//! The engine only sees the object-safe [`Transport`] trait. [`HttpTransport`]
//! is the production implementation on top of `reqwest`; it never follows
//! redirects, because redirects are interpreted by the forwarding engine.

use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use futures::stream::{StreamExt, TryStreamExt};

use crate::engine::errors::ProxyError;
use crate::net::{Body, OutboundRequest, TransportResponse};

pub trait Transport: Send + Sync {
    fn fetch(&self, req: OutboundRequest) -> BoxFuture<'_, Result<TransportResponse, ProxyError>>;
}

pub type TransportHandle = Arc<dyn Transport>;

pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, ProxyError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Transport for HttpTransport {
    fn fetch(&self, req: OutboundRequest) -> BoxFuture<'_, Result<TransportResponse, ProxyError>> {
        async move {
            log::trace!("{} {}", req.method, req.url);

            let mut builder = self.client.request(req.method, req.url).headers(req.headers);
            if let Some(body) = req.body {
                builder = builder.body(body);
            }
            let res = builder.send().await?;

            let status = res.status().as_u16();
            let headers = res.headers().clone();
            let body = res.bytes_stream().map_err(ProxyError::from).boxed();

            Ok(TransportResponse::new(status, headers, Body::Stream(body)))
        }
        .boxed()
    }
}
