//! Request models.
//!
//! [`InterceptedRequest`] is what the host environment hands to the engine for
//! every intercepted fetch. [`OutboundRequest`] is what the engine hands to a
//! [`Transport`](crate::net::Transport) after packing.

use bytes::Bytes;
use http::{HeaderMap, Method};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use url::Url;

/// Fetch request mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestMode {
    Navigate,
    SameOrigin,
    NoCors,
    #[default]
    Cors,
    Websocket,
}

impl RequestMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestMode::Navigate => "navigate",
            RequestMode::SameOrigin => "same-origin",
            RequestMode::NoCors => "no-cors",
            RequestMode::Cors => "cors",
            RequestMode::Websocket => "websocket",
        }
    }
}

/// Fetch request destination. Unknown values map to [`Destination::Empty`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Destination {
    #[default]
    #[serde(rename = "")]
    Empty,
    Document,
    Iframe,
    Frame,
    Script,
    Worker,
    SharedWorker,
    ServiceWorker,
    Style,
    Image,
    Font,
    Audio,
    Video,
    Track,
    Manifest,
    Object,
    Embed,
}

impl Destination {
    pub fn parse(s: &str) -> Self {
        match s {
            "document" => Destination::Document,
            "iframe" => Destination::Iframe,
            "frame" => Destination::Frame,
            "script" => Destination::Script,
            "worker" => Destination::Worker,
            "sharedworker" => Destination::SharedWorker,
            "serviceworker" => Destination::ServiceWorker,
            "style" => Destination::Style,
            "image" => Destination::Image,
            "font" => Destination::Font,
            "audio" => Destination::Audio,
            "video" => Destination::Video,
            "track" => Destination::Track,
            "manifest" => Destination::Manifest,
            "object" => Destination::Object,
            "embed" => Destination::Embed,
            _ => Destination::Empty,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Destination::Empty => "",
            Destination::Document => "document",
            Destination::Iframe => "iframe",
            Destination::Frame => "frame",
            Destination::Script => "script",
            Destination::Worker => "worker",
            Destination::SharedWorker => "sharedworker",
            Destination::ServiceWorker => "serviceworker",
            Destination::Style => "style",
            Destination::Image => "image",
            Destination::Font => "font",
            Destination::Audio => "audio",
            Destination::Video => "video",
            Destination::Track => "track",
            Destination::Manifest => "manifest",
            Destination::Object => "object",
            Destination::Embed => "embed",
        }
    }

    /// Destinations whose body is executed as script.
    pub fn is_script(&self) -> bool {
        matches!(self, Destination::Script | Destination::Worker | Destination::SharedWorker)
    }
}

/// Which credentials accompany the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CredentialsMode {
    Omit,
    #[default]
    SameOrigin,
    Include,
}

/// What to do when the response is a redirect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RedirectPolicy {
    #[default]
    Follow,
    Error,
    Manual,
}

/// A request intercepted by the host environment.
#[derive(Debug, Clone)]
pub struct InterceptedRequest {
    pub method: Method,
    /// URL as requested by the page, usually in proxied form
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub mode: RequestMode,
    pub destination: Destination,
    pub credentials: CredentialsMode,
    pub redirect: RedirectPolicy,
    /// Referrer as reported by the host (proxied form), if any
    pub referrer: Option<String>,
    /// Real URL of the page that issued the request. Falls back to the target.
    pub client_url: Option<String>,
    /// Fires when the host abandons the request
    pub cancel: CancellationToken,
}

impl InterceptedRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
            mode: RequestMode::default(),
            destination: Destination::default(),
            credentials: CredentialsMode::default(),
            redirect: RedirectPolicy::default(),
            referrer: None,
            client_url: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn navigate(url: impl Into<String>) -> Self {
        let mut req = Self::get(url);
        req.mode = RequestMode::Navigate;
        req.destination = Destination::Document;
        req.credentials = CredentialsMode::Include;
        req.redirect = RedirectPolicy::Manual;
        req
    }

    pub fn with_destination(mut self, destination: Destination) -> Self {
        self.destination = destination;
        self
    }

    pub fn with_client(mut self, client_url: impl Into<String>) -> Self {
        self.client_url = Some(client_url.into());
        self
    }

    pub fn with_header(mut self, name: http::HeaderName, value: http::HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }
}

/// A fully prepared request for a transport.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl OutboundRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
        }
    }
}
