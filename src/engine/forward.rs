//! The forwarding state machine.
//!
//! One call to [`Forwarder::forward`] drives one intercepted request:
//!
//! ```text
//! CacheLookup -> FastPath(direct | static CDN) -> RelayDispatch(tier) -> RedirectFollow -> Done
//! ```
//!
//! Relay dispatch starts at tier 1 on the default node, or at tier 0 on the
//! remembered line when the URL cache has a hint. Relays can ask for a tier
//! switch (`--switched`), which moves the request to the acceleration node at
//! tier 2; failures there fall back to the default node at tier 0. Failures
//! at tier 0 or 1 end the request with a 502.
//!
//! Every path ends in a [`ProxyResponse`]; errors are turned into synthesized
//! responses here.

use std::future::Future;
use std::sync::{Arc, RwLock};

use http::header::{HeaderValue, LOCATION};
use http::{HeaderMap, Method};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::engine::cdn::StaticCdn;
use crate::engine::config::ProxyConfig;
use crate::engine::cookies::{Cookie, PersistentCookieJar};
use crate::engine::dates::now_millis;
use crate::engine::errors::ProxyError;
use crate::engine::events::{MessageBus, Recipient, ServiceMessage};
use crate::engine::page_wait::PageWaitRegistry;
use crate::engine::pipeline::ContentPipeline;
use crate::engine::protocol::{ProtocolCodec, FIELD_ACEH, FIELD_RAW_INFO};
use crate::engine::router::{url_hash, NodeRouter, RouterConfig, ACCELERATION_TIER};
use crate::engine::storage::StoreHandle;
use crate::engine::tld::TldResolver;
use crate::engine::url_cache::{UrlCache, UrlCacheEntry};
use crate::engine::url_codec::{is_http_scheme, strip_fragment, UrlCodec};
use crate::net::{Body, InterceptedRequest, OutboundRequest, ProxyResponse, RedirectPolicy, TransportHandle};

/// Statuses whose responses never carry a body.
const EMPTY_BODY_STATUSES: [u16; 4] = [101, 204, 205, 304];
const REDIRECT_STATUSES: [u16; 5] = [301, 302, 303, 307, 308];

/// Where a response came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Direct,
    Cdn,
    Relay { host: String, tier: u32 },
}

struct Launched {
    route: Route,
    status: u16,
    headers: HeaderMap,
    cookie_lines: Vec<String>,
    raw_info: Option<String>,
    body: Body,
}

impl Launched {
    fn fast_path(route: Route, res: ProxyResponse) -> Self {
        Self {
            route,
            status: res.status,
            headers: res.headers,
            cookie_lines: Vec::new(),
            raw_info: None,
            body: res.body,
        }
    }
}

async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> Result<T, ProxyError>
where
    F: Future<Output = Result<T, ProxyError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ProxyError::Canceled),
        r = fut => r,
    }
}

pub struct Forwarder {
    codec: UrlCodec,
    protocol: ProtocolCodec,
    config: RwLock<Arc<ProxyConfig>>,
    router: NodeRouter,
    transport: TransportHandle,
    cookies: Arc<PersistentCookieJar>,
    tld: Arc<TldResolver>,
    url_cache: UrlCache,
    cdn: Arc<StaticCdn>,
    pipeline: ContentPipeline,
    bus: MessageBus,
}

impl Forwarder {
    pub fn new(
        config: ProxyConfig,
        transport: TransportHandle,
        store: StoreHandle,
        cookies: Arc<PersistentCookieJar>,
        cdn: Arc<StaticCdn>,
        pages: Arc<PageWaitRegistry>,
        bus: MessageBus,
    ) -> Result<Self, ProxyError> {
        let router = NodeRouter::new(RouterConfig::from_config(&config)?);
        let codec = UrlCodec::new(&config.root_url);
        let protocol = ProtocolCodec::new(codec.clone(), &config.js_ver);
        let pipeline = ContentPipeline::new(codec.clone(), pages, config.page_wait_timeout());

        Ok(Self {
            codec,
            protocol,
            config: RwLock::new(Arc::new(config)),
            router,
            transport,
            cookies,
            tld: Arc::new(TldResolver::default()),
            url_cache: UrlCache::new(store),
            cdn,
            pipeline,
            bus,
        })
    }

    pub fn codec(&self) -> &UrlCodec {
        &self.codec
    }

    pub fn router(&self) -> &NodeRouter {
        &self.router
    }

    pub fn config(&self) -> Arc<ProxyConfig> {
        self.config.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Swaps in a new configuration. The routing table is validated first; on
    /// error nothing changes.
    pub fn reload(&self, config: ProxyConfig) -> Result<(), ProxyError> {
        let router = RouterConfig::from_config(&config)?;
        self.router.reload(router);
        *self.config.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(config);
        Ok(())
    }

    /// Forwards `req` to `target` on behalf of the page at `client`.
    pub async fn forward(&self, req: &InterceptedRequest, target: Url, client: &Url) -> ProxyResponse {
        let config = self.config();
        let router = self.router.snapshot();
        let mut target = target;
        let mut redirects = 0u32;

        loop {
            let launched = match self.launch(req, &target, client, &config, &router).await {
                Ok(launched) => launched,
                Err(ProxyError::Canceled) => {
                    log::debug!("Request for {} canceled", target);
                    return ProxyResponse::text(502, "request canceled");
                }
                Err(e) => {
                    log::warn!("Forwarding {} failed: {}", target, e);
                    return ProxyResponse::text(502, format!("proxy error: {}", e));
                }
            };

            let Launched {
                route,
                status,
                mut headers,
                cookie_lines,
                raw_info,
                body,
            } = launched;
            log::debug!("{} {} -> {} via {:?}", req.method, target, status, route);

            if let Route::Relay { host, .. } = &route {
                if req.method == Method::GET && status == 200 {
                    self.url_cache
                        .remember(target.as_str(), host, raw_info.as_deref(), &headers, now_millis())
                        .await;
                }
            }

            if !cookie_lines.is_empty() {
                self.accept_cookies(&target, client, &cookie_lines, &config);
            }

            if EMPTY_BODY_STATUSES.contains(&status) {
                return ProxyResponse::empty(status, headers);
            }

            if REDIRECT_STATUSES.contains(&status) {
                let location = headers
                    .get(LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|l| UrlCodec::resolve_relative(l, &target));

                if let Some(location) = location {
                    if req.redirect == RedirectPolicy::Follow && is_http_scheme(location.as_str()) {
                        redirects += 1;
                        if redirects >= config.max_redirects {
                            log::warn!("Too many redirects, last hop {} -> {}", target, location);
                            return ProxyResponse::text(502, "too many redirects");
                        }
                        log::debug!("Following {} from {} to {}", status, target, location);
                        target = location;
                        continue;
                    }

                    match HeaderValue::from_str(&self.codec.encode_url(&location)) {
                        Ok(v) => {
                            headers.insert(LOCATION, v);
                        }
                        Err(e) => log::warn!("Unusable redirect location {}: {}", location, e),
                    }
                }
                // Some hosts treat a redirect with a body as a broken page
                return ProxyResponse::empty(status, headers);
            }

            let res = ProxyResponse::new(status, headers, body);
            return self.pipeline.process(req.mode, req.destination, &target, res).await;
        }
    }

    async fn launch(
        &self,
        req: &InterceptedRequest,
        target: &Url,
        client: &Url,
        config: &ProxyConfig,
        router: &RouterConfig,
    ) -> Result<Launched, ProxyError> {
        let href = strip_fragment(target.as_str());
        let hash = url_hash(href);
        let mut cached = None;

        if req.method == Method::GET {
            cached = self.url_cache.lookup(href, now_millis()).await;
            if cached.is_none() {
                if let Some(launched) = self.try_direct(req, target, config).await? {
                    return Ok(launched);
                }
                if let Some(launched) = self.try_cdn(req, hash, config).await? {
                    return Ok(launched);
                }
            }
        }

        self.relay(req, target, client, config, router, hash, cached).await
    }

    async fn try_direct(
        &self,
        req: &InterceptedRequest,
        target: &Url,
        config: &ProxyConfig,
    ) -> Result<Option<Launched>, ProxyError> {
        let host = match (target.host_str(), target.port()) {
            (Some(h), Some(p)) => format!("{}:{}", h, p),
            (Some(h), None) => h.to_string(),
            _ => return Ok(None),
        };
        if !config.direct_hosts.iter().any(|d| d.eq_ignore_ascii_case(&host)) {
            return Ok(None);
        }

        let mut out = OutboundRequest::new(Method::GET, target.clone());
        out.headers = req.headers.clone();
        // Typed-in navigations carry it, and it would cost a preflight
        out.headers.remove("upgrade-insecure-requests");

        match cancellable(&req.cancel, self.transport.fetch(out)).await {
            Ok(res) if res.status == 200 => {
                log::debug!("Direct hit: {}", target);
                let res = ProxyResponse::new(res.status, res.headers, res.body);
                Ok(Some(Launched::fast_path(Route::Direct, res)))
            }
            Err(ProxyError::Canceled) => Err(ProxyError::Canceled),
            Ok(res) => {
                log::warn!("Direct fetch of {} answered {}", target, res.status);
                Ok(None)
            }
            Err(e) => {
                log::warn!("Direct fetch of {} failed: {}", target, e);
                Ok(None)
            }
        }
    }

    async fn try_cdn(
        &self,
        req: &InterceptedRequest,
        hash: u32,
        config: &ProxyConfig,
    ) -> Result<Option<Launched>, ProxyError> {
        if !config.static_boost.enable {
            return Ok(None);
        }
        let Some(ver) = self.cdn.version_of(hash) else {
            return Ok(None);
        };

        match cancellable(&req.cancel, self.cdn.fetch(self.transport.as_ref(), hash, ver)).await {
            Ok(res) => {
                log::debug!("Static CDN hit: {:08x} v{}", hash, ver);
                Ok(Some(Launched::fast_path(Route::Cdn, res)))
            }
            Err(ProxyError::Canceled) => Err(ProxyError::Canceled),
            Err(e) => {
                log::warn!("Static CDN fetch {:08x} v{} failed: {}", hash, ver, e);
                Ok(None)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn relay(
        &self,
        req: &InterceptedRequest,
        target: &Url,
        client: &Url,
        config: &ProxyConfig,
        router: &RouterConfig,
        hash: u32,
        cached: Option<UrlCacheEntry>,
    ) -> Result<Launched, ProxyError> {
        let cookie = {
            let jar = self.cookies.jar();
            let mut jar = jar.write().unwrap_or_else(|e| e.into_inner());
            jar.credentials_for(target, client, req.credentials, &self.tld, now_millis())
        };
        let mut packed = self.protocol.pack_request(req, target, client, cookie.as_deref());
        let referer_base = self.protocol.referer_base();

        // A remembered route is known to work, so it skips escalation
        let (mut tier, mut sticky, mut raw_info) = match cached {
            Some(entry) => (0, Some(entry.host), entry.routing_info),
            None => (1, None, None),
        };

        for attempt in 1..=config.max_attempts.max(1) {
            packed.set_tier(tier);
            match &raw_info {
                Some(info) => packed.set_field(FIELD_RAW_INFO, info.as_str()),
                None => packed.remove_field(FIELD_RAW_INFO),
            }

            let host = match sticky.take() {
                Some(host) => host,
                None => router.line_for(hash, tier)?.to_string(),
            };
            let relay_url = RouterConfig::build_transport_url(&host)?;
            let out = packed.to_outbound(req.method.clone(), relay_url, req.body.clone(), &referer_base)?;
            log::debug!("Relay attempt {} for {}: tier {} via {}", attempt, target, tier, host);

            let res = match cancellable(&req.cancel, self.transport.fetch(out)).await {
                Ok(res) => res,
                Err(ProxyError::Canceled) => return Err(ProxyError::Canceled),
                Err(e) if tier >= ACCELERATION_TIER => {
                    log::warn!("Relay {} unreachable at tier {}: {}, falling back", host, tier, e);
                    tier = 0;
                    raw_info = None;
                    continue;
                }
                Err(e) => return Err(e),
            };

            let unpacked = self.protocol.unpack_response(res.status, &res.headers);
            if !self.protocol.wants_header_echo() {
                packed.remove_field(FIELD_ACEH);
            }

            if unpacked.protocol_error {
                let detail = match res.body.collect().await {
                    Ok(b) => String::from_utf8_lossy(&b).into_owned(),
                    Err(_) => String::new(),
                };
                log::warn!("Relay {} rejected {}: {}", host, target, detail);
                if tier >= ACCELERATION_TIER {
                    tier = 0;
                    raw_info = None;
                    continue;
                }
                return Err(ProxyError::Protocol(detail));
            }

            if unpacked.switched {
                log::debug!("Relay {} switched {} to tier {}", host, target, tier + 1);
                raw_info = unpacked.raw_info;
                tier += 1;
                continue;
            }

            if let Some(err) = unpacked.node_error {
                log::warn!("Acceleration node {} failed for {}: {}", host, target, err);
                raw_info = None;
                tier = 0;
                continue;
            }

            if tier >= ACCELERATION_TIER && !matches!(unpacked.status, 200 | 206) {
                log::warn!("Relay {} answered {} at tier {}, falling back", host, unpacked.status, tier);
                raw_info = None;
                tier = 0;
                continue;
            }

            return Ok(Launched {
                route: Route::Relay { host, tier },
                status: unpacked.status,
                headers: unpacked.headers,
                cookie_lines: unpacked.cookie_lines,
                raw_info,
                body: res.body,
            });
        }

        Err(ProxyError::Transport(format!(
            "no relay answered {} within {} attempts",
            target, config.max_attempts
        )))
    }

    fn accept_cookies(&self, target: &Url, client: &Url, lines: &[String], config: &ProxyConfig) {
        let target_host = target.host_str().unwrap_or_default();
        let client_host = client.host_str().unwrap_or_default();
        if !config.third_party_cookies && !self.tld.same_site(target_host, client_host) {
            log::debug!("Dropping {} third-party cookies from {}", lines.len(), target_host);
            return;
        }

        let accepted = {
            let jar = self.cookies.jar();
            let mut jar = jar.write().unwrap_or_else(|e| e.into_inner());
            jar.store_response_cookies(target, lines, &self.tld, now_millis())
        };

        let visible: Vec<Cookie> = accepted.into_iter().filter(|c| !c.http_only).collect();
        if !visible.is_empty() {
            self.bus.publish(Recipient::All, ServiceMessage::CookiePush(visible));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::config::{LineConfig, NodeConfig};
    use crate::engine::events::Subscription;
    use crate::engine::protocol::pack_response;
    use crate::engine::storage::{InMemoryStore, URL_CACHE_TABLE};
    use crate::net::transport::mock::MockTransport;
    use crate::net::{Destination, TransportResponse};
    use bytes::Bytes;
    use http::header::REFERER;
    use std::collections::{BTreeMap, HashMap};
    use url::form_urlencoded;

    fn config() -> ProxyConfig {
        let node = |host: &str| NodeConfig {
            label: host.to_string(),
            hidden: false,
            lines: vec![LineConfig::Host(host.to_string())],
        };
        let mut node_map = BTreeMap::new();
        node_map.insert("main".to_string(), node("relay-main.net"));
        node_map.insert("acc".to_string(), node("relay-acc.net"));
        ProxyConfig {
            node_map,
            node_default: "main".into(),
            node_acc: "acc".into(),
            root_url: "https://proxy.example/".into(),
            ..ProxyConfig::default()
        }
    }

    struct Fixture {
        forwarder: Forwarder,
        transport: Arc<MockTransport>,
        store: Arc<InMemoryStore>,
        messages: Subscription,
    }

    fn fixture<F>(config: ProxyConfig, handler: F) -> Fixture
    where
        F: Fn(&OutboundRequest) -> Result<TransportResponse, ProxyError> + Send + Sync + 'static,
    {
        let transport = MockTransport::new(handler);
        let store = Arc::new(InMemoryStore::new());
        let bus = MessageBus::new(16);
        let messages = bus.subscribe();
        let forwarder = Forwarder::new(
            config,
            transport.clone(),
            store.clone(),
            Arc::new(PersistentCookieJar::with_store(store.clone())),
            Arc::new(StaticCdn::new("https://mirror.example/")),
            Arc::new(PageWaitRegistry::new()),
            bus,
        )
        .unwrap();
        Fixture {
            forwarder,
            transport,
            store,
            messages,
        }
    }

    /// Packed fields of a relay request.
    fn fields(req: &OutboundRequest) -> HashMap<String, String> {
        let referer = req.headers.get(REFERER).unwrap().to_str().unwrap();
        let query = referer.split_once('?').unwrap().1;
        form_urlencoded::parse(query.as_bytes()).into_owned().collect()
    }

    fn relay(status: u16, headers: &[(&'static str, &'static str)], body: &'static str) -> TransportResponse {
        let mut upstream = HeaderMap::new();
        for (k, v) in headers {
            upstream.append(*k, HeaderValue::from_static(v));
        }
        TransportResponse::new(200, pack_response(status, &upstream), Body::from(body))
    }

    fn signal(pairs: &[(&'static str, &'static str)]) -> TransportResponse {
        let mut headers = HeaderMap::new();
        for (k, v) in pairs {
            headers.append(*k, HeaderValue::from_static(v));
        }
        TransportResponse::new(200, headers, Body::Empty)
    }

    fn u(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    async fn get(f: &Fixture, target: &str) -> ProxyResponse {
        let req = InterceptedRequest::get(format!("https://proxy.example/-----{}", target));
        f.forwarder.forward(&req, u(target), &u("https://page.example/")).await
    }

    #[tokio::test]
    async fn switched_response_retries_once_one_tier_up() {
        let f = fixture(config(), |req| {
            Ok(match fields(req)["--level"].as_str() {
                "1" => signal(&[("--switched", "1"), ("--raw-info", "X")]),
                _ => relay(200, &[("content-type", "text/plain")], "ok"),
            })
        });

        let res = get(&f, "https://a.com/data").await;
        assert_eq!(res.status, 200);
        assert_eq!(res.body.collect().await.unwrap(), Bytes::from_static(b"ok"));

        let sent = f.transport.requests();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].url.as_str(), "https://relay-main.net/http");
        assert!(!fields(&sent[0]).contains_key("--raw-info"));

        let second = fields(&sent[1]);
        assert_eq!(sent[1].url.as_str(), "https://relay-acc.net/http");
        assert_eq!(second["--level"], "2");
        assert_eq!(second["--raw-info"], "X");
    }

    #[tokio::test]
    async fn acceleration_error_falls_back_to_tier_zero() {
        let f = fixture(config(), |req| {
            Ok(match fields(req)["--level"].as_str() {
                "1" => signal(&[("--switched", "1"), ("--raw-info", "X")]),
                "2" => signal(&[("--error", "quota")]),
                _ => relay(200, &[], "fine"),
            })
        });

        let res = get(&f, "https://a.com/").await;
        assert_eq!(res.status, 200);

        let sent = f.transport.requests();
        assert_eq!(sent.len(), 3);
        let last = fields(&sent[2]);
        assert_eq!(last["--level"], "0");
        assert!(!last.contains_key("--raw-info"));
        assert_eq!(sent[2].url.as_str(), "https://relay-main.net/http");
    }

    #[tokio::test]
    async fn transport_failure_at_tier_one_is_a_502() {
        let f = fixture(config(), |_| Err(ProxyError::Transport("connection refused".into())));
        let res = get(&f, "https://a.com/").await;
        assert_eq!(res.status, 502);
        assert_eq!(f.transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn redirect_loop_is_cut_off() {
        let f = fixture(config(), |_| Ok(relay(302, &[("location", "/loop")], "")));

        let res = get(&f, "https://a.com/start").await;
        assert_eq!(res.status, 502);
        assert_eq!(res.body.collect().await.unwrap(), Bytes::from_static(b"too many redirects"));

        let sent = f.transport.requests();
        assert_eq!(sent.len(), 5);
        // Relative locations resolve against the target, not the page
        assert_eq!(fields(&sent[1])["--url"], "https://a.com/loop");
    }

    #[tokio::test]
    async fn manual_redirect_is_surfaced_in_proxied_form() {
        let f = fixture(config(), |_| Ok(relay(301, &[("location", "https://b.com/x")], "moved")));

        let mut req = InterceptedRequest::navigate("https://proxy.example/-----https://a.com/");
        req.redirect = RedirectPolicy::Manual;
        let res = f.forwarder.forward(&req, u("https://a.com/"), &u("https://a.com/")).await;

        assert_eq!(res.status, 301);
        assert_eq!(res.header("location"), Some("https://proxy.example/-----https://b.com/x"));
        assert!(res.body.is_empty());
    }

    #[tokio::test]
    async fn empty_body_statuses() {
        let f = fixture(config(), |_| Ok(relay(204, &[("x-a", "1")], "ignored")));
        let res = get(&f, "https://a.com/").await;
        assert_eq!(res.status, 204);
        assert_eq!(res.header("x-a"), Some("1"));
        assert!(res.body.is_empty());
    }

    #[tokio::test]
    async fn script_gets_bootstrap() {
        let f = fixture(config(), |_| Ok(relay(200, &[("content-type", "application/javascript")], "x=1")));

        let req = InterceptedRequest::get("https://proxy.example/-----https://example.com/a.js")
            .with_destination(Destination::Script);
        let res = f
            .forwarder
            .forward(&req, u("https://example.com/a.js"), &u("https://example.com/"))
            .await;

        assert_eq!(res.status, 200);
        assert_eq!(res.header("content-type"), Some("text/javascript"));
        let body = res.body.collect().await.unwrap();
        let text = std::str::from_utf8(&body).unwrap();
        assert!(text.starts_with("if (typeof importScripts === 'function' && !self.window) {"));
        assert!(text.ends_with("x=1"));
    }

    #[tokio::test]
    async fn cookies_are_stored_sent_and_broadcast() {
        let mut f = fixture(config(), |req| {
            Ok(match fields(req).get("--cookie") {
                None => relay(
                    200,
                    &[("set-cookie", "a=1; Path=/"), ("set-cookie", "b=2; Path=/; HttpOnly")],
                    "",
                ),
                Some(_) => relay(200, &[], ""),
            })
        });

        get(&f, "https://a.com/").await;
        let pushed = f.messages.try_recv().unwrap();
        assert_eq!(pushed.to, Recipient::All);
        match pushed.message {
            ServiceMessage::CookiePush(cookies) => {
                assert_eq!(cookies.len(), 1);
                assert_eq!(cookies[0].name, "a");
            }
            other => panic!("unexpected message {:?}", other),
        }

        let mut req = InterceptedRequest::get("https://proxy.example/-----https://a.com/next");
        req.credentials = crate::net::CredentialsMode::Include;
        f.forwarder.forward(&req, u("https://a.com/next"), &u("https://page.example/")).await;
        let sent = f.transport.requests();
        assert_eq!(fields(&sent[1])["--cookie"], "a=1; b=2");
    }

    #[tokio::test]
    async fn third_party_cookies_can_be_refused() {
        let mut cfg = config();
        cfg.third_party_cookies = false;
        let mut f = fixture(cfg, |_| Ok(relay(200, &[("set-cookie", "t=1; Path=/")], "")));

        get(&f, "https://tracker.net/p").await;
        assert!(f.messages.try_recv().is_err());
        assert!(f.forwarder.cookies.all_visible().is_empty());
    }

    #[tokio::test]
    async fn cacheable_response_makes_route_sticky() {
        let f = fixture(config(), |_| Ok(relay(200, &[("cache-control", "max-age=600")], "v")));

        get(&f, "https://a.com/lib.js").await;
        assert_eq!(f.store.len(URL_CACHE_TABLE), 1);

        get(&f, "https://a.com/lib.js").await;
        let sent = f.transport.requests();
        assert_eq!(sent.len(), 2);
        assert_eq!(fields(&sent[0])["--level"], "1");
        assert_eq!(fields(&sent[1])["--level"], "0");
        assert_eq!(sent[1].url.as_str(), "https://relay-main.net/http");
    }

    #[tokio::test]
    async fn direct_hosts_skip_the_relay() {
        let mut cfg = config();
        cfg.direct_hosts = vec!["img.cdn.com".into()];
        let f = fixture(cfg, |req| {
            assert!(req.headers.get("upgrade-insecure-requests").is_none());
            Ok(TransportResponse::new(200, HeaderMap::new(), Body::from("png")))
        });

        let req = InterceptedRequest::get("https://proxy.example/-----https://img.cdn.com/p.png")
            .with_header(
                http::header::HeaderName::from_static("upgrade-insecure-requests"),
                HeaderValue::from_static("1"),
            );
        let res = f.forwarder.forward(&req, u("https://img.cdn.com/p.png"), &u("https://a.com/")).await;
        assert_eq!(res.status, 200);

        let sent = f.transport.requests();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].url.as_str(), "https://img.cdn.com/p.png");
        assert!(sent[0].headers.get(REFERER).is_none());
    }

    #[tokio::test]
    async fn mirrored_files_come_from_the_cdn() {
        let target = "https://a.com/lib.js";
        let hash = url_hash(target);
        let mut cfg = config();
        cfg.static_boost.enable = true;
        let f = fixture(cfg, move |req| {
            let body = match req.url.path() {
                "/0/full" => Bytes::from([1u32, hash].iter().flat_map(|w| w.to_le_bytes()).collect::<Vec<u8>>()),
                p if p == format!("/0/{:08x}.txt", hash) => {
                    let mut out = 2u16.to_be_bytes().to_vec();
                    out.extend_from_slice(b"{}x=1");
                    Bytes::from(out)
                }
                _ => panic!("unexpected request {}", req.url),
            };
            Ok(TransportResponse::new(200, HeaderMap::new(), Body::Full(body)))
        });

        f.forwarder.cdn.load(f.transport.as_ref(), 0).await.unwrap();
        let res = get(&f, target).await;
        assert_eq!(res.status, 200);
        assert!(res.header("date").is_some());
        assert_eq!(res.body.collect().await.unwrap(), Bytes::from_static(b"x=1"));
        assert_eq!(f.transport.requests().len(), 2);
    }

    #[tokio::test]
    async fn canceled_request_does_not_dispatch() {
        let f = fixture(config(), |_| Ok(relay(200, &[], "")));
        let req = InterceptedRequest::get("https://proxy.example/-----https://a.com/");
        req.cancel.cancel();

        let res = f.forwarder.forward(&req, u("https://a.com/"), &u("https://a.com/")).await;
        assert_eq!(res.status, 502);
        assert!(f.transport.requests().len() <= 1);
    }

    #[tokio::test]
    async fn reload_rejects_broken_config() {
        let f = fixture(config(), |_| Ok(relay(200, &[], "")));
        let mut broken = config();
        broken.node_default = "nope".into();
        assert!(f.forwarder.reload(broken).is_err());
        assert_eq!(f.forwarder.config().node_default, "main");

        let mut next = config();
        next.node_default = "acc".into();
        f.forwarder.reload(next).unwrap();
        assert_eq!(f.forwarder.router().snapshot().default_node(), "acc");
    }
}
