use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::engine::cdn::StaticCdn;
use crate::engine::config::ProxyConfig;
use crate::engine::cookies::PersistentCookieJar;
use crate::engine::dates::now_millis;
use crate::engine::errors::ProxyError;
use crate::engine::events::{ClientId, MessageBus, PageMessage, Recipient, ServiceMessage, Subscription};
use crate::engine::forward::Forwarder;
use crate::engine::page_wait::PageWaitRegistry;
use crate::engine::storage::StoreHandle;
use crate::engine::url_codec::{is_http_scheme, UrlCodec};
use crate::engine::DEFAULT_CHANNEL_CAPACITY;
use crate::net::{InterceptedRequest, ProxyResponse, TransportHandle};

/// What the host should do with an intercepted request.
#[derive(Debug)]
pub enum FetchOutcome {
    /// Let the host's own transport handle the request unchanged
    PassThrough,
    Respond(ProxyResponse),
}

/// The proxy engine as seen by its host.
///
/// The host feeds it intercepted requests through [`ProxyEngine::handle_fetch`]
/// and page messages through [`ProxyEngine::handle_message`], and delivers
/// everything published on [`ProxyEngine::subscribe`] to the addressed pages.
///
/// ```no_run
/// # use std::sync::Arc;
/// # use tunnel_proxy::{ProxyConfig, ProxyEngine, FetchOutcome};
/// # use tunnel_proxy::storage::InMemoryStore;
/// # use tunnel_proxy::net::{HttpTransport, InterceptedRequest};
/// # async fn demo() -> Result<(), tunnel_proxy::ProxyError> {
/// let engine = ProxyEngine::new(
///     ProxyConfig::default(),
///     Arc::new(HttpTransport::new()?),
///     Arc::new(InMemoryStore::new()),
/// )?;
/// engine.init().await?;
/// engine.start();
///
/// let req = InterceptedRequest::get("http://localhost:8080/-----https://example.com/");
/// if let FetchOutcome::Respond(res) = engine.handle_fetch(req).await {
///     println!("{}", res.status);
/// }
/// engine.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct ProxyEngine {
    forwarder: Forwarder,
    transport: TransportHandle,
    cookies: Arc<PersistentCookieJar>,
    cdn: Arc<StaticCdn>,
    pages: Arc<PageWaitRegistry>,
    bus: MessageBus,
    /// Stops the background cookie flusher
    cancel: CancellationToken,
    flusher: Mutex<Option<JoinHandle<()>>>,
}

impl ProxyEngine {
    pub fn new(config: ProxyConfig, transport: TransportHandle, store: StoreHandle) -> Result<Self, ProxyError> {
        let bus = MessageBus::new(DEFAULT_CHANNEL_CAPACITY);
        let cookies = Arc::new(PersistentCookieJar::with_store(store.clone()));
        let cdn = Arc::new(StaticCdn::new(&config.static_boost.base));
        let pages = Arc::new(PageWaitRegistry::new());

        let forwarder = Forwarder::new(
            config,
            transport.clone(),
            store,
            cookies.clone(),
            cdn.clone(),
            pages.clone(),
            bus.clone(),
        )?;

        Ok(Self {
            forwarder,
            transport,
            cookies,
            cdn,
            pages,
            bus,
            cancel: CancellationToken::new(),
            flusher: Mutex::new(None),
        })
    }

    /// Loads persisted cookies and, when static acceleration is on, the CDN manifest.
    /// A missing manifest only disables acceleration.
    pub async fn init(&self) -> Result<(), ProxyError> {
        let loaded = self.cookies.load(now_millis()).await?;
        log::info!("Loaded {} cookies", loaded);

        let config = self.forwarder.config();
        if config.static_boost.enable {
            match self.cdn.load(self.transport.as_ref(), config.static_boost.ver).await {
                Ok(n) => log::info!("Static CDN manifest v{}: {} urls", config.static_boost.ver, n),
                Err(e) => log::warn!("Static CDN manifest unavailable: {}", e),
            }
        }
        Ok(())
    }

    /// Starts the cookie flusher and tells open pages the engine is ready.
    pub fn start(&self) {
        let mut flusher = self.flusher.lock().unwrap_or_else(|e| e.into_inner());
        if flusher.is_some() {
            return;
        }

        let interval = self.forwarder.config().cookie_flush_interval();
        *flusher = Some(self.cookies.clone().spawn_flusher(interval, self.cancel.clone()));
        drop(flusher);

        self.bus.publish(Recipient::All, ServiceMessage::Ready);
    }

    /// Stops the flusher after a last flush.
    pub async fn shutdown(&self) {
        self.cancel.cancel();

        let handle = self.flusher.lock().unwrap_or_else(|e| e.into_inner()).take();
        match handle {
            Some(handle) => {
                if let Err(e) = handle.await {
                    log::error!("Cookie flusher panicked: {}", e);
                }
            }
            None => {
                if let Err(e) = self.cookies.flush(now_millis()).await {
                    log::warn!("Cookie flush failed: {}", e);
                }
            }
        }
    }

    pub fn subscribe(&self) -> Subscription {
        self.bus.subscribe()
    }

    pub fn config(&self) -> Arc<ProxyConfig> {
        self.forwarder.config()
    }

    pub fn codec(&self) -> &UrlCodec {
        self.forwarder.codec()
    }

    pub fn cookies(&self) -> &Arc<PersistentCookieJar> {
        &self.cookies
    }

    /// Applies a new configuration and announces it to every page.
    pub fn reload_config(&self, config: ProxyConfig) -> Result<(), ProxyError> {
        self.forwarder.reload(config.clone())?;
        log::info!("Configuration v{} applied", config.ver);
        self.bus.publish(Recipient::All, ServiceMessage::ConfigChanged(config));
        Ok(())
    }

    /// Relay address a page should open instead of the WebSocket `target`.
    pub fn websocket_url(&self, target: &str, args: &[(&str, &str)]) -> Option<Url> {
        let target = Url::parse(target).ok()?;
        self.forwarder.router().snapshot().build_ws_url(&target, args)
    }

    pub async fn handle_fetch(&self, req: InterceptedRequest) -> FetchOutcome {
        let codec = self.forwarder.codec();
        if codec.is_own_asset(&req.url) {
            return FetchOutcome::PassThrough;
        }

        let decoded = codec.decode(&req.url);
        if !is_http_scheme(&decoded) {
            return FetchOutcome::PassThrough;
        }

        let target = match Url::parse(&decoded) {
            Ok(target) => target,
            Err(e) => {
                log::warn!("Undecodable target {}: {}", decoded, e);
                return FetchOutcome::Respond(ProxyResponse::text(400, format!("invalid url: {}", decoded)));
            }
        };

        let client = req
            .client_url
            .as_deref()
            .and_then(|c| Url::parse(&codec.decode(c)).ok())
            .unwrap_or_else(|| target.clone());

        FetchOutcome::Respond(self.forwarder.forward(&req, target, &client).await)
    }

    pub fn handle_message(&self, client: &str, message: PageMessage) -> Result<(), ProxyError> {
        let sender: ClientId = client.to_string();
        match message {
            PageMessage::CookiePush(cookie) => {
                if let Some(cookie) = self.cookies.set_from_page(cookie) {
                    self.bus
                        .publish(Recipient::AllExcept(sender), ServiceMessage::CookiePush(vec![cookie]));
                }
            }
            PageMessage::CookiePull => {
                let cookies = self.cookies.all_visible();
                self.bus.publish(Recipient::Only(sender), ServiceMessage::CookiePush(cookies));
            }
            PageMessage::InitBegin(id) => {
                self.pages.notify(id, false);
            }
            PageMessage::InitEnd(id) => {
                self.pages.notify(id, true);
            }
            PageMessage::ConfigGet => {
                let config = self.forwarder.config().as_ref().clone();
                self.bus.publish(Recipient::Only(sender), ServiceMessage::Config(config));
            }
            PageMessage::ConfigSet(config) => self.reload_config(config)?,
            PageMessage::ReadyCheck => {
                self.bus.publish(Recipient::Only(sender), ServiceMessage::Ready);
            }
        }
        Ok(())
    }
}
