//! Response content pipeline.
//!
//! Runs last in a request's lifecycle and picks a treatment per response:
//!
//! - scripts, workers and shared workers are buffered, rewritten by
//!   [`jsfilter`] and prefixed with the worker bootstrap;
//! - navigations to `text/html` are streamed behind an injected prologue,
//!   holding the first upstream byte until the page reports in (see
//!   [`PageWaitRegistry`]);
//! - anything else passes through untouched.

pub mod inject;
pub mod jsfilter;

use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use encoding_rs::{Encoding, UTF_8};
use futures::future;
use futures::stream::{self, StreamExt};
use http::header::{HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use http::HeaderMap;
use url::Url;

use crate::engine::errors::ProxyError;
use crate::engine::page_wait::PageWaitRegistry;
use crate::engine::url_codec::UrlCodec;
use crate::net::{Body, Destination, ProxyResponse, RequestMode};

pub const JS_MIME: &str = "text/javascript";

/// Lowercased mime type of a `content-type` header, without parameters.
pub fn parse_mime(headers: &HeaderMap) -> String {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|m| m.trim().to_ascii_lowercase())
        .unwrap_or_default()
}

/// The `charset` parameter of a `content-type` header, unquoted.
pub fn parse_charset(headers: &HeaderMap) -> Option<String> {
    let ct = headers.get(CONTENT_TYPE)?.to_str().ok()?;
    let idx = ct.to_ascii_lowercase().find("charset=")?;
    let after = &ct[idx + "charset=".len()..];
    let end = after.find([';', ' ', '\t']).unwrap_or(after.len());
    let charset = after[..end].trim_matches(|c| c == '"' || c == '\'');
    (!charset.is_empty()).then(|| charset.to_string())
}

/// Re-encodes a body labelled with a non-UTF-8 charset as UTF-8. Unknown
/// labels and UTF-8 bodies are returned as they are.
fn to_utf8(body: Bytes, charset: Option<&str>) -> Bytes {
    let Some(encoding) = charset.and_then(|c| Encoding::for_label(c.as_bytes())) else {
        return body;
    };
    if encoding == UTF_8 {
        return body;
    }
    let (text, _, malformed) = encoding.decode(&body);
    if malformed {
        log::debug!("Script is not valid {}", encoding.name());
    }
    Bytes::from(text.into_owned())
}

pub struct ContentPipeline {
    codec: UrlCodec,
    pages: Arc<PageWaitRegistry>,
    page_wait_timeout: Duration,
}

impl ContentPipeline {
    pub fn new(codec: UrlCodec, pages: Arc<PageWaitRegistry>, page_wait_timeout: Duration) -> Self {
        Self {
            codec,
            pages,
            page_wait_timeout,
        }
    }

    pub fn pages(&self) -> &Arc<PageWaitRegistry> {
        &self.pages
    }

    pub async fn process(
        &self,
        mode: RequestMode,
        destination: Destination,
        target: &Url,
        res: ProxyResponse,
    ) -> ProxyResponse {
        if destination.is_script() {
            return self.process_script(res).await;
        }
        if mode == RequestMode::Navigate && parse_mime(&res.headers) == "text/html" {
            return self.process_html(target, res);
        }
        res
    }

    async fn process_script(&self, res: ProxyResponse) -> ProxyResponse {
        let ProxyResponse { status, mut headers, body } = res;

        let code = match body.collect().await {
            Ok(code) => code,
            Err(e) => {
                log::warn!("Script body failed: {}", e);
                return ProxyResponse::text(502, format!("script fetch failed: {}", e));
            }
        };

        // the body goes out as text/javascript without a charset, so it must be UTF-8
        let code = to_utf8(code, parse_charset(&headers).as_deref());

        let bootstrap = inject::worker_bootstrap(&self.codec);
        let rewritten = jsfilter::rewrite(&code);
        let code: &[u8] = rewritten.as_deref().unwrap_or(&code);

        let mut out = BytesMut::with_capacity(bootstrap.len() + code.len());
        out.extend_from_slice(bootstrap.as_bytes());
        out.extend_from_slice(code);

        headers.insert(CONTENT_TYPE, HeaderValue::from_static(JS_MIME));
        headers.remove(CONTENT_LENGTH);
        ProxyResponse::new(status, headers, Body::Full(out.freeze()))
    }

    fn process_html(&self, target: &Url, res: ProxyResponse) -> ProxyResponse {
        let ProxyResponse { status, mut headers, body } = res;

        let ticket = self.pages.register();
        let page_id = ticket.id;
        let prologue = Bytes::from(inject::html_prologue(&self.codec, target, page_id));
        log::debug!("Page {} assigned to {}", page_id, target);

        let pages = self.pages.clone();
        let timeout = self.page_wait_timeout;
        let url = target.to_string();
        let gate = stream::once(async move {
            if !pages.wait(ticket, timeout).await {
                log::warn!("Page wait timeout. id: {} url: {}", page_id, url);
            }
        })
        .filter_map(|()| future::ready(None::<Result<Bytes, ProxyError>>));

        let stream = stream::once(future::ready(Ok(prologue)))
            .chain(gate)
            .chain(body.into_stream())
            .boxed();

        headers.remove(CONTENT_LENGTH);
        ProxyResponse::new(status, headers, Body::Stream(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream::StreamExt;

    fn pipeline(pages: Arc<PageWaitRegistry>) -> ContentPipeline {
        ContentPipeline::new(UrlCodec::new("https://proxy.example/"), pages, Duration::from_millis(2000))
    }

    fn response(content_type: &'static str, body: &'static str) -> ProxyResponse {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
        ProxyResponse::new(200, headers, Body::from(body))
    }

    fn target() -> Url {
        Url::parse("https://example.com/a").unwrap()
    }

    #[tokio::test]
    async fn script_gets_bootstrap_and_js_mime() {
        let p = pipeline(Arc::new(PageWaitRegistry::new()));
        let res = p
            .process(
                RequestMode::NoCors,
                Destination::Script,
                &target(),
                response("application/x-javascript", "x=1"),
            )
            .await;

        assert_eq!(res.header("content-type"), Some("text/javascript"));
        assert!(res.headers.get(CONTENT_LENGTH).is_none());
        let body = res.body.collect().await.unwrap();
        let text = std::str::from_utf8(&body).unwrap();
        assert!(text.starts_with("if (typeof importScripts === 'function'"));
        assert!(text.ends_with("}\nx=1"));
    }

    #[tokio::test]
    async fn worker_code_is_filtered() {
        let p = pipeline(Arc::new(PageWaitRegistry::new()));
        let res = p
            .process(
                RequestMode::SameOrigin,
                Destination::Worker,
                &target(),
                response("text/javascript", "postMessage(location.href)"),
            )
            .await;
        let body = res.body.collect().await.unwrap();
        assert!(std::str::from_utf8(&body)
            .unwrap()
            .ends_with("postMessage(...__set_srcWin(), __location.href)"));
    }

    #[tokio::test]
    async fn other_content_passes_through() {
        let p = pipeline(Arc::new(PageWaitRegistry::new()));
        let res = p
            .process(RequestMode::NoCors, Destination::Style, &target(), response("text/css", "a{}"))
            .await;
        assert_eq!(res.header("content-type"), Some("text/css"));
        assert!(res.headers.get(CONTENT_LENGTH).is_some());
        assert_eq!(res.body.collect().await.unwrap(), Bytes::from_static(b"a{}"));

        // html that is not a navigation is left alone too
        let res = p
            .process(RequestMode::Cors, Destination::Empty, &target(), response("text/html", "<p>"))
            .await;
        assert_eq!(res.body.collect().await.unwrap(), Bytes::from_static(b"<p>"));
    }

    #[tokio::test(start_paused = true)]
    async fn html_is_held_until_timeout() {
        let pages = Arc::new(PageWaitRegistry::new());
        let p = pipeline(pages.clone());
        let res = p
            .process(
                RequestMode::Navigate,
                Destination::Document,
                &target(),
                response("text/html; charset=utf-8", "<p>hi</p>"),
            )
            .await;

        let mut stream = res.body.into_stream();
        let head = stream.next().await.unwrap().unwrap();
        let head = std::str::from_utf8(&head).unwrap();
        assert!(head.contains("<base href=\"https://example.com/a\">"));
        assert!(head.contains("data-id=\"1\""));
        assert_eq!(pages.pending(), 1);

        let start = tokio::time::Instant::now();
        let rest = stream.next().await.unwrap().unwrap();
        assert_eq!(&rest[..], b"<p>hi</p>");
        assert!(start.elapsed() >= Duration::from_millis(2000));
        assert_eq!(pages.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn html_released_by_page_signal() {
        let pages = Arc::new(PageWaitRegistry::new());
        let p = pipeline(pages.clone());
        let res = p
            .process(RequestMode::Navigate, Destination::Document, &target(), response("text/html", "<p>"))
            .await;

        let mut stream = res.body.into_stream();
        stream.next().await.unwrap().unwrap();

        let reader = tokio::spawn(async move { stream.next().await.unwrap().unwrap() });
        tokio::task::yield_now().await;
        assert!(pages.notify(1, true));

        let start = tokio::time::Instant::now();
        assert_eq!(&reader.await.unwrap()[..], b"<p>");
        assert!(start.elapsed() < Duration::from_millis(2000));
    }

    #[tokio::test]
    async fn gbk_script_is_reencoded_as_utf8() {
        let (gbk, _, _) = encoding_rs::GBK.encode("var s='中文';location.href");
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/javascript; charset=\"GBK\""));
        let res = ProxyResponse::new(200, headers, Body::Full(Bytes::from(gbk.into_owned())));

        let p = pipeline(Arc::new(PageWaitRegistry::new()));
        let res = p.process(RequestMode::NoCors, Destination::Script, &target(), res).await;

        assert_eq!(res.header("content-type"), Some("text/javascript"));
        let body = res.body.collect().await.unwrap();
        let text = std::str::from_utf8(&body).unwrap();
        assert!(text.ends_with("var s='中文';__location.href"));
    }

    #[test]
    fn charset_is_read_from_content_type() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_charset(&headers), None);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/javascript; Charset='Shift_JIS'"));
        assert_eq!(parse_charset(&headers).as_deref(), Some("Shift_JIS"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/html;charset=utf-8; x=1"));
        assert_eq!(parse_charset(&headers).as_deref(), Some("utf-8"));
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_html_releases_page_wait() {
        let pages = Arc::new(PageWaitRegistry::new());
        let p = pipeline(pages.clone());

        let unread = p
            .process(RequestMode::Navigate, Destination::Document, &target(), response("text/html", "<p>"))
            .await;
        let started = p
            .process(RequestMode::Navigate, Destination::Document, &target(), response("text/html", "<p>"))
            .await;
        assert_eq!(pages.pending(), 2);

        let mut stream = started.body.into_stream();
        stream.next().await.unwrap().unwrap();
        let reader = tokio::spawn(async move { stream.next().await });
        tokio::time::sleep(Duration::from_millis(500)).await;

        drop(unread);
        reader.abort();
        let _ = reader.await;
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(pages.pending(), 0);
    }
}
