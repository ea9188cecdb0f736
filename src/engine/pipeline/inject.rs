//! Snippets injected into proxied content.

use url::Url;

use crate::engine::url_codec::UrlCodec;

/// Origins frames and plugins may load from, besides proxied URLs.
const CSP_SOURCES: &str =
    "'self' 'unsafe-inline' file: data: blob: mediastream: filesystem: chrome-extension-resource:";

/// Keeps the prologue above the size some browsers sniff before rendering.
const PADDING_LEN: usize = 500;

/// Prepended to scripts. Inside a worker it restores the proxy root and
/// loads the helper, which nested workers otherwise never see.
pub fn worker_bootstrap(codec: &UrlCodec) -> String {
    format!(
        "if (typeof importScripts === 'function' && !self.window) {{\n  self.__PATH__ = '{}';\n  importScripts('{}');\n}}\n",
        codec.root(),
        codec.helper_js()
    )
}

/// Emitted before the first byte of a proxied HTML document.
pub fn html_prologue(codec: &UrlCodec, target: &Url, page_id: u64) -> String {
    let icon = format!(
        "{}{}/favicon.ico",
        codec.prefix(),
        target.origin().ascii_serialization()
    );
    format!(
        "<!doctype html>\n\
         <link rel=\"icon\" href=\"{icon}\" type=\"image/x-icon\">\n\
         <meta http-equiv=\"content-security-policy\" content=\"frame-src {csp}; object-src {csp}\">\n\
         <base href=\"{base}\">\n\
         <script data-id=\"{page_id}\" src=\"{helper}\"></script>\n\
         <!-- {padding} -->\n\n",
        icon = icon,
        csp = CSP_SOURCES,
        base = html_escape_attr(target.as_str()),
        page_id = page_id,
        helper = codec.helper_js(),
        padding = " ".repeat(PADDING_LEN),
    )
}

fn html_escape_attr(s: &str) -> String {
    s.replace('&', "&amp;").replace('"', "&quot;")
}
