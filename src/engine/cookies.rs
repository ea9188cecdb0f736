// src/engine/cookies.rs
//! Cookies: [`Cookie`], the trie-indexed [`CookieJar`] and its persistence wrapper.

mod cookies;
mod cookie_jar;
mod persistent_cookie_jar;
mod trie;

pub use cookies::Cookie;
pub use cookie_jar::CookieJar;
pub use cookie_jar::CookieJarHandle;
pub use persistent_cookie_jar::PersistentCookieJar;
pub use trie::CookieTrieNode;
