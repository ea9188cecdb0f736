//! Script body rewriting.
//!
//! Two textual rewrites over UTF-8 bytes. Both patterns are ASCII, which
//! never occurs inside a UTF-8 multibyte sequence, so the pipeline re-encodes
//! other charsets before calling in:
//!
//! - every `location` identifier becomes `__location`, which the in-page
//!   layer maps back to the real target location;
//! - `postMessage(` calls get the calling window prepended as first argument:
//!   `postMessage(...__set_srcWin(), `.

const LOCATION: &[u8] = b"location";
const POST_MESSAGE: &[u8] = b"postMessage";
const SRC_WIN_ARG: &[u8] = b"...__set_srcWin(), ";

fn is_word(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Rewrites `code`. Returns `None` when nothing matched.
pub fn rewrite(code: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(code.len() + 64);
    let mut matched = false;
    let mut i = 0;

    while i < code.len() {
        let rest = &code[i..];

        if rest.starts_with(LOCATION) {
            let before_ok = i == 0 || !is_word(code[i - 1]);
            let after_ok = rest.get(LOCATION.len()).map_or(true, |b| !is_word(*b));
            if before_ok && after_ok {
                out.extend_from_slice(b"__location");
                i += LOCATION.len();
                matched = true;
                continue;
            }
        }

        if rest.starts_with(POST_MESSAGE) {
            let mut j = POST_MESSAGE.len();
            while rest.get(j).is_some_and(|b| b.is_ascii_whitespace()) {
                j += 1;
            }
            if rest.get(j) == Some(&b'(') {
                out.extend_from_slice(&rest[..=j]);
                out.extend_from_slice(SRC_WIN_ARG);
                i += j + 1;
                matched = true;
                continue;
            }
        }

        out.push(code[i]);
        i += 1;
    }

    matched.then_some(out)
}
