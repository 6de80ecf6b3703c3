//! `#WEBSOCKET#` placeholder substitution for served pages.
//!
//! A page may contain `#WEBSOCKET#` or `#WEBSOCKET+<expr>#`. Each is
//! replaced by a JavaScript expression that opens a socket back to the
//! server that served the page, using `wss://` when the request arrived
//! over TLS. `<expr>` is concatenated onto the URL, e.g.
//! `#WEBSOCKET+'/rpc'#`.

use std::sync::LazyLock;

use regex::{Captures, Regex};

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"#WEBSOCKET(?:\+(.*?))?#").unwrap());

/// `ws://` or `wss://`.
pub fn scheme(encrypted: bool) -> &'static str {
    if encrypted { "wss://" } else { "ws://" }
}

/// Replace every placeholder in `page` with a constructor for a socket to
/// `host`.
pub fn substitute(page: &str, host: &str, encrypted: bool) -> String {
    let base = format!("{}{host}", scheme(encrypted));
    PLACEHOLDER
        .replace_all(page, |caps: &Captures<'_>| {
            let extra = caps
                .get(1)
                .map(|m| format!(" + {}", m.as_str()))
                .unwrap_or_default();
            format!(
                "function () {{\n\t\t\tif (window.hasOwnProperty ('MozWebSocket'))\n\t\t\t\treturn new MozWebSocket ('{base}'{extra});\n\t\t\telse\n\t\t\t\treturn new WebSocket ('{base}'{extra});\n\t\t}} ()"
            )
        })
        .into_owned()
}
