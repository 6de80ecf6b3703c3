//! HTTP Basic authentication for incoming requests.

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tracing::debug;
use wshttpd_ws::http::{RequestHead, Response};

/// Decides whether a user/password pair may connect.
pub trait Authenticator: Send + Sync {
    /// `true` to accept the credentials.
    fn authenticate(&self, user: &str, password: &str) -> bool;
}

/// Fixed user → password table.
#[derive(Debug, Clone, Default)]
pub struct StaticUsers {
    users: BTreeMap<String, String>,
}

impl StaticUsers {
    /// Accept exactly the pairs in `users`.
    pub fn new(users: BTreeMap<String, String>) -> Self {
        Self { users }
    }
}

impl Authenticator for StaticUsers {
    fn authenticate(&self, user: &str, password: &str) -> bool {
        self.users.get(user).is_some_and(|expected| expected == password)
    }
}

impl<F> Authenticator for F
where
    F: Fn(&str, &str) -> bool + Send + Sync,
{
    fn authenticate(&self, user: &str, password: &str) -> bool {
        self(user, password)
    }
}

/// Why an `Authorization` header could not be read.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CredentialsError {
    /// Scheme other than `Basic`.
    #[error("unsupported authorization scheme")]
    Scheme,
    /// Token is not valid base64.
    #[error("credentials are not valid base64")]
    Encoding,
    /// Decoded token has no `:` separator or is not UTF-8.
    #[error("malformed credentials")]
    Malformed,
}

/// Split a `Basic <base64(user:password)>` header value.
pub fn decode_basic(value: &str) -> Result<(String, String), CredentialsError> {
    let (scheme, token) = value.trim().split_once(' ').ok_or(CredentialsError::Scheme)?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return Err(CredentialsError::Scheme);
    }
    let raw = STANDARD
        .decode(token.trim())
        .map_err(|_| CredentialsError::Encoding)?;
    let text = String::from_utf8(raw).map_err(|_| CredentialsError::Malformed)?;
    let (user, password) = text.split_once(':').ok_or(CredentialsError::Malformed)?;
    Ok((user.to_string(), password.to_string()))
}

/// Make `realm` safe inside a quoted header parameter.
pub fn sanitize_realm(realm: &str) -> String {
    realm
        .chars()
        .map(|c| match c {
            '\n' | '\r' => ' ',
            '"' => '\'',
            c => c,
        })
        .collect()
}

/// The 401 reply asking the client for credentials.
pub fn challenge(realm: &str) -> Response {
    Response::new(401).header(
        "WWW-Authenticate",
        format!("Basic realm=\"{}\"", sanitize_realm(realm)),
    )
}

/// Check a request's credentials.
///
/// Returns the accepted user name, or the reply to send instead: 401 with a
/// challenge when credentials are missing or refused, 400 when the header
/// cannot be decoded.
pub fn check(
    head: &RequestHead,
    realm: &str,
    authenticator: &dyn Authenticator,
) -> Result<String, Response> {
    let Some(value) = head.headers.get("Authorization") else {
        debug!("no credentials supplied");
        return Err(challenge(realm));
    };
    let (user, password) = decode_basic(value).map_err(|err| {
        debug!(error = %err, "bad authorization header");
        Response::new(400)
    })?;
    if !authenticator.authenticate(&user, &password) {
        debug!(user = %user, "credentials refused");
        return Err(challenge(realm));
    }
    Ok(user)
}
