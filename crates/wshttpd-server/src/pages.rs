//! Replies to plain (non-WebSocket) HTTP requests.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;
use wshttpd_ws::BoxError;
use wshttpd_ws::http::{RequestHead, Response};

use crate::template;

/// A plain HTTP request that did not ask for an upgrade.
#[derive(Debug)]
pub struct PageRequest<'a> {
    /// Parsed request line and headers.
    pub head: &'a RequestHead,
    /// Bytes received after the head.
    pub body: Bytes,
    /// Whether the request arrived over TLS.
    pub encrypted: bool,
    /// Authenticated user, when Basic auth is on.
    pub user: Option<String>,
}

/// Produces the reply for a plain HTTP request. An `Err` becomes a 500.
#[async_trait]
pub trait PageHandler: Send + Sync {
    /// Build the reply for `request`.
    async fn page(&self, request: &PageRequest<'_>) -> Result<Response, BoxError>;
}

/// A file type served from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageType {
    /// File extension without the dot.
    pub extension: String,
    /// `Content-Type` sent with the file.
    pub content_type: String,
    /// Whether `#WEBSOCKET#` placeholders are replaced.
    pub substitute: bool,
}

impl PageType {
    fn new(extension: &str, content_type: &str, substitute: bool) -> Self {
        Self {
            extension: extension.to_owned(),
            content_type: content_type.to_owned(),
            substitute,
        }
    }
}

/// Serves files from a list of directories.
///
/// `html`, `js` and `css` are known out of the box; [`StaticPages::with_type`]
/// adds more. `/` maps to `index`. A path without an extension tries each
/// known extension in every directory, in registration order. `html` and
/// `js` files get `#WEBSOCKET#` substitution.
#[derive(Debug, Clone)]
pub struct StaticPages {
    dirs: Vec<PathBuf>,
    types: Vec<PageType>,
}

impl Default for StaticPages {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl StaticPages {
    /// Search `dirs` in order.
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        Self {
            dirs,
            types: vec![
                PageType::new("html", "text/html;charset=utf-8", true),
                PageType::new("js", "application/javascript;charset=utf-8", true),
                PageType::new("css", "text/css;charset=utf-8", false),
            ],
        }
    }

    /// Serve files ending in `.extension` as `content_type`.
    ///
    /// Registering a known extension again replaces its entry in place, so
    /// lookup order is kept.
    #[must_use]
    pub fn with_type(mut self, extension: &str, content_type: &str, substitute: bool) -> Self {
        let extension = extension.trim_start_matches('.');
        let entry = PageType::new(extension, content_type, substitute);
        match self.types.iter_mut().find(|known| known.extension == extension) {
            Some(known) => *known = entry,
            None => self.types.push(entry),
        }
        self
    }

    /// Configured directories.
    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }

    /// Known page types, in lookup order.
    pub fn types(&self) -> &[PageType] {
        &self.types
    }

    async fn find(&self, name: &str) -> Option<(PathBuf, usize)> {
        let explicit = Path::new(name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| self.types.iter().position(|known| known.extension == ext));
        match explicit {
            Some(None) => None,
            Some(Some(index)) => {
                for dir in &self.dirs {
                    let candidate = dir.join(name);
                    if is_file(&candidate).await {
                        return Some((candidate, index));
                    }
                }
                None
            }
            None => {
                for (index, page_type) in self.types.iter().enumerate() {
                    for dir in &self.dirs {
                        let candidate = dir.join(format!("{name}.{}", page_type.extension));
                        if is_file(&candidate).await {
                            return Some((candidate, index));
                        }
                    }
                }
                None
            }
        }
    }
}

#[async_trait]
impl PageHandler for StaticPages {
    async fn page(&self, request: &PageRequest<'_>) -> Result<Response, BoxError> {
        if self.dirs.is_empty() {
            return Ok(Response::new(501));
        }
        let name = page_name(request.head.path());
        let Some((path, index)) = self.find(&name).await else {
            debug!(page = %name, "page not found");
            return Ok(Response::new(404));
        };
        let page_type = &self.types[index];
        let body = tokio::fs::read(&path).await?;
        let body = if page_type.substitute {
            let host = request.head.headers.get("Host").unwrap_or("localhost");
            let text = String::from_utf8(body)?;
            template::substitute(&text, host, request.encrypted).into_bytes()
        } else {
            body
        };
        debug!(path = %path.display(), len = body.len(), "serving page");
        Ok(Response::new(200).with_body(&page_type.content_type, body))
    }
}

/// Relative file name for a request path. Empty, `.` and `..` segments are
/// dropped so the result never leaves the served directory.
pub fn page_name(path: &str) -> String {
    let segments: Vec<&str> = path
        .split('/')
        .filter(|segment| !matches!(*segment, "" | "." | ".."))
        .collect();
    if segments.is_empty() {
        "index".to_string()
    } else {
        segments.join("/")
    }
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .is_ok_and(|meta| meta.is_file())
}
