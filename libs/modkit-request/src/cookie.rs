//! Request cookies and cookie jars.
//!
//! Cookies added with [`RequestBuilder::cookie`](crate::RequestBuilder::cookie)
//! are sent as-is. A [`CookieJar`] attached with
//! [`RequestBuilder::cookie_jar`](crate::RequestBuilder::cookie_jar) is asked for
//! matching cookies when the request is assembled and receives the response's
//! `Set-Cookie` headers once the request completes.

use http::HeaderMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use url::Url;

/// A single cookie.
///
/// Only `name` and `value` go on the wire; the attributes are used by jars to
/// decide whether the cookie matches a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub path: Option<String>,
    pub domain: Option<String>,
    pub secure: bool,
    pub expires: Option<String>,
    pub same_site: Option<String>,
    pub http_only: bool,
}

impl Cookie {
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            path: None,
            domain: None,
            secure: false,
            expires: None,
            same_site: None,
            http_only: false,
        }
    }

    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    #[must_use]
    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Whether this cookie should be sent to `url`.
    #[must_use]
    pub fn matches(&self, url: &Url) -> bool {
        let host = url.host_str().unwrap_or_default();
        let domain_ok = match &self.domain {
            Some(domain) => host == domain || host.ends_with(&format!(".{domain}")),
            None => true,
        };
        let path_ok = match &self.path {
            Some(path) => url.path().starts_with(path.as_str()),
            None => true,
        };
        domain_ok && path_ok && (!self.secure || url.scheme() == "https")
    }

    /// Parse one `Set-Cookie` header value.
    ///
    /// When `Path` is absent it defaults to the directory of `url`'s path.
    #[must_use]
    pub fn parse_set_cookie(header: &str, url: &Url) -> Option<Self> {
        let mut parts = header.split(';');
        let (name, value) = parts.next()?.split_once('=')?;
        let name = name.trim();
        if name.is_empty() {
            return None;
        }

        let mut cookie = Cookie::new(name, value.trim());
        for part in parts {
            let part = part.trim();
            if let Some((k, v)) = part.split_once('=') {
                match k.trim().to_ascii_lowercase().as_str() {
                    "path" => cookie.path = Some(v.trim().to_owned()),
                    "domain" => cookie.domain = Some(v.trim().trim_start_matches('.').to_owned()),
                    "expires" => cookie.expires = Some(v.trim().to_owned()),
                    "samesite" => cookie.same_site = Some(normalize_same_site(v.trim())),
                    _ => {}
                }
            } else if part.eq_ignore_ascii_case("secure") {
                cookie.secure = true;
            } else if part.eq_ignore_ascii_case("httponly") {
                cookie.http_only = true;
            }
        }

        if cookie.path.is_none() {
            let default_path = url
                .path()
                .rsplit_once('/')
                .map_or("/", |(dir, _)| if dir.is_empty() { "/" } else { dir });
            cookie.path = Some(default_path.to_owned());
        }
        Some(cookie)
    }
}

fn normalize_same_site(value: &str) -> String {
    if value.eq_ignore_ascii_case("lax") {
        "Lax".to_owned()
    } else if value.eq_ignore_ascii_case("strict") {
        "Strict".to_owned()
    } else if value.eq_ignore_ascii_case("none") {
        "None".to_owned()
    } else {
        value.to_owned()
    }
}

/// Format cookies as a single `Cookie` request header value.
pub(crate) fn header_value<'a>(cookies: impl IntoIterator<Item = &'a Cookie>) -> String {
    cookies
        .into_iter()
        .map(|c| format!("{}={}", c.name, c.value))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Cookie storage shared between requests.
///
/// Implementations are internally synchronized; both methods take `&self`.
pub trait CookieJar: Send + Sync {
    /// Cookies to send with a request to `url`.
    fn cookies(&self, url: &Url) -> Vec<Cookie>;

    /// Record the `Set-Cookie` headers of a response received from `url`.
    fn store_response_cookies(&self, url: &Url, headers: &HeaderMap);
}

/// In-memory cookie jar, bucketed by host.
///
/// Expiry is stored but not enforced.
#[derive(Debug, Default)]
pub struct MemoryCookieJar {
    entries: Mutex<HashMap<String, Vec<Cookie>>>,
}

impl MemoryCookieJar {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a cookie for `url`'s host, replacing one with the same name.
    pub fn insert(&self, url: &Url, cookie: Cookie) {
        let host = url.host_str().unwrap_or_default().to_owned();
        let mut entries = self.entries.lock();
        let bucket = entries.entry(host).or_default();
        if let Some(existing) = bucket.iter_mut().find(|c| c.name == cookie.name) {
            *existing = cookie;
        } else {
            bucket.push(cookie);
        }
    }

    /// Number of stored cookies across all hosts
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl CookieJar for MemoryCookieJar {
    fn cookies(&self, url: &Url) -> Vec<Cookie> {
        let host = url.host_str().unwrap_or_default();
        self.entries
            .lock()
            .iter()
            .filter(|(bucket, _)| *bucket == host || host.ends_with(&format!(".{bucket}")))
            .flat_map(|(_, cookies)| cookies.iter())
            .filter(|c| c.matches(url))
            .cloned()
            .collect()
    }

    fn store_response_cookies(&self, url: &Url, headers: &HeaderMap) {
        for header in headers.get_all(http::header::SET_COOKIE) {
            let Ok(raw) = header.to_str() else {
                continue;
            };
            match Cookie::parse_set_cookie(raw, url) {
                Some(cookie) => self.insert(url, cookie),
                None => tracing::debug!(header = raw, "ignoring malformed Set-Cookie header"),
            }
        }
    }
}
