//! Ordered key/value accumulation for headers, query strings and form fields.

use crate::error::{HttpError, SharedError};
use http::header::{HeaderMap, HeaderName, HeaderValue};
use std::sync::Arc;

/// Ordered multimap of string pairs.
///
/// Keeps insertion order and allows repeated keys, which is what query strings
/// and `application/x-www-form-urlencoded` bodies need.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Values(Vec<(String, String)>);

impl Values {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode an urlencoded string (`a=1&b=2`).
    ///
    /// # Errors
    /// Returns `HttpError::Encoding` if the input is not valid urlencoded data.
    pub fn parse(input: &str) -> Result<Self, HttpError> {
        serde_urlencoded::from_str::<Vec<(String, String)>>(input)
            .map(Self)
            .map_err(|e| HttpError::Encoding(Arc::new(e) as SharedError))
    }

    /// First value for `key`
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// All values for `key`, in insertion order
    #[must_use]
    pub fn get_all(&self, key: &str) -> Vec<&str> {
        self.0
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Encode as `application/x-www-form-urlencoded`.
    ///
    /// # Errors
    /// Returns `HttpError::Encoding` if serialization fails.
    pub fn encode(&self) -> Result<String, HttpError> {
        serde_urlencoded::to_string(&self.0)
            .map_err(|e| HttpError::Encoding(Arc::new(e) as SharedError))
    }
}

impl<K, V> Extend<(K, V)> for Values
where
    K: Into<String>,
    V: Into<String>,
{
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        self.0
            .extend(iter.into_iter().map(|(k, v)| (k.into(), v.into())));
    }
}

impl<K, V> FromIterator<(K, V)> for Values
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut values = Self::new();
        values.extend(iter);
        values
    }
}

/// Parse a header name/value pair.
pub(crate) fn parse_header(name: &str, value: &str) -> Result<(HeaderName, HeaderValue), HttpError> {
    let header_name =
        HeaderName::try_from(name).map_err(|e| HttpError::InvalidHeader {
            name: name.to_owned(),
            reason: e.to_string(),
        })?;
    let header_value = HeaderValue::try_from(value).map_err(|e| HttpError::InvalidHeader {
        name: name.to_owned(),
        reason: e.to_string(),
    })?;
    Ok((header_name, header_value))
}

/// Merge `incoming` into `headers`: each incoming key replaces every existing
/// value for that key, keys absent from `incoming` are untouched.
pub(crate) fn merge_headers(headers: &mut HeaderMap, incoming: &HeaderMap) {
    for key in incoming.keys() {
        headers.remove(key);
        for value in incoming.get_all(key) {
            headers.append(key.clone(), value.clone());
        }
    }
}

/// Expand a short content-type alias (`json`, `form`, ...) to its MIME type.
///
/// Unknown values are returned unchanged.
pub(crate) fn expand_mime_alias(value: &str) -> &str {
    match value.to_ascii_lowercase().as_str() {
        "html" => "text/html",
        "json" => "application/json",
        "xml" => "application/xml",
        "text" => "text/plain",
        "urlencoded" | "form" | "form-data" => "application/x-www-form-urlencoded",
        "multipart" => "multipart/form-data",
        _ => value,
    }
}
