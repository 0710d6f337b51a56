#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! Fluent HTTP request builder for `ModKit`
//!
//! A [`RequestBuilder`] collects method, URL, headers, query values, a body
//! and execution options, then sends once and decodes the response:
//! - Header set/add/merge and ordered, repeatable query values
//! - Raw JSON, urlencoded form or `multipart/form-data` bodies
//! - Basic auth, cookies and cookie jars
//! - Per-request timeout, redirect cap and HTTP/SOCKS5 proxy
//! - gzip/deflate response decoding with text and JSON helpers
//!
//! Configuration errors do not break the chain; the first one is kept and
//! returned by `send()`. The outcome of `send()` is memoized.
//!
//! Status codes of 400 and above are not send errors. The decoders return a
//! [`Decoded`] value carrying the status, so an error payload can still be
//! read before turning the status into [`HttpError::StatusNotOk`].
//!
//! # Example
//!
//! ```ignore
//! use modkit_request::Client;
//! use std::time::Duration;
//!
//! let client = Client::builder()
//!     .timeout(Duration::from_secs(10))
//!     .build()?;
//!
//! let mut req = client
//!     .post("https://api.example.com/items")
//!     .set("x-request-id", "42")
//!     .send_json(&serde_json::json!({"name": "widget"}))
//!     .redirects(3);
//!
//! let (body, status_err) = req.json_map().await?.into_parts();
//! ```

mod body;
mod builder;
mod client;
mod config;
mod cookie;
mod decode;
mod error;
mod hyper_transport;
mod layers;
mod request;
mod response;
mod tls;
mod transport;
mod values;

pub use body::{BodyKind, FilePart, MultipartForm};
pub use builder::ClientBuilder;
pub use client::{Client, delete, get, head, patch, post, put, request};
pub use config::{
    ClientConfig, DEFAULT_MAX_BODY_SIZE, DEFAULT_MAX_REDIRECTS, DEFAULT_USER_AGENT, Proxy,
    RedirectPolicy, TlsRootConfig,
};
pub use cookie::{Cookie, CookieJar, MemoryCookieJar};
pub use decode::decompress;
pub use error::{HttpError, InvalidUriKind};
pub use hyper_transport::HyperTransport;
pub use layers::RedirectLimitPolicy;
pub use request::RequestBuilder;
pub use response::{Decoded, HttpResponse};
pub use transport::{FinalUri, ResponseBody, Transport, TransportFuture, TransportOptions};
pub use values::Values;
