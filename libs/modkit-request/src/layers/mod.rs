//! Tower pieces wrapped around the hyper client by [`HyperTransport`](crate::HyperTransport).
//!
//! - [`RedirectLimitPolicy`] - redirect cap and cross-origin header stripping

mod redirect;

pub use redirect::RedirectLimitPolicy;
