//! Redirect policy driving tower-http's `FollowRedirect`.
//!
//! Each hop is checked against the request's [`RedirectPolicy`]. When the cap
//! is hit the policy stops following and raises a shared flag; the transport
//! turns that flag into [`HttpError::TooManyRedirects`](crate::HttpError::TooManyRedirects)
//! instead of handing the 3xx response back.
//!
//! After the first cross-origin hop `Authorization`, `Cookie` and
//! `Proxy-Authorization` are removed from every following request.

use crate::config::RedirectPolicy;
use http::{Request, Uri, header};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tower_http::follow_redirect::policy::{Action, Attempt, Policy};

const SENSITIVE_HEADERS: &[header::HeaderName] = &[
    header::AUTHORIZATION,
    header::COOKIE,
    header::PROXY_AUTHORIZATION,
];

#[derive(Debug, Clone)]
pub struct RedirectLimitPolicy {
    policy: RedirectPolicy,
    followed: usize,
    cross_origin: bool,
    exceeded: Arc<AtomicBool>,
}

impl RedirectLimitPolicy {
    #[must_use]
    pub fn new(policy: RedirectPolicy) -> Self {
        Self {
            policy,
            followed: 0,
            cross_origin: false,
            exceeded: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag raised when a redirect was refused because of the cap.
    ///
    /// Shared with every clone made by `FollowRedirect`.
    #[must_use]
    pub fn exceeded_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.exceeded)
    }

    /// Scheme, host and port comparison. A missing scheme counts as https.
    fn is_same_origin(previous: &Uri, target: &Uri) -> bool {
        let prev_scheme = previous.scheme_str().unwrap_or("https");
        let target_scheme = target.scheme_str().unwrap_or("https");

        let prev_port = previous
            .port_u16()
            .unwrap_or_else(|| default_port(prev_scheme));
        let target_port = target
            .port_u16()
            .unwrap_or_else(|| default_port(target_scheme));

        prev_scheme == target_scheme
            && previous.host().unwrap_or("") == target.host().unwrap_or("")
            && prev_port == target_port
    }
}

fn default_port(scheme: &str) -> u16 {
    match scheme {
        "http" => 80,
        "https" => 443,
        _ => 0,
    }
}

impl<B: Clone, E> Policy<B, E> for RedirectLimitPolicy {
    fn redirect(&mut self, attempt: &Attempt<'_>) -> Result<Action, E> {
        if let Err(err) = self.policy.check(self.followed) {
            tracing::debug!(
                followed = self.followed,
                max = self.policy.max_redirects,
                location = %attempt.location(),
                "{err}"
            );
            self.exceeded.store(true, Ordering::SeqCst);
            return Ok(Action::Stop);
        }
        self.followed += 1;

        if !Self::is_same_origin(attempt.previous(), attempt.location()) {
            tracing::debug!(
                previous = %attempt.previous(),
                target = %attempt.location(),
                "cross-origin redirect"
            );
            self.cross_origin = true;
        }
        Ok(Action::Follow)
    }

    fn on_request(&mut self, request: &mut Request<B>) {
        if !self.cross_origin {
            return;
        }
        let headers = request.headers_mut();
        for name in SENSITIVE_HEADERS {
            if headers.remove(name).is_some() {
                tracing::warn!(header = %name, "stripped sensitive header on cross-origin redirect");
            }
        }
    }

    // 307/308 resend the original body
    fn clone_body(&self, body: &B) -> Option<B> {
        Some(body.clone())
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    fn uri(s: &str) -> Uri {
        s.parse().unwrap()
    }

    #[test]
    fn test_same_origin() {
        assert!(RedirectLimitPolicy::is_same_origin(
            &uri("https://example.com/a"),
            &uri("https://example.com:443/b")
        ));
        assert!(!RedirectLimitPolicy::is_same_origin(
            &uri("https://example.com/a"),
            &uri("http://example.com/b")
        ));
        assert!(!RedirectLimitPolicy::is_same_origin(
            &uri("http://127.0.0.1:8080/a"),
            &uri("http://127.0.0.1:8081/a")
        ));
        assert!(!RedirectLimitPolicy::is_same_origin(
            &uri("https://example.com/a"),
            &uri("https://other.com/a")
        ));
    }

    #[test]
    fn test_strips_headers_only_after_cross_origin() {
        let mut policy = RedirectLimitPolicy::new(RedirectPolicy::default());
        let mut request = Request::builder()
            .uri("http://other.com/")
            .header(header::AUTHORIZATION, "Basic Zm9vOmJhcg==")
            .header(header::COOKIE, "sid=1")
            .header("x-custom", "kept")
            .body(())
            .unwrap();

        Policy::<(), ()>::on_request(&mut policy, &mut request);
        assert!(request.headers().contains_key(header::AUTHORIZATION));

        policy.cross_origin = true;
        Policy::<(), ()>::on_request(&mut policy, &mut request);
        assert!(!request.headers().contains_key(header::AUTHORIZATION));
        assert!(!request.headers().contains_key(header::COOKIE));
        assert_eq!(request.headers().get("x-custom").unwrap(), "kept");
    }

    #[test]
    fn test_stripping_emits_warning() {
        use std::sync::Mutex;
        use tracing_subscriber::layer::SubscriberExt;

        #[derive(Clone, Default)]
        struct WarningCapture {
            warnings: Arc<Mutex<Vec<String>>>,
        }

        impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for WarningCapture {
            fn on_event(
                &self,
                event: &tracing::Event<'_>,
                _ctx: tracing_subscriber::layer::Context<'_, S>,
            ) {
                if *event.metadata().level() == tracing::Level::WARN {
                    let mut visitor = MessageVisitor(String::new());
                    event.record(&mut visitor);
                    self.warnings.lock().unwrap().push(visitor.0);
                }
            }
        }

        struct MessageVisitor(String);
        impl tracing::field::Visit for MessageVisitor {
            fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
                if field.name() == "message" {
                    self.0 = format!("{value:?}");
                }
            }
        }

        let capture = WarningCapture::default();
        let warnings = capture.warnings.clone();
        let subscriber = tracing_subscriber::registry().with(capture);

        let mut policy = RedirectLimitPolicy::new(RedirectPolicy::default());
        policy.cross_origin = true;
        let mut request = Request::builder()
            .uri("http://other.com/")
            .header(header::COOKIE, "sid=1")
            .body(())
            .unwrap();

        tracing::subscriber::with_default(subscriber, || {
            Policy::<(), ()>::on_request(&mut policy, &mut request);
        });

        let captured = warnings.lock().unwrap();
        assert_eq!(captured.len(), 1, "got: {:?}", *captured);
        assert!(captured[0].contains("stripped sensitive header"));
    }

    #[test]
    fn test_exceeded_flag_shared_between_clones() {
        let policy = RedirectLimitPolicy::new(RedirectPolicy::none());
        let flag = policy.exceeded_flag();
        let clone = policy.clone();
        clone.exceeded.store(true, Ordering::SeqCst);
        assert!(flag.load(Ordering::SeqCst));
    }
}
