//! Ordered fallback dispatch across registered request handlers.
//!
//! The director owns the handler list and the shared configuration. Handlers
//! registered later have higher priority: dispatch walks the list in reverse
//! registration order, so the most recently added handler gets the first
//! attempt. Only [`RequestError::Unsupported`] (and a handler panicking or
//! silently producing nothing) falls through to the next handler; any other
//! error is authoritative and aborts the call.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use tracing::{debug, instrument, warn};

use crate::config::NetConfig;
use crate::cookies::CookieJar;
use crate::error::RequestError;
use crate::handler::{HttpHandler, RequestHandler};
use crate::request::Request;
use crate::response::Response;

/// Dispatches requests to the highest-priority handler that accepts them.
pub struct RequestDirector {
    handlers: Vec<Arc<dyn RequestHandler>>,
    config: Arc<NetConfig>,
}

impl RequestDirector {
    /// Creates a director with no handlers registered.
    #[must_use]
    pub fn new(config: Arc<NetConfig>) -> Self {
        Self {
            handlers: Vec::new(),
            config,
        }
    }

    /// Registers a handler with priority above all currently registered
    /// ones. Re-registering the same instance is a no-op.
    pub fn add_handler(&mut self, handler: Arc<dyn RequestHandler>) {
        if self
            .handlers
            .iter()
            .any(|existing| Arc::ptr_eq(existing, &handler))
        {
            return;
        }
        debug!(handler = handler.name(), "registering request handler");
        self.handlers.push(handler);
    }

    /// Removes one previously registered handler instance.
    pub fn remove_handler(&mut self, handler: &Arc<dyn RequestHandler>) {
        self.handlers
            .retain(|existing| !Arc::ptr_eq(existing, handler));
    }

    /// Removes every handler carrying `name`.
    pub fn remove_handlers_named(&mut self, name: &str) {
        self.handlers.retain(|existing| existing.name() != name);
    }

    /// Replaces all handlers named like `handler` with `handler` itself,
    /// keeping its priority at the top.
    pub fn replace_handler(&mut self, handler: Arc<dyn RequestHandler>) {
        self.remove_handlers_named(handler.name());
        self.add_handler(handler);
    }

    /// All registered handlers carrying `name`.
    #[must_use]
    pub fn get_handlers_named(&self, name: &str) -> Vec<Arc<dyn RequestHandler>> {
        self.handlers
            .iter()
            .filter(|existing| existing.name() == name)
            .cloned()
            .collect()
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handler is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Closes every handler, releasing backend connection resources.
    pub fn close(&self) {
        for handler in &self.handlers {
            handler.close();
        }
    }

    /// Sends `request` through the highest-priority handler that accepts it.
    ///
    /// The request itself is never mutated: each attempt works on a fresh
    /// clone, so a handler that rewrites headers or proxies during pre-flight
    /// cannot poison later attempts.
    ///
    /// # Errors
    ///
    /// [`RequestError::NoHandlers`] when none are registered, the first
    /// authoritative handler error otherwise, and [`RequestError::Exhausted`]
    /// aggregating the per-handler reasons when every handler declined.
    #[instrument(level = "debug", skip_all, fields(url = request.url(), method = request.method()))]
    pub async fn send(&self, request: &Request) -> Result<Response, RequestError> {
        if self.handlers.is_empty() {
            return Err(RequestError::NoHandlers);
        }

        let mut unsupported: Vec<RequestError> = Vec::new();
        let mut unexpected: usize = 0;

        for handler in self.handlers.iter().rev() {
            let name = handler.name();
            let mut attempt = request.clone();
            if let Err(err) = handler.prepare(&mut attempt, &self.config) {
                if err.is_fallback() {
                    debug!(handler = name, %err, "handler declined request");
                    unsupported.push(err.with_handler(name));
                    continue;
                }
                return Err(err.with_handler(name));
            }

            debug!(handler = name, url = attempt.url(), "forwarding request to request handler");
            let outcome = AssertUnwindSafe(handler.execute(&attempt))
                .catch_unwind()
                .await;
            match outcome {
                Ok(Ok(Some(response))) => return Ok(response),
                Ok(Ok(None)) => {
                    warn!(handler = name, "handler returned no response, trying next");
                    unexpected += 1;
                }
                Ok(Err(err)) if err.is_fallback() => {
                    debug!(handler = name, %err, "handler declined request");
                    unsupported.push(err.with_handler(name));
                }
                Ok(Err(err)) => return Err(err.with_handler(name)),
                Err(panic) => {
                    warn!(
                        handler = name,
                        reason = panic_message(panic.as_ref()),
                        "handler panicked, trying next"
                    );
                    unexpected += 1;
                }
            }
        }

        Err(RequestError::exhausted(&unsupported, unexpected))
    }

    /// Convenience wrapper building a GET [`Request`] for `url` and sending
    /// it.
    ///
    /// # Errors
    ///
    /// [`RequestError::InvalidUrl`] when the URL does not parse, plus
    /// everything [`send`](Self::send) can return.
    pub async fn send_url(&self, url: &str) -> Result<Response, RequestError> {
        self.send(&Request::new(url)?).await
    }
}

impl std::fmt::Debug for RequestDirector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestDirector")
            .field(
                "handlers",
                &self
                    .handlers
                    .iter()
                    .map(|handler| handler.name())
                    .collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Builds a director with the built-in handlers registered.
///
/// A handler whose construction fails (a broken client certificate, say) is
/// skipped with a warning rather than failing the whole director; requests
/// that only it could serve will surface the gap as an exhaustion error.
#[must_use]
pub fn build_default_director(
    config: Arc<NetConfig>,
    cookie_jar: Option<Arc<CookieJar>>,
) -> RequestDirector {
    let mut director = RequestDirector::new(Arc::clone(&config));
    match HttpHandler::new(&config, cookie_jar) {
        Ok(handler) => director.add_handler(Arc::new(handler)),
        Err(err) => warn!(%err, "skipping HTTP handler"),
    }
    director
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::response::{BufferBody, Response};

    /// Scripted handler used to drive dispatch through each outcome.
    struct ScriptedHandler {
        name: &'static str,
        schemes: &'static [&'static str],
        outcome: Outcome,
    }

    enum Outcome {
        Respond(u16),
        Nothing,
        Fail(fn() -> RequestError),
        Panic,
    }

    impl ScriptedHandler {
        fn arc(
            name: &'static str,
            schemes: &'static [&'static str],
            outcome: Outcome,
        ) -> Arc<dyn RequestHandler> {
            Arc::new(Self {
                name,
                schemes,
                outcome,
            })
        }
    }

    #[async_trait]
    impl RequestHandler for ScriptedHandler {
        fn name(&self) -> &'static str {
            self.name
        }

        fn supported_schemes(&self) -> &'static [&'static str] {
            self.schemes
        }

        async fn execute(&self, request: &Request) -> Result<Option<Response>, RequestError> {
            match &self.outcome {
                Outcome::Respond(status) => Ok(Some(Response::new(
                    Box::new(BufferBody::new(self.name.as_bytes().to_vec())),
                    request.url().to_string(),
                    reqwest::header::HeaderMap::new(),
                    *status,
                    None,
                ))),
                Outcome::Nothing => Ok(None),
                Outcome::Fail(make) => Err(make()),
                Outcome::Panic => panic!("scripted handler panic"),
            }
        }
    }

    fn director() -> RequestDirector {
        RequestDirector::new(Arc::new(NetConfig::default()))
    }

    async fn body_of(mut response: Response) -> String {
        String::from_utf8(response.read(None).await.unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_empty_director_fails_fast() {
        let err = director()
            .send(&Request::new("http://example.com/").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, RequestError::NoHandlers));
    }

    #[tokio::test]
    async fn test_later_registration_wins() {
        let mut director = director();
        director.add_handler(ScriptedHandler::arc(
            "first",
            &["http"],
            Outcome::Respond(200),
        ));
        director.add_handler(ScriptedHandler::arc(
            "second",
            &["http"],
            Outcome::Respond(200),
        ));

        let response = director
            .send(&Request::new("http://example.com/").unwrap())
            .await
            .unwrap();
        assert_eq!(
            body_of(response).await,
            "second",
            "the most recently registered handler must be tried first"
        );
    }

    #[tokio::test]
    async fn test_unsupported_scheme_falls_through() {
        let mut director = director();
        director.add_handler(ScriptedHandler::arc(
            "narrow",
            &["http"],
            Outcome::Respond(200),
        ));
        director.add_handler(ScriptedHandler::arc(
            "wide",
            &["http", "https"],
            Outcome::Respond(200),
        ));

        let response = director
            .send(&Request::new("https://example.com/").unwrap())
            .await
            .unwrap();
        assert_eq!(body_of(response).await, "wide");
    }

    #[tokio::test]
    async fn test_all_decline_aggregates_reasons() {
        let mut director = director();
        director.add_handler(ScriptedHandler::arc(
            "a",
            &["http"],
            Outcome::Respond(200),
        ));
        director.add_handler(ScriptedHandler::arc(
            "b",
            &["http"],
            Outcome::Respond(200),
        ));

        let err = director
            .send(&Request::new("ftp://example.com/file").unwrap())
            .await
            .unwrap_err();
        let msg = err.to_string();
        assert!(
            msg.contains("ftp scheme is not supported"),
            "aggregate must carry the shared reason: {msg}"
        );
        assert!(
            msg.contains("b, a") || msg.contains("a, b"),
            "aggregate must name the declining handlers: {msg}"
        );
    }

    #[tokio::test]
    async fn test_transport_error_aborts_dispatch() {
        let mut director = director();
        director.add_handler(ScriptedHandler::arc(
            "reachable",
            &["http"],
            Outcome::Respond(200),
        ));
        director.add_handler(ScriptedHandler::arc("failing", &["http"], Outcome::Fail(
            || RequestError::transport("connection refused"),
        )));

        let err = director
            .send(&Request::new("http://example.com/").unwrap())
            .await
            .unwrap_err();
        assert!(
            matches!(err, RequestError::Transport { .. }),
            "authoritative errors must not fall through: {err}"
        );
        assert_eq!(err.handler(), Some("failing"));
    }

    #[tokio::test]
    async fn test_panicking_handler_falls_through() {
        let mut director = director();
        director.add_handler(ScriptedHandler::arc(
            "stable",
            &["http"],
            Outcome::Respond(200),
        ));
        director.add_handler(ScriptedHandler::arc("crashy", &["http"], Outcome::Panic));

        let response = director
            .send(&Request::new("http://example.com/").unwrap())
            .await
            .unwrap();
        assert_eq!(body_of(response).await, "stable");
    }

    #[tokio::test]
    async fn test_silent_handler_falls_through() {
        let mut director = director();
        director.add_handler(ScriptedHandler::arc(
            "stable",
            &["http"],
            Outcome::Respond(200),
        ));
        director.add_handler(ScriptedHandler::arc("silent", &["http"], Outcome::Nothing));

        let response = director
            .send(&Request::new("http://example.com/").unwrap())
            .await
            .unwrap();
        assert_eq!(body_of(response).await, "stable");
    }

    #[tokio::test]
    async fn test_only_unexpected_failures_count_in_exhaustion() {
        let mut director = director();
        director.add_handler(ScriptedHandler::arc("silent", &["http"], Outcome::Nothing));
        director.add_handler(ScriptedHandler::arc("crashy", &["http"], Outcome::Panic));

        let err = director
            .send(&Request::new("http://example.com/").unwrap())
            .await
            .unwrap_err();
        let msg = err.to_string();
        assert!(
            msg.contains("2 unexpected error(s)"),
            "panics and silent returns are counted, not named: {msg}"
        );
    }

    #[test]
    fn test_duplicate_registration_is_noop() {
        let mut director = director();
        let handler = ScriptedHandler::arc("once", &["http"], Outcome::Respond(200));
        director.add_handler(Arc::clone(&handler));
        director.add_handler(handler);
        assert_eq!(director.len(), 1);
    }

    #[test]
    fn test_remove_and_replace() {
        let mut director = director();
        let first = ScriptedHandler::arc("dup", &["http"], Outcome::Respond(200));
        let second = ScriptedHandler::arc("dup", &["http"], Outcome::Respond(201));
        let other = ScriptedHandler::arc("other", &["http"], Outcome::Respond(200));
        director.add_handler(Arc::clone(&first));
        director.add_handler(Arc::clone(&other));

        director.replace_handler(Arc::clone(&second));
        assert_eq!(director.len(), 2);
        let named = director.get_handlers_named("dup");
        assert_eq!(named.len(), 1);
        assert!(Arc::ptr_eq(&named[0], &second));

        director.remove_handler(&other);
        assert_eq!(director.len(), 1);

        director.remove_handlers_named("dup");
        assert!(director.is_empty());
    }
}
