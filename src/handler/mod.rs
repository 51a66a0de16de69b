//! Polymorphic backend adapters and the shared request pre-flight.
//!
//! A [`RequestHandler`] wraps one transport library behind a fixed set of
//! URL schemes. The director owns an ordered list of them and dispatches to
//! the first one that accepts a request. The pre-flight in
//! [`RequestHandler::prepare`] is implemented once here and inherited by all
//! implementations: scheme policy, default-header merging, per-request
//! signaling headers, proxy precedence and timeout coercion.

mod http;
mod tls;

pub use http::HttpHandler;
pub use tls::TlsSettings;

use async_trait::async_trait;
use tracing::debug;

use crate::config::{DEFAULT_TIMEOUT_SECS, NO_PROXY, NetConfig};
use crate::error::RequestError;
use crate::request::Request;
use crate::response::Response;

/// Per-request signaling header that disables compression. Consumed by the
/// pre-flight and never sent on the wire.
pub const NO_COMPRESSION_HEADER: &str = "Grabber-No-Compression";

/// Per-request signaling header carrying an ad-hoc proxy override. Consumed
/// by the pre-flight and never sent on the wire.
pub const REQUEST_PROXY_HEADER: &str = "Grabber-Request-Proxy";

/// A backend adapter capable of executing requests for a declared set of
/// URL schemes.
///
/// Implementations are stateless per call: they own no request state between
/// calls, though they may keep a connection pool internally (opaque to the
/// director). They must not mutate shared request state, must honor
/// `allow_redirects`, and must apply the prepared TLS settings whenever the
/// scheme requires encryption.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Short name used in logs and error attribution, conventionally the
    /// backing transport library.
    fn name(&self) -> &'static str;

    /// URL schemes this handler accepts, lowercase.
    fn supported_schemes(&self) -> &'static [&'static str];

    /// Shared pre-flight, implemented once for all handlers.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::FileSchemeDisabled`] for `file:` URLs (a
    /// security policy every handler enforces, not a capability mismatch),
    /// [`RequestError::Unsupported`] for schemes outside
    /// [`supported_schemes`](Self::supported_schemes).
    fn prepare(&self, request: &mut Request, config: &NetConfig) -> Result<(), RequestError> {
        prepare_request(request, config, self.supported_schemes())
    }

    /// Builds the TLS verification settings this handler should apply for
    /// encrypted schemes.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::ClientCertificate`] when a configured client
    /// certificate cannot be loaded; fatal, never retried.
    fn make_tls_settings(&self, config: &NetConfig) -> Result<TlsSettings, RequestError> {
        TlsSettings::from_config(config)
    }

    /// Performs the network call for a prepared request.
    ///
    /// `Ok(None)` means the backend silently produced nothing; the director
    /// treats that as non-authoritative and falls through to the next
    /// handler.
    ///
    /// # Errors
    ///
    /// Classified [`RequestError`] values; anything other than
    /// [`RequestError::Unsupported`] aborts dispatch.
    async fn execute(&self, request: &Request) -> Result<Option<Response>, RequestError>;

    /// Releases any backend-held connection resources. Safe to call more
    /// than once.
    fn close(&self) {}
}

/// The shared pre-flight behind [`RequestHandler::prepare`].
pub(crate) fn prepare_request(
    request: &mut Request,
    config: &NetConfig,
    supported_schemes: &[&str],
) -> Result<(), RequestError> {
    check_scheme(request, supported_schemes)?;

    request.headers_mut().merge_defaults(&config.default_headers);

    if request.headers_mut().remove(NO_COMPRESSION_HEADER).is_some() {
        request.enable_compression = false;
    }

    resolve_proxies(request, config);
    resolve_timeout(request, config);
    Ok(())
}

fn check_scheme(request: &Request, supported_schemes: &[&str]) -> Result<(), RequestError> {
    let scheme = request.scheme();
    if scheme == "file" {
        // no handler may ever service this scheme
        return Err(RequestError::FileSchemeDisabled);
    }
    if !supported_schemes.contains(&scheme) {
        return Err(RequestError::unsupported(format!(
            "{scheme} scheme is not supported"
        )));
    }
    Ok(())
}

/// Proxy precedence: per-request proxy header > request proxy map > config
/// proxies > environment proxies. Scheme-less proxy URLs are assumed
/// `http://`; the empty-string sentinel disables proxying for that scheme.
fn resolve_proxies(request: &mut Request, config: &NetConfig) {
    let mut proxies = config.proxies.clone();
    proxies.extend(request.proxies.drain());

    if let Some(override_proxy) = request.headers_mut().remove(REQUEST_PROXY_HEADER) {
        debug!(proxy = %override_proxy, "applying per-request proxy override header");
        proxies.insert("http".to_string(), override_proxy.clone());
        proxies.insert("https".to_string(), override_proxy);
    }

    for value in proxies.values_mut() {
        if value == NO_PROXY || value.contains("://") {
            continue;
        }
        *value = format!("http://{}", value.trim_start_matches("//"));
    }

    for scheme in ["http", "https"] {
        if !proxies.contains_key(scheme)
            && let Some(env_proxy) = env_proxy_for_scheme(scheme)
        {
            proxies.insert(scheme.to_string(), env_proxy);
        }
    }

    request.proxies = proxies;
}

/// Coerces the timeout to the first positive value among the request's own,
/// the configured socket timeout and the built-in default. Zero is never
/// accepted.
fn resolve_timeout(request: &mut Request, config: &NetConfig) {
    let timeout = [request.timeout, config.socket_timeout]
        .into_iter()
        .flatten()
        .find(|timeout| *timeout > 0.0)
        .unwrap_or(DEFAULT_TIMEOUT_SECS);
    request.timeout = Some(timeout);
}

fn env_proxy_for_scheme(scheme: &str) -> Option<String> {
    match scheme {
        "https" => find_first_proxy_var(&["HTTPS_PROXY", "https_proxy", "ALL_PROXY", "all_proxy"]),
        "http" => find_first_proxy_var(&["HTTP_PROXY", "http_proxy", "ALL_PROXY", "all_proxy"]),
        _ => None,
    }
}

fn find_first_proxy_var(names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| {
        std::env::var(name)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    })
}
