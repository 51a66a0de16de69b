//! reqwest-backed request handler for the `http` and `https` schemes.
//!
//! Proxy and redirect policy are client-level settings in reqwest, so the
//! handler keeps one lazily built `Client` per (proxy, redirect-policy)
//! profile. The cache is the handler's connection pool; the director never
//! sees it.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use futures_util::{Stream, StreamExt};
use reqwest::header::{ACCEPT_ENCODING, HeaderMap, HeaderName, HeaderValue};
use reqwest::redirect::Policy;
use reqwest::{Client, Method, Proxy};
use tracing::debug;

use crate::config::NetConfig;
use crate::cookies::CookieJar;
use crate::error::RequestError;
use crate::request::Request;
use crate::response::{Response, ResponseBody};

use super::{RequestHandler, TlsSettings};

const MAX_REDIRECTS: usize = 10;

/// Client-level settings that cannot vary per request in reqwest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ClientProfile {
    proxy: Option<String>,
    follow_redirects: bool,
}

/// Built-in handler executing requests through reqwest.
pub struct HttpHandler {
    tls: TlsSettings,
    cookie_jar: Option<Arc<CookieJar>>,
    clients: DashMap<ClientProfile, Client>,
}

impl HttpHandler {
    /// Creates the handler, loading TLS settings from the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::ClientCertificate`] when a configured client
    /// certificate cannot be loaded.
    pub fn new(
        config: &NetConfig,
        cookie_jar: Option<Arc<CookieJar>>,
    ) -> Result<Self, RequestError> {
        Ok(Self {
            tls: TlsSettings::from_config(config)?,
            cookie_jar,
            clients: DashMap::new(),
        })
    }

    fn client_for(&self, profile: &ClientProfile) -> Result<Client, RequestError> {
        if let Some(client) = self.clients.get(profile) {
            return Ok(client.clone());
        }
        debug!(?profile, "building HTTP client for new profile");

        let mut builder = Client::builder()
            .gzip(true)
            .no_proxy()
            .redirect(if profile.follow_redirects {
                Policy::limited(MAX_REDIRECTS)
            } else {
                Policy::none()
            });

        if let Some(proxy_url) = &profile.proxy {
            let proxy = Proxy::all(proxy_url).map_err(|error| {
                RequestError::proxy(format!("invalid proxy URL {proxy_url}: {error}"))
            })?;
            builder = builder.proxy(proxy);
        }

        if !self.tls.verify {
            builder = builder.danger_accept_invalid_certs(true);
        }
        if self.tls.legacy_connect {
            builder = builder.min_tls_version(reqwest::tls::Version::TLS_1_0);
        }
        if let Some(identity) = self.tls.identity()? {
            builder = builder.identity(identity);
        }
        if let Some(jar) = &self.cookie_jar {
            builder = builder.cookie_provider(Arc::clone(jar));
        }

        let client = builder.build().map_err(|error| {
            RequestError::transport_from("failed to build HTTP client", error)
        })?;
        self.clients.insert(profile.clone(), client.clone());
        Ok(client)
    }
}

#[async_trait]
impl RequestHandler for HttpHandler {
    fn name(&self) -> &'static str {
        "reqwest"
    }

    fn supported_schemes(&self) -> &'static [&'static str] {
        &["http", "https"]
    }

    async fn execute(&self, request: &Request) -> Result<Option<Response>, RequestError> {
        let proxy = request
            .proxies
            .get(request.scheme())
            .filter(|value| !value.is_empty())
            .cloned();
        let proxied = proxy.is_some();
        let client = self.client_for(&ClientProfile {
            proxy,
            follow_redirects: request.allow_redirects,
        })?;

        let method = Method::from_bytes(request.method().as_bytes()).map_err(|_| {
            RequestError::unsupported(format!("{} method is not supported", request.method()))
        })?;

        let mut headers = HeaderMap::new();
        for (name, value) in request.headers().iter() {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| RequestError::InvalidHeader { name: name.to_string() })?;
            let header_value = HeaderValue::from_str(value)
                .map_err(|_| RequestError::InvalidHeader { name: name.to_string() })?;
            headers.insert(header_name, header_value);
        }
        if !request.enable_compression {
            headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));
        }

        let mut builder = client.request(method, request.url()).headers(headers);
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(Duration::from_secs_f64(timeout));
        }
        if let Some(data) = request.data() {
            builder = builder.body(data.to_vec());
        }

        let reply = builder
            .send()
            .await
            .map_err(|error| classify_send_error(error, request.url(), proxied))?;

        let status = reply.status().as_u16();
        let final_url = reply.url().to_string();
        let response_headers = reply.headers().clone();
        let body = ReqwestBody::new(reply);
        Ok(Some(Response::new(
            Box::new(body),
            final_url,
            response_headers,
            status,
            None,
        )))
    }

    fn close(&self) {
        // dropping the cached clients releases their pooled connections
        self.clients.clear();
    }
}

/// Maps a reqwest send failure onto the error taxonomy.
fn classify_send_error(error: reqwest::Error, url: &str, proxied: bool) -> RequestError {
    if error.is_timeout() {
        return RequestError::transport_from(format!("request to {url} timed out"), error);
    }
    let chain = error_chain(&error);
    if chain_mentions_tls(&chain) {
        return RequestError::ssl(chain);
    }
    if error.is_connect() && proxied {
        return RequestError::proxy(chain);
    }
    if error.is_redirect() {
        return RequestError::transport_from(format!("{url}: redirect limit exceeded"), error);
    }
    RequestError::transport_from(chain, error)
}

fn error_chain(error: &reqwest::Error) -> String {
    let mut messages = vec![error.to_string()];
    let mut source = std::error::Error::source(error);
    while let Some(inner) = source {
        messages.push(inner.to_string());
        source = inner.source();
    }
    messages.join(": ")
}

fn chain_mentions_tls(chain: &str) -> bool {
    let lower = chain.to_ascii_lowercase();
    ["certificate", "handshake", " tls", "ssl"]
        .iter()
        .any(|needle| lower.contains(needle))
}

/// Response body streaming adapter over reqwest, enforcing the declared
/// content length.
struct ReqwestBody {
    stream: Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>,
    buffer: BytesMut,
    received: u64,
    expected: Option<u64>,
    done: bool,
}

impl ReqwestBody {
    fn new(reply: reqwest::Response) -> Self {
        let expected = reply.content_length();
        Self {
            stream: Box::pin(reply.bytes_stream()),
            buffer: BytesMut::new(),
            received: 0,
            expected,
            done: false,
        }
    }

    /// Pulls chunks until `target` bytes are buffered or the stream ends.
    async fn fill(&mut self, target: Option<usize>) -> Result<(), RequestError> {
        loop {
            if self.done {
                return Ok(());
            }
            if let Some(target) = target
                && self.buffer.len() >= target
            {
                return Ok(());
            }
            match self.stream.next().await {
                Some(Ok(chunk)) => {
                    self.received += chunk.len() as u64;
                    self.buffer.extend_from_slice(&chunk);
                }
                Some(Err(error)) => {
                    self.done = true;
                    if error.is_timeout() {
                        return Err(RequestError::transport_from(
                            "response body read timed out",
                            error,
                        ));
                    }
                    return Err(RequestError::transport_from(
                        "error reading response body",
                        error,
                    ));
                }
                None => {
                    self.done = true;
                    if let Some(expected) = self.expected
                        && self.received < expected
                    {
                        return Err(RequestError::incomplete_read(
                            self.received,
                            Some(expected - self.received),
                        ));
                    }
                    return Ok(());
                }
            }
        }
    }
}

#[async_trait]
impl ResponseBody for ReqwestBody {
    async fn read(&mut self, amt: Option<usize>) -> Result<Vec<u8>, RequestError> {
        self.fill(amt).await?;
        let take = amt.map_or(self.buffer.len(), |amt| amt.min(self.buffer.len()));
        Ok(self.buffer.split_to(take).to_vec())
    }
}
