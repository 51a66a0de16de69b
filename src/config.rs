//! External configuration collaborator consumed at director construction.
//!
//! The host tool owns where these values come from (file config, CLI flags);
//! this core only reads them. The struct is serde-derived so it can live
//! directly inside the tool's file config.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::request::Headers;

/// Timeout applied when neither the request nor the config supplies one.
pub const DEFAULT_TIMEOUT_SECS: f64 = 20.0;

/// Proxy-map sentinel that disables proxying for a scheme.
pub const NO_PROXY: &str = "";

/// Browser-like User-Agent sent by default; media hosts routinely reject
/// obviously non-browser clients.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// Networking defaults shared by every handler a director owns.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetConfig {
    /// Headers merged beneath request-specific headers during pre-flight.
    pub default_headers: Headers,
    /// Scheme-to-proxy-URL defaults; [`NO_PROXY`] disables a scheme.
    pub proxies: HashMap<String, String>,
    /// Default socket timeout in seconds; non-positive values are ignored.
    pub socket_timeout: Option<f64>,
    /// Skip TLS certificate verification.
    pub nocheckcertificate: bool,
    /// Relax TLS for servers that require legacy renegotiation or older
    /// protocol versions. Narrows security only when explicitly requested.
    pub legacyserverconnect: bool,
    /// Client certificate in PEM format.
    pub client_certificate: Option<PathBuf>,
    /// Private key for the client certificate; defaults to the certificate
    /// file itself when the key is bundled there.
    pub client_certificate_key: Option<PathBuf>,
    /// Password for an encrypted client certificate key.
    pub client_certificate_password: Option<String>,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            default_headers: default_headers(),
            proxies: HashMap::new(),
            socket_timeout: None,
            nocheckcertificate: false,
            legacyserverconnect: false,
            client_certificate: None,
            client_certificate_key: None,
            client_certificate_password: None,
        }
    }
}

/// The immutable default header set merged beneath every request.
#[must_use]
pub fn default_headers() -> Headers {
    [
        ("User-Agent", DEFAULT_USER_AGENT),
        (
            "Accept",
            "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
        ),
        ("Accept-Language", "en-us,en;q=0.5"),
        ("Sec-Fetch-Mode", "navigate"),
    ]
    .into_iter()
    .collect()
}
