//! Error taxonomy for the request-dispatch core.
//!
//! One [`RequestError`] enum covers the whole surface: fatal configuration
//! errors, the capability-mismatch signal that drives handler fallback, and
//! the transport/TLS/proxy/HTTP failures surfaced to the caller. Variants
//! raised inside a handler carry the originating handler's name so operators
//! can tell which backend failed without a stack trace dump.

use thiserror::Error;

use crate::response::Response;

/// Errors raised while preparing, dispatching or executing a request.
#[derive(Debug, Error)]
pub enum RequestError {
    /// The URL could not be parsed even after sanitization. Fatal to the
    /// call, raised at [`Request`](crate::request::Request) construction.
    #[error("invalid URL {url}: {reason}")]
    InvalidUrl {
        /// The offending URL string as given by the caller.
        url: String,
        /// Parser diagnostic.
        reason: String,
    },

    /// A header name or value cannot be encoded on the wire.
    #[error("invalid header {name}")]
    InvalidHeader {
        /// The offending header name.
        name: String,
    },

    /// `file:` URLs are never dispatched to any backend. This is an explicit
    /// security policy, distinct from a capability mismatch.
    #[error("file:// scheme is explicitly disabled in grabber for security reasons")]
    FileSchemeDisabled,

    /// Dispatch was attempted with an empty handler list.
    #[error("no request handlers configured")]
    NoHandlers,

    /// The configured client certificate or key could not be loaded.
    /// Fatal configuration error, never retried.
    #[error("unable to load client certificate: {reason}")]
    ClientCertificate {
        /// What failed to load.
        reason: String,
    },

    /// The handler cannot service this request (scheme or feature mismatch).
    /// Caught by the director and converted into a fallback attempt; not a
    /// transport failure.
    #[error("{msg}")]
    Unsupported {
        /// Why the handler rejected the request.
        msg: String,
        /// Handler that rejected it.
        handler: Option<&'static str>,
    },

    /// Network-level failure: connection refused or reset, DNS failure,
    /// timeout, malformed transfer encoding.
    #[error("{msg}")]
    Transport {
        /// Description of the failure.
        msg: String,
        /// Handler the failure originated from.
        handler: Option<&'static str>,
        /// Backend error, when one exists.
        #[source]
        source: Option<reqwest::Error>,
    },

    /// TLS handshake or verification failure.
    #[error("{msg}")]
    Ssl {
        /// Description, possibly rewritten with a remediation hint.
        msg: String,
        /// Handler the failure originated from.
        handler: Option<&'static str>,
    },

    /// The proxy connection failed.
    #[error("proxy error: {msg}")]
    Proxy {
        /// Description of the failure.
        msg: String,
        /// Handler the failure originated from.
        handler: Option<&'static str>,
    },

    /// The response body ended before the declared length.
    #[error("{}", incomplete_read_msg(.partial, .expected))]
    IncompleteRead {
        /// Bytes actually delivered.
        partial: u64,
        /// Bytes still expected, when the total was declared.
        expected: Option<u64>,
        /// Handler the failure originated from.
        handler: Option<&'static str>,
    },

    /// A received HTTP response treated as an error by the caller. The
    /// server did respond; this is kept distinct from transport failure.
    #[error("{msg}")]
    Http {
        /// The wrapped response, still readable.
        response: Box<Response>,
        /// Preformatted "HTTP Error <status>: <reason>" message.
        msg: String,
    },

    /// Every handler was tried without producing a response. The message
    /// groups unsupported-reasons by text, naming the handlers behind each,
    /// and appends a tally of unexpected errors.
    #[error("{msg}")]
    Exhausted {
        /// Aggregated diagnostic message.
        msg: String,
    },
}

fn incomplete_read_msg(partial: &u64, expected: &Option<u64>) -> String {
    match expected {
        Some(expected) => format!("incomplete read ({partial} bytes read, {expected} more expected)"),
        None => format!("incomplete read ({partial} bytes read)"),
    }
}

impl RequestError {
    /// Creates a capability-mismatch error.
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported {
            msg: msg.into(),
            handler: None,
        }
    }

    /// Creates a transport error without a backend source.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport {
            msg: msg.into(),
            handler: None,
            source: None,
        }
    }

    /// Creates a transport error wrapping a backend error.
    pub fn transport_from(msg: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Transport {
            msg: msg.into(),
            handler: None,
            source: Some(source),
        }
    }

    /// Creates a TLS error, rewriting known OpenSSL diagnostics into
    /// actionable messages.
    pub fn ssl(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        let msg = if msg.contains("UNSAFE_LEGACY_RENEGOTIATION_DISABLED") {
            "UNSAFE_LEGACY_RENEGOTIATION_DISABLED: Try using --legacy-server-connect".to_string()
        } else if msg.contains("SSLV3_ALERT_HANDSHAKE_FAILURE") {
            "SSLV3_ALERT_HANDSHAKE_FAILURE: The server may not support the current cipher list. \
             Try using --legacy-server-connect"
                .to_string()
        } else {
            msg
        };
        Self::Ssl { msg, handler: None }
    }

    /// Creates a proxy error.
    pub fn proxy(msg: impl Into<String>) -> Self {
        Self::Proxy {
            msg: msg.into(),
            handler: None,
        }
    }

    /// Creates an incomplete-read error.
    #[must_use]
    pub fn incomplete_read(partial: u64, expected: Option<u64>) -> Self {
        Self::IncompleteRead {
            partial,
            expected,
            handler: None,
        }
    }

    /// Wraps a response the caller chose to treat as an error.
    #[must_use]
    pub fn http(response: Response, redirect_loop: bool) -> Self {
        let mut msg = format!("HTTP Error {}: {}", response.status(), response.reason());
        if redirect_loop {
            msg.push_str(" (redirect loop detected)");
        }
        Self::Http {
            response: Box::new(response),
            msg,
        }
    }

    /// Builds the aggregate error raised when every handler was exhausted.
    ///
    /// `unsupported` is expected to hold [`RequestError::Unsupported`] values
    /// with handler attribution already attached; other variants are ignored.
    #[must_use]
    pub fn exhausted(unsupported: &[RequestError], unexpected_count: usize) -> Self {
        let mut groups: Vec<(&str, Vec<&str>)> = Vec::new();
        for error in unsupported {
            if let Self::Unsupported { msg, handler } = error {
                let name = handler.unwrap_or("unknown");
                match groups.iter_mut().find(|(grouped, _)| *grouped == msg) {
                    Some((_, names)) => names.push(name),
                    None => groups.push((msg, vec![name])),
                }
            }
        }

        let mut reasons: Vec<String> = groups
            .iter()
            .map(|(msg, names)| format!("{msg} ({})", names.join(", ")))
            .collect();
        if unexpected_count > 0 {
            reasons.push(format!("{unexpected_count} unexpected error(s)"));
        }

        let mut msg = String::from("unable to handle request");
        if !reasons.is_empty() {
            msg.push_str(", possible reason(s): ");
            msg.push_str(&reasons.join(", "));
        }
        Self::Exhausted { msg }
    }

    /// Attaches the originating handler's name, keeping an existing
    /// attribution if one was already set deeper in the stack.
    #[must_use]
    pub fn with_handler(mut self, name: &'static str) -> Self {
        if let Self::Unsupported { handler, .. }
        | Self::Transport { handler, .. }
        | Self::Ssl { handler, .. }
        | Self::Proxy { handler, .. }
        | Self::IncompleteRead { handler, .. } = &mut self
            && handler.is_none()
        {
            *handler = Some(name);
        }
        self
    }

    /// The handler this error originated from, when known.
    #[must_use]
    pub fn handler(&self) -> Option<&'static str> {
        match self {
            Self::Unsupported { handler, .. }
            | Self::Transport { handler, .. }
            | Self::Ssl { handler, .. }
            | Self::Proxy { handler, .. }
            | Self::IncompleteRead { handler, .. } => *handler,
            _ => None,
        }
    }

    /// True when the director should fall through to the next handler
    /// instead of aborting dispatch.
    #[must_use]
    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Unsupported { .. })
    }
}
