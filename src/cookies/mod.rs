//! Persistent cookie jar with Netscape file support.
//!
//! The jar plugs into the HTTP backend as its cookie store, so cookies set
//! by responses flow back into it and saved files reflect the whole session.
//! Cookie values never appear in logs or Debug output.

mod netscape;

pub use netscape::CookieError;

use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use reqwest::header::HeaderValue;
use tracing::{debug, instrument, warn};
use url::Url;

/// A single cookie as stored in the jar.
#[derive(Clone)]
pub struct Cookie {
    /// Domain the cookie belongs to, possibly with a leading dot.
    pub domain: String,
    /// Whether subdomains of `domain` match.
    pub include_subdomains: bool,
    /// URL path scope.
    pub path: String,
    /// Only sent over HTTPS.
    pub secure: bool,
    /// Expiry as a Unix timestamp; `None` marks a session cookie discarded
    /// at the end of the run unless explicitly kept.
    pub expires: Option<u64>,
    /// Cookie name.
    pub name: String,
    /// Cookie value (sensitive, never logged). `None` for value-less
    /// cookies such as bare flags.
    value: Option<String>,
    /// Marked HttpOnly by the server or the cookie file.
    pub http_only: bool,
}

impl Cookie {
    /// Creates a cookie entry.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        domain: String,
        include_subdomains: bool,
        path: String,
        secure: bool,
        expires: Option<u64>,
        name: String,
        value: Option<String>,
        http_only: bool,
    ) -> Self {
        Self {
            domain,
            include_subdomains,
            path,
            secure,
            expires,
            name,
            value,
            http_only,
        }
    }

    /// The cookie value, when one exists.
    ///
    /// Cookie values are sensitive; avoid logging the return value.
    #[must_use]
    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    fn expired_at(&self, now: u64) -> bool {
        matches!(self.expires, Some(expires) if expires <= now)
    }

    fn matches(&self, host: &str, path: &str, secure_transport: bool, now: u64) -> bool {
        if self.expired_at(now) {
            return false;
        }
        if self.secure && !secure_transport {
            return false;
        }
        self.domain_matches(host) && path_matches(&self.path, path)
    }

    fn domain_matches(&self, host: &str) -> bool {
        let domain = self.domain.strip_prefix('.').unwrap_or(&self.domain);
        if host == domain {
            return true;
        }
        self.include_subdomains
            && host
                .strip_suffix(domain)
                .is_some_and(|prefix| prefix.ends_with('.'))
    }
}

// Custom Debug impl that redacts the cookie value.
impl fmt::Debug for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cookie")
            .field("domain", &self.domain)
            .field("include_subdomains", &self.include_subdomains)
            .field("path", &self.path)
            .field("secure", &self.secure)
            .field("expires", &self.expires)
            .field("name", &self.name)
            .field("value", &"[REDACTED]")
            .field("http_only", &self.http_only)
            .finish()
    }
}

/// Thread-safe cookie jar, usable directly as the HTTP backend's cookie
/// store.
#[derive(Default)]
pub struct CookieJar {
    cookies: RwLock<Vec<Cookie>>,
}

impl CookieJar {
    /// Creates an empty jar.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `cookie`, replacing any existing cookie with the same
    /// domain, path and name.
    pub fn set(&self, cookie: Cookie) {
        let mut cookies = self.write_lock();
        match cookies.iter_mut().find(|existing| {
            existing.domain == cookie.domain
                && existing.path == cookie.path
                && existing.name == cookie.name
        }) {
            Some(existing) => *existing = cookie,
            None => cookies.push(cookie),
        }
    }

    /// Removes every cookie from the jar.
    pub fn clear(&self) {
        self.write_lock().clear();
    }

    /// Number of stored cookies, including expired ones not yet pruned.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read_lock().len()
    }

    /// Whether the jar holds no cookies.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read_lock().is_empty()
    }

    /// A point-in-time copy of the stored cookies.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Cookie> {
        self.read_lock().clone()
    }

    /// Loads cookies from a Netscape-format file, merging them into the
    /// jar. Malformed lines are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns [`CookieError::Io`] when the file cannot be read.
    #[instrument(level = "debug", skip(self))]
    pub fn load(&self, path: &Path) -> Result<(), CookieError> {
        let path_str = path.display().to_string();
        let file = File::open(path).map_err(|source| CookieError::Io {
            path: path_str.clone(),
            source,
        })?;
        let parsed = netscape::parse(BufReader::new(file), &path_str)?;
        debug!(path = %path_str, count = parsed.len(), "loaded cookie file");
        for cookie in parsed {
            self.set(cookie);
        }
        Ok(())
    }

    /// Saves the jar to a Netscape-format file.
    ///
    /// Session cookies are dropped unless `ignore_discard` keeps them;
    /// expired cookies are dropped unless `ignore_expires` keeps them.
    ///
    /// # Errors
    ///
    /// Returns [`CookieError::Io`] when the file cannot be written.
    #[instrument(level = "debug", skip(self))]
    pub fn save(
        &self,
        path: &Path,
        ignore_discard: bool,
        ignore_expires: bool,
    ) -> Result<(), CookieError> {
        let display = path.display().to_string();
        let file = File::create(path).map_err(|source| CookieError::Io {
            path: display.clone(),
            source,
        })?;
        let cookies = self.snapshot();
        let mut out = BufWriter::new(file);
        netscape::write(
            &mut out,
            &cookies,
            &display,
            ignore_discard,
            ignore_expires,
            now_epoch(),
        )
    }

    fn read_lock(&self) -> RwLockReadGuard<'_, Vec<Cookie>> {
        self.cookies.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_lock(&self) -> RwLockWriteGuard<'_, Vec<Cookie>> {
        self.cookies.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for CookieJar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CookieJar")
            .field("cookies", &self.len())
            .finish()
    }
}

impl reqwest::cookie::CookieStore for CookieJar {
    fn set_cookies(&self, cookie_headers: &mut dyn Iterator<Item = &HeaderValue>, url: &Url) {
        let now = now_epoch();
        for header in cookie_headers {
            let Ok(raw) = header.to_str() else {
                warn!(url = %url, "skipping non-UTF-8 Set-Cookie header");
                continue;
            };
            match parse_set_cookie(raw, url, now) {
                Some(cookie) if cookie.expired_at(now) => {
                    // An expired Set-Cookie deletes the stored cookie.
                    self.write_lock().retain(|existing| {
                        existing.domain != cookie.domain
                            || existing.path != cookie.path
                            || existing.name != cookie.name
                    });
                }
                Some(cookie) => self.set(cookie),
                None => warn!(url = %url, "skipping unparseable Set-Cookie header"),
            }
        }
    }

    fn cookies(&self, url: &Url) -> Option<HeaderValue> {
        let host = url.host_str()?;
        let secure_transport = url.scheme() == "https";
        let now = now_epoch();

        let cookies = self.read_lock();
        let pairs: Vec<String> = cookies
            .iter()
            .filter(|cookie| cookie.matches(host, url.path(), secure_transport, now))
            .map(|cookie| match cookie.value() {
                Some(value) => format!("{}={value}", cookie.name),
                None => cookie.name.clone(),
            })
            .collect();
        if pairs.is_empty() {
            return None;
        }
        HeaderValue::from_str(&pairs.join("; ")).ok()
    }
}

/// Builds a jar [`Cookie`] from one `Set-Cookie` header received for `url`.
fn parse_set_cookie(raw: &str, url: &Url, now: u64) -> Option<Cookie> {
    let parsed = cookie::Cookie::parse(raw).ok()?;

    let (domain, include_subdomains) = match parsed.domain() {
        // A Domain attribute opts into subdomain matching.
        Some(domain) => (domain.trim_start_matches('.').to_string(), true),
        None => (url.host_str()?.to_string(), false),
    };
    let path = match parsed.path() {
        Some(path) if path.starts_with('/') => path.to_string(),
        _ => default_path(url),
    };

    // Max-Age wins over Expires when both are present.
    let expires = if let Some(max_age) = parsed.max_age() {
        let seconds = max_age.whole_seconds();
        if seconds <= 0 {
            Some(0)
        } else {
            Some(now.saturating_add(seconds.unsigned_abs()))
        }
    } else {
        parsed
            .expires_datetime()
            .map(|datetime| u64::try_from(datetime.unix_timestamp()).unwrap_or(0))
    };

    let value = if parsed.value().is_empty() {
        None
    } else {
        Some(parsed.value().to_string())
    };

    Some(Cookie::new(
        domain,
        include_subdomains,
        path,
        parsed.secure() == Some(true),
        expires,
        parsed.name().to_string(),
        value,
        parsed.http_only() == Some(true),
    ))
}

/// RFC 6265 default path: the request path up to its last slash.
fn default_path(url: &Url) -> String {
    let path = url.path();
    match path.rfind('/') {
        Some(idx) if idx > 0 => path[..idx].to_string(),
        _ => "/".to_string(),
    }
}

fn path_matches(cookie_path: &str, request_path: &str) -> bool {
    if request_path == cookie_path {
        return true;
    }
    request_path.strip_prefix(cookie_path).is_some_and(|rest| {
        cookie_path.ends_with('/') || rest.starts_with('/')
    })
}

fn now_epoch() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}
