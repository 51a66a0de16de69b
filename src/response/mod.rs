//! Uniform response adapter over backend-specific replies.
//!
//! A [`Response`] owns its body stream exclusively: closing the response
//! closes the stream, and the caller is responsible for closing explicitly
//! (scoped-acquisition discipline) so the underlying connection is not
//! leaked. Header access is case-insensitive and multi-valued, so repeated
//! headers such as `Set-Cookie` survive the adaptation.

use std::fmt;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::HeaderMap;

use crate::error::RequestError;

/// Status codes for which [`Response::get_redirect_url`] reports a target.
pub const REDIRECT_STATUS_CODES: [u16; 5] = [301, 302, 303, 307, 308];

/// Backend body stream behind a [`Response`].
///
/// Implemented by the built-in reqwest adapter and by in-memory buffers in
/// tests and canned-response handlers.
#[async_trait]
pub trait ResponseBody: Send {
    /// Reads up to `amt` bytes, or everything remaining when `None`.
    ///
    /// An empty return with `Some(amt)` requested signals end of stream.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::Transport`] on stream failure, or
    /// [`RequestError::IncompleteRead`] when the stream ends before the
    /// declared length.
    async fn read(&mut self, amt: Option<usize>) -> Result<Vec<u8>, RequestError>;
}

/// In-memory body used by tests and handlers serving canned content.
#[derive(Debug, Default)]
pub struct BufferBody {
    data: Vec<u8>,
    pos: usize,
}

impl BufferBody {
    /// Wraps a byte buffer as a readable body.
    #[must_use]
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            pos: 0,
        }
    }
}

#[async_trait]
impl ResponseBody for BufferBody {
    async fn read(&mut self, amt: Option<usize>) -> Result<Vec<u8>, RequestError> {
        let remaining = self.data.len() - self.pos;
        let take = amt.map_or(remaining, |amt| amt.min(remaining));
        let chunk = self.data[self.pos..self.pos + take].to_vec();
        self.pos += take;
        Ok(chunk)
    }
}

/// A normalized response from a request handler.
///
/// Wraps whatever the backend produced into a uniform read/header/status
/// interface. The final URL reflects any redirects the backend followed.
pub struct Response {
    body: Option<Box<dyn ResponseBody>>,
    url: String,
    headers: HeaderMap,
    status: u16,
    reason: String,
    offset: u64,
    closed: bool,
}

impl Response {
    /// Adapts a backend reply.
    ///
    /// `reason` falls back to the canonical phrase for `status` when not
    /// supplied; `status` itself defaults to 200 at call sites that have no
    /// better information.
    #[must_use]
    pub fn new(
        body: Box<dyn ResponseBody>,
        url: impl Into<String>,
        headers: HeaderMap,
        status: u16,
        reason: Option<String>,
    ) -> Self {
        let reason = reason.unwrap_or_else(|| {
            StatusCode::from_u16(status)
                .ok()
                .and_then(|code| code.canonical_reason())
                .unwrap_or_default()
                .to_string()
        });
        Self {
            body: Some(body),
            url: url.into(),
            headers,
            status,
            reason,
            offset: 0,
            closed: false,
        }
    }

    /// Final URL, after any redirects the backend followed.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// HTTP status code.
    #[must_use]
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Status reason phrase.
    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Response headers (case-insensitive, repeated names preserved).
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// First value of `name` as text, when present and valid UTF-8.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    /// The redirect target, only when the status is a redirect code.
    #[must_use]
    pub fn get_redirect_url(&self) -> Option<String> {
        if REDIRECT_STATUS_CODES.contains(&self.status) {
            self.header("location").map(str::to_string)
        } else {
            None
        }
    }

    /// Reads up to `amt` bytes from the body (`None` reads to end).
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::Transport`] when the response is already
    /// closed or the stream fails mid-read, and
    /// [`RequestError::IncompleteRead`] when the body ends short of the
    /// declared length.
    pub async fn read(&mut self, amt: Option<usize>) -> Result<Vec<u8>, RequestError> {
        let Some(body) = self.body.as_mut() else {
            return Err(RequestError::transport("read from closed response"));
        };
        let chunk = body.read(amt).await?;
        self.offset += chunk.len() as u64;
        Ok(chunk)
    }

    /// Current position in the body stream (bytes consumed so far).
    #[must_use]
    pub fn tell(&self) -> u64 {
        self.offset
    }

    /// Closes the response, releasing the underlying stream. Idempotent.
    pub fn close(&mut self) {
        self.body = None;
        self.closed = true;
    }

    /// True once [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Converts a status >= 400 into [`RequestError::Http`], consuming the
    /// response. Treating an HTTP error status as a failure is the caller's
    /// choice; handlers return the response either way because the server
    /// did respond.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::Http`] wrapping `self` when the status is a
    /// client or server error.
    pub fn error_for_status(self) -> Result<Self, RequestError> {
        if self.status >= 400 {
            Err(RequestError::http(self, false))
        } else {
            Ok(self)
        }
    }
}

// The body stream is intentionally left out of Debug output.
impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("url", &self.url)
            .field("status", &self.status)
            .field("reason", &self.reason)
            .field("headers", &self.headers)
            .field("offset", &self.offset)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use reqwest::header::{HeaderValue, LOCATION, SET_COOKIE};

    use super::*;

    fn response_with_status(status: u16) -> Response {
        Response::new(
            Box::new(BufferBody::new(b"payload".to_vec())),
            "http://example.com/file",
            HeaderMap::new(),
            status,
            None,
        )
    }

    #[tokio::test]
    async fn test_read_and_tell() {
        let mut response = response_with_status(200);
        let first = response.read(Some(3)).await.unwrap();
        assert_eq!(first, b"pay");
        assert_eq!(response.tell(), 3);
        let rest = response.read(None).await.unwrap();
        assert_eq!(rest, b"load");
        assert_eq!(response.tell(), 7);
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_blocks_reads() {
        let mut response = response_with_status(200);
        response.close();
        response.close();
        assert!(response.is_closed());
        let err = response.read(Some(1)).await.unwrap_err();
        assert!(
            matches!(err, RequestError::Transport { .. }),
            "read after close must fail: {err}"
        );
    }

    #[test]
    fn test_reason_derived_from_status() {
        assert_eq!(response_with_status(200).reason(), "OK");
        assert_eq!(response_with_status(404).reason(), "Not Found");
        assert_eq!(
            response_with_status(599).reason(),
            "",
            "unknown status has no canonical phrase"
        );
    }

    #[test]
    fn test_get_redirect_url_only_for_redirect_codes() {
        for status in REDIRECT_STATUS_CODES {
            let mut headers = HeaderMap::new();
            headers.insert(LOCATION, HeaderValue::from_static("http://next.example/"));
            let response = Response::new(
                Box::new(BufferBody::default()),
                "http://example.com/",
                headers,
                status,
                None,
            );
            assert_eq!(
                response.get_redirect_url().as_deref(),
                Some("http://next.example/"),
                "status {status} must expose the Location header"
            );
        }

        let mut headers = HeaderMap::new();
        headers.insert(LOCATION, HeaderValue::from_static("http://next.example/"));
        let response = Response::new(
            Box::new(BufferBody::default()),
            "http://example.com/",
            headers,
            200,
            None,
        );
        assert!(
            response.get_redirect_url().is_none(),
            "non-redirect status must ignore Location"
        );
    }

    #[test]
    fn test_header_access_case_insensitive_and_multivalued() {
        let mut headers = HeaderMap::new();
        headers.append(SET_COOKIE, HeaderValue::from_static("a=1"));
        headers.append(SET_COOKIE, HeaderValue::from_static("b=2"));
        let response = Response::new(
            Box::new(BufferBody::default()),
            "http://example.com/",
            headers,
            200,
            None,
        );
        assert_eq!(response.header("SET-COOKIE"), Some("a=1"));
        let all: Vec<&HeaderValue> = response.headers().get_all("set-cookie").iter().collect();
        assert_eq!(all.len(), 2, "repeated headers must be preserved");
    }

    #[test]
    fn test_error_for_status() {
        assert!(response_with_status(200).error_for_status().is_ok());
        assert!(response_with_status(399).error_for_status().is_ok());
        let err = response_with_status(404).error_for_status().unwrap_err();
        match err {
            RequestError::Http { response, msg } => {
                assert_eq!(response.status(), 404);
                assert_eq!(msg, "HTTP Error 404: Not Found");
            }
            other => panic!("expected Http error, got: {other}"),
        }
    }

    #[test]
    fn test_explicit_reason_wins() {
        let response = Response::new(
            Box::new(BufferBody::default()),
            "http://example.com/",
            HeaderMap::new(),
            404,
            Some("Gone Fishing".to_string()),
        );
        assert_eq!(response.reason(), "Gone Fishing");
    }
}
