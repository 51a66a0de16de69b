//! Request-dispatch networking core for the grabber media downloader.
//!
//! Higher layers describe what to fetch as a [`Request`]; this crate decides
//! which backend executes it and returns a uniform [`Response`], whatever
//! transport library sat behind the call.
//!
//! # Architecture
//!
//! - [`request`] - Request value object with URL sanitization and ordered,
//!   case-insensitive headers
//! - [`response`] - Uniform response adapter over backend replies
//! - [`handler`] - Pluggable backend adapters sharing one request pre-flight
//! - [`director`] - Ordered fallback dispatch across registered handlers
//! - [`cookies`] - Persistent cookie jar with Netscape file support
//! - [`config`] - Networking defaults supplied by the host tool
//! - [`error`] - The error taxonomy the whole surface reports through

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod cookies;
pub mod director;
pub mod error;
pub mod handler;
pub mod request;
pub mod response;

// Re-export commonly used types
pub use config::{DEFAULT_TIMEOUT_SECS, DEFAULT_USER_AGENT, NO_PROXY, NetConfig, default_headers};
pub use cookies::{Cookie, CookieError, CookieJar};
pub use director::{RequestDirector, build_default_director};
pub use error::RequestError;
pub use handler::{
    HttpHandler, NO_COMPRESSION_HEADER, REQUEST_PROXY_HEADER, RequestHandler, TlsSettings,
};
pub use request::{Headers, Request};
pub use response::{BufferBody, REDIRECT_STATUS_CODES, Response, ResponseBody};
