//! Netscape cookie file codec (7 TAB-separated fields per line).
//!
//! Reading is lenient: malformed lines are logged and skipped, never fatal,
//! so one corrupt line cannot take down a whole browser-exported jar. Cookie
//! values are redacted from every diagnostic.

use std::io::{BufRead, Write};

use tracing::{debug, warn};

use super::Cookie;

/// Header written at the top of every saved cookie file.
pub(crate) const FILE_HEADER: &str =
    "# Netscape HTTP Cookie File\n# This file is generated by grabber.  Do not edit.\n\n";

/// Prefix marking an HttpOnly cookie, as written by curl and browsers.
const HTTP_ONLY_PREFIX: &str = "#HttpOnly_";

/// Errors raised by the cookie file codec.
#[derive(Debug, thiserror::Error)]
pub enum CookieError {
    /// I/O failure reading or writing the cookie file.
    #[error("cookie file {path}: {source}")]
    Io {
        /// The file involved.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Parses a Netscape-format cookie file.
///
/// Blank lines and comments are skipped, except that lines starting with
/// `#HttpOnly_` are data lines carrying the HttpOnly flag. A line whose name
/// field is empty is a cookie without a value, with the name stored in the
/// value position. Malformed lines are skipped with a warning.
///
/// # Errors
///
/// Returns [`CookieError::Io`] on read failure only.
pub(crate) fn parse(reader: impl BufRead, path: &str) -> Result<Vec<Cookie>, CookieError> {
    let mut cookies = Vec::new();

    for (idx, line_result) in reader.lines().enumerate() {
        let line_number = idx + 1;
        let line = line_result.map_err(|source| CookieError::Io {
            path: path.to_string(),
            source,
        })?;
        let line = line.trim_end();

        let (line, http_only) = match line.strip_prefix(HTTP_ONLY_PREFIX) {
            Some(rest) => (rest, true),
            None => (line, false),
        };

        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        match parse_line(line, http_only) {
            Ok(cookie) => {
                debug!(line = line_number, domain = %cookie.domain, name = %cookie.name, "parsed cookie");
                cookies.push(cookie);
            }
            Err(reason) => {
                warn!(
                    line = line_number,
                    content = redact_line(line),
                    reason,
                    "skipping malformed cookie line"
                );
            }
        }
    }

    Ok(cookies)
}

fn parse_line(line: &str, http_only: bool) -> Result<Cookie, String> {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() != 7 {
        return Err(format!(
            "expected 7 TAB-separated fields, found {}",
            fields.len()
        ));
    }

    let domain = fields[0].to_string();
    if domain.is_empty() {
        return Err("domain field is empty".to_string());
    }
    // A leading dot means subdomain matching regardless of the flag field.
    let include_subdomains = domain.starts_with('.') || parse_bool(fields[1], "subdomains")?;
    let path = fields[2].to_string();
    let secure = parse_bool(fields[3], "secure")?;

    let expires = match fields[4] {
        "" | "0" => None,
        raw => Some(
            raw.parse::<u64>()
                .map_err(|_| format!("expires field must be a non-negative integer, got '{raw}'"))?,
        ),
    };

    // An empty name field marks a cookie without a value; the actual name
    // then sits in the value position.
    let (name, value) = if fields[5].is_empty() {
        if fields[6].is_empty() {
            return Err("both name and value fields are empty".to_string());
        }
        (fields[6].to_string(), None)
    } else {
        (fields[5].to_string(), Some(fields[6].to_string()))
    };

    Ok(Cookie::new(
        domain,
        include_subdomains,
        path,
        secure,
        expires,
        name,
        value,
        http_only,
    ))
}

fn parse_bool(value: &str, field_name: &str) -> Result<bool, String> {
    match value {
        "TRUE" => Ok(true),
        "FALSE" => Ok(false),
        _ => Err(format!(
            "{field_name} field must be TRUE or FALSE, got '{value}'"
        )),
    }
}

/// Redacts the value field (7th) from a line for safe diagnostics.
fn redact_line(line: &str) -> String {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() >= 7 {
        let mut redacted = fields[..6].join("\t");
        redacted.push_str("\t[REDACTED]");
        redacted
    } else {
        line.to_string()
    }
}

/// Writes `cookies` in Netscape format.
///
/// Session cookies are skipped unless `ignore_discard` keeps them; expired
/// cookies are skipped unless `ignore_expires` keeps them.
///
/// # Errors
///
/// Returns [`CookieError::Io`] on write failure.
pub(crate) fn write(
    out: &mut impl Write,
    cookies: &[Cookie],
    path: &str,
    ignore_discard: bool,
    ignore_expires: bool,
    now: u64,
) -> Result<(), CookieError> {
    let io_err = |source| CookieError::Io {
        path: path.to_string(),
        source,
    };

    out.write_all(FILE_HEADER.as_bytes()).map_err(io_err)?;
    for cookie in cookies {
        match cookie.expires {
            None if !ignore_discard => continue,
            Some(expires) if expires <= now && !ignore_expires => continue,
            _ => {}
        }

        let prefix = if cookie.http_only { HTTP_ONLY_PREFIX } else { "" };
        // Value-less cookies keep the on-disk convention: empty name field,
        // name written in the value position.
        let (name, value) = match cookie.value() {
            Some(value) => (cookie.name.as_str(), value),
            None => ("", cookie.name.as_str()),
        };
        let line = format!(
            "{prefix}{}\t{}\t{}\t{}\t{}\t{name}\t{value}\n",
            cookie.domain,
            if cookie.include_subdomains { "TRUE" } else { "FALSE" },
            cookie.path,
            if cookie.secure { "TRUE" } else { "FALSE" },
            cookie.expires.unwrap_or(0),
        );
        out.write_all(line.as_bytes()).map_err(io_err)?;
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn parse_str(input: &str) -> Vec<Cookie> {
        parse(Cursor::new(input.as_bytes()), "test.txt").unwrap()
    }

    #[test]
    fn test_parse_valid_file() {
        let input = "\
# Netscape HTTP Cookie File
.example.com\tTRUE\t/\tFALSE\t0\tsession\tabc123
.other.com\tTRUE\t/path\tTRUE\t1700000000\ttoken\txyz789
";
        let cookies = parse_str(input);
        assert_eq!(cookies.len(), 2);

        assert_eq!(cookies[0].domain, ".example.com");
        assert!(cookies[0].include_subdomains);
        assert_eq!(cookies[0].path, "/");
        assert!(!cookies[0].secure);
        assert_eq!(cookies[0].expires, None, "0 means session cookie");
        assert_eq!(cookies[0].name, "session");
        assert_eq!(cookies[0].value(), Some("abc123"));

        assert!(cookies[1].secure);
        assert_eq!(cookies[1].expires, Some(1_700_000_000));
    }

    #[test]
    fn test_parse_http_only_prefix_is_data() {
        let input = "#HttpOnly_.example.com\tTRUE\t/\tFALSE\t0\tsid\tsecret\n";
        let cookies = parse_str(input);
        assert_eq!(cookies.len(), 1, "#HttpOnly_ lines are cookies, not comments");
        assert!(cookies[0].http_only);
        assert_eq!(cookies[0].name, "sid");
    }

    #[test]
    fn test_parse_plain_comment_skipped() {
        let input = "# just a comment\n#Another\n";
        assert!(parse_str(input).is_empty());
    }

    #[test]
    fn test_parse_value_less_cookie_swaps_fields() {
        let input = ".example.com\tTRUE\t/\tFALSE\t0\t\tlonely\n";
        let cookies = parse_str(input);
        assert_eq!(cookies.len(), 1);
        assert_eq!(cookies[0].name, "lonely");
        assert_eq!(cookies[0].value(), None);
    }

    #[test]
    fn test_parse_malformed_lines_skipped_not_fatal() {
        let input = "\
.good.com\tTRUE\t/\tFALSE\t0\tname\tvalue
complete garbage
.also.com\tMAYBE\t/\tFALSE\t0\tname\tvalue
.good2.com\tTRUE\t/\tFALSE\tnot-a-number\tname\tvalue
.good3.com\tTRUE\t/\tFALSE\t0\tother\tval
";
        let cookies = parse_str(input);
        assert_eq!(
            cookies.len(),
            2,
            "malformed lines must be skipped without aborting the rest"
        );
    }

    #[test]
    fn test_parse_leading_dot_implies_subdomains() {
        let input = ".example.com\tFALSE\t/\tFALSE\t0\tname\tvalue\n";
        let cookies = parse_str(input);
        assert!(
            cookies[0].include_subdomains,
            "a dotted domain always tail-matches, whatever the flag says"
        );
    }

    #[test]
    fn test_parse_crlf_line_endings() {
        let input = "# Header\r\n.example.com\tTRUE\t/\tFALSE\t0\tname\tvalue\r\n";
        let cookies = parse_str(input);
        assert_eq!(cookies.len(), 1);
        assert_eq!(cookies[0].value(), Some("value"));
    }

    #[test]
    fn test_redact_line_hides_value() {
        let line = ".example.com\tTRUE\t/\tFALSE\t0\tname\tsecret_value";
        let redacted = redact_line(line);
        assert!(!redacted.contains("secret_value"));
        assert!(redacted.contains("[REDACTED]"));
    }

    #[test]
    fn test_write_round_trip() {
        let cookies = vec![
            Cookie::new(
                ".example.com".to_string(),
                true,
                "/".to_string(),
                false,
                Some(4_000_000_000),
                "session".to_string(),
                Some("abc123".to_string()),
                false,
            ),
            Cookie::new(
                "exact.com".to_string(),
                false,
                "/api".to_string(),
                true,
                Some(4_000_000_000),
                "sid".to_string(),
                Some("secret".to_string()),
                true,
            ),
        ];

        let mut buf = Vec::new();
        write(&mut buf, &cookies, "test.txt", false, false, 1_000).unwrap();
        let text = String::from_utf8(buf.clone()).unwrap();
        assert!(text.starts_with("# Netscape HTTP Cookie File\n"));
        assert!(text.contains("#HttpOnly_exact.com\tFALSE\t/api\tTRUE\t4000000000\tsid\tsecret\n"));

        let reparsed = parse(Cursor::new(buf.as_slice()), "test.txt").unwrap();
        assert_eq!(reparsed.len(), 2);
        assert_eq!(reparsed[1].name, "sid");
        assert!(reparsed[1].http_only);
    }

    #[test]
    fn test_write_skips_session_cookies_by_default() {
        let session = Cookie::new(
            ".example.com".to_string(),
            true,
            "/".to_string(),
            false,
            None,
            "sess".to_string(),
            Some("v".to_string()),
            false,
        );

        let mut buf = Vec::new();
        write(&mut buf, std::slice::from_ref(&session), "t", false, false, 0).unwrap();
        assert!(!String::from_utf8(buf).unwrap().contains("sess"));

        let mut buf = Vec::new();
        write(&mut buf, std::slice::from_ref(&session), "t", true, false, 0).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(
            text.contains("sess"),
            "ignore_discard must keep session cookies: {text}"
        );
        assert!(text.contains("\t0\tsess\t"), "session expiry is written as 0");
    }

    #[test]
    fn test_write_skips_expired_cookies_by_default() {
        let expired = Cookie::new(
            ".example.com".to_string(),
            true,
            "/".to_string(),
            false,
            Some(500),
            "old".to_string(),
            Some("v".to_string()),
            false,
        );

        let mut buf = Vec::new();
        write(&mut buf, std::slice::from_ref(&expired), "t", false, false, 1_000).unwrap();
        assert!(!String::from_utf8(buf).unwrap().contains("old"));

        let mut buf = Vec::new();
        write(&mut buf, std::slice::from_ref(&expired), "t", false, true, 1_000).unwrap();
        assert!(String::from_utf8(buf).unwrap().contains("old"));
    }

    #[test]
    fn test_write_value_less_cookie_keeps_convention() {
        let cookie = Cookie::new(
            ".example.com".to_string(),
            true,
            "/".to_string(),
            false,
            Some(4_000_000_000),
            "flag".to_string(),
            None,
            false,
        );
        let mut buf = Vec::new();
        write(&mut buf, std::slice::from_ref(&cookie), "t", false, false, 0).unwrap();
        assert!(
            String::from_utf8(buf).unwrap().contains("\t\tflag\n"),
            "name field must be empty with the name in the value position"
        );
    }
}
