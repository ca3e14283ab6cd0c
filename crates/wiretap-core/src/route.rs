//! Route-key derivation.
//!
//! Every capture is filed under a route segment (a filesystem-safe rendering
//! of the page URL path) and a short identity (a prefix of the protocol's
//! target id). Both feed the output paths of the log writers.

use percent_encoding::percent_decode_str;
use thiserror::Error;
use url::Url;

/// Route and identity used when a connection cannot be resolved.
pub const UNKNOWN_ROUTE: &str = "unknown";

/// Route segment used for an empty path.
const ROOT_ROUTE: &str = "root";

/// Replacement for a route that would name `.` or `..`.
const DOT_ROUTE: &str = "_";

/// Length of a short identity.
const SHORT_IDENTITY_LEN: usize = 8;

/// Errors from route derivation.
#[derive(Debug, Error)]
pub enum RouteError {
    /// The input could not be parsed as an absolute URL.
    #[error("invalid url {url:?}: {source}")]
    InvalidUrl {
        /// The rejected input.
        url: String,
        /// Parser error.
        source: url::ParseError,
    },
}

/// Map a URL to a filesystem-safe route segment.
///
/// The path is percent-decoded, one leading and one trailing `/` are
/// removed and the remaining separators become `_`. An empty path (or a URL
/// without a hierarchical path, such as `about:blank`) maps to `root`.
/// NUL bytes are dropped and a bare `.` or `..` becomes `_`, so the result
/// is always a single path component.
pub fn derive_route(raw: &str) -> Result<String, RouteError> {
    let parsed = Url::parse(raw).map_err(|source| RouteError::InvalidUrl {
        url: raw.to_string(),
        source,
    })?;
    if parsed.cannot_be_a_base() {
        return Ok(ROOT_ROUTE.to_string());
    }

    let decoded = percent_decode_str(parsed.path()).decode_utf8_lossy();
    let path = decoded.strip_prefix('/').unwrap_or(&decoded);
    if path.is_empty() {
        return Ok(ROOT_ROUTE.to_string());
    }
    let path = path.strip_suffix('/').unwrap_or(path);
    if path.is_empty() {
        return Ok(ROOT_ROUTE.to_string());
    }
    let segment: String = path
        .chars()
        .filter(|&c| c != '\0')
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect();
    Ok(match segment.as_str() {
        "" => ROOT_ROUTE.to_string(),
        "." | ".." => DOT_ROUTE.to_string(),
        _ => segment,
    })
}

/// First eight characters of a protocol identifier (all of it if shorter).
///
/// Distinct ids sharing a prefix collide; the prefix is only used to keep
/// file names readable.
pub fn short_identity(id: &str) -> &str {
    match id.char_indices().nth(SHORT_IDENTITY_LEN) {
        Some((idx, _)) => &id[..idx],
        None => id,
    }
}

/// Route information for one browser connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionRoute {
    /// Protocol-level connection (target) id.
    pub connection_id: String,
    /// URL the route was derived from.
    pub origin_url: String,
    /// Filesystem-safe route segment.
    pub route_segment: String,
    /// Short identity used in file names.
    pub short_identity: String,
}

impl ConnectionRoute {
    /// Derive the route for `connection_id` currently showing `url`.
    ///
    /// A malformed URL yields the `unknown` route segment.
    pub fn derive(connection_id: &str, url: &str) -> Self {
        let route_segment = derive_route(url).unwrap_or_else(|_| UNKNOWN_ROUTE.to_string());
        Self {
            connection_id: connection_id.to_string(),
            origin_url: url.to_string(),
            route_segment,
            short_identity: short_identity(connection_id).to_string(),
        }
    }

    /// The fallback route for unregistered connections.
    pub fn unknown() -> Self {
        Self {
            connection_id: String::new(),
            origin_url: String::new(),
            route_segment: UNKNOWN_ROUTE.to_string(),
            short_identity: UNKNOWN_ROUTE.to_string(),
        }
    }
}
