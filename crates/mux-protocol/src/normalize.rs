//! Request normalization for the multiplexed protocol
//!
//! A request built for a connection-per-request transport carries header
//! fields that are meaningless, or outright forbidden, once it travels as a
//! stream on a shared connection. `normalize_request` rewrites the request
//! in place before a channel hands it to the session:
//!
//! - the version marker becomes HTTP/2
//! - connection-specific fields are removed, including every field the
//!   `connection` header names
//! - `te` survives only as `te: trailers`
//! - the authority moves from the `host` header into the URI when needed

use bytes::Bytes;
use http::header::{HeaderName, CONNECTION, HOST, TE, TRANSFER_ENCODING, UPGRADE};
use http::uri::{Authority, PathAndQuery, Scheme};
use http::{HeaderMap, Method, Request, Uri, Version};

use crate::error::ProtocolError;

/// Connection-specific fields beyond the ones `http` names as constants
const KEEP_ALIVE: &str = "keep-alive";
const PROXY_CONNECTION: &str = "proxy-connection";

/// Normalize a request so it can be sent as one stream of a multiplexed session
pub fn normalize_request(request: &mut Request<Bytes>) -> Result<(), ProtocolError> {
    *request.version_mut() = Version::HTTP_2;

    strip_connection_headers(request.headers_mut());

    let is_connect = request.method() == Method::CONNECT;
    let uri = request.uri();
    let needs_authority = uri.authority().is_none();
    let needs_scheme = uri.scheme().is_none() && !is_connect;

    if needs_authority || needs_scheme {
        let host = if needs_authority {
            let value = request
                .headers_mut()
                .remove(HOST)
                .ok_or(ProtocolError::MissingAuthority)?;
            let host = value
                .to_str()
                .map_err(|e| ProtocolError::InvalidUri(e.to_string()))?
                .parse::<Authority>()
                .map_err(|e| ProtocolError::InvalidUri(e.to_string()))?;
            Some(host)
        } else {
            None
        };

        let mut parts = request.uri().clone().into_parts();
        if let Some(host) = host {
            parts.authority = Some(host);
        }
        if !is_connect {
            if parts.scheme.is_none() {
                parts.scheme = Some(Scheme::HTTPS);
            }
            if parts.path_and_query.is_none() {
                parts.path_and_query = Some(PathAndQuery::from_static("/"));
            }
        }
        *request.uri_mut() =
            Uri::from_parts(parts).map_err(|e| ProtocolError::InvalidUri(e.to_string()))?;
    }

    tracing::trace!("Normalized request {} {}", request.method(), request.uri());
    Ok(())
}

/// Remove connection-specific header fields
fn strip_connection_headers(headers: &mut HeaderMap) {
    // Fields listed as tokens of the connection header go too
    let nominated: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|token| HeaderName::from_bytes(token.trim().as_bytes()).ok())
        .collect();

    for name in nominated {
        headers.remove(name);
    }

    headers.remove(CONNECTION);
    headers.remove(TRANSFER_ENCODING);
    headers.remove(UPGRADE);
    headers.remove(KEEP_ALIVE);
    headers.remove(PROXY_CONNECTION);

    let te_is_trailers = headers
        .get_all(TE)
        .iter()
        .all(|value| value.as_bytes().eq_ignore_ascii_case(b"trailers"));
    if !te_is_trailers {
        headers.remove(TE);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(uri: &str) -> http::request::Builder {
        Request::builder().uri(uri).version(Version::HTTP_11)
    }

    #[test]
    fn test_version_becomes_http2() {
        let mut req = request("https://example.com/").body(Bytes::new()).unwrap();
        normalize_request(&mut req).unwrap();
        assert_eq!(req.version(), Version::HTTP_2);
    }

    #[test]
    fn test_connection_headers_removed() {
        let mut req = request("https://example.com/index.html")
            .header("connection", "keep-alive, x-session-hint")
            .header("keep-alive", "timeout=5")
            .header("proxy-connection", "keep-alive")
            .header("transfer-encoding", "chunked")
            .header("upgrade", "h2c")
            .header("x-session-hint", "abc")
            .header("accept", "text/html")
            .body(Bytes::new())
            .unwrap();

        normalize_request(&mut req).unwrap();

        let headers = req.headers();
        assert!(headers.get("connection").is_none());
        assert!(headers.get("keep-alive").is_none());
        assert!(headers.get("proxy-connection").is_none());
        assert!(headers.get("transfer-encoding").is_none());
        assert!(headers.get("upgrade").is_none());
        assert!(headers.get("x-session-hint").is_none());
        assert_eq!(headers.get("accept").unwrap(), "text/html");
    }

    #[test]
    fn test_te_trailers_kept() {
        let mut req = request("https://example.com/")
            .header("te", "trailers")
            .body(Bytes::new())
            .unwrap();
        normalize_request(&mut req).unwrap();
        assert_eq!(req.headers().get("te").unwrap(), "trailers");

        let mut req = request("https://example.com/")
            .header("te", "gzip")
            .body(Bytes::new())
            .unwrap();
        normalize_request(&mut req).unwrap();
        assert!(req.headers().get("te").is_none());
    }

    #[test]
    fn test_authority_from_host_header() {
        let mut req = request("/search?q=rust")
            .header("host", "example.com:8443")
            .body(Bytes::new())
            .unwrap();

        normalize_request(&mut req).unwrap();

        assert_eq!(req.uri().authority().unwrap().as_str(), "example.com:8443");
        assert_eq!(req.uri().scheme_str(), Some("https"));
        assert_eq!(req.uri().path_and_query().unwrap().as_str(), "/search?q=rust");
        assert!(req.headers().get("host").is_none());
    }

    #[test]
    fn test_missing_authority() {
        let mut req = request("/").body(Bytes::new()).unwrap();
        assert_eq!(
            normalize_request(&mut req),
            Err(ProtocolError::MissingAuthority)
        );
    }

    #[test]
    fn test_connect_keeps_authority_form() {
        let mut req = Request::builder()
            .method(Method::CONNECT)
            .uri("proxy.internal:443")
            .body(Bytes::new())
            .unwrap();

        normalize_request(&mut req).unwrap();

        assert_eq!(req.uri().scheme(), None);
        assert_eq!(req.uri().authority().unwrap().as_str(), "proxy.internal:443");
    }
}
