// HTTP/1.0 request/response framing, grounded on the forward-proxy's own
// parse_request/parse_response_header/is_blacklisted logic: GET-only,
// HTTP/1.0-only, absolute-URI host must match the Host header, blacklisted
// absolute URIs get rewritten to a fixed warning-page request.

pub const WARNING_HOST: &str = "www.warning.or.kr";
pub const WARNING_REQUEST: &[u8] = b"GET / HTTP/1.0\r\nHost: www.warning.or.kr\r\n\r\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContentType {
    #[default]
    None,
    ContentLength,
    Chunked,
}

pub struct ParsedRequest {
    pub host: String,
    pub port: u16,
    /// `Some` when the request was rewritten (blacklist hit); the reactor
    /// loop sends this instead of the original bytes.
    pub rewrite: Option<Vec<u8>>,
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// `None` means "not a well-formed request this proxy will forward" —
/// the reactor loop replies with a bare 400 and never opens a server fd.
pub fn parse_request(req: &[u8], black_urls: &[String]) -> Option<ParsedRequest> {
    if !req.starts_with(b"GET") || find(req, b"HTTP/1.0").is_none() {
        return None;
    }

    let host_tag = b"Host: ";
    let host_start = find(req, host_tag)? + host_tag.len();
    let host_end = host_start + find(&req[host_start..], b"\r\n")?;
    let host_header = std::str::from_utf8(&req[host_start..host_end]).ok()?;

    if let Some(uri_start) = find(req, b"http://").map(|i| i + 7) {
        let rest = &req[uri_start..];
        let space_end = find(rest, b" ");
        let slash_end = find(rest, b"/");
        let uri_host_end = match (space_end, slash_end) {
            (Some(s), Some(sl)) => uri_start + s.min(sl),
            (Some(s), None) => uri_start + s,
            (None, Some(sl)) => uri_start + sl,
            (None, None) => return None,
        };
        let uri_host = std::str::from_utf8(&req[uri_start..uri_host_end]).ok()?;
        if uri_host != host_header {
            return None;
        }

        let abs_uri_start = uri_start - 7;
        let abs_uri = std::str::from_utf8(&req[abs_uri_start..uri_host_end]).ok()?;
        if is_blacklisted(abs_uri, black_urls) {
            return Some(ParsedRequest {
                host: WARNING_HOST.to_string(),
                port: 80,
                rewrite: Some(WARNING_REQUEST.to_vec()),
            });
        }
    }

    let (host, port) = match host_header.split_once(':') {
        Some((h, p)) => (h.to_string(), p.parse().ok()?),
        None => (host_header.to_string(), 80),
    };

    Some(ParsedRequest { host, port, rewrite: None })
}

pub fn is_blacklisted(uri: &str, black_urls: &[String]) -> bool {
    black_urls.iter().any(|entry| uri.contains(entry.as_str()))
}

pub struct ParsedResponseHeader {
    pub content_type: ContentType,
    pub content_length: u32,
    pub header_length: u32,
}

/// Called once `\r\n\r\n` has appeared in the accumulated response buffer.
pub fn parse_response_header(res: &[u8]) -> Option<ParsedResponseHeader> {
    let header_end = find(res, b"\r\n\r\n")? + 4;

    let mut content_type = ContentType::None;
    let mut content_length = 0u32;

    if let Some(tag_pos) = find(res, b"Content-Length:") {
        let start = tag_pos + b"Content-Length:".len();
        let rest = std::str::from_utf8(&res[start..header_end.min(res.len())]).ok()?;
        let digits: String = rest.trim_start().chars().take_while(|c| c.is_ascii_digit()).collect();
        if digits.is_empty() {
            return None;
        }
        content_length = digits.parse().ok()?;
        content_type = ContentType::ContentLength;
    }

    if let Some(tag_pos) = find(res, b"Transfer-Encoding:") {
        let tail = &res[tag_pos..];
        if find(tail, b"chunked").is_some() {
            content_type = ContentType::Chunked;
        }
    }

    Some(ParsedResponseHeader {
        content_type,
        content_length,
        header_length: header_end as u32,
    })
}

/// Chunked framing ends with a zero-size chunk.
pub fn chunked_body_complete(res: &[u8]) -> bool {
    find(res, b"\r\n0\r\n\r\n").is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_get() {
        let req = b"GET http://example.com/ HTTP/1.0\r\nHost: example.com\r\n\r\n";
        let parsed = parse_request(req, &[]).unwrap();
        assert_eq!(parsed.host, "example.com");
        assert_eq!(parsed.port, 80);
        assert!(parsed.rewrite.is_none());
    }

    #[test]
    fn parses_host_header_port() {
        let req = b"GET http://example.com:8080/ HTTP/1.0\r\nHost: example.com:8080\r\n\r\n";
        let parsed = parse_request(req, &[]).unwrap();
        assert_eq!(parsed.port, 8080);
    }

    #[test]
    fn mismatched_uri_and_host_is_rejected() {
        let req = b"GET http://evil.com/ HTTP/1.0\r\nHost: example.com\r\n\r\n";
        assert!(parse_request(req, &[]).is_none());
    }

    #[test]
    fn non_get_is_rejected() {
        let req = b"POST / HTTP/1.0\r\nHost: example.com\r\n\r\n";
        assert!(parse_request(req, &[]).is_none());
    }

    #[test]
    fn blacklisted_uri_is_rewritten() {
        let req = b"GET http://bad.example.com/x HTTP/1.0\r\nHost: bad.example.com\r\n\r\n";
        let black = vec!["bad.example.com".to_string()];
        let parsed = parse_request(req, &black).unwrap();
        assert_eq!(parsed.host, WARNING_HOST);
        assert_eq!(parsed.rewrite.as_deref(), Some(WARNING_REQUEST));
    }

    #[test]
    fn content_length_header_parses() {
        let res = b"HTTP/1.0 200 OK\r\nContent-Length: 13\r\n\r\nHello, world!";
        let parsed = parse_response_header(res).unwrap();
        assert_eq!(parsed.content_type, ContentType::ContentLength);
        assert_eq!(parsed.content_length, 13);
    }

    #[test]
    fn chunked_header_parses() {
        let res = b"HTTP/1.0 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n0\r\n\r\n";
        let parsed = parse_response_header(res).unwrap();
        assert_eq!(parsed.content_type, ContentType::Chunked);
        assert!(chunked_body_complete(res));
    }
}
