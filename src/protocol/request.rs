use crate::error::{ParseErrorKind, RtspError};

/// Maximum size of a buffered request (headers + declared body) before
/// parsing gives up with a `414`-mapped error.
pub const MAX_REQUEST_SIZE: usize = 16 * 1024;

/// A parsed RTSP request (RFC 2326 §6).
///
/// ```text
/// Method SP Request-URI SP RTSP-Version CRLF
/// *(Header: Value CRLF)
/// CRLF
/// [body]
/// ```
///
/// Header lookup is case-insensitive per RFC 2326 §4.2.
#[derive(Debug, Clone)]
pub struct RtspRequest {
    /// RTSP method (OPTIONS, DESCRIBE, SETUP, PLAY, PAUSE, TEARDOWN,
    /// GET_PARAMETER, SET_PARAMETER, or any other token — unrecognized
    /// methods are rejected by the handler with `501`, not here).
    pub method: String,
    /// Request-URI (e.g. `rtsp://host:port/stream/trackID=0`).
    pub uri: String,
    /// Protocol version (expected: `RTSP/1.0`).
    pub version: String,
    /// Headers as ordered (name, value) pairs. Names are stored as-received;
    /// lookups via [`get_header`](Self::get_header) are case-insensitive.
    pub headers: Vec<(String, String)>,
    /// Request body, present when `Content-Length` was non-zero (used by
    /// `SET_PARAMETER`, RFC 2326 §10.9).
    pub body: Vec<u8>,
}

/// Outcome of attempting to parse one request out of a connection's
/// receive buffer.
pub enum ParseOutcome {
    /// Not enough bytes yet for a complete request; read more and retry.
    NeedMore,
    /// A full request was parsed, consuming `usize` bytes from the front
    /// of the buffer.
    Complete(RtspRequest, usize),
    /// The buffered bytes can never form a valid request.
    Malformed(RtspError),
}

impl RtspRequest {
    /// Parse a complete RTSP request from its full text representation
    /// (convenience wrapper over [`parse_buffered`] for callers, such as
    /// unit tests, that already have the whole message in hand).
    pub fn parse(raw: &str) -> crate::error::Result<Self> {
        match parse_buffered(raw.as_bytes()) {
            ParseOutcome::Complete(request, _) => Ok(request),
            ParseOutcome::Malformed(e) => Err(e),
            ParseOutcome::NeedMore => Err(RtspError::Parse {
                kind: ParseErrorKind::EmptyRequest,
            }),
        }
    }

    /// Look up a header value by name (case-insensitive, RFC 2326 §4.2).
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Returns the CSeq header value (RFC 2326 §12.17).
    pub fn cseq(&self) -> Option<&str> {
        self.get_header("CSeq")
    }

    fn content_length(&self) -> usize {
        self.get_header("Content-Length")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0)
    }
}

/// Parse one request out of a connection's receive buffer, per the
/// incremental contract: the header block must be fully buffered before
/// any attempt to parse, and a declared `Content-Length` body must be
/// fully buffered too before returning `Complete`.
pub fn parse_buffered(buf: &[u8]) -> ParseOutcome {
    let Some(header_end) = find_header_terminator(buf) else {
        if buf.len() > MAX_REQUEST_SIZE {
            return ParseOutcome::Malformed(RtspError::Parse {
                kind: ParseErrorKind::TooLarge,
            });
        }
        return ParseOutcome::NeedMore;
    };

    let header_bytes = &buf[..header_end.headers_end];
    let header_text = match std::str::from_utf8(header_bytes) {
        Ok(s) => s,
        Err(_) => {
            return ParseOutcome::Malformed(RtspError::Parse {
                kind: ParseErrorKind::InvalidHeader,
            });
        }
    };

    let mut request = match parse_headers(header_text) {
        Ok(r) => r,
        Err(e) => return ParseOutcome::Malformed(e),
    };

    let content_length = request.content_length();
    let body_start = header_end.body_start;
    let total_len = body_start + content_length;

    if total_len > MAX_REQUEST_SIZE {
        return ParseOutcome::Malformed(RtspError::Parse {
            kind: ParseErrorKind::TooLarge,
        });
    }

    if buf.len() < total_len {
        return ParseOutcome::NeedMore;
    }

    request.body = buf[body_start..total_len].to_vec();
    ParseOutcome::Complete(request, total_len)
}

struct HeaderTerminator {
    /// Index of the byte after the last header line (start of the blank line).
    headers_end: usize,
    /// Index of the first body byte (after the blank line terminator).
    body_start: usize,
}

/// Scan for the blank line that ends the header block: `\r\n\r\n` or `\n\n`.
fn find_header_terminator(buf: &[u8]) -> Option<HeaderTerminator> {
    if let Some(pos) = find_subslice(buf, b"\r\n\r\n") {
        return Some(HeaderTerminator {
            headers_end: pos,
            body_start: pos + 4,
        });
    }
    if let Some(pos) = find_subslice(buf, b"\n\n") {
        return Some(HeaderTerminator {
            headers_end: pos,
            body_start: pos + 2,
        });
    }
    None
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn parse_headers(header_text: &str) -> crate::error::Result<RtspRequest> {
    let mut lines = header_text.lines();

    let request_line = lines.next().ok_or(RtspError::Parse {
        kind: ParseErrorKind::EmptyRequest,
    })?;

    let parts: Vec<&str> = request_line.split_whitespace().collect();
    if parts.len() != 3 {
        return Err(RtspError::Parse {
            kind: ParseErrorKind::InvalidRequestLine,
        });
    }

    let method = parts[0].to_string();
    let uri = parts[1].to_string();
    let version = parts[2].to_string();

    if version != "RTSP/1.0" {
        tracing::warn!(version, "client sent non-RTSP/1.0 version");
    }

    let mut headers = Vec::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let colon_pos = line.find(':').ok_or(RtspError::Parse {
            kind: ParseErrorKind::InvalidHeader,
        })?;
        let name = line[..colon_pos].trim().to_string();
        let value = line[colon_pos + 1..].trim().to_string();
        headers.push((name, value));
    }

    Ok(RtspRequest {
        method,
        uri,
        version,
        headers,
        body: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_options_request() {
        let raw = "OPTIONS rtsp://localhost:8554/test RTSP/1.0\r\nCSeq: 1\r\n\r\n";
        let req = RtspRequest::parse(raw).unwrap();
        assert_eq!(req.method, "OPTIONS");
        assert_eq!(req.uri, "rtsp://localhost:8554/test");
        assert_eq!(req.version, "RTSP/1.0");
        assert_eq!(req.cseq(), Some("1"));
    }

    #[test]
    fn parse_setup_with_transport() {
        let raw = "SETUP rtsp://localhost:8554/test/trackID=0 RTSP/1.0\r\n\
                   CSeq: 3\r\n\
                   Transport: RTP/AVP;unicast;client_port=8000-8001\r\n\r\n";
        let req = RtspRequest::parse(raw).unwrap();
        assert_eq!(req.method, "SETUP");
        assert_eq!(req.cseq(), Some("3"));
        assert_eq!(
            req.get_header("Transport"),
            Some("RTP/AVP;unicast;client_port=8000-8001")
        );
    }

    #[test]
    fn parse_empty_request() {
        assert!(RtspRequest::parse("").is_err());
    }

    #[test]
    fn parse_invalid_request_line() {
        assert!(RtspRequest::parse("JUST_A_METHOD\r\n\r\n").is_err());
    }

    #[test]
    fn header_lookup_case_insensitive() {
        let raw = "OPTIONS rtsp://localhost RTSP/1.0\r\ncseq: 42\r\n\r\n";
        let req = RtspRequest::parse(raw).unwrap();
        assert_eq!(req.get_header("CSeq"), Some("42"));
        assert_eq!(req.get_header("cseq"), Some("42"));
        assert_eq!(req.get_header("CSEQ"), Some("42"));
    }

    #[test]
    fn incomplete_headers_need_more() {
        let partial = b"OPTIONS rtsp://localhost RTSP/1.0\r\nCSeq: 1\r\n";
        match parse_buffered(partial) {
            ParseOutcome::NeedMore => {}
            _ => panic!("expected NeedMore"),
        }
    }

    #[test]
    fn content_length_body_requires_full_buffer() {
        let head = b"SET_PARAMETER rtsp://h/s RTSP/1.0\r\nCSeq: 4\r\nContent-Length: 10\r\n\r\n";
        let mut buf = head.to_vec();
        buf.extend_from_slice(b"12345"); // only 5 of 10 body bytes
        match parse_buffered(&buf) {
            ParseOutcome::NeedMore => {}
            _ => panic!("expected NeedMore while body is incomplete"),
        }

        buf.extend_from_slice(b"67890");
        match parse_buffered(&buf) {
            ParseOutcome::Complete(req, consumed) => {
                assert_eq!(req.body, b"1234567890");
                assert_eq!(consumed, buf.len());
            }
            _ => panic!("expected Complete once body is fully buffered"),
        }
    }

    #[test]
    fn oversized_request_without_terminator_is_malformed() {
        let buf = vec![b'A'; MAX_REQUEST_SIZE + 1];
        match parse_buffered(&buf) {
            ParseOutcome::Malformed(RtspError::Parse { kind }) => {
                assert_eq!(kind.to_string(), "request exceeds maximum size");
            }
            _ => panic!("expected Malformed(TooLarge)"),
        }
    }

    #[test]
    fn consumed_bytes_leave_pipelined_request_for_next_parse() {
        let first = b"OPTIONS rtsp://h/s RTSP/1.0\r\nCSeq: 1\r\n\r\n";
        let second = b"OPTIONS rtsp://h/s RTSP/1.0\r\nCSeq: 2\r\n\r\n";
        let mut buf = first.to_vec();
        buf.extend_from_slice(second);

        match parse_buffered(&buf) {
            ParseOutcome::Complete(req, consumed) => {
                assert_eq!(req.cseq(), Some("1"));
                assert_eq!(consumed, first.len());
                match parse_buffered(&buf[consumed..]) {
                    ParseOutcome::Complete(req2, _) => assert_eq!(req2.cseq(), Some("2")),
                    _ => panic!("expected second request to parse"),
                }
            }
            _ => panic!("expected Complete"),
        }
    }
}
