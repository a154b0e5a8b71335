//! HTTP/1.1 response parsing
//!
//! [`ResponseParser`] is incremental and push-based: feed it bytes as they
//! arrive and it returns the response once the status line, header section
//! and body are complete. Body framing follows RFC 9112 Section 6.3.

use super::chunked::ChunkedDecoder;
use super::{
    Error, Headers, HttpResponse, Method, Result, Status, Version, MAX_HEADERS, MAX_HEAD_BYTES,
};
use bytes::{Buf, BytesMut};

/// Find the next CRLF in a buffer
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

/// Parse HTTP response status line
///
/// Format: VERSION STATUS [REASON]
/// Example: HTTP/1.1 200 OK
pub fn parse_status_line(line: &str) -> Result<(Version, Status, String)> {
    let parts: Vec<&str> = line.splitn(3, ' ').collect();

    if parts.len() < 2 {
        return Err(Error::Parse(format!(
            "Invalid status line: expected at least 2 parts, got {}",
            parts.len()
        )));
    }

    let version = Version::from_str(parts[0])?;
    if parts[1].len() != 3 || !parts[1].bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::Parse(format!("Invalid status code: {}", parts[1])));
    }
    let status_code = parts[1]
        .parse::<u16>()
        .map_err(|_| Error::Parse(format!("Invalid status code: {}", parts[1])))?;
    let status = Status::new(status_code)?;
    let reason = match parts.get(2) {
        Some(reason) => reason.to_string(),
        None => status.reason_phrase().to_string(),
    };

    Ok((version, status, reason))
}

/// Whether the connection stays open after this message
///
/// HTTP/1.1 defaults to keep-alive unless `Connection: close`; HTTP/1.0
/// defaults to close unless `Connection: keep-alive`.
pub fn is_keep_alive(version: Version, headers: &Headers) -> bool {
    if headers.has_token("Connection", "close") {
        return false;
    }
    match version {
        Version::Http11 | Version::Http2 => true,
        Version::Http10 => headers.has_token("Connection", "keep-alive"),
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ParserState {
    StatusLine,
    Headers,
    Body,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum BodyFraming {
    Empty,
    Length(usize),
    Chunked,
    UntilEof,
}

/// HTTP/1.1 response parser
#[derive(Debug)]
pub struct ResponseParser {
    state: ParserState,
    buffer: BytesMut,
    /// Request was HEAD: the response never has a body
    head_request: bool,
    head_bytes: usize,
    version: Version,
    status: Option<Status>,
    reason: String,
    headers: Headers,
    framing: BodyFraming,
    chunked: ChunkedDecoder,
    body: BytesMut,
    trailers: Headers,
    keep_alive: bool,
}

impl ResponseParser {
    /// Create a parser for the response to a request with this method
    pub fn new(method: Method) -> Self {
        ResponseParser {
            state: ParserState::StatusLine,
            buffer: BytesMut::new(),
            head_request: method == Method::Head,
            head_bytes: 0,
            version: Version::Http11,
            status: None,
            reason: String::new(),
            headers: Headers::new(),
            framing: BodyFraming::Empty,
            chunked: ChunkedDecoder::new(),
            body: BytesMut::new(),
            trailers: Headers::new(),
            keep_alive: false,
        }
    }

    /// Feed data to the parser
    ///
    /// Returns Ok(Some(response)) when a complete response is parsed,
    /// Ok(None) if more data is needed, or Err on parse error.
    pub fn parse(&mut self, data: &[u8]) -> Result<Option<HttpResponse>> {
        self.buffer.extend_from_slice(data);

        loop {
            let progressed = match self.state {
                ParserState::StatusLine => self.parse_status_line()?,
                ParserState::Headers => self.parse_headers()?,
                ParserState::Body => self.parse_body()?,
                ParserState::Complete => return Ok(None),
            };
            if self.state == ParserState::Complete {
                return Ok(Some(self.build()));
            }
            if !progressed {
                return Ok(None);
            }
        }
    }

    /// Signal EOF from the peer
    ///
    /// Completes a read-until-close body; anything else still in progress
    /// is truncated.
    pub fn finish(&mut self) -> Result<HttpResponse> {
        match (self.state, self.framing) {
            (ParserState::Body, BodyFraming::UntilEof) => {
                self.state = ParserState::Complete;
                Ok(self.build())
            }
            (ParserState::StatusLine, _) if self.buffer.is_empty() && self.head_bytes == 0 => {
                Err(Error::ConnectionClosed)
            }
            _ => Err(Error::Incomplete),
        }
    }

    /// Whether the connection may carry another exchange
    pub fn is_reusable(&self) -> bool {
        self.state == ParserState::Complete
            && self.keep_alive
            && self.framing != BodyFraming::UntilEof
            && self.buffer.is_empty()
    }

    /// Reset the parser for reuse
    pub fn reset(&mut self, method: Method) {
        *self = ResponseParser::new(method);
    }

    /// Take one line off the head, enforcing the head-size bound
    fn take_line(&mut self) -> Result<Option<String>> {
        let Some(crlf_pos) = find_crlf(&self.buffer) else {
            if self.head_bytes + self.buffer.len() > MAX_HEAD_BYTES {
                return Err(Error::HeadersTooLarge(format!(
                    "response head exceeds {} bytes",
                    MAX_HEAD_BYTES
                )));
            }
            return Ok(None);
        };
        self.head_bytes += crlf_pos + 2;
        if self.head_bytes > MAX_HEAD_BYTES {
            return Err(Error::HeadersTooLarge(format!(
                "response head exceeds {} bytes",
                MAX_HEAD_BYTES
            )));
        }
        let line = String::from_utf8_lossy(&self.buffer[..crlf_pos]).into_owned();
        self.buffer.advance(crlf_pos + 2);
        Ok(Some(line))
    }

    fn parse_status_line(&mut self) -> Result<bool> {
        let Some(line) = self.take_line()? else {
            return Ok(false);
        };
        let (version, status, reason) = parse_status_line(&line)?;
        self.version = version;
        self.status = Some(status);
        self.reason = reason;
        self.state = ParserState::Headers;
        Ok(true)
    }

    fn parse_headers(&mut self) -> Result<bool> {
        while let Some(line) = self.take_line()? {
            if line.is_empty() {
                self.end_of_head()?;
                return Ok(true);
            }
            if line.starts_with([' ', '\t']) {
                return Err(Error::InvalidHeader("obsolete line folding".to_string()));
            }
            if self.headers.len() >= MAX_HEADERS {
                return Err(Error::HeadersTooLarge(format!(
                    "more than {} header fields",
                    MAX_HEADERS
                )));
            }
            let (name, value) = Headers::parse_header_line(&line)?;
            self.headers.insert(name, value);
        }
        Ok(false)
    }

    fn end_of_head(&mut self) -> Result<()> {
        let status = self.status.unwrap_or(Status::OK);

        // interim responses are dropped; the final one follows
        if status.is_informational() && status.code() != 101 {
            self.headers.clear();
            self.status = None;
            self.head_bytes = 0;
            self.state = ParserState::StatusLine;
            return Ok(());
        }

        let has_te = self.headers.contains("Transfer-Encoding");
        let content_length = self.content_length()?;
        self.framing = if self.head_request
            || status.is_informational()
            || status.code() == 204
            || status.code() == 304
        {
            BodyFraming::Empty
        } else if has_te {
            if self.is_chunked() {
                BodyFraming::Chunked
            } else {
                BodyFraming::UntilEof
            }
        } else {
            match content_length {
                Some(0) => BodyFraming::Empty,
                Some(n) => BodyFraming::Length(n),
                None => BodyFraming::UntilEof,
            }
        };

        // a message framed by both headers cannot be trusted for reuse
        self.keep_alive = is_keep_alive(self.version, &self.headers)
            && !(has_te && content_length.is_some())
            && status.code() != 101;

        self.state = if self.framing == BodyFraming::Empty {
            ParserState::Complete
        } else {
            ParserState::Body
        };
        Ok(())
    }

    /// Transfer-Encoding whose final coding is chunked
    fn is_chunked(&self) -> bool {
        self.headers
            .get_all("Transfer-Encoding")
            .iter()
            .flat_map(|v| v.split(','))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .last()
            .is_some_and(|t| t.eq_ignore_ascii_case("chunked"))
    }

    /// Content-Length, rejecting malformed or conflicting values
    fn content_length(&self) -> Result<Option<usize>> {
        let mut length = None;
        for value in self
            .headers
            .get_all("Content-Length")
            .iter()
            .flat_map(|v| v.split(','))
        {
            let value = value.trim();
            if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
                return Err(Error::Parse(format!("Invalid Content-Length: {}", value)));
            }
            let n = value
                .parse::<usize>()
                .map_err(|_| Error::Parse(format!("Invalid Content-Length: {}", value)))?;
            match length {
                Some(prev) if prev != n => {
                    return Err(Error::Parse(format!(
                        "Conflicting Content-Length values: {} and {}",
                        prev, n
                    )));
                }
                _ => length = Some(n),
            }
        }
        Ok(length)
    }

    fn parse_body(&mut self) -> Result<bool> {
        if self.buffer.is_empty() {
            return Ok(false);
        }
        match self.framing {
            BodyFraming::Empty => self.state = ParserState::Complete,
            BodyFraming::Length(remaining) => {
                let n = remaining.min(self.buffer.len());
                self.body.extend_from_slice(&self.buffer.split_to(n));
                self.framing = BodyFraming::Length(remaining - n);
                if remaining == n {
                    self.state = ParserState::Complete;
                }
            }
            BodyFraming::Chunked => {
                let (consumed, complete) = self.chunked.decode(&self.buffer, &mut self.body)?;
                self.buffer.advance(consumed);
                if complete {
                    self.trailers = self.chunked.take_trailers();
                    self.state = ParserState::Complete;
                } else if consumed == 0 {
                    return Ok(false);
                }
            }
            BodyFraming::UntilEof => {
                let rest = self.buffer.split();
                self.body.extend_from_slice(&rest);
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn build(&mut self) -> HttpResponse {
        HttpResponse::builder()
            .version(self.version)
            .status(self.status.unwrap_or(Status::OK))
            .reason(std::mem::take(&mut self.reason))
            .headers(std::mem::take(&mut self.headers))
            .trailers(std::mem::take(&mut self.trailers))
            .body(std::mem::take(&mut self.body).freeze())
            .build()
    }
}

impl Default for ResponseParser {
    fn default() -> Self {
        Self::new(Method::Get)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_all(method: Method, data: &[u8]) -> (HttpResponse, bool) {
        let mut parser = ResponseParser::new(method);
        let response = parser.parse(data).unwrap().expect("complete response");
        (response, parser.is_reusable())
    }

    #[test]
    fn test_parse_status_line() {
        let (version, status, reason) = parse_status_line("HTTP/1.1 200 OK").unwrap();
        assert_eq!(version, Version::Http11);
        assert_eq!(status.code(), 200);
        assert_eq!(reason, "OK");

        let (version, status, reason) = parse_status_line("HTTP/1.0 404").unwrap();
        assert_eq!(version, Version::Http10);
        assert_eq!(status.code(), 404);
        assert_eq!(reason, "Not Found");

        let (_, _, reason) = parse_status_line("HTTP/1.1 500 Server Blew Up").unwrap();
        assert_eq!(reason, "Server Blew Up");

        assert!(parse_status_line("HTTP/1.1 20 OK").is_err());
        assert!(parse_status_line("HTTP/2 200 OK").is_err());
    }

    #[test]
    fn test_content_length_body() {
        let (resp, reusable) =
            parse_all(Method::Get, b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nHello");
        assert_eq!(resp.status().code(), 200);
        assert_eq!(&resp.body()[..], b"Hello");
        assert!(reusable);
    }

    #[test]
    fn test_incremental() {
        let mut parser = ResponseParser::default();
        assert!(parser.parse(b"HTTP/1.1 ").unwrap().is_none());
        assert!(parser.parse(b"200 OK\r\n").unwrap().is_none());
        assert!(parser.parse(b"Content-Type: text/plain\r\n").unwrap().is_none());
        assert!(parser.parse(b"Content-Length: 4\r\n\r\n").unwrap().is_none());
        assert!(parser.parse(b"Te").unwrap().is_none());
        let resp = parser.parse(b"st").unwrap().unwrap();

        assert_eq!(&resp.body()[..], b"Test");
        assert_eq!(resp.headers().get("Content-Type"), Some("text/plain"));
    }

    #[test]
    fn test_chunked_body_with_trailers() {
        let (resp, reusable) = parse_all(
            Method::Get,
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n\
              4\r\nWiki\r\n5\r\npedia\r\n0\r\nX-Checksum: abc\r\n\r\n",
        );
        assert_eq!(&resp.body()[..], b"Wikipedia");
        assert_eq!(resp.trailers().get("X-Checksum"), Some("abc"));
        assert!(reusable);
    }

    #[test]
    fn test_chunked_wins_over_content_length() {
        let (resp, reusable) = parse_all(
            Method::Get,
            b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\nTransfer-Encoding: chunked\r\n\r\n\
              3\r\nabc\r\n0\r\n\r\n",
        );
        assert_eq!(&resp.body()[..], b"abc");
        assert!(!reusable);
    }

    #[test]
    fn test_conflicting_content_length() {
        let mut parser = ResponseParser::default();
        let result =
            parser.parse(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\nContent-Length: 6\r\n\r\n");
        assert!(matches!(result, Err(Error::Parse(_))));

        // repeated identical values are fine
        let (resp, _) = parse_all(
            Method::Get,
            b"HTTP/1.1 200 OK\r\nContent-Length: 2, 2\r\n\r\nok",
        );
        assert_eq!(&resp.body()[..], b"ok");
    }

    #[test]
    fn test_read_until_eof() {
        let mut parser = ResponseParser::default();
        assert!(parser.parse(b"HTTP/1.1 200 OK\r\n\r\npart one ").unwrap().is_none());
        assert!(parser.parse(b"part two").unwrap().is_none());
        let resp = parser.finish().unwrap();
        assert_eq!(&resp.body()[..], b"part one part two");
        assert!(!parser.is_reusable());
    }

    #[test]
    fn test_informational_skipped() {
        let (resp, _) = parse_all(
            Method::Get,
            b"HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 103 Early Hints\r\nLink: </a>\r\n\r\n\
              HTTP/1.1 201 Created\r\nContent-Length: 0\r\n\r\n",
        );
        assert_eq!(resp.status().code(), 201);
        assert!(!resp.headers().contains("Link"));
    }

    #[test]
    fn test_bodiless_responses() {
        let (resp, reusable) =
            parse_all(Method::Head, b"HTTP/1.1 200 OK\r\nContent-Length: 1234\r\n\r\n");
        assert!(resp.body().is_empty());
        assert!(reusable);

        let (resp, _) = parse_all(Method::Get, b"HTTP/1.1 204 No Content\r\n\r\n");
        assert!(resp.body().is_empty());

        let (resp, _) = parse_all(
            Method::Get,
            b"HTTP/1.1 304 Not Modified\r\nContent-Length: 10\r\n\r\n",
        );
        assert!(resp.body().is_empty());
    }

    #[test]
    fn test_keep_alive_rules() {
        let mut headers = Headers::new();
        assert!(is_keep_alive(Version::Http11, &headers));
        assert!(!is_keep_alive(Version::Http10, &headers));

        headers.insert("Connection", "keep-alive");
        assert!(is_keep_alive(Version::Http10, &headers));

        let mut headers = Headers::new();
        headers.insert("Connection", "Close");
        assert!(!is_keep_alive(Version::Http11, &headers));

        let (_, reusable) = parse_all(
            Method::Get,
            b"HTTP/1.0 200 OK\r\nContent-Length: 0\r\n\r\n",
        );
        assert!(!reusable);
    }

    #[test]
    fn test_header_limits() {
        let mut data = b"HTTP/1.1 200 OK\r\n".to_vec();
        for i in 0..=MAX_HEADERS {
            data.extend_from_slice(format!("X-H{}: v\r\n", i).as_bytes());
        }
        data.extend_from_slice(b"\r\n");
        let mut parser = ResponseParser::default();
        assert!(matches!(parser.parse(&data), Err(Error::HeadersTooLarge(_))));

        let mut parser = ResponseParser::default();
        let huge = vec![b'a'; MAX_HEAD_BYTES + 1];
        assert!(parser.parse(b"HTTP/1.1 200 OK\r\nX-Big: ").unwrap().is_none());
        assert!(matches!(parser.parse(&huge), Err(Error::HeadersTooLarge(_))));
    }

    #[test]
    fn test_truncated_response() {
        let mut parser = ResponseParser::default();
        assert!(parser
            .parse(b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nabc")
            .unwrap()
            .is_none());
        assert!(matches!(parser.finish(), Err(Error::Incomplete)));

        let mut parser = ResponseParser::default();
        assert!(matches!(parser.finish(), Err(Error::ConnectionClosed)));
    }
}
