//! RFC 9112 HTTP/1.1 client connection.
//!
//! Uses httparse for response heads and raw I/O for request formatting.
//! Requests go out in origin-form, or in absolute-form when the connection
//! leads to a forward proxy.

use bytes::{Buf, Bytes, BytesMut};
use http::Method;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::{Error, Result};
use crate::protocol::Protocol;
use crate::request::Request;
use crate::response::Response;
use crate::transport::connector::MaybeHttpsStream;

/// Maximum response header size (64KB).
const MAX_HEADERS_SIZE: usize = 64 * 1024;

/// Maximum number of headers to parse.
const MAX_HEADERS_COUNT: usize = 100;

/// Read granularity.
const READ_CHUNK: usize = 8192;

/// Largest chunk a server may announce in a chunked body (16MB).
const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;

/// HTTP/1.1 connection.
#[derive(Debug)]
pub struct H1Connection {
    stream: MaybeHttpsStream,
    /// Bytes read past the end of the previous response.
    buffer: BytesMut,
    /// Whether the connection must be closed after the current response.
    should_close: bool,
    /// Send absolute-form request targets (forward proxy).
    absolute_form: bool,
    /// Ask the server to keep the connection open.
    keep_alive: bool,
    /// `Proxy-Authorization` established by an earlier challenge on this connection.
    proxy_authorization: Option<String>,
}

impl H1Connection {
    /// Wrap a stream. Keep-alive is requested, requests use origin-form.
    pub fn new(stream: MaybeHttpsStream) -> Self {
        Self {
            stream,
            buffer: BytesMut::new(),
            should_close: false,
            absolute_form: false,
            keep_alive: true,
            proxy_authorization: None,
        }
    }

    /// Send requests in absolute-form, as a forward proxy expects.
    pub fn with_absolute_form(mut self, absolute: bool) -> Self {
        self.absolute_form = absolute;
        self
    }

    /// Request keep-alive (`true`) or `Connection: close` (`false`).
    pub fn with_keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Attach a `Proxy-Authorization` value to every later request.
    /// Ignored unless the connection talks to a proxy.
    pub fn set_proxy_authorization(&mut self, value: String) {
        self.proxy_authorization = Some(value);
    }

    pub fn proxy_authorization(&self) -> Option<&str> {
        self.proxy_authorization.as_deref()
    }

    pub fn is_absolute_form(&self) -> bool {
        self.absolute_form
    }

    /// Whether another request may be sent on this connection.
    pub fn is_reusable(&self) -> bool {
        self.keep_alive && !self.should_close
    }

    /// Send a request and read the full response.
    pub async fn send_request(&mut self, req: &Request, read_timeout: Option<Duration>) -> Result<Response> {
        let head = self.encode_request(req)?;
        if req
            .headers
            .iter()
            .any(|(k, v)| k.eq_ignore_ascii_case("connection") && v.eq_ignore_ascii_case("close"))
        {
            self.should_close = true;
        }

        self.stream
            .write_all(&head)
            .await
            .map_err(|e| Error::HttpProtocol(format!("Failed to write request: {}", e)))?;
        if let Some(body) = &req.body {
            self.stream
                .write_all(body)
                .await
                .map_err(|e| Error::HttpProtocol(format!("Failed to write body: {}", e)))?;
        }
        self.stream
            .flush()
            .await
            .map_err(|e| Error::HttpProtocol(format!("Failed to flush: {}", e)))?;

        let response = self.read_response(&req.method, read_timeout).await;
        if response.is_err() {
            self.should_close = true;
        }
        response
    }

    fn encode_request(&self, req: &Request) -> Result<Vec<u8>> {
        for (name, value) in &req.headers {
            validate_header_name(name)?;
            validate_header_value(value)?;
        }

        let mut out = Vec::with_capacity(512);

        out.extend_from_slice(req.method.as_str().as_bytes());
        out.push(b' ');
        let target = if self.absolute_form {
            req.absolute_target()
        } else {
            req.path_and_query()
        };
        out.extend_from_slice(target.as_bytes());
        out.extend_from_slice(b" HTTP/1.1\r\n");

        let host = req
            .url
            .host_str()
            .ok_or_else(|| Error::invalid_url(format!("{} has no host", req.url)))?;
        push_header(&mut out, "Host", &match req.url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        });

        for (name, value) in &req.headers {
            if name.eq_ignore_ascii_case("host") || name.eq_ignore_ascii_case("proxy-authorization") {
                continue;
            }
            push_header(&mut out, name, value);
        }

        if !req.has_header("connection") {
            push_header(&mut out, "Connection", if self.keep_alive { "keep-alive" } else { "close" });
        }

        if self.absolute_form {
            if let Some(value) = &self.proxy_authorization {
                push_header(&mut out, "Proxy-Authorization", value);
            }
        }

        // MUST NOT send Content-Length alongside Transfer-Encoding.
        if !req.has_header("transfer-encoding") && !req.has_header("content-length") {
            match &req.body {
                Some(body) => push_header(&mut out, "Content-Length", &body.len().to_string()),
                None if matches!(req.method, Method::POST | Method::PUT | Method::PATCH) => {
                    push_header(&mut out, "Content-Length", "0")
                }
                None => {}
            }
        }

        out.extend_from_slice(b"\r\n");
        Ok(out)
    }

    /// Read a final response, skipping 1xx interim responses.
    async fn read_response(&mut self, method: &Method, read_timeout: Option<Duration>) -> Result<Response> {
        loop {
            let head = self.read_head(read_timeout).await?;

            if (100..200).contains(&head.status) && head.status != 101 {
                tracing::trace!("H1: skipping interim {} response", head.status);
                continue;
            }

            if head.close || head.status == 101 {
                self.should_close = true;
            }

            let has_body = !matches!(head.status, 100..=199 | 204 | 304) && *method != Method::HEAD;
            let body = if !has_body {
                Bytes::new()
            } else if head.chunked {
                self.read_chunked_body(read_timeout).await?
            } else if let Some(len) = head.content_length {
                self.read_exact_body(len, read_timeout).await?
            } else {
                self.should_close = true;
                self.read_until_close(read_timeout).await?
            };

            return Ok(Response::new(head.status, head.headers, body, Protocol::Http1_1));
        }
    }

    async fn read_head(&mut self, read_timeout: Option<Duration>) -> Result<Head> {
        loop {
            if let Some(end) = find_header_end(&self.buffer) {
                let head = parse_head(&self.buffer[..end])?;
                self.buffer.advance(end);
                return Ok(head);
            }
            if self.buffer.len() >= MAX_HEADERS_SIZE {
                return Err(Error::http_protocol("Response headers too large"));
            }
            if self.fill(read_timeout).await? == 0 {
                return Err(Error::http_protocol("Connection closed before response complete"));
            }
        }
    }

    async fn read_exact_body(&mut self, len: usize, read_timeout: Option<Duration>) -> Result<Bytes> {
        while self.buffer.len() < len {
            if self.fill(read_timeout).await? == 0 {
                return Err(Error::HttpProtocol(format!(
                    "Connection closed before receiving full body (got {} of {} bytes)",
                    self.buffer.len(),
                    len
                )));
            }
        }
        Ok(self.buffer.split_to(len).freeze())
    }

    async fn read_until_close(&mut self, read_timeout: Option<Duration>) -> Result<Bytes> {
        while self.fill(read_timeout).await? > 0 {}
        Ok(self.buffer.split().freeze())
    }

    /// chunked-body = *chunk last-chunk trailer-section CRLF
    async fn read_chunked_body(&mut self, read_timeout: Option<Duration>) -> Result<Bytes> {
        let mut body = BytesMut::new();
        loop {
            let line = self.read_line(read_timeout).await?;
            let size = parse_chunk_size(&line)?;
            if size == 0 {
                // Trailer fields are dropped.
                while !self.read_line(read_timeout).await?.is_empty() {}
                return Ok(body.freeze());
            }

            let framed = size
                .checked_add(2)
                .ok_or_else(|| Error::http_protocol("Chunk size overflow"))?;
            while self.buffer.len() < framed {
                if self.fill(read_timeout).await? == 0 {
                    return Err(Error::http_protocol("Connection closed while reading chunk data"));
                }
            }
            body.extend_from_slice(&self.buffer[..size]);
            if &self.buffer[size..framed] != b"\r\n" {
                return Err(Error::http_protocol("Chunk data not terminated by CRLF"));
            }
            self.buffer.advance(framed);
        }
    }

    /// Read one CRLF-terminated line, without the CRLF.
    async fn read_line(&mut self, read_timeout: Option<Duration>) -> Result<Bytes> {
        loop {
            if let Some(pos) = find_crlf(&self.buffer) {
                let line = self.buffer.split_to(pos).freeze();
                self.buffer.advance(2);
                return Ok(line);
            }
            if self.buffer.len() >= MAX_HEADERS_SIZE {
                return Err(Error::http_protocol("Chunk line too long"));
            }
            if self.fill(read_timeout).await? == 0 {
                return Err(Error::http_protocol("Connection closed while reading chunked body"));
            }
        }
    }

    /// Read more bytes into the buffer. Returns 0 on EOF.
    async fn fill(&mut self, read_timeout: Option<Duration>) -> Result<usize> {
        self.buffer.reserve(READ_CHUNK);
        let read = self.stream.read_buf(&mut self.buffer);
        let result = match read_timeout {
            Some(limit) => tokio::time::timeout(limit, read)
                .await
                .map_err(|_| Error::ReadTimeout(limit))?,
            None => read.await,
        };
        result.map_err(|e| Error::HttpProtocol(format!("Failed to read response: {}", e)))
    }
}

/// Parsed response head.
#[derive(Debug)]
struct Head {
    status: u16,
    headers: Vec<String>,
    content_length: Option<usize>,
    chunked: bool,
    close: bool,
}

fn parse_head(bytes: &[u8]) -> Result<Head> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS_COUNT];
    let mut response = httparse::Response::new(&mut headers);
    match response
        .parse(bytes)
        .map_err(|e| Error::HttpProtocol(format!("Failed to parse response: {}", e)))?
    {
        httparse::Status::Complete(_) => {}
        httparse::Status::Partial => return Err(Error::http_protocol("Incomplete response headers")),
    }

    let status = response
        .code
        .ok_or_else(|| Error::http_protocol("Missing status code"))?;
    let http10 = response.version == Some(0);

    let mut head = Head {
        status,
        headers: Vec::with_capacity(response.headers.len()),
        content_length: None,
        chunked: false,
        close: http10,
    };

    for header in response.headers.iter() {
        let value = String::from_utf8_lossy(header.value);
        let value = value.trim();

        if header.name.eq_ignore_ascii_case("connection") {
            for token in value.split(',').map(str::trim) {
                if token.eq_ignore_ascii_case("close") {
                    head.close = true;
                } else if token.eq_ignore_ascii_case("keep-alive") && http10 {
                    head.close = false;
                }
            }
        } else if header.name.eq_ignore_ascii_case("transfer-encoding") {
            // chunked must be the final transfer coding
            head.chunked = value
                .rsplit(',')
                .next()
                .is_some_and(|last| last.trim().eq_ignore_ascii_case("chunked"));
            if !head.chunked {
                head.close = true;
            }
        } else if header.name.eq_ignore_ascii_case("content-length") {
            head.content_length = Some(parse_content_length(value)?);
        }

        head.headers.push(format!("{}: {}", header.name, value));
    }

    // Transfer-Encoding overrides Content-Length.
    if head.chunked || head.headers.iter().any(|h| h.to_ascii_lowercase().starts_with("transfer-encoding:")) {
        head.content_length = None;
    }

    Ok(head)
}

fn push_header(out: &mut Vec<u8>, name: &str, value: &str) {
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(b": ");
    out.extend_from_slice(value.as_bytes());
    out.extend_from_slice(b"\r\n");
}

/// Find the end of HTTP headers (\r\n\r\n).
fn find_header_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}

/// Find the first CRLF in a buffer.
fn find_crlf(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|w| w == b"\r\n")
}

/// Parse a chunk-size line, ignoring chunk extensions.
fn parse_chunk_size(line: &[u8]) -> Result<usize> {
    let line = std::str::from_utf8(line).map_err(|_| Error::http_protocol("Invalid chunk size line"))?;
    let size = line.split(';').next().unwrap_or("").trim();
    let size = usize::from_str_radix(size, 16)
        .map_err(|_| Error::HttpProtocol(format!("Invalid chunk size: {:?}", size)))?;
    if size > MAX_CHUNK_SIZE {
        return Err(Error::HttpProtocol(format!("Chunk size {} exceeds limit", size)));
    }
    Ok(size)
}

/// Parse Content-Length; repeated values must agree.
fn parse_content_length(value: &str) -> Result<usize> {
    let mut parsed = None;
    for part in value.split(',').map(str::trim) {
        let n = part
            .parse::<usize>()
            .map_err(|_| Error::HttpProtocol(format!("Invalid Content-Length: {}", value)))?;
        match parsed {
            Some(prev) if prev != n => {
                return Err(Error::HttpProtocol(format!("Conflicting Content-Length values: {}", value)))
            }
            _ => parsed = Some(n),
        }
    }
    parsed.ok_or_else(|| Error::http_protocol("Empty Content-Length"))
}

/// Header names must be RFC 9110 tokens.
fn validate_header_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::http_protocol("Empty header name"));
    }
    if !name.bytes().all(is_tchar) {
        return Err(Error::HttpProtocol(format!("Invalid character in header name: {:?}", name)));
    }
    Ok(())
}

fn is_tchar(b: u8) -> bool {
    matches!(b,
        b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.' |
        b'^' | b'_' | b'`' | b'|' | b'~' | b'0'..=b'9' | b'A'..=b'Z' | b'a'..=b'z'
    )
}

/// Header values must not contain NUL, CR, or LF.
fn validate_header_value(value: &str) -> Result<()> {
    if value.bytes().any(|b| b == 0 || b == b'\r' || b == b'\n') {
        return Err(Error::http_protocol(
            "Invalid character in header value (CR/LF/NUL not allowed)",
        ));
    }
    Ok(())
}
