//! HTTP/1.1 wire codec.
//!
//! Request serialization and response parsing live here, behind two
//! functions the connection state machine calls. Body framing follows
//! Content-Length, chunked transfer-coding, or connection-close
//! delimiting; the keep-alive decision honors `Connection` headers and
//! the version default.

use bytes::{Buf, Bytes, BytesMut};
use http::header::{HeaderName, HeaderValue, CONNECTION, CONTENT_LENGTH, HOST, TRANSFER_ENCODING};
use http::{HeaderMap, Method, StatusCode, Version};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::HttpError;
use crate::request::HttpRequest;
use crate::response::HttpResponse;

const MAX_HEADERS: usize = 64;
const MAX_HEAD_BYTES: usize = 16 * 1024;

fn protocol(reason: impl Into<String>) -> HttpError {
    HttpError::Protocol {
        reason: reason.into(),
    }
}

/// Serialize a request onto the wire.
///
/// Injects `Host`, `Connection`, and `Content-Length` headers unless the
/// request already carries them.
pub(crate) fn encode_request(request: &HttpRequest, keep_alive: bool) -> Vec<u8> {
    let body = request.body();
    let mut out = Vec::with_capacity(256 + body.len());

    out.extend_from_slice(request.method().as_str().as_bytes());
    out.push(b' ');
    out.extend_from_slice(request.path_and_query().as_bytes());
    out.extend_from_slice(b" HTTP/1.1\r\n");

    if !request.headers().contains_key(HOST) {
        out.extend_from_slice(b"Host: ");
        out.extend_from_slice(request.host().as_bytes());
        let default_port = if request.is_https() { 443 } else { 80 };
        if request.port() != default_port {
            out.extend_from_slice(b":");
            out.extend_from_slice(request.port().to_string().as_bytes());
        }
        out.extend_from_slice(b"\r\n");
    }

    for (name, value) in request.headers() {
        out.extend_from_slice(name.as_str().as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }

    if !request.headers().contains_key(CONNECTION) {
        if keep_alive {
            out.extend_from_slice(b"Connection: keep-alive\r\n");
        } else {
            out.extend_from_slice(b"Connection: close\r\n");
        }
    }

    let method = request.method();
    let needs_length = !body.is_empty()
        || method == Method::POST
        || method == Method::PUT
        || method == Method::PATCH;
    if needs_length && !request.headers().contains_key(CONTENT_LENGTH) {
        out.extend_from_slice(b"Content-Length: ");
        out.extend_from_slice(body.len().to_string().as_bytes());
        out.extend_from_slice(b"\r\n");
    }

    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(body);
    out
}

struct Head {
    len: usize,
    status: StatusCode,
    version: Version,
    headers: HeaderMap,
}

fn parse_head(buf: &[u8]) -> Result<Option<Head>, HttpError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut parsed = httparse::Response::new(&mut headers);
    match parsed.parse(buf) {
        Ok(httparse::Status::Complete(len)) => {
            let code = parsed.code.ok_or_else(|| protocol("missing status code"))?;
            let status = StatusCode::from_u16(code)
                .map_err(|_| protocol(format!("invalid status code {}", code)))?;
            let version = match parsed.version {
                Some(0) => Version::HTTP_10,
                _ => Version::HTTP_11,
            };
            let mut map = HeaderMap::with_capacity(parsed.headers.len());
            for header in parsed.headers.iter() {
                let name = HeaderName::from_bytes(header.name.as_bytes())
                    .map_err(|e| protocol(e.to_string()))?;
                let value =
                    HeaderValue::from_bytes(header.value).map_err(|e| protocol(e.to_string()))?;
                map.append(name, value);
            }
            Ok(Some(Head {
                len,
                status,
                version,
                headers: map,
            }))
        }
        Ok(httparse::Status::Partial) => Ok(None),
        Err(e) => Err(protocol(e.to_string())),
    }
}

async fn read_more<S>(stream: &mut S, buf: &mut BytesMut) -> Result<usize, HttpError>
where
    S: AsyncRead + Unpin,
{
    let n = stream.read_buf(buf).await?;
    Ok(n)
}

fn is_chunked(headers: &HeaderMap) -> Result<bool, HttpError> {
    for value in headers.get_all(TRANSFER_ENCODING) {
        let text = value
            .to_str()
            .map_err(|_| protocol("non-ascii transfer-encoding"))?;
        for token in text.split(',') {
            if token.trim().eq_ignore_ascii_case("chunked") {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

fn content_length(headers: &HeaderMap) -> Result<Option<usize>, HttpError> {
    let mut length: Option<usize> = None;
    for value in headers.get_all(CONTENT_LENGTH) {
        let text = value
            .to_str()
            .map_err(|_| protocol("non-ascii content-length"))?;
        let parsed: usize = text
            .trim()
            .parse()
            .map_err(|_| protocol(format!("invalid content-length {:?}", text)))?;
        match length {
            Some(existing) if existing != parsed => {
                return Err(protocol("conflicting content-length headers"))
            }
            _ => length = Some(parsed),
        }
    }
    Ok(length)
}

fn connection_keep_alive(headers: &HeaderMap, version: Version) -> bool {
    let mut keep_alive = version != Version::HTTP_10;
    for value in headers.get_all(CONNECTION) {
        let Ok(text) = value.to_str() else { continue };
        for token in text.split(',') {
            let token = token.trim();
            if token.eq_ignore_ascii_case("close") {
                keep_alive = false;
            } else if token.eq_ignore_ascii_case("keep-alive") {
                keep_alive = true;
            }
        }
    }
    keep_alive
}

/// Read one response off the stream.
///
/// Returns the response and whether the connection may be reused
/// afterwards.
pub(crate) async fn read_response<S>(
    stream: &mut S,
    head_request: bool,
    max_body_size: usize,
) -> Result<(HttpResponse, bool), HttpError>
where
    S: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(8 * 1024);

    let head = loop {
        if let Some(head) = parse_head(&buf)? {
            break head;
        }
        if buf.len() > MAX_HEAD_BYTES {
            return Err(protocol("response head too large"));
        }
        let n = read_more(stream, &mut buf).await?;
        if n == 0 {
            return Err(if buf.is_empty() {
                HttpError::Io {
                    message: "connection closed before response".to_string(),
                }
            } else {
                protocol("connection closed mid-head")
            });
        }
    };
    buf.advance(head.len);

    let no_body = head_request
        || head.status.is_informational()
        || head.status == StatusCode::NO_CONTENT
        || head.status == StatusCode::NOT_MODIFIED;

    let chunked = is_chunked(&head.headers)?;
    let length = if chunked {
        None
    } else {
        content_length(&head.headers)?
    };

    let (body, close_delimited) = if no_body {
        (Bytes::new(), false)
    } else if chunked {
        let body = read_chunked_body(stream, &mut buf, max_body_size).await?;
        (body, false)
    } else if let Some(length) = length {
        if length > max_body_size {
            return Err(HttpError::BodyTooLarge {
                limit: max_body_size,
            });
        }
        let body = read_exact_body(stream, &mut buf, length).await?;
        (body, false)
    } else {
        let body = read_to_eof(stream, &mut buf, max_body_size).await?;
        (body, true)
    };

    let keep_alive = !close_delimited && connection_keep_alive(&head.headers, head.version);
    let response = HttpResponse::new(head.status, head.version, head.headers, body);
    Ok((response, keep_alive))
}

async fn read_exact_body<S>(
    stream: &mut S,
    buf: &mut BytesMut,
    length: usize,
) -> Result<Bytes, HttpError>
where
    S: AsyncRead + Unpin,
{
    while buf.len() < length {
        let n = read_more(stream, buf).await?;
        if n == 0 {
            return Err(protocol("connection closed mid-body"));
        }
    }
    Ok(buf.split_to(length).freeze())
}

async fn read_to_eof<S>(
    stream: &mut S,
    buf: &mut BytesMut,
    max_body_size: usize,
) -> Result<Bytes, HttpError>
where
    S: AsyncRead + Unpin,
{
    loop {
        if buf.len() > max_body_size {
            return Err(HttpError::BodyTooLarge {
                limit: max_body_size,
            });
        }
        let n = read_more(stream, buf).await?;
        if n == 0 {
            break;
        }
    }
    Ok(buf.split().freeze())
}

async fn read_line<S>(stream: &mut S, buf: &mut BytesMut) -> Result<Bytes, HttpError>
where
    S: AsyncRead + Unpin,
{
    loop {
        if let Some(pos) = buf.windows(2).position(|w| w == b"\r\n") {
            let line = buf.split_to(pos).freeze();
            buf.advance(2);
            return Ok(line);
        }
        if buf.len() > MAX_HEAD_BYTES {
            return Err(protocol("chunk header too large"));
        }
        let n = read_more(stream, buf).await?;
        if n == 0 {
            return Err(protocol("connection closed mid-chunk"));
        }
    }
}

fn parse_chunk_size(line: &[u8]) -> Result<usize, HttpError> {
    // Chunk extensions after ';' are ignored.
    let size_part = match line.iter().position(|&b| b == b';') {
        Some(pos) => &line[..pos],
        None => line,
    };
    let text = std::str::from_utf8(size_part)
        .map_err(|_| protocol("invalid chunk size"))?
        .trim();
    if text.is_empty() {
        return Err(protocol("empty chunk size"));
    }
    usize::from_str_radix(text, 16).map_err(|_| protocol(format!("invalid chunk size {:?}", text)))
}

async fn read_chunked_body<S>(
    stream: &mut S,
    buf: &mut BytesMut,
    max_body_size: usize,
) -> Result<Bytes, HttpError>
where
    S: AsyncRead + Unpin,
{
    let mut body = BytesMut::new();
    loop {
        let line = read_line(stream, buf).await?;
        let size = parse_chunk_size(&line)?;
        if size == 0 {
            break;
        }
        let exceeds = body
            .len()
            .checked_add(size)
            .map_or(true, |total| total > max_body_size);
        if exceeds {
            return Err(HttpError::BodyTooLarge {
                limit: max_body_size,
            });
        }
        let need = size
            .checked_add(2)
            .ok_or_else(|| protocol("chunk size overflow"))?;
        while buf.len() < need {
            let n = read_more(stream, buf).await?;
            if n == 0 {
                return Err(protocol("connection closed mid-chunk"));
            }
        }
        body.extend_from_slice(&buf[..size]);
        if &buf[size..need] != b"\r\n" {
            return Err(protocol("missing chunk terminator"));
        }
        buf.advance(need);
    }

    // Trailer section: discard lines until the terminating empty line.
    loop {
        let line = read_line(stream, buf).await?;
        if line.is_empty() {
            break;
        }
    }
    Ok(body.freeze())
}
