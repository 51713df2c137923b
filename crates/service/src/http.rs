//! Minimal HTTP/1.1 framing for the build endpoint
//!
//! One request per connection: the head is parsed, the body (if any) is
//! ignored, and every response closes the connection.

use bytes::Bytes;
use k6x_errors::{Error, ServiceError};
use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on the size of a request head
pub const MAX_HEAD_BYTES: usize = 16 * 1024;

/// A parsed request head
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    pub path: String,
    /// Decoded query pairs in the order they appeared
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
}

impl Request {
    /// Parse a request target such as `/build?os=linux&with=k6`
    #[must_use]
    pub fn new(method: impl Into<String>, target: &str) -> Self {
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path, query),
            None => (target, ""),
        };

        Self {
            method: method.into(),
            path: path.to_string(),
            query: url::form_urlencoded::parse(query.as_bytes())
                .into_owned()
                .collect(),
            headers: Vec::new(),
        }
    }

    /// First value of a query parameter
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Every value of a repeated query parameter, in order
    #[must_use]
    pub fn params<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.query
            .iter()
            .filter(move |(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Read and parse a request head
///
/// # Errors
///
/// Returns `ServiceError::Protocol` for a malformed or oversized head, and
/// an I/O error if the connection fails.
pub async fn read_request<R>(reader: &mut R) -> Result<Request, Error>
where
    R: AsyncBufRead + Unpin,
{
    let mut reader = reader.take(MAX_HEAD_BYTES as u64 + 1);
    let reader = &mut reader;
    let mut consumed = 0;
    let mut line = String::new();

    let request_line = loop {
        consumed += read_line(reader, &mut line, consumed).await?;
        // Tolerate stray empty lines before the request line
        if !line.trim().is_empty() {
            break line.trim().to_string();
        }
    };

    let mut parts = request_line.split_whitespace();
    let (Some(method), Some(target), Some(version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(protocol(format!("malformed request line: {request_line}")));
    };

    if !version.starts_with("HTTP/1.") {
        return Err(protocol(format!("unsupported protocol version: {version}")));
    }
    if !target.starts_with('/') {
        return Err(protocol(format!("unsupported request target: {target}")));
    }

    let mut request = Request::new(method, target);

    loop {
        consumed += read_line(reader, &mut line, consumed).await?;
        let header = line.trim_end_matches(['\r', '\n']);
        if header.is_empty() {
            break;
        }
        let Some((name, value)) = header.split_once(':') else {
            return Err(protocol(format!("malformed header line: {header}")));
        };
        request
            .headers
            .push((name.trim().to_string(), value.trim().to_string()));
    }

    Ok(request)
}

async fn read_line<R>(reader: &mut R, line: &mut String, consumed: usize) -> Result<usize, Error>
where
    R: AsyncBufRead + Unpin,
{
    line.clear();
    let read = reader.read_line(line).await?;
    if read == 0 {
        return Err(protocol("connection closed before the request head ended"));
    }
    if consumed + read > MAX_HEAD_BYTES {
        return Err(protocol("request head too large"));
    }
    Ok(read)
}

fn protocol(message: impl Into<String>) -> Error {
    ServiceError::Protocol {
        message: message.into(),
    }
    .into()
}

/// Response payload
#[derive(Debug)]
pub enum Body {
    Bytes(Bytes),
    /// A spooled file, positioned at its start
    File { file: File, len: u64 },
}

/// A response to a single request
#[derive(Debug)]
pub struct Response {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Body,
}

impl Response {
    #[must_use]
    pub fn text(status: u16, text: impl Into<String>) -> Self {
        Self {
            status,
            content_type: "text/plain; charset=utf-8",
            body: Body::Bytes(Bytes::from(text.into())),
        }
    }

    /// A response whose body is just the reason phrase
    #[must_use]
    pub fn status(status: u16) -> Self {
        Self::text(status, format!("{}\n", reason(status)))
    }

    #[must_use]
    pub fn binary(file: File, len: u64) -> Self {
        Self {
            status: 200,
            content_type: "application/octet-stream",
            body: Body::File { file, len },
        }
    }

    fn content_length(&self) -> u64 {
        match &self.body {
            Body::Bytes(bytes) => bytes.len() as u64,
            Body::File { len, .. } => *len,
        }
    }

    /// Write the response and flush it
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the connection fails.
    pub async fn write_to<W>(self, writer: &mut W) -> Result<(), Error>
    where
        W: AsyncWrite + Unpin,
    {
        let head = format!(
            "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            self.status,
            reason(self.status),
            self.content_type,
            self.content_length(),
        );
        writer.write_all(head.as_bytes()).await?;

        match self.body {
            Body::Bytes(bytes) => writer.write_all(&bytes).await?,
            Body::File { mut file, .. } => {
                tokio::io::copy(&mut file, writer).await?;
            }
        }

        writer.flush().await?;
        Ok(())
    }
}

/// Reason phrase for the status codes this service produces
#[must_use]
pub fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}
