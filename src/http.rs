use std::io::{self, BufRead, Read};

use crate::error::{IndexError, Result};

const MAX_HEAD_BYTES: usize = 256 * 1024;
const MAX_HEADERS: usize = 256;

/// A captured response split into its parts. `body` has not been read yet
/// and yields the entity body exactly once (chunked framing removed).
pub struct ParsedResponse<'a> {
    pub status_code: u16,
    pub protocol: String,
    pub content_type: String,
    /// Header field lines as `Name: value`, CRLF separated, in received
    /// order, trailing whitespace trimmed. Excludes the status line.
    pub header: Vec<u8>,
    pub body: Box<dyn Read + Send + 'a>,
}

impl std::fmt::Debug for ParsedResponse<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParsedResponse")
            .field("status_code", &self.status_code)
            .field("protocol", &self.protocol)
            .field("content_type", &self.content_type)
            .field("header_len", &self.header.len())
            .finish_non_exhaustive()
    }
}

pub fn parse_response<'a, R>(mut reader: R) -> Result<ParsedResponse<'a>>
where
    R: BufRead + Send + 'a,
{
    let head = read_head(&mut reader)?;

    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut response = httparse::Response::new(&mut headers);
    match response.parse(&head) {
        Ok(httparse::Status::Complete(_)) => {}
        Ok(httparse::Status::Partial) => {
            return Err(malformed("incomplete status line or header block"));
        }
        Err(err) => return Err(malformed(format!("{err}"))),
    }

    let status_code = response
        .code
        .ok_or_else(|| malformed("missing status code"))?;
    let protocol = match response.version {
        Some(0) => "HTTP/1.0".to_owned(),
        Some(1) => "HTTP/1.1".to_owned(),
        other => return Err(malformed(format!("unsupported http version: {other:?}"))),
    };

    let mut header = Vec::new();
    let mut content_type = None;
    let mut content_length = None;
    let mut chunked = false;
    for field in response.headers.iter() {
        header.extend_from_slice(field.name.as_bytes());
        header.extend_from_slice(b": ");
        header.extend_from_slice(field.value);
        header.extend_from_slice(b"\r\n");

        if field.name.eq_ignore_ascii_case("content-type") && content_type.is_none() {
            content_type = Some(String::from_utf8_lossy(field.value).trim().to_owned());
        } else if field.name.eq_ignore_ascii_case("content-length") {
            let value = std::str::from_utf8(field.value)
                .ok()
                .and_then(|v| v.trim().parse::<u64>().ok())
                .ok_or_else(|| malformed("invalid content-length"))?;
            content_length = Some(value);
        } else if field.name.eq_ignore_ascii_case("transfer-encoding") {
            chunked = String::from_utf8_lossy(field.value)
                .rsplit(',')
                .next()
                .is_some_and(|coding| coding.trim().eq_ignore_ascii_case("chunked"));
        }
    }
    let trimmed = header.trim_ascii_end().len();
    header.truncate(trimmed);

    let bodiless = (100..200).contains(&status_code) || status_code == 204 || status_code == 304;
    let body: Box<dyn Read + Send + 'a> = if bodiless {
        Box::new(io::empty())
    } else if chunked {
        Box::new(ChunkedReader::new(reader))
    } else if let Some(len) = content_length {
        Box::new(reader.take(len))
    } else {
        Box::new(reader)
    };

    Ok(ParsedResponse {
        status_code,
        protocol,
        content_type: content_type.unwrap_or_default(),
        header,
        body,
    })
}

fn malformed(reason: impl Into<String>) -> IndexError {
    IndexError::MalformedHttpMessage(reason.into())
}

fn read_head<R: BufRead>(reader: &mut R) -> Result<Vec<u8>> {
    let mut head = Vec::new();
    loop {
        let start = head.len();
        let n = reader.read_until(b'\n', &mut head)?;
        if n == 0 {
            if head.is_empty() {
                return Err(malformed("empty response"));
            }
            return Err(malformed("unexpected end of header block"));
        }
        if head.len() > MAX_HEAD_BYTES {
            return Err(malformed(format!(
                "header block exceeds {MAX_HEAD_BYTES} bytes"
            )));
        }
        let line = &head[start..];
        if line == b"\r\n" || line == b"\n" {
            if start == 0 {
                // leading blank lines before the status line
                head.clear();
                continue;
            }
            return Ok(head);
        }
    }
}

struct ChunkedReader<R> {
    inner: R,
    remaining: u64,
    done: bool,
}

impl<R: BufRead> ChunkedReader<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            remaining: 0,
            done: false,
        }
    }

    fn read_line(&mut self) -> io::Result<String> {
        let mut line = Vec::new();
        if self.inner.read_until(b'\n', &mut line)? == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "chunked body ended early",
            ));
        }
        Ok(String::from_utf8_lossy(&line).trim().to_owned())
    }

    fn next_chunk(&mut self) -> io::Result<()> {
        let line = self.read_line()?;
        let size = line.split(';').next().unwrap_or_default().trim();
        let size = u64::from_str_radix(size, 16).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("invalid chunk size: {line:?}"),
            )
        })?;
        if size == 0 {
            while !self.read_line()?.is_empty() {}
            self.done = true;
        }
        self.remaining = size;
        Ok(())
    }
}

impl<R: BufRead> Read for ChunkedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.remaining == 0 && !self.done {
            self.next_chunk()?;
        }
        if self.done {
            return Ok(0);
        }

        let want = buf.len().min(usize::try_from(self.remaining).unwrap_or(usize::MAX));
        let n = self.inner.read(&mut buf[..want])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "chunk ended early",
            ));
        }
        self.remaining -= n as u64;
        if self.remaining == 0 {
            // CRLF closing the chunk data
            self.read_line()?;
        }
        Ok(n)
    }
}
