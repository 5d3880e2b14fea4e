use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;

use flate2::bufread::GzDecoder;

use crate::error::{IndexError, Result};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const MAX_HEADER_LINE: usize = 64 * 1024;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WarcHeader {
    pub version: String,
    fields: Vec<(String, String)>,
}

impl WarcHeader {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            fields: Vec::new(),
        }
    }

    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.fields.push((name.to_ascii_lowercase(), value.into()));
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

#[derive(Debug, Clone)]
pub struct WarcRecord {
    pub header: WarcHeader,
    /// Byte offset of the record in its file (of the gzip member for
    /// compressed files).
    pub offset: u64,
    pub content: Vec<u8>,
}

impl WarcRecord {
    pub fn warc_type(&self) -> Option<&str> {
        self.header.get("warc-type")
    }
}

struct Counting<R> {
    inner: R,
    position: u64,
}

impl<R: Read> Read for Counting<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.position += n as u64;
        Ok(n)
    }
}

impl<R: BufRead> BufRead for Counting<R> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.inner.fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        self.position += amt as u64;
        self.inner.consume(amt);
    }
}

pub struct WarcReader<R> {
    inner: Counting<R>,
    gzip: bool,
    // decoded gzip member still holding records, with its file offset
    member: Option<(u64, io::Cursor<Vec<u8>>)>,
}

pub fn open(path: &Path) -> Result<WarcReader<BufReader<File>>> {
    let file = File::open(path)?;
    WarcReader::new(BufReader::new(file))
}

impl<R: BufRead> WarcReader<R> {
    pub fn new(mut reader: R) -> Result<Self> {
        let gzip = reader.fill_buf()?.starts_with(&GZIP_MAGIC);
        Ok(Self {
            inner: Counting {
                inner: reader,
                position: 0,
            },
            gzip,
            member: None,
        })
    }

    pub fn is_gzip(&self) -> bool {
        self.gzip
    }

    pub fn next_record(&mut self) -> Result<Option<WarcRecord>> {
        if self.gzip {
            self.next_gzip_record()
        } else {
            skip_blank_lines(&mut self.inner)?;
            if self.inner.fill_buf()?.is_empty() {
                return Ok(None);
            }
            let offset = self.inner.position;
            read_record(&mut self.inner, offset).map(Some)
        }
    }

    fn next_gzip_record(&mut self) -> Result<Option<WarcRecord>> {
        loop {
            if let Some((offset, member)) = self.member.as_mut() {
                skip_blank_lines(member)?;
                if !member.fill_buf()?.is_empty() {
                    return read_record(member, *offset).map(Some);
                }
                self.member = None;
            }

            if self.inner.fill_buf()?.is_empty() {
                return Ok(None);
            }
            let offset = self.inner.position;
            let mut decoded = Vec::new();
            GzDecoder::new(&mut self.inner)
                .read_to_end(&mut decoded)
                .map_err(|err| {
                    IndexError::MalformedWarc(format!("gzip member at offset {offset}: {err}"))
                })?;
            self.member = Some((offset, io::Cursor::new(decoded)));
        }
    }
}

impl<R: BufRead> Iterator for WarcReader<R> {
    type Item = Result<WarcRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}

fn skip_blank_lines<B: BufRead>(reader: &mut B) -> io::Result<()> {
    loop {
        let first = reader.fill_buf()?.first().copied();
        match first {
            Some(b'\r' | b'\n') => reader.consume(1),
            _ => return Ok(()),
        }
    }
}

fn read_line<B: BufRead>(reader: &mut B, offset: u64) -> Result<Option<String>> {
    let mut line = Vec::new();
    let n = reader
        .by_ref()
        .take(MAX_HEADER_LINE as u64 + 1)
        .read_until(b'\n', &mut line)?;
    if n == 0 {
        return Ok(None);
    }
    if line.len() > MAX_HEADER_LINE {
        return Err(IndexError::MalformedWarc(format!(
            "header line too long in record at offset {offset}"
        )));
    }
    let text = String::from_utf8_lossy(&line);
    Ok(Some(text.trim_end_matches(['\r', '\n']).to_owned()))
}

fn read_record<B: BufRead>(reader: &mut B, offset: u64) -> Result<WarcRecord> {
    let malformed = |reason: String| IndexError::MalformedWarc(format!("{reason} (offset {offset})"));

    let version = read_line(reader, offset)?
        .ok_or_else(|| malformed("missing version line".to_owned()))?;
    if !version.starts_with("WARC/") {
        return Err(malformed(format!("expected WARC version line, got {version:?}")));
    }

    let mut header = WarcHeader::new(version.trim());
    let mut last: Option<(String, String)> = None;
    loop {
        let line = read_line(reader, offset)?
            .ok_or_else(|| malformed("unexpected end of header block".to_owned()))?;
        if line.is_empty() {
            break;
        }
        if line.starts_with([' ', '\t']) {
            let (_, value) = last
                .as_mut()
                .ok_or_else(|| malformed("continuation line before first field".to_owned()))?;
            value.push(' ');
            value.push_str(line.trim());
            continue;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| malformed(format!("header line without colon: {line:?}")))?;
        if let Some((name, value)) = last.take() {
            header.insert(&name, value);
        }
        last = Some((name.trim().to_owned(), value.trim().to_owned()));
    }
    if let Some((name, value)) = last {
        header.insert(&name, value);
    }

    let length = header
        .get("content-length")
        .ok_or_else(|| malformed("missing Content-Length".to_owned()))?
        .trim()
        .parse::<u64>()
        .map_err(|err| malformed(format!("invalid Content-Length: {err}")))?;

    let mut content = Vec::new();
    reader.by_ref().take(length).read_to_end(&mut content)?;
    if (content.len() as u64) < length {
        return Err(malformed(format!(
            "truncated block: expected {length} bytes, got {}",
            content.len()
        )));
    }

    Ok(WarcRecord {
        header,
        offset,
        content,
    })
}
