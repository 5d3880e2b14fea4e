use std::fmt;
use std::io::{self, Write};
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{IndexError, Result};

pub const VERSION_KEY: &str = "WARC-CDXJ";
pub const VERSION_VALUE: &str = "1.0";
pub const KEYS: [&str; 4] = ["surt_uri", "timestamp", "record_type", "payload"];

const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordType {
    Warcinfo,
    Response,
    Resource,
    Request,
    Metadata,
    Revisit,
    Conversion,
    Continuation,
}

impl RecordType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Warcinfo => "warcinfo",
            Self::Response => "response",
            Self::Resource => "resource",
            Self::Request => "request",
            Self::Metadata => "metadata",
            Self::Revisit => "revisit",
            Self::Conversion => "conversion",
            Self::Continuation => "continuation",
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordType {
    type Err = IndexError;

    fn from_str(s: &str) -> Result<Self> {
        let kind = match s.trim().to_ascii_lowercase().as_str() {
            "warcinfo" => Self::Warcinfo,
            "response" => Self::Response,
            "resource" => Self::Resource,
            "request" => Self::Request,
            "metadata" => Self::Metadata,
            "revisit" => Self::Revisit,
            "conversion" => Self::Conversion,
            "continuation" => Self::Continuation,
            _ => return Err(IndexError::UnknownRecordType(s.to_owned())),
        };
        Ok(kind)
    }
}

/// JSON payload of one index record. Field names are read by downstream
/// tooling and must not change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonBlock {
    pub uri: String,
    #[serde(rename = "ref")]
    pub reference: String,
    pub sha: String,
    pub hsc: u16,
    pub mct: String,
    pub rid: String,

    #[serde(rename = "x_locator")]
    pub locator: String,
    #[serde(rename = "x_title", skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(rename = "x_encryption_key_id", skip_serializing_if = "Option::is_none")]
    pub encryption_key_id: Option<String>,
    #[serde(rename = "x_encryption_method", skip_serializing_if = "Option::is_none")]
    pub encryption_method: Option<String>,
    #[serde(rename = "x_encryption_nonce", skip_serializing_if = "Option::is_none")]
    pub encryption_nonce: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CdxjRecord {
    pub surt: String,
    pub timestamp: DateTime<FixedOffset>,
    pub record_type: RecordType,
    pub content: Vec<u8>,
}

impl CdxjRecord {
    pub fn payload(&self) -> Result<JsonBlock> {
        Ok(serde_json::from_slice(&self.content)?)
    }

    pub fn write_to<W: Write>(&self, mut out: W) -> io::Result<()> {
        write!(
            out,
            "{} {} {} ",
            self.surt,
            self.timestamp.with_timezone(&Utc).format(TIMESTAMP_FORMAT),
            self.record_type
        )?;
        out.write_all(&self.content)?;
        out.write_all(b"\n")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CdxjHeader {
    fields: Vec<(String, Vec<u8>)>,
}

impl CdxjHeader {
    pub fn set(&mut self, key: &str, value: impl Into<Vec<u8>>) {
        let value = value.into();
        match self.fields.iter_mut().find(|(k, _)| k == key) {
            Some((_, existing)) => *existing = value,
            None => self.fields.push((key.to_owned(), value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn write_to<W: Write>(&self, mut out: W) -> io::Result<()> {
        for (key, value) in self.iter() {
            write!(out, "!{key} ")?;
            out.write_all(value)?;
            out.write_all(b"\n")?;
        }
        Ok(())
    }
}

pub fn build_header(
    version_key: &str,
    version_value: &str,
    record_count: usize,
    updated_at: DateTime<Utc>,
) -> Result<CdxjHeader> {
    let mut header = CdxjHeader::default();
    header.set(version_key, version_value);

    let keys = KEYS
        .iter()
        .map(serde_json::to_string)
        .collect::<std::result::Result<Vec<_>, _>>()?;
    header.set("keys", format!("[{}]", keys.join(", ")));

    let updated_at = serde_json::to_string(&updated_at.to_rfc3339_opts(SecondsFormat::Secs, true))?;
    header.set(
        "meta",
        format!(r#"{{"record_count":{record_count}, "updated_at":{updated_at}}}"#),
    );
    Ok(header)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cdxj {
    pub header: CdxjHeader,
    pub records: Vec<CdxjRecord>,
}

impl Cdxj {
    pub fn write_to<W: Write>(&self, mut out: W) -> io::Result<()> {
        self.header.write_to(&mut out)?;
        for record in &self.records {
            record.write_to(&mut out)?;
        }
        out.flush()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        // writing into a Vec cannot fail
        let _ = self.write_to(&mut out);
        out
    }
}
