use std::fmt;
use std::io::Read;
use std::str::FromStr;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE;
use flate2::Compression as GzipLevel;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

use crate::crypto::Cipher;
use crate::error::{IndexError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    #[default]
    Gzip,
    None,
}

impl Compression {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gzip => "gzip",
            Self::None => "none",
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Compression {
    type Err = IndexError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gzip" | "gz" => Ok(Self::Gzip),
            "none" => Ok(Self::None),
            _ => Err(IndexError::UnsupportedCompression(s.to_owned())),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Sealer<'a> {
    pub cipher: &'a Cipher,
    pub nonce: &'a [u8],
}

pub fn compress<R: Read>(mut reader: R, compression: Compression) -> Result<Vec<u8>> {
    match compression {
        Compression::Gzip => {
            let mut encoder = GzEncoder::new(Vec::new(), GzipLevel::default());
            std::io::copy(&mut reader, &mut encoder)?;
            Ok(encoder.finish()?)
        }
        Compression::None => {
            let mut out = Vec::new();
            reader.read_to_end(&mut out)?;
            Ok(out)
        }
    }
}

pub fn decompress(bytes: &[u8], compression: Compression) -> Result<Vec<u8>> {
    match compression {
        Compression::Gzip => {
            let mut out = Vec::new();
            GzDecoder::new(bytes)
                .read_to_end(&mut out)
                .map_err(|err| IndexError::Decode(format!("gunzip: {err}")))?;
            Ok(out)
        }
        Compression::None => Ok(bytes.to_vec()),
    }
}

pub fn prepare<R: Read>(
    reader: R,
    compression: Compression,
    sealer: Option<Sealer<'_>>,
) -> Result<String> {
    let compressed = compress(reader, compression)?;
    let sealed = match sealer {
        Some(sealer) => sealer.cipher.seal(sealer.nonce, &compressed)?,
        None => compressed,
    };
    Ok(URL_SAFE.encode(sealed))
}

pub fn unprepare(
    encoded: &str,
    compression: Compression,
    sealer: Option<Sealer<'_>>,
) -> Result<Vec<u8>> {
    let decoded = URL_SAFE
        .decode(encoded.trim())
        .map_err(|err| IndexError::Decode(format!("base64: {err}")))?;
    let opened = match sealer {
        Some(sealer) => sealer.cipher.open(sealer.nonce, &decoded)?,
        None => decoded,
    };
    decompress(&opened, compression)
}
