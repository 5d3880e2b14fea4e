#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("malformed http message: {0}")]
    MalformedHttpMessage(String),

    #[error("parse html: {0}")]
    HtmlParseError(String),

    #[error("unsupported compression: {0:?}")]
    UnsupportedCompression(String),

    #[error("invalid key length ({0}); accepted lengths are 16, 24, or 32 bytes")]
    InvalidKeyLength(usize),

    #[error("invalid nonce length (expected {expected}, got {actual})")]
    InvalidNonceLength { expected: usize, actual: usize },

    #[error("key derivation failed: {0}")]
    KeyDerivationFailed(String),

    #[error("seal payload failed")]
    SealFailed,

    /// Authentication tag mismatch: wrong key, wrong nonce, or tampered data.
    #[error("open sealed payload failed: authentication tag mismatch")]
    OpenFailed,

    #[error("decode prepared blob: {0}")]
    Decode(String),

    #[error("storage upload failed: {0}")]
    StorageUploadFailed(String),

    #[error("canonicalize uri {uri:?}: {reason}")]
    CanonicalizationFailed { uri: String, reason: String },

    #[error("unknown record type: {0:?}")]
    UnknownRecordType(String),

    #[error("parse timestamp {value:?}: {reason}")]
    TimestampParseFailed { value: String, reason: String },

    #[error("malformed warc record: {0}")]
    MalformedWarc(String),

    #[error("response body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },

    #[error("operation cancelled")]
    Cancelled,

    #[error("serialize index payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = IndexError> = std::result::Result<T, E>;
