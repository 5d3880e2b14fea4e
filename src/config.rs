use zeroize::Zeroizing;

use crate::prepare::Compression;

pub const DEFAULT_MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

/// Passphrase and salt shared by every record of a run. An absent or empty
/// passphrase selects plaintext mode.
#[derive(Clone, Default)]
pub struct EncryptionContext {
    passphrase: Option<Zeroizing<Vec<u8>>>,
    salt: Vec<u8>,
}

impl std::fmt::Debug for EncryptionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionContext")
            .field("encrypted", &self.is_encrypted())
            .field("salt_len", &self.salt.len())
            .finish()
    }
}

impl EncryptionContext {
    pub fn plaintext() -> Self {
        Self::default()
    }

    pub fn new(passphrase: impl Into<Vec<u8>>, salt: impl Into<Vec<u8>>) -> Self {
        let passphrase = passphrase.into();
        Self {
            passphrase: (!passphrase.is_empty()).then(|| Zeroizing::new(passphrase)),
            salt: salt.into(),
        }
    }

    pub fn passphrase(&self) -> Option<&[u8]> {
        self.passphrase.as_deref().map(Vec::as_slice)
    }

    pub fn salt(&self) -> &[u8] {
        &self.salt
    }

    pub fn is_encrypted(&self) -> bool {
        self.passphrase.is_some()
    }
}

/// What the file driver does when one record fails to index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordErrorPolicy {
    /// Fail the whole file; no partial index is produced.
    #[default]
    Abort,
    /// Log the failure and continue with the next record.
    Skip,
}

#[derive(Debug, Clone)]
pub struct IndexerConfig {
    pub encryption: EncryptionContext,
    pub compression: Compression,
    pub max_body_bytes: usize,
    pub on_record_error: RecordErrorPolicy,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            encryption: EncryptionContext::plaintext(),
            compression: Compression::default(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            on_record_error: RecordErrorPolicy::default(),
        }
    }
}
