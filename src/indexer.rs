use std::io::{BufRead, Read as _};
use std::path::Path;
use std::sync::Arc;

use anyhow::Context as _;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::cdxj::{self, Cdxj, CdxjRecord, JsonBlock, RecordType};
use crate::config::{IndexerConfig, RecordErrorPolicy};
use crate::crypto::{self, Cipher, KEY_ID_SIZE};
use crate::error::{IndexError, Result};
use crate::prepare::{self, Sealer};
use crate::store::ContentStore;
use crate::tee::TeeReader;
use crate::warc::{self, WarcReader, WarcRecord};
use crate::{http, surt, title};

pub const NONE_ENCRYPTION: &str = "none";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexMetadata {
    pub source_ref: String,
    pub status_code: u16,
    pub content_type: String,
    pub locator: String,
    pub title: String,
    pub key_id: Vec<u8>,
    pub encryption_method: String,
    pub nonce: Vec<u8>,
}

struct KeyMaterial {
    cipher: Cipher,
    key_id: [u8; KEY_ID_SIZE],
}

struct PreparedRecord {
    status_code: u16,
    content_type: String,
    title: String,
    header_blob: String,
    body_blob: String,
    digest: String,
    nonce: Vec<u8>,
}

pub struct Indexer {
    store: Arc<dyn ContentStore>,
    config: IndexerConfig,
    key: Option<KeyMaterial>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Indexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Indexer")
            .field("scheme", &self.store.scheme())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Indexer {
    pub fn new(config: IndexerConfig, store: Arc<dyn ContentStore>) -> Result<Self> {
        let key = match config.encryption.passphrase() {
            Some(passphrase) => {
                let extended = crypto::derive_extended_key(passphrase, config.encryption.salt())?;
                Some(KeyMaterial {
                    cipher: crypto::build_cipher(extended.as_slice())?,
                    key_id: crypto::key_id(passphrase),
                })
            }
            None => None,
        };
        Ok(Self {
            store,
            config,
            key,
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    pub async fn index_file(&self, path: &Path) -> anyhow::Result<Cdxj> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| anyhow::anyhow!("warc path has no file name: {}", path.display()))?;
        let reader = warc::open(path).with_context(|| format!("open warc: {}", path.display()))?;
        self.index_reader(&name, reader).await
    }

    pub async fn index_reader<R: BufRead + Send>(
        &self,
        name: &str,
        mut reader: WarcReader<R>,
    ) -> anyhow::Result<Cdxj> {
        let mut records = Vec::new();
        let mut skipped = 0_usize;

        while let Some(record) = reader
            .next_record()
            .with_context(|| format!("read warc record from {name}"))?
        {
            if self.cancel.is_cancelled() {
                return Err(IndexError::Cancelled).with_context(|| format!("index {name}"));
            }
            if !record
                .warc_type()
                .is_some_and(|t| t.eq_ignore_ascii_case("response"))
            {
                continue;
            }

            let record_id = record.header.get("warc-record-id").unwrap_or("-");
            match self.index_record(name, &record).await {
                Ok(indexed) => {
                    tracing::debug!(file = name, offset = record.offset, record_id, "indexed record");
                    records.push(indexed);
                }
                Err(IndexError::Cancelled) => {
                    return Err(IndexError::Cancelled).with_context(|| format!("index {name}"));
                }
                Err(err) if self.config.on_record_error == RecordErrorPolicy::Skip => {
                    tracing::warn!(
                        file = name,
                        offset = record.offset,
                        record_id,
                        error = %err,
                        "skipping record"
                    );
                    skipped += 1;
                }
                Err(err) => {
                    return Err(err).with_context(|| {
                        format!(
                            "index record {record_id} at offset {} in {name}",
                            record.offset
                        )
                    });
                }
            }
        }

        let cdxj = assemble(records)?;
        tracing::info!(
            file = name,
            records = cdxj.records.len(),
            skipped,
            "indexed warc file"
        );
        Ok(cdxj)
    }

    /// Parses, prepares and uploads one response record and returns its
    /// index entry. The entry exists only once both uploads succeeded.
    pub async fn index_record(&self, source_ref: &str, record: &WarcRecord) -> Result<CdxjRecord> {
        let prepared = self.prepare_record(record)?;

        let header_cid = self.push(prepared.header_blob).await?;
        let payload_cid = self.push(prepared.body_blob).await?;
        let locator = [self.store.scheme(), header_cid.as_str(), payload_cid.as_str()].join("/");

        let metadata = IndexMetadata {
            source_ref: source_ref.to_owned(),
            status_code: prepared.status_code,
            content_type: prepared.content_type,
            locator,
            title: prepared.title,
            key_id: self
                .key
                .as_ref()
                .map(|key| key.key_id.to_vec())
                .unwrap_or_default(),
            encryption_method: self
                .key
                .as_ref()
                .map_or(NONE_ENCRYPTION, |key| key.cipher.method())
                .to_owned(),
            nonce: prepared.nonce,
        };
        cdxj_record(&metadata, record, &prepared.digest)
    }

    fn prepare_record(&self, record: &WarcRecord) -> Result<PreparedRecord> {
        let nonce = match &self.key {
            Some(key) => crypto::new_nonce(key.cipher.nonce_size())?,
            None => Vec::new(),
        };

        let response = http::parse_response(record.content.as_slice())?;

        let limit = self.config.max_body_bytes;
        let mut body = Vec::new();
        let title = {
            let limited = response.body.take((limit as u64).saturating_add(1));
            title::extract_title(TeeReader::new(limited, &mut body))?
        };
        if body.len() > limit {
            return Err(IndexError::BodyTooLarge { limit });
        }

        // header and body are sealed under the same nonce
        let sealer = self.key.as_ref().map(|key| Sealer {
            cipher: &key.cipher,
            nonce: &nonce,
        });
        let header_blob =
            prepare::prepare(response.header.as_slice(), self.config.compression, sealer)?;
        let body_blob = prepare::prepare(body.as_slice(), self.config.compression, sealer)?;

        Ok(PreparedRecord {
            status_code: response.status_code,
            content_type: response.content_type,
            title,
            header_blob,
            body_blob,
            digest: crypto::content_digest(&body),
            nonce,
        })
    }

    async fn push(&self, blob: String) -> Result<String> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(IndexError::Cancelled),
            cid = self.store.put(blob.into_bytes()) => cid,
        }
    }
}

pub fn cdxj_record(metadata: &IndexMetadata, record: &WarcRecord, digest: &str) -> Result<CdxjRecord> {
    let header = &record.header;
    let encrypted = !metadata.key_id.is_empty();

    let block = JsonBlock {
        uri: header.get("warc-target-uri").unwrap_or_default().to_owned(),
        reference: format!("warcfile:{}#{}", metadata.source_ref, record.offset),
        sha: digest.to_owned(),
        hsc: metadata.status_code,
        mct: metadata.content_type.clone(),
        rid: header.get("warc-record-id").unwrap_or_default().to_owned(),
        locator: metadata.locator.clone(),
        title: (!metadata.title.is_empty()).then(|| metadata.title.clone()),
        encryption_key_id: encrypted.then(|| URL_SAFE.encode(&metadata.key_id)),
        encryption_method: encrypted.then(|| metadata.encryption_method.clone()),
        encryption_nonce: (encrypted && !metadata.nonce.is_empty())
            .then(|| URL_SAFE.encode(&metadata.nonce)),
    };

    let surt = surt::canonicalize(&block.uri)?;
    let date = header.get("warc-date").unwrap_or_default();
    let timestamp =
        DateTime::parse_from_rfc3339(date).map_err(|err| IndexError::TimestampParseFailed {
            value: date.to_owned(),
            reason: err.to_string(),
        })?;
    let record_type = header
        .get("warc-type")
        .unwrap_or_default()
        .parse::<RecordType>()?;

    Ok(CdxjRecord {
        surt,
        timestamp,
        record_type,
        content: serde_json::to_vec(&block)?,
    })
}

pub fn assemble(records: Vec<CdxjRecord>) -> Result<Cdxj> {
    assemble_at(records, Utc::now())
}

pub fn assemble_at(records: Vec<CdxjRecord>, updated_at: DateTime<Utc>) -> Result<Cdxj> {
    let header = cdxj::build_header(
        cdxj::VERSION_KEY,
        cdxj::VERSION_VALUE,
        records.len(),
        updated_at,
    )?;
    Ok(Cdxj { header, records })
}

#[cfg(test)]
mod tests {
    use crate::config::EncryptionContext;
    use crate::prepare::Compression;
    use crate::store::MemoryStore;
    use crate::warc::WarcHeader;

    use super::*;

    const HTML: &str = "<html><head><title>Hello</title></head><body><h1>Hello, World!</h1></body></html>";
    const HEADER_BLOCK: &str = "Content-Type: text/html\r\nServer: test";

    fn http_response(body: &str) -> Vec<u8> {
        format!("HTTP/1.1 200 OK\r\n{HEADER_BLOCK}\r\nContent-Length: {}\r\n\r\n{body}", body.len())
            .into_bytes()
    }

    fn warc_record(kind: &str, uri: &str, content: Vec<u8>, offset: u64) -> WarcRecord {
        let mut header = WarcHeader::new("WARC/1.0");
        header.insert("WARC-Type", kind);
        header.insert("WARC-Target-URI", uri);
        header.insert("WARC-Date", "2009-11-10T23:12:00+01:00");
        header.insert("WARC-Record-ID", "<urn:uuid:B0B3862C-B271-4670-A4B5-B127576C6118>");
        header.insert("Content-Length", content.len().to_string());
        WarcRecord {
            header,
            offset,
            content,
        }
    }

    fn warc_file(records: &[(&str, &str, Vec<u8>)]) -> Vec<u8> {
        let mut out = Vec::new();
        for (i, (kind, uri, content)) in records.iter().enumerate() {
            out.extend_from_slice(
                format!(
                    "WARC/1.0\r\nWARC-Type: {kind}\r\nWARC-Target-URI: {uri}\r\nWARC-Date: 2020-01-01T00:00:0{i}Z\r\nWARC-Record-ID: <urn:uuid:{i}>\r\nContent-Length: {}\r\n\r\n",
                    content.len()
                )
                .as_bytes(),
            );
            out.extend_from_slice(content);
            out.extend_from_slice(b"\r\n\r\n");
        }
        out
    }

    fn indexer(config: IndexerConfig) -> anyhow::Result<(Indexer, Arc<MemoryStore>)> {
        let store = Arc::new(MemoryStore::new());
        let indexer = Indexer::new(config, store.clone())?;
        Ok((indexer, store))
    }

    fn blob_cids(block: &JsonBlock) -> (String, String) {
        let parts: Vec<&str> = block.locator.split('/').collect();
        assert_eq!(parts.len(), 3, "locator {}", block.locator);
        (parts[1].to_owned(), parts[2].to_owned())
    }

    #[tokio::test]
    async fn plaintext_record_end_to_end() -> anyhow::Result<()> {
        let (indexer, store) = indexer(IndexerConfig::default())?;
        let record = warc_record("response", "https://example.com", http_response(HTML), 42);

        let indexed = indexer.index_record("hello.warc", &record).await?;
        assert_eq!(indexed.surt, "https://(com,example,)");
        assert_eq!(indexed.record_type, RecordType::Response);
        assert_eq!(indexed.timestamp.to_rfc3339(), "2009-11-10T23:12:00+01:00");

        let value: serde_json::Value = serde_json::from_slice(&indexed.content)?;
        assert_eq!(value["uri"], "https://example.com");
        assert_eq!(value["ref"], "warcfile:hello.warc#42");
        assert_eq!(value["hsc"], 200);
        assert_eq!(value["mct"], "text/html");
        assert_eq!(value["sha"], crypto::content_digest(HTML.as_bytes()));
        assert_eq!(value["rid"], "<urn:uuid:B0B3862C-B271-4670-A4B5-B127576C6118>");
        assert_eq!(value["x_title"], "Hello");
        let obj = value.as_object().expect("object");
        assert!(obj.keys().all(|k| !k.starts_with("x_encryption")), "{value}");

        let block = indexed.payload()?;
        assert!(block.locator.starts_with("memory/"));
        let (header_cid, payload_cid) = blob_cids(&block);
        let stored_body = store.get(&payload_cid).expect("payload stored");
        let body = prepare::unprepare(std::str::from_utf8(&stored_body)?, Compression::Gzip, None)?;
        assert_eq!(body, HTML.as_bytes());

        let stored_header = store.get(&header_cid).expect("header stored");
        let header = prepare::unprepare(std::str::from_utf8(&stored_header)?, Compression::Gzip, None)?;
        let header = String::from_utf8(header)?;
        assert!(header.starts_with(HEADER_BLOCK));
        assert!(!header.contains("HTTP/1.1"));
        Ok(())
    }

    #[tokio::test]
    async fn encrypted_record_round_trips_through_store() -> anyhow::Result<()> {
        let config = IndexerConfig {
            encryption: EncryptionContext::new("helloworld", "saltsalt"),
            ..IndexerConfig::default()
        };
        let (indexer, store) = indexer(config)?;
        let record = warc_record("response", "https://example.com", http_response(HTML), 0);

        let indexed = indexer.index_record("hello.warc", &record).await?;
        let block = indexed.payload()?;
        assert_eq!(block.encryption_method.as_deref(), Some("aes-gcm"));
        assert_eq!(
            block.encryption_key_id.as_deref(),
            Some(URL_SAFE.encode(crypto::key_id(b"helloworld")).as_str())
        );
        let nonce = URL_SAFE.decode(block.encryption_nonce.as_deref().expect("nonce"))?;
        assert_eq!(nonce.len(), crypto::NONCE_SIZE);
        assert_eq!(block.sha, crypto::content_digest(HTML.as_bytes()));

        let cipher = crypto::build_cipher(crypto::derive_extended_key(b"helloworld", b"saltsalt")?.as_slice())?;
        let sealer = Sealer {
            cipher: &cipher,
            nonce: &nonce,
        };
        let (header_cid, payload_cid) = blob_cids(&block);

        let stored_body = String::from_utf8(store.get(&payload_cid).expect("payload"))?;
        assert_eq!(
            prepare::unprepare(&stored_body, Compression::Gzip, Some(sealer))?,
            HTML.as_bytes()
        );
        assert!(prepare::unprepare(&stored_body, Compression::Gzip, None).is_err());

        let stored_header = String::from_utf8(store.get(&header_cid).expect("header"))?;
        let header = prepare::unprepare(&stored_header, Compression::Gzip, Some(sealer))?;
        assert!(String::from_utf8(header)?.starts_with(HEADER_BLOCK));
        Ok(())
    }

    #[tokio::test]
    async fn each_record_gets_a_fresh_nonce() -> anyhow::Result<()> {
        let config = IndexerConfig {
            encryption: EncryptionContext::new("helloworld", ""),
            ..IndexerConfig::default()
        };
        let (indexer, _store) = indexer(config)?;
        let record = warc_record("response", "https://example.com", http_response(HTML), 0);

        let a = indexer.index_record("a.warc", &record).await?.payload()?;
        let b = indexer.index_record("a.warc", &record).await?.payload()?;
        assert_eq!(a.encryption_key_id, b.encryption_key_id);
        assert_ne!(a.encryption_nonce, b.encryption_nonce);
        Ok(())
    }

    #[tokio::test]
    async fn record_without_title_omits_it() -> anyhow::Result<()> {
        let (indexer, _store) = indexer(IndexerConfig::default())?;
        let record = warc_record("response", "https://example.com/data.json", http_response("{}"), 0);
        let block = indexer.index_record("x.warc", &record).await?.payload()?;
        assert_eq!(block.title, None);
        Ok(())
    }

    #[tokio::test]
    async fn record_failures_are_typed() -> anyhow::Result<()> {
        let (indexer, store) = indexer(IndexerConfig {
            max_body_bytes: 8,
            ..IndexerConfig::default()
        })?;

        let bad_http = warc_record("response", "https://example.com", b"not http".to_vec(), 0);
        assert!(matches!(
            indexer.index_record("x.warc", &bad_http).await,
            Err(IndexError::MalformedHttpMessage(_))
        ));

        let too_big = warc_record("response", "https://example.com", http_response(HTML), 0);
        assert!(matches!(
            indexer.index_record("x.warc", &too_big).await,
            Err(IndexError::BodyTooLarge { limit: 8 })
        ));

        let bad_uri = warc_record("response", "not a uri", http_response("tiny"), 0);
        assert!(matches!(
            indexer.index_record("x.warc", &bad_uri).await,
            Err(IndexError::CanonicalizationFailed { .. })
        ));

        let mut bad_date = warc_record("response", "https://example.com", http_response("tiny"), 0);
        bad_date.header = WarcHeader::new("WARC/1.0");
        bad_date.header.insert("WARC-Type", "response");
        bad_date.header.insert("WARC-Target-URI", "https://example.com");
        bad_date.header.insert("WARC-Date", "yesterday");
        assert!(matches!(
            indexer.index_record("x.warc", &bad_date).await,
            Err(IndexError::TimestampParseFailed { .. })
        ));

        // parse failures upload nothing; the last two records push identical blobs
        assert_eq!(store.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn file_driver_filters_to_responses_in_order() -> anyhow::Result<()> {
        let (indexer, _store) = indexer(IndexerConfig::default())?;
        let data = warc_file(&[
            ("warcinfo", "", b"software: test".to_vec()),
            ("request", "https://example.com/a", b"GET /a HTTP/1.1\r\n\r\n".to_vec()),
            ("response", "https://example.com/a", http_response("<title>A</title>")),
            ("response", "https://example.com/b", http_response("<title>B</title>")),
        ]);

        let cdxj = indexer
            .index_reader("two.warc", WarcReader::new(data.as_slice())?)
            .await?;
        assert_eq!(cdxj.records.len(), 2);
        assert_eq!(cdxj.records[0].surt, "https://(com,example,)/a");
        assert_eq!(cdxj.records[1].surt, "https://(com,example,)/b");
        assert_eq!(cdxj.records[1].payload()?.title.as_deref(), Some("B"));

        let meta: serde_json::Value =
            serde_json::from_slice(cdxj.header.get("meta").expect("meta"))?;
        assert_eq!(meta["record_count"], 2);
        Ok(())
    }

    #[tokio::test]
    async fn file_without_responses_counts_zero() -> anyhow::Result<()> {
        let (indexer, _store) = indexer(IndexerConfig::default())?;
        let data = warc_file(&[("warcinfo", "", b"software: test".to_vec())]);
        let cdxj = indexer
            .index_reader("empty.warc", WarcReader::new(data.as_slice())?)
            .await?;
        assert!(cdxj.records.is_empty());
        let meta: serde_json::Value =
            serde_json::from_slice(cdxj.header.get("meta").expect("meta"))?;
        assert_eq!(meta["record_count"], 0);
        Ok(())
    }

    #[tokio::test]
    async fn abort_policy_fails_file_and_skip_policy_continues() -> anyhow::Result<()> {
        let data = warc_file(&[
            ("response", "https://example.com/ok", http_response("<title>ok</title>")),
            ("response", "https://example.com/bad", b"garbage".to_vec()),
            ("response", "https://example.com/ok2", http_response("")),
        ]);

        let (abort, _) = indexer(IndexerConfig::default())?;
        let err = abort
            .index_reader("mixed.warc", WarcReader::new(data.as_slice())?)
            .await
            .expect_err("abort policy fails the file");
        let message = format!("{err:#}");
        assert!(message.contains("mixed.warc"), "{message}");
        assert!(message.contains("<urn:uuid:1>"), "{message}");

        let (skip, _) = indexer(IndexerConfig {
            on_record_error: RecordErrorPolicy::Skip,
            ..IndexerConfig::default()
        })?;
        let cdxj = skip
            .index_reader("mixed.warc", WarcReader::new(data.as_slice())?)
            .await?;
        assert_eq!(cdxj.records.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn cancelled_indexer_adds_no_records() -> anyhow::Result<()> {
        let cancel = CancellationToken::new();
        let (indexer, store) = indexer(IndexerConfig::default())?;
        let indexer = indexer.with_cancellation(cancel.clone());
        cancel.cancel();

        let record = warc_record("response", "https://example.com", http_response(HTML), 0);
        assert!(matches!(
            indexer.index_record("x.warc", &record).await,
            Err(IndexError::Cancelled)
        ));
        assert!(store.is_empty());

        let data = warc_file(&[("response", "https://example.com", http_response(HTML))]);
        let result = indexer
            .index_reader("x.warc", WarcReader::new(data.as_slice())?)
            .await;
        assert!(result.is_err());
        Ok(())
    }

    #[test]
    fn assembler_counts_records() -> anyhow::Result<()> {
        let updated_at = Utc::now();
        let doc = assemble_at(Vec::new(), updated_at)?;
        assert!(doc.records.is_empty());
        let meta: serde_json::Value =
            serde_json::from_slice(doc.header.get("meta").expect("meta"))?;
        assert_eq!(meta["record_count"], 0);
        assert_eq!(
            doc.header.get(cdxj::VERSION_KEY),
            Some(cdxj::VERSION_VALUE.as_bytes())
        );
        Ok(())
    }
}
