use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use sha2::Digest as _;
use url::Url;

use crate::error::{IndexError, Result};

/// Content-addressed storage: push bytes, get back an opaque identifier.
#[async_trait]
pub trait ContentStore: Send + Sync {
    fn scheme(&self) -> &'static str;

    async fn put(&self, bytes: Vec<u8>) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct IpfsStore {
    api_base: Url,
    client: reqwest::Client,
}

impl IpfsStore {
    pub fn new(addr: &str) -> anyhow::Result<Self> {
        let api_base = node_url(addr).with_context(|| format!("parse ipfs node address: {addr}"))?;
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("build ipfs http client")?;
        Ok(Self { api_base, client })
    }

    pub fn api_base(&self) -> &Url {
        &self.api_base
    }

    fn add_endpoint(&self) -> Result<Url> {
        self.api_base
            .join("api/v0/add?pin=true")
            .map_err(|err| IndexError::StorageUploadFailed(format!("build add endpoint: {err}")))
    }
}

#[derive(Debug, serde::Deserialize)]
struct AddResponse {
    #[serde(rename = "Hash")]
    hash: String,
}

#[async_trait]
impl ContentStore for IpfsStore {
    fn scheme(&self) -> &'static str {
        "ipfs"
    }

    async fn put(&self, bytes: Vec<u8>) -> Result<String> {
        let endpoint = self.add_endpoint()?;
        let size = bytes.len();
        let form = reqwest::multipart::Form::new().part(
            "file",
            reqwest::multipart::Part::bytes(bytes).file_name("blob"),
        );

        let response = self
            .client
            .post(endpoint.clone())
            .multipart(form)
            .send()
            .await
            .map_err(|err| IndexError::StorageUploadFailed(format!("POST {endpoint}: {err}")))?;

        let status = response.status();
        let raw = response
            .text()
            .await
            .map_err(|err| IndexError::StorageUploadFailed(format!("read add response: {err}")))?;
        if !status.is_success() {
            return Err(IndexError::StorageUploadFailed(format!(
                "ipfs add failed ({status}): {}",
                raw.trim()
            )));
        }

        // The add endpoint streams one JSON object per line; the last names
        // the uploaded file.
        let last = raw
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .ok_or_else(|| IndexError::StorageUploadFailed("empty add response".to_owned()))?;
        let added: AddResponse = serde_json::from_str(last).map_err(|err| {
            IndexError::StorageUploadFailed(format!("parse add response {last:?}: {err}"))
        })?;
        tracing::debug!(cid = %added.hash, size, "pushed blob to ipfs");
        Ok(added.hash)
    }
}

pub fn node_url(addr: &str) -> anyhow::Result<Url> {
    let addr = addr.trim();
    if addr.starts_with("http://") || addr.starts_with("https://") {
        let mut url = Url::parse(addr).context("parse node url")?;
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        return Ok(url);
    }

    let parts: Vec<&str> = addr.split('/').filter(|p| !p.is_empty()).collect();
    let mut host = None;
    let mut port = None;
    let mut scheme = "http";
    let mut iter = parts.iter();
    while let Some(protocol) = iter.next() {
        match *protocol {
            "ip4" | "dns" | "dns4" | "dns6" => {
                let value = iter
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("multiaddr /{protocol} needs a value"))?;
                host = Some((*value).to_owned());
            }
            "ip6" => {
                let value = iter
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("multiaddr /ip6 needs a value"))?;
                host = Some(format!("[{value}]"));
            }
            "tcp" => {
                let value = iter
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("multiaddr /tcp needs a port"))?;
                port = Some(
                    value
                        .parse::<u16>()
                        .with_context(|| format!("invalid tcp port: {value}"))?,
                );
            }
            "http" => scheme = "http",
            "https" | "tls" => scheme = "https",
            other => anyhow::bail!("unsupported multiaddr protocol: {other}"),
        }
    }

    let host = host.ok_or_else(|| anyhow::anyhow!("multiaddr has no host component"))?;
    let port = port.ok_or_else(|| anyhow::anyhow!("multiaddr has no /tcp port"))?;
    Url::parse(&format!("{scheme}://{host}:{port}/")).context("build node url")
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, cid: &str) -> Option<Vec<u8>> {
        self.blobs.lock().ok()?.get(cid).cloned()
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().map(|blobs| blobs.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ContentStore for MemoryStore {
    fn scheme(&self) -> &'static str {
        "memory"
    }

    async fn put(&self, bytes: Vec<u8>) -> Result<String> {
        let cid = hex::encode(sha2::Sha256::digest(&bytes));
        self.blobs
            .lock()
            .map_err(|_| IndexError::StorageUploadFailed("memory store lock poisoned".to_owned()))?
            .insert(cid.clone(), bytes);
        Ok(cid)
    }
}
