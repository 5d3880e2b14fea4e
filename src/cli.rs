use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::config::DEFAULT_MAX_BODY_BYTES;
use crate::prepare::Compression;

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// Log line format on stderr.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Index WARC files into CDXJ, pushing payloads to IPFS.
    Index(IndexArgs),
    /// Recover the original bytes of one stored blob (read from stdin).
    Decrypt(DecryptArgs),
}

#[derive(Debug, Args)]
pub struct IndexArgs {
    /// WARC files, or directories holding `.warc` / `.warc.gz` files.
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// IPFS API address (multiaddr or http(s) URL).
    #[arg(long, env = "WARC_INDEXER_NODE", default_value = "/ip4/127.0.0.1/tcp/5001")]
    pub node: String,

    /// Passphrase; payloads are encrypted when set.
    #[arg(long, env = "WARC_INDEXER_KEY", hide_env_values = true)]
    pub key: Option<String>,

    /// Salt mixed into key derivation.
    #[arg(long, env = "WARC_INDEXER_SALT", hide_env_values = true, default_value = "")]
    pub salt: String,

    /// Directory for `<input>.cdxj` files. Prints to stdout when omitted.
    #[arg(long)]
    pub out: Option<PathBuf>,

    /// Number of files indexed in parallel.
    #[arg(long, default_value_t = 1)]
    pub concurrency: usize,

    /// Largest response body buffered for one record.
    #[arg(long, default_value_t = DEFAULT_MAX_BODY_BYTES)]
    pub max_body_bytes: usize,

    /// Compression applied before sealing (`gzip` or `none`).
    #[arg(long, default_value_t = Compression::Gzip)]
    pub compression: Compression,

    /// Skip records that fail to index instead of failing the file.
    #[arg(long, default_value_t = false)]
    pub continue_on_error: bool,

    /// Keep payloads in memory instead of pushing them to IPFS.
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,
}

#[derive(Debug, Args)]
pub struct DecryptArgs {
    /// Passphrase used when indexing. Omit for plaintext blobs.
    #[arg(long, env = "WARC_INDEXER_KEY", hide_env_values = true)]
    pub key: Option<String>,

    #[arg(long, env = "WARC_INDEXER_SALT", hide_env_values = true, default_value = "")]
    pub salt: String,

    /// `x_encryption_nonce` of the record (base64url).
    #[arg(long)]
    pub nonce: Option<String>,

    #[arg(long, default_value_t = Compression::Gzip)]
    pub compression: Compression,
}
