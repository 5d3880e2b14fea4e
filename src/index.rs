use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use tokio_util::sync::CancellationToken;

use crate::cdxj::Cdxj;
use crate::cli::IndexArgs;
use crate::config::{EncryptionContext, IndexerConfig, RecordErrorPolicy};
use crate::indexer::Indexer;
use crate::store::{ContentStore, IpfsStore, MemoryStore};

pub async fn run(args: IndexArgs, cancel: CancellationToken) -> anyhow::Result<()> {
    let inputs = collect_inputs(&args.paths)?;
    if inputs.is_empty() {
        anyhow::bail!("no .warc or .warc.gz files found in the given paths");
    }

    if let Some(out_dir) = &args.out {
        std::fs::create_dir_all(out_dir)
            .with_context(|| format!("create output dir: {}", out_dir.display()))?;
        for input in &inputs {
            let path = output_path(out_dir, input)?;
            if path.exists() {
                anyhow::bail!("index output already exists: {}", path.display());
            }
        }
    }

    let store: Arc<dyn ContentStore> = if args.dry_run {
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(IpfsStore::new(&args.node).context("configure ipfs node")?)
    };

    let encryption = match args.key.as_deref() {
        Some(key) => EncryptionContext::new(key, args.salt.as_str()),
        None => EncryptionContext::plaintext(),
    };
    let config = IndexerConfig {
        encryption,
        compression: args.compression,
        max_body_bytes: args.max_body_bytes,
        on_record_error: if args.continue_on_error {
            RecordErrorPolicy::Skip
        } else {
            RecordErrorPolicy::Abort
        },
    };
    tracing::info!(
        files = inputs.len(),
        store = store.scheme(),
        encrypted = config.encryption.is_encrypted(),
        compression = %config.compression,
        "indexing"
    );

    let indexer = Arc::new(
        Indexer::new(config, store)
            .context("build indexer")?
            .with_cancellation(cancel.clone()),
    );

    let concurrency = args.concurrency.max(1).min(inputs.len());
    let mut join_set = tokio::task::JoinSet::new();
    let mut next_idx = 0usize;
    let mut results: Vec<Option<Cdxj>> = vec![None; inputs.len()];
    let mut next_emit = 0usize;
    let mut total_records = 0usize;

    while next_idx < inputs.len() || !join_set.is_empty() {
        while next_idx < inputs.len() && join_set.len() < concurrency {
            let file_index = next_idx;
            let path = inputs[file_index].clone();
            let indexer = Arc::clone(&indexer);
            join_set.spawn(async move {
                let indexed = indexer
                    .index_file(&path)
                    .await
                    .with_context(|| format!("index {}", path.display()));
                (file_index, indexed)
            });
            next_idx += 1;
        }

        let Some(joined) = join_set.join_next().await else {
            break;
        };
        let (file_index, indexed) = joined.context("join indexing task")?;
        let cdxj = match indexed {
            Ok(cdxj) => cdxj,
            Err(err) => {
                cancel.cancel();
                return Err(err);
            }
        };
        total_records += cdxj.records.len();

        match &args.out {
            Some(out_dir) => write_index(&output_path(out_dir, &inputs[file_index])?, &cdxj)?,
            None => {
                results[file_index] = Some(cdxj);
                // stdout keeps input order
                let mut stdout = std::io::stdout().lock();
                while let Some(Some(ready)) = results.get_mut(next_emit).map(Option::take) {
                    ready.write_to(&mut stdout).context("write index to stdout")?;
                    next_emit += 1;
                }
            }
        }
    }

    tracing::info!(files = inputs.len(), records = total_records, "indexing complete");
    Ok(())
}

fn collect_inputs(paths: &[PathBuf]) -> anyhow::Result<Vec<PathBuf>> {
    let mut inputs = Vec::new();
    for path in paths {
        if !path.is_dir() {
            inputs.push(path.clone());
            continue;
        }

        let mut found = Vec::new();
        for entry in std::fs::read_dir(path)
            .with_context(|| format!("read input dir: {}", path.display()))?
        {
            let entry = entry.with_context(|| format!("read input dir: {}", path.display()))?;
            let candidate = entry.path();
            if candidate.is_file() && is_warc_name(&candidate) {
                found.push(candidate);
            }
        }
        found.sort();
        tracing::debug!(dir = %path.display(), files = found.len(), "expanded input dir");
        inputs.extend(found);
    }
    Ok(inputs)
}

fn is_warc_name(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.ends_with(".warc") || name.ends_with(".warc.gz"))
}

fn output_path(out_dir: &Path, input: &Path) -> anyhow::Result<PathBuf> {
    let name = input
        .file_name()
        .ok_or_else(|| anyhow::anyhow!("input has no file name: {}", input.display()))?;
    let mut name = name.to_os_string();
    name.push(".cdxj");
    Ok(out_dir.join(name))
}

fn write_index(path: &Path, cdxj: &Cdxj) -> anyhow::Result<()> {
    let file = OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(path)
        .with_context(|| format!("create index file: {}", path.display()))?;
    let mut writer = std::io::BufWriter::new(file);
    cdxj.write_to(&mut writer)
        .with_context(|| format!("write index file: {}", path.display()))?;
    writer
        .flush()
        .with_context(|| format!("flush index file: {}", path.display()))?;
    tracing::info!(path = %path.display(), records = cdxj.records.len(), "wrote index");
    Ok(())
}
