use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    let cli = warc_indexer::cli::Cli::parse();
    warc_indexer::logging::init(cli.log_format).context("init logging")?;

    match cli.command {
        warc_indexer::cli::Command::Index(args) => {
            let cancel = CancellationToken::new();
            tokio::spawn({
                let cancel = cancel.clone();
                async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        tracing::warn!("interrupted; cancelling in-flight uploads");
                        cancel.cancel();
                    }
                }
            });
            warc_indexer::index::run(args, cancel)
                .await
                .context("index")?;
        }
        warc_indexer::cli::Command::Decrypt(args) => {
            warc_indexer::decrypt::run(args).context("decrypt")?;
        }
    }

    Ok(())
}
