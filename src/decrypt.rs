use std::io::{Read as _, Write as _};

use anyhow::Context as _;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE;

use crate::cli::DecryptArgs;
use crate::crypto;
use crate::prepare::{self, Sealer};

pub fn run(args: DecryptArgs) -> anyhow::Result<()> {
    let mut encoded = String::new();
    std::io::stdin()
        .read_to_string(&mut encoded)
        .context("read blob from stdin")?;

    let original = recover(&args, &encoded)?;

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&original).context("write stdout")?;
    stdout.flush().context("flush stdout")?;
    Ok(())
}

fn recover(args: &DecryptArgs, encoded: &str) -> anyhow::Result<Vec<u8>> {
    let Some(key) = args.key.as_deref().filter(|key| !key.is_empty()) else {
        return prepare::unprepare(encoded, args.compression, None).context("decode blob");
    };

    let nonce = args
        .nonce
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("--nonce is required with --key"))?;
    let nonce = URL_SAFE
        .decode(nonce.trim())
        .context("decode --nonce as base64url")?;

    let extended = crypto::derive_extended_key(key.as_bytes(), args.salt.as_bytes())
        .context("derive key")?;
    let cipher = crypto::build_cipher(extended.as_slice()).context("build cipher")?;
    let sealer = Sealer {
        cipher: &cipher,
        nonce: &nonce,
    };
    prepare::unprepare(encoded, args.compression, Some(sealer)).context("open blob")
}
