use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Args;
use tokio::io::AsyncReadExt;
use tracing::{info, warn};

use bitstore_common::{AttributeKey, AttributeValue, BitStoreService, Bitstream};

#[derive(Args)]
pub struct PutArgs {
    /// File to store
    pub file: PathBuf,
    /// Internal id to store under (generated when omitted)
    #[arg(long)]
    pub id: Option<String>,
}

#[derive(Args)]
pub struct GetArgs {
    pub id: String,
    /// Write to this file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Args)]
pub struct AboutArgs {
    pub id: String,
    /// Attributes to report (size_bytes, checksum, checksum_algorithm, modified).
    /// All of them when omitted.
    #[arg(short, long = "attr")]
    pub attrs: Vec<AttributeKey>,
}

#[derive(Args)]
pub struct RemoveArgs {
    pub id: String,
}

#[derive(Args)]
pub struct CheckArgs {
    /// File to round-trip
    pub file: PathBuf,
    /// Leave the test object in the store
    #[arg(long)]
    pub keep: bool,
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub async fn put(store: &dyn BitStoreService, args: PutArgs) -> anyhow::Result<()> {
    let mut file = tokio::fs::File::open(&args.file)
        .await
        .with_context(|| format!("Failed to open {}", args.file.display()))?;
    let id = args.id.unwrap_or_else(|| store.generate_id());
    let mut bitstream = Bitstream::new(id);

    store.put(&mut bitstream, &mut file).await?;
    info!(id = %bitstream.internal_id, bytes = bitstream.size_bytes, "Stored");
    print_json(&bitstream)
}

pub async fn get(store: &dyn BitStoreService, args: GetArgs) -> anyhow::Result<()> {
    let bitstream = Bitstream::new(args.id);
    let Some(mut reader) = store.get(&bitstream).await? else {
        bail!("No bitstream stored under {}", bitstream.internal_id);
    };

    let bytes = match &args.output {
        Some(path) => {
            let mut out = tokio::fs::File::create(path)
                .await
                .with_context(|| format!("Failed to create {}", path.display()))?;
            tokio::io::copy(&mut reader, &mut out).await?
        }
        None => tokio::io::copy(&mut reader, &mut tokio::io::stdout()).await?,
    };
    info!(id = %bitstream.internal_id, bytes, "Retrieved");
    Ok(())
}

pub async fn about(store: &dyn BitStoreService, args: AboutArgs) -> anyhow::Result<()> {
    let requested = if args.attrs.is_empty() {
        AttributeKey::ALL.to_vec()
    } else {
        args.attrs
    };
    let bitstream = Bitstream::new(args.id);
    match store.about(&bitstream, &requested).await? {
        Some(attrs) => print_json(&attrs),
        None => bail!("No bitstream stored under {}", bitstream.internal_id),
    }
}

pub async fn remove(store: &dyn BitStoreService, args: RemoveArgs) -> anyhow::Result<()> {
    let bitstream = Bitstream::new(args.id);
    store.remove(&bitstream).await?;
    info!(id = %bitstream.internal_id, "Removed");
    Ok(())
}

/// Store a file, read it back, compare sizes and checksums, then clean up.
pub async fn check(store: &dyn BitStoreService, args: CheckArgs) -> anyhow::Result<()> {
    let original = tokio::fs::read(&args.file)
        .await
        .with_context(|| format!("Failed to read {}", args.file.display()))?;

    let mut bitstream = Bitstream::new(store.generate_id());
    let mut input = original.as_slice();
    store.put(&mut bitstream, &mut input).await?;

    if bitstream.size_bytes != original.len() as u64 {
        bail!(
            "size mismatch: stored {} bytes, file has {}",
            bitstream.size_bytes,
            original.len()
        );
    }

    let attrs = store
        .about(&bitstream, &[AttributeKey::SizeBytes, AttributeKey::Checksum])
        .await?
        .context("Object missing right after put")?;
    let reported = match attrs.get(&AttributeKey::Checksum) {
        Some(AttributeValue::Text(checksum)) => Some(checksum.as_str()),
        _ => None,
    };
    if reported != bitstream.checksum.as_deref() {
        bail!(
            "checksum mismatch: put returned {:?}, store reports {:?}",
            bitstream.checksum,
            reported
        );
    }

    let mut reader = store
        .get(&bitstream)
        .await?
        .context("Object missing right after put")?;
    let mut fetched = Vec::with_capacity(original.len());
    reader.read_to_end(&mut fetched).await?;
    drop(reader);
    if fetched != original {
        bail!("content mismatch after round trip");
    }

    if args.keep {
        warn!(id = %bitstream.internal_id, "Keeping check object");
    } else {
        store.remove(&bitstream).await?;
    }
    info!(
        id = %bitstream.internal_id,
        bytes = bitstream.size_bytes,
        checksum = bitstream.checksum.as_deref().unwrap_or(""),
        "Round trip verified"
    );
    print_json(&bitstream)
}
