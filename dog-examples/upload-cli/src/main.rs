use anyhow::{Context, Result};
use clap::Parser;
use dog_upload::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Upload a file to S3-compatible storage in concurrent parts
#[derive(Debug, Parser)]
#[command(name = "dog-upload", version, about)]
struct Args {
    /// File to upload
    path: PathBuf,

    /// MIME type sent when the upload is initiated
    #[arg(long, default_value = "application/octet-stream")]
    content_type: String,

    /// Coordination service, overrides DOG_UPLOAD__BASE_URL
    #[arg(long)]
    base_url: Option<String>,

    /// Part size in MiB, overrides DOG_UPLOAD__CHUNK_SIZE
    #[arg(long)]
    chunk_mib: Option<u64>,

    /// Parts in flight at once, 0 for all of them
    #[arg(long)]
    concurrency: Option<usize>,

    /// Ask the backend to abort the upload when a part fails
    #[arg(long)]
    abort_on_failure: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut backend_config = HttpBackendConfig::from_env()?;
    if let Some(base_url) = args.base_url {
        backend_config.base_url = base_url;
    }

    let mut config = UploadConfig::from_env()?;
    if let Some(mib) = args.chunk_mib {
        config = config.with_chunk_size(chunk_bytes(mib)?);
    }
    match args.concurrency {
        Some(0) => config = config.unbounded_concurrency(),
        Some(n) => config = config.with_max_concurrency(n),
        None => {}
    }
    if args.abort_on_failure {
        config = config.abort_on_failure();
    }

    info!("Uploading {} via {}", args.path.display(), backend_config.base_url);
    let backend = HttpBackend::new(backend_config)?;
    let orchestrator = Arc::new(UploadOrchestrator::new(backend, HttpTransport::new(), config));

    let mut progress = orchestrator.progress();
    let printer = tokio::spawn(async move {
        let mut last = None;
        while progress.changed().await.is_ok() {
            let snapshot = progress.borrow_and_update().clone();
            let line = (snapshot.state, snapshot.overall_percent, snapshot.counts.completed);
            if last == Some(line) {
                continue;
            }
            last = Some(line);
            println!(
                "[{}] {:>3}% ({}/{} parts)",
                snapshot.state,
                snapshot.overall_percent,
                snapshot.counts.completed,
                snapshot.parts.len()
            );
            if snapshot.state.is_terminal() {
                break;
            }
        }
    });

    let interrupt = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, abandoning upload");
                orchestrator.reset();
            }
        })
    };

    let outcome = orchestrator.upload_file(&args.path, &args.content_type).await;
    interrupt.abort();
    let _ = interrupt.await;
    drop(orchestrator);
    printer.await.ok();

    match outcome {
        UploadOutcome::Succeeded(receipt) => {
            println!(
                "Uploaded {} ({} bytes, {} parts) to {}",
                receipt.key,
                receipt.size_bytes,
                receipt.parts,
                receipt.location.as_deref().unwrap_or(&receipt.bucket)
            );
            Ok(())
        }
        UploadOutcome::Failed { stage, error } => Err(error).with_context(|| {
            format!("Upload of {} failed during {}", args.path.display(), stage)
        }),
    }
}

/// `--chunk-mib` in bytes
fn chunk_bytes(mib: u64) -> Result<u64> {
    mib.checked_mul(1024 * 1024)
        .with_context(|| format!("--chunk-mib {} is too large", mib))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_mib_converts_to_bytes() {
        assert_eq!(chunk_bytes(5).unwrap(), 5 * 1024 * 1024);
    }

    #[test]
    fn oversized_chunk_mib_is_an_error() {
        let err = chunk_bytes(u64::MAX / 1024).unwrap_err();
        assert!(err.to_string().contains("too large"));
    }
}
