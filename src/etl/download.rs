/// Download Module
///
/// Fetches the wanted archives into the output directory with a fixed pool of workers.
/// An archive already on disk with exactly the reported size is not fetched again.
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use crate::dav::DavClient;
use crate::error::{Error, Result};
use crate::models::Artifact;
use crate::pool::run_pool;

/// Download stage statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadStats {
    pub planned: usize,
    pub fetched: usize,
    pub skipped: usize,
    pub bytes: u64,
}

#[derive(Default)]
struct Counters {
    fetched: AtomicUsize,
    skipped: AtomicUsize,
    bytes: AtomicU64,
}

enum Outcome {
    Skipped,
    Fetched(u64),
}

pub struct Downloader {
    client: Arc<DavClient>,
    output_dir: PathBuf,
    workers: usize,
    enabled: bool,
}

impl Downloader {
    pub fn new(client: Arc<DavClient>, output_dir: impl Into<PathBuf>, workers: usize, enabled: bool) -> Self {
        Self { client, output_dir: output_dir.into(), workers, enabled }
    }

    /// Local path an archive is stored at
    pub fn destination(&self, artifact: &Artifact) -> PathBuf {
        self.output_dir.join(artifact.file_name())
    }

    /// Download every artifact, stopping at the first failure.
    pub async fn download_all(&self, artifacts: &[Artifact], cancel: &CancellationToken) -> Result<DownloadStats> {
        let planned = artifacts.len();
        if !self.enabled {
            tracing::info!(planned, "download disabled, using archives already on disk");
            return Ok(DownloadStats { planned, ..Default::default() });
        }

        tokio::fs::create_dir_all(&self.output_dir).await.map_err(|e| Error::io(&self.output_dir, e))?;

        tracing::info!(planned, workers = self.workers, dir = %self.output_dir.display(), "download stage started");

        let jobs: Vec<(Artifact, PathBuf)> = artifacts.iter().map(|a| (a.clone(), self.destination(a))).collect();
        let counters = Arc::new(Counters::default());
        let client = Arc::clone(&self.client);
        let totals = Arc::clone(&counters);

        run_pool("download", jobs, self.workers, cancel, move |(artifact, dest)| {
            let client = Arc::clone(&client);
            let totals = Arc::clone(&totals);
            async move {
                match download_one(&client, &artifact, &dest).await? {
                    Outcome::Skipped => {
                        totals.skipped.fetch_add(1, Ordering::Relaxed);
                    }
                    Outcome::Fetched(bytes) => {
                        totals.fetched.fetch_add(1, Ordering::Relaxed);
                        totals.bytes.fetch_add(bytes, Ordering::Relaxed);
                    }
                }
                Ok(())
            }
        })
        .await?;

        let stats = DownloadStats {
            planned,
            fetched: counters.fetched.load(Ordering::Relaxed),
            skipped: counters.skipped.load(Ordering::Relaxed),
            bytes: counters.bytes.load(Ordering::Relaxed),
        };
        tracing::info!(
            planned,
            fetched = stats.fetched,
            skipped = stats.skipped,
            bytes = stats.bytes,
            "download stage finished"
        );

        Ok(stats)
    }
}

async fn download_one(client: &DavClient, artifact: &Artifact, dest: &Path) -> Result<Outcome> {
    let file = artifact.file_name();

    if let Ok(meta) = tokio::fs::metadata(dest).await {
        if artifact.size > 0 && meta.len() == artifact.size {
            tracing::debug!(file, size = artifact.size, "already downloaded, skipping");
            return Ok(Outcome::Skipped);
        }
        tracing::debug!(file, local = meta.len(), remote = artifact.size, "size differs, downloading again");
        tokio::fs::remove_file(dest).await.map_err(|e| Error::io(dest, e))?;
    }

    let url = client.artifact_url(&artifact.href);
    let part = part_path(dest);

    let written = match fetch_to(client, &url, &part).await {
        Ok(written) => written,
        Err(e) => {
            let _ = tokio::fs::remove_file(&part).await;
            return Err(e);
        }
    };

    tokio::fs::rename(&part, dest).await.map_err(|e| Error::io(dest, e))?;
    tracing::debug!(file, bytes = written, "downloaded");

    Ok(Outcome::Fetched(written))
}

/// Stream the body of `url` into `part`, chunk by chunk
async fn fetch_to(client: &DavClient, url: &str, part: &Path) -> Result<u64> {
    let response = client.fetch(url).await?;

    let mut out = tokio::fs::File::create(part).await.map_err(|e| Error::io(part, e))?;
    let mut stream = response.bytes_stream();
    let mut written = 0u64;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| Error::transport(url, e))?;
        out.write_all(&chunk).await.map_err(|e| Error::io(part, e))?;
        written += chunk.len() as u64;
    }

    out.flush().await.map_err(|e| Error::io(part, e))?;
    Ok(written)
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    dest.with_file_name(name)
}
