/// Extract Module
///
/// Decompresses downloaded archives into the period's extraction directory with a fixed pool of
/// workers. Decompression is blocking work and runs on the blocking thread pool.
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use zip::ZipArchive;

use crate::error::{Error, Result};
use crate::pool::run_pool;

pub struct Extractor {
    workers: usize,
    enabled: bool,
}

impl Extractor {
    pub fn new(workers: usize, enabled: bool) -> Self {
        Self { workers, enabled }
    }

    /// Extract every archive under `dest`. Returns the number of archives extracted.
    pub async fn extract_all(&self, archives: Vec<PathBuf>, dest: &Path, cancel: &CancellationToken) -> Result<usize> {
        let planned = archives.len();
        if !self.enabled {
            tracing::info!(planned, "extraction disabled, using files already extracted");
            return Ok(0);
        }

        tokio::fs::create_dir_all(dest).await.map_err(|e| Error::io(dest, e))?;
        tracing::info!(planned, workers = self.workers, dest = %dest.display(), "extract stage started");

        let root = Arc::new(dest.to_path_buf());
        run_pool("extract", archives, self.workers, cancel, move |archive: PathBuf| {
            let root = Arc::clone(&root);
            async move {
                let entries = tokio::task::spawn_blocking(move || extract_archive(&archive, &root))
                    .await
                    .map_err(|e| Error::Worker(format!("extract task: {}", e)))??;
                tracing::debug!(entries, "archive extracted");
                Ok(())
            }
        })
        .await?;

        tracing::info!(archives = planned, "extract stage finished");
        Ok(planned)
    }
}

/// Extract one archive, preserving the relative layout of its entries. Returns the number of
/// files written.
pub fn extract_archive(archive: &Path, dest: &Path) -> Result<usize> {
    let file = File::open(archive).map_err(|e| Error::extract(archive, format!("cannot open: {}", e)))?;
    let mut zip = ZipArchive::new(file).map_err(|e| Error::extract(archive, e))?;
    let mut written = 0;

    for index in 0..zip.len() {
        let mut entry = zip.by_index(index).map_err(|e| Error::extract(archive, format!("entry #{}: {}", index, e)))?;
        let name = entry.name().to_string();

        let relative = entry
            .enclosed_name()
            .ok_or_else(|| Error::extract(archive, format!("entry {} escapes the destination directory", name)))?;
        let target = dest.join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&target)
                .map_err(|e| Error::extract(archive, format!("entry {}: {}", name, e)))?;
            continue;
        }

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::extract(archive, format!("entry {}: {}", name, e)))?;
        }

        let mut out = File::create(&target).map_err(|e| Error::extract(archive, format!("entry {}: {}", name, e)))?;
        std::io::copy(&mut entry, &mut out).map_err(|e| Error::extract(archive, format!("entry {}: {}", name, e)))?;
        written += 1;
    }

    tracing::debug!(archive = %archive.display(), files = written, "archive unpacked");
    Ok(written)
}

#[cfg(test)]
pub(crate) mod fixtures {
    use std::io::Write;
    use std::path::Path;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    /// Write a zip at `path` holding `(name, contents)` entries
    pub fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let file = std::fs::File::create(path).unwrap();
        let mut writer = ZipWriter::new(file);
        for (name, contents) in entries {
            writer.start_file(*name, SimpleFileOptions::default()).unwrap();
            writer.write_all(contents).unwrap();
        }
        writer.finish().unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::write_zip;
    use super::*;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    #[test]
    fn test_extract_preserves_layout() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("Simples.zip");
        let file = File::create(&archive).unwrap();
        let mut writer = ZipWriter::new(file);
        writer.add_directory("nested/", SimpleFileOptions::default()).unwrap();
        writer.start_file("nested/F.K03200$W.SIMPLES.CSV", SimpleFileOptions::default()).unwrap();
        std::io::Write::write_all(&mut writer, b"\"1\";\"S\"\n").unwrap();
        writer.start_file("top.csv", SimpleFileOptions::default()).unwrap();
        writer.finish().unwrap();

        let dest = dir.path().join("extracted/2025-08");
        let written = extract_archive(&archive, &dest).unwrap();

        assert_eq!(written, 2);
        assert_eq!(std::fs::read(dest.join("nested/F.K03200$W.SIMPLES.CSV")).unwrap(), b"\"1\";\"S\"\n");
        assert!(dest.join("top.csv").exists());
    }

    #[test]
    fn test_escaping_entry_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("evil.zip");
        write_zip(&archive, &[("../outside.txt", b"x")]);

        let err = extract_archive(&archive, &dir.path().join("dest")).unwrap_err();

        assert!(matches!(err, Error::Extract { ref message, .. } if message.contains("../outside.txt")));
        assert!(!dir.path().join("outside.txt").exists());
    }

    #[test]
    fn test_corrupt_archive_names_the_archive() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("Broken.zip");
        std::fs::write(&archive, b"definitely not a zip").unwrap();

        let err = extract_archive(&archive, dir.path()).unwrap_err();

        assert!(err.to_string().contains("Broken.zip"));
    }

    #[tokio::test]
    async fn test_extract_all() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("Socios0.zip");
        let second = dir.path().join("Socios1.zip");
        write_zip(&first, &[("K3241.K03200Y0.D50809.SOCIOCSV", b"a")]);
        write_zip(&second, &[("K3241.K03200Y1.D50809.SOCIOCSV", b"b")]);
        let dest = dir.path().join("extracted");

        let count = Extractor::new(2, true).extract_all(vec![first, second], &dest, &CancellationToken::new()).await.unwrap();

        assert_eq!(count, 2);
        assert!(dest.join("K3241.K03200Y0.D50809.SOCIOCSV").exists());
        assert!(dest.join("K3241.K03200Y1.D50809.SOCIOCSV").exists());
    }

    #[tokio::test]
    async fn test_extract_all_surfaces_missing_archive() {
        let dir = tempfile::tempdir().unwrap();

        let err = Extractor::new(1, true)
            .extract_all(vec![dir.path().join("Missing.zip")], &dir.path().join("dest"), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Extract { ref archive, .. } if archive.ends_with("Missing.zip")));
    }

    #[tokio::test]
    async fn test_disabled_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("dest");

        let count = Extractor::new(1, false)
            .extract_all(vec![dir.path().join("Missing.zip")], &dest, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(count, 0);
        assert!(!dest.exists());
    }
}
