/// Classify Module
///
/// Assigns extracted files to datasets by keywords in their base name. Rules are tried in
/// catalog order and the first match wins.
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::datasets::{Dataset, CATALOG};
use crate::error::{Error, Result};

/// Dataset a file name belongs to, if any
pub fn classify_name(name: &str) -> Option<&'static Dataset> {
    let upper = name.to_uppercase();
    CATALOG.iter().find(|dataset| dataset.keywords.iter().any(|keyword| upper.contains(keyword)))
}

/// Walk `root` recursively and group its files by dataset.
pub fn classify(root: &Path) -> Result<BTreeMap<&'static str, Vec<PathBuf>>> {
    if !root.is_dir() {
        return Err(Error::io(
            root,
            std::io::Error::new(std::io::ErrorKind::NotFound, "extraction directory does not exist"),
        ));
    }

    let mut files: BTreeMap<&'static str, Vec<PathBuf>> = BTreeMap::new();
    let mut unmatched = 0usize;

    for entry in WalkDir::new(root) {
        let entry = entry.map_err(|e| {
            let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
            let source = e.into_io_error().unwrap_or_else(|| std::io::Error::other("filesystem loop"));
            Error::io(path, source)
        })?;

        if !entry.file_type().is_file() {
            continue;
        }

        let name = entry.file_name().to_string_lossy();
        match classify_name(&name) {
            Some(dataset) => files.entry(dataset.name).or_default().push(entry.path().to_path_buf()),
            None => {
                tracing::debug!(file = %entry.path().display(), "file matches no dataset");
                unmatched += 1;
            }
        }
    }

    for (dataset, paths) in &files {
        tracing::info!(dataset, files = paths.len(), "files classified");
    }
    if unmatched > 0 {
        tracing::info!(unmatched, "files left unclassified");
    }

    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name_of(file: &str) -> Option<&'static str> {
        classify_name(file).map(|d| d.name)
    }

    #[test]
    fn test_release_file_names() {
        assert_eq!(name_of("K3241.K03200Y0.D50809.EMPRECSV"), Some("empresa"));
        assert_eq!(name_of("K3241.K03200Y7.D50809.ESTABELE"), Some("estabelecimento"));
        assert_eq!(name_of("K3241.K03200Y2.D50809.SOCIOCSV"), Some("socios"));
        assert_eq!(name_of("F.K03200$W.SIMPLES.CSV.D50809"), Some("simples"));
        assert_eq!(name_of("F.K03200$Z.D50809.CNAECSV"), Some("cnae"));
        assert_eq!(name_of("F.K03200$Z.D50809.MOTICSV"), Some("moti"));
        assert_eq!(name_of("F.K03200$Z.D50809.MUNICCSV"), Some("munic"));
        assert_eq!(name_of("F.K03200$Z.D50809.NATJUCSV"), Some("natju"));
        assert_eq!(name_of("F.K03200$Z.D50809.PAISCSV"), Some("pais"));
        assert_eq!(name_of("F.K03200$Z.D50809.QUALSCSV"), Some("quals"));
        assert_eq!(name_of("leiame.pdf"), None);
    }

    #[test]
    fn test_match_is_case_insensitive() {
        assert_eq!(name_of("naturezas.csv"), Some("natju"));
        assert_eq!(name_of("motivo.txt"), Some("moti"));
    }

    #[test]
    fn test_first_rule_wins() {
        // Both SOCIO and QUAL appear; SOCIO comes first in the rule order.
        assert_eq!(name_of("SOCIO_QUAL.csv"), Some("socios"));
        assert_eq!(name_of("EMPRESA_ESTABELECIMENTO.csv"), Some("empresa"));
    }

    #[test]
    fn test_classify_walks_recursively() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("a/b")).unwrap();
        std::fs::write(dir.path().join("K.D50809.SOCIOCSV"), b"").unwrap();
        std::fs::write(dir.path().join("a/b/K1.D50809.SOCIOCSV"), b"").unwrap();
        std::fs::write(dir.path().join("a/F.D50809.QUALSCSV"), b"").unwrap();
        std::fs::write(dir.path().join("a/readme.txt"), b"").unwrap();

        let files = classify(dir.path()).unwrap();

        assert_eq!(files.len(), 2);
        assert_eq!(files["socios"].len(), 2);
        assert_eq!(files["quals"], vec![dir.path().join("a/F.D50809.QUALSCSV")]);
    }

    #[test]
    fn test_missing_root_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = classify(&dir.path().join("nope")).unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }
}
