/// Filter Module
///
/// Maps listed archives to the datasets that want them. Single-file reference datasets match
/// by exact file name; sharded datasets match `<Prefix><n>.zip`.
use regex::Regex;

use crate::datasets::{ArchiveRule, Dataset};
use crate::error::{Error, Result};
use crate::models::Artifact;

enum Matcher {
    /// Lowercase `/<name>` suffix
    Suffix(String),
    Pattern(Regex),
}

pub struct ArtifactFilter {
    rules: Vec<(&'static Dataset, Matcher)>,
}

impl ArtifactFilter {
    /// Build a filter that only matches the given datasets.
    pub fn new(datasets: &[&'static Dataset]) -> Result<Self> {
        let mut rules = Vec::with_capacity(datasets.len());

        for dataset in datasets {
            let matcher = match dataset.archive {
                ArchiveRule::Exact(name) => Matcher::Suffix(format!("/{}", name.to_ascii_lowercase())),
                ArchiveRule::Numbered(prefix) => {
                    let pattern = format!(r"(?i)/{}\d+\.zip$", regex::escape(prefix));
                    let regex = Regex::new(&pattern)
                        .map_err(|e| Error::config(format!("bad archive pattern for {}: {}", dataset.name, e)))?;
                    Matcher::Pattern(regex)
                }
            };
            rules.push((*dataset, matcher));
        }

        Ok(Self { rules })
    }

    /// Dataset an archive belongs to, if it is wanted at all
    pub fn dataset_for(&self, artifact: &Artifact) -> Option<&'static Dataset> {
        let href = artifact.href.trim();
        let lower = href.to_ascii_lowercase();

        self.rules
            .iter()
            .find(|(_, matcher)| match matcher {
                Matcher::Suffix(suffix) => lower.ends_with(suffix.as_str()),
                Matcher::Pattern(regex) => regex.is_match(href),
            })
            .map(|(dataset, _)| *dataset)
    }

    /// Keep the wanted archives, in listing order
    pub fn wanted(&self, artifacts: &[Artifact]) -> Vec<Artifact> {
        let wanted: Vec<Artifact> = artifacts.iter().filter(|a| self.dataset_for(a).is_some()).cloned().collect();

        tracing::info!(listed = artifacts.len(), wanted = wanted.len(), "archives filtered");
        wanted
    }
}
