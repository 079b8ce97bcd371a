/// Resolve Module
///
/// Decides which period this run loads and which datasets are due for it.
/// Each dataset wants the period after its cursor (or the configured start when it has none);
/// the run targets the earliest of those, so lagging datasets catch up one period per run.
use std::collections::BTreeMap;

use crate::config::Config;
use crate::dav::DirectoryLister;
use crate::datasets::Dataset;
use crate::db::cursor::{load_cursors, CursorStore};
use crate::error::{Error, Result};
use crate::models::{Artifact, Period};

/// Target period and the datasets that load it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub target: Period,
    pub due: Vec<&'static Dataset>,
}

#[derive(Debug)]
pub enum Resolution {
    /// The target period is not published yet
    UpToDate { period: Period, url: String },
    Ready { period: Period, url: String, artifacts: Vec<Artifact>, due: Vec<&'static Dataset> },
}

/// Compute the target period from cursors, without touching the network.
pub fn plan(
    datasets: &[&'static Dataset],
    cursors: &BTreeMap<&'static str, Period>,
    start: Option<Period>,
    forced: Option<Period>,
) -> Result<Plan> {
    if datasets.is_empty() {
        return Err(Error::config("no dataset is enabled"));
    }

    if let Some(target) = forced {
        return Ok(Plan { target, due: datasets.to_vec() });
    }

    let mut candidates = Vec::with_capacity(datasets.len());
    for dataset in datasets {
        let candidate = match cursors.get(dataset.name) {
            Some(cursor) => cursor.successor(),
            None => start.ok_or_else(|| {
                Error::config(format!("START_MONTH is required: dataset {} has never been loaded", dataset.name))
            })?,
        };
        candidates.push((*dataset, candidate));
    }

    let target = candidates.iter().map(|(_, c)| *c).min().ok_or_else(|| Error::config("no dataset is enabled"))?;

    let due = candidates
        .into_iter()
        .filter(|(dataset, candidate)| *candidate == target || !cursors.contains_key(dataset.name))
        .map(|(dataset, _)| dataset)
        .collect();

    Ok(Plan { target, due })
}

/// Resolve the run: read cursors, plan, then check that the target period is published.
///
/// A listing failure (or an empty listing) means the period is not available yet, which is
/// reported as [`Resolution::UpToDate`] rather than an error.
pub async fn resolve(config: &Config, lister: &dyn DirectoryLister, store: &dyn CursorStore) -> Result<Resolution> {
    let cursors = load_cursors(store, &config.datasets).await?;
    for (dataset, cursor) in &cursors {
        tracing::debug!(dataset, cursor = %cursor, "cursor loaded");
    }

    let Plan { target, due } = plan(&config.datasets, &cursors, config.start_period, config.force_period)?;
    let url = lister.listing_url(target);

    tracing::info!(
        period = %target,
        forced = config.force_period.is_some(),
        due = ?due.iter().map(|d| d.name).collect::<Vec<_>>(),
        "target period resolved"
    );

    match lister.list(target).await {
        Ok(artifacts) if artifacts.is_empty() => {
            tracing::info!(period = %target, url = %url, "listing is empty, period not published yet");
            Ok(Resolution::UpToDate { period: target, url })
        }
        Ok(artifacts) => {
            tracing::info!(period = %target, archives = artifacts.len(), "remote archives listed");
            Ok(Resolution::Ready { period: target, url, artifacts, due })
        }
        Err(e) => {
            tracing::info!(period = %target, url = %url, error = %e, "period not available yet");
            Ok(Resolution::UpToDate { period: target, url })
        }
    }
}
