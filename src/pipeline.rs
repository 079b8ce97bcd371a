/// Pipeline Module
///
/// Orchestrates one run: resolve period → list → filter → download → extract → classify →
/// load → index → commit cursors, with statistics tracking and a final report.
///
/// Cursors are committed only after every due table loaded successfully, so a failed run
/// changes nothing and can simply be retried.
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::datasets::Dataset;
use crate::dav::DavClient;
use crate::db::cursor::{advance_cursors, CursorStore};
use crate::error::{Error, Result};
use crate::etl::{
    classify::classify,
    download::Downloader,
    extract::Extractor,
    filter::ArtifactFilter,
    load::{BulkLoader, TableSink},
    resolve::{resolve, Resolution},
};
use crate::models::Period;
use crate::notify::{notify_best_effort, Notifier};
use crate::pool::run_pool;

/// One dataset and the files found for it in this run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadTask {
    pub dataset: &'static Dataset,
    pub files: Vec<PathBuf>,
}

/// Load stage statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadStats {
    /// Rows per loaded dataset
    pub rows: BTreeMap<&'static str, u64>,
    /// Due datasets without any file
    pub skipped: Vec<&'static str>,
}

/// Build one task per due dataset, ordered by dataset name.
pub fn build_tasks(due: &[&'static Dataset], mut files: BTreeMap<&'static str, Vec<PathBuf>>) -> Vec<LoadTask> {
    let mut tasks: Vec<LoadTask> = due
        .iter()
        .map(|&dataset| {
            let mut paths = files.remove(dataset.name).unwrap_or_default();
            paths.sort();
            LoadTask { dataset, files: paths }
        })
        .collect();

    tasks.sort_by_key(|t| t.dataset.name);
    tasks
}

/// Load every task: up to `table_workers` tables at once, and up to `file_workers` files at once
/// within each table.
pub async fn run_load_tasks(
    loader: &BulkLoader,
    tasks: Vec<LoadTask>,
    table_workers: usize,
    file_workers: usize,
    cancel: &CancellationToken,
) -> Result<LoadStats> {
    let mut skipped = Vec::new();
    let mut runnable = Vec::with_capacity(tasks.len());
    for task in tasks {
        if task.files.is_empty() {
            tracing::warn!(dataset = task.dataset.name, "no files found for dataset, skipping");
            skipped.push(task.dataset.name);
        } else {
            runnable.push(task);
        }
    }

    tracing::info!(tables = runnable.len(), table_workers, file_workers, "load stage started");

    let rows: Arc<Mutex<BTreeMap<&'static str, u64>>> = Arc::new(Mutex::new(BTreeMap::new()));
    let loader = loader.clone();
    let totals = Arc::clone(&rows);
    let token = cancel.clone();

    run_pool("tables", runnable, table_workers, cancel, move |task: LoadTask| {
        let loader = loader.clone();
        let totals = Arc::clone(&totals);
        let token = token.clone();
        async move {
            let dataset = task.dataset;
            let file_count = task.files.len();

            loader.ensure_table(dataset).await?;
            totals.lock().await.insert(dataset.name, 0);

            let file_loader = loader.clone();
            let file_totals = Arc::clone(&totals);
            let loaded = run_pool("files", task.files, file_workers, &token, move |file: PathBuf| {
                let loader = file_loader.clone();
                let totals = Arc::clone(&file_totals);
                async move {
                    let result = loader.load_file(dataset, file).await?;
                    *totals.lock().await.entry(dataset.name).or_insert(0) += result.rows;
                    Ok(())
                }
            })
            .await;

            if let Err(e) = loaded {
                tracing::error!(dataset = dataset.name, error = %e, "dataset load failed");
                return Err(e);
            }

            let total = totals.lock().await.get(dataset.name).copied().unwrap_or(0);
            tracing::info!(dataset = dataset.name, files = file_count, rows = total, "dataset loaded");
            Ok(())
        }
    })
    .await?;

    let rows = rows.lock().await.clone();
    Ok(LoadStats { rows, skipped })
}

/// Summary of a completed run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub period: Period,
    pub url: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub downloads_planned: usize,
    pub archives_extracted: usize,
    pub rows: BTreeMap<&'static str, u64>,
    pub skipped: Vec<&'static str>,
}

impl RunReport {
    pub fn total_rows(&self) -> u64 {
        self.rows.values().sum()
    }

    pub fn subject(&self) -> String {
        finished_subject(self.period)
    }

    /// Plain-text body used in the notification email
    pub fn render(&self) -> String {
        let mut body = format!(
            "rfcnpj-loader finished loading {} ({})\n\n\
             Listing: {}\n\
             Started: {}\n\
             Finished: {}\n\
             Duration: {}s\n\
             Archives planned for download: {}\n\
             Archives extracted: {}\n\n\
             Rows loaded:\n",
            self.period.human(),
            self.period,
            self.url,
            self.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
            self.finished_at.format("%Y-%m-%d %H:%M:%S UTC"),
            (self.finished_at - self.started_at).num_seconds(),
            self.downloads_planned,
            self.archives_extracted,
        );

        if self.rows.is_empty() {
            body.push_str("  (none)\n");
        }
        for (dataset, rows) in &self.rows {
            body.push_str(&format!("  {}: {}\n", dataset, rows));
        }
        body.push_str(&format!("  total: {}\n", self.total_rows()));

        if !self.skipped.is_empty() {
            body.push_str(&format!("\nSkipped (no files): {}\n", self.skipped.join(", ")));
        }

        body
    }
}

pub fn finished_subject(period: Period) -> String {
    format!("rfcnpj-loader finished - {}", period)
}

pub fn up_to_date_subject(period: Period) -> String {
    format!("rfcnpj-loader up to date ({})", period)
}

#[derive(Debug)]
pub enum RunOutcome {
    /// The next period is not published yet; nothing was loaded
    UpToDate { period: Period, url: String },
    Completed(RunReport),
}

/// Main ETL Pipeline
pub struct Pipeline {
    config: Config,
    client: Arc<DavClient>,
    cursors: Arc<dyn CursorStore>,
    sink: Arc<dyn TableSink>,
    notifier: Arc<dyn Notifier>,
}

impl Pipeline {
    /// Create a new pipeline instance
    pub fn new(
        config: Config,
        client: Arc<DavClient>,
        cursors: Arc<dyn CursorStore>,
        sink: Arc<dyn TableSink>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self { config, client, cursors, sink, notifier }
    }

    /// Run the pipeline once
    pub async fn run(&self, cancel: &CancellationToken) -> Result<RunOutcome> {
        let started_at = Utc::now();

        tracing::info!(
            datasets = ?self.config.datasets.iter().map(|d| d.name).collect::<Vec<_>>(),
            start = ?self.config.start_period.map(|p| p.to_string()),
            force = ?self.config.force_period.map(|p| p.to_string()),
            download = self.config.enable_download,
            extract = self.config.enable_extract,
            indexes = self.config.create_indexes,
            "pipeline started"
        );

        let resolution = resolve(&self.config, self.client.as_ref(), self.cursors.as_ref()).await?;
        let (period, url, artifacts, due) = match resolution {
            Resolution::UpToDate { period, url } => {
                tracing::info!(period = %period, "already up to date, next period not published yet");
                if self.config.mail.notify_up_to_date {
                    let body = format!(
                        "Already up to date. The next period ({}) is not available yet.\n\nListing: {}\n",
                        period.human(),
                        url
                    );
                    notify_best_effort(self.notifier.as_ref(), &up_to_date_subject(period), &body).await;
                }
                return Ok(RunOutcome::UpToDate { period, url });
            }
            Resolution::Ready { period, url, artifacts, due } => (period, url, artifacts, due),
        };

        let filter = ArtifactFilter::new(&due)?;
        let wanted = filter.wanted(&artifacts);

        let workers = self.config.workers;
        let downloader = Downloader::new(
            Arc::clone(&self.client),
            &self.config.output_dir,
            workers.download,
            self.config.enable_download,
        );
        downloader.download_all(&wanted, cancel).await?;

        let archives: Vec<PathBuf> = wanted.iter().map(|a| downloader.destination(a)).collect();
        let dest = self.config.extracted_period_dir(period);
        let extracted =
            Extractor::new(workers.extract, self.config.enable_extract).extract_all(archives, &dest, cancel).await?;

        let root = dest.clone();
        let files = tokio::task::spawn_blocking(move || classify(&root))
            .await
            .map_err(|e| Error::Worker(format!("classify task: {}", e)))??;

        let tasks = build_tasks(&due, files);
        let loader = BulkLoader::new(Arc::clone(&self.sink));
        let stats = run_load_tasks(&loader, tasks, workers.tables, workers.files, cancel).await?;

        if self.config.create_indexes {
            self.create_indexes(&loader, &stats).await?;
        }

        advance_cursors(self.cursors.as_ref(), period, &url, &due).await?;

        let report = RunReport {
            period,
            url,
            started_at,
            finished_at: Utc::now(),
            downloads_planned: wanted.len(),
            archives_extracted: extracted,
            rows: stats.rows,
            skipped: stats.skipped,
        };

        tracing::info!(period = %period, rows = report.total_rows(), "pipeline finished");
        notify_best_effort(self.notifier.as_ref(), &report.subject(), &report.render()).await;

        Ok(RunOutcome::Completed(report))
    }

    /// Index the loaded tables that carry `cnpj_basico`
    async fn create_indexes(&self, loader: &BulkLoader, stats: &LoadStats) -> Result<()> {
        let indexed = self.config.datasets.iter().copied().filter(|d| d.indexed && stats.rows.contains_key(d.name));
        for dataset in indexed {
            loader.create_cnpj_index(dataset).await?;
        }
        tracing::info!("index stage finished");
        Ok(())
    }
}
