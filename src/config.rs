/// Configuration Module
///
/// The validated run configuration. It is built once from the parsed CLI before anything
/// touches the network, the filesystem or the database; the pipeline only ever reads it.
use std::path::PathBuf;

use crate::cli::Cli;
use crate::datasets::{self, Dataset};
use crate::error::{Error, Result};
use crate::models::Period;

/// Placeholder replaced by `YYYY-MM` in the listing URL template
pub const PERIOD_PLACEHOLDER: &str = "{period}";

#[derive(Debug, Clone)]
pub struct Config {
    pub output_dir: PathBuf,
    pub extracted_dir: PathBuf,
    pub dav_base_domain: String,
    pub dav_list_url_template: String,
    pub start_period: Option<Period>,
    pub force_period: Option<Period>,
    pub enable_download: bool,
    pub enable_extract: bool,
    pub create_indexes: bool,
    /// Enabled datasets, in catalog order
    pub datasets: Vec<&'static Dataset>,
    pub workers: Workers,
    pub mail: MailConfig,
}

/// Pool sizes for each concurrent stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Workers {
    pub download: usize,
    pub extract: usize,
    pub tables: usize,
    pub files: usize,
}

impl Default for Workers {
    fn default() -> Self {
        Self { download: 4, extract: 2, tables: 2, files: 2 }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MailConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub pass: String,
    pub to: Vec<String>,
    pub notify_up_to_date: bool,
}

impl MailConfig {
    /// Email is sent only when credentials and at least one recipient are present.
    pub fn is_complete(&self) -> bool {
        !self.user.trim().is_empty() && !self.pass.trim().is_empty() && !self.to.is_empty()
    }
}

impl Config {
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let template = cli.dav_list_url_template.trim();
        if template.is_empty() {
            return Err(Error::config("DAV_LIST_URL_TEMPLATE is required"));
        }
        if !template.contains(PERIOD_PLACEHOLDER) {
            return Err(Error::config(format!("DAV_LIST_URL_TEMPLATE must contain {}", PERIOD_PLACEHOLDER)));
        }

        let start_period = parse_optional_period("START_MONTH", cli.start_month.as_deref())?;
        let force_period = parse_optional_period("FORCE_MONTH", cli.force_month.as_deref())?;

        let datasets = resolve_datasets(&cli.datasets)?;

        let workers = Workers {
            download: cli.download_workers,
            extract: cli.extract_workers,
            tables: cli.table_workers,
            files: cli.file_workers,
        };
        for (name, count) in [
            ("DOWNLOAD_WORKERS", workers.download),
            ("EXTRACT_WORKERS", workers.extract),
            ("TABLE_WORKERS", workers.tables),
            ("FILE_WORKERS", workers.files),
        ] {
            if count == 0 {
                return Err(Error::config(format!("{} must be greater than 0", name)));
            }
        }

        let mail = MailConfig {
            host: cli.smtp_host.trim().to_string(),
            port: cli.smtp_port,
            user: cli.smtp_user.clone().unwrap_or_default(),
            pass: cli.smtp_pass.clone().unwrap_or_default(),
            to: cli.mail_to.as_deref().map(parse_recipients).unwrap_or_default(),
            notify_up_to_date: cli.mail_notify_up_to_date,
        };

        Ok(Self {
            output_dir: PathBuf::from(&cli.output_files_path),
            extracted_dir: PathBuf::from(&cli.extracted_files_path),
            dav_base_domain: cli.dav_base_domain.trim().trim_end_matches('/').to_string(),
            dav_list_url_template: template.to_string(),
            start_period,
            force_period,
            enable_download: cli.enable_download,
            enable_extract: cli.enable_extract,
            create_indexes: cli.create_indexes,
            datasets,
            workers,
            mail,
        })
    }

    /// Directory the archives of one period are extracted into.
    pub fn extracted_period_dir(&self, period: Period) -> PathBuf {
        self.extracted_dir.join(period.to_string())
    }

    /// Size of the database pool: one connection per concurrently loading file, plus slack
    /// for DDL and cursor writes.
    pub fn database_connections(&self) -> u32 {
        let loaders = self.workers.tables.saturating_mul(self.workers.files);
        u32::try_from(loaders).unwrap_or(u32::MAX).saturating_add(2)
    }
}

fn parse_optional_period(name: &str, value: Option<&str>) -> Result<Option<Period>> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(v) => v.parse::<Period>().map(Some).map_err(|e| Error::config(format!("{} is invalid: {}", name, e))),
    }
}

fn resolve_datasets(names: &[String]) -> Result<Vec<&'static Dataset>> {
    let mut enabled = Vec::new();
    for name in names.iter().map(|n| n.trim()).filter(|n| !n.is_empty()) {
        let dataset = datasets::find(name).ok_or_else(|| {
            let known: Vec<&str> = datasets::CATALOG.iter().map(|d| d.name).collect();
            Error::config(format!("unknown dataset {:?} (known: {})", name, known.join(", ")))
        })?;
        if !enabled.contains(&dataset) {
            enabled.push(dataset);
        }
    }

    if enabled.is_empty() {
        return Err(Error::config("at least one dataset must be enabled"));
    }

    // Catalog order keeps logs and classification stable regardless of how the list was written.
    enabled.sort_by_key(|d| datasets::CATALOG.iter().position(|c| std::ptr::eq(c, *d)));
    Ok(enabled)
}

/// Split a recipient list on ',' or ';', dropping blanks.
pub fn parse_recipients(to: &str) -> Vec<String> {
    to.split([',', ';']).map(str::trim).filter(|a| !a.is_empty()).map(str::to_string).collect()
}

#[cfg(test)]
pub(crate) fn test_config(root: &std::path::Path, base_domain: &str, names: &[&str]) -> Config {
    Config {
        output_dir: root.join("output"),
        extracted_dir: root.join("extracted"),
        dav_base_domain: base_domain.trim_end_matches('/').to_string(),
        dav_list_url_template: format!("{}/dav/{}", base_domain.trim_end_matches('/'), PERIOD_PLACEHOLDER),
        start_period: None,
        force_period: None,
        enable_download: true,
        enable_extract: true,
        create_indexes: false,
        datasets: names.iter().filter_map(|n| datasets::find(n)).collect(),
        workers: Workers::default(),
        mail: MailConfig::default(),
    }
}
