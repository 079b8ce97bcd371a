/// CLI Module
///
/// Command-line interface configuration using clap. Every flag falls back to an
/// environment variable, so the loader can run from a `.env` file alone.
use clap::{builder::BoolishValueParser, ArgAction, Parser};

use crate::datasets::DEFAULT_ENABLED;

/// RFCNPJ Loader - ETL Pipeline
///
/// Download, extract and load the monthly CNPJ open-data release into PostgreSQL
#[derive(Parser, Debug)]
#[command(name = "rfcnpj-loader")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Directory where downloaded archives are kept
    #[arg(long, env = "OUTPUT_FILES_PATH", value_name = "DIR", default_value = "/data/output")]
    pub output_files_path: String,

    /// Directory where archives are extracted (one subdirectory per period)
    #[arg(long, env = "EXTRACTED_FILES_PATH", value_name = "DIR", default_value = "/data/extracted")]
    pub extracted_files_path: String,

    /// PostgreSQL connection URL
    #[arg(short = 'd', long, env = "DATABASE_URL", value_name = "URL")]
    pub database_url: String,

    /// Scheme and host prepended to listed archive paths
    #[arg(long, env = "DAV_BASE_DOMAIN", value_name = "URL", default_value = "https://arquivos.receitafederal.gov.br")]
    pub dav_base_domain: String,

    /// WebDAV listing URL, with `{period}` standing for YYYY-MM
    #[arg(long, env = "DAV_LIST_URL_TEMPLATE", value_name = "URL")]
    pub dav_list_url_template: String,

    /// First period to load for datasets that were never loaded (YYYY-MM)
    #[arg(short = 's', long, env = "START_MONTH", value_name = "YYYY-MM")]
    pub start_month: Option<String>,

    /// Load exactly this period for every enabled dataset (YYYY-MM)
    #[arg(short = 'f', long, env = "FORCE_MONTH", value_name = "YYYY-MM")]
    pub force_month: Option<String>,

    /// Download archives (disable to reprocess files already on disk)
    #[arg(long, env = "ENABLE_DOWNLOAD", default_value_t = true, action = ArgAction::Set, value_parser = BoolishValueParser::new())]
    pub enable_download: bool,

    /// Extract archives (disable to reload files already extracted)
    #[arg(long, env = "ENABLE_EXTRACT", default_value_t = true, action = ArgAction::Set, value_parser = BoolishValueParser::new())]
    pub enable_extract: bool,

    /// Create cnpj_basico indexes after loading
    #[arg(long, env = "CREATE_INDEXES", default_value_t = false, action = ArgAction::Set, value_parser = BoolishValueParser::new())]
    pub create_indexes: bool,

    /// Datasets to load (comma separated table names)
    #[arg(short = 'l', long = "load", env = "LOAD_DATASETS", value_name = "NAMES", value_delimiter = ',', default_values = DEFAULT_ENABLED)]
    pub datasets: Vec<String>,

    /// Number of concurrent downloads
    #[arg(long, env = "DOWNLOAD_WORKERS", value_name = "COUNT", default_value = "4")]
    pub download_workers: usize,

    /// Number of archives extracted concurrently
    #[arg(long, env = "EXTRACT_WORKERS", value_name = "COUNT", default_value = "2")]
    pub extract_workers: usize,

    /// Number of tables loaded concurrently
    #[arg(long, env = "TABLE_WORKERS", value_name = "COUNT", default_value = "2")]
    pub table_workers: usize,

    /// Number of files loaded concurrently within one table
    #[arg(long, env = "FILE_WORKERS", value_name = "COUNT", default_value = "2")]
    pub file_workers: usize,

    /// SMTP server host
    #[arg(long, env = "SMTP_HOST", value_name = "HOST", default_value = "smtp.gmail.com")]
    pub smtp_host: String,

    /// SMTP server port
    #[arg(long, env = "SMTP_PORT", value_name = "PORT", default_value = "587")]
    pub smtp_port: u16,

    /// SMTP user, also used as sender address
    #[arg(long, env = "SMTP_USER", value_name = "USER")]
    pub smtp_user: Option<String>,

    /// SMTP password
    #[arg(long, env = "SMTP_PASS", value_name = "PASSWORD", hide_env_values = true)]
    pub smtp_pass: Option<String>,

    /// Notification recipients, separated by ',' or ';'
    #[arg(long, env = "MAIL_TO", value_name = "ADDRESSES")]
    pub mail_to: Option<String>,

    /// Also send an email when the next period is not published yet
    #[arg(long, env = "MAIL_NOTIFY_UPTODATE", default_value_t = false, action = ArgAction::Set, value_parser = BoolishValueParser::new())]
    pub mail_notify_up_to_date: bool,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, env = "LOG_LEVEL", value_name = "FILTER", default_value = "info")]
    pub log_level: String,
}
