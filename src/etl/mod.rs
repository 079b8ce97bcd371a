/// ETL Pipeline Module
///
/// The stages of a run, in the order the pipeline drives them:
/// - Resolve: pick the period to load and the datasets due for it
/// - Filter: keep the listed archives of the due datasets
/// - Download / Extract: bring the archives to disk and unpack them
/// - Classify: group extracted files by dataset
/// - Load: stream files into PostgreSQL
pub mod classify;
pub mod download;
pub mod extract;
pub mod filter;
pub mod load;
pub mod resolve;
