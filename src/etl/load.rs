/// Load Module
///
/// Streams extracted files into PostgreSQL. Files are ISO-8859-1 encoded, `;` separated,
/// without a header row and with a ragged number of fields. Quoting is lenient: company names
/// often carry bare `"` characters, which are kept as they are. Every record is fitted to the
/// table's column count, trimmed, and sent through `COPY ... FROM STDIN`.
use async_trait::async_trait;
use sqlx::postgres::PgPoolCopyExt;
use sqlx::PgPool;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::datasets::Dataset;
use crate::error::{Error, Result};

/// One normalized record
pub type Row = Vec<String>;

/// Rows handed to the sink at a time
pub const BATCH_ROWS: usize = 1024;

/// Batches buffered between the file reader and the sink
const CHANNEL_DEPTH: usize = 4;

const READ_CHUNK: usize = 64 * 1024;

const SEPARATOR: char = ';';

const QUOTE: char = '"';

/// Rows loaded from one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadResult {
    pub dataset: &'static str,
    pub file: PathBuf,
    pub rows: u64,
}

/// Decodes ISO-8859-1 bytes into UTF-8 as they are read
pub struct Latin1Reader<R> {
    inner: R,
    raw: Vec<u8>,
    decoded: Vec<u8>,
    pos: usize,
}

impl<R: Read> Latin1Reader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, raw: vec![0; READ_CHUNK], decoded: Vec::with_capacity(READ_CHUNK * 2), pos: 0 }
    }
}

impl<R: Read> Read for Latin1Reader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.decoded.len() {
            let n = self.inner.read(&mut self.raw)?;
            if n == 0 {
                return Ok(0);
            }
            // Every byte is one character, so chunk boundaries never split a character.
            self.decoded.clear();
            self.decoded.extend_from_slice(encoding_rs::mem::decode_latin1(&self.raw[..n]).as_bytes());
            self.pos = 0;
        }

        let n = buf.len().min(self.decoded.len() - self.pos);
        buf[..n].copy_from_slice(&self.decoded[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// Splits decoded text into `;` separated records.
///
/// A field starting with `"` is quoted: `""` inside it is one literal quote, and a `"` closes it
/// only when a separator, a line end or the end of input follows. Any other `"` is kept as
/// written. Quoted fields may span lines, and an unterminated one runs to the end of input.
/// Blank lines are skipped.
pub struct LenientRecords<R> {
    inner: R,
    line: String,
    line_no: u64,
}

impl<R: BufRead> LenientRecords<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, line: String::new(), line_no: 0 }
    }

    /// Line number of the last line read, starting at 1
    pub fn line_no(&self) -> u64 {
        self.line_no
    }

    /// Read the next line without its terminator. Returns false at end of input.
    fn next_line(&mut self) -> io::Result<bool> {
        self.line.clear();
        if self.inner.read_line(&mut self.line)? == 0 {
            return Ok(false);
        }
        self.line_no += 1;

        if self.line.ends_with('\n') {
            self.line.pop();
            if self.line.ends_with('\r') {
                self.line.pop();
            }
        }
        Ok(true)
    }

    /// Fill `fields` with the next record. Returns false at end of input.
    pub fn read_record(&mut self, fields: &mut Vec<String>) -> io::Result<bool> {
        fields.clear();

        loop {
            if !self.next_line()? {
                return Ok(false);
            }
            if !self.line.is_empty() {
                break;
            }
        }

        let mut line = std::mem::take(&mut self.line);
        let mut start = 0;

        'fields: loop {
            if !line[start..].starts_with(QUOTE) {
                match line[start..].find(SEPARATOR) {
                    Some(i) => {
                        fields.push(line[start..start + i].to_string());
                        start += i + 1;
                        continue 'fields;
                    }
                    None => {
                        fields.push(line[start..].to_string());
                        return Ok(true);
                    }
                }
            }

            let mut field = String::new();
            let mut cursor = start + 1;
            loop {
                let Some(i) = line[cursor..].find(QUOTE) else {
                    field.push_str(&line[cursor..]);
                    if !self.next_line()? {
                        fields.push(field);
                        return Ok(true);
                    }
                    field.push('\n');
                    line = std::mem::take(&mut self.line);
                    cursor = 0;
                    continue;
                };

                field.push_str(&line[cursor..cursor + i]);
                let after = cursor + i + 1;
                match line[after..].chars().next() {
                    Some(QUOTE) => {
                        field.push(QUOTE);
                        cursor = after + 1;
                    }
                    Some(SEPARATOR) => {
                        fields.push(field);
                        start = after + 1;
                        continue 'fields;
                    }
                    None => {
                        fields.push(field);
                        return Ok(true);
                    }
                    Some(_) => {
                        field.push(QUOTE);
                        cursor = after;
                    }
                }
            }
        }
    }
}

/// Fit a record to `width` columns: extra fields are dropped, missing ones are empty.
pub fn normalize_record<'a>(fields: impl IntoIterator<Item = &'a str>, width: usize) -> Row {
    let mut row: Row = fields.into_iter().take(width).map(|f| f.trim().to_string()).collect();
    row.resize(width, String::new());
    row
}

/// Receiving end of a file's row stream. A read failure arrives as an `Err` item.
pub struct RowBatches {
    rx: mpsc::Receiver<Result<Vec<Row>>>,
}

impl RowBatches {
    pub async fn next(&mut self) -> Option<Result<Vec<Row>>> {
        self.rx.recv().await
    }
}

/// Read `path` on the current (blocking) thread and send normalized batches to `tx`.
///
/// Stops quietly when the receiver goes away.
pub fn read_rows(path: &Path, width: usize, tx: mpsc::Sender<Result<Vec<Row>>>) {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) => {
            let _ = tx.blocking_send(Err(Error::load(path, format!("cannot open: {}", e))));
            return;
        }
    };

    let mut records = LenientRecords::new(BufReader::new(Latin1Reader::new(file)));
    let mut fields = Vec::new();
    let mut batch = Vec::with_capacity(BATCH_ROWS);

    loop {
        match records.read_record(&mut fields) {
            Ok(true) => {
                batch.push(normalize_record(fields.iter().map(String::as_str), width));
                if batch.len() == BATCH_ROWS {
                    let full = std::mem::replace(&mut batch, Vec::with_capacity(BATCH_ROWS));
                    if tx.blocking_send(Ok(full)).is_err() {
                        return;
                    }
                }
            }
            Ok(false) => break,
            Err(e) => {
                let line = records.line_no() + 1;
                let _ = tx.blocking_send(Err(Error::load(path, format!("line {}: {}", line, e))));
                return;
            }
        }
    }

    if !batch.is_empty() {
        let _ = tx.blocking_send(Ok(batch));
    }
}

/// Destination of loaded rows
#[async_trait]
pub trait TableSink: Send + Sync {
    /// Drop and create the dataset's table
    async fn recreate_table(&self, dataset: &'static Dataset) -> Result<()>;

    /// Copy every row into the dataset's table. A failure must leave no row of this file behind.
    async fn copy_rows(&self, dataset: &'static Dataset, file: &Path, rows: RowBatches) -> Result<u64>;

    async fn create_cnpj_index(&self, dataset: &'static Dataset) -> Result<()>;
}

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub fn drop_table_sql(dataset: &Dataset) -> String {
    format!("DROP TABLE IF EXISTS {}", quote_ident(dataset.name))
}

/// Every column is TEXT
pub fn create_table_sql(dataset: &Dataset) -> String {
    let columns: Vec<String> = dataset.columns.iter().map(|c| format!("{} TEXT", quote_ident(c))).collect();
    format!("CREATE TABLE IF NOT EXISTS {} ({})", quote_ident(dataset.name), columns.join(", "))
}

pub fn copy_sql(dataset: &Dataset) -> String {
    let columns: Vec<String> = dataset.columns.iter().map(|c| quote_ident(c)).collect();
    format!("COPY {} ({}) FROM STDIN WITH (FORMAT csv)", quote_ident(dataset.name), columns.join(", "))
}

pub fn index_sql(dataset: &Dataset) -> String {
    format!(
        "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
        quote_ident(&format!("{}_cnpj", dataset.name)),
        quote_ident(dataset.name),
        quote_ident("cnpj_basico")
    )
}

/// Encode a batch as CSV for `COPY ... WITH (FORMAT csv)`.
///
/// Every field is quoted so empty strings stay empty strings instead of becoming NULL.
pub fn encode_batch(batch: &[Row]) -> std::result::Result<Vec<u8>, csv::Error> {
    let mut writer = csv::WriterBuilder::new()
        .quote_style(csv::QuoteStyle::Always)
        .from_writer(Vec::with_capacity(batch.len() * 64));

    for row in batch {
        writer.write_record(row)?;
    }

    writer.into_inner().map_err(|e| csv::Error::from(e.into_error()))
}

/// Table sink backed by PostgreSQL
pub struct PgSink {
    pool: PgPool,
}

impl PgSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TableSink for PgSink {
    async fn recreate_table(&self, dataset: &'static Dataset) -> Result<()> {
        sqlx::query(&drop_table_sql(dataset)).execute(&self.pool).await?;
        sqlx::query(&create_table_sql(dataset)).execute(&self.pool).await?;
        Ok(())
    }

    async fn copy_rows(&self, dataset: &'static Dataset, file: &Path, mut rows: RowBatches) -> Result<u64> {
        let mut copy = self.pool.copy_in_raw(&copy_sql(dataset)).await.map_err(|e| Error::load(file, e))?;

        while let Some(batch) = rows.next().await {
            let failure = match batch {
                Ok(batch) => match encode_batch(&batch) {
                    Ok(bytes) => match copy.send(bytes).await {
                        Ok(_) => continue,
                        Err(e) => Error::load(file, e),
                    },
                    Err(e) => Error::load(file, e),
                },
                Err(e) => e,
            };

            if let Err(abort) = copy.abort(failure.to_string()).await {
                tracing::warn!(file = %file.display(), error = %abort, "failed to abort COPY");
            }
            return Err(failure);
        }

        copy.finish().await.map_err(|e| Error::load(file, e))
    }

    async fn create_cnpj_index(&self, dataset: &'static Dataset) -> Result<()> {
        sqlx::query(&index_sql(dataset)).execute(&self.pool).await?;
        Ok(())
    }
}

/// Drives the file reader and the sink for one file at a time
#[derive(Clone)]
pub struct BulkLoader {
    sink: Arc<dyn TableSink>,
}

impl BulkLoader {
    pub fn new(sink: Arc<dyn TableSink>) -> Self {
        Self { sink }
    }

    /// Recreate the dataset's table. Must run before any of its files load.
    pub async fn ensure_table(&self, dataset: &'static Dataset) -> Result<()> {
        self.sink.recreate_table(dataset).await?;
        tracing::info!(dataset = dataset.name, columns = dataset.columns.len(), "table recreated");
        Ok(())
    }

    /// Stream one file into the dataset's table
    pub async fn load_file(&self, dataset: &'static Dataset, file: PathBuf) -> Result<LoadResult> {
        tracing::debug!(dataset = dataset.name, file = %file.display(), "loading file");

        let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
        let width = dataset.columns.len();
        let source = file.clone();
        let reader = tokio::task::spawn_blocking(move || read_rows(&source, width, tx));

        let copied = self.sink.copy_rows(dataset, &file, RowBatches { rx }).await;
        reader.await.map_err(|e| Error::Worker(format!("reader for {}: {}", file.display(), e)))?;
        let rows = copied?;

        tracing::info!(dataset = dataset.name, file = %file.display(), rows, "file loaded");
        Ok(LoadResult { dataset: dataset.name, file, rows })
    }

    pub async fn create_cnpj_index(&self, dataset: &'static Dataset) -> Result<()> {
        self.sink.create_cnpj_index(dataset).await?;
        tracing::info!(dataset = dataset.name, "cnpj_basico index ready");
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::memory::MemorySink;
    use super::*;
    use crate::datasets::find;

    fn collect_rows(path: &Path, width: usize) -> Vec<Result<Vec<Row>>> {
        let (tx, mut rx) = mpsc::channel(CHANNEL_DEPTH);
        let source = path.to_path_buf();
        let reader = std::thread::spawn(move || read_rows(&source, width, tx));
        let mut out = Vec::new();
        while let Some(batch) = rx.blocking_recv() {
            out.push(batch);
        }
        reader.join().unwrap();
        out
    }

    #[test]
    fn test_short_record_is_padded() {
        assert_eq!(normalize_record(["a", "b"], 4), vec!["a", "b", "", ""]);
    }

    #[test]
    fn test_long_record_is_truncated() {
        assert_eq!(normalize_record(["1", "2", "3", "4", "5", "6"], 4), vec!["1", "2", "3", "4"]);
    }

    #[test]
    fn test_fields_are_trimmed() {
        assert_eq!(normalize_record(["  01 ", "\tX\t"], 2), vec!["01", "X"]);
    }

    #[test]
    fn test_latin1_is_decoded() {
        let mut decoded = String::new();
        Latin1Reader::new(&b"Jo\xe3o Concei\xe7\xe3o"[..]).read_to_string(&mut decoded).unwrap();
        assert_eq!(decoded, "João Conceição");
    }

    #[test]
    fn test_read_rows_parses_release_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("F.K03200$Z.D50809.QUALSCSV");
        std::fs::write(&path, b"\"00\";\"N\xe3o informada\"\r\n\"05\";\"Administrador\";\"extra\"\n\"10\"\nab\"c;d\n").unwrap();

        let batches = collect_rows(&path, 2);

        assert_eq!(batches.len(), 1);
        let rows = batches.into_iter().next().unwrap().unwrap();
        assert_eq!(
            rows,
            vec![
                vec!["00".to_string(), "Não informada".to_string()],
                vec!["05".to_string(), "Administrador".to_string()],
                vec!["10".to_string(), String::new()],
                vec!["ab\"c".to_string(), "d".to_string()],
            ]
        );
    }

    fn split(text: &str) -> Vec<Vec<String>> {
        let mut records = LenientRecords::new(text.as_bytes());
        let mut fields = Vec::new();
        let mut out = Vec::new();
        while records.read_record(&mut fields).unwrap() {
            out.push(fields.clone());
        }
        out
    }

    #[test]
    fn test_bare_quotes_inside_quoted_field_are_kept() {
        let records = split("\"00000001\";\"EMPRESA \"X\" LTDA\";\"2062\"\n\"00000002\";\"de\"f\";\"g\"\n");

        assert_eq!(
            records,
            vec![
                vec!["00000001".to_string(), "EMPRESA \"X\" LTDA".to_string(), "2062".to_string()],
                vec!["00000002".to_string(), "de\"f".to_string(), "g".to_string()],
            ]
        );
    }

    #[test]
    fn test_doubled_quote_is_one_quote() {
        assert_eq!(split("\"a\"\"b\";\"\"\"\"\n"), vec![vec!["a\"b".to_string(), "\"".to_string()]]);
    }

    #[test]
    fn test_quoted_field_spans_lines() {
        assert_eq!(
            split("\"1\";\"RUA A\r\nSALA 2\";\"x\"\r\n\"2\";\"y\"\n"),
            vec![
                vec!["1".to_string(), "RUA A\nSALA 2".to_string(), "x".to_string()],
                vec!["2".to_string(), "y".to_string()],
            ]
        );
    }

    #[test]
    fn test_unterminated_quote_runs_to_end_of_input() {
        assert_eq!(split("\"1\";\"open"), vec![vec!["1".to_string(), "open".to_string()]]);
    }

    #[test]
    fn test_blank_lines_and_trailing_separator() {
        assert_eq!(
            split("\n\"1\";\r\n\n;x\n"),
            vec![vec!["1".to_string(), String::new()], vec![String::new(), "x".to_string()]]
        );
    }

    #[test]
    fn test_read_rows_keeps_quotes_in_company_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("K3241.K03200Y0.D50809.EMPRECSV");
        std::fs::write(&path, b"\"00000001\";\"EMPRESA \"X\" LTDA \";\"2062\"\n").unwrap();

        let rows = collect_rows(&path, 3).into_iter().next().unwrap().unwrap();

        assert_eq!(rows, vec![vec!["00000001".to_string(), "EMPRESA \"X\" LTDA".to_string(), "2062".to_string()]]);
    }

    #[test]
    fn test_read_rows_batches() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.csv");
        let body: String = (0..2500).map(|i| format!("\"{}\";\"x\"\n", i)).collect();
        std::fs::write(&path, body).unwrap();

        let sizes: Vec<usize> = collect_rows(&path, 2).into_iter().map(|b| b.unwrap().len()).collect();

        assert_eq!(sizes, vec![1024, 1024, 452]);
    }

    #[test]
    fn test_sql_builders() {
        let quals = find("quals").unwrap();
        assert_eq!(drop_table_sql(quals), r#"DROP TABLE IF EXISTS "quals""#);
        assert_eq!(create_table_sql(quals), r#"CREATE TABLE IF NOT EXISTS "quals" ("codigo" TEXT, "descricao" TEXT)"#);
        assert_eq!(copy_sql(quals), r#"COPY "quals" ("codigo", "descricao") FROM STDIN WITH (FORMAT csv)"#);
        assert_eq!(
            index_sql(find("simples").unwrap()),
            r#"CREATE INDEX IF NOT EXISTS "simples_cnpj" ON "simples" ("cnpj_basico")"#
        );
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_encode_batch_keeps_empty_strings() {
        let batch = vec![vec!["1".to_string(), String::new(), "say \"hi\"".to_string()]];
        let bytes = encode_batch(&batch).unwrap();
        assert_eq!(String::from_utf8(bytes).unwrap(), "\"1\",\"\",\"say \"\"hi\"\"\"\n");
    }

    #[tokio::test]
    async fn test_load_file_into_sink() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("F.K03200$W.SIMPLES.CSV.D50809");
        std::fs::write(&path, b"\"00000000\";\"S\";\"20070701\"\n\"11111111\";\"N\"\n").unwrap();
        let sink = Arc::new(MemorySink::default());
        let loader = BulkLoader::new(sink.clone());
        let simples = find("simples").unwrap();

        loader.ensure_table(simples).await.unwrap();
        let result = loader.load_file(simples, path.clone()).await.unwrap();

        assert_eq!(result, LoadResult { dataset: "simples", file: path, rows: 2 });
        let rows = sink.rows_of("simples");
        assert_eq!(rows[1], vec!["11111111", "N", "", "", "", "", ""]);
        assert_eq!(*sink.recreated.lock().unwrap(), vec!["simples"]);
    }

    #[tokio::test]
    async fn test_missing_file_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let loader = BulkLoader::new(Arc::new(MemorySink::default()));

        let err = loader.load_file(find("moti").unwrap(), dir.path().join("GONE.MOTICSV")).await.unwrap_err();

        assert!(matches!(err, Error::Load { ref file, .. } if file.ends_with("GONE.MOTICSV")));
    }
}
