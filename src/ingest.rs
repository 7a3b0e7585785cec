use std::time::Duration;

use reqwest::Client;
use tracing::{info, instrument};

use crate::config::{IngestConfig, LoadMode};
use crate::decode::{decode, DecodeOptions};
use crate::error::{Result, TransferError};
use crate::fetch::{build_client, fetch, FetchOptions};
use crate::load::{Destination, Loader, TableName};

/// Outcome of ingesting one source URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub url: String,
    pub table: String,
    pub rows: u64,
    pub batches: usize,
    /// Size of the downloaded file.
    pub bytes: u64,
}

/// Runs fetch, decode and load for one configured table.
///
/// The ingestor owns the destination for the lifetime of the run; take it
/// back with [`Ingestor::into_destination`] to query the loaded data.
pub struct Ingestor<D: Destination> {
    config: IngestConfig,
    table: TableName,
    client: Client,
    destination: D,
}

impl<D: Destination> Ingestor<D> {
    pub fn new(config: IngestConfig, destination: D) -> Result<Self> {
        config.validate()?;
        let table = TableName::parse(&config.table_name)?;
        let client = build_client(Duration::from_secs(config.timeout_secs)).map_err(|source| {
            TransferError::Network {
                url: config.source_url.clone(),
                source,
            }
        })?;
        Ok(Self {
            config,
            table,
            client,
            destination,
        })
    }

    pub fn destination(&self) -> &D {
        &self.destination
    }

    pub fn into_destination(self) -> D {
        self.destination
    }

    /// Ingest the configured source URL with the configured mode.
    pub async fn ingest(&mut self) -> Result<IngestReport> {
        let url = self.config.source_url.clone();
        self.ingest_url(&url, self.config.mode).await
    }

    /// Ingest `urls` into the configured table in order. The first URL uses
    /// the configured mode and every later one appends. Stops at the first
    /// failure; tables already written stay as they are.
    pub async fn ingest_all(&mut self, urls: &[String]) -> Result<Vec<IngestReport>> {
        let mut reports = Vec::with_capacity(urls.len());
        for (i, url) in urls.iter().enumerate() {
            let mode = if i == 0 {
                self.config.mode
            } else {
                LoadMode::AppendOnly
            };
            reports.push(self.ingest_url(url, mode).await?);
        }
        let rows: u64 = reports.iter().map(|r| r.rows).sum();
        info!(table = %self.table, sources = reports.len(), rows, "series ingested");
        Ok(reports)
    }

    #[instrument(level = "info", skip(self), fields(table = %self.table))]
    pub async fn ingest_url(&mut self, url: &str, mode: LoadMode) -> Result<IngestReport> {
        let fetch_options = FetchOptions {
            temp_dir: self.config.temp_dir.clone(),
        };
        let resource = fetch(&self.client, url, &fetch_options).await?;

        let decode_options = DecodeOptions {
            batch_size: self.config.batch_size,
            format: self.config.format,
            infer_schema_rows: self.config.infer_schema_rows,
        };
        let batches = decode(&resource, &decode_options)?;
        let schema = batches.schema();

        let mut loader = Loader::new(&mut self.destination, self.table.clone(), mode);
        for batch in batches {
            loader.push(batch?)?;
        }
        let summary = loader.finish(Some(schema.as_ref()))?;

        info!(
            rows = summary.rows,
            batches = summary.batches,
            bytes = resource.bytes(),
            "ingested"
        );
        Ok(IngestReport {
            url: url.to_string(),
            table: summary.table,
            rows: summary.rows,
            batches: summary.batches,
            bytes: resource.bytes(),
        })
    }
}
