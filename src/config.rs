use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::decode::SourceFormat;
use crate::error::ConfigError;
use crate::fetch::series::{Service, TripSeries};

pub const DEFAULT_BATCH_SIZE: usize = 100_000;
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;
pub const CONFIG_ENV_VAR: &str = "TAXI_INGEST_CONFIG";

/// How the destination table is treated at the start of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum LoadMode {
    /// Recreate the table from the first batch's schema, then append every batch.
    #[default]
    ReplaceThenAppend,
    /// Append to an existing table whose schema must match.
    AppendOnly,
}

impl std::fmt::Display for LoadMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadMode::ReplaceThenAppend => f.write_str("replace_then_append"),
            LoadMode::AppendOnly => f.write_str("append_only"),
        }
    }
}

/// Options for one ingestion run: one source, one destination table.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IngestConfig {
    pub source_url: String,
    pub table_name: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub mode: LoadMode,
    /// Skip content sniffing and decode as this format.
    #[serde(default)]
    pub format: Option<SourceFormat>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Directory for the downloaded temporary file; OS temp dir when unset.
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,
    /// Rows sampled for CSV type inference; the whole file when unset.
    #[serde(default)]
    pub infer_schema_rows: Option<usize>,
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl IngestConfig {
    pub fn new(source_url: impl Into<String>, table_name: impl Into<String>) -> Self {
        Self {
            source_url: source_url.into(),
            table_name: table_name.into(),
            batch_size: DEFAULT_BATCH_SIZE,
            mode: LoadMode::default(),
            format: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            temp_dir: None,
            infer_schema_rows: None,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_mode(mut self, mode: LoadMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_format(mut self, format: Option<SourceFormat>) -> Self {
        self.format = format;
        self
    }

    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source_url.trim().is_empty() {
            return Err(invalid("source_url cannot be empty"));
        }
        if self.table_name.trim().is_empty() {
            return Err(invalid("table_name cannot be empty"));
        }
        if self.batch_size == 0 {
            return Err(invalid("batch_size must be greater than zero"));
        }
        if self.timeout_secs == 0 {
            return Err(invalid("timeout_secs must be greater than zero"));
        }
        if self.infer_schema_rows == Some(0) {
            return Err(invalid("infer_schema_rows must be greater than zero when set"));
        }
        Ok(())
    }
}

/// A monthly trip series loaded into a single table.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SeriesConfig {
    pub service: Service,
    pub years: Vec<i32>,
    #[serde(default)]
    pub months: Option<Vec<u32>>,
    #[serde(default)]
    pub base_url: Option<String>,
    pub table_name: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub mode: LoadMode,
    #[serde(default)]
    pub format: Option<SourceFormat>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,
    #[serde(default)]
    pub infer_schema_rows: Option<usize>,
}

impl SeriesConfig {
    pub fn new(service: Service, years: Vec<i32>, table_name: impl Into<String>) -> Self {
        Self {
            service,
            years,
            months: None,
            base_url: None,
            table_name: table_name.into(),
            batch_size: DEFAULT_BATCH_SIZE,
            mode: LoadMode::default(),
            format: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            temp_dir: None,
            infer_schema_rows: None,
        }
    }

    pub fn series(&self) -> TripSeries {
        let mut series = TripSeries::new(self.service, self.years.clone());
        if let Some(months) = &self.months {
            series = series.with_months(months.clone());
        }
        if let Some(base) = &self.base_url {
            series = series.with_base_url(base.clone());
        }
        series
    }

    /// Run options shared by every month; `source_url` is the first month.
    pub fn ingest_config(&self) -> IngestConfig {
        let first = self.series().urls().into_iter().next().unwrap_or_default();
        IngestConfig {
            source_url: first,
            table_name: self.table_name.clone(),
            batch_size: self.batch_size,
            mode: self.mode,
            format: self.format,
            timeout_secs: self.timeout_secs,
            temp_dir: self.temp_dir.clone(),
            infer_schema_rows: self.infer_schema_rows,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.years.is_empty() {
            return Err(invalid("series must name at least one year"));
        }
        if let Some(months) = &self.months {
            if months.is_empty() {
                return Err(invalid("series months cannot be an empty list"));
            }
            if let Some(bad) = months.iter().find(|m| !(1..=12).contains(*m)) {
                return Err(invalid(&format!("series month {} is out of range", bad)));
            }
        }
        if self.table_name.trim().is_empty() {
            return Err(invalid("series table_name cannot be empty"));
        }
        self.ingest_config().validate()
    }
}

/// Top-level file: the database plus the runs to perform, in order.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default)]
    pub jobs: Vec<IngestConfig>,
    #[serde(default)]
    pub series: Vec<SeriesConfig>,
}

fn default_database() -> String {
    ":memory:".to_string()
}

impl PipelineConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content, &path.display().to_string())
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let content = std::env::var(CONFIG_ENV_VAR).map_err(|_| ConfigError::MissingEnv {
            var: CONFIG_ENV_VAR.to_string(),
        })?;
        Self::from_yaml(&content, CONFIG_ENV_VAR)
    }

    pub fn from_yaml(content: &str, origin: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content).map_err(|source| ConfigError::Parse {
            origin: origin.to_string(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jobs.is_empty() && self.series.is_empty() {
            return Err(invalid("at least one job or series must be configured"));
        }
        for job in &self.jobs {
            job.validate()?;
        }
        for series in &self.series {
            series.validate()?;
        }
        Ok(())
    }
}

fn invalid(reason: &str) -> ConfigError {
    ConfigError::Invalid {
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
database: taxi_rides_ny.duckdb
jobs:
  - source_url: https://d37ci6vzurychx.cloudfront.net/trip-data/green_tripdata_2025-11.parquet
    table_name: green_taxi_trips
  - source_url: https://github.com/DataTalksClub/nyc-tlc-data/releases/download/misc/taxi_zone_lookup.csv
    table_name: zones
    batch_size: 500
    mode: append_only
    format: csv
    timeout_secs: 30
series:
  - service: green
    years: [2019, 2020]
    months: [1, 2]
    table_name: prod.green_tripdata
"#;

    #[test]
    fn parses_yaml_with_defaults() {
        let config = PipelineConfig::from_yaml(SAMPLE, "test").unwrap();
        assert_eq!(config.database, "taxi_rides_ny.duckdb");
        assert_eq!(config.jobs.len(), 2);

        let green = &config.jobs[0];
        assert_eq!(green.batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(green.mode, LoadMode::ReplaceThenAppend);
        assert_eq!(green.timeout_secs, DEFAULT_TIMEOUT_SECS);
        assert!(green.format.is_none());
        assert!(green.infer_schema_rows.is_none());

        let zones = &config.jobs[1];
        assert_eq!(zones.batch_size, 500);
        assert_eq!(zones.mode, LoadMode::AppendOnly);
        assert_eq!(zones.format, Some(SourceFormat::Csv));
        assert_eq!(zones.timeout_secs, 30);

        assert_eq!(config.series[0].service, Service::Green);
        assert_eq!(config.series[0].series().urls().len(), 4);
        config.validate().unwrap();
    }

    #[test]
    fn database_defaults_to_memory() {
        let config = PipelineConfig::from_yaml(
            "jobs:\n  - source_url: http://x/a.csv\n    table_name: a\n",
            "test",
        )
        .unwrap();
        assert_eq!(config.database, ":memory:");
    }

    #[test]
    fn rejects_unknown_mode() {
        let err = PipelineConfig::from_yaml(
            "jobs:\n  - source_url: http://x/a.csv\n    table_name: a\n    mode: upsert\n",
            "test",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn validation_catches_bad_values() {
        assert!(IngestConfig::new("", "t").validate().is_err());
        assert!(IngestConfig::new("http://x/a.csv", " ").validate().is_err());
        assert!(IngestConfig::new("http://x/a.csv", "t")
            .with_batch_size(0)
            .validate()
            .is_err());
        assert!(IngestConfig::new("http://x/a.csv", "t").validate().is_ok());

        let empty = PipelineConfig {
            database: default_database(),
            jobs: vec![],
            series: vec![],
        };
        assert!(empty.validate().is_err());
    }

    #[test]
    fn series_rejects_out_of_range_month() {
        let mut series = SeriesConfig::new(Service::Yellow, vec![2019], "yellow");
        series.months = Some(vec![0, 13]);
        assert!(series.validate().is_err());

        let mut series = SeriesConfig::new(Service::Yellow, vec![2019], "yellow");
        series.timeout_secs = 0;
        assert!(series.validate().is_err());
    }

    #[test]
    fn series_run_options_reach_the_ingest_config() {
        let yaml = "series:\n  - service: fhv\n    years: [2019]\n    months: [1]\n    \
                    table_name: prod.fhv_tripdata\n    format: csv_gzip\n    timeout_secs: 600\n    \
                    temp_dir: /data/scratch\n    infer_schema_rows: 5000\n";
        let config = PipelineConfig::from_yaml(yaml, "test").unwrap();
        config.validate().unwrap();

        let job = config.series[0].ingest_config();
        assert!(job.source_url.ends_with("/fhv/fhv_tripdata_2019-01.csv.gz"));
        assert_eq!(job.table_name, "prod.fhv_tripdata");
        assert_eq!(job.format, Some(SourceFormat::CsvGzip));
        assert_eq!(job.timeout_secs, 600);
        assert_eq!(job.temp_dir, Some(PathBuf::from("/data/scratch")));
        assert_eq!(job.infer_schema_rows, Some(5000));

        let defaults = SeriesConfig::new(Service::Green, vec![2020], "green").ingest_config();
        assert_eq!(defaults.timeout_secs, DEFAULT_TIMEOUT_SECS);
        assert!(defaults.temp_dir.is_none());
    }

    #[test]
    fn missing_file_is_read_error() {
        let err = PipelineConfig::from_file("/definitely/not/here.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
