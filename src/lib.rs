pub mod config;
pub mod decode;
pub mod error;
pub mod fetch;
pub mod ingest;
pub mod load;
pub mod query;

pub use config::{IngestConfig, LoadMode, PipelineConfig};
pub use error::{IngestError, Result};
pub use ingest::{IngestReport, Ingestor};
pub use load::{Destination, DuckDestination, TableName};
