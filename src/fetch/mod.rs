use std::path::{Path, PathBuf};
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::Client;
use tempfile::{NamedTempFile, TempPath};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, instrument};
use url::Url;

use crate::error::TransferError;

pub mod series;

/// Write buffer between the response stream and the temporary file.
pub const CHUNK_SIZE: usize = 1024 * 1024;

const PROGRESS_STEP: u64 = 10 * 1024 * 1024;

#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    pub temp_dir: Option<PathBuf>,
}

/// A downloaded dataset held in a temporary file. The file is removed when
/// this handle is dropped.
#[derive(Debug)]
pub struct LocalResource {
    path: TempPath,
    origin: String,
    bytes: u64,
}

impl LocalResource {
    /// Wrap an already written temporary file, e.g. a dataset produced locally.
    pub fn from_temp_file(file: NamedTempFile, origin: impl Into<String>) -> std::io::Result<Self> {
        let bytes = file.as_file().metadata()?.len();
        Ok(Self {
            path: file.into_temp_path(),
            origin: origin.into(),
            bytes,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The URL this resource was downloaded from.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }
}

/// Build the HTTP client used for every fetch of a run.
pub fn build_client(timeout: Duration) -> reqwest::Result<Client> {
    Client::builder().timeout(timeout).build()
}

/// Stream `url` into a temporary file.
///
/// The body is written through a `CHUNK_SIZE` buffer as it arrives, so memory
/// use does not grow with the payload. Any failure drops the partially
/// written file.
#[instrument(level = "info", skip(client, options), fields(url = %url))]
pub async fn fetch(
    client: &Client,
    url: &str,
    options: &FetchOptions,
) -> Result<LocalResource, TransferError> {
    let parsed = Url::parse(url).map_err(|source| TransferError::InvalidUrl {
        url: url.to_string(),
        source,
    })?;

    let response = client
        .get(parsed.clone())
        .send()
        .await
        .map_err(|e| TransferError::from_reqwest(url, e))?
        .error_for_status()
        .map_err(|e| TransferError::from_reqwest(url, e))?;

    let io_err = |source: std::io::Error| TransferError::Io {
        url: url.to_string(),
        source,
    };

    let suffix = file_suffix(&parsed);
    let mut builder = tempfile::Builder::new();
    builder.prefix("taxi-ingest-").suffix(&suffix);
    let tmp = match &options.temp_dir {
        Some(dir) => builder.tempfile_in(dir),
        None => builder.tempfile(),
    }
    .map_err(io_err)?;
    let (file, path) = tmp.into_parts();
    debug!(path = %path.display(), "created temporary file");

    let mut writer = BufWriter::with_capacity(CHUNK_SIZE, tokio::fs::File::from_std(file));
    let mut stream = response.bytes_stream();
    let mut total = 0u64;
    let mut next_report = PROGRESS_STEP;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| TransferError::from_reqwest(url, e))?;
        writer.write_all(&chunk).await.map_err(io_err)?;
        total += chunk.len() as u64;

        if total >= next_report {
            debug!("downloaded {} MB", total / (1024 * 1024));
            next_report += PROGRESS_STEP;
        }
    }

    writer.flush().await.map_err(io_err)?;
    writer.into_inner().sync_all().await.map_err(io_err)?;

    info!(bytes = total, "download complete");
    Ok(LocalResource {
        path,
        origin: url.to_string(),
        bytes: total,
    })
}

/// Suffix of the URL's file name starting at its first dot, so
/// `green_tripdata_2019-01.csv.gz` keeps `.csv.gz`.
fn file_suffix(url: &Url) -> String {
    let name = url
        .path_segments()
        .and_then(|segments| segments.last())
        .unwrap_or("");
    match name.find('.') {
        Some(idx)
            if name.len() - idx <= 16
                && name[idx..]
                    .chars()
                    .all(|c| c == '.' || c.is_ascii_alphanumeric()) =>
        {
            name[idx..].to_string()
        }
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn entries(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    #[test]
    fn suffix_from_url() {
        let url = Url::parse("https://host/green/green_tripdata_2019-01.csv.gz").unwrap();
        assert_eq!(file_suffix(&url), ".csv.gz");
        let url = Url::parse("https://host/trip-data/green_tripdata_2025-11.parquet").unwrap();
        assert_eq!(file_suffix(&url), ".parquet");
        let url = Url::parse("https://host/download").unwrap();
        assert_eq!(file_suffix(&url), "");
        let url = Url::parse("https://host/a.b c?x").unwrap();
        assert_eq!(file_suffix(&url), "");
    }

    #[tokio::test]
    async fn streams_body_into_temp_file() {
        let server = MockServer::start().await;
        let body: Vec<u8> = (0..(3 * CHUNK_SIZE + 17)).map(|i| (i % 251) as u8).collect();
        Mock::given(method("GET"))
            .and(path("/trip-data/green_tripdata_2025-11.parquet"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let options = FetchOptions {
            temp_dir: Some(dir.path().to_path_buf()),
        };
        let url = format!("{}/trip-data/green_tripdata_2025-11.parquet", server.uri());
        let resource = fetch(&Client::new(), &url, &options).await.unwrap();

        assert_eq!(resource.bytes(), body.len() as u64);
        assert_eq!(resource.origin(), url);
        assert!(resource.path().starts_with(dir.path()));
        assert!(resource.path().to_string_lossy().ends_with(".parquet"));
        assert_eq!(std::fs::read(resource.path()).unwrap(), body);

        let local = resource.path().to_path_buf();
        drop(resource);
        assert!(!local.exists());
        assert_eq!(entries(dir.path()), 0);
    }

    #[tokio::test]
    async fn not_found_leaves_no_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let options = FetchOptions {
            temp_dir: Some(dir.path().to_path_buf()),
        };
        let url = format!("{}/missing.csv", server.uri());
        let err = fetch(&Client::new(), &url, &options).await.unwrap_err();

        match err {
            TransferError::Status { status, url: failed } => {
                assert_eq!(status, reqwest::StatusCode::NOT_FOUND);
                assert_eq!(failed, url);
            }
            other => panic!("expected status error, got {other:?}"),
        }
        assert_eq!(entries(dir.path()), 0);
    }

    #[tokio::test]
    async fn slow_server_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("a,b\n1,2\n")
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let options = FetchOptions {
            temp_dir: Some(dir.path().to_path_buf()),
        };
        let client = build_client(Duration::from_millis(200)).unwrap();
        let err = fetch(&client, &format!("{}/slow.csv", server.uri()), &options)
            .await
            .unwrap_err();

        assert!(matches!(err, TransferError::Timeout { .. }), "{err:?}");
        assert_eq!(entries(dir.path()), 0);
    }

    #[tokio::test]
    async fn invalid_url_is_rejected() {
        let err = fetch(&Client::new(), "not a url", &FetchOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::InvalidUrl { .. }));
    }

    #[test]
    fn wraps_local_temp_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"LocationID,Zone\n1,EWR\n").unwrap();
        let resource = LocalResource::from_temp_file(file, "file://zones.csv").unwrap();
        assert_eq!(resource.bytes(), 22);
        assert_eq!(resource.origin(), "file://zones.csv");
    }
}
