pub mod csv_export;
pub mod postgres;
pub mod sheets_api;

#[cfg(test)]
pub(crate) mod test_support;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::SourceConfig;
use crate::models::Record;

pub use csv_export::CsvExportSource;
pub use postgres::PostgresSource;
pub use sheets_api::SheetsApiSource;

/// Read access to the certificate dataset.
#[async_trait]
pub trait DataSource: Send + Sync + 'static {
    /// Short backend name used in logs and health output.
    fn kind(&self) -> &'static str;

    /// Every valid record in the dataset.
    async fn fetch_all(&self) -> Result<Vec<Record>, DataSourceError>;

    /// Records whose name matches `query`. A blank query returns nothing
    /// without touching the backend.
    async fn search(&self, query: &str) -> Result<Vec<Record>, DataSourceError>;
}

/// A payload arrived but could not be understood.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("payload is not valid UTF-8")]
    Encoding(#[from] std::string::FromUtf8Error),
    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("payload has neither `values` nor `feed.entry` rows")]
    MissingRows,
    #[error("expected CSV but received an HTML page (is the sheet shared publicly?)")]
    HtmlInsteadOfCsv,
}

#[derive(Debug, Error)]
pub enum DataSourceError {
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} responded with status {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },
    #[error("failed to parse response from {origin}: {source}")]
    Parse {
        origin: String,
        #[source]
        source: ParseError,
    },
    #[error("database error: {0}")]
    Database(String),
    #[error("invalid data source configuration: {0}")]
    Config(String),
}

impl DataSourceError {
    pub(crate) fn parse(origin: impl Into<String>, source: ParseError) -> Self {
        DataSourceError::Parse {
            origin: origin.into(),
            source,
        }
    }

    /// Message fit for end users; the full error goes to the logs.
    pub fn user_message(&self) -> String {
        match self {
            DataSourceError::Http { .. } => {
                "Could not reach the certificate service. Please try again later.".to_string()
            }
            DataSourceError::Status { status, .. } => format!(
                "The certificate service answered with an error ({}). Please try again later.",
                status.as_u16()
            ),
            DataSourceError::Parse { .. } => {
                "The certificate data could not be read. Please try again later.".to_string()
            }
            DataSourceError::Database(_) => {
                "Failed to load certificate data. Please try again later.".to_string()
            }
            DataSourceError::Config(msg) => format!("Certificate lookup is misconfigured: {msg}"),
        }
    }
}

impl From<sqlx::Error> for DataSourceError {
    fn from(err: sqlx::Error) -> Self {
        DataSourceError::Database(err.to_string())
    }
}

/// Builds the backend described by `config`. Nothing is contacted yet: HTTP
/// clients connect per request and the Postgres pool connects lazily.
pub fn build_source(config: &SourceConfig) -> Result<Arc<dyn DataSource>, DataSourceError> {
    let source: Arc<dyn DataSource> = match config {
        SourceConfig::CsvExport {
            url,
            request_timeout,
        } => Arc::new(CsvExportSource::new(
            url.clone(),
            http_client(*request_timeout)?,
        )),
        SourceConfig::SheetsApi {
            url,
            api_key,
            skip_header,
            request_timeout,
        } => Arc::new(
            SheetsApiSource::new(
                url.clone(),
                api_key.clone(),
                http_client(*request_timeout)?,
            )
            .with_skip_header(*skip_header),
        ),
        SourceConfig::HostedTable {
            database_url,
            table,
            max_connections,
            unaccent,
        } => Arc::new(PostgresSource::connect_lazy(
            database_url,
            table.clone(),
            *max_connections,
            *unaccent,
        )?),
    };
    Ok(source)
}

pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client, DataSourceError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| DataSourceError::Config(format!("failed to build HTTP client: {e}")))
}

/// Issues a GET and returns the body of a 2xx response.
pub(crate) async fn get_body(
    request: reqwest::RequestBuilder,
    url: &str,
) -> Result<Vec<u8>, DataSourceError> {
    let response = request.send().await.map_err(|source| DataSourceError::Http {
        url: url.to_string(),
        source,
    })?;

    let status = response.status();
    if !status.is_success() {
        return Err(DataSourceError::Status {
            url: url.to_string(),
            status,
        });
    }

    let body = response
        .bytes()
        .await
        .map_err(|source| DataSourceError::Http {
            url: url.to_string(),
            source,
        })?;
    Ok(body.to_vec())
}
