use std::time::Instant;

use async_trait::async_trait;
use tracing::{error, info};

use crate::csv::parse_csv;
use crate::mapper::map_row;
use crate::matcher::filter_matching;
use crate::models::{RawRow, Record};
use crate::source::{DataSource, DataSourceError, ParseError, get_body};

/// Downloads a spreadsheet's CSV export and maps every data row.
///
/// The export endpoint cannot filter, so `search` downloads the whole sheet
/// and matches locally.
#[derive(Clone)]
pub struct CsvExportSource {
    url: String,
    client: reqwest::Client,
}

impl CsvExportSource {
    pub fn new(url: String, client: reqwest::Client) -> Self {
        Self { url, client }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn fetch_records(&self) -> Result<Vec<Record>, DataSourceError> {
        let body = get_body(self.client.get(&self.url), &self.url).await?;
        parse_export(body).map_err(|err| DataSourceError::parse(&self.url, err))
    }
}

/// Turns an export payload into records, skipping the header row and any
/// row the mapper rejects.
pub fn parse_export(body: Vec<u8>) -> Result<Vec<Record>, ParseError> {
    let text = String::from_utf8(body)?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(&text);

    let head: String = text
        .trim_start()
        .chars()
        .take(15)
        .collect::<String>()
        .to_ascii_lowercase();
    if head.starts_with("<!doctype html") || head.starts_with("<html") {
        return Err(ParseError::HtmlInsteadOfCsv);
    }

    Ok(parse_csv(text)
        .into_iter()
        .skip(1)
        .filter_map(|cells| map_row(RawRow::Csv(cells)))
        .collect())
}

#[async_trait]
impl DataSource for CsvExportSource {
    fn kind(&self) -> &'static str {
        "csv_export"
    }

    async fn fetch_all(&self) -> Result<Vec<Record>, DataSourceError> {
        let start = Instant::now();
        info!(
            stage = "source",
            event = "source.fetch.begin",
            source = self.kind(),
            url = %self.url,
            "fetching CSV export"
        );

        match self.fetch_records().await {
            Ok(records) => {
                info!(
                    stage = "source",
                    event = "source.fetch.end",
                    source = self.kind(),
                    result = "ok",
                    record_count = records.len(),
                    duration_ms = start.elapsed().as_millis(),
                    "CSV export loaded"
                );
                Ok(records)
            }
            Err(err) => {
                error!(
                    stage = "source",
                    event = "source.fetch.end",
                    source = self.kind(),
                    result = "fail",
                    duration_ms = start.elapsed().as_millis(),
                    error = %err,
                    "CSV export fetch failed"
                );
                Err(err)
            }
        }
    }

    async fn search(&self, query: &str) -> Result<Vec<Record>, DataSourceError> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let records = self.fetch_all().await?;
        let total = records.len();
        let hits = filter_matching(records, query);
        info!(
            stage = "search",
            event = "search.local_filter",
            source = self.kind(),
            scanned = total,
            matched = hits.len(),
            "filtered CSV export"
        );
        Ok(hits)
    }
}
