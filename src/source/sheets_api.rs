use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{error, info};

use crate::mapper::map_row;
use crate::matcher::filter_matching;
use crate::models::{RawRow, Record};
use crate::source::{DataSource, DataSourceError, ParseError, get_body};

/// Reads a row range from a spreadsheet values API.
///
/// Keyed requests answer with `{ "values": [[..]] }`, public feeds with
/// `{ "feed": { "entry": [..] } }`; both are accepted. Filtering happens
/// locally after the full range is downloaded.
#[derive(Clone)]
pub struct SheetsApiSource {
    url: String,
    api_key: Option<String>,
    skip_header: bool,
    client: reqwest::Client,
}

impl SheetsApiSource {
    pub fn new(url: String, api_key: Option<String>, client: reqwest::Client) -> Self {
        Self {
            url,
            api_key,
            skip_header: true,
            client,
        }
    }

    /// Whether the first row of a `values` range is a header. Defaults to true.
    pub fn with_skip_header(mut self, skip_header: bool) -> Self {
        self.skip_header = skip_header;
        self
    }

    async fn fetch_records(&self) -> Result<Vec<Record>, DataSourceError> {
        let mut request = self.client.get(&self.url);
        if let Some(key) = &self.api_key {
            request = request.query(&[("key", key.as_str())]);
        }

        let body = get_body(request, &self.url).await?;
        let rows = parse_rows(&body, self.skip_header)
            .map_err(|err| DataSourceError::parse(&self.url, err))?;

        Ok(rows
            .into_iter()
            .filter_map(|cells| map_row(RawRow::Api(cells)))
            .collect())
    }
}

/// Extracts positional rows from either response shape.
///
/// A values response without a `values` field (an empty range) or a feed
/// without entries yields no rows. Rows that are not arrays are skipped.
pub fn parse_rows(body: &[u8], skip_header: bool) -> Result<Vec<Vec<String>>, ParseError> {
    let payload: Value = serde_json::from_slice(body)?;

    let (rows, header) = if let Some(values) = payload.get("values") {
        (values.as_array().ok_or(ParseError::MissingRows)?, skip_header)
    } else if let Some(feed) = payload.get("feed") {
        match feed.get("entry") {
            Some(entry) => (entry.as_array().ok_or(ParseError::MissingRows)?, false),
            None if feed.is_object() => return Ok(Vec::new()),
            None => return Err(ParseError::MissingRows),
        }
    } else if payload.get("range").is_some() {
        return Ok(Vec::new());
    } else {
        return Err(ParseError::MissingRows);
    };

    Ok(rows
        .iter()
        .skip(usize::from(header))
        .filter_map(|row| row.as_array())
        .map(|cells| cells.iter().map(cell_text).collect())
        .collect())
}

fn cell_text(cell: &Value) -> String {
    match cell {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        // Feed cells wrap their text as `{"$t": ..}`, chart-style cells as `{"v": ..}`.
        Value::Object(map) => map
            .get("$t")
            .or_else(|| map.get("v"))
            .map(cell_text)
            .unwrap_or_default(),
        Value::Array(_) => String::new(),
    }
}

#[async_trait]
impl DataSource for SheetsApiSource {
    fn kind(&self) -> &'static str {
        "sheets_api"
    }

    async fn fetch_all(&self) -> Result<Vec<Record>, DataSourceError> {
        let start = Instant::now();
        info!(
            stage = "source",
            event = "source.fetch.begin",
            source = self.kind(),
            url = %self.url,
            keyed = self.api_key.is_some(),
            "fetching spreadsheet range"
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
                    "spreadsheet range loaded"
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
                    "spreadsheet range fetch failed"
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
            "filtered spreadsheet range"
        );
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::http_client;
    use crate::source::test_support::FixtureServer;
    use axum::http::StatusCode;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    const VALUES: &str = r#"{
        "range": "Planilha1!A1:E4",
        "majorDimension": "ROWS",
        "values": [
            ["Nome", "Local", "Data", "Certificado", "Download"],
            ["Ana Paula Rodrigues", "SP", "2024-01-15", "https://drive.google.com/file/d/AAA/view"],
            ["", "RJ", "2024-01-15"],
            ["Bruno Conceição", "BH", "2024-05-02", "", ""]
        ]
    }"#;

    const FEED: &str = r#"{
        "feed": {
            "entry": [
                ["Ana Paula Rodrigues", "SP", "2024-01-15"],
                [{"$t": "Bruno Conceição"}, {"$t": "BH"}, {"$t": "02/05/2024"}],
                {"not": "a row"}
            ]
        }
    }"#;

    fn source(url: String, api_key: Option<&str>) -> SheetsApiSource {
        SheetsApiSource::new(
            url,
            api_key.map(str::to_string),
            http_client(Duration::from_secs(5)).expect("client"),
        )
    }

    #[test]
    fn reads_values_shape_and_skips_header() {
        let rows = parse_rows(VALUES.as_bytes(), true).expect("parse");
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0][0], "Ana Paula Rodrigues");

        let rows = parse_rows(VALUES.as_bytes(), false).expect("parse");
        assert_eq!(rows.len(), 4);
    }

    #[test]
    fn reads_feed_shape() {
        let rows = parse_rows(FEED.as_bytes(), true).expect("parse");
        assert_eq!(
            rows,
            vec![
                vec!["Ana Paula Rodrigues", "SP", "2024-01-15"],
                vec!["Bruno Conceição", "BH", "02/05/2024"],
            ]
        );
    }

    #[test]
    fn scalar_cells_become_text() {
        let rows = parse_rows(br#"{"values": [[1, true, null, 2.5]]}"#, false).expect("parse");
        assert_eq!(rows, vec![vec!["1", "true", "", "2.5"]]);
    }

    #[test]
    fn empty_ranges_are_not_errors() {
        assert!(parse_rows(br#"{"range": "A1:E1", "majorDimension": "ROWS"}"#, true)
            .expect("parse")
            .is_empty());
        assert!(parse_rows(br#"{"feed": {}}"#, true).expect("parse").is_empty());
        assert!(parse_rows(br#"{"values": []}"#, true).expect("parse").is_empty());
    }

    #[test]
    fn unexpected_shapes_are_parse_errors() {
        assert!(matches!(
            parse_rows(br#"{"error": {"code": 403}}"#, true),
            Err(ParseError::MissingRows)
        ));
        assert!(matches!(
            parse_rows(br#"{"values": "nope"}"#, true),
            Err(ParseError::MissingRows)
        ));
        assert!(matches!(
            parse_rows(b"not json", true),
            Err(ParseError::Json(_))
        ));
    }

    #[tokio::test]
    async fn keyed_request_and_local_filtering() {
        let server = FixtureServer::start(StatusCode::OK, VALUES).await;
        let source = source(server.url.clone(), Some("secret"));

        let all = source.fetch_all().await.expect("fetch");
        assert_eq!(all.len(), 2);
        assert_eq!(server.last_query().as_deref(), Some("key=secret"));

        let hits = source.search("conceicao").await.expect("search");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name(), "Bruno Conceição");
        assert_eq!(hits[0].completion_date(), "02/05/2024");
    }

    #[tokio::test]
    async fn public_feed_without_key() {
        let server = FixtureServer::start(StatusCode::OK, FEED).await;
        let source = source(server.url.clone(), None);

        let hits = source.search("ana").await.expect("search");
        assert_eq!(hits.len(), 1);
        assert_eq!(server.last_query(), None);
    }

    #[tokio::test]
    async fn malformed_payload_is_a_data_source_error() {
        let server = FixtureServer::start(StatusCode::OK, "<html></html>").await;
        let err = source(server.url.clone(), None)
            .fetch_all()
            .await
            .expect_err("should fail");
        assert!(matches!(
            err,
            DataSourceError::Parse {
                source: ParseError::Json(_),
                ..
            }
        ));
    }
}
