use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use humantime::parse_duration;
use serde::Deserialize;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);
pub const MAX_DEBOUNCE: Duration = Duration::from_secs(5);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const MAX_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_TABLE: &str = "certificado_digital";
pub const DEFAULT_SHEETS_API_BASE: &str = "https://sheets.googleapis.com/v4/spreadsheets";
pub const SHEETS_API_KEY_ENV: &str = "CERTLOOKUP_SHEETS_API_KEY";
pub const DATABASE_URL_ENV: &str = "DATABASE_URL";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub search: SearchConfig,
    pub source: SourceConfig,
}

#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub debounce: Duration,
}

/// The one backend a deployment reads from.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceConfig {
    CsvExport {
        url: String,
        request_timeout: Duration,
    },
    SheetsApi {
        url: String,
        api_key: Option<String>,
        skip_header: bool,
        request_timeout: Duration,
    },
    HostedTable {
        database_url: String,
        table: String,
        max_connections: u32,
        unaccent: bool,
    },
}

impl SourceConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            SourceConfig::CsvExport { .. } => "csv_export",
            SourceConfig::SheetsApi { .. } => "sheets_api",
            SourceConfig::HostedTable { .. } => "hosted_table",
        }
    }
}

#[derive(Debug, Deserialize)]
struct FileConfig {
    #[serde(default)]
    search: RawSearchConfig,
    #[serde(default)]
    http: RawHttpConfig,
    source: RawSourceConfig,
}

#[derive(Debug, Default, Deserialize)]
struct RawSearchConfig {
    debounce: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawHttpConfig {
    request_timeout: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum RawSourceConfig {
    CsvExport {
        url: Option<String>,
        sheet_id: Option<String>,
        gid: Option<String>,
    },
    SheetsApi {
        url: Option<String>,
        sheet_id: Option<String>,
        range: Option<String>,
        api_key: Option<String>,
        skip_header: Option<bool>,
    },
    HostedTable {
        database_url: Option<String>,
        table: Option<String>,
        max_connections: Option<u32>,
        unaccent: Option<bool>,
    },
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_toml(&raw).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let parsed: FileConfig = toml::from_str(raw).context("failed to parse TOML")?;
        Self::from_raw(parsed, |name| std::env::var(name).ok())
    }

    fn from_raw(raw: FileConfig, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let debounce = match raw.search.debounce.as_deref() {
            Some(value) => parse_bounded_duration(value, "search.debounce", MAX_DEBOUNCE)?,
            None => DEFAULT_DEBOUNCE,
        };
        let request_timeout = match raw.http.request_timeout.as_deref() {
            Some(value) => {
                parse_bounded_duration(value, "http.request_timeout", MAX_REQUEST_TIMEOUT)?
            }
            None => DEFAULT_REQUEST_TIMEOUT,
        };

        let source = build_source(raw.source, request_timeout, env)?;
        let cfg = Self {
            search: SearchConfig { debounce },
            source,
        };
        cfg.validate_config()?;
        Ok(cfg)
    }

    pub fn validate_config(&self) -> Result<()> {
        match &self.source {
            SourceConfig::CsvExport { url, .. } | SourceConfig::SheetsApi { url, .. } => {
                if url.trim().is_empty() {
                    bail!("source.url must not be empty");
                }
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    bail!("source.url must be an http(s) URL, got '{url}'");
                }
            }
            SourceConfig::HostedTable {
                database_url,
                table,
                max_connections,
                ..
            } => {
                if database_url.trim().is_empty() {
                    bail!("source.database_url must not be empty");
                }
                if !is_table_identifier(table) {
                    bail!(
                        "source.table must be a plain identifier (optionally schema-qualified), got '{table}'"
                    );
                }
                if *max_connections == 0 {
                    bail!("source.max_connections must be greater than zero");
                }
            }
        }
        Ok(())
    }
}

fn build_source(
    raw: RawSourceConfig,
    request_timeout: Duration,
    env: impl Fn(&str) -> Option<String>,
) -> Result<SourceConfig> {
    match raw {
        RawSourceConfig::CsvExport { url, sheet_id, gid } => {
            let url = match (url, sheet_id) {
                (Some(url), _) => url,
                (None, Some(sheet_id)) => format!(
                    "https://docs.google.com/spreadsheets/d/{}/export?format=csv&gid={}",
                    sheet_id.trim(),
                    gid.as_deref().unwrap_or("0").trim()
                ),
                (None, None) => bail!("csv_export source needs either `url` or `sheet_id`"),
            };
            Ok(SourceConfig::CsvExport {
                url,
                request_timeout,
            })
        }
        RawSourceConfig::SheetsApi {
            url,
            sheet_id,
            range,
            api_key,
            skip_header,
        } => {
            let url = match (url, sheet_id) {
                (Some(url), _) => url,
                (None, Some(sheet_id)) => {
                    let range = range.ok_or_else(|| {
                        anyhow!("sheets_api source with `sheet_id` also needs `range`")
                    })?;
                    format!(
                        "{}/{}/values/{}",
                        DEFAULT_SHEETS_API_BASE,
                        sheet_id.trim(),
                        urlencoding::encode(range.trim())
                    )
                }
                (None, None) => bail!("sheets_api source needs either `url` or `sheet_id`"),
            };
            let api_key = api_key
                .or_else(|| env(SHEETS_API_KEY_ENV))
                .filter(|key| !key.trim().is_empty());
            Ok(SourceConfig::SheetsApi {
                url,
                api_key,
                skip_header: skip_header.unwrap_or(true),
                request_timeout,
            })
        }
        RawSourceConfig::HostedTable {
            database_url,
            table,
            max_connections,
            unaccent,
        } => {
            let database_url = database_url
                .or_else(|| env(DATABASE_URL_ENV))
                .ok_or_else(|| {
                    anyhow!("hosted_table source needs `database_url` or ${DATABASE_URL_ENV}")
                })?;
            Ok(SourceConfig::HostedTable {
                database_url,
                table: table.unwrap_or_else(|| DEFAULT_TABLE.to_string()),
                max_connections: max_connections.unwrap_or(5),
                unaccent: unaccent.unwrap_or(true),
            })
        }
    }
}

/// Parses a humantime setting such as `"300ms"`, bounded to `(0, max]`.
fn parse_bounded_duration(value: &str, field: &str, max: Duration) -> Result<Duration> {
    let duration = parse_duration(value.trim())
        .with_context(|| format!("{field}: '{value}' is not a duration like \"300ms\""))?;
    if duration.is_zero() || duration > max {
        bail!(
            "{field} must be between 1ms and {}, got {value}",
            humantime::format_duration(max)
        );
    }
    Ok(duration)
}

/// `name` or `schema.name`, ASCII letters, digits and underscores, not
/// starting with a digit. Table names are spliced into SQL, so nothing else
/// is accepted.
pub fn is_table_identifier(s: &str) -> bool {
    let parts: Vec<&str> = s.split('.').collect();
    parts.len() <= 2
        && parts.iter().all(|part| {
            part.chars()
                .next()
                .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
                && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}
