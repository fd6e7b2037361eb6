use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info, warn};

use crate::config::is_table_identifier;
use crate::mapper::map_row;
use crate::matcher::filter_matching;
use crate::models::{RawRow, Record, TableRow};
use crate::normalize::normalize;
use crate::source::{DataSource, DataSourceError};

/// Certificates stored in a Postgres table.
///
/// With `unaccent` on, `search` narrows the scan with an accent-insensitive
/// `ILIKE` on the name column. Without the extension a raw `ILIKE` would
/// drop rows that differ from the query only by accents, so the whole table
/// is scanned instead. Either way the local matcher has the final word,
/// since `ILIKE` only understands a single substring.
#[derive(Clone)]
pub struct PostgresSource {
    pool: PgPool,
    table: String,
    unaccent: bool,
}

impl PostgresSource {
    pub fn new(pool: PgPool, table: String, unaccent: bool) -> Result<Self, DataSourceError> {
        if !is_table_identifier(&table) {
            return Err(DataSourceError::Config(format!(
                "invalid table name '{table}'"
            )));
        }
        Ok(Self {
            pool,
            table,
            unaccent,
        })
    }

    /// Pool that opens its first connection on first use.
    pub fn connect_lazy(
        database_url: &str,
        table: String,
        max_connections: u32,
        unaccent: bool,
    ) -> Result<Self, DataSourceError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_lazy(database_url)
            .map_err(|e| DataSourceError::Config(format!("invalid database URL: {e}")))?;
        Self::new(pool, table, unaccent)
    }

    fn select_all_sql(&self) -> String {
        format!("SELECT to_jsonb(t) FROM {} t", self.table)
    }

    fn select_matching_sql(&self) -> String {
        format!(
            "SELECT to_jsonb(t) FROM {} t WHERE unaccent(t.nome_aluno) ILIKE unaccent($1) ESCAPE '\\'",
            self.table
        )
    }

    /// Statement and bind parameter used for `query`, or `None` when the
    /// query has no tokens.
    fn search_statement(&self, query: &str) -> Option<(String, Option<String>)> {
        let pattern = remote_pattern(query)?;
        if self.unaccent {
            Some((self.select_matching_sql(), Some(pattern)))
        } else {
            Some((self.select_all_sql(), None))
        }
    }

    async fn fetch_rows(
        &self,
        sql: &str,
        pattern: Option<&str>,
    ) -> Result<Vec<Value>, DataSourceError> {
        let start = Instant::now();
        info!(
            stage = "source",
            event = "source.query.begin",
            source = self.kind(),
            table = %self.table,
            filtered = pattern.is_some(),
            "querying certificate table"
        );

        let mut query = sqlx::query_scalar::<_, Value>(sql);
        if let Some(pattern) = pattern {
            query = query.bind(pattern);
        }

        match query.fetch_all(&self.pool).await {
            Ok(rows) => {
                info!(
                    stage = "source",
                    event = "source.query.end",
                    source = self.kind(),
                    result = "ok",
                    row_count = rows.len(),
                    duration_ms = start.elapsed().as_millis(),
                    "certificate table queried"
                );
                Ok(rows)
            }
            Err(err) => {
                error!(
                    stage = "source",
                    event = "source.query.end",
                    source = self.kind(),
                    result = "fail",
                    duration_ms = start.elapsed().as_millis(),
                    error = %err,
                    "certificate table query failed"
                );
                Err(err.into())
            }
        }
    }
}

/// Maps JSON-encoded table rows, dropping rows with unexpected column types
/// or missing required fields.
pub fn decode_rows(rows: Vec<Value>) -> Vec<Record> {
    rows.into_iter()
        .filter_map(|value| match serde_json::from_value::<TableRow>(value) {
            Ok(row) => map_row(RawRow::Table(row)),
            Err(err) => {
                warn!(
                    stage = "source",
                    event = "source.row.skip",
                    error = %err,
                    "skipping undecodable table row"
                );
                None
            }
        })
        .collect()
}

/// Decodes rows returned for `query` and keeps those the local matcher
/// accepts.
pub fn refine(rows: Vec<Value>, query: &str) -> Vec<Record> {
    filter_matching(decode_rows(rows), query)
}

/// `ILIKE` pattern for the longest query token, normalized and with LIKE
/// metacharacters escaped. Every record the local matcher accepts contains
/// every normalized token, so an accent-insensitive filter on one token
/// never loses a match.
pub fn remote_pattern(query: &str) -> Option<String> {
    let token = query
        .split_whitespace()
        .max_by_key(|token| token.chars().count())?;

    let token = normalize(token);
    let mut pattern = String::with_capacity(token.len() + 2);
    pattern.push('%');
    for ch in token.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    pattern.push('%');
    Some(pattern)
}

#[async_trait]
impl DataSource for PostgresSource {
    fn kind(&self) -> &'static str {
        "hosted_table"
    }

    async fn fetch_all(&self) -> Result<Vec<Record>, DataSourceError> {
        let rows = self.fetch_rows(&self.select_all_sql(), None).await?;
        Ok(decode_rows(rows))
    }

    async fn search(&self, query: &str) -> Result<Vec<Record>, DataSourceError> {
        let Some((sql, pattern)) = self.search_statement(query) else {
            return Ok(Vec::new());
        };

        let rows = self.fetch_rows(&sql, pattern.as_deref()).await?;
        let scanned = rows.len();
        let hits = refine(rows, query);
        info!(
            stage = "search",
            event = "search.local_filter",
            source = self.kind(),
            scanned,
            matched = hits.len(),
            "re-verified table rows"
        );
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const DATABASE_URL: &str = "postgres://user:pw@localhost:5432/certs";

    fn source(table: &str, unaccent: bool) -> PostgresSource {
        PostgresSource::connect_lazy(DATABASE_URL, table.to_string(), 1, unaccent).expect("source")
    }

    fn row(name: &str) -> Value {
        json!({
            "nome_aluno": name,
            "local_treinamento": "SP",
            "data_conclusao": "2024-01-15",
            "certificado_url": null
        })
    }

    fn names(records: &[Record]) -> Vec<&str> {
        records.iter().map(Record::name).collect()
    }

    #[test]
    fn pattern_uses_longest_normalized_token() {
        assert_eq!(remote_pattern("Ana Paula").as_deref(), Some("%paula%"));
        assert_eq!(remote_pattern("  JOÃO  ").as_deref(), Some("%joao%"));
        assert_eq!(remote_pattern("   "), None);
        assert_eq!(remote_pattern(""), None);
    }

    #[test]
    fn pattern_escapes_like_metacharacters() {
        assert_eq!(remote_pattern("50%_a\\b").as_deref(), Some("%50\\%\\_a\\\\b%"));
    }

    #[test]
    fn decodes_rows_and_skips_bad_ones() {
        let rows = vec![
            json!({
                "id": 1,
                "nome_aluno": "Ana Paula",
                "local_treinamento": "SP",
                "data_conclusao": "2024-01-15",
                "certificado_url": "https://drive.google.com/file/d/ZZ/view",
                "certificado_download_url": null
            }),
            json!({ "nome_aluno": 42, "data_conclusao": "2024-01-15" }),
            json!({ "nome_aluno": "", "data_conclusao": "2024-01-15" }),
            json!({ "nome_aluno": "Sem Data" }),
        ];

        let records = decode_rows(rows);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name(), "Ana Paula");
        assert_eq!(records[0].completion_date(), "15/01/2024");
        assert_eq!(
            records[0].download_url(),
            "https://drive.google.com/uc?export=download&id=ZZ"
        );
    }

    #[test]
    fn refine_applies_every_query_word() {
        // What `ILIKE '%paula%'` could return for "paula ana".
        let rows = vec![
            row("Ana Paula Rodrigues"),
            row("Paula Souza"),
            row("Maria Paula Anastácio"),
            json!({ "nome_aluno": "Paula Sem Data" }),
        ];

        let hits = refine(rows, "paula ana");
        assert_eq!(names(&hits), vec!["Ana Paula Rodrigues", "Maria Paula Anastácio"]);
    }

    #[test]
    fn refine_matches_accented_names() {
        let rows = vec![row("João da Silva"), row("Joana Prado")];
        assert_eq!(names(&refine(rows.clone(), "joao")), vec!["João da Silva"]);
        assert_eq!(names(&refine(rows, "SILVA JOÃO")), vec!["João da Silva"]);
    }

    #[tokio::test]
    async fn builds_queries_for_the_configured_table() {
        let source = source("public.certificado_digital", true);
        assert_eq!(
            source.select_all_sql(),
            "SELECT to_jsonb(t) FROM public.certificado_digital t"
        );
        assert_eq!(
            source.search_statement("Conceição Maria"),
            Some((
                "SELECT to_jsonb(t) FROM public.certificado_digital t \
                 WHERE unaccent(t.nome_aluno) ILIKE unaccent($1) ESCAPE '\\'"
                    .to_string(),
                Some("%conceicao%".to_string()),
            ))
        );
    }

    #[tokio::test]
    async fn scans_everything_without_unaccent() {
        let source = source("certificado_digital", false);
        assert_eq!(
            source.search_statement("joao"),
            Some(("SELECT to_jsonb(t) FROM certificado_digital t".to_string(), None))
        );
    }

    #[tokio::test]
    async fn rejects_unsafe_table_names() {
        let err = PostgresSource::connect_lazy(
            DATABASE_URL,
            "certs; drop table certs".to_string(),
            1,
            false,
        )
        .err()
        .expect("should fail");
        assert!(matches!(err, DataSourceError::Config(_)));
    }

    #[tokio::test]
    async fn blank_query_skips_the_database() {
        let source = source("certificado_digital", true);
        assert_eq!(source.search_statement("  "), None);
        assert!(source.search("  ").await.expect("search").is_empty());
    }
}
