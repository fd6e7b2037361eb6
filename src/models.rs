use serde::{Deserialize, Serialize};

use crate::drive;

/// One certificate entry, independent of the backend it came from.
///
/// Fields are private so a record cannot change after construction; the
/// only way in is [`Record::new`], which refuses a blank name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    name: String,
    location: String,
    completion_date: String,
    document_url: String,
    download_url: String,
}

impl Record {
    /// Builds a record, trimming every field. Returns `None` when the name is
    /// blank. An empty `download_url` is derived from `document_url`.
    pub fn new(
        name: impl Into<String>,
        location: impl Into<String>,
        completion_date: impl Into<String>,
        document_url: impl Into<String>,
        download_url: impl Into<String>,
    ) -> Option<Self> {
        let name = trimmed(name.into());
        if name.is_empty() {
            return None;
        }

        let document_url = trimmed(document_url.into());
        let mut download_url = trimmed(download_url.into());
        if download_url.is_empty() {
            download_url = drive::download_url(&document_url);
        }

        Some(Self {
            name,
            location: trimmed(location.into()),
            completion_date: trimmed(completion_date.into()),
            document_url,
            download_url,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn completion_date(&self) -> &str {
        &self.completion_date
    }

    pub fn document_url(&self) -> &str {
        &self.document_url
    }

    pub fn download_url(&self) -> &str {
        &self.download_url
    }

    /// Embeddable preview URL, or `None` when there is no document to show.
    pub fn viewer_url(&self) -> Option<String> {
        drive::viewer_url(&self.document_url)
    }
}

fn trimmed(value: String) -> String {
    let trimmed = value.trim();
    if trimmed.len() == value.len() {
        value
    } else {
        trimmed.to_string()
    }
}

/// A row as delivered by one of the backends, before mapping.
#[derive(Debug, Clone, PartialEq)]
pub enum RawRow {
    /// Positional cells from the CSV export.
    Csv(Vec<String>),
    /// Positional cells from the spreadsheet values API.
    Api(Vec<String>),
    /// Keyed columns from the hosted table.
    Table(TableRow),
}

/// Columns of the hosted certificate table. Every column is optional so a
/// missing or null value never fails deserialization of the whole row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRow {
    #[serde(default)]
    pub nome_aluno: Option<String>,
    #[serde(default)]
    pub local_treinamento: Option<String>,
    #[serde(default)]
    pub data_conclusao: Option<String>,
    #[serde(default)]
    pub certificado_url: Option<String>,
    #[serde(default)]
    pub certificado_download_url: Option<String>,
    #[serde(default)]
    pub certificado_completo_url: Option<String>,
}
