use chrono::{DateTime, NaiveDate, NaiveDateTime};

use crate::models::{RawRow, Record, TableRow};

const DISPLAY_FORMAT: &str = "%d/%m/%Y";

// Slash-separated dates are day-first: `01/02/2024` is the first of February.
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%Y/%m/%d", "%d-%m-%Y", "%d.%m.%Y"];
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
];

/// Maps any raw backend row into a record. Rows missing a name or a
/// completion date are rejected with `None`.
pub fn map_row(raw: RawRow) -> Option<Record> {
    match raw {
        RawRow::Csv(cells) | RawRow::Api(cells) => map_positional(&cells),
        RawRow::Table(row) => map_table_row(row),
    }
}

/// Positional layout: `[name, location, date, document_url, download_url]`.
pub fn map_positional(cells: &[String]) -> Option<Record> {
    let cell = |idx: usize| cells.get(idx).map(|c| c.trim()).unwrap_or("");
    build(cell(0), cell(1), cell(2), cell(3), cell(4))
}

pub fn map_table_row(row: TableRow) -> Option<Record> {
    let document_url = match row.certificado_url.as_deref().map(str::trim) {
        Some(url) if !url.is_empty() => url,
        _ => row.certificado_completo_url.as_deref().unwrap_or(""),
    };

    build(
        row.nome_aluno.as_deref().unwrap_or(""),
        row.local_treinamento.as_deref().unwrap_or(""),
        row.data_conclusao.as_deref().unwrap_or(""),
        document_url,
        row.certificado_download_url.as_deref().unwrap_or(""),
    )
}

fn build(
    name: &str,
    location: &str,
    raw_date: &str,
    document_url: &str,
    download_url: &str,
) -> Option<Record> {
    if raw_date.trim().is_empty() {
        return None;
    }
    Record::new(
        name,
        location,
        format_completion_date(raw_date),
        document_url,
        download_url,
    )
}

/// Renders `raw` as `DD/MM/YYYY`. Values that cannot be read as a date come
/// back unchanged (trimmed).
pub fn format_completion_date(raw: &str) -> String {
    let raw = raw.trim();
    parse_date(raw)
        .map(|date| date.format(DISPLAY_FORMAT).to_string())
        .unwrap_or_else(|| raw.to_string())
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.date_naive());
    }

    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
                .map(|dt| dt.date())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn cells(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn empty_name_rejected() {
        assert_eq!(map_positional(&cells(&["", "SP", "2024-01-01"])), None);
        assert_eq!(map_positional(&cells(&["   ", "SP", "2024-01-01"])), None);
    }

    #[test]
    fn empty_location_kept() {
        let record = map_positional(&cells(&["Ana", "", "2024-01-01"])).expect("record");
        assert_eq!(record.location(), "");
        assert_eq!(record.completion_date(), "01/01/2024");
        assert_eq!(record.document_url(), "");
        assert_eq!(record.download_url(), "");
    }

    #[test]
    fn missing_date_rejected() {
        assert_eq!(map_positional(&cells(&["Ana", "SP", " "])), None);
        assert_eq!(map_positional(&cells(&["Ana", "SP"])), None);
        assert_eq!(map_positional(&[]), None);
    }

    #[test]
    fn full_row_maps_every_column() {
        let record = map_row(RawRow::Csv(cells(&[
            " Ana Paula ",
            "São Paulo",
            "15/03/2024",
            "https://drive.google.com/file/d/F1/view",
            "",
            "extra column",
        ])))
        .expect("record");
        assert_eq!(record.name(), "Ana Paula");
        assert_eq!(record.location(), "São Paulo");
        assert_eq!(record.completion_date(), "15/03/2024");
        assert_eq!(
            record.download_url(),
            "https://drive.google.com/uc?export=download&id=F1"
        );
    }

    #[test]
    fn table_row_maps_and_falls_back_to_full_document() {
        let row = TableRow {
            nome_aluno: Some("João".into()),
            local_treinamento: None,
            data_conclusao: Some("2023-12-31".into()),
            certificado_url: Some("  ".into()),
            certificado_download_url: None,
            certificado_completo_url: Some("https://example.com/full.pdf".into()),
        };
        let record = map_row(RawRow::Table(row)).expect("record");
        assert_eq!(record.location(), "");
        assert_eq!(record.completion_date(), "31/12/2023");
        assert_eq!(record.document_url(), "https://example.com/full.pdf");
        assert_eq!(record.download_url(), "https://example.com/full.pdf");
    }

    #[test]
    fn table_row_without_name_rejected() {
        let row = TableRow {
            data_conclusao: Some("2023-12-31".into()),
            ..TableRow::default()
        };
        assert_eq!(map_table_row(row), None);
    }

    #[test]
    fn date_formats() {
        assert_eq!(format_completion_date("2024-01-05"), "05/01/2024");
        assert_eq!(format_completion_date("2024/01/05"), "05/01/2024");
        assert_eq!(format_completion_date("05/01/2024"), "05/01/2024");
        assert_eq!(format_completion_date("05-01-2024"), "05/01/2024");
        assert_eq!(format_completion_date("05.01.2024"), "05/01/2024");
        assert_eq!(format_completion_date("2024-01-05T10:30:00Z"), "05/01/2024");
        assert_eq!(format_completion_date("2024-01-05 10:30:00"), "05/01/2024");
    }

    #[test]
    fn unparseable_date_passes_through() {
        assert_eq!(format_completion_date(" março de 2024 "), "março de 2024");
        assert_eq!(format_completion_date("2024-13-40"), "2024-13-40");
        assert_eq!(format_completion_date(""), "");
    }
}
