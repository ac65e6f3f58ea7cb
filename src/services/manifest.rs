//! CSV manifest parsing for batch uploads.
//!
//! Expected layout:
//!
//! ```text
//! S. No.,Product Name,Input Image Urls
//! 1,Widget,"http://a/1.jpg,http://a/2.jpg"
//! ```
//!
//! Image URLs may be given as one comma-separated cell or spread across any
//! number of trailing columns. The whole manifest is validated before any
//! job is created.

use std::collections::HashSet;

use crate::models::job::NewItem;

pub const EXPECTED_HEADER: [&str; 3] = ["S. No.", "Product Name", "Input Image Urls"];

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ManifestError {
    #[error("Manifest is empty")]
    MissingHeader,

    #[error("Invalid CSV header. Expected: {expected:?}, Got: {got:?}")]
    InvalidHeader { expected: Vec<String>, got: Vec<String> },

    #[error("Invalid row format at line {line}. Expected at least 3 columns, got {columns}.")]
    ShortRow { line: u64, columns: usize },

    #[error("Missing data in row {line}.")]
    MissingData { line: u64 },

    #[error("Invalid serial number '{value}' at line {line}")]
    InvalidSerial { line: u64, value: String },

    #[error("Duplicate serial number {serial} at line {line}")]
    DuplicateSerial { line: u64, serial: i32 },

    #[error("Manifest contains no products")]
    NoRows,

    #[error("Malformed CSV: {0}")]
    Csv(String),
}

impl From<csv::Error> for ManifestError {
    fn from(e: csv::Error) -> Self {
        ManifestError::Csv(e.to_string())
    }
}

/// Parse and validate an uploaded manifest into the items of a new job.
pub fn parse_manifest(data: &[u8]) -> Result<Vec<NewItem>, ManifestError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(data);

    let mut records = reader.records();
    let header = records.next().ok_or(ManifestError::MissingHeader)??;
    let got: Vec<&str> = header.iter().collect();
    if got != EXPECTED_HEADER {
        return Err(ManifestError::InvalidHeader {
            expected: EXPECTED_HEADER.iter().map(|s| s.to_string()).collect(),
            got: got.iter().map(|s| s.to_string()).collect(),
        });
    }

    let mut items = Vec::new();
    let mut seen = HashSet::new();

    for record in records {
        let record = record?;
        let line = record.position().map(|p| p.line()).unwrap_or_default();

        if record.len() < 3 {
            return Err(ManifestError::ShortRow {
                line,
                columns: record.len(),
            });
        }

        let serial = record[0].trim();
        let product_name = record[1].trim();
        let source_urls: Vec<String> = record
            .iter()
            .skip(2)
            .flat_map(|cell| cell.split(','))
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(str::to_string)
            .collect();

        if serial.is_empty() || product_name.is_empty() || source_urls.is_empty() {
            return Err(ManifestError::MissingData { line });
        }

        let sequence_number: i32 = serial.parse().map_err(|_| ManifestError::InvalidSerial {
            line,
            value: serial.to_string(),
        })?;
        if !seen.insert(sequence_number) {
            return Err(ManifestError::DuplicateSerial {
                line,
                serial: sequence_number,
            });
        }

        items.push(NewItem {
            sequence_number,
            product_name: product_name.to_string(),
            source_urls,
        });
    }

    if items.is_empty() {
        return Err(ManifestError::NoRows);
    }

    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "S. No.,Product Name,Input Image Urls\n";

    fn parse(body: &str) -> Result<Vec<NewItem>, ManifestError> {
        parse_manifest(format!("{}{}", HEADER, body).as_bytes())
    }

    #[test]
    fn test_single_row_with_quoted_urls() {
        let items = parse("1,Widget,\"http://good/a.jpg,http://bad/b.jpg\"\n").unwrap();
        assert_eq!(
            items,
            vec![NewItem {
                sequence_number: 1,
                product_name: "Widget".to_string(),
                source_urls: vec!["http://good/a.jpg".into(), "http://bad/b.jpg".into()],
            }]
        );
    }

    #[test]
    fn test_urls_spread_across_columns() {
        let items = parse("2, Gadget ,http://a/1.png, http://a/2.png,,\n").unwrap();
        assert_eq!(items[0].product_name, "Gadget");
        assert_eq!(items[0].source_urls, vec!["http://a/1.png", "http://a/2.png"]);
    }

    #[test]
    fn test_rows_keep_input_order() {
        let items = parse("3,C,http://c\n1,A,http://a\n2,B,http://b\n").unwrap();
        let serials: Vec<i32> = items.iter().map(|i| i.sequence_number).collect();
        assert_eq!(serials, vec![3, 1, 2]);
    }

    #[test]
    fn test_wrong_header() {
        let err = parse_manifest(b"Serial,Name,Urls\n1,Widget,http://a\n").unwrap_err();
        assert!(matches!(err, ManifestError::InvalidHeader { .. }));
    }

    #[test]
    fn test_empty_file() {
        assert_eq!(parse_manifest(b"").unwrap_err(), ManifestError::MissingHeader);
    }

    #[test]
    fn test_header_only() {
        assert_eq!(parse("").unwrap_err(), ManifestError::NoRows);
    }

    #[test]
    fn test_short_row_reports_line() {
        let err = parse("1,Widget,http://a\n2,Gadget\n").unwrap_err();
        assert_eq!(err, ManifestError::ShortRow { line: 3, columns: 2 });
    }

    #[test]
    fn test_missing_fields() {
        assert_eq!(
            parse(" ,Widget,http://a\n").unwrap_err(),
            ManifestError::MissingData { line: 2 }
        );
        assert_eq!(
            parse("1,Widget, , \n").unwrap_err(),
            ManifestError::MissingData { line: 2 }
        );
    }

    #[test]
    fn test_non_numeric_serial() {
        let err = parse("one,Widget,http://a\n").unwrap_err();
        assert!(matches!(err, ManifestError::InvalidSerial { line: 2, .. }));
    }

    #[test]
    fn test_duplicate_serial() {
        let err = parse("1,Widget,http://a\n1,Gadget,http://b\n").unwrap_err();
        assert_eq!(err, ManifestError::DuplicateSerial { line: 3, serial: 1 });
    }
}
