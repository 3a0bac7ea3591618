use serde::de::DeserializeOwned;

use super::ExportError;

const BOM: &[u8] = "\u{feff}".as_bytes();

/// Write a header row and records as UTF-8 CSV with a BOM, so spreadsheet
/// applications pick the right encoding.
pub fn write_csv<I>(headers: &[&str], rows: I) -> Result<Vec<u8>, ExportError>
where
    I: IntoIterator<Item = Vec<String>>,
{
    let mut writer = ::csv::Writer::from_writer(BOM.to_vec());
    writer.write_record(headers)?;
    for row in rows {
        writer.write_record(&row)?;
    }
    writer
        .into_inner()
        .map_err(|e| ExportError::Io(e.into_error()))
}

/// One parsed input row: its 1-based line number (header is line 1) and
/// either the record or why it could not be read.
pub type ParsedRow<T> = (usize, Result<T, String>);

/// Parse uploaded CSV into typed rows. Bad rows are reported, not fatal;
/// a missing or unreadable header is.
pub fn read_csv<T: DeserializeOwned>(input: &[u8]) -> Result<Vec<ParsedRow<T>>, ExportError> {
    let input = input.strip_prefix(BOM).unwrap_or(input);
    let mut reader = ::csv::ReaderBuilder::new()
        .trim(::csv::Trim::All)
        .from_reader(input);

    let headers = reader.headers()?.clone();
    if headers.is_empty() {
        return Err(ExportError::Import {
            message: "CSV header row is missing".to_string(),
        });
    }

    Ok(reader
        .records()
        .enumerate()
        .map(|(i, record)| {
            let line = i + 2;
            let parsed = record
                .map_err(|e| e.to_string())
                .and_then(|r| r.deserialize::<T>(Some(&headers)).map_err(|e| e.to_string()));
            (line, parsed)
        })
        .collect())
}

/// Format an optional value for a CSV cell.
pub fn cell<T: ToString>(value: &Option<T>) -> String {
    value.as_ref().map(ToString::to_string).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn output_starts_with_bom_and_quotes_commas() {
        let bytes = write_csv(
            &["code", "name"],
            vec![vec!["C001".to_string(), "Tanaka, Inc.".to_string()]],
        )
        .unwrap();
        assert!(bytes.starts_with(BOM));
        let text = String::from_utf8(bytes[BOM.len()..].to_vec()).unwrap();
        assert_eq!(text, "code,name\nC001,\"Tanaka, Inc.\"\n");
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Row {
        code: String,
        amount: i64,
    }

    #[test]
    fn reads_rows_and_reports_bad_ones() {
        let mut input = BOM.to_vec();
        input.extend_from_slice(b"code,amount\nA, 10\nB,ten\n");
        let rows: Vec<ParsedRow<Row>> = read_csv(&input).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], (2, Ok(Row { code: "A".into(), amount: 10 })));
        assert_eq!(rows[1].0, 3);
        assert!(rows[1].1.is_err());
    }
}
