use std::fs::File;
use std::io::Read;

use csv::{ErrorKind, ReaderBuilder, StringRecord};
use tracing::{debug, info, instrument};

use crate::config::SourceSpec;
use crate::dataset::{Dataset, Value};
use crate::error::SourceReadError;

/// Reads delimited text sources into a [`Dataset`].
pub struct SourceReader;

impl SourceReader {
    /// Buffers the whole file. Blocking; callers on the runtime should use
    /// `spawn_blocking`.
    #[instrument(skip_all, fields(source = %spec.name, path = %spec.path.display()))]
    pub fn read(spec: &SourceSpec) -> Result<Dataset, SourceReadError> {
        if !spec.path.exists() {
            return Err(SourceReadError::NotFound(spec.path.clone()));
        }
        let file = File::open(&spec.path).map_err(|source| SourceReadError::Io {
            path: spec.path.clone(),
            source,
        })?;
        let dataset = Self::read_from(file, spec)?;
        info!(
            rows = dataset.len(),
            columns = dataset.columns().len(),
            "Extracted source"
        );
        Ok(dataset)
    }

    pub fn read_from<R: Read>(input: R, spec: &SourceSpec) -> Result<Dataset, SourceReadError> {
        let mut reader = ReaderBuilder::new()
            .delimiter(spec.delimiter_byte())
            .has_headers(spec.header)
            .flexible(false)
            .from_reader(input);

        let mut dataset = if spec.header {
            let headers = reader.headers().map_err(map_csv_error)?;
            Dataset::new(headers.iter().map(|h| h.trim().to_string()).collect())
        } else {
            Dataset::new(Vec::new())
        };

        let mut record = StringRecord::new();
        while reader.read_record(&mut record).map_err(map_csv_error)? {
            if !spec.header && dataset.columns().is_empty() {
                dataset = Dataset::new((1..=record.len()).map(|i| format!("column_{i}")).collect());
            }
            let row = record
                .iter()
                .map(|field| {
                    if field.is_empty() {
                        Value::Null
                    } else {
                        Value::String(field.to_string())
                    }
                })
                .collect();
            // Widths are enforced by the reader; a mismatch here means the
            // headerless width was inferred from the first record.
            dataset.push_row(row).map_err(|_| SourceReadError::FieldCount {
                line: record.position().map(|p| p.line()).unwrap_or(0),
                expected: dataset.columns().len(),
                actual: record.len(),
            })?;
        }
        debug!(rows = dataset.len(), "Parsed delimited input");
        Ok(dataset)
    }
}

fn map_csv_error(err: csv::Error) -> SourceReadError {
    match err.kind() {
        ErrorKind::UnequalLengths {
            pos,
            expected_len,
            len,
        } => SourceReadError::FieldCount {
            line: pos.as_ref().map(|p| p.line()).unwrap_or(0),
            expected: *expected_len as usize,
            actual: *len as usize,
        },
        _ => SourceReadError::Csv(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SourceFormat, SourceType};
    use std::io::Write;
    use std::path::PathBuf;

    fn spec(path: PathBuf, delimiter: &str, header: bool) -> SourceSpec {
        SourceSpec {
            name: "sales".into(),
            source_type: SourceType::Csv,
            path,
            format: SourceFormat::Csv,
            delimiter: delimiter.into(),
            header,
            transform: None,
        }
    }

    #[test]
    fn test_read_with_header_and_nulls() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sales.csv");
        let mut f = File::create(&path).unwrap();
        writeln!(f, "sale_id,amount\n1,10.5\n2,").unwrap();

        let ds = SourceReader::read(&spec(path, ",", true)).unwrap();
        assert_eq!(ds.columns(), &["sale_id".to_string(), "amount".to_string()]);
        assert_eq!(ds.len(), 2);
        assert_eq!(ds.value(0, "amount"), Some(&Value::from("10.5")));
        assert_eq!(ds.value(1, "amount"), Some(&Value::Null));
    }

    #[test]
    fn test_headerless_columns_are_numbered() {
        let input = "a|b|c\nd|e|f\n";
        let ds = SourceReader::read_from(input.as_bytes(), &spec("x".into(), "|", false)).unwrap();
        assert_eq!(ds.columns()[2], "column_3");
        assert_eq!(ds.len(), 2);
    }

    #[test]
    fn test_field_count_mismatch() {
        let input = "a,b\n1,2\n3,4,5\n";
        let err = SourceReader::read_from(input.as_bytes(), &spec("x".into(), ",", true)).unwrap_err();
        match err {
            SourceReadError::FieldCount {
                line,
                expected,
                actual,
            } => {
                assert_eq!(line, 3);
                assert_eq!(expected, 2);
                assert_eq!(actual, 3);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let err = SourceReader::read(&spec("/nonexistent/sales.csv".into(), ",", true)).unwrap_err();
        assert!(matches!(err, SourceReadError::NotFound(_)));
    }
}
