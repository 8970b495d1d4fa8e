// src/storage/parquet_io.rs
//! Shared helpers for reading and writing parquet artifacts through arrow.

use anyhow::{anyhow, Context, Result};
use arrow_array::{Array, ArrayRef, Float64Array, Int64Array, RecordBatch, StringArray};
use arrow_schema::DataType;
use parquet::arrow::arrow_reader::{ParquetRecordBatchReader, ParquetRecordBatchReaderBuilder};
use parquet::arrow::{ArrowWriter, ProjectionMask};
use std::fs::{self, File};
use std::path::Path;

pub const READ_BATCH_SIZE: usize = 8192;

pub fn write_parquet(path: &Path, batch: RecordBatch) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating directory {}", parent.display()))?;
    }
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)
        .with_context(|| format!("opening parquet writer {}", path.display()))?;
    writer
        .write(&batch)
        .with_context(|| format!("writing record batch {}", path.display()))?;
    writer
        .close()
        .with_context(|| format!("closing parquet writer {}", path.display()))?;
    Ok(())
}

/// Opens a parquet file and projects it onto the named top-level columns.
pub fn open_projected(path: &Path, columns: &[&str]) -> Result<ParquetRecordBatchReader> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .with_context(|| format!("reading parquet metadata {}", path.display()))?;
    let schema = builder.schema().clone();
    let mut indices = Vec::with_capacity(columns.len());
    for column in columns {
        let index = schema.index_of(column).map_err(|_| {
            anyhow!("column '{}' not found in {}", column, path.display())
        })?;
        indices.push(index);
    }
    let mask = ProjectionMask::roots(builder.parquet_schema(), indices);
    builder
        .with_projection(mask)
        .with_batch_size(READ_BATCH_SIZE)
        .build()
        .with_context(|| format!("building parquet reader {}", path.display()))
}

pub fn parquet_row_count(path: &Path) -> Result<i64> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .with_context(|| format!("reading parquet metadata {}", path.display()))?;
    Ok(builder.metadata().file_metadata().num_rows())
}

fn column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a ArrayRef> {
    batch
        .column_by_name(name)
        .ok_or_else(|| anyhow!("column '{}' missing from record batch", name))
}

/// Reads any column castable to utf8 (strings, dictionaries, integers) as optional strings.
pub fn string_values(batch: &RecordBatch, name: &str) -> Result<Vec<Option<String>>> {
    let array = column(batch, name)?;
    let casted = arrow_cast::cast::cast(array.as_ref(), &DataType::Utf8)
        .with_context(|| format!("casting column '{}' to utf8", name))?;
    let strings = casted
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| anyhow!("column '{}' did not cast to a string array", name))?;
    Ok(strings.iter().map(|v| v.map(str::to_string)).collect())
}

pub fn f64_values(batch: &RecordBatch, name: &str) -> Result<Vec<Option<f64>>> {
    let array = column(batch, name)?;
    let casted = arrow_cast::cast::cast(array.as_ref(), &DataType::Float64)
        .with_context(|| format!("casting column '{}' to float64", name))?;
    let floats = casted
        .as_any()
        .downcast_ref::<Float64Array>()
        .ok_or_else(|| anyhow!("column '{}' did not cast to a float64 array", name))?;
    Ok(floats.iter().collect())
}

pub fn i64_values(batch: &RecordBatch, name: &str) -> Result<Vec<Option<i64>>> {
    let array = column(batch, name)?;
    let casted = arrow_cast::cast::cast(array.as_ref(), &DataType::Int64)
        .with_context(|| format!("casting column '{}' to int64", name))?;
    let ints = casted
        .as_any()
        .downcast_ref::<Int64Array>()
        .ok_or_else(|| anyhow!("column '{}' did not cast to an int64 array", name))?;
    Ok(ints.iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow_schema::{Field, Schema};
    use std::sync::Arc;

    #[test]
    fn test_projection_and_casting() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.parquet");
        let schema = Arc::new(Schema::new(vec![
            Field::new("n", DataType::Int64, true),
            Field::new("s", DataType::Utf8, true),
            Field::new("ignored", DataType::Utf8, true),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(vec![Some(7), None])),
                Arc::new(StringArray::from(vec![Some("a"), Some("b")])),
                Arc::new(StringArray::from(vec![Some("x"), Some("y")])),
            ],
        )
        .unwrap();
        write_parquet(&path, batch).unwrap();

        assert_eq!(parquet_row_count(&path).unwrap(), 2);
        let mut reader = open_projected(&path, &["n", "s"]).unwrap();
        let batch = reader.next().unwrap().unwrap();
        assert_eq!(batch.num_columns(), 2);
        assert_eq!(
            string_values(&batch, "n").unwrap(),
            vec![Some("7".to_string()), None]
        );
        assert_eq!(f64_values(&batch, "n").unwrap(), vec![Some(7.0), None]);
        assert!(string_values(&batch, "ignored").is_err());
    }

    #[test]
    fn test_missing_column_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.parquet");
        let schema = Arc::new(Schema::new(vec![Field::new("a", DataType::Utf8, true)]));
        let batch =
            RecordBatch::try_new(schema, vec![Arc::new(StringArray::from(vec![Some("v")]))])
                .unwrap();
        write_parquet(&path, batch).unwrap();

        let err = open_projected(&path, &["latitude"])
            .err()
            .expect("missing column must fail");
        assert!(err.to_string().contains("latitude"));
    }
}
