//! Parquet tables through Arrow record batches

use crate::error::{BacktestError, Result};
use crate::types::{parse_timestamp, TimeSeries, TIMESTAMP_COLUMN};
use arrow::array::{Array, ArrayRef, Float64Array, Int64Array, StringArray, TimestampMillisecondArray};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

const BATCH_SIZE: usize = 65_536;

fn is_loadable(data_type: &DataType) -> bool {
    data_type.is_numeric() || *data_type == DataType::Boolean
}

pub(super) fn load_parquet(path: &Path, nrows: Option<usize>) -> Result<TimeSeries> {
    let file = File::open(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?.with_batch_size(BATCH_SIZE);

    let schema = builder.schema().clone();
    let ts_pos = schema
        .fields()
        .iter()
        .position(|f| f.name() == TIMESTAMP_COLUMN)
        .ok_or_else(|| {
            BacktestError::DataUnavailable(format!(
                "{} has no '{}' column",
                path.display(),
                TIMESTAMP_COLUMN
            ))
        })?;

    let loaded: Vec<usize> = schema
        .fields()
        .iter()
        .enumerate()
        .filter(|(j, f)| {
            let keep = *j != ts_pos && is_loadable(f.data_type());
            if *j != ts_pos && !keep {
                debug!("Dropping non-numeric column '{}'", f.name());
            }
            keep
        })
        .map(|(j, _)| j)
        .collect();

    let mut timestamps = Vec::new();
    let mut columns: Vec<Vec<f64>> = vec![Vec::new(); loaded.len()];

    for batch in builder.build()? {
        let mut batch = batch?;
        if let Some(limit) = nrows {
            let remaining = limit.saturating_sub(timestamps.len());
            if remaining == 0 {
                break;
            }
            if batch.num_rows() > remaining {
                batch = batch.slice(0, remaining);
            }
        }

        timestamps.extend(timestamp_millis(batch.column(ts_pos))?);
        for (values, &j) in columns.iter_mut().zip(&loaded) {
            let floats = cast(batch.column(j), &DataType::Float64)?;
            let floats = floats
                .as_any()
                .downcast_ref::<Float64Array>()
                .ok_or_else(|| BacktestError::Model("Float64 cast produced another type".into()))?;
            values.extend(floats.iter().map(|v| v.unwrap_or(f64::NAN)));
        }
    }

    let mut series = TimeSeries::new(timestamps);
    for (values, &j) in columns.into_iter().zip(&loaded) {
        series.push_column(schema.field(j).name().clone(), values)?;
    }
    Ok(series)
}

/// Timestamp column as epoch milliseconds, whatever its Arrow type
fn timestamp_millis(array: &ArrayRef) -> Result<Vec<i64>> {
    let as_millis = match array.data_type() {
        DataType::Utf8 | DataType::LargeUtf8 => {
            let text = cast(array, &DataType::Utf8)?;
            let text = text
                .as_any()
                .downcast_ref::<StringArray>()
                .ok_or_else(|| BacktestError::Model("Utf8 cast produced another type".into()))?;
            return text
                .iter()
                .map(|cell| {
                    cell.and_then(parse_timestamp).ok_or_else(|| {
                        BacktestError::DataUnavailable(format!(
                            "invalid timestamp '{}'",
                            cell.unwrap_or("")
                        ))
                    })
                })
                .collect();
        }
        DataType::Timestamp(_, _) | DataType::Date32 | DataType::Date64 => {
            cast(array, &DataType::Timestamp(TimeUnit::Millisecond, None))?
        }
        _ => array.clone(),
    };

    let ints = cast(&as_millis, &DataType::Int64)?;
    let ints = ints
        .as_any()
        .downcast_ref::<Int64Array>()
        .ok_or_else(|| BacktestError::Model("Int64 cast produced another type".into()))?;
    if ints.null_count() > 0 {
        return Err(BacktestError::DataUnavailable(format!(
            "{} null timestamps",
            ints.null_count()
        )));
    }
    Ok(ints.values().to_vec())
}

pub(super) fn write_parquet(series: &TimeSeries, path: &Path) -> Result<()> {
    let mut fields = vec![Field::new(
        TIMESTAMP_COLUMN,
        DataType::Timestamp(TimeUnit::Millisecond, None),
        false,
    )];
    let mut arrays: Vec<ArrayRef> = vec![Arc::new(TimestampMillisecondArray::from(
        series.timestamps().to_vec(),
    ))];

    for name in series.column_names() {
        fields.push(Field::new(name, DataType::Float64, true));
        arrays.push(Arc::new(Float64Array::from(series.column(name)?.to_vec())));
    }

    let schema = Arc::new(Schema::new(fields));
    let batch = RecordBatch::try_new(schema.clone(), arrays)?;

    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let file = File::create(path)?;
    let mut writer = ArrowWriter::try_new(file, schema, Some(props))?;

    let mut offset = 0;
    while offset < batch.num_rows() {
        let len = BATCH_SIZE.min(batch.num_rows() - offset);
        writer.write(&batch.slice(offset, len))?;
        offset += len;
    }
    writer.close()?;
    Ok(())
}
