use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, Float64Array, ListArray, UInt64Array};
use arrow::datatypes::{DataType, Field, Float64Type, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;

use fdm_types::{CheckpointError, FdmError, FdmResult, FitnessVector, HistoryEntry, RunHistory};

/// Parquet archive of a run history: `eval_id`, flattened candidate
/// `vectors` and raw fitness `scores`, one row per evaluation.
#[derive(Debug, Default)]
pub struct HistoryArchive;

impl HistoryArchive {
    pub fn new() -> Self {
        Self
    }

    /// Arrow schema of the archive
    pub fn schema() -> Arc<Schema> {
        let item = Arc::new(Field::new("item", DataType::Float64, true));
        Arc::new(Schema::new(vec![
            Field::new("eval_id", DataType::UInt64, false),
            Field::new("vectors", DataType::List(item.clone()), false),
            Field::new("scores", DataType::List(item), false),
        ]))
    }

    /// Write the full history to `path`, replacing whatever is there.
    pub fn write<P: AsRef<Path>>(&self, path: P, history: &RunHistory) -> FdmResult<()> {
        let path = path.as_ref();
        let schema = Self::schema();
        let file = File::create(path)?;

        let mut writer = ArrowWriter::try_new(file, schema.clone(), None)
            .map_err(|e| FdmError::Parquet(format!("Failed to create writer for {}: {}", path.display(), e)))?;

        if !history.is_empty() {
            let batch = Self::history_to_record_batch(history, schema)?;
            writer
                .write(&batch)
                .map_err(|e| FdmError::Parquet(format!("Failed to write history batch: {}", e)))?;
        }

        writer
            .close()
            .map_err(|e| FdmError::Parquet(format!("Failed to finalize {}: {}", path.display(), e)))?;

        tracing::debug!("Archived {} evaluations to {}", history.len(), path.display());
        Ok(())
    }

    /// Read a history archive back.
    pub fn read<P: AsRef<Path>>(&self, path: P) -> FdmResult<RunHistory> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let reader = ParquetRecordBatchReaderBuilder::try_new(file)
            .map_err(|e| FdmError::Parquet(format!("Failed to create Parquet reader for {}: {}", path.display(), e)))?
            .build()
            .map_err(|e| FdmError::Parquet(format!("Failed to build Parquet reader: {}", e)))?;

        let mut entries = Vec::new();
        for batch_result in reader {
            let batch = batch_result
                .map_err(|e| FdmError::Arrow(format!("Failed to read history batch: {}", e)))?;
            entries.extend(Self::record_batch_to_entries(&batch)?);
        }

        RunHistory::from_entries(entries)
            .map_err(|e| corruption(&format!("{}: {}", path.display(), e)))
    }

    fn history_to_record_batch(history: &RunHistory, schema: Arc<Schema>) -> FdmResult<RecordBatch> {
        let eval_ids: Vec<u64> = history.entries().iter().map(|e| e.eval_id).collect();
        let vectors = ListArray::from_iter_primitive::<Float64Type, _, _>(
            history.vectors().map(|row| Some(row.iter().copied().map(Some))),
        );
        let scores = ListArray::from_iter_primitive::<Float64Type, _, _>(
            history.scores().map(|row| Some(row.iter().copied().map(Some))),
        );

        let columns: Vec<ArrayRef> = vec![
            Arc::new(UInt64Array::from(eval_ids)),
            Arc::new(vectors),
            Arc::new(scores),
        ];

        RecordBatch::try_new(schema, columns).map_err(|e| FdmError::Arrow(e.to_string()))
    }

    fn record_batch_to_entries(batch: &RecordBatch) -> FdmResult<Vec<HistoryEntry>> {
        let eval_ids = batch
            .column(0)
            .as_any()
            .downcast_ref::<UInt64Array>()
            .ok_or_else(|| corruption("Invalid eval_id column in history archive"))?;
        let vectors = batch
            .column(1)
            .as_any()
            .downcast_ref::<ListArray>()
            .ok_or_else(|| corruption("Invalid vectors column in history archive"))?;
        let scores = batch
            .column(2)
            .as_any()
            .downcast_ref::<ListArray>()
            .ok_or_else(|| corruption("Invalid scores column in history archive"))?;

        let mut entries = Vec::with_capacity(batch.num_rows());
        for i in 0..batch.num_rows() {
            if eval_ids.is_null(i) || vectors.is_null(i) || scores.is_null(i) {
                return Err(corruption(&format!("Null value in history row {}", i)));
            }

            let fitness = FitnessVector::new(list_row(scores, i)?)
                .map_err(|e| corruption(&format!("Bad scores in row {}: {}", i, e)))?;

            entries.push(HistoryEntry {
                eval_id: eval_ids.value(i),
                vector: list_row(vectors, i)?,
                fitness,
            });
        }

        Ok(entries)
    }
}

fn list_row(list: &ListArray, row: usize) -> FdmResult<Vec<f64>> {
    let values = list.value(row);
    let values = values
        .as_any()
        .downcast_ref::<Float64Array>()
        .ok_or_else(|| corruption("List column does not hold Float64 values"))?;
    Ok(values.values().iter().copied().collect())
}

fn corruption(message: &str) -> FdmError {
    CheckpointError::Corruption {
        message: message.to_string(),
    }
    .into()
}
