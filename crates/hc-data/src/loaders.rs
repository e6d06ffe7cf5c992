use std::fs;
use std::path::Path;

use arrow::array::{Array, ArrayRef, AsArray, GenericListArray, OffsetSizeTrait};
use arrow::compute::{cast, concat_batches};
use arrow::datatypes::{ArrowNativeType, DataType};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

use crate::events::{EventCollection, EventTable, PerEventArray};
use crate::labels::merge_labeled;
use hc_types::{DataError, HcResult};

/// Loads event tables from Parquet or CSV files.
#[derive(Debug, Clone)]
pub struct EventLoader {
    batch_size: usize,
    entry_stop: Option<usize>,
    group_collections: bool,
}

impl EventLoader {
    pub fn new() -> Self {
        Self {
            batch_size: 65536,
            entry_stop: None,
            group_collections: true,
        }
    }

    /// Read at most `entry_stop` events per file (`None` reads everything).
    pub fn with_entry_stop(mut self, entry_stop: Option<usize>) -> Self {
        self.entry_stop = entry_stop;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Keep flat column names as-is instead of grouping `Jet_pt`, `Jet_eta`
    /// into a `Jet` record.
    pub fn without_grouping(mut self) -> Self {
        self.group_collections = false;
        self
    }

    /// Load a single file, choosing the reader from its extension.
    pub fn load<P: AsRef<Path>>(&self, file_path: P) -> HcResult<EventTable> {
        let path = file_path.as_ref();
        match DataFormat::detect(path) {
            Some(DataFormat::Parquet) => self.load_parquet(path),
            Some(DataFormat::Csv) => self.load_csv(path),
            None => Err(DataError::InvalidFormat {
                message: format!(
                    "cannot infer input format of {} (expected .parquet or .csv)",
                    path.display()
                ),
            }
            .into()),
        }
    }

    /// Load several files and concatenate them in order.
    pub fn load_many<P: AsRef<Path>>(&self, paths: &[P]) -> HcResult<EventTable> {
        let tables = paths
            .iter()
            .map(|p| self.load(p))
            .collect::<HcResult<Vec<_>>>()?;
        EventTable::concat(tables)
    }

    /// Load signal and background files into one table with a boolean
    /// label field.
    pub fn load_labeled<P: AsRef<Path>>(
        &self,
        signal: &[P],
        background: &[P],
        label_field: &str,
    ) -> HcResult<EventTable> {
        let signal_tables = signal
            .iter()
            .map(|p| self.load(p))
            .collect::<HcResult<Vec<_>>>()?;
        let background_tables = background
            .iter()
            .map(|p| self.load(p))
            .collect::<HcResult<Vec<_>>>()?;
        let merged = merge_labeled(signal_tables, background_tables, label_field)?;
        tracing::info!(
            "Merged {} signal and {} background files into {} events",
            signal.len(),
            background.len(),
            merged.len()
        );
        Ok(merged)
    }

    /// Load events from a Parquet file through Arrow.
    pub fn load_parquet<P: AsRef<Path>>(&self, file_path: P) -> HcResult<EventTable> {
        let path = file_path.as_ref();
        tracing::info!("Loading Parquet events from: {}", path.display());

        if !path.exists() {
            return Err(DataError::SourceNotFound(path.display().to_string()).into());
        }

        let file = fs::File::open(path)?;
        let builder = ParquetRecordBatchReaderBuilder::try_new(file).map_err(|e| {
            DataError::LoadingFailed {
                message: format!("Failed to create Parquet reader for {}: {}", path.display(), e),
            }
        })?;
        let schema = builder.schema().clone();
        let reader = builder
            .with_batch_size(self.batch_size)
            .build()
            .map_err(|e| DataError::LoadingFailed {
                message: format!("Failed to build Parquet reader: {}", e),
            })?;

        let mut batches = Vec::new();
        let mut rows = 0usize;
        for batch_result in reader {
            let batch = batch_result.map_err(|e| DataError::LoadingFailed {
                message: format!("Failed to read Parquet batch: {}", e),
            })?;
            rows += batch.num_rows();
            batches.push(batch);
            if self.entry_stop.is_some_and(|stop| rows >= stop) {
                break;
            }
        }

        let mut batch = concat_batches(&schema, &batches).map_err(|e| DataError::LoadingFailed {
            message: format!("Failed to concatenate Parquet batches: {}", e),
        })?;
        if let Some(stop) = self.entry_stop {
            batch = batch.slice(0, stop.min(batch.num_rows()));
        }

        let table = self.record_batch_to_table(&batch)?;
        tracing::info!(
            "Loaded {} events with {} fields from {}",
            table.len(),
            table.field_paths().len(),
            path.display()
        );
        Ok(table)
    }

    /// Convert an Arrow record batch into an event table.
    pub fn record_batch_to_table(&self, batch: &RecordBatch) -> HcResult<EventTable> {
        let mut table = EventTable::new(batch.num_rows());
        let schema = batch.schema();
        let flat_names: Vec<&str> = schema
            .fields()
            .iter()
            .filter(|f| !matches!(f.data_type(), DataType::Struct(_)))
            .map(|f| f.name().as_str())
            .collect();

        for (field, column) in schema.fields().iter().zip(batch.columns()) {
            let mut location = if matches!(field.data_type(), DataType::Struct(_)) {
                vec![field.name().clone()]
            } else {
                self.column_location(field.name(), &flat_names)
            };
            let mut wrappers = Vec::new();
            insert_arrow(&mut table, &mut location, &mut wrappers, column)?;
        }
        Ok(table)
    }

    /// Load events from a CSV file with a header row. Every column must be
    /// numeric (or `true`/`false`); other columns are skipped.
    pub fn load_csv<P: AsRef<Path>>(&self, file_path: P) -> HcResult<EventTable> {
        use csv::ReaderBuilder;

        let path = file_path.as_ref();
        tracing::info!("Loading CSV events from: {}", path.display());

        let mut rdr = ReaderBuilder::new()
            .has_headers(true)
            .from_path(path)
            .map_err(|e| DataError::LoadingFailed {
                message: format!("Failed to open CSV file {}: {}", path.display(), e),
            })?;

        let headers = rdr
            .headers()
            .map_err(|e| DataError::LoadingFailed {
                message: format!("Failed to read CSV headers: {}", e),
            })?
            .clone();

        let mut columns: Vec<Option<Vec<f64>>> = vec![Some(Vec::new()); headers.len()];
        let mut rows = 0usize;

        for (line_num, result) in rdr.records().enumerate() {
            if self.entry_stop.is_some_and(|stop| rows >= stop) {
                break;
            }
            let record = result.map_err(|e| DataError::LoadingFailed {
                message: format!("Failed to read CSV record at line {}: {}", line_num + 2, e),
            })?;

            for (idx, raw) in record.iter().enumerate() {
                let Some(values) = columns[idx].as_mut() else {
                    continue;
                };
                match parse_csv_value(raw) {
                    Some(v) => values.push(v),
                    None => {
                        tracing::warn!(
                            "Skipping non-numeric column {} (value '{}' at line {})",
                            &headers[idx],
                            raw,
                            line_num + 2
                        );
                        columns[idx] = None;
                    }
                }
            }
            rows += 1;
        }

        let mut table = EventTable::new(rows);
        let flat_names: Vec<&str> = headers.iter().collect();
        for (name, values) in headers.iter().zip(columns) {
            let Some(values) = values else {
                continue;
            };
            let location = self.column_location(name, &flat_names);
            let location: Vec<&str> = location.iter().map(String::as_str).collect();
            table.insert(&location, PerEventArray::scalar(values))?;
        }

        tracing::info!("Loaded {} events from CSV file {}", table.len(), path.display());
        Ok(table)
    }

    /// Where a flat column lands in the field tree. `Jet_pt` becomes
    /// `Jet -> pt` unless grouping is off or `Jet` is itself a flat column.
    fn column_location(&self, name: &str, flat_names: &[&str]) -> Vec<String> {
        if self.group_collections {
            if let Some((prefix, rest)) = name.split_once('_') {
                if !prefix.is_empty() && !rest.is_empty() && !flat_names.contains(&prefix) {
                    return vec![prefix.to_string(), rest.to_string()];
                }
            }
        }
        vec![name.to_string()]
    }
}

impl Default for EventLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Recursively place an Arrow column into `table`. List layers are collected
/// in `wrappers` (outermost first) and re-applied around each leaf, so a
/// `list<struct<pt, eta>>` column becomes list-valued `pt` and `eta` fields.
fn insert_arrow(
    table: &mut EventTable,
    location: &mut Vec<String>,
    wrappers: &mut Vec<Vec<usize>>,
    array: &ArrayRef,
) -> HcResult<()> {
    match array.data_type() {
        DataType::Struct(_) => {
            let structs = array.as_struct();
            for (child_field, child) in structs.fields().iter().zip(structs.columns()) {
                location.push(child_field.name().clone());
                insert_arrow(table, location, wrappers, child)?;
                location.pop();
            }
            Ok(())
        }
        DataType::List(_) => {
            let (offsets, values) = list_parts(array.as_list::<i32>());
            wrappers.push(offsets);
            let result = insert_arrow(table, location, wrappers, &values);
            wrappers.pop();
            result
        }
        DataType::LargeList(_) => {
            let (offsets, values) = list_parts(array.as_list::<i64>());
            wrappers.push(offsets);
            let result = insert_arrow(table, location, wrappers, &values);
            wrappers.pop();
            result
        }
        dt if dt.is_numeric() || *dt == DataType::Boolean => {
            let mut per_event = PerEventArray::scalar(to_f64_values(array, &location.join("."))?);
            for offsets in wrappers.iter().rev() {
                per_event = PerEventArray::from_offsets(offsets.clone(), per_event)?;
            }
            let location: Vec<&str> = location.iter().map(String::as_str).collect();
            table.insert(&location, per_event)
        }
        other => {
            tracing::warn!(
                "Skipping column {} with unsupported type {:?}",
                location.join("."),
                other
            );
            Ok(())
        }
    }
}

/// Offsets rebased to zero plus the matching slice of the child array.
fn list_parts<O: OffsetSizeTrait>(list: &GenericListArray<O>) -> (Vec<usize>, ArrayRef) {
    let raw = list.value_offsets();
    let start = raw.first().map(|o| o.as_usize()).unwrap_or(0);
    let end = raw.last().map(|o| o.as_usize()).unwrap_or(start);
    let offsets = raw.iter().map(|o| o.as_usize() - start).collect();
    (offsets, list.values().slice(start, end - start))
}

fn to_f64_values(array: &ArrayRef, column: &str) -> HcResult<Vec<f64>> {
    let converted = cast(array, &DataType::Float64).map_err(|_| DataError::UnsupportedColumn {
        column: column.to_string(),
        data_type: format!("{:?}", array.data_type()),
    })?;
    let floats = converted.as_primitive::<arrow::datatypes::Float64Type>();
    Ok((0..floats.len())
        .map(|i| if floats.is_null(i) { f64::NAN } else { floats.value(i) })
        .collect())
}

fn parse_csv_value(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    match trimmed {
        "" | "nan" | "NaN" => Some(f64::NAN),
        "true" | "True" => Some(1.0),
        "false" | "False" => Some(0.0),
        _ => trimmed.parse::<f64>().ok(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataFormat {
    Csv,
    Parquet,
}

impl DataFormat {
    /// Detect file format from extension
    pub fn detect<P: AsRef<Path>>(file_path: P) -> Option<DataFormat> {
        let extension = file_path.as_ref().extension()?.to_str()?;
        match extension.to_lowercase().as_str() {
            "csv" => Some(DataFormat::Csv),
            "parquet" | "pq" => Some(DataFormat::Parquet),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Reduction;
    use arrow::array::{BooleanArray, Float32Array, Int32Array, ListArray, StructArray};
    use arrow::datatypes::{Field, Float32Type, Schema};
    use std::io::Write;
    use std::sync::Arc;
    use tempfile::NamedTempFile;

    fn nano_batch() -> RecordBatch {
        let met_pt: ArrayRef = Arc::new(Float32Array::from(vec![10.0, 60.0, 90.0]));
        let jet_pt: ArrayRef = Arc::new(ListArray::from_iter_primitive::<Float32Type, _, _>(vec![
            Some(vec![Some(30.0), Some(50.0)]),
            Some(vec![]),
            Some(vec![Some(20.0), None]),
        ]));
        let n_jet: ArrayRef = Arc::new(Int32Array::from(vec![2, 0, 2]));
        let trigger: ArrayRef = Arc::new(BooleanArray::from(vec![true, false, true]));
        let run: ArrayRef = Arc::new(arrow::array::StringArray::from(vec!["a", "b", "c"]));

        let schema = Schema::new(vec![
            Field::new("MET_pt", DataType::Float32, false),
            Field::new("Jet_pt", jet_pt.data_type().clone(), true),
            Field::new("nJet", DataType::Int32, false),
            Field::new("HLT_IsoMu24", DataType::Boolean, false),
            Field::new("dataset", DataType::Utf8, false),
        ]);
        RecordBatch::try_new(Arc::new(schema), vec![met_pt, jet_pt, n_jet, trigger, run]).unwrap()
    }

    #[test]
    fn record_batch_groups_nanoaod_columns() {
        let table = EventLoader::new().record_batch_to_table(&nano_batch()).unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(
            table.field("MET.pt").unwrap().as_scalars(),
            Some(&[10.0, 60.0, 90.0][..])
        );
        assert_eq!(table.field("HLT_IsoMu24").unwrap().as_scalars(), Some(&[1.0, 0.0, 1.0][..]));
        assert_eq!(table.field("nJet").unwrap().depth(), 1);

        let jets = table.field("Jet_pt").unwrap();
        assert_eq!(jets.depth(), 2);
        let max = jets.reduce(Reduction::Max).unwrap();
        assert_eq!(max[0], 50.0);
        assert!(max[1].is_nan());
        assert_eq!(max[2], 20.0);

        // string columns are skipped
        assert!(table.field("dataset").is_err());
    }

    #[test]
    fn grouping_can_be_disabled() {
        let table = EventLoader::new()
            .without_grouping()
            .record_batch_to_table(&nano_batch())
            .unwrap();
        assert!(table.field_paths().contains(&"MET_pt".to_string()));
        assert!(table.field("MET_pt").is_ok());
    }

    #[test]
    fn struct_of_lists_and_list_of_structs() {
        let pt: ArrayRef = Arc::new(Float32Array::from(vec![30.0, 50.0, 20.0]));
        let eta: ArrayRef = Arc::new(Float32Array::from(vec![0.5, -1.0, 2.0]));
        let fields = vec![
            Field::new("pt", DataType::Float32, false),
            Field::new("eta", DataType::Float32, false),
        ];
        let jets = StructArray::try_new(fields.clone().into(), vec![pt, eta], None).unwrap();
        let offsets = arrow::buffer::OffsetBuffer::new(vec![0i32, 2, 2, 3].into());
        let item = Arc::new(Field::new("item", DataType::Struct(fields.into()), true));
        let jet_list: ArrayRef =
            Arc::new(ListArray::try_new(item, offsets, Arc::new(jets), None).unwrap());

        let schema = Schema::new(vec![Field::new("Jet", jet_list.data_type().clone(), true)]);
        let batch = RecordBatch::try_new(Arc::new(schema), vec![jet_list]).unwrap();
        let table = EventLoader::new().record_batch_to_table(&batch).unwrap();

        let eta = table.field("Jet_eta").unwrap();
        assert_eq!(eta.depth(), 2);
        assert_eq!(eta.reduce(Reduction::Min).unwrap()[0], -1.0);
        assert_eq!(table.field("Jet_pt").unwrap().reduce(Reduction::Max).unwrap()[2], 20.0);
    }

    #[test]
    fn test_parquet_loading_with_entry_stop() {
        let batch = nano_batch();
        let file: NamedTempFile = tempfile::Builder::new().suffix(".parquet").tempfile().unwrap();
        let mut writer =
            parquet::arrow::ArrowWriter::try_new(file.reopen().unwrap(), batch.schema(), None)
                .unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();

        let table = EventLoader::new().load(file.path()).unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.field("Jet_pt").unwrap().depth(), 2);

        let limited = EventLoader::new()
            .with_entry_stop(Some(2))
            .with_batch_size(1)
            .load_parquet(file.path())
            .unwrap();
        assert_eq!(limited.len(), 2);
        assert_eq!(limited.field("Jet_pt").unwrap().len(), 2);
        assert_eq!(limited.field("MET_pt").unwrap().as_scalars(), Some(&[10.0, 60.0][..]));
    }

    #[test]
    fn test_parquet_loading_nonexistent_file() {
        let result = EventLoader::new().load_parquet("/path/that/does/not/exist.parquet");
        match result.unwrap_err() {
            hc_types::HcError::Data(DataError::SourceNotFound(_)) => {}
            other => panic!("Expected SourceNotFound error, got: {:?}", other),
        }
    }

    #[test]
    fn test_csv_loading() {
        let mut temp_file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(temp_file, "MET_pt,Electron_pt,isSignal,comment").unwrap();
        writeln!(temp_file, "10.0,25.5,true,low").unwrap();
        writeln!(temp_file, "60.0,,false,high").unwrap();
        writeln!(temp_file, "90.0,40,1,high").unwrap();
        temp_file.flush().unwrap();

        let table = EventLoader::new().load(temp_file.path()).unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(
            table.field("MET_pt").unwrap().as_scalars(),
            Some(&[10.0, 60.0, 90.0][..])
        );
        let electrons = table.field("Electron.pt").unwrap().as_scalars().unwrap();
        assert!(electrons[1].is_nan());
        assert_eq!(table.field("isSignal").unwrap().as_scalars(), Some(&[1.0, 0.0, 1.0][..]));
        assert!(table.field("comment").is_err());

        let limited = EventLoader::new()
            .with_entry_stop(Some(1))
            .load_csv(temp_file.path())
            .unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let err = EventLoader::new().load("events.root").unwrap_err();
        assert!(err.to_string().contains("cannot infer input format"));
        assert_eq!(DataFormat::detect("a/b.PARQUET"), Some(DataFormat::Parquet));
        assert_eq!(DataFormat::detect("a/b.csv"), Some(DataFormat::Csv));
        assert_eq!(DataFormat::detect("a/b"), None);
    }
}
