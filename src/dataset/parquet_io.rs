//! # Binary table I/O
//!
//! One Parquet file per day, written atomically and read back for the CSV
//! conversion pass and for verification. The schema is fixed: column names,
//! order and types never vary between days.

use std::fs::File;
use std::sync::Arc;

use arrow_array::{ArrayRef, Float64Array, Int32Array, RecordBatch};
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use camino::{Utf8Path, Utf8PathBuf};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;

use crate::corefit_errors::CorefitError;
use crate::dataset::{table_path, DailyDataset, TableRow};

/// Column names in schema order.
const COLUMNS: [&str; 19] = [
    "time",
    "status",
    "ion_instrument",
    "b_instrument",
    "bx",
    "by",
    "bz",
    "sigma_b",
    "n_p",
    "vp_x",
    "vp_y",
    "vp_z",
    "tp_par",
    "tp_perp",
    "vth_p_par",
    "vth_p_perp",
    "r_sun",
    "clat",
    "clong",
];

/// Arrow schema of a day table: MJD time, integer status and instrument
/// codes, Float64 physics columns. No column is nullable; withheld
/// quantities are stored as NaN.
pub fn table_schema() -> SchemaRef {
    let fields: Vec<Field> = COLUMNS
        .iter()
        .map(|name| {
            let data_type = match *name {
                "status" | "ion_instrument" | "b_instrument" => DataType::Int32,
                _ => DataType::Float64,
            };
            Field::new(*name, data_type, false)
        })
        .collect();
    Arc::new(Schema::new(fields))
}

/// Write one day's table, atomically replacing any previous rendition.
///
/// The batch goes to a `.tmp` sibling first and renames into place, so
/// readers never observe a half-written table and regeneration is
/// idempotent. Parent directories are created as needed; a failure after
/// the tmp file exists removes it before the error propagates. Callers
/// skip zero-row days; see the batch layer.
///
/// Return
/// ----------
/// * The final table path.
pub fn write_day(
    dataset: &DailyDataset,
    output_root: &Utf8Path,
) -> Result<Utf8PathBuf, CorefitError> {
    let path = table_path(output_root, dataset.key());
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let rows: Vec<TableRow> = dataset.rows().iter().map(TableRow::from).collect();
    let batch = rows_to_batch(&rows, table_schema())?;

    let tmp = Utf8PathBuf::from(format!("{path}.tmp"));
    let file = File::create(&tmp)?;
    if let Err(err) = finalize_table(file, &batch, &tmp, &path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(err);
    }

    Ok(path)
}

/// Write the batch to the open tmp file and swap it into place.
fn finalize_table(
    file: File,
    batch: &RecordBatch,
    tmp: &Utf8Path,
    path: &Utf8Path,
) -> Result<(), CorefitError> {
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)?;
    writer.write(batch)?;
    writer.close()?;
    std::fs::rename(tmp, path)?;
    Ok(())
}

/// Read a finalized day table back as stored rows.
///
/// The file schema is verified against [`table_schema`] before any batch
/// is decoded; a mismatch means the file was not produced by this pipeline.
pub fn read_day(path: &Utf8Path) -> Result<Vec<TableRow>, CorefitError> {
    let file = File::open(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;

    let expected = table_schema();
    if builder.schema().fields() != expected.fields() {
        let found: Vec<&str> = builder
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().as_str())
            .collect();
        return Err(CorefitError::InvalidTableSchema {
            path: path.to_owned(),
            reason: format!("unexpected columns {found:?}"),
        });
    }

    let reader = builder.build()?;
    let mut rows = Vec::new();
    for batch in reader {
        let batch = batch?;
        push_batch(&mut rows, &batch, path)?;
    }
    Ok(rows)
}

/// Assemble stored rows into one record batch in schema order.
fn rows_to_batch(rows: &[TableRow], schema: SchemaRef) -> Result<RecordBatch, CorefitError> {
    macro_rules! f64_column {
        ($field:ident) => {
            Arc::new(Float64Array::from_iter_values(
                rows.iter().map(|r| r.$field),
            ))
        };
    }
    macro_rules! i32_column {
        ($field:ident) => {
            Arc::new(Int32Array::from_iter_values(rows.iter().map(|r| r.$field)))
        };
    }

    let columns: Vec<ArrayRef> = vec![
        f64_column!(time_mjd),
        i32_column!(status),
        i32_column!(ion_instrument),
        i32_column!(b_instrument),
        f64_column!(bx),
        f64_column!(by),
        f64_column!(bz),
        f64_column!(sigma_b),
        f64_column!(n_p),
        f64_column!(vp_x),
        f64_column!(vp_y),
        f64_column!(vp_z),
        f64_column!(tp_par),
        f64_column!(tp_perp),
        f64_column!(vth_p_par),
        f64_column!(vth_p_perp),
        f64_column!(r_sun),
        f64_column!(clat),
        f64_column!(clong),
    ];

    Ok(RecordBatch::try_new(schema, columns)?)
}

/// Decode one batch into rows, verifying the physical column types.
fn push_batch(
    rows: &mut Vec<TableRow>,
    batch: &RecordBatch,
    path: &Utf8Path,
) -> Result<(), CorefitError> {
    let time = typed_column::<Float64Array>(batch, 0, path)?;
    let status = typed_column::<Int32Array>(batch, 1, path)?;
    let ion_instrument = typed_column::<Int32Array>(batch, 2, path)?;
    let b_instrument = typed_column::<Int32Array>(batch, 3, path)?;
    let bx = typed_column::<Float64Array>(batch, 4, path)?;
    let by = typed_column::<Float64Array>(batch, 5, path)?;
    let bz = typed_column::<Float64Array>(batch, 6, path)?;
    let sigma_b = typed_column::<Float64Array>(batch, 7, path)?;
    let n_p = typed_column::<Float64Array>(batch, 8, path)?;
    let vp_x = typed_column::<Float64Array>(batch, 9, path)?;
    let vp_y = typed_column::<Float64Array>(batch, 10, path)?;
    let vp_z = typed_column::<Float64Array>(batch, 11, path)?;
    let tp_par = typed_column::<Float64Array>(batch, 12, path)?;
    let tp_perp = typed_column::<Float64Array>(batch, 13, path)?;
    let vth_p_par = typed_column::<Float64Array>(batch, 14, path)?;
    let vth_p_perp = typed_column::<Float64Array>(batch, 15, path)?;
    let r_sun = typed_column::<Float64Array>(batch, 16, path)?;
    let clat = typed_column::<Float64Array>(batch, 17, path)?;
    let clong = typed_column::<Float64Array>(batch, 18, path)?;

    for i in 0..batch.num_rows() {
        rows.push(TableRow {
            time_mjd: time.value(i),
            status: status.value(i),
            ion_instrument: ion_instrument.value(i),
            b_instrument: b_instrument.value(i),
            bx: bx.value(i),
            by: by.value(i),
            bz: bz.value(i),
            sigma_b: sigma_b.value(i),
            n_p: n_p.value(i),
            vp_x: vp_x.value(i),
            vp_y: vp_y.value(i),
            vp_z: vp_z.value(i),
            tp_par: tp_par.value(i),
            tp_perp: tp_perp.value(i),
            vth_p_par: vth_p_par.value(i),
            vth_p_perp: vth_p_perp.value(i),
            r_sun: r_sun.value(i),
            clat: clat.value(i),
            clong: clong.value(i),
        });
    }
    Ok(())
}

fn typed_column<'a, A: 'static>(
    batch: &'a RecordBatch,
    index: usize,
    path: &Utf8Path,
) -> Result<&'a A, CorefitError> {
    batch
        .column(index)
        .as_any()
        .downcast_ref::<A>()
        .ok_or_else(|| CorefitError::InvalidTableSchema {
            path: path.to_owned(),
            reason: format!("column '{}' has an unexpected type", COLUMNS[index]),
        })
}
