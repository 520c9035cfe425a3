//! Parquet snapshot writer.
//!
//! A snapshot is one run's complete dataset for one source, written to a
//! single file. Writes are atomic: the frame goes to `<path>.tmp` and is
//! renamed into place, so a failed write never leaves a file at `path`.
//!
//! The two datasets take different write paths:
//! - macro: column names sanitized, nothing else touched;
//! - market: additionally, a datetime `Date` column becomes Int64
//!   microseconds since the Unix epoch (`floor(epoch_ns / 1000)`).

use crate::domain::SnapshotInfo;
use crate::error::{PipelineError, Result, SchemaError};
use polars::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

pub const DATE_COLUMN: &str = "Date";

/// Which normalization a snapshot receives before it is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotKind {
    Macro,
    Market,
}

/// Replace spaces in column names with underscores.
pub fn sanitize_column_names(df: &mut DataFrame) -> Result<(), SchemaError> {
    let names: Vec<String> = df
        .get_column_names()
        .iter()
        .map(|n| n.replace(' ', "_"))
        .collect();
    df.set_column_names(names)?;
    Ok(())
}

/// Epoch nanoseconds → epoch microseconds, flooring like integer division on
/// negative values.
pub fn nanos_to_micros(nanos: i64) -> i64 {
    nanos.div_euclid(1_000)
}

/// Convert a datetime column to Int64 epoch microseconds.
///
/// An Int64 column is taken as already normalized and left as is, which
/// makes the conversion idempotent.
pub fn normalize_date_column(df: &mut DataFrame, column: &str) -> Result<(), SchemaError> {
    let col = df
        .column(column)
        .map_err(|_| SchemaError::MissingColumn {
            column: column.to_string(),
            context: "date normalization".into(),
        })?
        .clone();

    let unit = match col.dtype() {
        DataType::Int64 => return Ok(()),
        DataType::Datetime(unit, _) => *unit,
        other => {
            return Err(SchemaError::TypeMismatch {
                column: column.to_string(),
                actual: other.to_string(),
            })
        }
    };

    let raw = col.cast(&DataType::Int64)?;
    let micros: Vec<Option<i64>> = raw
        .i64()?
        .into_iter()
        .map(|v| {
            v.map(|v| match unit {
                TimeUnit::Nanoseconds => nanos_to_micros(v),
                TimeUnit::Microseconds => v,
                TimeUnit::Milliseconds => v * 1_000,
            })
        })
        .collect();

    df.with_column(Column::new(column.into(), micros))?;
    Ok(())
}

/// Writes snapshots into a local directory.
pub struct SnapshotWriter {
    dir: PathBuf,
}

impl SnapshotWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, file_name: &str) -> PathBuf {
        self.dir.join(file_name)
    }

    /// Normalize `df` for `kind` and write it as `<dir>/<file_name>`.
    pub fn write(
        &self,
        kind: SnapshotKind,
        df: &mut DataFrame,
        file_name: &str,
    ) -> Result<SnapshotInfo> {
        fs::create_dir_all(&self.dir).map_err(|e| PipelineError::io(&self.dir, e))?;
        let path = self.path_for(file_name);

        if kind == SnapshotKind::Market {
            normalize_date_column(df, DATE_COLUMN)?;
        }
        sanitize_column_names(df)?;

        let info = write_atomic(df, &path)?;
        info!(rows = info.rows, path = %path.display(), "Saved {} rows to {}", info.rows, path.display());
        Ok(info)
    }
}

/// Write `df` to `path` via a temporary sibling and a rename.
pub fn write_atomic(df: &mut DataFrame, path: &Path) -> Result<SnapshotInfo> {
    let tmp_path = path.with_extension("parquet.tmp");
    let rows = df.height();

    let written = fs::File::create(&tmp_path)
        .map_err(|e| PipelineError::io(&tmp_path, e))
        .and_then(|file| {
            ParquetWriter::new(file).finish(df).map_err(|e| {
                PipelineError::io(&tmp_path, std::io::Error::other(e.to_string()))
            })
        })
        .and_then(|_| fs::rename(&tmp_path, path).map_err(|e| PipelineError::io(path, e)));

    if let Err(e) = written {
        let _ = fs::remove_file(&tmp_path);
        return Err(e);
    }

    let bytes = fs::read(path).map_err(|e| PipelineError::io(path, e))?;
    Ok(SnapshotInfo {
        path: path.to_path_buf(),
        rows,
        content_hash: blake3::hash(&bytes).to_hex().to_string(),
    })
}

/// Read a snapshot back into a DataFrame.
pub fn read_snapshot(path: &Path) -> Result<DataFrame> {
    let file = fs::File::open(path).map_err(|e| PipelineError::io(path, e))?;
    ParquetReader::new(file)
        .finish()
        .map_err(|e| PipelineError::io(path, std::io::Error::other(e.to_string())))
}
