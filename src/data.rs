//! Data Loading and Export
//!
//! CSV readers for PFT lists and pollen samples, and the CSV writer shared
//! by every exported table. PFT lists are ragged (one key followed by any
//! number of PFT ids), so they are read header-less into a frame of string
//! columns wide enough for the longest row.

use std::fs;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use polars::prelude::*;

use crate::error::{BiomeError, Result};
use crate::mappings::{PftList, RelationKey, RelationTable};
use crate::samples::SampleMatrix;

/// Read a header-less PFT list file
///
/// Example row: `Pinus,tsg,bec` (key, then PFT ids). Empty trailing fields
/// are ignored, so rows of different lengths are fine. Quoted fields may
/// contain the separator.
pub fn read_pft_list_csv(path: &Path, separator: u8) -> Result<Vec<PftList>> {
    let contents = fs::read_to_string(path)?;
    parse_pft_lists(&contents, separator)
}

fn parse_pft_lists(contents: &str, separator: u8) -> Result<Vec<PftList>> {
    let lines: Vec<&str> = contents
        .lines()
        .filter(|line| !line.trim().is_empty())
        .collect();

    // Upper bound on fields per row; quoted separators only lower the real count
    let width = lines
        .iter()
        .map(|line| line.bytes().filter(|&b| b == separator).count() + 1)
        .max()
        .unwrap_or(0);
    if width == 0 {
        return Ok(Vec::new());
    }

    let schema: Schema = (0..width)
        .map(|i| Field::new(format!("field_{}", i).into(), DataType::String))
        .collect();

    let df = CsvReadOptions::default()
        .with_has_header(false)
        .with_schema(Some(Arc::new(schema)))
        .with_parse_options(
            CsvParseOptions::default()
                .with_separator(separator)
                .with_truncate_ragged_lines(true),
        )
        .into_reader_with_file_handle(Cursor::new(lines.join("\n").into_bytes()))
        .finish()?;

    let fields = df
        .get_columns()
        .iter()
        .map(|c| c.str())
        .collect::<PolarsResult<Vec<_>>>()?;
    let Some((keys, pft_fields)) = fields.split_first() else {
        return Ok(Vec::new());
    };

    let lists = (0..df.height())
        .filter_map(|row| {
            let key = keys.get(row)?;
            let pfts = pft_fields
                .iter()
                .filter_map(|field| field.get(row))
                .map(str::trim)
                .filter(|pft| !pft.is_empty());
            Some(PftList::new(key.trim(), pfts))
        })
        .collect();

    Ok(lists)
}

/// Read a PFT list file straight into a relation table
pub fn read_relation_table<K: RelationKey>(
    path: &Path,
    separator: u8,
) -> Result<RelationTable<K>> {
    let lists = read_pft_list_csv(path, separator)?;
    let table = RelationTable::<K>::from_lists(lists);

    tracing::debug!(
        "Loaded {} {} relations from {:?}",
        table.len(),
        table.key_name(),
        path
    );

    Ok(table)
}

/// Read a sample table with a header row
///
/// `index_columns` are 0-based positions of the level identifier columns;
/// all other columns are taxa.
pub fn read_samples_csv(
    path: &Path,
    separator: u8,
    index_columns: &[usize],
) -> Result<SampleMatrix> {
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(None)
        .with_parse_options(CsvParseOptions::default().with_separator(separator))
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()?;

    if df.height() == 0 {
        return Err(BiomeError::InvalidSamples(format!(
            "{:?} has no sample rows",
            path
        )));
    }

    tracing::debug!("Read {:?}: {} levels x {} columns", path, df.height(), df.width());

    SampleMatrix::from_frame(&df, index_columns)
}

/// Write a frame as CSV, formatting floats with `float_precision` decimals
pub fn write_csv(
    df: &mut DataFrame,
    path: &Path,
    separator: u8,
    float_precision: Option<usize>,
) -> Result<()> {
    let mut file = fs::File::create(path)?;
    CsvWriter::new(&mut file)
        .include_header(true)
        .with_separator(separator)
        .with_float_precision(float_precision)
        .finish(df)?;
    Ok(())
}
