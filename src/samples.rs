//! Pollen samples
//!
//! A site is a table of levels (identified by one or more index columns,
//! usually depth) by taxa. Raw counts are turned into percentages and then
//! into stabilized values (threshold, clip, square root, round) before they
//! are scored against the biomes.

use polars::prelude::*;
use rustc_hash::FxHashSet;

use crate::error::{BiomeError, Result};

/// Anything that exposes a set of taxon column names
pub trait TaxonColumns {
    fn taxon_names(&self) -> Vec<&str>;
}

/// Identifier columns + taxa × levels values
#[derive(Debug, Clone)]
pub struct SampleMatrix {
    index: DataFrame,
    taxa: Vec<String>,
    /// Row-major, one row per level
    values: Vec<Vec<f64>>,
}

impl SampleMatrix {
    /// Taxon names are trimmed and must be unique
    pub fn new(index: DataFrame, taxa: Vec<String>, values: Vec<Vec<f64>>) -> Result<Self> {
        if index.height() != values.len() {
            return Err(BiomeError::InvalidSamples(format!(
                "index has {} rows but there are {} value rows",
                index.height(),
                values.len()
            )));
        }
        if let Some((row, bad)) = values
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != taxa.len())
        {
            return Err(BiomeError::InvalidSamples(format!(
                "row {} has {} values for {} taxa",
                row,
                bad.len(),
                taxa.len()
            )));
        }

        let taxa: Vec<String> = taxa.into_iter().map(|t| t.trim().to_string()).collect();
        let mut seen = FxHashSet::default();
        if let Some(duplicate) = taxa.iter().find(|t| !seen.insert(t.as_str())) {
            return Err(BiomeError::InvalidSamples(format!(
                "taxon {:?} appears more than once",
                duplicate
            )));
        }

        Ok(SampleMatrix {
            index,
            taxa,
            values,
        })
    }

    /// Split a frame into index columns (by position) and taxon columns
    ///
    /// Taxon columns must be numeric; null cells count as zero.
    pub fn from_frame(df: &DataFrame, index_columns: &[usize]) -> Result<Self> {
        if index_columns.is_empty() {
            return Err(BiomeError::InvalidSamples(
                "at least one index column is required".to_string(),
            ));
        }

        let columns = df.get_columns();
        if let Some(&bad) = index_columns.iter().find(|&&i| i >= columns.len()) {
            return Err(BiomeError::InvalidSamples(format!(
                "index column {} is out of range ({} columns)",
                bad,
                columns.len()
            )));
        }

        let index_cols: Vec<Column> = index_columns.iter().map(|&i| columns[i].clone()).collect();
        let index = DataFrame::new(index_cols)?;

        let taxon_cols: Vec<&Column> = columns
            .iter()
            .enumerate()
            .filter(|(i, _)| !index_columns.contains(i))
            .map(|(_, c)| c)
            .collect();

        if taxon_cols.is_empty() {
            return Err(BiomeError::InvalidSamples("no taxon columns".to_string()));
        }

        let mut values = vec![Vec::with_capacity(taxon_cols.len()); df.height()];
        let mut taxa = Vec::with_capacity(taxon_cols.len());

        for col in taxon_cols {
            let name = col.name().to_string();
            let numeric = col
                .as_materialized_series()
                .strict_cast(&DataType::Float64)
                .map_err(|_| {
                    BiomeError::InvalidSamples(format!(
                        "taxon column '{}' is not numeric ({})",
                        name,
                        col.dtype()
                    ))
                })?;

            for (row, value) in values.iter_mut().zip(numeric.f64()?.into_iter()) {
                row.push(value.unwrap_or(0.0));
            }
            taxa.push(name);
        }

        Self::new(index, taxa, values)
    }

    /// Identifier columns (one row per level)
    pub fn index(&self) -> &DataFrame {
        &self.index
    }

    pub fn taxa(&self) -> &[String] {
        &self.taxa
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.values
    }

    pub fn height(&self) -> usize {
        self.values.len()
    }

    /// Same index and taxa, every value replaced
    fn map_rows<F>(&self, mut f: F) -> SampleMatrix
    where
        F: FnMut(&[f64]) -> Vec<f64>,
    {
        SampleMatrix {
            index: self.index.clone(),
            taxa: self.taxa.clone(),
            values: self.values.iter().map(|row| f(row)).collect(),
        }
    }

    /// Index columns followed by one `f64` column per taxon
    pub fn to_frame(&self) -> Result<DataFrame> {
        let mut columns: Vec<Column> = self.index.get_columns().to_vec();
        for (j, taxon) in self.taxa.iter().enumerate() {
            let values: Vec<f64> = self.values.iter().map(|row| row[j]).collect();
            columns.push(Column::new(taxon.as_str().into(), values));
        }
        Ok(DataFrame::new(columns)?)
    }
}

impl TaxonColumns for SampleMatrix {
    fn taxon_names(&self) -> Vec<&str> {
        self.taxa.iter().map(String::as_str).collect()
    }
}

/// What the values of a raw sample table mean
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleKind {
    Counts,
    Percentages,
}

/// Counts or percentages for one site
#[derive(Debug, Clone)]
pub struct PollenSamples {
    kind: SampleKind,
    matrix: SampleMatrix,
    site: Option<String>,
}

impl PollenSamples {
    pub fn new(kind: SampleKind, matrix: SampleMatrix, site: Option<String>) -> Self {
        PollenSamples { kind, matrix, site }
    }

    pub fn counts(matrix: SampleMatrix, site: Option<String>) -> Self {
        Self::new(SampleKind::Counts, matrix, site)
    }

    pub fn percentages(matrix: SampleMatrix, site: Option<String>) -> Self {
        Self::new(SampleKind::Percentages, matrix, site)
    }

    pub fn kind(&self) -> SampleKind {
        self.kind
    }

    pub fn matrix(&self) -> &SampleMatrix {
        &self.matrix
    }

    pub fn site(&self) -> Option<&str> {
        self.site.as_deref()
    }

    /// Percentages of each level's total, optionally rounded
    ///
    /// Levels with a zero total stay at zero.
    pub fn get_percentages(&self, decimals: Option<u32>) -> PollenSamples {
        let round = |v: f64| decimals.map_or(v, |d| round_to(v, d));

        let matrix = match self.kind {
            SampleKind::Counts => self.matrix.map_rows(|row| {
                let total: f64 = row.iter().sum();
                row.iter()
                    .map(|&count| {
                        if total > 0.0 {
                            round(count * 100.0 / total)
                        } else {
                            0.0
                        }
                    })
                    .collect()
            }),
            SampleKind::Percentages if decimals.is_some() => {
                self.matrix.map_rows(|row| row.iter().map(|&v| round(v)).collect())
            }
            SampleKind::Percentages => self.matrix.clone(),
        };

        PollenSamples::percentages(matrix, self.site.clone())
    }

    /// `round(sqrt(max(percentage - threshold, 0)), decimals)`
    pub fn get_stabilized(&self, default_threshold: f64, decimals: u32) -> StabilizedSamples {
        let percentages = self.get_percentages(None);

        let matrix = percentages.matrix.map_rows(|row| {
            row.iter()
                .map(|&p| round_to((p - default_threshold).max(0.0).sqrt(), decimals))
                .collect()
        });

        StabilizedSamples::new(matrix, decimals, self.site.clone())
    }
}

impl TaxonColumns for PollenSamples {
    fn taxon_names(&self) -> Vec<&str> {
        self.matrix.taxon_names()
    }
}

/// Stabilized values with their declared decimal precision
#[derive(Debug, Clone)]
pub struct StabilizedSamples {
    matrix: SampleMatrix,
    decimals: u32,
    site: Option<String>,
}

impl StabilizedSamples {
    pub fn new(matrix: SampleMatrix, decimals: u32, site: Option<String>) -> Self {
        StabilizedSamples {
            matrix,
            decimals,
            site,
        }
    }

    pub fn matrix(&self) -> &SampleMatrix {
        &self.matrix
    }

    pub fn decimals(&self) -> u32 {
        self.decimals
    }

    pub fn site(&self) -> Option<&str> {
        self.site.as_deref()
    }
}

impl TaxonColumns for StabilizedSamples {
    fn taxon_names(&self) -> Vec<&str> {
        self.matrix.taxon_names()
    }
}

/// One site as read from disk, in whatever form it was supplied
#[derive(Debug, Clone)]
pub enum SiteSamples {
    Raw(PollenSamples),
    Stabilized(StabilizedSamples),
}

impl SiteSamples {
    pub fn site(&self) -> Option<&str> {
        match self {
            SiteSamples::Raw(s) => s.site(),
            SiteSamples::Stabilized(s) => s.site(),
        }
    }

    pub fn matrix(&self) -> &SampleMatrix {
        match self {
            SiteSamples::Raw(s) => s.matrix(),
            SiteSamples::Stabilized(s) => s.matrix(),
        }
    }

    /// Fails for stabilized input: the transform is not invertible
    pub fn get_percentages(&self, decimals: Option<u32>) -> Result<PollenSamples> {
        match self {
            SiteSamples::Raw(s) => Ok(s.get_percentages(decimals)),
            SiteSamples::Stabilized(_) => Err(BiomeError::UnsupportedConversion {
                from: "stabilized",
                to: "percentages",
            }),
        }
    }

    /// Already-stabilized input is returned as is
    pub fn get_stabilized(&self, default_threshold: f64, decimals: u32) -> StabilizedSamples {
        match self {
            SiteSamples::Raw(s) => s.get_stabilized(default_threshold, decimals),
            SiteSamples::Stabilized(s) => s.clone(),
        }
    }
}

impl TaxonColumns for SiteSamples {
    fn taxon_names(&self) -> Vec<&str> {
        self.matrix().taxon_names()
    }
}

/// Round half to even, matching how the percentages are usually tabulated
pub fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round_ties_even() / factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn matrix(taxa: &[&str], rows: Vec<Vec<f64>>) -> SampleMatrix {
        let depths: Vec<i64> = (0..rows.len() as i64).map(|i| i * 10).collect();
        let index = DataFrame::new(vec![Column::new("depth".into(), depths)]).unwrap();
        SampleMatrix::new(index, taxa.iter().map(|t| t.to_string()).collect(), rows).unwrap()
    }

    #[test]
    fn test_get_taxa() {
        let counts = PollenSamples::counts(
            matrix(&["Taxa A", "Taxa B", "Taxa C"], vec![vec![1.0, 0.0, 1.0]]),
            None,
        );
        assert_eq!(counts.taxon_names(), vec!["Taxa A", "Taxa B", "Taxa C"]);
    }

    #[test]
    fn test_calculate_percentages() {
        let counts = PollenSamples::counts(
            matrix(
                &["TaxaA", "TaxaB", "TaxaC"],
                vec![vec![5.0, 0.0, 15.0], vec![1.0, 2.0, 7.0]],
            ),
            Some("site".into()),
        );

        let percentages = counts.get_percentages(None);

        assert_eq!(percentages.kind(), SampleKind::Percentages);
        assert_eq!(percentages.site(), Some("site"));
        let rows = percentages.matrix().rows();
        assert_relative_eq!(rows[0][0], 25.0);
        assert_relative_eq!(rows[0][1], 0.0);
        assert_relative_eq!(rows[0][2], 75.0);
        assert_relative_eq!(rows[1][0], 10.0);
        assert_relative_eq!(rows[1][1], 20.0);
        assert_relative_eq!(rows[1][2], 70.0);
    }

    #[test]
    fn test_zero_total_level_stays_zero() {
        let counts = PollenSamples::counts(matrix(&["A", "B"], vec![vec![0.0, 0.0]]), None);
        let percentages = counts.get_percentages(Some(1));
        assert_eq!(percentages.matrix().rows()[0], vec![0.0, 0.0]);
    }

    #[test]
    fn test_stabilized_values() {
        let counts = PollenSamples::counts(
            matrix(&["taxa1", "taxa2", "taxa3"], vec![vec![1.0, 4.0, 45.0]]),
            None,
        );

        let stabilized = counts.get_stabilized(0.5, 1);

        assert_eq!(stabilized.decimals(), 1);
        assert_eq!(stabilized.matrix().rows()[0], vec![1.2, 2.7, 9.5]);
    }

    #[test]
    fn test_stabilized_with_high_threshold_clips_to_zero() {
        let percentages = PollenSamples::percentages(
            matrix(
                &["taxa1", "taxa2", "taxa3"],
                vec![vec![1.0, 9.0, 90.0], vec![50.0, 40.0, 10.0]],
            ),
            None,
        );

        let stabilized = percentages.get_stabilized(10.5, 3);
        let rows = stabilized.matrix().rows();

        assert_eq!(rows[0], vec![0.0, 0.0, 8.916]);
        assert_eq!(rows[1], vec![6.285, 5.431, 0.0]);
    }

    #[test]
    fn test_stabilized_site_cannot_give_percentages() {
        let site = SiteSamples::Stabilized(StabilizedSamples::new(
            matrix(&["A"], vec![vec![1.0]]),
            2,
            None,
        ));
        assert!(matches!(
            site.get_percentages(None),
            Err(BiomeError::UnsupportedConversion { .. })
        ));
        assert_eq!(site.get_stabilized(0.5, 1).decimals(), 2);
    }

    #[test]
    fn test_from_frame_splits_index_and_taxa() {
        let df = df!(
            "depth" => [10i64, 20],
            " Pinus " => [1i64, 2],
            "Betula" => [Some(3.5), None]
        )
        .unwrap();

        let samples = SampleMatrix::from_frame(&df, &[0]).unwrap();

        assert_eq!(samples.index().width(), 1);
        assert_eq!(samples.taxa(), ["Pinus", "Betula"]);
        assert_eq!(samples.rows(), [vec![1.0, 3.5], vec![2.0, 0.0]]);
    }

    #[test]
    fn test_duplicate_taxa_are_rejected() {
        let index = DataFrame::new(vec![Column::new("depth".into(), [10i64])]).unwrap();
        let taxa = vec!["Pinus".to_string(), " Pinus ".to_string()];

        let err = SampleMatrix::new(index, taxa, vec![vec![1.0, 2.0]]).unwrap_err();

        assert!(matches!(err, BiomeError::InvalidSamples(ref msg) if msg.contains("Pinus")));
    }

    #[test]
    fn test_from_frame_rejects_text_taxa() {
        let df = df!("depth" => [10i64], "Pinus" => ["many"]).unwrap();
        assert!(matches!(
            SampleMatrix::from_frame(&df, &[0]),
            Err(BiomeError::InvalidSamples(_))
        ));
        assert!(matches!(
            SampleMatrix::from_frame(&df, &[5]),
            Err(BiomeError::InvalidSamples(_))
        ));
    }

    #[test]
    fn test_round_half_even() {
        assert_eq!(round_to(2.5, 0), 2.0);
        assert_eq!(round_to(3.5, 0), 4.0);
        assert_eq!(round_to(1.2247, 1), 1.2);
    }
}
