//! Biome affinity scoring
//!
//! For every sample level and biome:
//!
//! ```text
//! raw   = Σ sample[taxon] * relevance[taxon, biome]
//! score = max(raw - specificity[biome], 0)
//! ```
//!
//! `specificity` is a penalty below the sample precision that grows with the
//! number of taxa linked to a biome, so exact ties go to the more specific
//! biome while genuinely different scores keep their order. A level whose
//! raw total is zero has no winning biome.

use std::path::Path;
use std::sync::Arc;

use polars::prelude::*;

use crate::biomization::RelevanceMatrix;
use crate::data::write_csv;
use crate::error::{BiomeError, Result};
use crate::samples::{round_to, StabilizedSamples};

/// Label written for levels without any mapped pollen
pub const NO_DATA_LABEL: &str = "N/A";

/// Column name of the winning biome in exported label tables
pub const BIOME_LABEL_COLUMN: &str = "Biome";

/// Per-level biome scores and winning biome for one site
#[derive(Debug, Clone)]
pub struct AffinityResult {
    index: DataFrame,
    biomes: Vec<String>,
    scores: Vec<Vec<f64>>,
    winners: Vec<Option<usize>>,
    site: Option<String>,
    decimals: u32,
    specificity: Arc<[f64]>,
}

pub(crate) fn score_samples(
    relevance: &RelevanceMatrix,
    specificity: Arc<[f64]>,
    samples: &StabilizedSamples,
) -> AffinityResult {
    let matrix = samples.matrix();
    let n_biomes = relevance.biomes().len();
    let n_taxa = relevance.taxa().len();

    // Sample column -> relevance row; unmapped taxa are dropped here
    let positions: Vec<Option<usize>> = matrix
        .taxa()
        .iter()
        .map(|taxon| relevance.taxon_position(taxon))
        .collect();

    let mut scores = Vec::with_capacity(matrix.height());
    let mut winners = Vec::with_capacity(matrix.height());
    let mut aligned = vec![0.0f64; n_taxa];

    for row in matrix.rows() {
        // Sum in relevance order so column order in the sample cannot change the result
        aligned.iter_mut().for_each(|v| *v = 0.0);
        for (&value, position) in row.iter().zip(&positions) {
            if let Some(t) = position {
                aligned[*t] = value;
            }
        }

        let mut raw = vec![0.0f64; n_biomes];
        for (t, &value) in aligned.iter().enumerate() {
            if value == 0.0 {
                continue;
            }
            for (acc, &cell) in raw.iter_mut().zip(relevance.row_at(t)) {
                if cell == 1 {
                    *acc += value;
                }
            }
        }

        let total: f64 = raw.iter().sum();
        let adjusted: Vec<f64> = raw
            .iter()
            .zip(specificity.iter())
            .map(|(r, s)| r - s)
            .collect();

        winners.push(select_winner(&adjusted, total));
        scores.push(adjusted.into_iter().map(|s| s.max(0.0)).collect());
    }

    AffinityResult {
        index: matrix.index().clone(),
        biomes: relevance.biomes().to_vec(),
        scores,
        winners,
        site: samples.site().map(str::to_string),
        decimals: samples.decimals(),
        specificity,
    }
}

/// Arg-max (first biome wins exact ties), or none when the total is zero
fn select_winner(values: &[f64], total: f64) -> Option<usize> {
    if total == 0.0 {
        return None;
    }
    let mut best: Option<(usize, f64)> = None;
    for (idx, &value) in values.iter().enumerate() {
        match best {
            Some((_, current)) if value <= current => {}
            _ => best = Some((idx, value)),
        }
    }
    best.map(|(idx, _)| idx)
}

impl AffinityResult {
    /// Identifier columns of the scored levels
    pub fn index(&self) -> &DataFrame {
        &self.index
    }

    pub fn biomes(&self) -> &[String] {
        &self.biomes
    }

    /// Row-major scores, columns in `biomes()` order
    pub fn scores(&self) -> &[Vec<f64>] {
        &self.scores
    }

    pub fn score(&self, row: usize, biome: &str) -> Option<f64> {
        let b = self.biomes.iter().position(|name| name == biome)?;
        self.scores.get(row).map(|r| r[b])
    }

    /// Winning biome per level, `None` for levels without data
    pub fn labels(&self) -> Vec<Option<&str>> {
        self.winners
            .iter()
            .map(|w| w.map(|b| self.biomes[b].as_str()))
            .collect()
    }

    /// Winning biome per level with `N/A` for levels without data
    pub fn biome_labels(&self) -> Vec<&str> {
        self.labels()
            .into_iter()
            .map(|l| l.unwrap_or(NO_DATA_LABEL))
            .collect()
    }

    pub fn site(&self) -> Option<&str> {
        self.site.as_deref()
    }

    /// Decimal precision of the scored samples
    pub fn decimals(&self) -> u32 {
        self.decimals
    }

    /// Tie-break penalty applied to each biome
    pub fn specificity(&self) -> &[f64] {
        &self.specificity
    }

    /// New result from transformed scores
    ///
    /// Site, precision and specificity carry over unchanged; labels are
    /// re-derived from the new scores (zero row total means no data).
    pub fn transform<F>(&self, f: F) -> Result<AffinityResult>
    where
        F: FnOnce(&[Vec<f64>]) -> Vec<Vec<f64>>,
    {
        let scores = f(&self.scores);

        let expected_rows = self.scores.len();
        let expected_cols = self.biomes.len();
        let cols = scores.first().map_or(expected_cols, Vec::len);
        if scores.len() != expected_rows || scores.iter().any(|row| row.len() != expected_cols) {
            return Err(BiomeError::ShapeMismatch {
                expected_rows,
                expected_cols,
                rows: scores.len(),
                cols,
            });
        }

        let winners = scores
            .iter()
            .map(|row| select_winner(row, row.iter().sum()))
            .collect();

        Ok(AffinityResult {
            index: self.index.clone(),
            biomes: self.biomes.clone(),
            scores,
            winners,
            site: self.site.clone(),
            decimals: self.decimals,
            specificity: Arc::clone(&self.specificity),
        })
    }

    /// Scores rounded to `decimals` places
    pub fn round(&self, decimals: u32) -> AffinityResult {
        let rounded: Vec<Vec<f64>> = self
            .scores
            .iter()
            .map(|row| row.iter().map(|&s| round_to(s, decimals)).collect())
            .collect();

        AffinityResult {
            index: self.index.clone(),
            biomes: self.biomes.clone(),
            winners: rounded
                .iter()
                .map(|row| select_winner(row, row.iter().sum()))
                .collect(),
            scores: rounded,
            site: self.site.clone(),
            decimals: self.decimals,
            specificity: Arc::clone(&self.specificity),
        }
    }

    /// Index columns + `Biome`
    pub fn biomes_to_frame(&self) -> Result<DataFrame> {
        let mut columns: Vec<Column> = self.index.get_columns().to_vec();
        columns.push(Column::new(
            BIOME_LABEL_COLUMN.into(),
            self.biome_labels(),
        ));
        Ok(DataFrame::new(columns)?)
    }

    /// Index columns + one score column per biome
    pub fn scores_to_frame(&self) -> Result<DataFrame> {
        let mut columns: Vec<Column> = self.index.get_columns().to_vec();
        for (b, biome) in self.biomes.iter().enumerate() {
            let values: Vec<f64> = self.scores.iter().map(|row| row[b]).collect();
            columns.push(Column::new(biome.as_str().into(), values));
        }
        Ok(DataFrame::new(columns)?)
    }

    pub fn write_biomes_csv(&self, path: &Path, separator: u8) -> Result<()> {
        let mut df = self.biomes_to_frame()?;
        write_csv(&mut df, path, separator, None)
    }

    /// Scores are formatted with the sample precision
    pub fn write_scores_csv(&self, path: &Path, separator: u8) -> Result<()> {
        let mut df = self.scores_to_frame()?;
        write_csv(&mut df, path, separator, Some(self.decimals as usize))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::biomization::Biomization;
    use crate::mappings::{BiomePftTable, PftList, TaxaPftTable};
    use crate::samples::SampleMatrix;
    use approx::assert_relative_eq;

    fn one_to_one() -> Biomization {
        let taxa = TaxaPftTable::from_lists(vec![
            PftList::new("t1", ["PFT1"]),
            PftList::new("t2", ["PFT2"]),
        ]);
        let biomes = BiomePftTable::from_lists(vec![
            PftList::new("biome1", ["PFT1"]),
            PftList::new("biome2", ["PFT2"]),
            PftList::new("biome3", ["PFT3"]),
        ]);
        Biomization::new(&taxa, &biomes)
    }

    fn stabilized(taxa: &[&str], rows: Vec<Vec<f64>>, decimals: u32) -> StabilizedSamples {
        let depths: Vec<i64> = (1..=rows.len() as i64).collect();
        let index = DataFrame::new(vec![Column::new("depth".into(), depths)]).unwrap();
        let matrix =
            SampleMatrix::new(index, taxa.iter().map(|t| t.to_string()).collect(), rows).unwrap();
        StabilizedSamples::new(matrix, decimals, Some("site.csv".into()))
    }

    #[test]
    fn test_higher_raw_score_wins() {
        let biomization = one_to_one();
        let samples = stabilized(&["t1", "t2", "t3"], vec![vec![5.0, 10.0, 0.0]], 0);

        let result = biomization.get_biome_affinity(&samples);

        assert_eq!(result.biome_labels(), vec!["biome2"]);
        assert_relative_eq!(result.score(0, "biome1").unwrap(), 4.9, epsilon = 1e-9);
        assert_relative_eq!(result.score(0, "biome2").unwrap(), 9.9, epsilon = 1e-9);
        assert_eq!(result.score(0, "biome3"), Some(0.0));
    }

    #[test]
    fn test_tie_goes_to_biome_with_fewer_taxa() {
        // broad is linked to both taxa, narrow only to t1
        let taxa = TaxaPftTable::from_lists(vec![
            PftList::new("t1", ["a"]),
            PftList::new("t2", ["b"]),
        ]);
        let biomes = BiomePftTable::from_lists(vec![
            PftList::new("broad", ["a", "b"]),
            PftList::new("narrow", ["a"]),
        ]);
        let biomization = Biomization::new(&taxa, &biomes);
        let samples = stabilized(&["t1", "t2"], vec![vec![2.5, 0.0]], 1);

        let result = biomization.get_biome_affinity(&samples);

        assert_eq!(result.labels(), vec![Some("narrow")]);
        let broad = result.score(0, "broad").unwrap();
        let narrow = result.score(0, "narrow").unwrap();
        assert!(narrow > broad);
        assert!(2.5 - broad < 0.05);
    }

    #[test]
    fn test_tie_break_does_not_flip_distinct_scores() {
        // wide has 4 taxa and a score one unit higher than narrow
        let taxa = TaxaPftTable::from_lists(vec![
            PftList::new("t1", ["a"]),
            PftList::new("t2", ["b"]),
            PftList::new("t3", ["b"]),
            PftList::new("t4", ["b"]),
        ]);
        let biomes = BiomePftTable::from_lists(vec![
            PftList::new("wide", ["a", "b"]),
            PftList::new("narrow", ["a"]),
        ]);
        let biomization = Biomization::new(&taxa, &biomes);
        let samples = stabilized(&["t1", "t2"], vec![vec![1.0, 0.1]], 1);

        let result = biomization.get_biome_affinity(&samples);

        assert_eq!(result.labels(), vec![Some("wide")]);
    }

    #[test]
    fn test_zero_row_has_no_data() {
        let biomization = one_to_one();
        let samples = stabilized(
            &["t1", "t2"],
            vec![vec![0.0, 0.0], vec![1.0, 0.0]],
            2,
        );

        let result = biomization.get_biome_affinity(&samples);

        assert_eq!(result.biome_labels(), vec![NO_DATA_LABEL, "biome1"]);
        assert_eq!(result.scores()[0], vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_disjoint_taxa_give_no_data() {
        let biomization = one_to_one();
        let samples = stabilized(&["x", "y"], vec![vec![3.0, 4.0]], 1);

        let result = biomization.get_biome_affinity(&samples);

        assert_eq!(result.labels(), vec![None]);
        assert!(result.scores()[0].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_column_order_does_not_matter() {
        let biomization = one_to_one();
        let a = stabilized(&["t1", "t2", "zz"], vec![vec![0.3, 0.7, 9.0]], 1);
        let b = stabilized(&["zz", "t2", "t1"], vec![vec![9.0, 0.7, 0.3]], 1);

        let ra = biomization.get_biome_affinity(&a);
        let rb = biomization.get_biome_affinity(&b);

        assert_eq!(ra.scores(), rb.scores());
        assert_eq!(ra.labels(), rb.labels());
    }

    #[test]
    fn test_scoring_is_idempotent() {
        let biomization = one_to_one();
        let samples = stabilized(&["t1", "t2"], vec![vec![1.5, 1.5], vec![0.2, 0.0]], 1);

        let first = biomization.get_biome_affinity(&samples);
        let second = biomization.get_biome_affinity(&samples);

        assert_eq!(first.scores(), second.scores());
        assert_eq!(first.labels(), second.labels());
    }

    #[test]
    fn test_transform_keeps_site_precision_and_specificity() {
        let biomization = one_to_one();
        let samples = stabilized(&["t1", "t2"], vec![vec![5.0, 10.0]], 0);
        let result = biomization.get_biome_affinity(&samples);

        let halved = result
            .transform(|scores| {
                scores
                    .iter()
                    .map(|row| row.iter().map(|s| s / 2.0).collect())
                    .collect()
            })
            .unwrap();

        assert_eq!(halved.site(), Some("site.csv"));
        assert_eq!(halved.decimals(), 0);
        assert_eq!(halved.specificity(), result.specificity());
        assert_relative_eq!(halved.score(0, "biome2").unwrap(), 4.95, epsilon = 1e-9);
        assert_eq!(halved.labels(), vec![Some("biome2")]);

        // original is untouched
        assert_eq!(result.site(), Some("site.csv"));
        assert_relative_eq!(result.score(0, "biome2").unwrap(), 9.9, epsilon = 1e-9);
    }

    #[test]
    fn test_transform_to_zero_gives_no_data() {
        let biomization = one_to_one();
        let samples = stabilized(&["t1"], vec![vec![5.0]], 0);
        let result = biomization.get_biome_affinity(&samples);

        let zeroed = result
            .transform(|scores| scores.iter().map(|row| vec![0.0; row.len()]).collect())
            .unwrap();

        assert_eq!(zeroed.biome_labels(), vec![NO_DATA_LABEL]);
    }

    #[test]
    fn test_transform_rejects_shape_change() {
        let biomization = one_to_one();
        let samples = stabilized(&["t1"], vec![vec![5.0]], 0);
        let result = biomization.get_biome_affinity(&samples);

        let err = result
            .transform(|scores| scores.iter().map(|row| row[..1].to_vec()).collect())
            .unwrap_err();
        assert!(matches!(err, BiomeError::ShapeMismatch { cols: 1, .. }));
    }

    #[test]
    fn test_round_rederives_labels() {
        let biomization = one_to_one();
        let samples = stabilized(&["t1", "t2"], vec![vec![5.0, 10.0]], 0);
        let rounded = biomization.get_biome_affinity(&samples).round(0);

        assert_eq!(rounded.scores()[0], vec![5.0, 10.0, 0.0]);
        assert_eq!(rounded.labels(), vec![Some("biome2")]);
    }

    #[test]
    fn test_result_frames() {
        let biomization = one_to_one();
        let samples = stabilized(&["t1", "t2"], vec![vec![5.0, 10.0], vec![0.0, 0.0]], 0);
        let result = biomization.get_biome_affinity(&samples);

        let biomes = result.biomes_to_frame().unwrap();
        let names: Vec<String> = biomes
            .get_column_names()
            .iter()
            .map(|name| name.to_string())
            .collect();
        assert_eq!(names, ["depth", BIOME_LABEL_COLUMN]);
        let labels = biomes.column(BIOME_LABEL_COLUMN).unwrap().str().unwrap();
        assert_eq!(labels.get(0), Some("biome2"));
        assert_eq!(labels.get(1), Some(NO_DATA_LABEL));

        let scores = result.scores_to_frame().unwrap();
        assert_eq!(scores.shape(), (2, 4));
    }

    #[test]
    fn test_parallel_batch_matches_sequential() {
        let biomization = one_to_one();
        let sites = vec![
            stabilized(&["t1", "t2"], vec![vec![5.0, 10.0]], 0),
            stabilized(&["t2"], vec![vec![0.0], vec![3.0]], 1),
        ];

        let batch = biomization.get_biome_affinities(&sites);

        assert_eq!(batch.len(), 2);
        for (result, samples) in batch.iter().zip(&sites) {
            let single = biomization.get_biome_affinity(samples);
            assert_eq!(result.scores(), single.scores());
            assert_eq!(result.labels(), single.labels());
        }
    }
}
