//! Biomization - joins taxa and biome PFT tables into a relevance matrix
//!
//! A taxon is relevant to a biome when at least one PFT links both of them.
//! The join keeps keys without a counterpart on the other side, so every
//! taxon of the taxa table gets a row and every biome of the biome table
//! gets a column (possibly all zeros).
//!
//! Besides the matrix, construction derives the per-biome taxon count used
//! by the scorer to break ties in favour of more specific biomes.

use std::collections::BTreeSet;
use std::sync::Arc;

use polars::prelude::*;
use rayon::prelude::*;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::affinity::{score_samples, AffinityResult};
use crate::error::Result;
use crate::mappings::{BiomePftTable, PftId, TaxaPftTable};
use crate::samples::{StabilizedSamples, TaxonColumns};

/// Taxon × biome 0/1 relevance matrix
#[derive(Debug, Clone)]
pub struct RelevanceMatrix {
    taxa: Vec<String>,
    biomes: Vec<String>,
    taxon_index: FxHashMap<String, usize>,
    biome_index: FxHashMap<String, usize>,
    /// Row-major, `taxa.len() * biomes.len()`
    cells: Vec<u8>,
}

impl RelevanceMatrix {
    /// Taxa on the row axis, sorted
    pub fn taxa(&self) -> &[String] {
        &self.taxa
    }

    /// Biomes on the column axis, sorted
    pub fn biomes(&self) -> &[String] {
        &self.biomes
    }

    pub fn taxon_position(&self, taxon: &str) -> Option<usize> {
        self.taxon_index.get(taxon).copied()
    }

    pub fn contains_taxon(&self, taxon: &str) -> bool {
        self.taxon_index.contains_key(taxon)
    }

    /// Relevance of one (taxon, biome) pair; `None` if either is unknown
    pub fn get(&self, taxon: &str, biome: &str) -> Option<u8> {
        let t = self.taxon_position(taxon)?;
        let b = *self.biome_index.get(biome)?;
        Some(self.cells[t * self.biomes.len() + b])
    }

    /// One taxon's relevance across all biomes, in `biomes()` order
    pub fn row(&self, taxon: &str) -> Option<&[u8]> {
        self.taxon_position(taxon).map(|t| self.row_at(t))
    }

    pub(crate) fn row_at(&self, t: usize) -> &[u8] {
        let n = self.biomes.len();
        &self.cells[t * n..(t + 1) * n]
    }

    /// Column sums: number of taxa linked to each biome
    pub fn column_sums(&self) -> Vec<usize> {
        let mut sums = vec![0usize; self.biomes.len()];
        for t in 0..self.taxa.len() {
            for (sum, &cell) in sums.iter_mut().zip(self.row_at(t)) {
                *sum += cell as usize;
            }
        }
        sums
    }

    /// Matrix as a frame: `taxa` column plus one `u8` column per biome
    pub fn to_frame(&self) -> Result<DataFrame> {
        let mut columns = Vec::with_capacity(self.biomes.len() + 1);
        columns.push(Column::new("taxa".into(), self.taxa.as_slice()));

        let n = self.biomes.len();
        for (b, biome) in self.biomes.iter().enumerate() {
            let values: Vec<u8> = (0..self.taxa.len())
                .map(|t| self.cells[t * n + b])
                .collect();
            columns.push(Column::new(biome.as_str().into(), values));
        }

        Ok(DataFrame::new(columns)?)
    }
}

/// Relevance matrix plus the tie-break statistics derived from it
#[derive(Debug, Clone)]
pub struct Biomization {
    relevance: RelevanceMatrix,
    taxon_counts: Vec<usize>,
    specificity_decimals: u32,
}

impl Biomization {
    /// Join the taxa and biome tables on PFT
    pub fn new(taxa_pfts: &TaxaPftTable, biome_pfts: &BiomePftTable) -> Self {
        let taxa: Vec<String> = taxa_pfts.keys().into_iter().map(str::to_string).collect();
        let biomes: Vec<String> = biome_pfts.keys().into_iter().map(str::to_string).collect();

        let taxon_index: FxHashMap<String, usize> = taxa
            .iter()
            .enumerate()
            .map(|(i, t)| (t.clone(), i))
            .collect();
        let biome_index: FxHashMap<String, usize> = biomes
            .iter()
            .enumerate()
            .map(|(i, b)| (b.clone(), i))
            .collect();

        // PFT -> biome columns linked through it
        let mut biomes_by_pft: FxHashMap<&PftId, Vec<usize>> = FxHashMap::default();
        for relation in biome_pfts.linked() {
            let b = biome_index[relation.key.as_str()];
            biomes_by_pft.entry(&relation.pft).or_default().push(b);
        }

        let n_biomes = biomes.len();
        let mut cells = vec![0u8; taxa.len() * n_biomes];
        let mut taxa_pft_set: FxHashSet<&PftId> = FxHashSet::default();

        for relation in taxa_pfts.linked() {
            taxa_pft_set.insert(&relation.pft);
            let Some(linked_biomes) = biomes_by_pft.get(&relation.pft) else {
                continue;
            };
            let t = taxon_index[relation.key.as_str()];
            for &b in linked_biomes {
                cells[t * n_biomes + b] = 1;
            }
        }

        let biome_only = biomes_by_pft
            .keys()
            .filter(|pft| !taxa_pft_set.contains(*pft))
            .count();
        let taxa_only = taxa_pft_set
            .iter()
            .filter(|pft| !biomes_by_pft.contains_key(*pft))
            .count();

        let relevance = RelevanceMatrix {
            taxa,
            biomes,
            taxon_index,
            biome_index,
            cells,
        };

        let taxon_counts = relevance.column_sums();
        let max_count = taxon_counts.iter().copied().max().unwrap_or(0);
        let specificity_decimals = specificity_decimal_count(max_count);

        tracing::debug!(
            "Relevance matrix: {} taxa x {} biomes ({} PFTs only on taxa side, {} only on biome side)",
            relevance.taxa.len(),
            relevance.biomes.len(),
            taxa_only,
            biome_only
        );
        tracing::debug!(
            "Largest biome has {} taxa -> {} specificity decimals",
            max_count,
            specificity_decimals
        );

        Biomization {
            relevance,
            taxon_counts,
            specificity_decimals,
        }
    }

    pub fn relevance(&self) -> &RelevanceMatrix {
        &self.relevance
    }

    pub fn biomes(&self) -> &[String] {
        self.relevance.biomes()
    }

    /// Taxa linked to each biome, in `biomes()` order
    pub fn taxon_counts(&self) -> &[usize] {
        &self.taxon_counts
    }

    /// Extra decimals reserved below the sample precision for tie-breaking
    pub fn specificity_decimals(&self) -> u32 {
        self.specificity_decimals
    }

    /// Tie-break penalty per biome for samples rounded to `sample_decimals`
    ///
    /// `taxon_count * 10^-(sample_decimals + specificity_decimals)`, which
    /// is monotonic in the taxon count and stays below half a sample unit.
    pub fn specificity(&self, sample_decimals: u32) -> Vec<f64> {
        let exponent = (sample_decimals + self.specificity_decimals) as i32;
        let scale = 10f64.powi(exponent);
        self.taxon_counts
            .iter()
            .map(|&count| count as f64 / scale)
            .collect()
    }

    /// Sample taxa that have no row in the relevance matrix
    pub fn get_unmapped_taxa(&self, samples: &[&dyn TaxonColumns]) -> BTreeSet<String> {
        samples
            .iter()
            .flat_map(|s| s.taxon_names())
            .filter(|taxon| !self.relevance.contains_taxon(taxon))
            .map(str::to_string)
            .collect()
    }

    /// Score every sample row against every biome
    pub fn get_biome_affinity(&self, samples: &StabilizedSamples) -> AffinityResult {
        let specificity: Arc<[f64]> = self.specificity(samples.decimals()).into();
        score_samples(&self.relevance, specificity, samples)
    }

    /// Score independent sites in parallel; results keep the input order
    pub fn get_biome_affinities(&self, sites: &[StabilizedSamples]) -> Vec<AffinityResult> {
        sites
            .par_iter()
            .map(|samples| self.get_biome_affinity(samples))
            .collect()
    }
}

/// Digits needed so that every penalty stays below half a sample unit
///
/// Sized from twice the largest count: 191 taxa -> 382 -> 3 digits,
/// 1 taxon -> 2 -> 1 digit. For counts whose leading digit is 5-9 this
/// is deliberately one more than the digit count of the count itself
/// (5 -> 10 -> 2 digits).
fn specificity_decimal_count(max_count: usize) -> u32 {
    let mut n = max_count.saturating_mul(2);
    let mut digits = 1;
    while n >= 10 {
        n /= 10;
        digits += 1;
    }
    digits
}
