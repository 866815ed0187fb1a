//! Biome affinity run over CSV files
//!
//! For each sample file `<base>.csv` writes `<base>_biomes.csv` and
//! `<base>_scores.csv`, plus `<base>_percentages.csv` /
//! `<base>_stabilized.csv` when requested.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::biomization::Biomization;
use crate::config::{SampleType, ToolConfig};
use crate::data::{read_relation_table, read_samples_csv, write_csv};
use crate::error::BiomeError;
use crate::mappings::{Biome, Taxa};
use crate::samples::{PollenSamples, SiteSamples, StabilizedSamples, TaxonColumns};

/// Files written for one site
#[derive(Debug, Clone, Serialize)]
pub struct SiteOutputs {
    pub site: String,
    pub levels: usize,
    pub biomes: PathBuf,
    pub scores: PathBuf,
    pub percentages: Option<PathBuf>,
    pub stabilized: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// Sample taxa missing from the taxa table (sorted)
    pub unmapped_taxa: Vec<String>,
    pub sites: Vec<SiteOutputs>,
}

/// Score every sample file against the biomes
pub fn run(
    config: &ToolConfig,
    taxa_path: &Path,
    biomes_path: &Path,
    sample_paths: &[PathBuf],
) -> Result<RunSummary> {
    config.validate()?;
    let sep = config.separator_byte();

    let taxa = read_relation_table::<Taxa>(taxa_path, sep)
        .with_context(|| format!("Failed to read taxa mapping: {:?}", taxa_path))?;
    let biomes = read_relation_table::<Biome>(biomes_path, sep)
        .with_context(|| format!("Failed to read biome mapping: {:?}", biomes_path))?;

    let biomization = Biomization::new(&taxa, &biomes);
    tracing::info!(
        "Relevance matrix: {} taxa x {} biomes",
        biomization.relevance().taxa().len(),
        biomization.biomes().len()
    );

    let sites = sample_paths
        .iter()
        .map(|path| read_site(config, path))
        .collect::<Result<Vec<_>>>()?;

    let site_refs: Vec<&dyn TaxonColumns> = sites.iter().map(|s| s as &dyn TaxonColumns).collect();
    let unmapped: Vec<String> = biomization.get_unmapped_taxa(&site_refs).into_iter().collect();
    if !unmapped.is_empty() {
        tracing::warn!(
            "Sample files contain {} taxa that are not mapped to any biome: {}",
            unmapped.len(),
            unmapped.join(", ")
        );
    }

    let mut outputs = Vec::with_capacity(sites.len());
    let mut stabilized_sites: Vec<StabilizedSamples> = Vec::with_capacity(sites.len());

    for (site, path) in sites.iter().zip(sample_paths) {
        tracing::info!("Reading samples from: {:?}", path);
        let base = path.with_extension("");

        let stabilized = site.get_stabilized(config.default_threshold, config.decimals);

        let percentages_path = if config.save_percentages {
            save_percentages(site, &base, config)?
        } else {
            None
        };

        let stabilized_path = if config.save_stabilized {
            let out = suffixed(&base, "stabilized");
            let mut df = stabilized.matrix().to_frame()?;
            write_csv(&mut df, &out, sep, Some(stabilized.decimals() as usize))
                .with_context(|| format!("Failed to write {:?}", out))?;
            tracing::info!("Wrote stabilized to: {:?}", out);
            Some(out)
        } else {
            None
        };

        outputs.push(SiteOutputs {
            site: path.display().to_string(),
            levels: stabilized.matrix().height(),
            biomes: suffixed(&base, "biomes"),
            scores: suffixed(&base, "scores"),
            percentages: percentages_path,
            stabilized: stabilized_path,
        });
        stabilized_sites.push(stabilized);
    }

    let affinities = biomization.get_biome_affinities(&stabilized_sites);

    for (affinity, output) in affinities.iter().zip(&outputs) {
        affinity
            .write_biomes_csv(&output.biomes, sep)
            .with_context(|| format!("Failed to write {:?}", output.biomes))?;
        affinity
            .write_scores_csv(&output.scores, sep)
            .with_context(|| format!("Failed to write {:?}", output.scores))?;

        let no_data = affinity.labels().iter().filter(|l| l.is_none()).count();
        if no_data > 0 {
            tracing::info!("{}: {} levels without mapped pollen", output.site, no_data);
        }
        tracing::info!("Wrote biomes to: {:?}", output.biomes);
        tracing::info!("Wrote scores to: {:?}", output.scores);
    }

    Ok(RunSummary {
        unmapped_taxa: unmapped,
        sites: outputs,
    })
}

fn read_site(config: &ToolConfig, path: &Path) -> Result<SiteSamples> {
    let matrix = read_samples_csv(path, config.separator_byte(), &config.index_columns)
        .with_context(|| format!("Failed to read samples: {:?}", path))?;
    let site = Some(path.display().to_string());

    Ok(match config.sample_type {
        SampleType::Counts => SiteSamples::Raw(PollenSamples::counts(matrix, site)),
        SampleType::Percentages => SiteSamples::Raw(PollenSamples::percentages(matrix, site)),
        SampleType::Stabilized => {
            SiteSamples::Stabilized(StabilizedSamples::new(matrix, config.decimals, site))
        }
    })
}

fn save_percentages(
    site: &SiteSamples,
    base: &Path,
    config: &ToolConfig,
) -> Result<Option<PathBuf>> {
    match site.get_percentages(Some(config.decimals)) {
        Ok(percentages) => {
            let out = suffixed(base, "percentages");
            let mut df = percentages.matrix().to_frame()?;
            write_csv(
                &mut df,
                &out,
                config.separator_byte(),
                Some(config.decimals as usize),
            )
            .with_context(|| format!("Failed to write {:?}", out))?;
            tracing::info!("Wrote percentages to: {:?}", out);
            Ok(Some(out))
        }
        Err(err @ BiomeError::UnsupportedConversion { .. }) => {
            tracing::warn!("Not saving percentages for {:?}: {}", site.site(), err);
            Ok(None)
        }
        Err(err) => Err(err.into()),
    }
}

/// `<base>_<suffix>.csv`
fn suffixed(base: &Path, suffix: &str) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(format!("_{}.csv", suffix));
    PathBuf::from(name)
}
