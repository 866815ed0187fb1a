//! Command line entry point
//!
//! Usage:
//!   biome_scorer --taxas taxas.csv --biomes biomes.csv site1.csv site2.csv

use std::path::PathBuf;

use anyhow::Result;
use biome_scorer::config::{SampleType, ToolConfig};
use biome_scorer::tool;
use clap::{Parser, ValueEnum};
use tracing_subscriber::{fmt, EnvFilter};

/// Perform biome affinity analysis of pollen samples
#[derive(Parser)]
#[command(name = "biome_scorer", version)]
struct Cli {
    /// Column separator (default comma)
    #[arg(short, long, value_name = "CHAR")]
    separator: Option<char>,

    /// Decimals to use in stabilized sample values (default 2)
    #[arg(long, value_parser = clap::value_parser!(u32).range(0..=4))]
    decimals: Option<u32>,

    /// Default sample stabilization threshold (default 0.5)
    #[arg(short, long, value_name = "THRESHOLD")]
    default_threshold: Option<f64>,

    /// Type of values in the pollen sample files (default counts)
    #[arg(long = "type", value_enum)]
    sample_type: Option<CliSampleType>,

    /// Save calculated sample percentages
    #[arg(long)]
    save_percentages: bool,

    /// Save calculated stabilized sample values
    #[arg(long)]
    save_stabilized: bool,

    /// Taxa to PFT mapping CSV file
    #[arg(short, long, value_name = "TAXAS.CSV")]
    taxas: PathBuf,

    /// Biome to PFT mapping CSV file
    #[arg(short, long, value_name = "BIOMES.CSV")]
    biomes: PathBuf,

    /// Index column, counting from 0 (repeat for several). Default: first column
    #[arg(long)]
    index: Vec<usize>,

    /// JSON configuration file; flags override its values
    #[arg(long, value_name = "CONFIG.JSON")]
    config: Option<PathBuf>,

    /// Write a JSON summary of the run to this file
    #[arg(long, value_name = "SUMMARY.JSON")]
    summary_json: Option<PathBuf>,

    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Pollen sample CSV files
    #[arg(required = true, value_name = "SAMPLE.CSV")]
    samples: Vec<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum)]
enum CliSampleType {
    Counts,
    Percentages,
    Stabilized,
}

impl From<CliSampleType> for SampleType {
    fn from(t: CliSampleType) -> Self {
        match t {
            CliSampleType::Counts => SampleType::Counts,
            CliSampleType::Percentages => SampleType::Percentages,
            CliSampleType::Stabilized => SampleType::Stabilized,
        }
    }
}

impl Cli {
    fn tool_config(&self) -> Result<ToolConfig> {
        let mut config = match &self.config {
            Some(path) => ToolConfig::load(path)?,
            None => ToolConfig::default(),
        };

        if let Some(separator) = self.separator {
            config.separator = separator;
        }
        if let Some(decimals) = self.decimals {
            config.decimals = decimals;
        }
        if let Some(threshold) = self.default_threshold {
            config.default_threshold = threshold;
        }
        if let Some(sample_type) = self.sample_type {
            config.sample_type = sample_type.into();
        }
        config.save_percentages |= self.save_percentages;
        config.save_stabilized |= self.save_stabilized;
        if !self.index.is_empty() {
            config.index_columns = self.index.clone();
        }

        config.validate()?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = match cli.verbose {
        0 => "biome_scorer=info,warn",
        1 => "biome_scorer=debug,warn",
        _ => "debug",
    };
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = cli.tool_config()?;
    let summary = tool::run(&config, &cli.taxas, &cli.biomes, &cli.samples)?;

    if let Some(path) = &cli.summary_json {
        std::fs::write(path, serde_json::to_string_pretty(&summary)?)?;
        tracing::info!("Wrote run summary to: {:?}", path);
    }

    Ok(())
}
