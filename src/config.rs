//! Tool configuration
//!
//! Loaded from an optional JSON file; command-line flags override it.
//!
//! ```json
//! { "separator": ";", "decimals": 1, "sample_type": "percentages" }
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{BiomeError, Result};

/// Largest supported precision for stabilized values
pub const MAX_DECIMALS: u32 = 4;

/// What the sample files contain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleType {
    #[default]
    Counts,
    Percentages,
    Stabilized,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ToolConfig {
    /// Column separator for every input and output file
    pub separator: char,
    /// Decimals of stabilized values (and of the scores)
    pub decimals: u32,
    /// Percentage subtracted before the square root
    pub default_threshold: f64,
    pub sample_type: SampleType,
    pub save_percentages: bool,
    pub save_stabilized: bool,
    /// 0-based positions of the level identifier columns
    pub index_columns: Vec<usize>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        ToolConfig {
            separator: ',',
            decimals: 2,
            default_threshold: 0.5,
            sample_type: SampleType::Counts,
            save_percentages: false,
            save_stabilized: false,
            index_columns: vec![0],
        }
    }
}

impl ToolConfig {
    /// Load configuration from a JSON file; missing fields take defaults
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: ToolConfig = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.decimals > MAX_DECIMALS {
            return Err(BiomeError::Config(format!(
                "decimals must be between 0 and {}, got {}",
                MAX_DECIMALS, self.decimals
            )));
        }
        if !self.separator.is_ascii() || self.separator == '\n' || self.separator == '"' {
            return Err(BiomeError::Config(format!(
                "separator must be a single ASCII character, got {:?}",
                self.separator
            )));
        }
        if self.index_columns.is_empty() {
            return Err(BiomeError::Config(
                "at least one index column is required".to_string(),
            ));
        }
        if !self.default_threshold.is_finite() || self.default_threshold < 0.0 {
            return Err(BiomeError::Config(format!(
                "default threshold must be a non-negative number, got {}",
                self.default_threshold
            )));
        }
        Ok(())
    }

    /// Separator as the byte Polars expects
    pub fn separator_byte(&self) -> u8 {
        // validate() guarantees ASCII
        self.separator as u8
    }
}
