//! Biome Scorer
//!
//! Assigns pollen samples to biomes through plant functional types (PFTs).
//!
//! - `mappings`: taxa ↔ PFT and biome ↔ PFT relation tables
//! - `biomization`: joins both tables into a taxon × biome relevance matrix
//! - `affinity`: per-level biome scores with a specificity tie-break
//! - `samples`: counts → percentages → stabilized values
//! - `data`: CSV loading and export with Polars
//! - `config` / `tool`: configuration and the CSV-to-CSV runner
//!
//! ```no_run
//! use biome_scorer::{Biomization, BiomePftTable, PftList, TaxaPftTable};
//!
//! let taxa = TaxaPftTable::from_lists(vec![PftList::new("Pinus", ["bec"])]);
//! let biomes = BiomePftTable::from_lists(vec![PftList::new("TAIG", ["bec"])]);
//! let biomization = Biomization::new(&taxa, &biomes);
//! assert_eq!(biomization.taxon_counts(), &[1]);
//! ```

pub mod affinity;
pub mod biomization;
pub mod config;
pub mod data;
pub mod error;
pub mod mappings;
pub mod samples;
pub mod tool;

// Re-export commonly used types
pub use affinity::{AffinityResult, NO_DATA_LABEL};
pub use biomization::{Biomization, RelevanceMatrix};
pub use config::{SampleType, ToolConfig};
pub use error::{BiomeError, Result};
pub use mappings::{
    Biome, BiomePftTable, PftId, PftList, Relation, RelationKey, RelationSource, RelationTable,
    Taxa, TaxaPftTable,
};
pub use samples::{
    PollenSamples, SampleKind, SampleMatrix, SiteSamples, StabilizedSamples, TaxonColumns,
};
