//! Taxa/biome ↔ PFT relation tables
//!
//! Both relation kinds share one representation: a list of
//! `(key, pft, weight)` triples with `weight ∈ {0, 1}`. The kind is a type
//! parameter so a taxa table can never be passed where a biome table is
//! expected.
//!
//! Two source layouts are accepted:
//! - Matrix: first column is the key, every other column is one PFT with
//!   0/1 cells.
//! - Lists: one key per row with the PFTs it belongs to.

use std::collections::BTreeSet;
use std::fmt;
use std::marker::PhantomData;

use polars::prelude::*;
use serde::Serialize;

use crate::error::{BiomeError, Result};

/// Canonical name of the PFT column in list frames
pub const PFT_COLUMN: &str = "pft";

mod sealed {
    pub trait Sealed {}
    impl Sealed for super::Taxa {}
    impl Sealed for super::Biome {}
}

/// Which column a relation table is keyed on
pub trait RelationKey: sealed::Sealed + Send + Sync + 'static {
    /// Canonical (lowercase) key column name
    const KEY: &'static str;
}

/// Marker for taxa → PFT tables
#[derive(Debug, Clone, Copy)]
pub struct Taxa;

/// Marker for biome → PFT tables
#[derive(Debug, Clone, Copy)]
pub struct Biome;

impl RelationKey for Taxa {
    const KEY: &'static str = "taxa";
}

impl RelationKey for Biome {
    const KEY: &'static str = "biome";
}

/// Plant functional type identifier
///
/// Compared as text only. Integer ids from spreadsheets and column headers
/// read from CSV files end up as the same identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct PftId(String);

impl PftId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PftId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PftId {
    fn from(s: &str) -> Self {
        PftId(s.trim().to_string())
    }
}

impl From<String> for PftId {
    fn from(s: String) -> Self {
        PftId::from(s.as_str())
    }
}

impl From<i64> for PftId {
    fn from(n: i64) -> Self {
        PftId(n.to_string())
    }
}

impl From<i32> for PftId {
    fn from(n: i32) -> Self {
        PftId(n.to_string())
    }
}

impl From<u32> for PftId {
    fn from(n: u32) -> Self {
        PftId(n.to_string())
    }
}

/// One normalized relation triple
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Relation {
    pub key: String,
    pub pft: PftId,
    /// 0 or 1
    pub weight: u8,
}

/// One key with every PFT it belongs to (list layout)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PftList {
    pub key: String,
    pub pfts: Vec<PftId>,
}

impl PftList {
    pub fn new<K, I, P>(key: K, pfts: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = P>,
        P: Into<PftId>,
    {
        PftList {
            key: key.into(),
            pfts: pfts.into_iter().map(Into::into).collect(),
        }
    }
}

/// Source layout of a relation table
#[derive(Debug, Clone)]
pub enum RelationSource {
    /// Key column followed by one 0/1 column per PFT
    Matrix(DataFrame),
    /// Key with its PFT list, one entry per key
    Lists(Vec<PftList>),
}

/// Validated, immutable relation table
#[derive(Debug, Clone)]
pub struct RelationTable<K: RelationKey> {
    relations: Vec<Relation>,
    _kind: PhantomData<K>,
}

pub type TaxaPftTable = RelationTable<Taxa>;
pub type BiomePftTable = RelationTable<Biome>;

impl<K: RelationKey> RelationTable<K> {
    /// Build a relation table from either layout
    pub fn new(source: RelationSource) -> Result<Self> {
        match source {
            RelationSource::Matrix(matrix) => Self::from_matrix(&matrix),
            RelationSource::Lists(lists) => Ok(Self::from_lists(lists)),
        }
    }

    /// Unpivot a key × PFT matrix
    ///
    /// Every cell becomes a triple; cells must be 0 or 1 (nulls and any
    /// other value are rejected).
    pub fn from_matrix(matrix: &DataFrame) -> Result<Self> {
        let columns = matrix.get_columns();
        let Some((key_col, pft_cols)) = columns.split_first() else {
            return Err(BiomeError::MissingColumn {
                position: 1,
                expected: K::KEY.to_string(),
                found: String::new(),
            });
        };
        check_header(key_col.name().as_str(), 0, K::KEY)?;

        let keys = key_col.cast(&DataType::String)?;
        let keys = keys.str()?;

        let mut relations = Vec::with_capacity(matrix.height() * pft_cols.len());

        for pft_col in pft_cols {
            let pft = PftId::from(pft_col.name().as_str());
            let weights = pft_col.cast(&DataType::Float64)?;
            let weights = weights.f64()?;

            for (idx, (key, weight)) in keys.into_iter().zip(weights.into_iter()).enumerate() {
                let Some(key) = key else { continue };

                let weight = match weight {
                    Some(w) if w == 0.0 => 0,
                    Some(w) if w == 1.0 => 1,
                    _ => {
                        return Err(BiomeError::InvalidWeight {
                            key: key.to_string(),
                            pft: pft.to_string(),
                            value: pft_col.get(idx)?.to_string(),
                        })
                    }
                };

                relations.push(Relation {
                    key: key.trim().to_string(),
                    pft: pft.clone(),
                    weight,
                });
            }
        }

        tracing::debug!(
            "{} matrix: {} keys x {} PFTs",
            K::KEY,
            matrix.height(),
            pft_cols.len()
        );

        Ok(Self::from_relations(relations))
    }

    /// Expand PFT lists into one weight-1 triple per element
    ///
    /// Duplicate PFTs within a list are preserved.
    pub fn from_lists<I>(lists: I) -> Self
    where
        I: IntoIterator<Item = PftList>,
    {
        let relations = lists
            .into_iter()
            .flat_map(|list| {
                let key = list.key.trim().to_string();
                list.pfts.into_iter().map(move |pft| Relation {
                    key: key.clone(),
                    pft,
                    weight: 1,
                })
            })
            .collect();

        Self::from_relations(relations)
    }

    /// Build from a two-column frame: key column and a list column `pft`
    ///
    /// The inner list may hold strings or integers.
    pub fn from_list_frame(df: &DataFrame) -> Result<Self> {
        let columns = df.get_columns();
        let found = |idx: usize| {
            columns
                .get(idx)
                .map(|c| c.name().to_string())
                .unwrap_or_default()
        };
        if columns.len() < 2 {
            let position = columns.len();
            let expected = if position == 0 { K::KEY } else { PFT_COLUMN };
            return Err(BiomeError::MissingColumn {
                position: position + 1,
                expected: expected.to_string(),
                found: found(position),
            });
        }
        check_header(&found(0), 0, K::KEY)?;
        check_header(&found(1), 1, PFT_COLUMN)?;

        let keys = columns[0].cast(&DataType::String)?;
        let keys = keys.str()?;
        let pft_lists = columns[1].as_materialized_series().list()?;

        let mut lists = Vec::with_capacity(df.height());
        for (key, pfts) in keys.into_iter().zip(pft_lists.into_iter()) {
            let Some(key) = key else { continue };

            let pfts = match pfts {
                Some(inner) => {
                    let inner = inner.cast(&DataType::String)?;
                    inner
                        .str()?
                        .into_iter()
                        .flatten()
                        .filter(|p| !p.trim().is_empty())
                        .map(PftId::from)
                        .collect()
                }
                None => Vec::new(),
            };

            lists.push(PftList {
                key: key.to_string(),
                pfts,
            });
        }

        Ok(Self::from_lists(lists))
    }

    fn from_relations(relations: Vec<Relation>) -> Self {
        RelationTable {
            relations,
            _kind: PhantomData,
        }
    }

    /// Canonical key column name of this table
    pub fn key_name(&self) -> &'static str {
        K::KEY
    }

    /// All triples, including weight-0 cells from matrix sources
    pub fn relations(&self) -> &[Relation] {
        &self.relations
    }

    /// Triples with weight 1
    pub fn linked(&self) -> impl Iterator<Item = &Relation> {
        self.relations.iter().filter(|r| r.weight == 1)
    }

    /// Distinct keys, sorted
    pub fn keys(&self) -> BTreeSet<&str> {
        self.relations.iter().map(|r| r.key.as_str()).collect()
    }

    /// Distinct PFTs, sorted
    pub fn pfts(&self) -> BTreeSet<&PftId> {
        self.relations.iter().map(|r| &r.pft).collect()
    }

    pub fn len(&self) -> usize {
        self.relations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }

    /// Triples as a `key, pft, weight` frame
    pub fn to_frame(&self) -> Result<DataFrame> {
        let keys: Vec<&str> = self.relations.iter().map(|r| r.key.as_str()).collect();
        let pfts: Vec<&str> = self.relations.iter().map(|r| r.pft.as_str()).collect();
        let weights: Vec<u8> = self.relations.iter().map(|r| r.weight).collect();

        let df = DataFrame::new(vec![
            Column::new(K::KEY.into(), keys),
            Column::new(PFT_COLUMN.into(), pfts),
            Column::new("weight".into(), weights),
        ])?;
        Ok(df)
    }
}

/// Case-insensitive header check against the canonical column name
fn check_header(found: &str, index: usize, expected: &str) -> Result<()> {
    if found.trim().to_lowercase() != expected {
        return Err(BiomeError::MissingColumn {
            position: index + 1,
            expected: expected.to_string(),
            found: found.to_string(),
        });
    }
    Ok(())
}
