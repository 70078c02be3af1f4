//! Architecture configuration trait and implementations.
//!
//! Array topology for AI Engine parts: dimensions, which shim columns carry
//! a NoC bridge, and the resulting tile type of every location.
//!
//! Code should never test `row == 0` or hard-code NoC columns. Ask the
//! `ArchConfig` instead, so that small custom topologies (used by tests and
//! partial arrays) and the full AIE1 array share every code path.
//!
//! # Example
//!
//! ```
//! use aie_events::device::{Aie1Config, ArchConfig, TileType};
//!
//! let arch = Aie1Config;
//! assert_eq!(arch.columns(), 50);
//! assert_eq!(arch.rows(), 8);
//! assert_eq!(arch.tile_type(2, 0), TileType::ShimNoc);
//! assert_eq!(arch.tile_type(0, 0), TileType::ShimPl);
//! assert_eq!(arch.tile_type(0, 3), TileType::AieTile);
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::tile::TileType;

/// Architecture configuration trait for AI Engine arrays.
pub trait ArchConfig: Send + Sync + std::fmt::Debug {
    // ========================================================================
    // Array Dimensions
    // ========================================================================

    /// Number of columns in the tile array.
    fn columns(&self) -> u8;

    /// Number of compute rows (the shim row is not counted).
    fn rows(&self) -> u8;

    // ========================================================================
    // Tile Type Classification
    // ========================================================================

    /// Whether the shim tile of `col` bridges to the NoC.
    fn is_noc_column(&self, col: u8) -> bool;

    /// Tile type at the given coordinates.
    fn tile_type(&self, col: u8, row: u8) -> TileType {
        if row > 0 {
            TileType::AieTile
        } else if self.is_noc_column(col) {
            TileType::ShimNoc
        } else {
            TileType::ShimPl
        }
    }

    /// Check if a tile position is valid. Row 0 through `rows()` inclusive.
    fn is_valid_tile(&self, col: u8, row: u8) -> bool {
        col < self.columns() && row <= self.rows()
    }

    /// Ordinal of a NoC column among all NoC columns, left to right.
    fn noc_index(&self, col: u8) -> Option<usize> {
        if col >= self.columns() || !self.is_noc_column(col) {
            return None;
        }
        Some((0..col).filter(|&c| self.is_noc_column(c)).count())
    }

    /// Whether a NoC column exists strictly to the right of `col`.
    fn has_noc_right_of(&self, col: u8) -> bool {
        (col.saturating_add(1)..self.columns()).any(|c| self.is_noc_column(c))
    }

    // ========================================================================
    // Architecture Name
    // ========================================================================

    /// Architecture name for display.
    fn name(&self) -> &'static str;
}

// ============================================================================
// AIE1 Configuration
// ============================================================================

/// Full AIE1 array: 50 columns, 8 compute rows.
///
/// Below column 44 the shim row repeats `PL PL NoC NoC` every four columns.
/// The last six columns are `PL PL NoC NoC PL PL`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Aie1Config;

impl ArchConfig for Aie1Config {
    fn columns(&self) -> u8 {
        50
    }

    fn rows(&self) -> u8 {
        8
    }

    fn is_noc_column(&self, col: u8) -> bool {
        match col {
            0..=43 => col % 4 >= 2,
            46 | 47 => true,
            _ => false,
        }
    }

    fn name(&self) -> &'static str {
        "AIE1 (50x8)"
    }
}

// ============================================================================
// Custom Configuration
// ============================================================================

/// Explicit topology, loadable from TOML.
///
/// ```toml
/// columns = 5
/// rows = 4
/// noc_columns = [2, 3]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomArch {
    pub columns: u8,
    pub rows: u8,
    #[serde(default)]
    pub noc_columns: Vec<u8>,
}

impl CustomArch {
    pub fn new(columns: u8, rows: u8, noc_columns: Vec<u8>) -> Self {
        Self { columns, rows, noc_columns }
    }
}

impl ArchConfig for CustomArch {
    fn columns(&self) -> u8 {
        self.columns
    }

    fn rows(&self) -> u8 {
        self.rows
    }

    fn is_noc_column(&self, col: u8) -> bool {
        self.noc_columns.contains(&col)
    }

    fn name(&self) -> &'static str {
        "custom"
    }
}

/// Get the default architecture (full AIE1 array).
pub fn default_arch() -> Arc<dyn ArchConfig> {
    Arc::new(Aie1Config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aie1_noc_columns() {
        let arch = Aie1Config;
        let noc: Vec<u8> = (0..arch.columns()).filter(|&c| arch.is_noc_column(c)).collect();

        assert_eq!(noc.len(), 24);
        assert_eq!(&noc[..4], &[2, 3, 6, 7]);
        assert_eq!(&noc[20..], &[42, 43, 46, 47]);
        assert!(!arch.is_noc_column(44));
        assert!(!arch.is_noc_column(49));
    }

    #[test]
    fn test_noc_index() {
        let arch = Aie1Config;

        assert_eq!(arch.noc_index(2), Some(0));
        assert_eq!(arch.noc_index(3), Some(1));
        assert_eq!(arch.noc_index(6), Some(2));
        assert_eq!(arch.noc_index(46), Some(22));
        assert_eq!(arch.noc_index(47), Some(23));
        assert_eq!(arch.noc_index(4), None);
        assert_eq!(arch.noc_index(60), None);
    }

    #[test]
    fn test_noc_to_the_right() {
        let arch = Aie1Config;
        assert!(arch.has_noc_right_of(44));
        assert!(arch.has_noc_right_of(46));
        assert!(!arch.has_noc_right_of(47));
        assert!(!arch.has_noc_right_of(49));
    }

    #[test]
    fn test_tile_types() {
        let arch = CustomArch::new(4, 2, vec![1]);

        assert_eq!(arch.tile_type(0, 0), TileType::ShimPl);
        assert_eq!(arch.tile_type(1, 0), TileType::ShimNoc);
        assert_eq!(arch.tile_type(1, 1), TileType::AieTile);
        assert!(arch.is_valid_tile(3, 2));
        assert!(!arch.is_valid_tile(3, 3)); // row out of range
        assert!(!arch.is_valid_tile(4, 0)); // col out of range
    }

    #[test]
    fn test_custom_arch_from_toml() {
        let arch: CustomArch = toml::from_str("columns = 5\nrows = 4\nnoc_columns = [2, 3]\n").unwrap();
        assert_eq!(arch, CustomArch::new(5, 4, vec![2, 3]));

        let arch: CustomArch = toml::from_str("columns = 1\nrows = 1\n").unwrap();
        assert!(arch.noc_columns.is_empty());
    }

    #[test]
    fn test_default_arch() {
        let arch = default_arch();
        assert_eq!(arch.columns(), 50);
        assert_eq!(arch.name(), "AIE1 (50x8)");
    }

    #[test]
    fn test_arch_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Aie1Config>();
        assert_send_sync::<CustomArch>();
    }
}
