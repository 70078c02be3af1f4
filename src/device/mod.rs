//! Device model for AI Engine tile arrays.
//!
//! This module provides:
//! - Array topology definitions (`ArchConfig`) for AIE1 parts and custom layouts
//! - The tile map with per-tile broadcast bookkeeping
//! - The external register layout table (offsets, masks, shifts)
//! - The register I/O seam and a simulated register file for tests
//!
//! # Array Overview
//!
//! Row 0 is always a shim tile. Shim tiles either bridge to the PL only, or
//! to the PL and the NoC. Only NoC shim tiles own a 2nd-level interrupt
//! controller, which drives the single chip interrupt line.
//!
//! ```text
//!     Col 0    Col 1    Col 2    Col 3    Col 4
//!   +--------+--------+--------+--------+--------+
//! 3 |AIE tile|AIE tile|AIE tile|AIE tile|AIE tile|  <- Core + Memory modules
//!   +--------+--------+--------+--------+--------+
//! 2 |AIE tile|AIE tile|AIE tile|AIE tile|AIE tile|
//!   +--------+--------+--------+--------+--------+
//! 1 |AIE tile|AIE tile|AIE tile|AIE tile|AIE tile|
//!   +--------+--------+--------+--------+--------+
//! 0 |Shim PL |Shim PL |Shim NoC|Shim NoC|Shim PL |  <- PL module, L1 (+L2) intc
//!   +--------+--------+--------+--------+--------+
//! ```
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use aie_events::device::{CustomArch, Location, RegisterLayout, TileMap, TileType};
//!
//! let arch = Arc::new(CustomArch::new(5, 3, vec![2, 3]));
//! let map = TileMap::new(arch, &RegisterLayout::aie1().address);
//! assert_eq!(map.tile(Location::new(2, 0)).tile_type, TileType::ShimNoc);
//! assert_eq!(map.index(Location::new(1, 2)), 6);
//! ```

pub mod arch_config;
pub mod array;
pub mod layout;
pub mod registers;
pub mod sim;
pub mod tile;

pub use arch_config::{default_arch, Aie1Config, ArchConfig, CustomArch};
pub use array::TileMap;
pub use layout::{AddressMap, RegArray, RegField, RegisterLayout};
pub use registers::{RegisterIo, TileAddress};
pub use sim::SimRegisters;
pub use tile::{TileDescriptor, TileType};

use std::fmt;

/// Tile location in the array.
///
/// Row 0 is the shim row; rows `1..=rows` are compute tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Location {
    pub col: u8,
    pub row: u8,
}

impl Location {
    #[inline]
    pub const fn new(col: u8, row: u8) -> Self {
        Self { col, row }
    }

    /// Shim tile of the same column.
    #[inline]
    pub const fn shim(self) -> Self {
        Self { col: self.col, row: 0 }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.col, self.row)
    }
}

/// Functional module inside a tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleType {
    /// AIE core module (compute tiles)
    Core,
    /// Data memory module (compute tiles)
    Memory,
    /// PL interface module (shim tiles)
    Pl,
}

impl ModuleType {
    pub const ALL: [ModuleType; 3] = [ModuleType::Core, ModuleType::Memory, ModuleType::Pl];

    /// Dense index used by per-module tables.
    #[inline]
    pub const fn index(self) -> usize {
        match self {
            ModuleType::Core => 0,
            ModuleType::Memory => 1,
            ModuleType::Pl => 2,
        }
    }

    /// Check whether this module exists in a tile of the given type.
    pub fn present_in(self, tile_type: TileType) -> bool {
        match self {
            ModuleType::Core | ModuleType::Memory => tile_type == TileType::AieTile,
            ModuleType::Pl => tile_type.is_shim(),
        }
    }

    /// Single-bit mask for this module.
    pub fn mask(self) -> ModuleMask {
        match self {
            ModuleType::Core => ModuleMask::CORE,
            ModuleType::Memory => ModuleMask::MEM,
            ModuleType::Pl => ModuleMask::PL,
        }
    }
}

impl fmt::Display for ModuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleType::Core => write!(f, "Core"),
            ModuleType::Memory => write!(f, "Memory"),
            ModuleType::Pl => write!(f, "PL"),
        }
    }
}

bitflags::bitflags! {
    /// Set of module types, used where an operation may span several modules.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ModuleMask: u8 {
        const CORE = 1 << 0;
        const MEM = 1 << 1;
        const PL = 1 << 2;
        const ALL = Self::CORE.bits() | Self::MEM.bits() | Self::PL.bits();
    }
}

impl ModuleMask {
    /// Module types contained in this mask, in table order.
    pub fn modules(self) -> impl Iterator<Item = ModuleType> {
        ModuleType::ALL.into_iter().filter(move |m| self.contains(m.mask()))
    }
}

/// Shim broadcast switch block.
///
/// Switch A carries Core module broadcasts and the shim's own error
/// notification; switch B carries Memory module broadcasts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Switch {
    A,
    B,
}

impl Switch {
    pub const BOTH: [Switch; 2] = [Switch::A, Switch::B];

    #[inline]
    pub const fn index(self) -> usize {
        match self {
            Switch::A => 0,
            Switch::B => 1,
        }
    }

    /// Module whose broadcasts arrive on this switch.
    pub const fn scanned_module(self) -> ModuleType {
        match self {
            Switch::A => ModuleType::Core,
            Switch::B => ModuleType::Memory,
        }
    }
}

/// Broadcast propagation direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    South,
    West,
    North,
    East,
}

impl Direction {
    pub const ALL: [Direction; 4] = [Direction::South, Direction::West, Direction::North, Direction::East];

    #[inline]
    pub const fn index(self) -> usize {
        match self {
            Direction::South => 0,
            Direction::West => 1,
            Direction::North => 2,
            Direction::East => 3,
        }
    }
}
