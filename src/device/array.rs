//! Tile map: one descriptor per array location.
//!
//! Descriptors are stored flat, column by column, shim tile first:
//! `index = col * (rows + 1) + row`. The map is built once from the
//! architecture and never resized.

use std::sync::Arc;

use super::arch_config::ArchConfig;
use super::layout::{AddressMap, RegisterLayout};
use super::registers::RegisterIo;
use super::tile::{TileDescriptor, TileType};
use super::Location;

/// Tile descriptors for the whole array.
pub struct TileMap {
    /// Architecture configuration
    arch: Arc<dyn ArchConfig>,

    cols: u8,

    /// Compute rows (shim row not counted)
    rows: u8,

    pub(crate) tiles: Vec<TileDescriptor>,
}

impl TileMap {
    /// Create the map for the given architecture and address map.
    pub fn new(arch: Arc<dyn ArchConfig>, address: &AddressMap) -> Self {
        let cols = arch.columns();
        let rows = arch.rows();
        let mut tiles = Vec::with_capacity(cols as usize * (rows as usize + 1));

        for col in 0..cols {
            for row in 0..=rows {
                tiles.push(TileDescriptor::new(
                    Location::new(col, row),
                    arch.tile_type(col, row),
                    address.tile_base(col, row),
                ));
            }
        }

        log::debug!("Tile map: {} ({}x{}), {} descriptors", arch.name(), cols, rows, tiles.len());
        Self { arch, cols, rows, tiles }
    }

    #[inline]
    pub fn arch(&self) -> &dyn ArchConfig {
        self.arch.as_ref()
    }

    #[inline]
    pub fn arch_arc(&self) -> Arc<dyn ArchConfig> {
        Arc::clone(&self.arch)
    }

    #[inline]
    pub fn cols(&self) -> u8 {
        self.cols
    }

    /// Number of compute rows.
    #[inline]
    pub fn rows(&self) -> u8 {
        self.rows
    }

    #[inline]
    pub fn contains(&self, loc: Location) -> bool {
        loc.col < self.cols && loc.row <= self.rows
    }

    /// Flat index of a location.
    #[inline]
    pub fn index(&self, loc: Location) -> usize {
        (loc.col as usize) * (self.rows as usize + 1) + (loc.row as usize)
    }

    /// Returns None if the location is out of bounds.
    #[inline]
    pub fn get(&self, loc: Location) -> Option<&TileDescriptor> {
        if self.contains(loc) {
            Some(&self.tiles[self.index(loc)])
        } else {
            None
        }
    }

    #[inline]
    pub fn get_mut(&mut self, loc: Location) -> Option<&mut TileDescriptor> {
        if self.contains(loc) {
            let idx = self.index(loc);
            Some(&mut self.tiles[idx])
        } else {
            None
        }
    }

    /// Get a descriptor (panics if out of bounds).
    ///
    /// Use where the location came from this map's own iteration.
    #[inline]
    pub fn tile(&self, loc: Location) -> &TileDescriptor {
        debug_assert!(self.contains(loc));
        &self.tiles[self.index(loc)]
    }

    #[inline]
    pub fn tile_mut(&mut self, loc: Location) -> &mut TileDescriptor {
        debug_assert!(self.contains(loc));
        let idx = self.index(loc);
        &mut self.tiles[idx]
    }

    pub fn iter(&self) -> impl Iterator<Item = &TileDescriptor> {
        self.tiles.iter()
    }

    /// Row-0 tiles, left to right.
    pub fn shim_tiles(&self) -> impl Iterator<Item = &TileDescriptor> {
        self.tiles.iter().filter(|t| t.tile_type.is_shim())
    }

    /// NoC shim tiles, left to right.
    pub fn noc_tiles(&self) -> impl Iterator<Item = &TileDescriptor> {
        self.tiles.iter().filter(|t| t.tile_type == TileType::ShimNoc)
    }

    /// Whether the tile above `loc` is clock gated.
    ///
    /// For a shim tile this reports the column above the shim row. The
    /// answer always comes from the clock-control register of `loc` itself,
    /// so a gated tile is never touched to find out.
    pub fn is_above_gated(&self, io: &dyn RegisterIo, layout: &RegisterLayout, loc: Location) -> bool {
        let field = if loc.row == 0 {
            layout.clock.shim_column_enable
        } else {
            layout.clock.compute_next_enable
        };
        let base = self.tile(loc).base_address;
        let value = io.read32(base + field.offset as u64);
        field.get(value) == 0
    }

    /// Print summary of the array.
    pub fn print_summary(&self) {
        let noc = self.noc_tiles().count();
        println!(
            "Array: {} columns x {} rows ({} NoC shim tiles, {} compute tiles)",
            self.cols,
            self.rows,
            noc,
            self.cols as usize * self.rows as usize
        );
    }
}

impl std::fmt::Debug for TileMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileMap")
            .field("arch", &self.arch.name())
            .field("cols", &self.cols)
            .field("rows", &self.rows)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::arch_config::{Aie1Config, CustomArch};
    use crate::device::sim::SimRegisters;

    fn small_map() -> TileMap {
        TileMap::new(Arc::new(CustomArch::new(4, 3, vec![2])), &RegisterLayout::aie1().address)
    }

    #[test]
    fn test_index_layout() {
        let map = small_map();
        assert_eq!(map.index(Location::new(0, 0)), 0);
        assert_eq!(map.index(Location::new(0, 3)), 3);
        assert_eq!(map.index(Location::new(1, 0)), 4);
        assert_eq!(map.index(Location::new(3, 3)), 15);
        assert_eq!(map.iter().count(), 16);

        for t in map.iter() {
            assert_eq!(map.tile(t.location), t);
        }
    }

    #[test]
    fn test_bounds() {
        let map = small_map();
        assert!(map.get(Location::new(3, 3)).is_some());
        assert!(map.get(Location::new(4, 0)).is_none());
        assert!(map.get(Location::new(0, 4)).is_none());
    }

    #[test]
    fn test_shim_and_noc_iterators() {
        let map = small_map();
        let shims: Vec<u8> = map.shim_tiles().map(|t| t.location.col).collect();
        assert_eq!(shims, vec![0, 1, 2, 3]);
        let nocs: Vec<u8> = map.noc_tiles().map(|t| t.location.col).collect();
        assert_eq!(nocs, vec![2]);
    }

    #[test]
    fn test_base_addresses() {
        let layout = RegisterLayout::aie1();
        let map = TileMap::new(Arc::new(Aie1Config), &layout.address);
        let t = map.tile(Location::new(2, 1));
        assert_eq!(t.base_address, layout.address.tile_base(2, 1));
        assert_eq!(map.noc_tiles().count(), 24);
    }

    #[test]
    fn test_clock_gating_read() {
        let layout = RegisterLayout::aie1();
        let map = small_map();
        let sim = SimRegisters::new();

        // Nothing clocked: everything above is gated
        assert!(map.is_above_gated(&sim, &layout, Location::new(1, 0)));

        sim.set_column_clocked(&map, &layout, 1, 2);
        assert!(!map.is_above_gated(&sim, &layout, Location::new(1, 0)));
        assert!(!map.is_above_gated(&sim, &layout, Location::new(1, 1)));
        assert!(map.is_above_gated(&sim, &layout, Location::new(1, 2)));
    }
}
