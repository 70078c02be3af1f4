//! Tile descriptors.
//!
//! A descriptor is the software-side record of one tile: where it is, what
//! kind it is, its register base address, and which broadcast resources the
//! driver has handed out. Hardware state is never cached here; it is always
//! read back through `RegisterIo`.

use super::{Location, ModuleType};

/// Tile type, fixed by the array topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TileType {
    /// Compute tile (rows >= 1) - core + data memory modules
    AieTile,
    /// Shim tile bridging to the PL only
    ShimPl,
    /// Shim tile bridging to the PL and NoC; owns a 2nd-level interrupt controller
    ShimNoc,
}

impl TileType {
    /// Check if this is a shim tile of either kind.
    #[inline]
    pub fn is_shim(self) -> bool {
        matches!(self, TileType::ShimPl | TileType::ShimNoc)
    }

    /// Check if this is a compute tile.
    #[inline]
    pub fn is_compute(self) -> bool {
        self == TileType::AieTile
    }
}

/// Per-tile bookkeeping.
///
/// Broadcast used-masks: bit `n` set means channel `n` is taken. Bit 0 of
/// the core/memory masks and slot 0 of the shim mask are the error route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileDescriptor {
    pub location: Location,
    pub tile_type: TileType,
    pub base_address: u64,
    /// Set by the resource manager; unused tiles are skipped by bulk operations
    pub in_use: bool,
    pub core_broadcast_used: u16,
    pub mem_broadcast_used: u16,
    /// 5 valid bits, one per shim internal-event slot
    pub shim_internal_used: u8,
}

impl TileDescriptor {
    pub fn new(location: Location, tile_type: TileType, base_address: u64) -> Self {
        Self {
            location,
            tile_type,
            base_address,
            in_use: true,
            core_broadcast_used: 0,
            mem_broadcast_used: 0,
            shim_internal_used: 0,
        }
    }

    /// Used-mask for the module's broadcast resource.
    ///
    /// PL modules report their internal-event slots in the low 5 bits.
    pub fn used_mask(&self, module: ModuleType) -> u16 {
        match module {
            ModuleType::Core => self.core_broadcast_used,
            ModuleType::Memory => self.mem_broadcast_used,
            ModuleType::Pl => self.shim_internal_used as u16,
        }
    }

    pub fn set_used_mask(&mut self, module: ModuleType, mask: u16) {
        match module {
            ModuleType::Core => self.core_broadcast_used = mask,
            ModuleType::Memory => self.mem_broadcast_used = mask,
            ModuleType::Pl => self.shim_internal_used = (mask & 0x1F) as u8,
        }
    }

    #[inline]
    pub fn has_module(&self, module: ModuleType) -> bool {
        module.present_in(self.tile_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tile_type_predicates() {
        assert!(TileType::ShimPl.is_shim());
        assert!(TileType::ShimNoc.is_shim());
        assert!(!TileType::AieTile.is_shim());
        assert!(TileType::AieTile.is_compute());
    }

    #[test]
    fn test_used_masks() {
        let mut t = TileDescriptor::new(Location::new(0, 0), TileType::ShimPl, 0);
        assert!(t.in_use);

        t.set_used_mask(ModuleType::Pl, 0xFFFF);
        assert_eq!(t.shim_internal_used, 0x1F);
        assert_eq!(t.used_mask(ModuleType::Pl), 0x1F);

        t.set_used_mask(ModuleType::Core, 0x8001);
        assert_eq!(t.used_mask(ModuleType::Core), 0x8001);
        assert_eq!(t.used_mask(ModuleType::Memory), 0);
        assert!(t.has_module(ModuleType::Pl));
        assert!(!t.has_module(ModuleType::Core));
    }
}
