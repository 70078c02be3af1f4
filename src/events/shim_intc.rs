//! Shim tile interrupt controllers.
//!
//! Every shim tile has a 1st-level controller per broadcast switch. Its
//! status word collects:
//!
//! ```text
//! bits  0..15  broadcast channels 0..15 arriving from the column
//! bits 16..20  shim internal-event slots 0..4
//! ```
//!
//! The 1st-level controller drives one of six lines into the 2nd-level
//! controller of a NoC shim tile, which in turn drives the chip interrupt.

use super::error::{EventError, Result};
use crate::device::layout::{L1Layout, L2Layout, RegisterLayout};
use crate::device::{RegisterIo, Switch, TileDescriptor, TileType};

/// L1 status bit of shim internal-event slot 0.
pub const INTERNAL_EVENT_BIT0: u32 = 16;
/// L1 status bits carrying column broadcasts.
pub const BROADCAST_BITS: u32 = 0xFFFF;
/// L1 status bits carrying shim internal events.
pub const INTERNAL_EVENT_BITS: u32 = 0x1F << INTERNAL_EVENT_BIT0;
/// L2 bits, one per possible 1st-level line.
pub const L2_LINE_BITS: u32 = 0x3F;

/// 1st-level controller of one switch block.
pub struct ShimL1<'a> {
    io: &'a dyn RegisterIo,
    layout: &'a L1Layout,
    base: u64,
}

impl<'a> ShimL1<'a> {
    pub fn new(io: &'a dyn RegisterIo, layout: &'a RegisterLayout, tile: &TileDescriptor, switch: Switch) -> Result<Self> {
        if !tile.tile_type.is_shim() {
            return Err(EventError::InvalidArgument(format!("tile {} is not a shim tile", tile.location)));
        }
        let l1 = layout.shim.l1.get(switch.index()).ok_or_else(|| {
            EventError::InvalidArgument(format!("layout has no L1 controller for switch {:?}", switch))
        })?;
        Ok(Self { io, layout: l1, base: tile.base_address })
    }

    #[inline]
    fn addr(&self, offset: u32) -> u64 {
        self.base + offset as u64
    }

    /// Currently enabled bits.
    pub fn mask(&self) -> u32 {
        self.io.read32(self.addr(self.layout.mask))
    }

    pub fn enable(&self, bits: u32) {
        self.io.write32(self.addr(self.layout.enable), bits);
    }

    pub fn disable(&self, bits: u32) {
        self.io.write32(self.addr(self.layout.disable), bits);
    }

    pub fn status(&self) -> u32 {
        self.io.read32(self.addr(self.layout.status))
    }

    /// Write-1-to-clear.
    pub fn clear_status(&self, bits: u32) {
        self.io.write32(self.addr(self.layout.status), bits);
    }

    pub fn set_irq_line(&self, line: u8) {
        let f = self.layout.irq_line;
        self.io.mask_write32(self.addr(f.offset), f.mask, f.prep(line as u32));
    }

    pub fn irq_line(&self) -> u8 {
        let f = self.layout.irq_line;
        f.get(self.io.read32(self.addr(f.offset))) as u8
    }

    /// Route a PL module event into internal-event `slot`.
    pub fn set_irq_event(&self, slot: u8, event: u8) -> Result<()> {
        let f = self.slot_field(slot)?;
        self.io.mask_write32(self.addr(f.offset), f.mask, f.prep(event as u32));
        Ok(())
    }

    pub fn irq_event(&self, slot: u8) -> Result<u8> {
        let f = self.slot_field(slot)?;
        Ok(f.get(self.io.read32(self.addr(f.offset))) as u8)
    }

    fn slot_field(&self, slot: u8) -> Result<crate::device::RegField> {
        self.layout.irq_events.get(slot as usize).copied().ok_or_else(|| {
            EventError::InvalidArgument(format!("internal event slot {} out of range", slot))
        })
    }
}

/// 2nd-level controller of a NoC shim tile.
pub struct ShimL2<'a> {
    io: &'a dyn RegisterIo,
    layout: &'a L2Layout,
    base: u64,
}

impl<'a> ShimL2<'a> {
    pub fn new(io: &'a dyn RegisterIo, layout: &'a RegisterLayout, tile: &TileDescriptor) -> Result<Self> {
        if tile.tile_type != TileType::ShimNoc {
            return Err(EventError::InvalidArgument(format!(
                "tile {} has no 2nd-level interrupt controller",
                tile.location
            )));
        }
        Ok(Self { io, layout: &layout.shim.l2, base: tile.base_address })
    }

    #[inline]
    fn addr(&self, offset: u32) -> u64 {
        self.base + offset as u64
    }

    pub fn mask(&self) -> u32 {
        self.io.read32(self.addr(self.layout.mask))
    }

    pub fn enable(&self, bits: u32) {
        self.io.write32(self.addr(self.layout.enable), bits);
    }

    pub fn disable(&self, bits: u32) {
        self.io.write32(self.addr(self.layout.disable), bits);
    }

    pub fn status(&self) -> u32 {
        self.io.read32(self.addr(self.layout.status))
    }

    /// Address of the status register, for polling.
    pub fn status_address(&self) -> u64 {
        self.addr(self.layout.status)
    }

    pub fn clear_status(&self, bits: u32) {
        self.io.write32(self.addr(self.layout.status), bits);
    }

    /// Bind to a chip interrupt line.
    pub fn set_irq_line(&self, line: u8) {
        let f = self.layout.irq_line;
        self.io.mask_write32(self.addr(f.offset), f.mask, f.prep(line as u32));
    }

    pub fn irq_line(&self) -> u8 {
        let f = self.layout.irq_line;
        f.get(self.io.read32(self.addr(f.offset))) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{CustomArch, Location, SimRegisters, TileMap};
    use std::sync::Arc;

    fn setup() -> (RegisterLayout, TileMap, SimRegisters) {
        let layout = RegisterLayout::aie1();
        let map = TileMap::new(Arc::new(CustomArch::new(2, 1, vec![1])), &layout.address);
        let sim = SimRegisters::for_array(&map, &layout);
        (layout, map, sim)
    }

    #[test]
    fn test_l1_mask_and_status() {
        let (layout, map, sim) = setup();
        let l1 = ShimL1::new(&sim, &layout, map.tile(Location::new(0, 0)), Switch::B).unwrap();

        l1.enable(BROADCAST_BITS);
        l1.disable(0x8000);
        assert_eq!(l1.mask(), 0x7FFF);

        let status = map.tile(Location::new(0, 0)).base_address + 0x3503C;
        sim.poke(status, 0x0001_0005);
        assert_eq!(l1.status(), 0x0001_0005);
        l1.clear_status(0x0001_0001);
        assert_eq!(l1.status(), 0x4);
    }

    #[test]
    fn test_l1_irq_fields() {
        let (layout, map, sim) = setup();
        let l1 = ShimL1::new(&sim, &layout, map.tile(Location::new(0, 0)), Switch::A).unwrap();

        l1.set_irq_line(3);
        assert_eq!(l1.irq_line(), 3);

        l1.set_irq_event(0, 61).unwrap();
        l1.set_irq_event(2, 70).unwrap();
        l1.set_irq_event(4, 72).unwrap();
        assert_eq!(l1.irq_event(0).unwrap(), 61);
        assert_eq!(l1.irq_event(2).unwrap(), 70);
        assert_eq!(l1.irq_event(4).unwrap(), 72);
        assert!(l1.set_irq_event(5, 1).is_err());
    }

    #[test]
    fn test_l1_needs_shim_tile() {
        let (layout, map, sim) = setup();
        assert!(ShimL1::new(&sim, &layout, map.tile(Location::new(0, 1)), Switch::A).is_err());
    }

    #[test]
    fn test_l2() {
        let (layout, map, sim) = setup();
        assert!(ShimL2::new(&sim, &layout, map.tile(Location::new(0, 0))).is_err());

        let l2 = ShimL2::new(&sim, &layout, map.tile(Location::new(1, 0))).unwrap();
        l2.enable(L2_LINE_BITS);
        assert_eq!(l2.mask(), 0x3F);
        l2.set_irq_line(1);
        assert_eq!(l2.irq_line(), 1);

        sim.poke(l2.status_address(), 0b1010);
        l2.clear_status(0b0010);
        assert_eq!(l2.status(), 0b1000);
        l2.disable(L2_LINE_BITS);
        assert_eq!(l2.mask(), 0);
    }
}
