//! Error broadcast network setup and the interrupt walk.
//!
//! ```text
//!   chip IRQ
//!      |
//!   L2 (NoC shim tile)    one status bit per 1st-level line
//!      |
//!   L1 A / L1 B (shim)    bits 0..15 broadcast, 16..20 internal events
//!      |
//!   Core (A) / Memory (B) modules, walked upward from row 1
//! ```
//!
//! The walk climbs a column while each module reports broadcast activity
//! and the tile above is clocked. Gated tiles are never read.

use smallvec::SmallVec;

use super::broadcast::ERROR_CHANNEL;
use super::error::Result;
use super::ids::{self, ModuleEvents};
use super::irq_map;
use super::module::ModuleRegs;
use super::policy::{self, TrapHandler};
use super::registry::{EventNotification, HandleStatus, HandlerKind, HandlerRegistry};
use super::shim_intc::{ShimL1, ShimL2, BROADCAST_BITS, INTERNAL_EVENT_BIT0, INTERNAL_EVENT_BITS, L2_LINE_BITS};
use crate::device::layout::{RegisterLayout, STATUS_WORDS};
use crate::device::{Direction, Location, ModuleType, RegisterIo, Switch, TileDescriptor, TileMap, TileType};

/// Shim internal-event slot carrying the PL error group.
pub const ERROR_SLOT: u8 = 0;

/// Group-enable value routing every non-poll-only error.
#[inline]
pub fn error_group_value(module: ModuleType, poll_only: u32) -> u32 {
    !poll_only & ModuleEvents::of(module).range_mask()
}

// ============================================================================
// Setup
// ============================================================================

/// Program the error broadcast network of every column.
///
/// Compute rows are configured upward from row 1 until the first tile whose
/// upper neighbor is gated. Channel 0 (slot 0 on the shim) is reserved in
/// every descriptor regardless of gating.
pub fn initialize_network(
    io: &dyn RegisterIo,
    layout: &RegisterLayout,
    map: &mut TileMap,
    registry: &HandlerRegistry,
    chip_irq_line: u8,
) -> Result<()> {
    let core_group = error_group_value(ModuleType::Core, registry.masks(ModuleType::Core).poll_only);
    let mem_group = error_group_value(ModuleType::Memory, registry.masks(ModuleType::Memory).poll_only);
    let pl_group = error_group_value(ModuleType::Pl, registry.masks(ModuleType::Pl).poll_only);

    for col in 0..map.cols() {
        let shim_loc = Location::new(col, 0);
        initialize_shim(io, layout, map, shim_loc, pl_group, chip_irq_line)?;

        let shim = map.tile_mut(shim_loc);
        shim.shim_internal_used |= 1 << ERROR_SLOT;
        for row in 1..=map.rows() {
            let tile = map.tile_mut(Location::new(col, row));
            tile.core_broadcast_used |= 1 << ERROR_CHANNEL;
            tile.mem_broadcast_used |= 1 << ERROR_CHANNEL;
        }

        if map.is_above_gated(io, layout, shim_loc) {
            log::debug!("Column {} gated, compute rows left unconfigured", col);
            continue;
        }
        for row in 1..=map.rows() {
            let tile = map.tile(Location::new(col, row));
            let core = ModuleRegs::new(io, layout, tile, ModuleType::Core)?;
            let mem = ModuleRegs::new(io, layout, tile, ModuleType::Memory)?;
            for regs in [&core, &mem] {
                for dir in [Direction::West, Direction::North, Direction::East] {
                    regs.broadcast_block_set(Switch::A, dir, 0xFFFF)?;
                }
            }
            core.set_group_event(ModuleEvents::of(ModuleType::Core).group_errors_index, core_group)?;
            mem.set_group_event(ModuleEvents::of(ModuleType::Memory).group_errors_index, mem_group)?;
            core.set_event_broadcast(ERROR_CHANNEL, ids::core::GROUP_ERRORS_0)?;
            mem.set_event_broadcast(ERROR_CHANNEL, ids::mem::GROUP_ERRORS)?;

            if map.is_above_gated(io, layout, tile.location) {
                break;
            }
        }
    }
    log::info!("Error broadcast network initialized on {} columns", map.cols());
    Ok(())
}

fn initialize_shim(
    io: &dyn RegisterIo,
    layout: &RegisterLayout,
    map: &TileMap,
    loc: Location,
    pl_group: u32,
    chip_irq_line: u8,
) -> Result<()> {
    let arch = map.arch();
    let shim = map.tile(loc);
    let route = irq_map::l1_route(arch, loc.col, Switch::A);

    for switch in Switch::BOTH {
        let l1 = ShimL1::new(io, layout, shim, switch)?;
        let line = irq_map::l1_irq_line(arch, loc.col, switch);
        if line < irq_map::L1_LINES {
            l1.set_irq_line(line);
        }
        let mut bits = BROADCAST_BITS;
        if switch == Switch::A {
            bits |= 1 << (INTERNAL_EVENT_BIT0 + ERROR_SLOT as u32);
        }
        l1.enable(bits);
    }
    if route.is_none() {
        log::warn!("Column {} has no route to a NoC shim tile; its events will not interrupt", loc.col);
    }

    let pl = ModuleRegs::new(io, layout, shim, ModuleType::Pl)?;
    pl.set_group_event(ModuleEvents::of(ModuleType::Pl).group_errors_index, pl_group)?;
    ShimL1::new(io, layout, shim, Switch::A)?.set_irq_event(ERROR_SLOT, ids::pl::GROUP_ERRORS)?;

    for switch in Switch::BOTH {
        pl.broadcast_block_set(switch, Direction::North, 0xFFFF)?;
        // Only the owning NoC side may receive this column's broadcasts
        if let Some((noc, _)) = route.filter(|_| !arch.is_noc_column(loc.col)) {
            let away = if noc > loc.col { Direction::West } else { Direction::East };
            pl.broadcast_block_set(switch, away, 0xFFFF)?;
        }
    }

    if shim.tile_type == TileType::ShimNoc {
        let l2 = ShimL2::new(io, layout, shim)?;
        l2.set_irq_line(chip_irq_line);
        l2.enable(L2_LINE_BITS);
    }
    Ok(())
}

/// Rewrite the error group enables of one module type across the array.
///
/// PL groups are written on every shim tile. Core and Memory groups are
/// written upward from row 1 in clocked columns, stopping below the first
/// gated tile.
pub fn update_error_groups(
    io: &dyn RegisterIo,
    layout: &RegisterLayout,
    map: &TileMap,
    module: ModuleType,
    poll_only: u32,
) -> Result<()> {
    let group = ModuleEvents::of(module).group_errors_index;
    let value = error_group_value(module, poll_only);
    log::debug!("{} error group <- 0x{:08X}", module, value);

    for col in 0..map.cols() {
        let shim_loc = Location::new(col, 0);
        if module == ModuleType::Pl {
            ModuleRegs::new(io, layout, map.tile(shim_loc), module)?.set_group_event(group, value)?;
            continue;
        }
        if map.is_above_gated(io, layout, shim_loc) {
            continue;
        }
        for row in 1..=map.rows() {
            let tile = map.tile(Location::new(col, row));
            ModuleRegs::new(io, layout, tile, module)?.set_group_event(group, value)?;
            if map.is_above_gated(io, layout, tile.location) {
                break;
            }
        }
    }
    Ok(())
}

// ============================================================================
// Interrupt Walk
// ============================================================================

/// One pass of the interrupt service routine over borrowed driver state.
pub struct Router<'a> {
    pub io: &'a dyn RegisterIo,
    pub layout: &'a RegisterLayout,
    pub map: &'a TileMap,
    pub registry: &'a HandlerRegistry,
    pub trap: &'a dyn TrapHandler,
}

impl<'a> Router<'a> {
    /// Service every pending 2nd-level bit.
    ///
    /// The 2nd-level controllers stay masked for the whole pass; each status
    /// word is cleared only after all of its bits were walked.
    pub fn dispatch(&self) {
        let l2s: SmallVec<[(u8, ShimL2<'_>); 8]> = self
            .map
            .noc_tiles()
            .filter_map(|t| ShimL2::new(self.io, self.layout, t).ok().map(|l2| (t.location.col, l2)))
            .collect();

        let saved: SmallVec<[u32; 8]> = l2s.iter().map(|(_, l2)| l2.mask()).collect();
        for (_, l2) in &l2s {
            l2.disable(L2_LINE_BITS);
        }

        for (noc, l2) in &l2s {
            let status = l2.status() & L2_LINE_BITS;
            if status == 0 {
                continue;
            }
            log::trace!("L2 ({},0) status 0x{:02X}", noc, status);
            for bit in (0..irq_map::L1_LINES).filter(|&b| status & (1u32 << b) != 0) {
                match irq_map::column_for_l2_bit(self.map.arch(), *noc, bit) {
                    Some((col, switch)) => {
                        if let Err(e) = self.check_column(col, switch) {
                            log::warn!("Column {} switch {:?}: {}", col, switch, e);
                        }
                    }
                    None => log::warn!("L2 ({},0) bit {} has no source column", noc, bit),
                }
            }
            l2.clear_status(status);
        }

        for ((_, l2), mask) in l2s.iter().zip(saved) {
            l2.enable(mask);
        }
    }

    /// Walk one column for one switch.
    pub fn check_column(&self, col: u8, switch: Switch) -> Result<()> {
        let shim_loc = Location::new(col, 0);
        let shim = self.map.tile(shim_loc);
        let l1 = ShimL1::new(self.io, self.layout, shim, switch)?;

        let status = l1.status();
        l1.clear_status(status);
        log::trace!("L1 {} {:?} status 0x{:08X}", shim_loc, switch, status);

        if switch == Switch::A && status & INTERNAL_EVENT_BITS != 0 {
            self.scan_module(shim, ModuleType::Pl)?;
        }
        if status & BROADCAST_BITS == 0 || self.map.is_above_gated(self.io, self.layout, shim_loc) {
            return Ok(());
        }

        let module = switch.scanned_module();
        for row in 1..=self.map.rows() {
            let tile = self.map.tile(Location::new(col, row));
            let climbing = if tile.in_use { self.scan_module(tile, module)? } else { true };
            if !climbing || self.map.is_above_gated(self.io, self.layout, tile.location) {
                break;
            }
        }
        Ok(())
    }

    /// Handle the latched events of one module.
    ///
    /// Returns whether any broadcast event was latched, meaning the source
    /// may sit further up the column.
    pub fn scan_module(&self, tile: &TileDescriptor, module: ModuleType) -> Result<bool> {
        let regs = ModuleRegs::new(self.io, self.layout, tile, module)?;
        let (bc_word, bc_mask) = ids::broadcast_status_bits();
        let mut broadcast_seen = false;

        for word in 0..STATUS_WORDS {
            let status = regs.event_status(word)?;
            let mut clear = 0u32;
            let mut fired: SmallVec<[u8; 8]> = SmallVec::new();

            let mut pending = status;
            while pending != 0 {
                let bit = pending.trailing_zeros();
                pending &= pending - 1;
                let event = (word as u32 * 32 + bit) as u8;
                if event > 2 && self.registry.event(module, event).is_some() {
                    fired.push(event);
                    clear |= 1 << bit;
                }
            }
            if word == bc_word {
                broadcast_seen = status & bc_mask != 0;
                clear |= bc_mask;
            }

            for event in fired {
                self.invoke(tile, module, event);
            }
            if clear != 0 {
                regs.clear_event_status(word, clear)?;
            }
        }
        Ok(broadcast_seen)
    }

    fn invoke(&self, tile: &TileDescriptor, module: ModuleType, event: u8) {
        let Some(handler) = self.registry.event(module, event) else {
            return;
        };
        log::trace!("{} {} event {} fired", tile.location, module, event);
        match &handler.kind {
            HandlerKind::User(callback) => {
                let notification = EventNotification { location: tile.location, module, event, arg: handler.arg };
                if callback(&notification) == HandleStatus::NotHandled {
                    log::debug!("{} {} event {} not handled", tile.location, module, event);
                }
            }
            HandlerKind::ErrorDispatch => {
                policy::handle_error(self.io, self.layout, tile, self.registry, self.trap, module, event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{CustomArch, SimRegisters, TileAddress};
    use crate::events::registry::Callback;
    use parking_lot::Mutex;
    use std::sync::Arc;

    struct NoTrap;

    impl TrapHandler for NoTrap {
        fn trap(&self, _pid: u32, _error: &EventNotification) {}
    }

    struct Fixture {
        layout: RegisterLayout,
        map: TileMap,
        sim: SimRegisters,
        registry: HandlerRegistry,
    }

    fn fixture(cols: u8, rows: u8, noc: Vec<u8>) -> Fixture {
        let layout = RegisterLayout::aie1();
        let map = TileMap::new(Arc::new(CustomArch::new(cols, rows, noc)), &layout.address);
        let sim = SimRegisters::for_array(&map, &layout);
        sim.set_all_clocked(&map, &layout);
        let mut registry = HandlerRegistry::new();
        for module in ModuleType::ALL {
            *registry.masks_mut(module) = policy::default_masks(module);
        }
        Fixture { layout, map, sim, registry }
    }

    impl Fixture {
        fn router(&self) -> Router<'_> {
            Router { io: &self.sim, layout: &self.layout, map: &self.map, registry: &self.registry, trap: &NoTrap }
        }

        fn init(&mut self) {
            initialize_network(&self.sim, &self.layout, &mut self.map, &self.registry, 1).unwrap();
        }

        fn peek(&self, loc: Location, offset: u32) -> u32 {
            self.sim.peek(self.map.tile(loc).base_address + offset as u64)
        }
    }

    #[test]
    fn test_initialize_shim_tiles() {
        let mut f = fixture(4, 2, vec![2, 3]);
        f.init();

        // Column 0 -> NoC 2 line 0/1, column 2 -> itself 4/5
        let l1a = ShimL1::new(&f.sim, &f.layout, f.map.tile(Location::new(0, 0)), Switch::A).unwrap();
        assert_eq!(l1a.irq_line(), 0);
        assert_eq!(l1a.mask(), 0x1_FFFF);
        assert_eq!(l1a.irq_event(0).unwrap(), ids::pl::GROUP_ERRORS);
        let l1b = ShimL1::new(&f.sim, &f.layout, f.map.tile(Location::new(2, 0)), Switch::B).unwrap();
        assert_eq!(l1b.irq_line(), 5);
        assert_eq!(l1b.mask(), 0xFFFF);

        // Owner is east of column 0, so west is blocked on both switches
        let pl = ModuleRegs::new(&f.sim, &f.layout, f.map.tile(Location::new(0, 0)), ModuleType::Pl).unwrap();
        assert_eq!(pl.broadcast_block_value(Switch::A, Direction::West).unwrap(), 0xFFFF);
        assert_eq!(pl.broadcast_block_value(Switch::B, Direction::West).unwrap(), 0xFFFF);
        assert_eq!(pl.broadcast_block_value(Switch::A, Direction::East).unwrap(), 0);
        assert_eq!(pl.broadcast_block_value(Switch::B, Direction::North).unwrap(), 0xFFFF);

        // NoC columns keep both lateral sides open
        let pl = ModuleRegs::new(&f.sim, &f.layout, f.map.tile(Location::new(2, 0)), ModuleType::Pl).unwrap();
        assert_eq!(pl.broadcast_block_value(Switch::A, Direction::West).unwrap(), 0);
        assert_eq!(pl.broadcast_block_value(Switch::A, Direction::East).unwrap(), 0);

        let l2 = ShimL2::new(&f.sim, &f.layout, f.map.tile(Location::new(3, 0))).unwrap();
        assert_eq!(l2.mask(), L2_LINE_BITS);
        assert_eq!(l2.irq_line(), 1);

        assert_eq!(f.map.tile(Location::new(1, 0)).shim_internal_used, 1);
        let pl = ModuleRegs::new(&f.sim, &f.layout, f.map.tile(Location::new(1, 0)), ModuleType::Pl).unwrap();
        assert_eq!(pl.group_event(3).unwrap(), 0x7FF);
    }

    #[test]
    fn test_initialize_compute_rows() {
        let mut f = fixture(1, 3, vec![0]);
        f.sim.set_column_clocked(&f.map, &f.layout, 0, 2);
        f.init();

        for row in 1..=2 {
            let loc = Location::new(0, row);
            let core = ModuleRegs::new(&f.sim, &f.layout, f.map.tile(loc), ModuleType::Core).unwrap();
            assert_eq!(core.event_broadcast(0).unwrap(), ids::core::GROUP_ERRORS_0);
            assert_eq!(core.group_event(4).unwrap(), !policy::default_masks(ModuleType::Core).poll_only & 0x3F_FFFF);
            assert_eq!(core.broadcast_block_value(Switch::A, Direction::North).unwrap(), 0xFFFF);
            assert_eq!(core.broadcast_block_value(Switch::A, Direction::South).unwrap(), 0);
            let mem = ModuleRegs::new(&f.sim, &f.layout, f.map.tile(loc), ModuleType::Memory).unwrap();
            assert_eq!(mem.event_broadcast(0).unwrap(), ids::mem::GROUP_ERRORS);
        }
        // Row 3 is gated: untouched but still reserved
        assert_eq!(f.peek(Location::new(0, 3), 0x34010), 0);
        assert_eq!(f.map.tile(Location::new(0, 3)).core_broadcast_used, 1);
        let touched = f.sim.tiles_read(&f.layout.address);
        assert!(!touched.contains(&Location::new(0, 3)));
    }

    #[test]
    fn test_update_error_groups_skips_gated_column() {
        let mut f = fixture(2, 2, vec![0]);
        f.init();
        f.sim.set_column_clocked(&f.map, &f.layout, 1, 0);
        update_error_groups(&f.sim, &f.layout, &f.map, ModuleType::Memory, 0).unwrap();

        let group = |loc| {
            ModuleRegs::new(&f.sim, &f.layout, f.map.tile(loc), ModuleType::Memory).unwrap().group_event(5).unwrap()
        };
        assert_eq!(group(Location::new(0, 2)), 0x3FFF);
        assert_eq!(group(Location::new(1, 1)), 0x3FF8);
    }

    #[test]
    fn test_dispatch_user_event() {
        let mut f = fixture(1, 1, vec![0]);
        f.init();
        let hits = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&hits);
        let cb: Callback = Arc::new(move |n: &EventNotification| {
            sink.lock().push((n.location, n.event, n.arg));
            HandleStatus::Handled
        });
        f.registry.bind_event(ModuleType::Core, 70, &cb, 5).unwrap();

        let loc = Location::new(0, 1);
        assert!(f.sim.inject_event(&f.map, &f.layout, loc, ModuleType::Core, 70, 1));
        f.router().dispatch();

        assert_eq!(*hits.lock(), vec![(loc, 70, 5)]);
        let core = ModuleRegs::new(&f.sim, &f.layout, f.map.tile(loc), ModuleType::Core).unwrap();
        assert!(!core.event_status_for(70).unwrap());
        assert!(!core.event_status_for(ids::BROADCAST_0 + 1).unwrap());
        let l2 = ShimL2::new(&f.sim, &f.layout, f.map.tile(Location::new(0, 0))).unwrap();
        assert_eq!(l2.status(), 0);
        assert_eq!(l2.mask(), L2_LINE_BITS);
    }

    #[test]
    fn test_walk_stops_at_gated_tile() {
        let mut f = fixture(1, 4, vec![0]);
        f.sim.set_column_clocked(&f.map, &f.layout, 0, 2);
        f.init();

        f.sim.inject_event(&f.map, &f.layout, Location::new(0, 2), ModuleType::Memory, 30, 2);
        f.sim.clear_logs();
        f.router().dispatch();

        let touched: Vec<_> = f
            .sim
            .reads()
            .into_iter()
            .filter_map(|a| TileAddress::decode(a, &f.layout.address))
            .map(|t| t.row)
            .collect();
        assert!(touched.contains(&1));
        assert!(touched.contains(&2));
        assert!(!touched.contains(&3));
        assert!(!touched.contains(&4));
    }

    #[test]
    fn test_walk_stops_without_broadcast() {
        let mut f = fixture(1, 4, vec![0]);
        f.init();
        f.sim.inject_event(&f.map, &f.layout, Location::new(0, 1), ModuleType::Core, 30, 3);
        f.sim.clear_logs();
        f.router().dispatch();

        let touched = f.sim.tiles_read(&f.layout.address);
        assert!(touched.contains(&Location::new(0, 2)));
        assert!(!touched.contains(&Location::new(0, 3)));
    }

    #[test]
    fn test_scan_ignores_pseudo_events() {
        let mut f = fixture(1, 1, vec![0]);
        f.init();
        let cb: Callback = Arc::new(|_: &EventNotification| HandleStatus::Handled);
        f.registry.bind_event(ModuleType::Core, 1, &cb, 0).unwrap();

        let loc = Location::new(0, 1);
        let core = ModuleRegs::new(&f.sim, &f.layout, f.map.tile(loc), ModuleType::Core).unwrap();
        f.sim.set_bits(f.map.tile(loc).base_address + 0x34200, 0b10);
        assert!(!f.router().scan_module(f.map.tile(loc), ModuleType::Core).unwrap());
        assert!(core.event_status_for(1).unwrap());
    }

    #[test]
    fn test_pl_internal_event() {
        let mut f = fixture(1, 1, vec![0]);
        f.init();
        let hits = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&hits);
        let cb: Callback = Arc::new(move |_: &EventNotification| {
            *sink.lock() += 1;
            HandleStatus::Handled
        });
        f.registry.bind_event(ModuleType::Pl, 20, &cb, 0).unwrap();

        f.sim.inject_event(&f.map, &f.layout, Location::new(0, 0), ModuleType::Pl, 20, 1);
        f.sim.clear_logs();
        f.router().dispatch();
        assert_eq!(*hits.lock(), 1);
        // No broadcast bit on L1 A: the compute rows are never visited
        assert!(!f.sim.tiles_read(&f.layout.address).contains(&Location::new(0, 1)));
    }
}
