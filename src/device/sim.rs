//! Simulated register file.
//!
//! Sparse storage backs every address that has been written; unwritten
//! addresses read as zero. Three pieces of hardware behavior are modeled
//! because the event core depends on them:
//!
//! - Write-1-to-clear status registers (event status words, L1/L2 status)
//! - Enable/disable (and block set/clear) aliases that set or clear bits
//!   of a mask register
//! - A read log, so tests can check which tiles were touched
//!
//! # Usage
//!
//! ```
//! use std::sync::Arc;
//! use aie_events::device::{CustomArch, RegisterIo, RegisterLayout, SimRegisters, TileMap};
//!
//! let layout = RegisterLayout::aie1();
//! let map = TileMap::new(Arc::new(CustomArch::new(1, 1, vec![0])), &layout.address);
//! let sim = SimRegisters::for_array(&map, &layout);
//!
//! let status = layout.address.tile_base(0, 1) + layout.core.event_status.offset as u64;
//! sim.poke(status, 0b1100);
//! sim.write32(status, 0b0100);
//! assert_eq!(sim.peek(status), 0b1000);
//! ```

use std::collections::{BTreeMap, BTreeSet};

use parking_lot::Mutex;

use super::array::TileMap;
use super::layout::{AddressMap, RegisterLayout};
use super::registers::{RegisterIo, TileAddress};
use super::{Location, ModuleType, Switch};
use crate::events::ids;
use crate::events::irq_map;

#[derive(Debug, Default)]
struct SimState {
    regs: BTreeMap<u64, u32>,
    write_to_clear: BTreeSet<u64>,
    /// alias address -> (target address, sets bits?)
    aliases: BTreeMap<u64, (u64, bool)>,
    reads: Vec<u64>,
    writes: Vec<(u64, u32)>,
}

/// In-memory `RegisterIo` implementation.
#[derive(Debug, Default)]
pub struct SimRegisters {
    state: Mutex<SimState>,
}

impl SimRegisters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register file with the status and alias behavior of every tile in `map`.
    pub fn for_array(map: &TileMap, layout: &RegisterLayout) -> Self {
        let sim = Self::new();
        for tile in map.iter() {
            let base = tile.base_address;
            for module in ModuleType::ALL {
                if !tile.has_module(module) {
                    continue;
                }
                let m = layout.module(module);
                for word in 0..m.event_status.count {
                    if let Some(f) = m.event_status.at(word) {
                        sim.mark_write_to_clear(base + f.offset as u64);
                    }
                }
                let blocks = &m.broadcast_block;
                for ((&set, &clear), &value) in blocks.set.iter().zip(&blocks.clear).zip(&blocks.value) {
                    sim.alias(base + set as u64, base + value as u64, true);
                    sim.alias(base + clear as u64, base + value as u64, false);
                }
            }
            if tile.tile_type.is_shim() {
                for l1 in &layout.shim.l1 {
                    sim.mark_write_to_clear(base + l1.status as u64);
                    sim.alias(base + l1.enable as u64, base + l1.mask as u64, true);
                    sim.alias(base + l1.disable as u64, base + l1.mask as u64, false);
                }
                let l2 = &layout.shim.l2;
                sim.mark_write_to_clear(base + l2.status as u64);
                sim.alias(base + l2.enable as u64, base + l2.mask as u64, true);
                sim.alias(base + l2.disable as u64, base + l2.mask as u64, false);
            }
        }
        sim
    }

    pub fn mark_write_to_clear(&self, addr: u64) {
        self.state.lock().write_to_clear.insert(addr);
    }

    /// Writes to `alias` set (or clear) bits of `target` instead of storing.
    pub fn alias(&self, alias: u64, target: u64, sets: bool) {
        self.state.lock().aliases.insert(alias, (target, sets));
    }

    /// Store a value directly, bypassing side effects and logs.
    pub fn poke(&self, addr: u64, value: u32) {
        self.state.lock().regs.insert(addr, value);
    }

    /// Read a value directly, bypassing the read log.
    pub fn peek(&self, addr: u64) -> u32 {
        self.state.lock().regs.get(&addr).copied().unwrap_or(0)
    }

    /// OR bits into a register, the way hardware raises status bits.
    pub fn set_bits(&self, addr: u64, bits: u32) {
        *self.state.lock().regs.entry(addr).or_insert(0) |= bits;
    }

    /// Every address read so far, in order.
    pub fn reads(&self) -> Vec<u64> {
        self.state.lock().reads.clone()
    }

    /// Every write so far, in order.
    pub fn writes(&self) -> Vec<(u64, u32)> {
        self.state.lock().writes.clone()
    }

    pub fn clear_logs(&self) {
        let mut state = self.state.lock();
        state.reads.clear();
        state.writes.clear();
    }

    /// Tiles whose registers were read since the last `clear_logs`.
    pub fn tiles_read(&self, map: &AddressMap) -> BTreeSet<Location> {
        self.state
            .lock()
            .reads
            .iter()
            .filter_map(|&a| TileAddress::decode(a, map))
            .map(|t| Location::new(t.col, t.row))
            .collect()
    }

    // ========================================================================
    // Topology Helpers
    // ========================================================================

    /// Clock rows `1..=clocked_rows` of a column; everything above is gated.
    pub fn set_column_clocked(&self, map: &TileMap, layout: &RegisterLayout, col: u8, clocked_rows: u8) {
        let shim = map.tile(Location::new(col, 0)).base_address;
        let f = layout.clock.shim_column_enable;
        self.write_field(shim + f.offset as u64, f.mask, f.prep((clocked_rows > 0) as u32));

        let f = layout.clock.compute_next_enable;
        for row in 1..=map.rows() {
            let base = map.tile(Location::new(col, row)).base_address;
            let enabled = row < clocked_rows;
            self.write_field(base + f.offset as u64, f.mask, f.prep(enabled as u32));
        }
    }

    /// Clock every tile of the array.
    pub fn set_all_clocked(&self, map: &TileMap, layout: &RegisterLayout) {
        for col in 0..map.cols() {
            self.set_column_clocked(map, layout, col, map.rows());
        }
    }

    fn write_field(&self, addr: u64, mask: u32, value: u32) {
        let mut state = self.state.lock();
        let reg = state.regs.entry(addr).or_insert(0);
        *reg = (*reg & !mask) | value;
    }

    /// Raise `event` on a module and propagate it the way the broadcast
    /// network would, up to the 2nd-level status bit of the owning NoC tile.
    ///
    /// `channel` is the broadcast channel for Core/Memory modules and the
    /// shim internal-event slot for the PL module. Returns `false` if the
    /// column has no route to a NoC tile.
    pub fn inject_event(
        &self,
        map: &TileMap,
        layout: &RegisterLayout,
        loc: Location,
        module: ModuleType,
        event: u8,
        channel: u8,
    ) -> bool {
        let status = &layout.module(module).event_status;
        let raise = |at: Location, ev: u8| {
            if let Some(f) = status.at(ev / 32) {
                self.set_bits(map.tile(at).base_address + f.offset as u64, 1 << (ev % 32));
            }
        };
        raise(loc, event);

        let (switch, l1_bit) = match module {
            ModuleType::Pl => (Switch::A, 16 + channel as u32),
            _ => {
                let switch = if module == ModuleType::Core { Switch::A } else { Switch::B };
                for row in 1..=loc.row {
                    raise(Location::new(loc.col, row), ids::BROADCAST_0 + channel);
                }
                (switch, channel as u32)
            }
        };

        let shim = map.tile(loc.shim()).base_address;
        self.set_bits(shim + layout.shim.l1[switch.index()].status as u64, 1 << l1_bit);

        match irq_map::l1_route(map.arch(), loc.col, switch) {
            Some((noc, bit)) => {
                let noc_base = map.tile(Location::new(noc, 0)).base_address;
                self.set_bits(noc_base + layout.shim.l2.status as u64, 1 << bit);
                true
            }
            None => false,
        }
    }
}

impl RegisterIo for SimRegisters {
    fn read32(&self, addr: u64) -> u32 {
        let mut state = self.state.lock();
        state.reads.push(addr);
        state.regs.get(&addr).copied().unwrap_or(0)
    }

    fn write32(&self, addr: u64, value: u32) {
        let mut state = self.state.lock();
        state.writes.push((addr, value));
        if let Some(&(target, sets)) = state.aliases.get(&addr) {
            let reg = state.regs.entry(target).or_insert(0);
            if sets {
                *reg |= value;
            } else {
                *reg &= !value;
            }
        } else if state.write_to_clear.contains(&addr) {
            if let Some(reg) = state.regs.get_mut(&addr) {
                *reg &= !value;
            }
        } else {
            state.regs.insert(addr, value);
        }
    }
}
