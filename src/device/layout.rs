//! Register layout tables.
//!
//! Every register field the event core touches is described here as a
//! `(byte offset, lsb, mask)` triple, indexed by module, switch, direction
//! or slot. The tables are plain serde data: they can be loaded from TOML
//! to describe another silicon revision, or taken from `RegisterLayout::aie1()`.
//!
//! Masks are in-place masks (already shifted to `lsb`), matching how the
//! hardware register reference documents them.

use serde::{Deserialize, Serialize};

use super::ModuleType;
use crate::events::error::{EventError, Result};

// ============================================================================
// Field Primitives
// ============================================================================

/// A bit field within a tile-relative register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegField {
    pub offset: u32,
    #[serde(default)]
    pub lsb: u8,
    pub mask: u32,
}

impl RegField {
    pub const fn new(offset: u32, lsb: u8, mask: u32) -> Self {
        Self { offset, lsb, mask }
    }

    /// Whole 32-bit register.
    pub const fn word(offset: u32) -> Self {
        Self { offset, lsb: 0, mask: 0xFFFF_FFFF }
    }

    /// Extract this field from a register value.
    #[inline]
    pub fn get(&self, reg: u32) -> u32 {
        (reg & self.mask) >> self.lsb
    }

    /// Shift `value` into position and clip it to the field.
    #[inline]
    pub fn prep(&self, value: u32) -> u32 {
        (value << self.lsb) & self.mask
    }

    fn check(&self, what: &str) -> Result<()> {
        if self.lsb >= 32 || self.mask == 0 || self.mask.trailing_zeros() < self.lsb as u32 {
            return Err(EventError::InvalidArgument(format!(
                "layout field {} at 0x{:05X} has lsb {} and mask 0x{:08X}",
                what, self.offset, self.lsb, self.mask
            )));
        }
        Ok(())
    }
}

/// A run of identical fields at a fixed stride.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegArray {
    pub offset: u32,
    #[serde(default)]
    pub lsb: u8,
    pub mask: u32,
    pub stride: u32,
    pub count: u8,
}

impl RegArray {
    pub const fn new(offset: u32, mask: u32, stride: u32, count: u8) -> Self {
        Self { offset, lsb: 0, mask, stride, count }
    }

    /// Field for element `idx`, or `None` past the end.
    pub fn at(&self, idx: u8) -> Option<RegField> {
        (idx < self.count).then(|| {
            RegField::new(self.offset + idx as u32 * self.stride, self.lsb, self.mask)
        })
    }

    fn check(&self, what: &str) -> Result<()> {
        if self.count > 1 && self.stride == 0 {
            return Err(invalid(&format!("{} at 0x{:05X} has zero stride", what, self.offset)));
        }
        RegField::new(self.offset, self.lsb, self.mask).check(what)
    }
}

/// Tile address computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressMap {
    pub array_base: u64,
    pub col_shift: u32,
    pub row_shift: u32,
}

impl AddressMap {
    /// Base address of the tile at `(col, row)`.
    #[inline]
    pub fn tile_base(&self, col: u8, row: u8) -> u64 {
        self.array_base + ((col as u64) << self.col_shift) + ((row as u64) << self.row_shift)
    }
}

// ============================================================================
// Module Tables
// ============================================================================

/// Broadcast block set/clear/value registers, one offset per direction.
///
/// Core and Memory modules have 4 entries (S, W, N, E). The PL module has
/// 8: switch A directions, then switch B directions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockLayout {
    pub set: Vec<u32>,
    pub clear: Vec<u32>,
    pub value: Vec<u32>,
    /// Valid channel bits
    pub mask: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceLayout {
    /// Trace mode, core module only
    #[serde(default)]
    pub mode: Option<RegField>,
    pub start: RegField,
    pub stop: RegField,
    pub id: RegField,
    pub packet_type: RegField,
    /// Eight traced event slots
    pub events: Vec<RegField>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerfLayout {
    pub start: Vec<RegField>,
    pub stop: Vec<RegField>,
    pub reset: Vec<RegField>,
    pub counter: RegArray,
    pub event_value: RegArray,
}

/// Stream-switch port watched by one event port: port id and master/slave bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSelectLayout {
    pub id: RegField,
    pub master: RegField,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PcEventLayout {
    pub addr: RegField,
    pub valid: RegField,
}

/// Event-related registers of one module type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleLayout {
    pub event_generate: RegField,
    pub event_broadcast: RegArray,
    pub broadcast_block: BlockLayout,
    pub event_status: RegArray,
    pub group_enable: RegArray,
    pub combo_input: Vec<RegField>,
    pub combo_control: Vec<RegField>,
    pub trace: TraceLayout,
    pub perf: PerfLayout,
    #[serde(default)]
    pub pc_events: Vec<PcEventLayout>,
    /// Stream-switch event ports, Core and PL modules only
    #[serde(default)]
    pub port_select: Vec<PortSelectLayout>,
}

// ============================================================================
// Shim Interrupt Controllers and Clock Control
// ============================================================================

/// 1st-level interrupt controller, one per switch block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct L1Layout {
    pub mask: u32,
    pub enable: u32,
    pub disable: u32,
    pub status: u32,
    pub irq_line: RegField,
    /// Shim internal-event slots
    pub irq_events: Vec<RegField>,
}

/// 2nd-level interrupt controller, NoC shim tiles only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct L2Layout {
    pub mask: u32,
    pub enable: u32,
    pub disable: u32,
    pub status: u32,
    pub irq_line: RegField,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShimLayout {
    /// Switch A then switch B
    pub l1: Vec<L1Layout>,
    pub l2: L2Layout,
}

/// Clock-control bits consumed to detect gated tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockLayout {
    /// Compute tile: clock of the tile above is enabled
    pub compute_next_enable: RegField,
    /// Shim tile: clock of the column above is enabled
    pub shim_column_enable: RegField,
}

/// Complete register layout table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterLayout {
    pub address: AddressMap,
    pub core: ModuleLayout,
    pub memory: ModuleLayout,
    pub pl: ModuleLayout,
    pub shim: ShimLayout,
    pub clock: ClockLayout,
}

/// Number of 32-bit event status words per module.
pub const STATUS_WORDS: u8 = 4;
/// Number of broadcast channels per module.
pub const BROADCAST_CHANNELS: u8 = 16;
/// Number of shim internal-event slots per L1 controller.
pub const SHIM_INTERNAL_SLOTS: usize = 5;
/// Number of stream-switch event ports per module.
pub const STREAM_EVENT_PORTS: usize = 8;

impl RegisterLayout {
    /// Table for the module type.
    pub fn module(&self, module: ModuleType) -> &ModuleLayout {
        match module {
            ModuleType::Core => &self.core,
            ModuleType::Memory => &self.memory,
            ModuleType::Pl => &self.pl,
        }
    }

    /// Parse a layout table from TOML and validate it.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let layout: RegisterLayout = toml::from_str(text)
            .map_err(|e| EventError::InvalidArgument(format!("layout table: {}", e)))?;
        layout.validate()?;
        Ok(layout)
    }

    /// Check structural counts and field sanity.
    pub fn validate(&self) -> Result<()> {
        if self.address.row_shift >= self.address.col_shift || self.address.col_shift >= 64 {
            return Err(invalid("address shifts out of order"));
        }
        for module in ModuleType::ALL {
            let m = self.module(module);
            let blocks = if module == ModuleType::Pl { 8 } else { 4 };
            expect_count(module, "event_status", m.event_status.count as usize, STATUS_WORDS as usize)?;
            expect_count(module, "event_broadcast", m.event_broadcast.count as usize, BROADCAST_CHANNELS as usize)?;
            expect_count(module, "broadcast_block.set", m.broadcast_block.set.len(), blocks)?;
            expect_count(module, "broadcast_block.clear", m.broadcast_block.clear.len(), blocks)?;
            expect_count(module, "broadcast_block.value", m.broadcast_block.value.len(), blocks)?;
            expect_count(module, "combo_input", m.combo_input.len(), 4)?;
            expect_count(module, "combo_control", m.combo_control.len(), 3)?;
            expect_count(module, "trace.events", m.trace.events.len(), 8)?;
            if m.perf.start.len() != m.perf.counter.count as usize
                || m.perf.stop.len() != m.perf.counter.count as usize
                || m.perf.reset.len() != m.perf.counter.count as usize
            {
                return Err(invalid(&format!("{} perf tables disagree on counter count", module)));
            }
            if !m.port_select.is_empty() {
                expect_count(module, "port_select", m.port_select.len(), STREAM_EVENT_PORTS)?;
            }
            m.check_fields()?;
        }
        expect_count(ModuleType::Pl, "shim.l1", self.shim.l1.len(), 2)?;
        for l1 in &self.shim.l1 {
            expect_count(ModuleType::Pl, "shim.l1.irq_events", l1.irq_events.len(), SHIM_INTERNAL_SLOTS)?;
            l1.irq_line.check("l1 irq_line")?;
            for f in &l1.irq_events {
                f.check("l1 irq_event")?;
            }
        }
        self.shim.l2.irq_line.check("l2 irq_line")?;
        self.clock.compute_next_enable.check("clock.compute_next_enable")?;
        self.clock.shim_column_enable.check("clock.shim_column_enable")?;
        Ok(())
    }
}

impl ModuleLayout {
    /// Every field and array must decode without overflowing a 32-bit word.
    fn check_fields(&self) -> Result<()> {
        self.event_generate.check("event_generate")?;
        self.event_broadcast.check("event_broadcast")?;
        self.event_status.check("event_status")?;
        self.group_enable.check("group_enable")?;
        self.perf.counter.check("perf.counter")?;
        self.perf.event_value.check("perf.event_value")?;

        let trace = &self.trace;
        let singles = [
            (trace.start, "trace.start"),
            (trace.stop, "trace.stop"),
            (trace.id, "trace.id"),
            (trace.packet_type, "trace.packet_type"),
        ];
        for (f, what) in trace.mode.map(|f| (f, "trace.mode")).into_iter().chain(singles) {
            f.check(what)?;
        }

        let selectors = self
            .combo_input
            .iter()
            .chain(&self.combo_control)
            .chain(&trace.events)
            .chain(&self.perf.start)
            .chain(&self.perf.stop)
            .chain(&self.perf.reset);
        for f in selectors {
            f.check("event selector")?;
        }
        for pc in &self.pc_events {
            pc.addr.check("pc_event.addr")?;
            pc.valid.check("pc_event.valid")?;
        }
        for port in &self.port_select {
            port.id.check("port_select.id")?;
            port.master.check("port_select.master")?;
        }
        Ok(())
    }
}

fn invalid(msg: &str) -> EventError {
    EventError::InvalidArgument(format!("layout table: {}", msg))
}

fn expect_count(module: ModuleType, what: &str, got: usize, want: usize) -> Result<()> {
    if got != want {
        return Err(invalid(&format!("{} {} has {} entries, expected {}", module, what, got, want)));
    }
    Ok(())
}

// ============================================================================
// AIE1 Table
// ============================================================================

/// Event selector bytes packed four to a register.
fn byte_fields(offsets: &[u32], count: usize) -> Vec<RegField> {
    (0..count)
        .map(|i| {
            let lsb = (i % 4) as u8 * 8;
            RegField::new(offsets[i / 4], lsb, 0x7F << lsb)
        })
        .collect()
}

/// Directional block registers starting at `base`, 0x10 apart, set/clear/value
/// at +0/+4/+8.
fn block_layout(bases: &[u32]) -> BlockLayout {
    let dirs: Vec<u32> = bases
        .iter()
        .flat_map(|&b| (0..4).map(move |d| b + d * 0x10))
        .collect();
    BlockLayout {
        set: dirs.clone(),
        clear: dirs.iter().map(|o| o + 4).collect(),
        value: dirs.iter().map(|o| o + 8).collect(),
        mask: 0xFFFF,
    }
}

/// Perf counter control: two counters per control word, start/stop bytes.
fn perf_layout(ctrl: u32, reset: u32, counter: u32, value: u32, count: u8) -> PerfLayout {
    let n = count as usize;
    let start = (0..n)
        .map(|i| {
            let lsb = (i % 2) as u8 * 16;
            RegField::new(ctrl + (i / 2) as u32 * 4, lsb, 0x7F << lsb)
        })
        .collect();
    let stop = (0..n)
        .map(|i| {
            let lsb = (i % 2) as u8 * 16 + 8;
            RegField::new(ctrl + (i / 2) as u32 * 4, lsb, 0x7F << lsb)
        })
        .collect();
    PerfLayout {
        start,
        stop,
        reset: byte_fields(&[reset], n),
        counter: RegArray::new(counter, 0xFFFF_FFFF, 4, count),
        event_value: RegArray::new(value, 0xFFFF_FFFF, 4, count),
    }
}

/// Module table for a module whose event block starts at `base`
/// (0x34000 core and PL, 0x14000 memory).
fn module_layout(base: u32, perf_base: u32, blocks: &[u32], groups: u8, perf_count: u8) -> ModuleLayout {
    ModuleLayout {
        event_generate: RegField::new(base + 0x008, 0, 0x7F),
        event_broadcast: RegArray::new(base + 0x010, 0x7F, 4, BROADCAST_CHANNELS),
        broadcast_block: block_layout(blocks),
        event_status: RegArray::new(base + 0x200, 0xFFFF_FFFF, 4, STATUS_WORDS),
        group_enable: RegArray::new(base + 0x500, 0xFFFF_FFFF, 4, groups),
        combo_input: byte_fields(&[base + 0x400], 4),
        combo_control: (0..3)
            .map(|i| RegField::new(base + 0x404, i * 8, 0x3 << (i * 8)))
            .collect(),
        trace: TraceLayout {
            mode: None,
            start: RegField::new(base + 0x0D0, 16, 0x7F << 16),
            stop: RegField::new(base + 0x0D0, 24, 0x7F << 24),
            id: RegField::new(base + 0x0D4, 0, 0x1F),
            packet_type: RegField::new(base + 0x0D4, 12, 0x7 << 12),
            events: byte_fields(&[base + 0x0E0, base + 0x0E4], 8),
        },
        perf: perf_layout(perf_base, perf_base + 0x08, perf_base + 0x20, perf_base + 0x80, perf_count),
        pc_events: Vec::new(),
        port_select: Vec::new(),
    }
}

/// Stream-switch event port selection: four ports per register, port id in
/// bits 4:0 and the master bit at bit 5 of each byte.
fn port_select_layout(base: u32) -> Vec<PortSelectLayout> {
    (0..STREAM_EVENT_PORTS)
        .map(|i| {
            let offset = base + (i / 4) as u32 * 4;
            let lsb = (i % 4) as u8 * 8;
            PortSelectLayout {
                id: RegField::new(offset, lsb, 0x1F << lsb),
                master: RegField::new(offset, lsb + 5, 0x20 << lsb),
            }
        })
        .collect()
}

fn l1_layout(base: u32) -> L1Layout {
    L1Layout {
        mask: base,
        enable: base + 0x04,
        disable: base + 0x08,
        status: base + 0x0C,
        irq_line: RegField::new(base + 0x10, 0, 0xF),
        irq_events: byte_fields(&[base + 0x14, base + 0x18], SHIM_INTERNAL_SLOTS),
    }
}

impl RegisterLayout {
    /// Built-in AIE1 table.
    pub fn aie1() -> Self {
        let mut core = module_layout(0x34000, 0x31000, &[0x34050], 9, 4);
        core.trace.mode = Some(RegField::new(0x340D0, 0, 0x3));
        core.pc_events = (0..4)
            .map(|i| PcEventLayout {
                addr: RegField::new(0x32020 + i * 4, 0, 0x3FFF),
                valid: RegField::new(0x32020 + i * 4, 31, 0x8000_0000),
            })
            .collect();
        core.port_select = port_select_layout(0x3FF00);
        let mut pl = module_layout(0x34000, 0x31000, &[0x34050, 0x34090], 7, 2);
        pl.port_select = port_select_layout(0x3FF00);

        Self {
            address: AddressMap {
                array_base: 0x200_0000_0000,
                col_shift: 23,
                row_shift: 18,
            },
            core,
            memory: module_layout(0x14000, 0x11000, &[0x14050], 8, 2),
            pl,
            shim: ShimLayout {
                l1: vec![l1_layout(0x35000), l1_layout(0x35030)],
                l2: L2Layout {
                    mask: 0x15000,
                    enable: 0x15004,
                    disable: 0x15008,
                    status: 0x1500C,
                    irq_line: RegField::new(0x15010, 0, 0xF),
                },
            },
            clock: ClockLayout {
                compute_next_enable: RegField::new(0x36040, 1, 0x2),
                shim_column_enable: RegField::new(0x33040, 1, 0x2),
            },
        }
    }
}

impl Default for RegisterLayout {
    fn default() -> Self {
        Self::aie1()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aie1_validates() {
        RegisterLayout::aie1().validate().unwrap();
    }

    #[test]
    fn test_aie1_offsets() {
        let l = RegisterLayout::aie1();

        assert_eq!(l.core.event_broadcast.at(0).unwrap().offset, 0x34010);
        assert_eq!(l.core.event_broadcast.at(15).unwrap().offset, 0x3404C);
        assert!(l.core.event_broadcast.at(16).is_none());
        assert_eq!(l.memory.event_status.at(3).unwrap().offset, 0x1420C);

        // PL blocks: switch A north, switch B east
        assert_eq!(l.pl.broadcast_block.set[2], 0x34070);
        assert_eq!(l.pl.broadcast_block.set[7], 0x340C0);
        assert_eq!(l.pl.broadcast_block.clear[4], 0x34094);
        assert_eq!(l.pl.broadcast_block.value[4], 0x34098);

        let l1b = &l.shim.l1[1];
        assert_eq!(l1b.enable, 0x35034);
        assert_eq!(l1b.irq_events[3], RegField::new(0x35044, 24, 0x7F00_0000));
        assert_eq!(l1b.irq_events[4], RegField::new(0x35048, 0, 0x7F));
    }

    #[test]
    fn test_field_prep_get() {
        let f = RegField::new(0x340D0, 16, 0x7F << 16);
        assert_eq!(f.prep(0x45), 0x45 << 16);
        assert_eq!(f.prep(0xFF), 0x7F << 16);
        assert_eq!(f.get(0x0045_0003), 0x45);
    }

    #[test]
    fn test_perf_fields() {
        let l = RegisterLayout::aie1();
        assert_eq!(l.core.perf.start[3], RegField::new(0x31004, 16, 0x7F << 16));
        assert_eq!(l.core.perf.stop[1], RegField::new(0x31000, 24, 0x7F << 24));
        assert_eq!(l.memory.perf.counter.at(1).unwrap().offset, 0x11024);
        assert!(l.memory.perf.counter.at(2).is_none());
    }

    #[test]
    fn test_layout_from_toml() {
        let text = toml::to_string(&RegisterLayout::aie1()).unwrap();
        let parsed = RegisterLayout::from_toml_str(&text).unwrap();
        assert_eq!(parsed, RegisterLayout::aie1());
    }

    #[test]
    fn test_validate_rejects_short_tables() {
        let mut l = RegisterLayout::aie1();
        l.pl.broadcast_block.set.truncate(4);
        assert!(matches!(l.validate(), Err(EventError::InvalidArgument(_))));

        let mut l = RegisterLayout::aie1();
        l.shim.l1.pop();
        assert!(l.validate().is_err());

        let mut l = RegisterLayout::aie1();
        l.core.event_status.count = 3;
        assert!(l.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_fields() {
        let mut l = RegisterLayout::aie1();
        l.core.event_broadcast.lsb = 33;
        assert!(l.validate().is_err());
        let text = toml::to_string(&l).unwrap();
        assert!(RegisterLayout::from_toml_str(&text).is_err());

        let mut l = RegisterLayout::aie1();
        l.memory.group_enable.lsb = 40;
        assert!(l.validate().is_err());

        let mut l = RegisterLayout::aie1();
        l.pl.perf.event_value.stride = 0;
        assert!(l.validate().is_err());

        let mut l = RegisterLayout::aie1();
        l.shim.l1[1].irq_events[2].lsb = 32;
        assert!(l.validate().is_err());

        let mut l = RegisterLayout::aie1();
        l.core.trace.packet_type.mask = 0;
        assert!(l.validate().is_err());

        let mut l = RegisterLayout::aie1();
        l.memory.perf.reset[0].lsb = 200;
        assert!(l.validate().is_err());

        let mut l = RegisterLayout::aie1();
        l.core.pc_events[3].valid.lsb = 32;
        assert!(l.validate().is_err());

        let mut l = RegisterLayout::aie1();
        l.pl.port_select[6].master.mask = 0;
        assert!(l.validate().is_err());

        let mut l = RegisterLayout::aie1();
        l.core.port_select.pop();
        assert!(l.validate().is_err());
    }

    #[test]
    fn test_port_select_fields() {
        let l = RegisterLayout::aie1();
        assert_eq!(l.core.port_select[0].id, RegField::new(0x3FF00, 0, 0x1F));
        assert_eq!(l.core.port_select[5].id, RegField::new(0x3FF04, 8, 0x1F00));
        assert_eq!(l.pl.port_select[7].master, RegField::new(0x3FF04, 29, 0x2000_0000));
        assert!(l.memory.port_select.is_empty());
    }

    #[test]
    fn test_tile_base() {
        let map = RegisterLayout::aie1().address;
        assert_eq!(map.tile_base(0, 0), 0x200_0000_0000);
        assert_eq!(map.tile_base(1, 1), 0x200_0000_0000 + 0x80_0000 + 0x4_0000);
    }
}
