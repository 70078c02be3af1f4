//! Module event/broadcast register driver.
//!
//! `ModuleRegs` binds the register I/O, one module's layout table and one
//! tile together, and exposes the event-related registers of that module:
//! broadcast assignment and blocking, event generation, group enables,
//! event status, combo events, trace and performance-counter linkage.
//!
//! Every index is checked against the layout table and rejected with
//! `InvalidArgument` when out of range; nothing here panics on bad input.

use smallvec::SmallVec;

use super::error::{EventError, Result};
use crate::device::layout::{ModuleLayout, RegField, RegisterLayout};
use crate::device::{Direction, Location, ModuleType, RegisterIo, Switch, TileDescriptor, TileMap};

/// Combo event logic, two inputs per combo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComboOp {
    And = 0,
    AndNotB = 1,
    Or = 2,
    OrNotB = 3,
}

impl ComboOp {
    fn from_bits(bits: u32) -> Self {
        match bits & 0x3 {
            0 => ComboOp::And,
            1 => ComboOp::AndNotB,
            2 => ComboOp::Or,
            _ => ComboOp::OrNotB,
        }
    }
}

/// Side of a stream-switch port an event port watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortType {
    Slave = 0,
    Master = 1,
}

/// Core module trace mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceMode {
    EventTime = 0,
    EventPc = 1,
    Execution = 2,
}

/// Eight traced events, staged for a single write per register.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TraceEvents {
    pub events: [u8; 8],
}

impl TraceEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, idx: usize, event: u8) -> Result<()> {
        let slot = self
            .events
            .get_mut(idx)
            .ok_or_else(|| EventError::InvalidArgument(format!("trace slot {} out of range", idx)))?;
        *slot = event;
        Ok(())
    }
}

/// Event registers of one module in one tile.
pub struct ModuleRegs<'a> {
    io: &'a dyn RegisterIo,
    layout: &'a ModuleLayout,
    base: u64,
    location: Location,
    module: ModuleType,
}

impl<'a> ModuleRegs<'a> {
    /// Bind to a tile. Fails if the tile has no such module.
    pub fn new(
        io: &'a dyn RegisterIo,
        layout: &'a RegisterLayout,
        tile: &TileDescriptor,
        module: ModuleType,
    ) -> Result<Self> {
        if !tile.has_module(module) {
            return Err(EventError::InvalidArgument(format!(
                "tile {} has no {} module",
                tile.location, module
            )));
        }
        Ok(Self {
            io,
            layout: layout.module(module),
            base: tile.base_address,
            location: tile.location,
            module,
        })
    }

    #[inline]
    pub fn location(&self) -> Location {
        self.location
    }

    #[inline]
    pub fn module(&self) -> ModuleType {
        self.module
    }

    #[inline]
    fn addr(&self, offset: u32) -> u64 {
        self.base + offset as u64
    }

    fn read_field(&self, field: RegField) -> u32 {
        field.get(self.io.read32(self.addr(field.offset)))
    }

    fn write_field(&self, field: RegField, value: u32) {
        self.io.mask_write32(self.addr(field.offset), field.mask, field.prep(value));
    }

    /// Masked write of several fields, one access per distinct register.
    fn write_fields(&self, fields: impl IntoIterator<Item = (RegField, u32)>) {
        let mut regs: SmallVec<[(u32, u32, u32); 2]> = SmallVec::new();
        for (field, value) in fields {
            match regs.iter_mut().find(|(off, _, _)| *off == field.offset) {
                Some((_, mask, val)) => {
                    *mask |= field.mask;
                    *val |= field.prep(value);
                }
                None => regs.push((field.offset, field.mask, field.prep(value))),
            }
        }
        for (offset, mask, value) in regs {
            self.io.mask_write32(self.addr(offset), mask, value);
        }
    }

    fn pick<T: Copy>(&self, table: &[T], idx: usize, what: &str) -> Result<T> {
        table.get(idx).copied().ok_or_else(|| {
            EventError::InvalidArgument(format!(
                "{} {} out of range for {} module at {}",
                what, idx, self.module, self.location
            ))
        })
    }

    // ========================================================================
    // Broadcast
    // ========================================================================

    /// Route `event` onto broadcast `channel`.
    pub fn set_event_broadcast(&self, channel: u8, event: u8) -> Result<()> {
        let field = self.broadcast_field(channel)?;
        log::trace!("{} {} broadcast {} <- event {}", self.location, self.module, channel, event);
        self.io.write32(self.addr(field.offset), field.prep(event as u32));
        Ok(())
    }

    /// Event currently routed onto broadcast `channel`.
    pub fn event_broadcast(&self, channel: u8) -> Result<u8> {
        let field = self.broadcast_field(channel)?;
        Ok(self.read_field(field) as u8)
    }

    fn broadcast_field(&self, channel: u8) -> Result<RegField> {
        self.layout.event_broadcast.at(channel).ok_or_else(|| {
            EventError::InvalidArgument(format!("broadcast channel {} out of range", channel))
        })
    }

    fn block_index(&self, switch: Switch, dir: Direction) -> Result<usize> {
        if self.module != ModuleType::Pl && switch != Switch::A {
            return Err(EventError::InvalidArgument(format!(
                "{} module has a single broadcast switch",
                self.module
            )));
        }
        Ok(dir.index() + 4 * switch.index())
    }

    /// Stop the channels in `mask` from propagating towards `dir`.
    pub fn broadcast_block_set(&self, switch: Switch, dir: Direction, mask: u16) -> Result<()> {
        let idx = self.block_index(switch, dir)?;
        let offset = self.pick(&self.layout.broadcast_block.set, idx, "block direction")?;
        self.io.write32(self.addr(offset), mask as u32 & self.layout.broadcast_block.mask);
        Ok(())
    }

    pub fn broadcast_block_clear(&self, switch: Switch, dir: Direction, mask: u16) -> Result<()> {
        let idx = self.block_index(switch, dir)?;
        let offset = self.pick(&self.layout.broadcast_block.clear, idx, "block direction")?;
        self.io.write32(self.addr(offset), mask as u32 & self.layout.broadcast_block.mask);
        Ok(())
    }

    /// Currently blocked channels towards `dir`.
    pub fn broadcast_block_value(&self, switch: Switch, dir: Direction) -> Result<u16> {
        let idx = self.block_index(switch, dir)?;
        let offset = self.pick(&self.layout.broadcast_block.value, idx, "block direction")?;
        Ok((self.io.read32(self.addr(offset)) & self.layout.broadcast_block.mask) as u16)
    }

    /// Raise `event` from software.
    pub fn generate_event(&self, event: u8) -> Result<()> {
        let field = self.layout.event_generate;
        self.io.write32(self.addr(field.offset), field.prep(event as u32));
        Ok(())
    }

    // ========================================================================
    // Group Events
    // ========================================================================

    pub fn group_event(&self, group: u8) -> Result<u32> {
        let field = self.group_field(group)?;
        Ok(self.read_field(field))
    }

    pub fn set_group_event(&self, group: u8, mask: u32) -> Result<()> {
        let field = self.group_field(group)?;
        self.io.write32(self.addr(field.offset), field.prep(mask));
        Ok(())
    }

    fn group_field(&self, group: u8) -> Result<RegField> {
        self.layout.group_enable.at(group).ok_or_else(|| {
            EventError::InvalidArgument(format!("group {} out of range for {} module", group, self.module))
        })
    }

    // ========================================================================
    // Event Status
    // ========================================================================

    /// Status word `word` (events `32*word .. 32*word+31`).
    pub fn event_status(&self, word: u8) -> Result<u32> {
        let field = self.status_field(word)?;
        Ok(self.io.read32(self.addr(field.offset)))
    }

    /// Whether `event` is currently latched.
    pub fn event_status_for(&self, event: u8) -> Result<bool> {
        Ok(self.event_status(event / 32)? & (1 << (event % 32)) != 0)
    }

    /// Write-1-to-clear the bits of `mask` in status word `word`.
    pub fn clear_event_status(&self, word: u8, mask: u32) -> Result<()> {
        let field = self.status_field(word)?;
        self.io.write32(self.addr(field.offset), mask);
        Ok(())
    }

    fn status_field(&self, word: u8) -> Result<RegField> {
        self.layout.event_status.at(word).ok_or_else(|| {
            EventError::InvalidArgument(format!("status word {} out of range", word))
        })
    }

    // ========================================================================
    // Combo Events
    // ========================================================================

    /// Set combo inputs A..D. `None` leaves that input unchanged.
    pub fn set_combo_inputs(&self, inputs: [Option<u8>; 4]) -> Result<()> {
        let mut fields: SmallVec<[(RegField, u32); 4]> = SmallVec::new();
        for (idx, input) in inputs.iter().enumerate() {
            if let Some(event) = input {
                fields.push((self.pick(&self.layout.combo_input, idx, "combo input")?, *event as u32));
            }
        }
        self.write_fields(fields);
        Ok(())
    }

    pub fn combo_input(&self, idx: usize) -> Result<u8> {
        let field = self.pick(&self.layout.combo_input, idx, "combo input")?;
        Ok(self.read_field(field) as u8)
    }

    /// Set combo 0..2 logic. `None` leaves that combo unchanged.
    pub fn set_combo_control(&self, ops: [Option<ComboOp>; 3]) -> Result<()> {
        let mut fields: SmallVec<[(RegField, u32); 3]> = SmallVec::new();
        for (idx, op) in ops.iter().enumerate() {
            if let Some(op) = op {
                fields.push((self.pick(&self.layout.combo_control, idx, "combo")?, *op as u32));
            }
        }
        self.write_fields(fields);
        Ok(())
    }

    pub fn combo_control(&self, idx: usize) -> Result<ComboOp> {
        let field = self.pick(&self.layout.combo_control, idx, "combo")?;
        Ok(ComboOp::from_bits(self.read_field(field)))
    }

    // ========================================================================
    // Trace
    // ========================================================================

    /// Update trace mode and start/stop events. Absent fields are untouched.
    ///
    /// Only the core module has a trace mode.
    pub fn set_trace_control(&self, mode: Option<TraceMode>, start: Option<u8>, stop: Option<u8>) -> Result<()> {
        let trace = &self.layout.trace;
        let mut fields: SmallVec<[(RegField, u32); 3]> = SmallVec::new();
        if let Some(mode) = mode {
            let field = trace.mode.ok_or_else(|| {
                EventError::InvalidArgument(format!("{} module has no trace mode", self.module))
            })?;
            fields.push((field, mode as u32));
        }
        if let Some(start) = start {
            fields.push((trace.start, start as u32));
        }
        if let Some(stop) = stop {
            fields.push((trace.stop, stop as u32));
        }
        self.write_fields(fields);
        Ok(())
    }

    /// Update trace packet id and type. Absent fields are untouched.
    pub fn set_trace_packet(&self, id: Option<u8>, packet_type: Option<u8>) -> Result<()> {
        let trace = &self.layout.trace;
        let fields = id
            .map(|v| (trace.id, v as u32))
            .into_iter()
            .chain(packet_type.map(|v| (trace.packet_type, v as u32)));
        self.write_fields(fields);
        Ok(())
    }

    pub fn set_trace_event(&self, idx: usize, event: u8) -> Result<()> {
        let field = self.pick(&self.layout.trace.events, idx, "trace slot")?;
        self.write_field(field, event as u32);
        Ok(())
    }

    /// Write all eight trace slots.
    pub fn set_trace_events(&self, events: &TraceEvents) -> Result<()> {
        let mut regs: SmallVec<[(u32, u32); 2]> = SmallVec::new();
        for (idx, &event) in events.events.iter().enumerate() {
            let field = self.pick(&self.layout.trace.events, idx, "trace slot")?;
            match regs.iter_mut().find(|(off, _)| *off == field.offset) {
                Some((_, val)) => *val |= field.prep(event as u32),
                None => regs.push((field.offset, field.prep(event as u32))),
            }
        }
        for (offset, value) in regs {
            self.io.write32(self.addr(offset), value);
        }
        Ok(())
    }

    // ========================================================================
    // Performance Counters
    // ========================================================================

    /// Link counter `counter` to start/stop events.
    pub fn set_perf_counter_events(&self, counter: usize, start: u8, stop: u8) -> Result<()> {
        let perf = &self.layout.perf;
        let start_f = self.pick(&perf.start, counter, "perf counter")?;
        let stop_f = self.pick(&perf.stop, counter, "perf counter")?;
        self.write_fields([(start_f, start as u32), (stop_f, stop as u32)]);
        Ok(())
    }

    pub fn set_perf_counter_reset_event(&self, counter: usize, event: u8) -> Result<()> {
        let field = self.pick(&self.layout.perf.reset, counter, "perf counter")?;
        self.write_field(field, event as u32);
        Ok(())
    }

    pub fn perf_counter(&self, counter: u8) -> Result<u32> {
        let field = self.perf_array_field(false, counter)?;
        Ok(self.io.read32(self.addr(field.offset)))
    }

    pub fn set_perf_counter(&self, counter: u8, value: u32) -> Result<()> {
        let field = self.perf_array_field(false, counter)?;
        self.io.write32(self.addr(field.offset), value);
        Ok(())
    }

    /// Counter value at which the counter raises its event.
    pub fn set_perf_counter_event_value(&self, counter: u8, value: u32) -> Result<()> {
        let field = self.perf_array_field(true, counter)?;
        self.io.write32(self.addr(field.offset), value);
        Ok(())
    }

    fn perf_array_field(&self, event_value: bool, counter: u8) -> Result<RegField> {
        let arr = if event_value { &self.layout.perf.event_value } else { &self.layout.perf.counter };
        arr.at(counter).ok_or_else(|| {
            EventError::InvalidArgument(format!("perf counter {} out of range for {} module", counter, self.module))
        })
    }

    // ========================================================================
    // PC Events
    // ========================================================================

    /// Raise PC event `idx` when the core reaches `pc_addr`. Core only.
    pub fn set_pc_event(&self, idx: usize, pc_addr: u16, valid: bool) -> Result<()> {
        let pc = self.pick(&self.layout.pc_events, idx, "PC event")?;
        let value = pc.addr.prep(pc_addr as u32) | pc.valid.prep(valid as u32);
        self.io.write32(self.addr(pc.addr.offset), value);
        Ok(())
    }

    // ========================================================================
    // Stream-Switch Event Ports
    // ========================================================================

    /// Watch stream-switch port `port_id` on event port `port`. Core and PL only.
    pub fn set_port_select(&self, port: usize, port_type: PortType, port_id: u8) -> Result<()> {
        let sel = self.pick(&self.layout.port_select, port, "stream event port")?;
        self.write_fields([(sel.id, port_id as u32), (sel.master, port_type as u32)]);
        Ok(())
    }

    /// Port watched by event port `port`.
    pub fn port_select(&self, port: usize) -> Result<(PortType, u8)> {
        let sel = self.pick(&self.layout.port_select, port, "stream event port")?;
        let reg = self.io.read32(self.addr(sel.id.offset));
        let port_type = if sel.master.get(reg) != 0 { PortType::Master } else { PortType::Slave };
        Ok((port_type, sel.id.get(reg) as u8))
    }

    /// Selection register `select` (0 or 1) as a whole word.
    pub fn port_select_word(&self, select: usize) -> Result<u32> {
        let (offset, _) = self.port_select_reg(select)?;
        Ok(self.io.read32(self.addr(offset)))
    }

    /// Write selection register `select` in one access. Bits outside the
    /// port fields are dropped.
    pub fn set_port_select_word(&self, select: usize, value: u32) -> Result<()> {
        let (offset, mask) = self.port_select_reg(select)?;
        self.io.write32(self.addr(offset), value & mask);
        Ok(())
    }

    fn port_select_reg(&self, select: usize) -> Result<(u32, u32)> {
        let first = self.pick(&self.layout.port_select, select * 4, "port selection register")?;
        let offset = first.id.offset;
        let mask = self
            .layout
            .port_select
            .iter()
            .filter(|p| p.id.offset == offset)
            .fold(0, |m, p| m | p.id.mask | p.master.mask);
        Ok((offset, mask))
    }
}

fn check_column(map: &TileMap, col: u8) -> Result<()> {
    if col >= map.cols() {
        return Err(EventError::InvalidArgument(format!("column {} out of range", col)));
    }
    Ok(())
}

/// Route `event` onto `channel` in every compute row of a column.
///
/// Stops at the first failing tile; earlier rows stay programmed.
pub fn broadcast_column(
    io: &dyn RegisterIo,
    layout: &RegisterLayout,
    map: &TileMap,
    col: u8,
    module: ModuleType,
    channel: u8,
    event: u8,
) -> Result<()> {
    if module == ModuleType::Pl {
        return Err(EventError::InvalidArgument("column broadcast needs a Core or Memory module".into()));
    }
    check_column(map, col)?;
    for row in 1..=map.rows() {
        let tile = map.tile(Location::new(col, row));
        ModuleRegs::new(io, layout, tile, module)?.set_event_broadcast(channel, event)?;
    }
    Ok(())
}

/// Unblock the channels in `mask` towards `dir` in every compute row of a
/// column.
///
/// Stops at the first failing tile; earlier rows stay programmed.
pub fn broadcast_block_clear_column(
    io: &dyn RegisterIo,
    layout: &RegisterLayout,
    map: &TileMap,
    col: u8,
    module: ModuleType,
    dir: Direction,
    mask: u16,
) -> Result<()> {
    if module == ModuleType::Pl {
        return Err(EventError::InvalidArgument("column unblock needs a Core or Memory module".into()));
    }
    check_column(map, col)?;
    for row in 1..=map.rows() {
        let tile = map.tile(Location::new(col, row));
        ModuleRegs::new(io, layout, tile, module)?.broadcast_block_clear(Switch::A, dir, mask)?;
    }
    Ok(())
}

/// Block every channel in every direction for the whole column: Core and
/// Memory modules of each compute row, then both switches of the shim.
pub fn broadcast_block_all_column(io: &dyn RegisterIo, layout: &RegisterLayout, map: &TileMap, col: u8) -> Result<()> {
    check_column(map, col)?;
    for dir in Direction::ALL {
        for row in 1..=map.rows() {
            let tile = map.tile(Location::new(col, row));
            for module in [ModuleType::Core, ModuleType::Memory] {
                ModuleRegs::new(io, layout, tile, module)?.broadcast_block_set(Switch::A, dir, 0xFFFF)?;
            }
        }
    }

    let shim = ModuleRegs::new(io, layout, map.tile(Location::new(col, 0)), ModuleType::Pl)?;
    for dir in Direction::ALL {
        for switch in Switch::BOTH {
            shim.broadcast_block_set(switch, dir, 0xFFFF)?;
        }
    }
    log::debug!("Column {} broadcasts fully blocked", col);
    Ok(())
}
