//! 1st-level IRQ line assignment and its inverse.
//!
//! Each shim tile's L1 controller (per switch) claims one of six lines into
//! the L2 controller of a nearby NoC shim tile. The assignment is a fixed
//! pattern keyed to column position. On AIE1, columns 0..43 repeat
//!
//! ```text
//! col % 4:      0     1     2     3
//! shim:        PL    PL    NoC   NoC
//! line (A,B):  0,1   2,3   4,5   0,1
//! ```
//!
//! and columns 44..49 read `0,1 2,3 4,5 0,1 2,3 4,5`.
//!
//! Lines come in pairs `p = line / 2`. An even-indexed NoC column collects
//! pairs 0..2 from the two columns on its left and itself; an odd-indexed
//! NoC column collects them from itself and the columns on its right.
//! The L2 status bit equals the line number.

use crate::device::{ArchConfig, Switch};

/// Number of L1 lines an L2 controller can receive.
pub const L1_LINES: u8 = 6;

/// L1 IRQ line of `(col, switch)`.
///
/// Values of `L1_LINES` or more mean the column cannot be routed.
pub fn l1_irq_line(arch: &dyn ArchConfig, col: u8, switch: Switch) -> u8 {
    let sw = switch.index() as u8;
    match arch.noc_index(col) {
        Some(idx) if idx % 2 == 0 => 4 + sw,
        Some(_) => sw,
        None => {
            let line = 2 * (col % 4) + sw;
            if arch.has_noc_right_of(col) {
                line
            } else {
                // Hand off to the NoC tile on the left
                line + 2
            }
        }
    }
}

/// NoC column and L2 bit that receive `(col, switch)`, or `None` if the
/// column has no owner.
pub fn l1_route(arch: &dyn ArchConfig, col: u8, switch: Switch) -> Option<(u8, u8)> {
    if col >= arch.columns() {
        return None;
    }
    let line = l1_irq_line(arch, col, switch);
    if line >= L1_LINES {
        return None;
    }
    if arch.is_noc_column(col) {
        return Some((col, line));
    }

    let p = line / 2;
    let is_noc_with_parity = |c: u8, even: bool| arch.noc_index(c).map(|i| (i % 2 == 0) == even).unwrap_or(false);

    let right = col
        .checked_add(2)
        .and_then(|c| c.checked_sub(p))
        .filter(|&c| is_noc_with_parity(c, true));
    let left = col.checked_sub(p).filter(|&c| is_noc_with_parity(c, false));
    right.or(left).map(|noc| (noc, line))
}

/// Column and switch that drive L2 `bit` of NoC column `noc`.
pub fn column_for_l2_bit(arch: &dyn ArchConfig, noc: u8, bit: u8) -> Option<(u8, Switch)> {
    if bit >= L1_LINES {
        return None;
    }
    let idx = arch.noc_index(noc)?;
    let p = bit / 2;
    let switch = if bit % 2 == 0 { Switch::A } else { Switch::B };
    let col = if idx % 2 == 0 {
        (noc as u16 + p as u16).checked_sub(2)?
    } else {
        noc as u16 + p as u16
    };
    let col = u8::try_from(col).ok()?;

    (l1_route(arch, col, switch) == Some((noc, bit))).then_some((col, switch))
}

/// One row of the routing table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnRoute {
    pub col: u8,
    pub switch: Switch,
    pub line: u8,
    /// `(noc column, L2 bit)`
    pub route: Option<(u8, u8)>,
}

/// Routing of every column and switch, left to right.
pub fn routing_table(arch: &dyn ArchConfig) -> Vec<ColumnRoute> {
    (0..arch.columns())
        .flat_map(|col| {
            Switch::BOTH.into_iter().map(move |switch| ColumnRoute {
                col,
                switch,
                line: l1_irq_line(arch, col, switch),
                route: l1_route(arch, col, switch),
            })
        })
        .collect()
}
