//! Broadcast channel allocation.
//!
//! Core and Memory modules share 16 broadcast channels per tile; channel 0
//! carries the tile's error group and is never handed out. Shim PL modules
//! reach the 1st-level controller through 5 internal-event slots instead;
//! slot 0 carries the shim error group, slots 1..4 are allocatable and
//! slot `s` raises L1 status bit `16 + s` on switch A.

use super::error::{EventError, Result};
use super::ids;
use super::module::ModuleRegs;
use super::registry::HandlerRegistry;
use super::shim_intc::{ShimL1, INTERNAL_EVENT_BIT0};
use crate::device::layout::RegisterLayout;
use crate::device::{Location, ModuleType, RegisterIo, Switch, TileMap};

/// Channel reserved for the error group.
pub const ERROR_CHANNEL: u8 = 0;

/// Allocatable channels of a Core or Memory module.
const CHANNEL_MASK: u16 = 0xFFFE;
/// Allocatable internal-event slots of a PL module.
const SLOT_MASK: u16 = 0x1E;

#[inline]
fn allocatable(module: ModuleType) -> u16 {
    match module {
        ModuleType::Pl => SLOT_MASK,
        _ => CHANNEL_MASK,
    }
}

fn lookup(map: &TileMap, loc: Location, module: ModuleType) -> Result<()> {
    let tile = map
        .get(loc)
        .ok_or_else(|| EventError::InvalidArgument(format!("location {} outside the array", loc)))?;
    if !tile.has_module(module) {
        return Err(EventError::InvalidArgument(format!("tile {} has no {} module", loc, module)));
    }
    Ok(())
}

/// Whether the module at `loc` has a free channel (or slot).
pub fn check_available(map: &TileMap, loc: Location, module: ModuleType) -> Result<bool> {
    lookup(map, loc, module)?;
    let used = map.tile(loc).used_mask(module);
    Ok(!used & allocatable(module) != 0)
}

/// Take the lowest free channel at `loc` and route `event` onto it.
pub fn allocate(
    io: &dyn RegisterIo,
    layout: &RegisterLayout,
    map: &mut TileMap,
    loc: Location,
    module: ModuleType,
    event: u8,
) -> Result<u8> {
    lookup(map, loc, module)?;
    let tile = map.tile(loc);
    let free = !tile.used_mask(module) & allocatable(module);
    if free == 0 {
        log::warn!("No free broadcast resource for {} module at {}", module, loc);
        return Err(EventError::ResourceExhausted { location: loc, module });
    }
    let channel = free.trailing_zeros() as u8;

    match module {
        ModuleType::Pl => {
            let l1 = ShimL1::new(io, layout, tile, Switch::A)?;
            l1.set_irq_event(channel, event)?;
            l1.enable(1 << (INTERNAL_EVENT_BIT0 + channel as u32));
        }
        _ => ModuleRegs::new(io, layout, tile, module)?.set_event_broadcast(channel, event)?,
    }

    let tile = map.tile_mut(loc);
    let used = tile.used_mask(module) | (1 << channel);
    tile.set_used_mask(module, used);
    log::debug!("{} {} event {} -> channel {}", loc, module, event, channel);
    Ok(channel)
}

/// Disconnect channels at `loc` and drop their handler references.
///
/// With `Some(event)` the first channel carrying `event` is released; with
/// `None` every allocated channel is. Returns the number released.
pub fn release(
    io: &dyn RegisterIo,
    layout: &RegisterLayout,
    map: &mut TileMap,
    registry: &mut HandlerRegistry,
    loc: Location,
    module: ModuleType,
    event: Option<u8>,
) -> Result<u32> {
    lookup(map, loc, module)?;
    let used = map.tile(loc).used_mask(module) & allocatable(module);
    let mut released = 0u16;

    for channel in (0..16u8).filter(|&c| used & (1u16 << c) != 0) {
        let tile = map.tile(loc);
        let assigned = match module {
            ModuleType::Pl => {
                let l1 = ShimL1::new(io, layout, tile, Switch::A)?;
                let assigned = l1.irq_event(channel)?;
                if event.is_some_and(|e| e != assigned) {
                    continue;
                }
                l1.disable(1 << (INTERNAL_EVENT_BIT0 + channel as u32));
                l1.set_irq_event(channel, ids::NONE)?;
                assigned
            }
            _ => {
                let regs = ModuleRegs::new(io, layout, tile, module)?;
                let assigned = regs.event_broadcast(channel)?;
                if event.is_some_and(|e| e != assigned) {
                    continue;
                }
                regs.set_event_broadcast(channel, ids::NONE)?;
                assigned
            }
        };

        released |= 1 << channel;
        let remaining = registry.release_event(module, assigned);
        log::debug!("{} {} channel {} released (event {}, {} refs left)", loc, module, channel, assigned, remaining);

        if event.is_some() {
            break;
        }
    }

    let tile = map.tile_mut(loc);
    let used = tile.used_mask(module) & !released;
    tile.set_used_mask(module, used);
    Ok(released.count_ones())
}
