//! Default error classification and the trap action.
//!
//! Every error falls in one of three default classes:
//!
//! | Class    | Routed to the shim | Logged | Traps |
//! |----------|--------------------|--------|-------|
//! | Silent   | no (poll only)     | no     | no    |
//! | LogOnly  | yes                | yes    | no    |
//! | Trap     | yes                | yes    | yes   |
//!
//! Registering a callback for an error forces it into the trap class, with
//! the callback able to veto the trap by returning `Handled`.

use super::ids::{core, mem, ModuleEvents};
use super::module::ModuleRegs;
use super::registry::{ErrorMasks, EventNotification, HandleStatus, HandlerRegistry};
use crate::device::layout::RegisterLayout;
use crate::device::{ModuleType, RegisterIo, TileDescriptor};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultPolicy {
    Silent,
    LogOnly,
    Trap,
}

/// Whether an error reaches the driver when nobody registered for it.
pub fn needs_logging_by_default(module: ModuleType, event: u8) -> bool {
    match module {
        ModuleType::Core => !matches!(
            event,
            core::SRS_SATURATE
                | core::UPS_SATURATE
                | core::FP_OVERFLOW
                | core::FP_UNDERFLOW
                | core::FP_INVALID
                | core::FP_DIV_BY_ZERO
                | core::PM_ECC_ERROR_SCRUB_CORRECTED
                | core::PM_ECC_ERROR_SCRUB_2BIT
                | core::PM_ECC_ERROR_1BIT
                | core::INSTR_WARNING
                | core::INSTR_ERROR
        ),
        ModuleType::Memory => !matches!(
            event,
            mem::DM_ECC_ERROR_SCRUB_CORRECTED | mem::DM_ECC_ERROR_SCRUB_2BIT | mem::DM_ECC_ERROR_1BIT
        ),
        ModuleType::Pl => true,
    }
}

/// Whether an error traps the application when nobody registered for it.
pub fn needs_trap_by_default(module: ModuleType, event: u8) -> bool {
    if !needs_logging_by_default(module, event) {
        return false;
    }
    match module {
        ModuleType::Memory => !(mem::DM_PARITY_ERROR_BANK_2..=mem::DM_PARITY_ERROR_BANK_7).contains(&event),
        _ => true,
    }
}

/// Default class of an error event, `None` for non-error events.
pub fn default_policy(module: ModuleType, event: u8) -> Option<DefaultPolicy> {
    if !ModuleEvents::of(module).is_error(event) {
        return None;
    }
    Some(if needs_trap_by_default(module, event) {
        DefaultPolicy::Trap
    } else if needs_logging_by_default(module, event) {
        DefaultPolicy::LogOnly
    } else {
        DefaultPolicy::Silent
    })
}

/// Masks computed from the default classification.
pub fn default_masks(module: ModuleType) -> ErrorMasks {
    let desc = ModuleEvents::of(module);
    desc.errors().fold(ErrorMasks::default(), |mut masks, event| {
        let bit = 1u32 << (event - desc.error_start);
        if needs_trap_by_default(module, event) {
            masks.default_trap |= bit;
        }
        if !needs_logging_by_default(module, event) {
            masks.poll_only |= bit;
        }
        masks
    })
}

// ============================================================================
// Trap
// ============================================================================

/// Fatal action taken for an unhandled error.
pub trait TrapHandler: Send + Sync {
    /// `pid` is the process recorded for the error at registration.
    fn trap(&self, pid: u32, error: &EventNotification);
}

/// Kill the owning process.
///
/// `SIGKILL` on unix, process exit elsewhere.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessTrap;

impl TrapHandler for ProcessTrap {
    #[cfg(unix)]
    fn trap(&self, pid: u32, error: &EventNotification) {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        log::error!("Trapping process {} on {} event {} at {}", pid, error.module, error.event, error.location);
        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            log::error!("Failed to signal process {}: {}", pid, e);
            std::process::exit(-1);
        }
    }

    #[cfg(not(unix))]
    fn trap(&self, _pid: u32, error: &EventNotification) {
        log::error!("Exiting on {} event {} at {}", error.module, error.event, error.location);
        std::process::exit(-1);
    }
}

/// Service an error event raised by `tile`.
///
/// Logs it, then runs the user callback if one is registered, trapping when
/// the callback declines. Without a callback, errors in the default-trap
/// mask are first disabled in the tile's error group so they stop
/// re-asserting, then trapped.
pub fn handle_error(
    io: &dyn RegisterIo,
    layout: &RegisterLayout,
    tile: &TileDescriptor,
    registry: &HandlerRegistry,
    trap: &dyn TrapHandler,
    module: ModuleType,
    event: u8,
) {
    let desc = ModuleEvents::of(module);
    let (Some(offset), Some(name)) = (desc.error_offset(event), desc.error_name(event)) else {
        log::warn!("{} event {} at {} is not an error", module, event, tile.location);
        return;
    };
    log::error!("Dev Error: {}, {}", tile.location, name);

    let Some(handler) = registry.error(module, offset) else {
        return;
    };
    let notification = EventNotification { location: tile.location, module, event, arg: handler.arg };

    if let Some(callback) = &handler.callback {
        if callback(&notification) == HandleStatus::NotHandled {
            trap.trap(handler.pid, &notification);
        }
        return;
    }

    if registry.masks(module).default_trap & (1 << offset) != 0 {
        match ModuleRegs::new(io, layout, tile, module) {
            Ok(regs) => {
                let group = desc.group_errors_index;
                let disabled = regs
                    .group_event(group)
                    .and_then(|enabled| regs.set_group_event(group, enabled & !(1 << offset)));
                if let Err(e) = disabled {
                    log::warn!("Cannot disable {} error {} at {}: {}", module, name, tile.location, e);
                }
            }
            Err(e) => log::warn!("Cannot disable error group at {}: {}", tile.location, e),
        }
        trap.trap(handler.pid, &notification);
    }
}
