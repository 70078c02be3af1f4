//! Top-level event driver.
//!
//! `EventDriver` owns the tile map and the handler registry behind a single
//! mutex. The registration API and the interrupt entry point both take that
//! lock, so registration never races the interrupt walk. Callbacks run with
//! the lock held and must not call back into the driver.
//!
//! # Bring-up
//!
//! ```
//! use std::sync::Arc;
//! use aie_events::device::{CustomArch, RegisterLayout, SimRegisters, TileMap};
//! use aie_events::events::{DriverConfig, EventDriver};
//!
//! let layout = Arc::new(RegisterLayout::aie1());
//! let arch = Arc::new(CustomArch::new(4, 2, vec![2, 3]));
//! let sim = Arc::new(SimRegisters::for_array(&TileMap::new(arch.clone(), &layout.address), &layout));
//! sim.set_all_clocked(&TileMap::new(arch.clone(), &layout.address), &layout);
//!
//! let driver = EventDriver::new(arch, sim, layout, DriverConfig::default());
//! driver.setup_default_error_handlers();
//! driver.initialize_error_broadcast_network().unwrap();
//! driver.enable_interrupts();
//! ```

use std::sync::Arc;

use parking_lot::Mutex;

use super::broadcast;
use super::error::{EventError, Result};
use super::ids::{ModuleEvents, NUM_EVENTS};
use super::module::ModuleRegs;
use super::policy::{self, ProcessTrap, TrapHandler};
use super::registry::{Callback, ErrorMasks, HandlerRegistry};
use super::router::{self, Router};
use super::shim_intc::{ShimL2, L2_LINE_BITS};
use crate::device::layout::RegisterLayout;
use crate::device::{ArchConfig, Location, ModuleMask, ModuleType, RegisterIo, TileMap};

/// Driver tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverConfig {
    /// Chip interrupt line the 2nd-level controllers drive
    pub chip_irq_line: u8,
    /// Poll budget per attempt while draining
    pub poll_timeout_us: u32,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self { chip_irq_line: 1, poll_timeout_us: 1000 }
    }
}

/// Which errors of a module an error registration covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSelect {
    One(u8),
    /// Every error that is routed to the driver
    All,
}

/// Which events an event unregistration covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSelect {
    One(u8),
    All,
}

impl EventSelect {
    fn event(self) -> Option<u8> {
        match self {
            EventSelect::One(e) => Some(e),
            EventSelect::All => None,
        }
    }
}

/// Tiles an event registration applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locations {
    /// Every in-use tile that has the module
    All,
    List(Vec<Location>),
}

impl From<Location> for Locations {
    fn from(loc: Location) -> Self {
        Locations::List(vec![loc])
    }
}

impl From<Vec<Location>> for Locations {
    fn from(locs: Vec<Location>) -> Self {
        Locations::List(locs)
    }
}

impl From<&[Location]> for Locations {
    fn from(locs: &[Location]) -> Self {
        Locations::List(locs.to_vec())
    }
}

#[derive(Debug)]
struct DriverState {
    tiles: TileMap,
    registry: HandlerRegistry,
}

impl DriverState {
    /// Expand `locations` into tiles. `All` stops each column below its
    /// first gated tile, which is never touched.
    fn resolve(
        &self,
        io: &dyn RegisterIo,
        layout: &RegisterLayout,
        locations: &Locations,
        module: ModuleType,
    ) -> Result<Vec<Location>> {
        match locations {
            Locations::All if module == ModuleType::Pl => Ok(self
                .tiles
                .iter()
                .filter(|t| t.in_use && t.has_module(module))
                .map(|t| t.location)
                .collect()),
            Locations::All => {
                let map = &self.tiles;
                let mut locs = Vec::new();
                for col in 0..map.cols() {
                    if map.is_above_gated(io, layout, Location::new(col, 0)) {
                        continue;
                    }
                    for row in 1..=map.rows() {
                        let tile = map.tile(Location::new(col, row));
                        if tile.in_use && tile.has_module(module) {
                            locs.push(tile.location);
                        }
                        if map.is_above_gated(io, layout, tile.location) {
                            break;
                        }
                    }
                }
                Ok(locs)
            }
            Locations::List(list) if list.is_empty() => {
                Err(EventError::InvalidArgument("empty location list".into()))
            }
            Locations::List(list) => Ok(list.clone()),
        }
    }
}

/// Event notification and interrupt driver for one AIE array.
pub struct EventDriver {
    io: Arc<dyn RegisterIo>,
    layout: Arc<RegisterLayout>,
    trap: Arc<dyn TrapHandler>,
    config: DriverConfig,
    state: Mutex<DriverState>,
}

impl EventDriver {
    pub fn new(
        arch: Arc<dyn ArchConfig>,
        io: Arc<dyn RegisterIo>,
        layout: Arc<RegisterLayout>,
        config: DriverConfig,
    ) -> Self {
        log::info!("Event driver for {} (chip IRQ {})", arch.name(), config.chip_irq_line);
        let tiles = TileMap::new(arch, &layout.address);
        Self {
            io,
            layout,
            trap: Arc::new(ProcessTrap),
            config,
            state: Mutex::new(DriverState { tiles, registry: HandlerRegistry::new() }),
        }
    }

    /// Replace the fatal action taken for unhandled errors.
    pub fn with_trap_handler(mut self, trap: Arc<dyn TrapHandler>) -> Self {
        self.trap = trap;
        self
    }

    #[inline]
    pub fn config(&self) -> DriverConfig {
        self.config
    }

    #[inline]
    pub fn layout(&self) -> &RegisterLayout {
        &self.layout
    }

    #[inline]
    pub fn io(&self) -> &dyn RegisterIo {
        self.io.as_ref()
    }

    // ========================================================================
    // Setup
    // ========================================================================

    /// Reset the error tables to the default classification.
    ///
    /// Every error handler is bound to this process. Errors that are logged
    /// by default get the error dispatch in the event table; the others
    /// become poll only.
    pub fn setup_default_error_handlers(&self) {
        let pid = std::process::id();
        let mut state = self.state.lock();
        let registry = &mut state.registry;

        for module in ModuleType::ALL {
            for handler in registry.errors_mut(module) {
                handler.callback = None;
                handler.arg = 0;
                handler.pid = pid;
            }
            *registry.masks_mut(module) = policy::default_masks(module);
            for event in ModuleEvents::of(module).errors() {
                if policy::needs_logging_by_default(module, event) {
                    registry.install_error_dispatch(module, event);
                }
            }
            let masks = registry.masks(module);
            log::debug!(
                "{} errors: default trap 0x{:08X}, poll only 0x{:08X}",
                module,
                masks.default_trap,
                masks.poll_only
            );
        }
    }

    /// Program the error broadcast network across the array.
    pub fn initialize_error_broadcast_network(&self) -> Result<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        router::initialize_network(
            self.io.as_ref(),
            &self.layout,
            &mut state.tiles,
            &state.registry,
            self.config.chip_irq_line,
        )
    }

    // ========================================================================
    // Interrupts
    // ========================================================================

    /// Unmask every 2nd-level controller.
    pub fn enable_interrupts(&self) {
        self.for_each_l2(|l2| l2.enable(L2_LINE_BITS));
    }

    /// Mask every 2nd-level controller.
    pub fn disable_interrupts(&self) {
        self.for_each_l2(|l2| l2.disable(L2_LINE_BITS));
    }

    fn for_each_l2(&self, f: impl Fn(&ShimL2<'_>)) {
        let state = self.state.lock();
        for tile in state.tiles.noc_tiles() {
            if let Ok(l2) = ShimL2::new(self.io.as_ref(), &self.layout, tile) {
                f(&l2);
            }
        }
    }

    /// Interrupt entry point.
    pub fn dispatch_interrupt(&self) {
        let state = self.state.lock();
        let router = Router {
            io: self.io.as_ref(),
            layout: &self.layout,
            map: &state.tiles,
            registry: &state.registry,
            trap: self.trap.as_ref(),
        };
        router.dispatch();
    }

    /// Wait until no 2nd-level controller has a pending bit.
    ///
    /// Retries forever; each expired poll budget is logged.
    pub fn wait_for_pending_events(&self) {
        loop {
            match self.wait_for_pending_events_timeout(self.config.poll_timeout_us) {
                Ok(()) => return,
                Err(e) => log::warn!("Still waiting for pending events: {}", e),
            }
        }
    }

    /// Bounded drain: fails with `HardwareTimeout` on the first 2nd-level
    /// status that stays non-zero for `timeout_us`.
    pub fn wait_for_pending_events_timeout(&self, timeout_us: u32) -> Result<()> {
        // The lock is released while polling so the interrupt walk can run
        let addresses: Vec<u64> = {
            let state = self.state.lock();
            state
                .tiles
                .noc_tiles()
                .filter_map(|t| ShimL2::new(self.io.as_ref(), &self.layout, t).ok())
                .map(|l2| l2.status_address())
                .collect()
        };
        for address in addresses {
            if !self.io.poll(address, L2_LINE_BITS, 0, timeout_us) {
                return Err(EventError::HardwareTimeout { address });
            }
        }
        Ok(())
    }

    // ========================================================================
    // Error Notification
    // ========================================================================

    /// Bind a callback to errors.
    ///
    /// Several modules may only be combined with `ErrorSelect::All`. `All`
    /// covers the errors that currently reach the driver and stops at the
    /// first failure. A `None` callback keeps the default trap but makes
    /// sure the error is routed.
    pub fn register_error_notification(
        &self,
        modules: ModuleMask,
        error: ErrorSelect,
        callback: Option<Callback>,
        arg: u64,
    ) -> Result<()> {
        if modules.is_empty() || !ModuleMask::ALL.contains(modules) {
            return Err(EventError::InvalidArgument(format!("invalid module mask 0x{:X}", modules.bits())));
        }
        if modules.bits().count_ones() > 1 && error != ErrorSelect::All {
            return Err(EventError::InvalidArgument(
                "several module types need ErrorSelect::All".into(),
            ));
        }

        let mut state = self.state.lock();
        for module in modules.modules() {
            let desc = ModuleEvents::of(module);
            match error {
                ErrorSelect::One(event) => {
                    if !desc.is_error(event) {
                        return Err(EventError::InvalidArgument(format!(
                            "event {} is not a {} error",
                            event, module
                        )));
                    }
                    self.register_error(&mut state, module, event, &callback, arg)?;
                }
                ErrorSelect::All => {
                    for event in desc.errors() {
                        let bit = 1u32 << (event - desc.error_start);
                        if state.registry.masks(module).poll_only & bit != 0 {
                            continue;
                        }
                        self.register_error(&mut state, module, event, &callback, arg)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn register_error(
        &self,
        state: &mut DriverState,
        module: ModuleType,
        event: u8,
        callback: &Option<Callback>,
        arg: u64,
    ) -> Result<()> {
        let desc = ModuleEvents::of(module);
        let offset = event - desc.error_start;
        let bit = 1u32 << offset;

        let handler = state
            .registry
            .error_mut(module, offset)
            .ok_or_else(|| EventError::InvalidArgument(format!("event {} is not a {} error", event, module)))?;
        if let Some(existing) = &handler.callback {
            let callback_differs = callback.as_ref().is_some_and(|cb| !Arc::ptr_eq(cb, existing));
            let arg_differs = arg != 0 && arg != handler.arg;
            if callback_differs || arg_differs {
                log::warn!("{} error {} has a different callback; unregister it first", module, event);
                return Err(EventError::AlreadyRegistered { module, event });
            }
        }
        handler.callback = callback.clone();
        handler.arg = arg;

        state.registry.masks_mut(module).default_trap |= bit;
        state.registry.install_error_dispatch(module, event);

        let masks = state.registry.masks_mut(module);
        if masks.poll_only & bit != 0 {
            masks.poll_only &= !bit;
            let poll_only = masks.poll_only;
            log::info!("{} error {} moved onto the broadcast network", module, event);
            router::update_error_groups(self.io.as_ref(), &self.layout, &state.tiles, module, poll_only)?;
        }
        Ok(())
    }

    /// Drop the callback of errors and stop default trapping.
    ///
    /// With `keep_logging` the errors stay routed and are logged when they
    /// fire; without it they become poll only.
    pub fn unregister_error_notification(&self, module: ModuleType, error: ErrorSelect, keep_logging: bool) -> Result<()> {
        let desc = ModuleEvents::of(module);
        let events: Vec<u8> = match error {
            ErrorSelect::One(event) if desc.is_error(event) => vec![event],
            ErrorSelect::One(event) => {
                return Err(EventError::InvalidArgument(format!("event {} is not a {} error", event, module)));
            }
            ErrorSelect::All => desc.errors().collect(),
        };

        let mut state = self.state.lock();
        let mut groups_changed = false;
        for event in events {
            let offset = event - desc.error_start;
            let bit = 1u32 << offset;
            if let Some(handler) = state.registry.error_mut(module, offset) {
                handler.callback = None;
                handler.arg = 0;
            }

            let masks = state.registry.masks_mut(module);
            masks.default_trap &= !bit;
            let was_poll_only = masks.poll_only & bit != 0;
            if keep_logging {
                masks.poll_only &= !bit;
            } else {
                masks.poll_only |= bit;
            }
            if keep_logging {
                state.registry.install_error_dispatch(module, event);
            }
            groups_changed |= was_poll_only == keep_logging;
        }

        if groups_changed {
            let poll_only = state.registry.masks(module).poll_only;
            router::update_error_groups(self.io.as_ref(), &self.layout, &state.tiles, module, poll_only)?;
        }
        Ok(())
    }

    // ========================================================================
    // Event Notification
    // ========================================================================

    /// Route `event` of `module` to the shim row at every location and bind
    /// `(callback, arg)` to it.
    ///
    /// Each location takes one broadcast channel and one handler reference.
    /// A conflicting binding is rejected before any tile is touched. Bulk
    /// registration stops at the first failing tile and keeps what was
    /// already applied.
    pub fn register_event_notification(
        &self,
        locations: impl Into<Locations>,
        module: ModuleType,
        event: u8,
        callback: Callback,
        arg: u64,
    ) -> Result<()> {
        let locations = locations.into();
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.registry.check_bindable(module, event, &callback, arg)?;

        for loc in state.resolve(self.io.as_ref(), &self.layout, &locations, module)? {
            let channel = broadcast::allocate(self.io.as_ref(), &self.layout, &mut state.tiles, loc, module, event)?;
            let refs = state.registry.bind_event(module, event, &callback, arg)?;
            log::debug!("{} {} event {} on channel {} ({} refs)", loc, module, event, channel, refs);
        }
        Ok(())
    }

    /// Release the broadcast channels carrying `event` (or every channel)
    /// at each location and drop the matching handler references.
    pub fn unregister_event_notification(
        &self,
        locations: impl Into<Locations>,
        module: ModuleType,
        event: EventSelect,
    ) -> Result<()> {
        if let EventSelect::One(e) = event {
            if e as usize >= NUM_EVENTS {
                return Err(EventError::InvalidArgument(format!("event {} out of range", e)));
            }
        }
        let locations = locations.into();
        let mut guard = self.state.lock();
        let state = &mut *guard;

        for loc in state.resolve(self.io.as_ref(), &self.layout, &locations, module)? {
            broadcast::release(
                self.io.as_ref(),
                &self.layout,
                &mut state.tiles,
                &mut state.registry,
                loc,
                module,
                event.event(),
            )?;
        }
        Ok(())
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Live references of the binding for `(module, event)`.
    pub fn event_handler_refs(&self, module: ModuleType, event: u8) -> u32 {
        self.state.lock().registry.event(module, event).map_or(0, |h| h.refs)
    }

    pub fn has_event_handler(&self, module: ModuleType, event: u8) -> bool {
        self.state.lock().registry.event(module, event).is_some()
    }

    /// Whether a user callback is bound to the error.
    pub fn error_handler_registered(&self, module: ModuleType, event: u8) -> bool {
        let desc = ModuleEvents::of(module);
        let Some(offset) = desc.error_offset(event) else {
            return false;
        };
        let state = self.state.lock();
        state.registry.error(module, offset).is_some_and(|h| h.callback.is_some())
    }

    pub fn error_masks(&self, module: ModuleType) -> ErrorMasks {
        self.state.lock().registry.masks(module)
    }

    /// Run `f` on the tile map under the driver lock.
    pub fn with_tiles<R>(&self, f: impl FnOnce(&TileMap) -> R) -> R {
        f(&self.state.lock().tiles)
    }

    /// Mark a tile as used or unused by the application.
    pub fn set_tile_in_use(&self, loc: Location, in_use: bool) -> Result<()> {
        let mut state = self.state.lock();
        let tile = state
            .tiles
            .get_mut(loc)
            .ok_or_else(|| EventError::InvalidArgument(format!("location {} outside the array", loc)))?;
        tile.in_use = in_use;
        Ok(())
    }

    /// Event registers of one module, bound to the driver's register I/O.
    pub fn module_regs(&self, loc: Location, module: ModuleType) -> Result<ModuleRegs<'_>> {
        let state = self.state.lock();
        let tile = state
            .tiles
            .get(loc)
            .ok_or_else(|| EventError::InvalidArgument(format!("location {} outside the array", loc)))?;
        ModuleRegs::new(self.io.as_ref(), &self.layout, tile, module)
    }
}

impl std::fmt::Debug for EventDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDriver")
            .field("config", &self.config)
            .field("tiles", &self.state.lock().tiles)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{CustomArch, SimRegisters, TileAddress};
    use crate::events::ids::{self, core, mem, pl};
    use crate::events::registry::{EventNotification, HandleStatus};
    use crate::events::shim_intc::ShimL2;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingTrap {
        count: AtomicUsize,
    }

    impl TrapHandler for CountingTrap {
        fn trap(&self, _pid: u32, _error: &EventNotification) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Fixture {
        layout: Arc<RegisterLayout>,
        sim: Arc<SimRegisters>,
        trap: Arc<CountingTrap>,
        driver: EventDriver,
    }

    /// Driver on a simulated array, clocked up to `clocked_rows` in every
    /// column, with defaults set up and the network initialized.
    fn fixture(cols: u8, rows: u8, noc: Vec<u8>, clocked_rows: u8) -> Fixture {
        let layout = Arc::new(RegisterLayout::aie1());
        let arch: Arc<dyn ArchConfig> = Arc::new(CustomArch::new(cols, rows, noc));
        let scratch = TileMap::new(Arc::clone(&arch), &layout.address);
        let sim = Arc::new(SimRegisters::for_array(&scratch, &layout));
        for col in 0..cols {
            sim.set_column_clocked(&scratch, &layout, col, clocked_rows);
        }

        let trap = Arc::new(CountingTrap::default());
        let driver = EventDriver::new(arch, sim.clone(), Arc::clone(&layout), DriverConfig::default())
            .with_trap_handler(trap.clone());
        driver.setup_default_error_handlers();
        driver.initialize_error_broadcast_network().unwrap();
        driver.enable_interrupts();
        Fixture { layout, sim, trap, driver }
    }

    impl Fixture {
        fn inject(&self, loc: Location, module: ModuleType, event: u8, channel: u8) -> bool {
            self.driver.with_tiles(|map| self.sim.inject_event(map, &self.layout, loc, module, event, channel))
        }
    }

    fn counter() -> (Arc<AtomicUsize>, Callback) {
        let hits = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&hits);
        let cb: Callback = Arc::new(move |_: &EventNotification| {
            sink.fetch_add(1, Ordering::SeqCst);
            HandleStatus::Handled
        });
        (hits, cb)
    }

    #[test]
    fn test_same_binding_refcounts_and_conflict_rejected() {
        let f = fixture(2, 2, vec![0], 2);
        let (_, cb) = counter();
        let (_, other) = counter();
        let loc = Location::new(1, 1);

        f.driver.register_event_notification(loc, ModuleType::Core, 70, cb.clone(), 3).unwrap();
        f.driver.register_event_notification(loc, ModuleType::Core, 70, cb.clone(), 3).unwrap();
        assert_eq!(f.driver.event_handler_refs(ModuleType::Core, 70), 2);

        let err = f.driver.register_event_notification(loc, ModuleType::Core, 70, other, 3);
        assert_eq!(err, Err(EventError::AlreadyRegistered { module: ModuleType::Core, event: 70 }));
        // Rejected before any channel was taken
        f.driver.with_tiles(|map| assert_eq!(map.tile(loc).core_broadcast_used, 0b111));
    }

    #[test]
    fn test_last_unregister_removes_handler() {
        let f = fixture(2, 2, vec![0], 2);
        let (_, cb) = counter();
        let locs = vec![Location::new(0, 1), Location::new(1, 2)];
        f.driver.register_event_notification(locs.clone(), ModuleType::Memory, 33, cb, 0).unwrap();
        assert_eq!(f.driver.event_handler_refs(ModuleType::Memory, 33), 2);

        f.driver.unregister_event_notification(locs[0], ModuleType::Memory, EventSelect::One(33)).unwrap();
        assert!(f.driver.has_event_handler(ModuleType::Memory, 33));
        f.driver.unregister_event_notification(locs[1], ModuleType::Memory, EventSelect::All).unwrap();
        assert!(!f.driver.has_event_handler(ModuleType::Memory, 33));
        f.driver.with_tiles(|map| {
            assert_eq!(map.tile(locs[0]).mem_broadcast_used, 1);
            assert_eq!(map.tile(locs[1]).mem_broadcast_used, 1);
        });
    }

    #[test]
    fn test_error_unregister_without_logging_becomes_poll_only() {
        let f = fixture(1, 2, vec![0], 2);
        let (_, cb) = counter();
        let event = mem::DMA_S2MM_1_ERROR;
        let bit = 1 << (event - mem::DM_ECC_ERROR_SCRUB_CORRECTED);

        f.driver.register_error_notification(ModuleMask::MEM, ErrorSelect::One(event), Some(cb), 0).unwrap();
        assert!(f.driver.error_handler_registered(ModuleType::Memory, event));

        f.driver.unregister_error_notification(ModuleType::Memory, ErrorSelect::One(event), false).unwrap();
        assert!(!f.driver.error_handler_registered(ModuleType::Memory, event));
        let masks = f.driver.error_masks(ModuleType::Memory);
        assert_ne!(masks.poll_only & bit, 0);
        assert_eq!(masks.default_trap & bit, 0);

        let regs = f.driver.module_regs(Location::new(0, 1), ModuleType::Memory).unwrap();
        assert_eq!(regs.group_event(5).unwrap() & bit, 0);
    }

    #[test]
    fn test_error_unregister_keep_logging() {
        let f = fixture(1, 1, vec![0], 1);
        f.driver.unregister_error_notification(ModuleType::Core, ErrorSelect::All, true).unwrap();
        let masks = f.driver.error_masks(ModuleType::Core);
        assert_eq!(masks, ErrorMasks { default_trap: 0, poll_only: 0 });
        assert!(f.driver.has_event_handler(ModuleType::Core, core::SRS_SATURATE));
        let regs = f.driver.module_regs(Location::new(0, 1), ModuleType::Core).unwrap();
        assert_eq!(regs.group_event(4).unwrap(), 0x3F_FFFF);
    }

    #[test]
    fn test_single_tile_event_dispatch() {
        let f = fixture(1, 1, vec![0], 1);
        let (hits, cb) = counter();
        let loc = Location::new(0, 1);
        f.driver.register_event_notification(loc, ModuleType::Core, 70, cb, 0).unwrap();
        assert!(f.inject(loc, ModuleType::Core, 70, 1));

        f.driver.dispatch_interrupt();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        let regs = f.driver.module_regs(loc, ModuleType::Core).unwrap();
        assert!(!regs.event_status_for(70).unwrap());

        // Nothing pending: a second pass is a no-op
        f.driver.dispatch_interrupt();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(f.driver.wait_for_pending_events_timeout(10), Ok(()));
    }

    #[test]
    fn test_default_trap_fires_once() {
        let f = fixture(1, 1, vec![0], 1);
        let loc = Location::new(0, 1);
        assert!(f.inject(loc, ModuleType::Core, core::PM_ECC_ERROR_2BIT, 0));

        f.driver.dispatch_interrupt();
        assert_eq!(f.trap.count.load(Ordering::SeqCst), 1);
        f.driver.dispatch_interrupt();
        assert_eq!(f.trap.count.load(Ordering::SeqCst), 1);

        let regs = f.driver.module_regs(loc, ModuleType::Core).unwrap();
        let offset = core::PM_ECC_ERROR_2BIT - core::SRS_SATURATE;
        assert_eq!(regs.group_event(4).unwrap() & (1 << offset), 0);
        assert!(!regs.event_status_for(core::PM_ECC_ERROR_2BIT).unwrap());
    }

    #[test]
    fn test_handled_error_does_not_trap() {
        let f = fixture(1, 1, vec![0], 1);
        let (hits, cb) = counter();
        f.driver.register_error_notification(ModuleMask::PL, ErrorSelect::All, Some(cb), 0).unwrap();
        assert!(f.inject(Location::new(0, 0), ModuleType::Pl, pl::CONTROL_PKT_ERROR, 0));

        f.driver.dispatch_interrupt();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(f.trap.count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_gated_row_is_never_read() {
        let f = fixture(1, 4, vec![0], 2);
        let (hits, cb) = counter();
        let loc = Location::new(0, 2);
        f.driver.register_event_notification(loc, ModuleType::Memory, 30, cb, 0).unwrap();
        assert!(f.inject(loc, ModuleType::Memory, 30, 1));

        f.sim.clear_logs();
        f.driver.dispatch_interrupt();
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        let touched = f.sim.tiles_read(&f.layout.address);
        assert!(touched.contains(&Location::new(0, 1)));
        assert!(touched.contains(&Location::new(0, 2)));
        assert!(!touched.contains(&Location::new(0, 3)));
        assert!(!touched.contains(&Location::new(0, 4)));
    }

    #[test]
    fn test_register_all_stops_at_gated_rows() {
        let f = fixture(1, 4, vec![0], 2);
        let (_, cb) = counter();
        f.sim.clear_logs();
        f.driver.register_event_notification(Locations::All, ModuleType::Core, 40, cb, 0).unwrap();
        assert_eq!(f.driver.event_handler_refs(ModuleType::Core, 40), 2);

        let written: Vec<u8> = f
            .sim
            .writes()
            .iter()
            .filter_map(|&(addr, _)| TileAddress::decode(addr, &f.layout.address))
            .map(|t| t.row)
            .collect();
        assert!(written.contains(&1) && written.contains(&2));
        assert!(written.iter().all(|&row| row <= 2), "rows written: {:?}", written);
        let touched = f.sim.tiles_read(&f.layout.address);
        assert!(!touched.contains(&Location::new(0, 3)));
        assert!(!touched.contains(&Location::new(0, 4)));

        f.sim.clear_logs();
        f.driver.unregister_event_notification(Locations::All, ModuleType::Core, EventSelect::One(40)).unwrap();
        assert!(!f.driver.has_event_handler(ModuleType::Core, 40));
        assert!(f.sim.writes().iter().all(|&(addr, _)| {
            TileAddress::decode(addr, &f.layout.address).map_or(true, |t| t.row <= 2)
        }));
    }

    #[test]
    fn test_register_all_columns() {
        let f = fixture(8, 1, vec![2, 3, 6, 7], 1);
        let (_, cb) = counter();
        f.driver.register_event_notification(Locations::All, ModuleType::Pl, 20, cb, 0).unwrap();
        assert_eq!(f.driver.event_handler_refs(ModuleType::Pl, 20), 8);
        f.driver.with_tiles(|map| {
            for tile in map.shim_tiles() {
                assert_eq!(tile.shim_internal_used, 0b11, "column {}", tile.location.col);
            }
        });

        f.driver.unregister_event_notification(Locations::All, ModuleType::Pl, EventSelect::One(20)).unwrap();
        assert!(!f.driver.has_event_handler(ModuleType::Pl, 20));
    }

    #[test]
    fn test_register_all_skips_unused_tiles() {
        let f = fixture(2, 2, vec![0], 2);
        f.driver.set_tile_in_use(Location::new(1, 2), false).unwrap();
        let (_, cb) = counter();
        f.driver.register_event_notification(Locations::All, ModuleType::Core, 40, cb, 0).unwrap();
        assert_eq!(f.driver.event_handler_refs(ModuleType::Core, 40), 3);
    }

    #[test]
    fn test_register_exhaustion_keeps_partial_state() {
        let f = fixture(2, 1, vec![0], 1);
        let (_, cb) = counter();
        for _ in 0..4 {
            f.driver.register_event_notification(Location::new(1, 0), ModuleType::Pl, 25, cb.clone(), 0).unwrap();
        }
        let err = f.driver.register_event_notification(Locations::All, ModuleType::Pl, 25, cb, 0);
        assert!(matches!(err, Err(EventError::ResourceExhausted { .. })));
        // Column 0 was served before column 1 ran out
        assert_eq!(f.driver.event_handler_refs(ModuleType::Pl, 25), 5);
    }

    #[test]
    fn test_error_registration_arguments() {
        let f = fixture(1, 1, vec![0], 1);
        let (_, cb) = counter();
        let both = ModuleMask::CORE | ModuleMask::MEM;
        assert!(matches!(
            f.driver.register_error_notification(both, ErrorSelect::One(core::PM_ECC_ERROR_2BIT), None, 0),
            Err(EventError::InvalidArgument(_))
        ));
        assert!(f.driver.register_error_notification(ModuleMask::empty(), ErrorSelect::All, None, 0).is_err());
        assert!(f.driver.register_error_notification(ModuleMask::CORE, ErrorSelect::One(70), None, 0).is_err());
        f.driver.register_error_notification(both, ErrorSelect::All, Some(cb), 0).unwrap();
        assert!(f.driver.error_handler_registered(ModuleType::Memory, mem::DMA_MM2S_0_ERROR));
        // Poll-only errors are not covered by All
        assert!(!f.driver.error_handler_registered(ModuleType::Core, core::SRS_SATURATE));
    }

    #[test]
    fn test_error_conflicting_callback() {
        let f = fixture(1, 1, vec![0], 1);
        let (_, a) = counter();
        let (_, b) = counter();
        let event = core::DM_ADDRESS_OUT_OF_RANGE;
        f.driver.register_error_notification(ModuleMask::CORE, ErrorSelect::One(event), Some(a.clone()), 1).unwrap();
        f.driver.register_error_notification(ModuleMask::CORE, ErrorSelect::One(event), Some(a), 1).unwrap();
        assert_eq!(
            f.driver.register_error_notification(ModuleMask::CORE, ErrorSelect::One(event), Some(b), 1),
            Err(EventError::AlreadyRegistered { module: ModuleType::Core, event })
        );
    }

    #[test]
    fn test_poll_only_error_moves_onto_network() {
        let f = fixture(1, 3, vec![0], 2);
        let (_, cb) = counter();
        let event = core::FP_OVERFLOW;
        let bit = 1 << (event - core::SRS_SATURATE);

        f.driver.register_error_notification(ModuleMask::CORE, ErrorSelect::One(event), Some(cb), 0).unwrap();
        let masks = f.driver.error_masks(ModuleType::Core);
        assert_eq!(masks.poll_only & bit, 0);
        assert_ne!(masks.default_trap & bit, 0);

        for row in 1..=2 {
            let regs = f.driver.module_regs(Location::new(0, row), ModuleType::Core).unwrap();
            assert_ne!(regs.group_event(4).unwrap() & bit, 0);
        }
        // Gated row untouched
        let gated = f.driver.module_regs(Location::new(0, 3), ModuleType::Core).unwrap();
        assert_eq!(gated.group_event(4).unwrap(), 0);
    }

    #[test]
    fn test_interrupt_masking() {
        let f = fixture(4, 1, vec![2, 3], 1);
        let l2_mask = |col| {
            f.driver.with_tiles(|map| {
                ShimL2::new(f.sim.as_ref(), &f.layout, map.tile(Location::new(col, 0))).unwrap().mask()
            })
        };
        assert_eq!(l2_mask(2), L2_LINE_BITS);
        f.driver.disable_interrupts();
        assert_eq!(l2_mask(2), 0);
        assert_eq!(l2_mask(3), 0);
        f.driver.enable_interrupts();
        assert_eq!(l2_mask(3), L2_LINE_BITS);
    }

    #[test]
    fn test_wait_times_out_on_pending_bit() {
        let f = fixture(1, 1, vec![0], 1);
        let status = f.layout.address.tile_base(0, 0) + f.layout.shim.l2.status as u64;
        f.sim.poke(status, 0b1);
        assert_eq!(
            f.driver.wait_for_pending_events_timeout(5),
            Err(EventError::HardwareTimeout { address: status })
        );
        f.sim.poke(status, 0);
        f.driver.wait_for_pending_events();
    }

    #[test]
    fn test_unregister_rejects_bad_arguments() {
        let f = fixture(1, 1, vec![0], 1);
        assert!(f.driver.unregister_error_notification(ModuleType::Pl, ErrorSelect::One(ids::TRUE), true).is_err());
        assert!(f
            .driver
            .unregister_event_notification(Locations::List(vec![]), ModuleType::Core, EventSelect::All)
            .is_err());
        assert!(f
            .driver
            .unregister_event_notification(Location::new(3, 1), ModuleType::Core, EventSelect::All)
            .is_err());
    }
}
