//! Event notification and interrupt handling.
//!
//! This module provides:
//! - Event and error identifiers per module type (`ids`)
//! - Register drivers for module event logic and the shim interrupt controllers
//! - Broadcast channel allocation and the 1st-level IRQ line map
//! - Handler tables, the default error policy and the interrupt walk
//! - `EventDriver`, the locked entry point tying them together
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use aie_events::device::{CustomArch, Location, ModuleType, RegisterLayout, SimRegisters, TileMap};
//! use aie_events::events::{Callback, DriverConfig, EventDriver, EventNotification, HandleStatus};
//!
//! let layout = Arc::new(RegisterLayout::aie1());
//! let arch = Arc::new(CustomArch::new(1, 2, vec![0]));
//! let map = TileMap::new(arch.clone(), &layout.address);
//! let sim = Arc::new(SimRegisters::for_array(&map, &layout));
//! sim.set_all_clocked(&map, &layout);
//!
//! let driver = EventDriver::new(arch, sim.clone(), layout.clone(), DriverConfig::default());
//! driver.setup_default_error_handlers();
//! driver.initialize_error_broadcast_network().unwrap();
//!
//! let cb: Callback = Arc::new(|n: &EventNotification| {
//!     println!("event {} at {}", n.event, n.location);
//!     HandleStatus::Handled
//! });
//! driver.register_event_notification(Location::new(0, 1), ModuleType::Core, 70, cb, 0).unwrap();
//! assert_eq!(driver.event_handler_refs(ModuleType::Core, 70), 1);
//! ```

pub mod broadcast;
pub mod driver;
pub mod error;
pub mod ids;
pub mod irq_map;
pub mod module;
pub mod policy;
pub mod registry;
pub mod router;
pub mod shim_intc;

pub use driver::{DriverConfig, ErrorSelect, EventDriver, EventSelect, Locations};
pub use error::{EventError, Result};
pub use module::{ComboOp, ModuleRegs, PortType};
pub use policy::{DefaultPolicy, ProcessTrap, TrapHandler};
pub use registry::{Callback, ErrorMasks, EventNotification, HandleStatus};
pub use shim_intc::{ShimL1, ShimL2};
