//! aie-events library
//!
//! Event notification and interrupt broadcast driver for AI Engine tile
//! arrays: broadcast channel allocation, the error broadcast network, the
//! interrupt walk from the chip line down to the raising module, and the
//! default error policy.

pub mod config;
pub mod device;
pub mod events;
