//! Event and error handler tables.
//!
//! One table per module type. An event binding is shared by every tile of
//! that module type: a handler registered for Core event 70 runs for any
//! Core module that raises 70 and has a route to the shim row.
//!
//! Event slots carry a reference count, one reference per tile that has a
//! broadcast channel allocated for the event. Error slots hold the optional
//! user callback for one error and the process to trap.

use std::fmt;
use std::sync::Arc;

use super::error::{EventError, Result};
use super::ids::{ModuleEvents, NUM_EVENTS};
use crate::device::{Location, ModuleType};

/// Callback verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleStatus {
    Handled,
    /// For error callbacks this triggers the trap.
    NotHandled,
}

/// What a callback is told about the event that fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventNotification {
    pub location: Location,
    pub module: ModuleType,
    pub event: u8,
    /// Opaque value given at registration
    pub arg: u64,
}

/// Notification callback. Runs with the driver lock held.
pub type Callback = Arc<dyn Fn(&EventNotification) -> HandleStatus + Send + Sync>;

/// Who services an event slot.
#[derive(Clone)]
pub enum HandlerKind {
    /// Routed to the error policy
    ErrorDispatch,
    User(Callback),
}

impl fmt::Debug for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerKind::ErrorDispatch => write!(f, "ErrorDispatch"),
            HandlerKind::User(cb) => write!(f, "User({:p})", Arc::as_ptr(cb)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventHandler {
    pub kind: HandlerKind,
    pub arg: u64,
    /// Tiles holding a broadcast route for this binding
    pub refs: u32,
}

impl EventHandler {
    fn is_same(&self, callback: &Callback, arg: u64) -> bool {
        match &self.kind {
            HandlerKind::User(cb) => Arc::ptr_eq(cb, callback) && self.arg == arg,
            HandlerKind::ErrorDispatch => false,
        }
    }
}

#[derive(Clone, Default)]
pub struct ErrorHandler {
    pub callback: Option<Callback>,
    pub arg: u64,
    /// Process trapped when the error is not handled
    pub pid: u32,
}

impl fmt::Debug for ErrorHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorHandler")
            .field("callback", &self.callback.as_ref().map(Arc::as_ptr))
            .field("arg", &self.arg)
            .field("pid", &self.pid)
            .finish()
    }
}

/// Per-module error policy masks, bit `i` = error offset `i`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ErrorMasks {
    pub default_trap: u32,
    /// Errors kept off the broadcast network
    pub poll_only: u32,
}

#[derive(Debug)]
struct ModuleHandlers {
    events: Vec<Option<EventHandler>>,
    errors: Vec<ErrorHandler>,
    masks: ErrorMasks,
}

impl ModuleHandlers {
    fn new(module: ModuleType) -> Self {
        Self {
            events: vec![None; NUM_EVENTS],
            errors: vec![ErrorHandler::default(); ModuleEvents::of(module).error_count() as usize],
            masks: ErrorMasks::default(),
        }
    }
}

/// Handler tables for all three module types.
#[derive(Debug)]
pub struct HandlerRegistry {
    modules: [ModuleHandlers; 3],
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            modules: ModuleType::ALL.map(ModuleHandlers::new),
        }
    }

    fn check_event(event: u8) -> Result<usize> {
        if (event as usize) < NUM_EVENTS {
            Ok(event as usize)
        } else {
            Err(EventError::InvalidArgument(format!("event {} out of range", event)))
        }
    }

    // ========================================================================
    // Event Handlers
    // ========================================================================

    pub fn event(&self, module: ModuleType, event: u8) -> Option<&EventHandler> {
        self.modules[module.index()].events.get(event as usize)?.as_ref()
    }

    /// Fail unless `(callback, arg)` may be bound to the event.
    pub fn check_bindable(&self, module: ModuleType, event: u8, callback: &Callback, arg: u64) -> Result<()> {
        Self::check_event(event)?;
        match self.event(module, event) {
            Some(h) if !h.is_same(callback, arg) => Err(EventError::AlreadyRegistered { module, event }),
            _ => Ok(()),
        }
    }

    /// Add one reference to the binding, creating it if needed.
    pub fn bind_event(&mut self, module: ModuleType, event: u8, callback: &Callback, arg: u64) -> Result<u32> {
        self.check_bindable(module, event, callback, arg)?;
        let slot = &mut self.modules[module.index()].events[event as usize];
        let handler = slot.get_or_insert_with(|| EventHandler {
            kind: HandlerKind::User(Arc::clone(callback)),
            arg,
            refs: 0,
        });
        handler.refs += 1;
        Ok(handler.refs)
    }

    /// Drop one reference to a user binding. The binding is removed when
    /// the count reaches zero. Returns the remaining count.
    pub fn release_event(&mut self, module: ModuleType, event: u8) -> u32 {
        let Some(slot) = self.modules[module.index()].events.get_mut(event as usize) else {
            return 0;
        };
        let remaining = match slot {
            Some(h) if matches!(h.kind, HandlerKind::User(_)) => {
                h.refs = h.refs.saturating_sub(1);
                h.refs
            }
            Some(h) => return h.refs,
            None => return 0,
        };
        if remaining == 0 {
            log::debug!("{} event {} handler removed", module, event);
            *slot = None;
        }
        remaining
    }

    /// Point an unbound error event at the error policy.
    pub fn install_error_dispatch(&mut self, module: ModuleType, event: u8) {
        if let Some(slot) = self.modules[module.index()].events.get_mut(event as usize) {
            if slot.is_none() {
                *slot = Some(EventHandler { kind: HandlerKind::ErrorDispatch, arg: 0, refs: 0 });
            }
        }
    }

    // ========================================================================
    // Error Handlers
    // ========================================================================

    /// Error handler by offset within the module's error range.
    pub fn error(&self, module: ModuleType, offset: u8) -> Option<&ErrorHandler> {
        self.modules[module.index()].errors.get(offset as usize)
    }

    pub fn error_mut(&mut self, module: ModuleType, offset: u8) -> Option<&mut ErrorHandler> {
        self.modules[module.index()].errors.get_mut(offset as usize)
    }

    pub fn errors_mut(&mut self, module: ModuleType) -> &mut [ErrorHandler] {
        &mut self.modules[module.index()].errors
    }

    #[inline]
    pub fn masks(&self, module: ModuleType) -> ErrorMasks {
        self.modules[module.index()].masks
    }

    #[inline]
    pub fn masks_mut(&mut self, module: ModuleType) -> &mut ErrorMasks {
        &mut self.modules[module.index()].masks
    }
}
