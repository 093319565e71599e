//! Ember Axiom - kernel audit trail
//!
//! The SysLog records every syscall (request + response) together with the
//! lifecycle events the kernel drives on its own: spawns, exits, scheduler
//! switches, signal deliveries and faults. Events are append-only with
//! monotonic ids and serialize with serde for export.

#![no_std]
extern crate alloc;

mod syslog;
mod types;

pub use syslog::{SysEvent, SysEventType, SysLog, MAX_SYSLOG_EVENTS};
pub use types::{EventId, ProcessId};
