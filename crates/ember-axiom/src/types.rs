//! Common types for the Axiom layer.

/// Process identifier (matches ember-kernel's ProcessId)
pub type ProcessId = u32;

/// Event identifier (monotonic, unique within SysLog)
pub type EventId = u64;
