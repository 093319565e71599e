//! Hosted supervisor for the Ember kernel
//!
//! Runs the kernel as an ordinary desktop process. User tasks are native
//! programs on worker threads that reach the kernel only through
//! [`ember_process::Process`]; the supervisor thread owns the kernel and
//! is the single place kernel entry points are called from.
//!
//! # Architecture
//!
//! ```text
//! stdin reader ──Input──┐
//!                       ▼
//! worker threads ──Trap──► event queue ──► Supervisor ──► Kernel<HostedHal>
//!       ▲                                      │
//!       └──────────── WakeSlot ◄── Completion ─┘
//! ```
//!
//! - `hal` - [`HostedHal`]: `SoftMmu` memory, `RamFs` files, stdout console
//! - `supervisor` - the event loop and trap servicing
//! - `worker` - per-task threads and their syscall port
//! - `wake` - single-slot wake channel a worker parks on
//! - `programs` - the built-in program set and boot filesystem
//! - `input` - host byte stream to key decoding
//! - `cli` - command-line options

pub mod cli;
pub mod hal;
pub mod input;
pub mod programs;
pub mod supervisor;
pub mod wake;
pub mod worker;


pub use hal::{ConsoleOptions, HostedHal, Launch};
pub use programs::{default_fs, Programs};
pub use supervisor::{Outcome, Supervisor};
pub use wake::WakeSlot;
pub use worker::{Event, Program, WorkerPort};
