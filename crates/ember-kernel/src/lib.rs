//! Ember Kernel Core
//!
//! This crate implements a small multi-terminal process kernel:
//! - Executable loading into per-task frames behind one shared user window
//! - Process control blocks with parent/child execution (`execute`/`halt`)
//! - Per-task file descriptor tables over terminals, files and timers
//! - Signals with user handlers and a sigreturn trampoline
//! - Round-robin scheduling across virtual terminals
//! - RTC virtualization (one hardware clock, many virtual frequencies)
//!
//! The kernel is a deterministic state machine over a [`HAL`]. Platform
//! code calls one entry point per event (syscall trap, timer tick, RTC
//! tick, key press, processor exception) and acts on the returned
//! [`Dispatch`].

#![no_std]
extern crate alloc;

pub mod config;
pub mod error;
pub mod fd;
pub mod loader;
pub mod process;
pub mod rtc;
pub mod signal;
pub mod terminal;
pub mod types;

mod fault;
mod io;
mod lifecycle;
mod scheduler;
mod syscall;

use alloc::vec::Vec;
use ember_hal::{ExecutionContext, Irq, UserEntry, HAL};

// Re-export HAL types
pub use ember_hal::{HalError, HAL as HalTrait};

// Re-export Axiom types
pub use ember_axiom::{SysEvent, SysEventType, SysLog};

pub use config::{FaultPolicy, KernelConfig};
pub use error::{ErrorClass, KernelError, LoadError};
pub use fault::Fault;
pub use fd::{fd_check, FileObject, FileTable, OpenFile, Permissions};
pub use io::ReadProgress;
pub use lifecycle::parse_command;
pub use process::{Process, ProcessMetrics, ProcessState, ProcessTable, WaitChannel};
pub use rtc::{RtcHandle, RtcHandleId, RtcRegistry};
pub use scheduler::Scheduler;
pub use signal::{Delivery, Signal, SignalState};
pub use syscall::Syscall;
pub use terminal::{Key, KeyOutcome, TermMode, Terminal};
pub use types::{ProcessId, TrapFrame};

/// What the platform must do after a kernel entry point returns.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dispatch {
    /// Return to the interrupted code unchanged
    Continue,
    /// Return to the caller with this value in eax
    Return(i32),
    /// The caller must wait; re-issue the call after the next interrupt
    Block(WaitChannel),
    /// Start a new task in user mode
    Enter(UserEntry),
    /// The scheduler moved the CPU to another task
    Switch {
        /// Task that was running (`None` = idle)
        from: Option<ProcessId>,
        /// Task that now runs
        to: ProcessId,
    },
    /// A task terminated; resume its parent (`None` = idle) with `value`
    Resume {
        /// Task that resumes
        pid: Option<ProcessId>,
        /// Value its pending `execute` returns
        value: i32,
    },
    /// The system halted
    Halt,
}

/// System-wide metrics
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SystemMetrics {
    /// Live tasks
    pub process_count: usize,
    /// Task slots configured
    pub max_tasks: usize,
    /// Open RTC handles
    pub rtc_handles: usize,
    /// Hardware RTC frequency
    pub rtc_hw_rate: u32,
    /// Scheduler ticks since boot
    pub ticks: u64,
    /// Uptime in nanoseconds
    pub uptime_ns: u64,
}

/// The kernel state
pub struct Kernel<H: HAL> {
    /// Hardware abstraction layer
    hal: H,
    /// Boot-time configuration
    config: KernelConfig,
    /// Live tasks
    processes: ProcessTable,
    /// Task the CPU is running (`None` = idle)
    current: Option<ProcessId>,
    /// Kernel context with no task running
    idle_context: ExecutionContext,
    /// Virtual terminals
    terminals: Vec<Terminal>,
    /// Terminal whose screen is on the display
    visible: usize,
    /// Round-robin state
    scheduler: Scheduler,
    /// Virtual periodic timers
    rtc: RtcRegistry,
    /// Audit trail
    syslog: SysLog,
    /// Boot time (nanos)
    boot_time: u64,
    /// Set once the system has halted
    halted: bool,
}

impl<H: HAL> Kernel<H> {
    /// Create a kernel with the default configuration.
    pub fn new(hal: H) -> Self {
        Self::with_config(hal, KernelConfig::default())
    }

    pub fn with_config(hal: H, config: KernelConfig) -> Self {
        let config = config.normalized();
        let boot_time = hal.now_nanos();
        let terminals = (0..config.terminal_count).map(Terminal::new).collect();
        Self {
            processes: ProcessTable::new(config.max_tasks),
            scheduler: Scheduler::new(config.terminal_count),
            rtc: RtcRegistry::new(config.rtc_capacity),
            idle_context: hal.capture_context(),
            terminals,
            visible: 0,
            current: None,
            syslog: SysLog::new(),
            boot_time,
            halted: false,
            hal,
            config,
        }
    }

    /// Program the timers, unmask interrupts and show terminal 0.
    ///
    /// No task runs until the first timer tick finds terminal 0 unowned
    /// and starts a shell there.
    pub fn boot(&mut self) -> Result<(), KernelError> {
        self.idle_context = self.hal.capture_context();
        self.hal.program_pit(self.config.pit_divisor);
        self.rtc.set_rate(&self.hal, rtc::RTC_FLOOR_HZ)?;
        for irq in [Irq::Timer, Irq::Keyboard, Irq::Rtc] {
            self.hal.enable_irq(irq);
        }
        self.hal
            .console_refresh(self.visible, self.terminals[self.visible].screen().cells());
        self.hal.debug_write(&alloc::format!(
            "[kernel] boot: {} terminals, {} task slots, quantum {} us",
            self.config.terminal_count,
            self.config.max_tasks,
            self.config.quantum_nanos() / 1000
        ));
        Ok(())
    }

    // ========================================================================
    // Interrupt entry points
    // ========================================================================

    /// RTC interrupt: advance every virtual timer.
    pub fn on_rtc_irq(&mut self) {
        if !self.halted {
            self.rtc.tick();
        }
        self.hal.acknowledge_irq(Irq::Rtc);
    }

    /// Keyboard interrupt: feed the visible terminal.
    pub fn on_key(&mut self, key: Key) {
        self.hal.acknowledge_irq(Irq::Keyboard);
        if self.halted {
            return;
        }
        let visible = self.visible;
        let outcome = self.terminals[visible].key(key);
        if !outcome.echo.is_empty() {
            self.hal.console_write(visible, &outcome.echo);
        }
        if outcome.interrupt {
            if let Some(owner) = self.terminals[visible].owner {
                if self.signal_task(owner, Signal::Interrupt).is_ok() {
                    self.hal.debug_write(&alloc::format!(
                        "[kernel] ctrl-c: interrupt pid {}",
                        owner
                    ));
                }
            }
        }
        if let Some(to) = outcome.switch_to {
            self.switch_visible(to);
        }
    }

    /// Put another terminal on the display.
    pub fn switch_visible(&mut self, to: usize) {
        if to >= self.terminals.len() || to == self.visible {
            return;
        }
        self.visible = to;
        self.hal.console_refresh(to, self.terminals[to].screen().cells());
        self.hal
            .debug_write(&alloc::format!("[kernel] terminal {} visible", to));
    }

    /// Change the line discipline of the running task's terminal.
    pub fn set_terminal_mode(&mut self, mode: TermMode) -> Result<(), KernelError> {
        let terminal = self.current_process()?.terminal;
        self.terminals[terminal].set_mode(mode);
        Ok(())
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn hal(&self) -> &H {
        &self.hal
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// Task the CPU is running (`None` = idle).
    pub fn current(&self) -> Option<ProcessId> {
        self.current
    }

    pub fn process(&self, pid: ProcessId) -> Option<&Process> {
        self.processes.get(pid)
    }

    pub fn processes(&self) -> impl Iterator<Item = &Process> {
        self.processes.iter()
    }

    pub fn terminal(&self, index: usize) -> Option<&Terminal> {
        self.terminals.get(index)
    }

    pub fn visible_terminal(&self) -> usize {
        self.visible
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn rtc(&self) -> &RtcRegistry {
        &self.rtc
    }

    pub fn syslog(&self) -> &SysLog {
        &self.syslog
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn uptime_nanos(&self) -> u64 {
        self.hal.now_nanos().saturating_sub(self.boot_time)
    }

    pub fn metrics(&self) -> SystemMetrics {
        SystemMetrics {
            process_count: self.processes.len(),
            max_tasks: self.processes.capacity(),
            rtc_handles: self.rtc.open_count(),
            rtc_hw_rate: self.rtc.hw_rate(),
            ticks: self.scheduler.ticks(),
            uptime_ns: self.uptime_nanos(),
        }
    }

    fn current_process(&self) -> Result<&Process, KernelError> {
        self.current
            .and_then(|pid| self.processes.get(pid))
            .ok_or(KernelError::NoCurrentTask)
    }

    fn current_process_mut(&mut self) -> Result<&mut Process, KernelError> {
        let pid = self.current.ok_or(KernelError::NoCurrentTask)?;
        self.processes
            .get_mut(pid)
            .ok_or(KernelError::NoCurrentTask)
    }

    /// Stop the machine with a diagnostic.
    fn halt_system(&mut self, reason: &str) -> Dispatch {
        if !self.halted {
            self.halted = true;
            self.hal
                .debug_write(&alloc::format!("[kernel] HALT: {}", reason));
            self.hal.halt(reason);
        }
        Dispatch::Halt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_hal::layout::IMAGE_BASE;
    use ember_hal_mock::MockHal;

    fn booted() -> Kernel<MockHal> {
        let hal = MockHal::new();
        hal.install_program("shell", IMAGE_BASE + 0x40, b"shell");
        let mut kernel = Kernel::new(hal);
        kernel.boot().unwrap();
        kernel
    }

    #[test]
    fn test_boot_programs_hardware() {
        let kernel = booted();
        assert_eq!(kernel.hal().pit_divisor(), Some(36_157));
        assert_eq!(kernel.hal().rtc_frequency(), Some(2));
        assert!(kernel.hal().irq_enabled(Irq::Timer));
        assert!(kernel.hal().irq_enabled(Irq::Keyboard));
        assert!(kernel.hal().irq_enabled(Irq::Rtc));
        assert_eq!(kernel.hal().refreshes(), alloc::vec![0]);
        assert!(kernel.hal().has_log_containing("[kernel] boot: 3 terminals"));
        assert_eq!(kernel.current(), None);
    }

    #[test]
    fn test_rtc_irq_always_acknowledged() {
        let mut kernel = booted();
        kernel.on_rtc_irq();
        kernel.on_rtc_irq();
        assert_eq!(kernel.hal().ack_count(Irq::Rtc), 2);
    }

    #[test]
    fn test_alt_function_switches_visible_terminal() {
        let mut kernel = booted();
        kernel.on_key(Key::AltFunction(3));
        assert_eq!(kernel.visible_terminal(), 2);
        assert_eq!(kernel.hal().refreshes(), alloc::vec![0, 2]);

        kernel.on_key(Key::AltFunction(9));
        assert_eq!(kernel.visible_terminal(), 2);
        assert_eq!(kernel.hal().ack_count(Irq::Keyboard), 2);
    }

    #[test]
    fn test_keys_echo_on_visible_terminal() {
        let mut kernel = booted();
        kernel.on_key(Key::Char(b'l'));
        kernel.on_key(Key::Char(b's'));
        assert_eq!(kernel.hal().console_output(0), "ls");
        assert_eq!(kernel.terminal(0).unwrap().line().contents(), b"ls");
    }

    #[test]
    fn test_ctrl_c_signals_foreground_task() {
        let mut kernel = booted();
        kernel.on_timer_irq();
        let pid = kernel.current().unwrap();
        kernel.on_key(Key::Ctrl(b'c'));
        assert!(kernel
            .process(pid)
            .unwrap()
            .signals
            .is_pending(Signal::Interrupt));
    }

    #[test]
    fn test_metrics() {
        let mut kernel = booted();
        kernel.on_timer_irq();
        let metrics = kernel.metrics();
        assert_eq!(metrics.process_count, 1);
        assert_eq!(metrics.max_tasks, 6);
        assert_eq!(metrics.rtc_hw_rate, 2);
        assert_eq!(metrics.ticks, 1);
    }
}
