//! Processor exceptions
//!
//! Under [`FaultPolicy::KillTask`] an exception taken in user mode becomes
//! a signal for the faulting task (divide error: DIV_ZERO, anything else:
//! SEGFAULT) and is acted on by the next return-to-user check. Double
//! faults, machine checks, kernel-mode faults and faults with no task
//! running always halt.

use ember_hal::HAL;
use ember_process::error::STATUS_SIGNALED;

use crate::config::FaultPolicy;
use crate::signal::Signal;
use crate::types::TrapFrame;
use crate::{Dispatch, Kernel, SysEventType};

/// CPU exception kinds (vectors 0-19).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fault {
    DivideError,
    Debug,
    NonMaskable,
    Breakpoint,
    Overflow,
    BoundRange,
    InvalidOpcode,
    DeviceNotAvailable,
    DoubleFault,
    CoprocessorOverrun,
    InvalidTss,
    SegmentNotPresent,
    StackFault,
    GeneralProtection,
    PageFault,
    FloatingPoint,
    AlignmentCheck,
    MachineCheck,
    SimdFloatingPoint,
}

impl Fault {
    pub fn from_vector(vector: u8) -> Option<Self> {
        Some(match vector {
            0 => Fault::DivideError,
            1 => Fault::Debug,
            2 => Fault::NonMaskable,
            3 => Fault::Breakpoint,
            4 => Fault::Overflow,
            5 => Fault::BoundRange,
            6 => Fault::InvalidOpcode,
            7 => Fault::DeviceNotAvailable,
            8 => Fault::DoubleFault,
            9 => Fault::CoprocessorOverrun,
            10 => Fault::InvalidTss,
            11 => Fault::SegmentNotPresent,
            12 => Fault::StackFault,
            13 => Fault::GeneralProtection,
            14 => Fault::PageFault,
            16 => Fault::FloatingPoint,
            17 => Fault::AlignmentCheck,
            18 => Fault::MachineCheck,
            19 => Fault::SimdFloatingPoint,
            _ => return None,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Fault::DivideError => "divide error",
            Fault::Debug => "debug",
            Fault::NonMaskable => "non-maskable interrupt",
            Fault::Breakpoint => "breakpoint",
            Fault::Overflow => "overflow",
            Fault::BoundRange => "bound range exceeded",
            Fault::InvalidOpcode => "invalid opcode",
            Fault::DeviceNotAvailable => "device not available",
            Fault::DoubleFault => "double fault",
            Fault::CoprocessorOverrun => "coprocessor segment overrun",
            Fault::InvalidTss => "invalid tss",
            Fault::SegmentNotPresent => "segment not present",
            Fault::StackFault => "stack-segment fault",
            Fault::GeneralProtection => "general protection fault",
            Fault::PageFault => "page fault",
            Fault::FloatingPoint => "x87 floating-point exception",
            Fault::AlignmentCheck => "alignment check",
            Fault::MachineCheck => "machine check",
            Fault::SimdFloatingPoint => "simd floating-point exception",
        }
    }

    /// Signal a task receives for this exception.
    pub fn signal(&self) -> Signal {
        match self {
            Fault::DivideError => Signal::DivZero,
            _ => Signal::Segfault,
        }
    }

    /// The machine cannot continue regardless of policy.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Fault::DoubleFault | Fault::MachineCheck)
    }
}

impl<H: HAL> Kernel<H> {
    /// Processor exception taken with `frame` on the stack.
    ///
    /// Returns `Continue` once the signal is raised; the platform then runs
    /// [`Kernel::return_to_user`], which carries out the default action or
    /// enters the task's handler. A task that faults while one of its
    /// handlers is running is terminated on the spot.
    pub fn fault(&mut self, fault: Fault, frame: &TrapFrame) -> Dispatch {
        if self.halted {
            return Dispatch::Halt;
        }
        let pid = self.current;
        let now = self.hal.now_nanos();
        self.syslog.record(
            pid.map_or(0, |p| p.0),
            SysEventType::Fault {
                name: alloc::string::String::from(fault.name()),
            },
            now,
        );

        let reason = alloc::format!("{} at eip {:#010x}", fault.name(), frame.eip);
        let Some(pid) = pid else {
            return self.halt_system(&reason);
        };
        if fault.is_fatal()
            || !frame.from_user()
            || self.config.fault_policy == FaultPolicy::Halt
        {
            return self.halt_system(&reason);
        }

        self.hal
            .debug_write(&alloc::format!("[kernel] pid {}: {}", pid, reason));
        // No second handler frame can be spliced while one is in flight.
        if self
            .processes
            .get(pid)
            .is_some_and(|p| p.signals.in_handler())
        {
            self.hal.debug_write(&alloc::format!(
                "[kernel] pid {}: fault inside a signal handler, terminating",
                pid
            ));
            return self.exit_or_halt(STATUS_SIGNALED);
        }
        match self.signal_task(pid, fault.signal()) {
            Ok(()) => Dispatch::Continue,
            Err(_) => self.halt_system(&reason),
        }
    }
}
