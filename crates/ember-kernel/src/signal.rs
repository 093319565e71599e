//! Signals
//!
//! Five signals, raised by exceptions, by Ctrl-C, or by the kernel. A task
//! may install one user handler per signal; otherwise the default applies
//! (terminate with status 256 for 0-3, ignore for USER1). Delivery happens
//! on the way back to user mode, at most one handler frame at a time.

use alloc::vec::Vec;
use ember_hal::HAL;
use ember_process::error::STATUS_SIGNALED;
use ember_process::signal::{ALARM, DIV_ZERO, INTERRUPT, SEGFAULT, SIGNAL_COUNT, USER1};

use crate::error::KernelError;
use crate::types::{ProcessId, TrapFrame};
use crate::{Dispatch, Kernel, SysEventType};
use ember_hal::layout::SIGNAL_TRAMPOLINE;

/// Signal kinds
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Signal {
    DivZero = DIV_ZERO,
    Segfault = SEGFAULT,
    Interrupt = INTERRUPT,
    Alarm = ALARM,
    User1 = USER1,
}

/// What happens to a signal with no handler installed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DefaultAction {
    Terminate,
    Ignore,
}

impl Signal {
    /// All signals in delivery priority order (lowest number first).
    pub const ALL: [Signal; SIGNAL_COUNT as usize] = [
        Signal::DivZero,
        Signal::Segfault,
        Signal::Interrupt,
        Signal::Alarm,
        Signal::User1,
    ];

    pub fn from_number(n: u32) -> Option<Self> {
        Self::ALL.get(n as usize).copied()
    }

    pub fn number(&self) -> u8 {
        *self as u8
    }

    pub fn default_action(&self) -> DefaultAction {
        match self {
            Signal::User1 => DefaultAction::Ignore,
            _ => DefaultAction::Terminate,
        }
    }

    fn bit(&self) -> u8 {
        1 << self.number()
    }
}

/// A handler frame in flight: the frame to restore on sigreturn.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SignalFrame {
    pub signal: Signal,
    pub saved: TrapFrame,
}

/// Per-task signal bookkeeping.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SignalState {
    pending: u8,
    handlers: [Option<u32>; SIGNAL_COUNT as usize],
    frames: Vec<SignalFrame>,
}

impl SignalState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a signal pending. Raising an already pending signal is a no-op.
    pub fn raise(&mut self, signal: Signal) {
        self.pending |= signal.bit();
    }

    pub fn is_pending(&self, signal: Signal) -> bool {
        self.pending & signal.bit() != 0
    }

    pub fn pending_bits(&self) -> u8 {
        self.pending
    }

    pub fn clear(&mut self, signal: Signal) {
        self.pending &= !signal.bit();
    }

    /// Lowest-numbered pending signal.
    pub fn next_pending(&self) -> Option<Signal> {
        Signal::ALL.into_iter().find(|s| self.is_pending(*s))
    }

    /// Install (`Some`) or remove (`None`) a user handler.
    pub fn set_handler(&mut self, signal: Signal, handler: Option<u32>) {
        self.handlers[signal.number() as usize] = handler;
    }

    pub fn handler(&self, signal: Signal) -> Option<u32> {
        self.handlers[signal.number() as usize]
    }

    /// Whether a handler frame is in flight.
    pub fn in_handler(&self) -> bool {
        !self.frames.is_empty()
    }

    pub fn push_frame(&mut self, frame: SignalFrame) {
        self.frames.push(frame);
    }

    pub fn pop_frame(&mut self) -> Option<SignalFrame> {
        self.frames.pop()
    }
}

/// Outcome of the return-to-user check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    /// Nothing pending (or only ignored signals)
    Nothing,
    /// Something is pending but the frame is a kernel frame or a handler
    /// is already running
    Deferred,
    /// The frame now enters a user handler
    Delivered {
        signal: Signal,
        handler: u32,
    },
    /// The default action killed the task
    Terminated(Dispatch),
}

/// Bytes pushed below the user stack for a handler: trampoline return
/// address, signal number, then the saved frame.
pub const SIGNAL_PUSH_BYTES: u32 = 8 + TrapFrame::SIZE as u32;

impl<H: HAL> Kernel<H> {
    /// Raise a signal on the running task.
    pub fn raise(&mut self, signal: Signal) -> Result<(), KernelError> {
        let pid = self.current.ok_or(KernelError::NoCurrentTask)?;
        self.signal_task(pid, signal)
    }

    /// Raise a signal on any live task.
    pub fn signal_task(&mut self, pid: ProcessId, signal: Signal) -> Result<(), KernelError> {
        let process = self
            .processes
            .get_mut(pid)
            .ok_or(KernelError::NoCurrentTask)?;
        process.signals.raise(signal);
        Ok(())
    }

    /// `set_handler`: 0 restores the default action.
    pub fn set_signal_handler(&mut self, number: u32, handler: u32) -> Result<(), KernelError> {
        let signal = Signal::from_number(number).ok_or(KernelError::InvalidSignal)?;
        let process = self.current_process_mut()?;
        process
            .signals
            .set_handler(signal, if handler == 0 { None } else { Some(handler) });
        Ok(())
    }

    /// `sigreturn`: restore the frame saved when the handler was entered.
    pub fn signal_return(&mut self, frame: &mut TrapFrame) -> Result<(), KernelError> {
        let process = self.current_process_mut()?;
        let saved = process
            .signals
            .pop_frame()
            .ok_or(KernelError::NoSignalInFlight)?;
        *frame = saved.saved;
        Ok(())
    }

    /// Last step before any return to user mode: deliver one pending
    /// signal, either by running the default action or by splicing a
    /// handler frame onto the user stack.
    pub fn return_to_user(&mut self, frame: &mut TrapFrame) -> Delivery {
        if self.halted {
            return Delivery::Nothing;
        }
        let Some(pid) = self.current else {
            return Delivery::Nothing;
        };
        let Some(process) = self.processes.get_mut(pid) else {
            return Delivery::Nothing;
        };
        if process.signals.pending_bits() == 0 {
            return Delivery::Nothing;
        }
        if !frame.from_user() || process.signals.in_handler() {
            return Delivery::Deferred;
        }

        let chosen = loop {
            let Some(signal) = process.signals.next_pending() else {
                break None;
            };
            process.signals.clear(signal);
            match (process.signals.handler(signal), signal.default_action()) {
                (Some(handler), _) => break Some((signal, Some(handler))),
                (None, DefaultAction::Ignore) => continue,
                (None, DefaultAction::Terminate) => break Some((signal, None)),
            }
        };

        match chosen {
            None => Delivery::Nothing,
            Some((signal, Some(handler))) => self.enter_handler(pid, signal, handler, frame),
            Some((signal, None)) => {
                self.hal.debug_write(&alloc::format!(
                    "[kernel] pid {} killed by signal {}",
                    pid,
                    signal.number()
                ));
                Delivery::Terminated(self.exit_or_halt(STATUS_SIGNALED))
            }
        }
    }

    fn enter_handler(
        &mut self,
        pid: ProcessId,
        signal: Signal,
        handler: u32,
        frame: &mut TrapFrame,
    ) -> Delivery {
        let snapshot = *frame;
        let base = frame.esp.wrapping_sub(SIGNAL_PUSH_BYTES);

        let mut bytes = Vec::with_capacity(SIGNAL_PUSH_BYTES as usize);
        bytes.extend_from_slice(&SIGNAL_TRAMPOLINE.to_le_bytes());
        bytes.extend_from_slice(&(signal.number() as u32).to_le_bytes());
        bytes.extend_from_slice(&snapshot.to_bytes());

        if self.hal.write_user(base, &bytes).is_err() {
            self.hal.debug_write(&alloc::format!(
                "[kernel] pid {} user stack unusable for signal {}",
                pid,
                signal.number()
            ));
            return Delivery::Terminated(self.exit_or_halt(STATUS_SIGNALED));
        }

        if let Some(process) = self.processes.get_mut(pid) {
            process.signals.push_frame(SignalFrame {
                signal,
                saved: snapshot,
            });
            process.metrics.signals_delivered += 1;
        }
        frame.esp = base;
        frame.eip = handler;

        let now = self.hal.now_nanos();
        self.syslog.record(
            pid.0,
            SysEventType::SignalDelivered {
                signal: signal.number(),
            },
            now,
        );
        Delivery::Delivered { signal, handler }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_numbers_and_defaults() {
        assert_eq!(Signal::from_number(0), Some(Signal::DivZero));
        assert_eq!(Signal::from_number(4), Some(Signal::User1));
        assert_eq!(Signal::from_number(5), None);
        for s in &Signal::ALL[..4] {
            assert_eq!(s.default_action(), DefaultAction::Terminate);
        }
        assert_eq!(Signal::User1.default_action(), DefaultAction::Ignore);
    }

    #[test]
    fn test_raise_is_idempotent() {
        let mut state = SignalState::new();
        state.raise(Signal::Alarm);
        let once = state.clone();
        state.raise(Signal::Alarm);
        assert_eq!(state, once);
    }

    #[test]
    fn test_next_pending_is_lowest() {
        let mut state = SignalState::new();
        state.raise(Signal::User1);
        state.raise(Signal::Interrupt);
        assert_eq!(state.next_pending(), Some(Signal::Interrupt));
        state.clear(Signal::Interrupt);
        assert_eq!(state.next_pending(), Some(Signal::User1));
    }

    #[test]
    fn test_handler_frames_stack() {
        let mut state = SignalState::new();
        assert!(!state.in_handler());
        state.push_frame(SignalFrame {
            signal: Signal::Alarm,
            saved: TrapFrame::user(1, 2),
        });
        assert!(state.in_handler());
        assert_eq!(state.pop_frame().unwrap().saved.eip, 1);
        assert!(state.pop_frame().is_none());
    }
}
