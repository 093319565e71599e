//! Supervisor loop
//!
//! The supervisor owns the kernel and is its only driver. It turns
//! wall-clock deadlines into timer and RTC interrupts, host input into key
//! presses, and worker traps into syscall or fault entries. The kernel's
//! [`Dispatch`] answer decides what happens to the worker next.
//!
//! Only the current task's trap is serviced, since the user window is
//! mapped to the current task's frame. A trap from any other task waits in
//! its [`TaskState::Pending`] slot until the scheduler switches to it. A
//! read that returned `Block` stays pending and is issued again after the
//! next interrupt.

use std::collections::{BTreeMap, VecDeque};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};

use ember_hal::{Irq, HAL};
use ember_kernel::{
    Delivery, Dispatch, Fault, Kernel, KernelConfig, KernelError, Key, ProcessId, ProcessState,
    TrapFrame, WaitChannel,
};
use ember_process::syscall::SYS_EXECUTE;
use ember_process::{scratch, Completion, Invocation, Trap, Upcall};

use crate::hal::{HostedHal, Launch};
use crate::input::KeyDecoder;
use crate::programs::Programs;
use crate::worker::{self, Event, Wake, WorkerHandle};

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Vector reported when a task touches memory it cannot reach
const PAGE_FAULT_VECTOR: u8 = 14;

/// Why [`Supervisor::run`] returned.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The kernel halted the machine
    Halted { reason: Option<String> },
    /// Host input ended and every task was waiting for more
    InputClosed,
}

/// User-visible registers the supervisor tracks per task.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct UserRegs {
    eip: u32,
    esp: u32,
}

/// Where a task's worker is, seen from the supervisor.
#[derive(Debug)]
enum TaskState {
    /// Executing native code
    Running,
    /// Trapped; the trap has not completed yet
    Pending(Trap),
    /// Inside `execute`, waiting for its child to terminate
    AwaitingChild,
}

struct Task {
    worker: WorkerHandle,
    regs: UserRegs,
    state: TaskState,
}

/// Hosted driver for one kernel.
pub struct Supervisor {
    kernel: Kernel<HostedHal>,
    programs: Programs,
    tasks: BTreeMap<u32, Task>,
    events_tx: Sender<Event>,
    events: Receiver<Event>,
    keys: KeyDecoder,
    /// Host input not yet handed to the keyboard
    typeahead: VecDeque<u8>,
    input_closed: bool,
    next_serial: u64,
}

impl Supervisor {
    pub fn new(hal: HostedHal, config: KernelConfig, programs: Programs) -> Self {
        let (events_tx, events) = mpsc::channel();
        Self {
            kernel: Kernel::with_config(hal, config),
            programs,
            tasks: BTreeMap::new(),
            events_tx,
            events,
            keys: KeyDecoder::new(),
            typeahead: VecDeque::new(),
            input_closed: false,
            next_serial: 0,
        }
    }

    /// Boot the kernel. No task runs until the first timer tick.
    pub fn boot(&mut self) -> Result<(), KernelError> {
        self.kernel.boot()?;
        self.log(&format!(
            "[supervisor] booted with programs: {}",
            self.programs.names().collect::<Vec<_>>().join(" ")
        ));
        Ok(())
    }

    /// Sender for host-side event sources (the stdin reader).
    pub fn event_sender(&self) -> Sender<Event> {
        self.events_tx.clone()
    }

    pub fn kernel(&self) -> &Kernel<HostedHal> {
        &self.kernel
    }

    /// Tasks with a live worker.
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// The audit trail as pretty-printed JSON.
    pub fn syslog_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self.kernel.syslog().events())
    }

    /// Drive the machine until it halts or host input is exhausted.
    pub fn run(&mut self) -> Outcome {
        let quantum = Duration::from_nanos(self.kernel.config().quantum_nanos());
        let start = Instant::now();
        let mut next_tick = start + quantum;
        let mut next_rtc = start + self.rtc_period();

        loop {
            self.drain_typeahead();
            if let Some(outcome) = self.finished() {
                self.shutdown();
                return outcome;
            }

            let now = Instant::now();
            if now >= next_tick {
                self.timer_tick();
                next_tick = (next_tick + quantum).max(now);
                continue;
            }
            if now >= next_rtc {
                self.rtc_tick();
                next_rtc = (next_rtc + self.rtc_period()).max(now);
                continue;
            }

            match self.events.recv_timeout(next_tick.min(next_rtc) - now) {
                Ok(event) => self.handle(event),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    self.shutdown();
                    return Outcome::InputClosed;
                }
            }
        }
    }

    /// Handle the next event if one arrives within `timeout`.
    pub fn pump(&mut self, timeout: Duration) -> bool {
        match self.events.recv_timeout(timeout) {
            Ok(event) => {
                self.handle(event);
                self.drain_typeahead();
                true
            }
            Err(_) => false,
        }
    }

    pub fn handle(&mut self, event: Event) {
        match event {
            Event::Trap { pid, serial, trap } => {
                let Some(task) = self.tasks.get_mut(&pid) else {
                    return;
                };
                if task.worker.serial != serial {
                    return;
                }
                task.state = TaskState::Pending(trap);
                if self.is_current(pid) {
                    self.service(pid);
                }
            }
            Event::Input(bytes) => {
                self.typeahead.extend(bytes);
                self.drain_typeahead();
            }
            Event::InputClosed => self.input_closed = true,
        }
    }

    // ========================================================================
    // Interrupts
    // ========================================================================

    /// Timer interrupt: one scheduler quantum elapsed.
    pub fn timer_tick(&mut self) {
        if !self.kernel.hal().raise(Irq::Timer) {
            return;
        }
        let dispatch = self.kernel.on_timer_irq();
        self.follow(dispatch);
        self.service_current();
    }

    /// RTC interrupt at the hardware rate.
    pub fn rtc_tick(&mut self) {
        if !self.kernel.hal().raise(Irq::Rtc) {
            return;
        }
        self.kernel.on_rtc_irq();
        self.service_current();
    }

    fn key(&mut self, key: Key) {
        if !self.kernel.hal().raise(Irq::Keyboard) {
            return;
        }
        self.kernel.on_key(key);
        self.service_current();
    }

    /// Feed buffered host input while the visible terminal can take it.
    ///
    /// A completed line that nobody has read yet holds back the rest, so
    /// piped input is not dropped by the line editor.
    fn drain_typeahead(&mut self) {
        while let Some(&byte) = self.typeahead.front() {
            let visible = self.kernel.visible_terminal();
            if self
                .kernel
                .terminal(visible)
                .is_some_and(|t| t.line().is_complete())
            {
                break;
            }
            self.typeahead.pop_front();
            if let Some(key) = self.keys.feed(byte) {
                self.key(key);
            }
        }
    }

    fn rtc_period(&self) -> Duration {
        let hz = self.kernel.hal().rtc_frequency().max(1) as u64;
        Duration::from_nanos(NANOS_PER_SEC / hz)
    }

    // ========================================================================
    // Traps
    // ========================================================================

    fn is_current(&self, pid: u32) -> bool {
        self.kernel.current() == Some(ProcessId(pid))
    }

    fn service_current(&mut self) {
        if let Some(ProcessId(pid)) = self.kernel.current() {
            self.service(pid);
        }
    }

    /// Run the pending trap of `pid` (which must be current).
    fn service(&mut self, pid: u32) {
        let Some(task) = self.tasks.get_mut(&pid) else {
            return;
        };
        let trap = match std::mem::replace(&mut task.state, TaskState::Running) {
            TaskState::Pending(trap) => trap,
            other => {
                task.state = other;
                return;
            }
        };
        let regs = task.regs;
        match trap {
            Trap::Syscall(invocation) => self.syscall(pid, regs, invocation),
            Trap::Fault(vector) => self.fault(pid, regs, vector),
        }
    }

    fn syscall(&mut self, pid: u32, regs: UserRegs, invocation: Invocation) {
        for (addr, bytes) in &invocation.stage {
            if self.kernel.hal().write_user(*addr, bytes).is_err() {
                return self.fault(pid, regs, PAGE_FAULT_VECTOR);
            }
        }

        let mut frame =
            TrapFrame::syscall(invocation.number, invocation.args, regs.eip, regs.esp);
        match self.kernel.syscall(&mut frame) {
            Dispatch::Return(value) => {
                let data = self.collect(invocation.collect);
                self.complete(pid, frame, value, data);
            }
            Dispatch::Block(_) => {
                if let Some(task) = self.tasks.get_mut(&pid) {
                    task.state = TaskState::Pending(Trap::Syscall(invocation));
                }
            }
            Dispatch::Enter(_) => {
                if let Some(task) = self.tasks.get_mut(&pid) {
                    task.state = TaskState::AwaitingChild;
                }
                self.launch();
            }
            Dispatch::Resume { pid: parent, value } => {
                self.retire(pid);
                self.resume(parent, value);
            }
            Dispatch::Continue => self.complete(pid, frame, frame.eax as i32, Vec::new()),
            dispatch @ (Dispatch::Switch { .. } | Dispatch::Halt) => self.follow(dispatch),
        }
    }

    fn fault(&mut self, pid: u32, regs: UserRegs, vector: u8) {
        let mut frame = TrapFrame::user(regs.eip, regs.esp);
        frame.vector = vector as u32;
        let fault = Fault::from_vector(vector).unwrap_or(Fault::GeneralProtection);
        match self.kernel.fault(fault, &frame) {
            Dispatch::Continue => self.complete(pid, frame, 0, Vec::new()),
            Dispatch::Resume { pid: parent, value } => {
                self.retire(pid);
                self.resume(parent, value);
            }
            dispatch => self.follow(dispatch),
        }
    }

    /// Read back the region a call asked for.
    fn collect(&self, region: Option<(u32, u32)>) -> Vec<u8> {
        let Some((addr, len)) = region else {
            return Vec::new();
        };
        let mut data = vec![0u8; len as usize];
        match self.kernel.hal().read_user(addr, &mut data) {
            Ok(()) => data,
            Err(_) => Vec::new(),
        }
    }

    /// Take the return-to-user path and wake the worker.
    fn complete(&mut self, pid: u32, mut frame: TrapFrame, value: i32, data: Vec<u8>) {
        let upcall = match self.kernel.return_to_user(&mut frame) {
            Delivery::Delivered { signal, handler } => Some(Upcall {
                handler,
                signal: signal.number(),
            }),
            Delivery::Terminated(dispatch) => {
                self.retire(pid);
                self.follow(dispatch);
                return;
            }
            Delivery::Nothing | Delivery::Deferred => None,
        };
        if let Some(task) = self.tasks.get_mut(&pid) {
            task.regs = UserRegs {
                eip: frame.eip,
                esp: frame.esp,
            };
            task.state = TaskState::Running;
            task.worker.wake.post(Wake::Done(Completion {
                value,
                data,
                upcall,
            }));
        }
    }

    // ========================================================================
    // Task lifecycle
    // ========================================================================

    /// Act on a dispatch that did not come from the task's own trap.
    fn follow(&mut self, dispatch: Dispatch) {
        match dispatch {
            Dispatch::Enter(_) => self.launch(),
            Dispatch::Resume { pid, value } => self.resume(pid, value),
            Dispatch::Switch { from, to } => self.log(&format!(
                "[supervisor] switch {} -> {}",
                from.map_or(String::from("idle"), |p| p.to_string()),
                to
            )),
            Dispatch::Continue | Dispatch::Return(_) | Dispatch::Block(_) | Dispatch::Halt => {}
        }
    }

    /// Start workers for every task the kernel entered.
    fn launch(&mut self) {
        while let Some(Launch { entry, program }) = self.kernel.hal().take_launch() {
            let pid = entry.pid;
            let regs = UserRegs {
                eip: entry.entry,
                esp: entry.user_stack,
            };
            let Some(code) = self.programs.get(&program) else {
                self.log(&format!(
                    "[supervisor] pid {}: no native code for '{}'",
                    pid, program
                ));
                self.crash(regs);
                continue;
            };

            self.next_serial += 1;
            match worker::spawn(pid, self.next_serial, &program, code, self.events_tx.clone()) {
                Ok(worker) => {
                    self.log(&format!("[supervisor] pid {}: started '{}'", pid, program));
                    self.tasks.insert(
                        pid,
                        Task {
                            worker,
                            regs,
                            state: TaskState::Running,
                        },
                    );
                }
                Err(e) => {
                    self.log(&format!("[supervisor] pid {}: cannot start worker: {}", pid, e));
                    self.crash(regs);
                }
            }
        }
    }

    /// The entered task has nothing to execute: report an invalid opcode
    /// at its entry point.
    fn crash(&mut self, regs: UserRegs) {
        let mut frame = TrapFrame::user(regs.eip, regs.esp);
        frame.vector = 6;
        match self.kernel.fault(Fault::InvalidOpcode, &frame) {
            Dispatch::Continue => {
                if let Delivery::Terminated(dispatch) = self.kernel.return_to_user(&mut frame) {
                    self.follow(dispatch);
                }
            }
            dispatch => self.follow(dispatch),
        }
    }

    /// A child terminated; finish the parent's `execute` with its status.
    fn resume(&mut self, parent: Option<ProcessId>, value: i32) {
        let Some(ProcessId(pid)) = parent else {
            self.log("[supervisor] idle");
            return;
        };
        let Some(task) = self.tasks.get(&pid) else {
            return;
        };
        if !matches!(task.state, TaskState::AwaitingChild) {
            return;
        }
        let mut frame = TrapFrame::syscall(
            SYS_EXECUTE,
            [scratch::ARG_AREA, 0, 0],
            task.regs.eip,
            task.regs.esp,
        );
        frame.eax = value as u32;
        self.complete(pid, frame, value, Vec::new());
    }

    /// The task is gone: unwind its worker.
    fn retire(&mut self, pid: u32) {
        if let Some(task) = self.tasks.remove(&pid) {
            task.worker.wake.post(Wake::Exited);
            self.log(&format!("[supervisor] pid {}: retired", pid));
        }
    }

    /// Every task is waiting for terminal input that is not there.
    pub fn is_quiescent(&self) -> bool {
        self.tasks.iter().all(|(&pid, task)| match task.state {
            TaskState::AwaitingChild => true,
            TaskState::Running => task.worker.is_finished(),
            TaskState::Pending(_) => match self.kernel.process(ProcessId(pid)).map(|p| p.state) {
                Some(ProcessState::Blocked(WaitChannel::Terminal(t))) => !self
                    .kernel
                    .terminal(t)
                    .is_some_and(|term| term.input_ready()),
                _ => false,
            },
        })
    }

    fn finished(&self) -> Option<Outcome> {
        if self.kernel.is_halted() {
            return Some(Outcome::Halted {
                reason: self.kernel.hal().halt_reason(),
            });
        }
        let visited_all =
            self.kernel.scheduler().ticks() >= self.kernel.config().terminal_count as u64;
        if self.input_closed && visited_all && self.typeahead.is_empty() && self.is_quiescent() {
            return Some(Outcome::InputClosed);
        }
        None
    }

    /// Unwind every worker.
    pub fn shutdown(&mut self) {
        for (_, task) in std::mem::take(&mut self.tasks) {
            task.worker.wake.post(Wake::Exited);
        }
        self.log("[supervisor] shutdown");
    }

    fn log(&self, msg: &str) {
        self.kernel.hal().debug_write(msg);
    }
}
