//! Task lifecycle: spawn (`execute`) and terminate (`halt`)
//!
//! A spawned task runs in its own frame on its parent's terminal and
//! becomes that terminal's foreground task. The parent stays suspended in
//! `execute` until the child terminates, then resumes with the child's
//! status as the return value.

use alloc::string::String;
use ember_hal::layout::{
    frame_for_slot, kernel_stack_for_slot, DISPLAY_VADDR, SIGNAL_TRAMPOLINE, USER_STACK_TOP,
};
use ember_hal::{UserEntry, HAL};
use ember_process::syscall::SYS_SIGRETURN;
use ember_process::MAX_COMMAND_LEN;

use crate::error::{KernelError, LoadError};
use crate::fd::FileObject;
use crate::loader;
use crate::process::{Process, ProcessState};
use crate::types::ProcessId;
use crate::{Dispatch, Kernel, SysEventType};

/// `mov eax, SYS_SIGRETURN; int 0x80`, placed at [`SIGNAL_TRAMPOLINE`].
pub const TRAMPOLINE_CODE: [u8; 7] = [0xB8, SYS_SIGRETURN as u8, 0x00, 0x00, 0x00, 0xCD, 0x80];

/// Split a command line into program name and argument string.
///
/// The name is the leading run of alphanumeric characters; the arguments
/// are the rest with leading spaces removed (`None` if nothing is left).
pub fn parse_command(command: &str) -> (&str, Option<&str>) {
    let command = command.trim_start_matches(' ');
    let split = command
        .find(|c: char| !c.is_ascii_alphanumeric())
        .unwrap_or(command.len());
    let (name, rest) = command.split_at(split);
    let args = rest.trim_start_matches(' ');
    (name, if args.is_empty() { None } else { Some(args) })
}

impl<H: HAL> Kernel<H> {
    /// Start `command` as a child of the running task, on its terminal.
    ///
    /// With no task running the new task becomes the root of the
    /// scheduler's current terminal.
    pub fn spawn(&mut self, command: &str) -> Result<UserEntry, KernelError> {
        let terminal = match self.current_process() {
            Ok(process) => process.terminal,
            Err(_) => self.scheduler.current_terminal(),
        };
        self.spawn_on(terminal, command, self.current)
    }

    pub(crate) fn spawn_on(
        &mut self,
        terminal: usize,
        command: &str,
        parent: Option<ProcessId>,
    ) -> Result<UserEntry, KernelError> {
        if self.halted {
            return Err(KernelError::Halted);
        }
        if command.len() > MAX_COMMAND_LEN {
            return Err(KernelError::CommandTooLong);
        }
        let pid = self.processes.alloc_pid().ok_or(KernelError::NoFreeSlot)?;
        let (name, args) = parse_command(command);
        if name.is_empty() {
            return Err(LoadError::FileNotFound.into());
        }

        self.hal.map_user_window(frame_for_slot(pid.slot()));
        self.hal.flush_tlb();
        let loaded = loader::load(&self.hal, name)
            .map_err(KernelError::from)
            .and_then(|image| {
                self.hal.write_user(SIGNAL_TRAMPOLINE, &TRAMPOLINE_CODE)?;
                Ok(image)
            });
        let image = match loaded {
            Ok(image) => image,
            Err(e) => {
                self.restore_caller_window();
                self.hal.debug_write(&alloc::format!(
                    "[kernel] execute {:?} failed: {:?}",
                    name,
                    e
                ));
                return Err(e);
            }
        };

        let parent = parent.filter(|p| self.processes.contains(*p));
        let parent_context = match parent {
            Some(_) => self.hal.capture_context(),
            None => self.idle_context,
        };
        if let Some(p) = parent.and_then(|p| self.processes.get_mut(p)) {
            p.state = ProcessState::WaitingChild(pid);
        }

        let now = self.hal.now_nanos();
        self.processes.insert(Process::new(
            pid,
            name,
            args,
            parent,
            terminal,
            parent_context,
            now,
        ));
        self.terminals[terminal].owner = Some(pid);
        self.current = Some(pid);

        let kernel_stack = kernel_stack_for_slot(pid.slot());
        self.hal.set_kernel_stack(kernel_stack);
        let entry = UserEntry {
            pid: pid.0,
            entry: image.entry,
            user_stack: USER_STACK_TOP,
            kernel_stack,
        };

        self.syslog.record(
            pid.0,
            SysEventType::Spawned {
                parent: parent.map(|p| p.0),
                terminal: terminal as u32,
                name: String::from(name),
            },
            now,
        );
        self.hal.debug_write(&alloc::format!(
            "[kernel] spawned pid {} ({}) on terminal {}, {} bytes",
            pid,
            name,
            terminal,
            image.size
        ));
        self.hal.enter_user(&entry);
        Ok(entry)
    }

    /// Point the window back at the running task after a failed load.
    fn restore_caller_window(&self) {
        if let Ok(process) = self.current_process() {
            self.hal.map_user_window(process.frame_base());
            self.hal.flush_tlb();
        }
    }

    /// Terminate the running task with `status`.
    ///
    /// Closes every descriptor, frees the slot and resumes the parent's
    /// pending `execute` with `status`. A root task (or one whose parent
    /// is gone) hands the CPU back to the idle context.
    pub fn terminate(&mut self, status: u32) -> Result<Dispatch, KernelError> {
        let pid = self.current.ok_or(KernelError::NoCurrentTask)?;
        let mut process = self
            .processes
            .remove(pid)
            .ok_or(KernelError::NoCurrentTask)?;

        for file in process.files.drain() {
            if let FileObject::Rtc(id) = file.object {
                if let Err(e) = self.rtc.close(&self.hal, id) {
                    self.hal.debug_write(&alloc::format!(
                        "[kernel] pid {}: rtc handle {:?} already gone: {:?}",
                        pid,
                        id,
                        e
                    ));
                }
            }
        }

        let parent = process.parent.filter(|p| self.processes.contains(*p));
        if let (Some(orphaned), None) = (process.parent, parent) {
            self.hal.debug_write(&alloc::format!(
                "[kernel] pid {}: parent {} is gone, resuming idle",
                pid,
                orphaned
            ));
        }

        let owner = &mut self.terminals[process.terminal].owner;
        if *owner == Some(pid) {
            *owner = parent;
        }

        let now = self.hal.now_nanos();
        self.syslog
            .record(pid.0, SysEventType::Exited { status }, now);
        self.hal.debug_write(&alloc::format!(
            "[kernel] pid {} ({}) exited with status {}",
            pid,
            process.name,
            status
        ));

        match parent.and_then(|p| self.processes.get_mut(p)) {
            Some(resumed) => {
                resumed.state = ProcessState::Running;
                let (frame, kernel_stack) = (resumed.frame_base(), resumed.kernel_stack());
                let display = resumed.vidmap.then_some(resumed.terminal);
                self.hal.map_user_window(frame);
                if let Some(terminal) = display {
                    self.hal.map_display_page(DISPLAY_VADDR, terminal);
                }
                self.hal.set_kernel_stack(kernel_stack);
                self.hal.flush_tlb();
                self.current = parent;
                self.hal.restore_context(&process.parent_context);
            }
            None => {
                self.current = None;
                self.hal.restore_context(&self.idle_context);
            }
        }
        self.hal.set_return_value(status as i32);

        Ok(Dispatch::Resume {
            pid: parent,
            value: status as i32,
        })
    }

    /// Terminate the running task; a failure here leaves no consistent
    /// state to return to, so the system halts.
    pub(crate) fn exit_or_halt(&mut self, status: u32) -> Dispatch {
        match self.terminate(status) {
            Ok(dispatch) => dispatch,
            Err(e) => self.halt_system(&alloc::format!("terminate failed: {:?}", e)),
        }
    }
}
