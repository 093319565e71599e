//! Process control blocks and the fixed-capacity process table

use alloc::collections::BTreeMap;
use alloc::string::String;
use ember_hal::layout::{frame_for_slot, kernel_stack_for_slot};
use ember_hal::ExecutionContext;

use crate::fd::FileTable;
use crate::rtc::RtcHandleId;
use crate::signal::SignalState;
use crate::types::ProcessId;

/// What a blocked task waits on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitChannel {
    /// A completed line on this terminal
    Terminal(usize),
    /// The next virtual tick of this handle
    Rtc(RtcHandleId),
}

/// Process state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessState {
    /// Runnable (the scheduler may pick it)
    Running,
    /// Suspended in `execute` until this child terminates
    WaitingChild(ProcessId),
    /// Spinning in a read until input arrives
    Blocked(WaitChannel),
}

/// Per-process resource tracking
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProcessMetrics {
    /// Syscalls made
    pub syscall_count: u64,
    /// Times the scheduler switched away from this task
    pub context_switches: u64,
    /// Signals handed to a user handler
    pub signals_delivered: u64,
    /// Process start time (nanos since boot)
    pub start_time_ns: u64,
}

/// Process control block
#[derive(Clone, Debug)]
pub struct Process {
    /// Process ID
    pub pid: ProcessId,
    /// Program name
    pub name: String,
    /// Argument string (`None` when started without arguments)
    pub args: Option<String>,
    /// Current state
    pub state: ProcessState,
    /// Task that executed this one (`None` for terminal roots)
    pub parent: Option<ProcessId>,
    /// Terminal the task reads from and writes to
    pub terminal: usize,
    /// Where this task's kernel execution resumes when scheduled
    pub context: ExecutionContext,
    /// Where the parent resumes when this task terminates
    pub parent_context: ExecutionContext,
    /// Open descriptors
    pub files: FileTable,
    /// Pending signals and handlers
    pub signals: SignalState,
    /// The task has mapped its terminal's display page
    pub vidmap: bool,
    /// Detailed metrics
    pub metrics: ProcessMetrics,
}

impl Process {
    pub fn new(
        pid: ProcessId,
        name: &str,
        args: Option<&str>,
        parent: Option<ProcessId>,
        terminal: usize,
        parent_context: ExecutionContext,
        now: u64,
    ) -> Self {
        Self {
            pid,
            name: String::from(name),
            args: args.map(String::from),
            state: ProcessState::Running,
            parent,
            terminal,
            context: ExecutionContext::default(),
            parent_context,
            files: FileTable::with_std_streams(),
            signals: SignalState::new(),
            vidmap: false,
            metrics: ProcessMetrics {
                start_time_ns: now,
                ..ProcessMetrics::default()
            },
        }
    }

    /// Physical frame backing this task's user window.
    pub fn frame_base(&self) -> u32 {
        frame_for_slot(self.pid.slot())
    }

    /// Top of this task's kernel stack.
    pub fn kernel_stack(&self) -> u32 {
        kernel_stack_for_slot(self.pid.slot())
    }
}

/// Live tasks keyed by pid; pid `n` owns slot `n - 1`.
pub struct ProcessTable {
    processes: BTreeMap<ProcessId, Process>,
    capacity: usize,
}

impl ProcessTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            processes: BTreeMap::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Lowest pid whose slot is free.
    pub fn alloc_pid(&self) -> Option<ProcessId> {
        (1..=self.capacity as u32)
            .map(ProcessId)
            .find(|pid| !self.processes.contains_key(pid))
    }

    pub fn insert(&mut self, process: Process) {
        self.processes.insert(process.pid, process);
    }

    pub fn remove(&mut self, pid: ProcessId) -> Option<Process> {
        self.processes.remove(&pid)
    }

    pub fn get(&self, pid: ProcessId) -> Option<&Process> {
        self.processes.get(&pid)
    }

    pub fn get_mut(&mut self, pid: ProcessId) -> Option<&mut Process> {
        self.processes.get_mut(&pid)
    }

    pub fn contains(&self, pid: ProcessId) -> bool {
        self.processes.contains_key(&pid)
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.processes.len() >= self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &Process> {
        self.processes.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn process(pid: u32) -> Process {
        Process::new(
            ProcessId(pid),
            "shell",
            None,
            None,
            0,
            ExecutionContext::default(),
            0,
        )
    }

    #[test]
    fn test_lowest_free_pid() {
        let mut table = ProcessTable::new(3);
        assert_eq!(table.alloc_pid(), Some(ProcessId(1)));
        table.insert(process(1));
        table.insert(process(2));
        assert_eq!(table.alloc_pid(), Some(ProcessId(3)));
        table.remove(ProcessId(1));
        assert_eq!(table.alloc_pid(), Some(ProcessId(1)));
    }

    #[test]
    fn test_table_full() {
        let mut table = ProcessTable::new(2);
        table.insert(process(1));
        table.insert(process(2));
        assert!(table.is_full());
        assert_eq!(table.alloc_pid(), None);
    }

    #[test]
    fn test_slot_resources() {
        let p = process(2);
        assert_eq!(p.frame_base(), 0x00C0_0000);
        assert_eq!(p.kernel_stack(), 0x007F_DFFC);
        assert_eq!(p.files.open_count(), 2);
        assert_eq!(p.state, ProcessState::Running);
    }
}
