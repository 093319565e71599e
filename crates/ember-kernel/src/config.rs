//! Kernel configuration
//!
//! Everything here is fixed at boot. The defaults describe the reference
//! machine: three terminals, six task slots, a ~30 ms scheduler quantum.

use alloc::string::String;

/// Input clock of the programmable interval timer, in Hz
pub const PIT_INPUT_HZ: u32 = 1_193_182;

/// Default PIT divisor (~33 Hz, one quantum every ~30 ms)
pub const DEFAULT_PIT_DIVISOR: u16 = 36_157;

/// Default number of virtual terminals
pub const DEFAULT_TERMINALS: usize = 3;

/// Default number of concurrent tasks
pub const DEFAULT_MAX_TASKS: usize = 6;

/// Default capacity of the RTC handle registry
pub const DEFAULT_RTC_CAPACITY: usize = 16;

/// Program the scheduler starts on an unowned terminal
pub const DEFAULT_SHELL: &str = "shell";

/// Most terminals reachable with Alt+F1..F12
pub const MAX_TERMINALS: usize = 12;

/// What a processor exception raised by a task does.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum FaultPolicy {
    /// Halt the whole system with a diagnostic
    Halt,
    /// Convert the exception into a signal for the faulting task
    #[default]
    KillTask,
}

/// Boot-time kernel parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KernelConfig {
    /// Number of virtual terminals
    pub terminal_count: usize,
    /// Number of task slots (each owns one frame and one kernel stack)
    pub max_tasks: usize,
    /// PIT divisor programmed at boot
    pub pit_divisor: u16,
    /// RTC registry capacity
    pub rtc_capacity: usize,
    /// Exception handling policy
    pub fault_policy: FaultPolicy,
    /// Program spawned on unowned terminals
    pub shell: String,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            terminal_count: DEFAULT_TERMINALS,
            max_tasks: DEFAULT_MAX_TASKS,
            pit_divisor: DEFAULT_PIT_DIVISOR,
            rtc_capacity: DEFAULT_RTC_CAPACITY,
            fault_policy: FaultPolicy::default(),
            shell: String::from(DEFAULT_SHELL),
        }
    }
}

impl KernelConfig {
    pub fn with_terminals(mut self, count: usize) -> Self {
        self.terminal_count = count;
        self
    }

    pub fn with_max_tasks(mut self, count: usize) -> Self {
        self.max_tasks = count;
        self
    }

    pub fn with_pit_divisor(mut self, divisor: u16) -> Self {
        self.pit_divisor = divisor;
        self
    }

    pub fn with_rtc_capacity(mut self, capacity: usize) -> Self {
        self.rtc_capacity = capacity;
        self
    }

    pub fn with_fault_policy(mut self, policy: FaultPolicy) -> Self {
        self.fault_policy = policy;
        self
    }

    pub fn with_shell(mut self, name: &str) -> Self {
        self.shell = String::from(name);
        self
    }

    /// Bring out-of-range values back to something the machine supports.
    ///
    /// Every terminal needs at least one task slot for its shell.
    pub fn normalized(mut self) -> Self {
        self.terminal_count = self.terminal_count.clamp(1, MAX_TERMINALS);
        self.max_tasks = self.max_tasks.max(self.terminal_count);
        self.pit_divisor = self.pit_divisor.max(1);
        self
    }

    /// Length of one scheduler quantum in nanoseconds.
    pub fn quantum_nanos(&self) -> u64 {
        self.pit_divisor as u64 * 1_000_000_000 / PIT_INPUT_HZ as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = KernelConfig::default();
        assert_eq!(config.terminal_count, 3);
        assert_eq!(config.max_tasks, 6);
        assert_eq!(config.rtc_capacity, 16);
        assert_eq!(config.fault_policy, FaultPolicy::KillTask);
        assert_eq!(config.shell, "shell");
    }

    #[test]
    fn test_default_quantum_is_about_30ms() {
        let nanos = KernelConfig::default().quantum_nanos();
        assert!(nanos > 29_000_000 && nanos < 31_000_000);
    }

    #[test]
    fn test_normalized_clamps() {
        let config = KernelConfig::default()
            .with_terminals(0)
            .with_max_tasks(0)
            .normalized();
        assert_eq!(config.terminal_count, 1);
        assert_eq!(config.max_tasks, 1);

        let config = KernelConfig::default().with_terminals(40).normalized();
        assert_eq!(config.terminal_count, MAX_TERMINALS);
        assert_eq!(config.max_tasks, MAX_TERMINALS);
    }
}
