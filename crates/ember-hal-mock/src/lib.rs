//! Mock HAL implementation for testing the Ember kernel
//!
//! This provides a mock implementation of the HAL trait that records every
//! hardware interaction (acknowledgements, timer programming, context
//! switches, mappings, console output) so kernel logic can be tested
//! without a machine.

#![no_std]
extern crate alloc;

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;
use core::cell::{Cell, RefCell};
use core::sync::atomic::{AtomicU64, Ordering};
use ember_hal::{
    build_image, DirEntry, ExecutionContext, HalError, Irq, RamFs, SoftMmu, UserEntry, HAL,
};

/// Mock HAL for unit testing
///
/// Memory and filesystem are real (`SoftMmu`, `RamFs`); everything else is
/// recorded for assertions.
pub struct MockHal {
    /// Simulated time in nanoseconds
    time: AtomicU64,
    /// Captured debug messages
    debug_log: RefCell<Vec<String>>,
    /// Simulated physical memory
    mmu: RefCell<SoftMmu>,
    /// Simulated filesystem
    fs: RefCell<RamFs>,
    /// Unmasked interrupt lines
    enabled_irqs: RefCell<Vec<Irq>>,
    /// Every acknowledgement, in order
    acks: RefCell<Vec<Irq>>,
    /// CPU interrupt flag
    interrupts_on: Cell<bool>,
    /// Number of interrupts_disable calls
    critical_sections: Cell<u32>,
    /// Last PIT divisor
    pit_divisor: Cell<Option<u16>>,
    /// Every RTC rate code written, in order
    rtc_rates: RefCell<Vec<u8>>,
    /// Live kernel context
    live: Cell<ExecutionContext>,
    /// Value placed in the return register by the last resume
    return_value: Cell<Option<i32>>,
    /// Task-state kernel stack pointer
    kernel_stack: Cell<u32>,
    /// Translation cache flush count
    tlb_flushes: Cell<u32>,
    /// User-mode entries, in order
    entries: RefCell<Vec<UserEntry>>,
    /// Console output per terminal
    console: RefCell<BTreeMap<usize, Vec<u8>>>,
    /// Terminals presented via console_refresh
    refreshes: RefCell<Vec<usize>>,
    /// Halt reason, once halted
    halted: RefCell<Option<String>>,
}

impl MockHal {
    /// Create a new mock HAL
    pub fn new() -> Self {
        Self::with_time(0)
    }

    /// Create a mock HAL with a specific starting time
    pub fn with_time(nanos: u64) -> Self {
        Self {
            time: AtomicU64::new(nanos),
            debug_log: RefCell::new(Vec::new()),
            mmu: RefCell::new(SoftMmu::new()),
            fs: RefCell::new(RamFs::new()),
            enabled_irqs: RefCell::new(Vec::new()),
            acks: RefCell::new(Vec::new()),
            interrupts_on: Cell::new(true),
            critical_sections: Cell::new(0),
            pit_divisor: Cell::new(None),
            rtc_rates: RefCell::new(Vec::new()),
            live: Cell::new(ExecutionContext {
                esp: 0x0040_0000,
                ebp: 0x0040_0000,
            }),
            return_value: Cell::new(None),
            kernel_stack: Cell::new(0),
            tlb_flushes: Cell::new(0),
            entries: RefCell::new(Vec::new()),
            console: RefCell::new(BTreeMap::new()),
            refreshes: RefCell::new(Vec::new()),
            halted: RefCell::new(None),
        }
    }

    /// Advance the simulated time by the given duration
    pub fn advance_time(&self, nanos: u64) {
        self.time.fetch_add(nanos, Ordering::SeqCst);
    }

    // === Filesystem setup ===

    /// Install an executable whose entry point is `entry`
    pub fn install_program(&self, name: &str, entry: u32, payload: &[u8]) {
        self.add_file(name, &build_image(entry, payload));
    }

    /// Add a regular file
    pub fn add_file(&self, name: &str, data: &[u8]) {
        if self.fs.borrow_mut().add_file(name, data).is_err() {
            panic!("mock fs rejected file {}", name);
        }
    }

    /// Add a periodic-timer device node
    pub fn add_rtc(&self, name: &str) {
        if self.fs.borrow_mut().add_rtc(name).is_err() {
            panic!("mock fs rejected device {}", name);
        }
    }

    // === Inspection ===

    /// Get all captured debug messages
    pub fn get_debug_log(&self) -> Vec<String> {
        self.debug_log.borrow().clone()
    }

    /// Check if a specific message was logged
    pub fn has_log_containing(&self, substr: &str) -> bool {
        self.debug_log
            .borrow()
            .iter()
            .any(|msg| msg.contains(substr))
    }

    /// How many times a line was acknowledged
    pub fn ack_count(&self, irq: Irq) -> usize {
        self.acks.borrow().iter().filter(|&&i| i == irq).count()
    }

    /// Whether a line is unmasked
    pub fn irq_enabled(&self, irq: Irq) -> bool {
        self.enabled_irqs.borrow().contains(&irq)
    }

    /// Whether the CPU interrupt flag is set
    pub fn interrupts_enabled(&self) -> bool {
        self.interrupts_on.get()
    }

    /// Number of critical sections entered
    pub fn critical_sections(&self) -> u32 {
        self.critical_sections.get()
    }

    /// Last PIT divisor programmed
    pub fn pit_divisor(&self) -> Option<u16> {
        self.pit_divisor.get()
    }

    /// Last RTC rate code written
    pub fn rtc_rate(&self) -> Option<u8> {
        self.rtc_rates.borrow().last().copied()
    }

    /// Frequency the RTC is currently programmed for
    pub fn rtc_frequency(&self) -> Option<u32> {
        self.rtc_rate().map(|rate| 32768 >> (rate - 1))
    }

    /// Number of RTC rate writes
    pub fn rtc_writes(&self) -> usize {
        self.rtc_rates.borrow().len()
    }

    /// Live kernel context
    pub fn live_context(&self) -> ExecutionContext {
        self.live.get()
    }

    /// Pretend the CPU is now running with a different kernel context
    pub fn set_live_context(&self, ctx: ExecutionContext) {
        self.live.set(ctx);
    }

    /// Value placed in the return register by the last resume
    pub fn return_value(&self) -> Option<i32> {
        self.return_value.get()
    }

    /// Current task-state kernel stack
    pub fn kernel_stack(&self) -> u32 {
        self.kernel_stack.get()
    }

    /// Translation cache flushes so far
    pub fn tlb_flushes(&self) -> u32 {
        self.tlb_flushes.get()
    }

    /// Every user-mode entry so far
    pub fn entries(&self) -> Vec<UserEntry> {
        self.entries.borrow().clone()
    }

    /// Most recent user-mode entry
    pub fn last_entry(&self) -> Option<UserEntry> {
        self.entries.borrow().last().copied()
    }

    /// Physical frame behind the user window
    pub fn mapped_window(&self) -> Option<u32> {
        self.mmu.borrow().window()
    }

    /// Current display mapping `(vaddr, terminal)`
    pub fn mapped_display(&self) -> Option<(u32, usize)> {
        self.mmu.borrow().display()
    }

    /// Read physical memory directly
    pub fn read_phys(&self, phys: u32, len: usize) -> Vec<u8> {
        let mut buf = alloc::vec![0u8; len];
        self.mmu.borrow().read_phys(phys, &mut buf);
        buf
    }

    /// Console output for a terminal, lossily decoded
    pub fn console_output(&self, terminal: usize) -> String {
        self.console
            .borrow()
            .get(&terminal)
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
            .unwrap_or_default()
    }

    /// Forget console output
    pub fn clear_console(&self) {
        self.console.borrow_mut().clear();
    }

    /// Terminals presented by console_refresh, in order
    pub fn refreshes(&self) -> Vec<usize> {
        self.refreshes.borrow().clone()
    }

    /// Halt reason, if the machine was halted
    pub fn halted(&self) -> Option<String> {
        self.halted.borrow().clone()
    }
}

impl Default for MockHal {
    fn default() -> Self {
        Self::new()
    }
}

// MockHal is only driven from one test thread at a time.
unsafe impl Send for MockHal {}
unsafe impl Sync for MockHal {}

impl HAL for MockHal {
    fn enable_irq(&self, irq: Irq) {
        let mut enabled = self.enabled_irqs.borrow_mut();
        if !enabled.contains(&irq) {
            enabled.push(irq);
        }
    }

    fn disable_irq(&self, irq: Irq) {
        self.enabled_irqs.borrow_mut().retain(|&i| i != irq);
    }

    fn acknowledge_irq(&self, irq: Irq) {
        self.acks.borrow_mut().push(irq);
    }

    fn interrupts_disable(&self) -> bool {
        self.critical_sections.set(self.critical_sections.get() + 1);
        self.interrupts_on.replace(false)
    }

    fn interrupts_restore(&self, enabled: bool) {
        self.interrupts_on.set(enabled);
    }

    fn program_pit(&self, divisor: u16) {
        self.pit_divisor.set(Some(divisor));
    }

    fn write_rtc_rate(&self, rate: u8) {
        self.rtc_rates.borrow_mut().push(rate);
    }

    fn capture_context(&self) -> ExecutionContext {
        self.live.get()
    }

    fn restore_context(&self, ctx: &ExecutionContext) {
        self.live.set(*ctx);
        self.return_value.set(None);
    }

    fn set_return_value(&self, value: i32) {
        self.return_value.set(Some(value));
    }

    fn set_kernel_stack(&self, esp0: u32) {
        self.kernel_stack.set(esp0);
    }

    fn enter_user(&self, entry: &UserEntry) {
        self.entries.borrow_mut().push(*entry);
        self.live.set(ExecutionContext {
            esp: entry.kernel_stack,
            ebp: entry.kernel_stack,
        });
    }

    fn map_user_window(&self, frame_base: u32) {
        self.mmu.borrow_mut().map_window(frame_base);
    }

    fn map_display_page(&self, vaddr: u32, terminal: usize) {
        self.mmu.borrow_mut().map_display(vaddr, terminal);
    }

    fn flush_tlb(&self) {
        self.tlb_flushes.set(self.tlb_flushes.get() + 1);
    }

    fn read_user(&self, vaddr: u32, buf: &mut [u8]) -> Result<(), HalError> {
        self.mmu.borrow().read(vaddr, buf)
    }

    fn write_user(&self, vaddr: u32, data: &[u8]) -> Result<(), HalError> {
        self.mmu.borrow_mut().write(vaddr, data)
    }

    fn fs_lookup(&self, name: &str) -> Option<DirEntry> {
        self.fs.borrow().lookup(name)
    }

    fn fs_entry(&self, index: usize) -> Option<DirEntry> {
        self.fs.borrow().entry(index)
    }

    fn fs_read(&self, inode: u32, offset: u32, buf: &mut [u8]) -> Result<usize, HalError> {
        self.fs.borrow().read(inode, offset, buf)
    }

    fn console_write(&self, terminal: usize, data: &[u8]) {
        self.console
            .borrow_mut()
            .entry(terminal)
            .or_default()
            .extend_from_slice(data);
    }

    fn console_refresh(&self, terminal: usize, _cells: &[u16]) {
        self.refreshes.borrow_mut().push(terminal);
    }

    fn now_nanos(&self) -> u64 {
        self.time.load(Ordering::SeqCst)
    }

    fn debug_write(&self, msg: &str) {
        self.debug_log.borrow_mut().push(String::from(msg));
    }

    fn halt(&self, reason: &str) {
        *self.halted.borrow_mut() = Some(String::from(reason));
    }
}
