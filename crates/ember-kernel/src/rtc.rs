//! Virtual periodic timers on one real-time clock
//!
//! The hardware always runs at the highest frequency any open handle asked
//! for (never below 2 Hz). Each handle divides that rate down to its own
//! frequency with a countdown, so every task sees its own tick stream.

use alloc::vec::Vec;
use ember_hal::HAL;

use crate::error::KernelError;
use crate::types::ProcessId;

/// Base oscillator of the clock chip
pub const RTC_BASE_HZ: u32 = 32_768;
/// Lowest frequency the hardware runs at
pub const RTC_FLOOR_HZ: u32 = 2;
/// Highest frequency a task may request
pub const RTC_USER_MAX_HZ: u32 = 1024;
/// Highest frequency the hardware supports
pub const RTC_HW_MAX_HZ: u32 = 8192;
/// Frequency of a freshly opened handle
pub const RTC_DEFAULT_HZ: u32 = 2;

/// Index of a handle in the registry
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RtcHandleId(pub usize);

/// Rate-register code for a frequency: `f = 32768 >> (rate - 1)`.
///
/// Only powers of two in `[2, 8192]` have a code.
pub fn rate_code(freq: u32) -> Option<u8> {
    if !freq.is_power_of_two() || !(RTC_FLOOR_HZ..=RTC_HW_MAX_HZ).contains(&freq) {
        return None;
    }
    Some((16 - freq.trailing_zeros()) as u8)
}

/// Frequency a rate code produces.
pub fn frequency_for_code(rate: u8) -> u32 {
    RTC_BASE_HZ >> (rate.saturating_sub(1))
}

/// Whether a task may ask for `freq`.
pub fn is_valid_user_frequency(freq: u32) -> bool {
    freq.is_power_of_two() && (RTC_FLOOR_HZ..=RTC_USER_MAX_HZ).contains(&freq)
}

/// One task's virtual timer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RtcHandle {
    /// Task that opened the handle
    pub owner: ProcessId,
    /// Requested frequency
    pub frequency: u32,
    /// Hardware ticks per virtual tick
    pub ratio: u32,
    /// Hardware ticks left until the next virtual tick
    pub countdown: u32,
    /// A virtual tick happened and has not been read yet
    pub tick_pending: bool,
}

/// Registry of open handles plus the single hardware rate.
pub struct RtcRegistry {
    slots: Vec<Option<RtcHandle>>,
    hw_rate: u32,
}

impl RtcRegistry {
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize(capacity, None);
        Self {
            slots,
            hw_rate: RTC_FLOOR_HZ,
        }
    }

    /// Current hardware frequency.
    pub fn hw_rate(&self) -> u32 {
        self.hw_rate
    }

    pub fn get(&self, id: RtcHandleId) -> Option<&RtcHandle> {
        self.slots.get(id.0).and_then(Option::as_ref)
    }

    pub fn open_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Rate the hardware should run at for the handles now open.
    pub fn required_rate(&self) -> u32 {
        self.slots
            .iter()
            .flatten()
            .map(|h| h.frequency)
            .max()
            .unwrap_or(RTC_FLOOR_HZ)
            .max(RTC_FLOOR_HZ)
    }

    /// Reprogram the hardware rate and rescale every handle.
    ///
    /// The register write happens with interrupts disabled.
    pub fn set_rate<H: HAL>(&mut self, hal: &H, freq: u32) -> Result<(), KernelError> {
        let code = rate_code(freq).ok_or(KernelError::InvalidFrequency)?;
        let was = hal.interrupts_disable();
        hal.write_rtc_rate(code);
        self.hw_rate = freq;
        hal.interrupts_restore(was);

        for handle in self.slots.iter_mut().flatten() {
            handle.ratio = (freq / handle.frequency).max(1);
            handle.countdown = handle.countdown.min(handle.ratio).max(1);
        }
        Ok(())
    }

    /// Open a handle at the default frequency.
    pub fn open(&mut self, owner: ProcessId) -> Result<RtcHandleId, KernelError> {
        let index = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(KernelError::RegistryFull)?;
        let ratio = (self.hw_rate / RTC_DEFAULT_HZ).max(1);
        self.slots[index] = Some(RtcHandle {
            owner,
            frequency: RTC_DEFAULT_HZ,
            ratio,
            countdown: ratio,
            tick_pending: false,
        });
        Ok(RtcHandleId(index))
    }

    /// Change a handle's frequency, raising or lowering the hardware rate
    /// so it stays the maximum over all handles.
    pub fn write<H: HAL>(
        &mut self,
        hal: &H,
        id: RtcHandleId,
        freq: u32,
    ) -> Result<(), KernelError> {
        if !is_valid_user_frequency(freq) {
            return Err(KernelError::InvalidFrequency);
        }
        let handle = self.handle_mut(id)?;
        handle.frequency = freq;

        let target = self.required_rate();
        if target != self.hw_rate {
            self.set_rate(hal, target)?;
        }

        let hw_rate = self.hw_rate;
        let handle = self.handle_mut(id)?;
        handle.ratio = (hw_rate / freq).max(1);
        handle.countdown = handle.ratio;
        Ok(())
    }

    /// Take the pending tick, if any.
    pub fn consume(&mut self, id: RtcHandleId) -> Result<bool, KernelError> {
        let handle = self.handle_mut(id)?;
        Ok(core::mem::replace(&mut handle.tick_pending, false))
    }

    /// Release a handle and lower the hardware rate if it no longer needs
    /// to be this high.
    pub fn close<H: HAL>(&mut self, hal: &H, id: RtcHandleId) -> Result<RtcHandle, KernelError> {
        let handle = self
            .slots
            .get_mut(id.0)
            .and_then(Option::take)
            .ok_or(KernelError::UnusedFd)?;
        let target = self.required_rate();
        if target != self.hw_rate {
            self.set_rate(hal, target)?;
        }
        Ok(handle)
    }

    /// One hardware interrupt: advance every countdown.
    pub fn tick(&mut self) {
        for handle in self.slots.iter_mut().flatten() {
            handle.countdown = handle.countdown.saturating_sub(1);
            if handle.countdown == 0 {
                handle.tick_pending = true;
                handle.countdown = handle.ratio;
            }
        }
    }

    fn handle_mut(&mut self, id: RtcHandleId) -> Result<&mut RtcHandle, KernelError> {
        self.slots
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or(KernelError::UnusedFd)
    }
}
