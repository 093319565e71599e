//! Kernel error types
//!
//! Every failed operation collapses to -1 at the syscall boundary; the
//! variant is kept for logging and for callers inside the kernel.

use ember_hal::HalError;
use ember_process::error::E_FAIL;

/// Why an executable could not be loaded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadError {
    /// No regular file by that name
    FileNotFound,
    /// Bad magic, entry point outside the window, or image too large
    BadFormat,
    /// Memory access failed while copying
    Io(HalError),
}

/// Kernel operation errors
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KernelError {
    /// Every task slot is taken
    NoFreeSlot,
    /// Every file descriptor is taken
    TableFull,
    /// Every RTC handle is taken
    RegistryFull,
    /// Program could not be loaded
    Load(LoadError),
    /// No file by that name
    FileNotFound,
    /// Command line longer than the maximum
    CommandTooLong,
    /// Name is not valid text
    InvalidName,
    /// Descriptor out of range, or a standard stream that cannot be closed
    InvalidFd,
    /// Descriptor slot not in use
    UnusedFd,
    /// Descriptor does not allow this direction
    PermissionDenied,
    /// Object does not accept writes
    ReadOnly,
    /// User pointer outside the user window
    BadAddress,
    /// Not a signal number
    InvalidSignal,
    /// Not a legal RTC frequency
    InvalidFrequency,
    /// Task was started without arguments
    NoArguments,
    /// Caller's buffer cannot hold the result
    BufferTooSmall,
    /// sigreturn without a signal in flight
    NoSignalInFlight,
    /// Unknown syscall number
    InvalidSyscall,
    /// Operation needs a running task
    NoCurrentTask,
    /// The system has halted
    Halted,
    /// HAL error
    Hal(HalError),
}

/// Coarse error categories.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// A fixed-size table is full
    ResourceExhaustion,
    /// Bad argument from the caller
    Validation,
    /// The descriptor exists but cannot do this
    CapabilityMismatch,
    /// Hardware or whole-system failure
    Hardware,
}

impl KernelError {
    pub fn class(&self) -> ErrorClass {
        match self {
            KernelError::NoFreeSlot | KernelError::TableFull | KernelError::RegistryFull => {
                ErrorClass::ResourceExhaustion
            }
            KernelError::UnusedFd | KernelError::PermissionDenied | KernelError::ReadOnly => {
                ErrorClass::CapabilityMismatch
            }
            KernelError::Hal(_) | KernelError::Halted | KernelError::Load(LoadError::Io(_)) => {
                ErrorClass::Hardware
            }
            _ => ErrorClass::Validation,
        }
    }

    /// Value returned to user space.
    pub fn as_errno(&self) -> i32 {
        E_FAIL
    }
}

impl From<HalError> for KernelError {
    fn from(e: HalError) -> Self {
        KernelError::Hal(e)
    }
}

impl From<LoadError> for KernelError {
    fn from(e: LoadError) -> Self {
        KernelError::Load(e)
    }
}

impl From<HalError> for LoadError {
    fn from(e: HalError) -> Self {
        LoadError::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        assert_eq!(KernelError::NoFreeSlot.class(), ErrorClass::ResourceExhaustion);
        assert_eq!(KernelError::RegistryFull.class(), ErrorClass::ResourceExhaustion);
        assert_eq!(KernelError::InvalidFd.class(), ErrorClass::Validation);
        assert_eq!(KernelError::UnusedFd.class(), ErrorClass::CapabilityMismatch);
        assert_eq!(
            KernelError::Load(LoadError::BadFormat).class(),
            ErrorClass::Validation
        );
        assert_eq!(
            KernelError::Hal(HalError::PageFault).class(),
            ErrorClass::Hardware
        );
    }

    #[test]
    fn test_every_error_is_minus_one() {
        assert_eq!(KernelError::BadAddress.as_errno(), -1);
        assert_eq!(KernelError::TableFull.as_errno(), -1);
    }

    #[test]
    fn test_conversions() {
        let e: KernelError = HalError::NotFound.into();
        assert_eq!(e, KernelError::Hal(HalError::NotFound));
        let e: KernelError = LoadError::FileNotFound.into();
        assert_eq!(e, KernelError::Load(LoadError::FileNotFound));
    }
}
