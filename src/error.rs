//! Unified error types for the connectivity core.
//!
//! Every public operation of the station manager and the session bridge
//! returns [`NetError`].  Underlying ESP-IDF failures are carried as a
//! [`StackError`] (the raw `esp_err_t`), and the key-value store reports
//! [`StorageError`].  All variants are `Copy` so they can be returned from
//! the event-delivery context without allocation.

use core::fmt;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetError {
    /// Caller input is malformed (over-long credential, empty event id).
    InvalidArg,
    /// A precondition is missing: no credentials, no active session.
    InvalidState,
    /// The bounded listener table is full.
    NoMem,
    /// The underlying client or stack rejected the request.
    Fail,
    /// Unrecoverable store or network-stack initialisation failure.
    Fatal(StackError),
}

impl fmt::Display for NetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArg => write!(f, "invalid argument"),
            Self::InvalidState => write!(f, "invalid state"),
            Self::NoMem => write!(f, "listener table full"),
            Self::Fail => write!(f, "operation rejected by network stack"),
            Self::Fatal(e) => write!(f, "fatal initialisation failure: {e}"),
        }
    }
}

impl std::error::Error for NetError {}

// ---------------------------------------------------------------------------
// Stack errors
// ---------------------------------------------------------------------------

/// Raw error code reported by the radio, netif or MQTT stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackError(pub i32);

impl StackError {
    /// Generic failure code (`ESP_FAIL`).
    pub const FAIL: Self = Self(-1);

    pub const fn code(self) -> i32 {
        self.0
    }
}

impl fmt::Display for StackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "esp_err 0x{:x}", self.0)
    }
}

impl From<StackError> for NetError {
    fn from(e: StackError) -> Self {
        Self::Fatal(e)
    }
}

#[cfg(target_os = "espidf")]
impl From<esp_idf_svc::sys::EspError> for StackError {
    fn from(e: esp_idf_svc::sys::EspError) -> Self {
        Self(e.code())
    }
}

// ---------------------------------------------------------------------------
// Storage errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    /// Requested key does not exist.
    NotFound,
    /// Partition has no free pages or was written by a newer layout;
    /// it must be erased before it can be initialised.
    NeedsErase,
    /// Partition or output buffer is too small.
    Full,
    /// Any other backend failure (raw code).
    IoError(i32),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "key not found"),
            Self::NeedsErase => write!(f, "partition needs erase"),
            Self::Full => write!(f, "storage full"),
            Self::IoError(code) => write!(f, "I/O error 0x{:x}", code),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<StorageError> for StackError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::IoError(code) => Self(code),
            _ => Self::FAIL,
        }
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, NetError>;
