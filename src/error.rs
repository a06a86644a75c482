//! Error types for the adapter, the SNC control block and the monitor services.

use core::fmt;

/// GPADC adapter error.
///
/// These replace the assert-and-halt paths of the vendor adapter, so every failure is reported
/// to the caller instead of stopping the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum GpadcError {
    /// Handle does not refer to the currently open controller.
    HandleInvalid,
    /// The requested change (different input, different configuration on re-open) is not allowed.
    ChangeNotAllowed,
    /// Adapter has not been opened.
    AdapterNotOpen,
    /// Driver/IO configuration is not valid for the selected input.
    ConfigInvalid,
    /// An asynchronous read is already outstanding.
    AsyncReadInProgress,
    /// Controller cannot be closed while an asynchronous read is outstanding.
    ControllerBusy,
    /// Ownership or conversion did not complete within the timeout.
    Timeout,
    /// Release attempted by a context that does not own the peripheral.
    NotOwner,
}

impl fmt::Display for GpadcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::HandleInvalid => "invalid GPADC handle",
            Self::ChangeNotAllowed => "change not allowed on open GPADC",
            Self::AdapterNotOpen => "GPADC adapter not open",
            Self::ConfigInvalid => "invalid GPADC configuration",
            Self::AsyncReadInProgress => "asynchronous GPADC read in progress",
            Self::ControllerBusy => "GPADC controller busy",
            Self::Timeout => "GPADC timeout",
            Self::NotOwner => "GPADC not owned by caller",
        };
        f.write_str(msg)
    }
}

/// SNC control block error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SncError {
    /// All uCode slots are in use.
    NoFreeSlot,
    /// No uCode registered under this id.
    UnknownUcode,
    /// A program is already loaded for this id.
    AlreadyLoaded,
}

impl fmt::Display for SncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoFreeSlot => f.write_str("no free uCode slot"),
            Self::UnknownUcode => f.write_str("unknown uCode id"),
            Self::AlreadyLoaded => f.write_str("uCode already loaded"),
        }
    }
}

/// Monitor service (`SysAdc`, `SysRcx`) error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MonitorError {
    /// Reference reading through the adapter failed.
    Adapter(GpadcError),
    /// uCode registration failed.
    Snc(SncError),
    /// The SNC held the shared record for longer than the wait budget.
    LockTimeout,
    /// Monitor parameters cannot be converted for the selected source.
    InvalidParams,
}

impl fmt::Display for MonitorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Adapter(e) => write!(f, "adapter error: {}", e),
            Self::Snc(e) => write!(f, "SNC error: {}", e),
            Self::LockTimeout => f.write_str("timed out waiting for the SNC mutex"),
            Self::InvalidParams => f.write_str("invalid monitor parameters"),
        }
    }
}

impl From<GpadcError> for MonitorError {
    fn from(e: GpadcError) -> Self {
        Self::Adapter(e)
    }
}

impl From<SncError> for MonitorError {
    fn from(e: SncError) -> Self {
        Self::Snc(e)
    }
}
