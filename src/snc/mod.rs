//! Sensor node controller: the cross-core mutex, the uCode control block and the platform
//! services uCodes use.

pub mod mutex;
pub mod platform;
pub mod scheduler;

pub use mutex::{HostGuard, SncGuard, SncMutex, HOST_LOCK_POLLS};
pub use platform::{rtc_period, ClockCtrl, PeriodicEvent};
pub use scheduler::{
    NotifyCallback, PdcEventPriority, SncControl, SncCore, UcodeBlock, UcodeConfig, UcodeId,
    UcodePriority, UCODE_TABLE_SIZE,
};
