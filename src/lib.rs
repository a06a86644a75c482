//! # SNC GPADC monitoring
//!
//! Drift monitoring of GPADC sources on a sensor node controller (SNC), a small auxiliary core
//! that runs uCode programs on periodic events while the main CPU sleeps.
//!
//! - [`gpadc`]: the shared converter adapter with reentrant ownership and per-open handles.
//! - [`snc`]: the uCode control block and the two-flag mutex shared with the controller.
//! - [`monitor`]: the single-source drift monitor ([`monitor::SysAdc`]) and the RCX clock
//!   calibration monitor ([`monitor::SysRcx`]). Each one pairs a main-CPU handle with a uCode
//!   driven by a typed state machine.
//!
//! The crate is `no_std`. The converter and platform services are reached through the
//! [`gpadc::GpadcHw`], [`snc::PeriodicEvent`] and [`snc::ClockCtrl`] traits.

#![cfg_attr(not(test), no_std)]

#[macro_use]
mod fmt;

pub mod error;
pub mod gpadc;
pub mod monitor;
pub mod snc;

pub use error::{GpadcError, MonitorError, SncError};
pub use gpadc::{Gpadc, GpadcHandle, GpadcHw, Owner, Timeout};
pub use monitor::{MonitorParams, MonitorResources, RcxResources, SysAdc, SysRcx};
pub use snc::{SncControl, SncCore, SncMutex, UcodeBlock, UcodeId};
