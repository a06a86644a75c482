//! Drift monitors running on the sensor node controller.
//!
//! Each monitor is split in two halves: a control handle used on the main CPU and a uCode program
//! loaded on the controller. They share a [`MonitorState`] record behind an [`SncMutex`].

pub mod rcx;
pub mod sys_adc;
pub mod ucode;

pub use rcx::{RcxCalibrationUcode, RcxResources, SysRcx};
pub use sys_adc::SysAdc;
pub use ucode::GpadcMonitorUcode;

use crate::error::MonitorError;
use crate::gpadc::{temperature_to_raw, DriverConfig, Gpadc, GpadcHw, Owner};
use crate::snc::{PeriodicEvent, SncControl, SncMutex};

/// Period of the RTC to PDC event shared by all monitors.
pub const RTC_PDC_EVENT_PERIOD_MS: u32 = 100;

/// Owner identity the monitor services use for their reference readings.
pub const MONITOR_OWNER: Owner = Owner::Task(0);

/// Bounds and last measurement of one monitored source, in raw converter units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MonitorState {
    pub lower_bound: u32,
    pub upper_bound: u32,
    pub current_value: u32,
}

impl MonitorState {
    pub const fn new() -> Self {
        Self { lower_bound: 0, upper_bound: 0, current_value: 0 }
    }

    /// Centre the bounds on `reference`. The lower bound clamps at zero.
    pub fn set_bounds(&mut self, reference: u16, drift: u16) {
        self.lower_bound = (reference as u32).saturating_sub(drift as u32);
        self.upper_bound = reference as u32 + drift as u32;
    }

    pub fn is_out_of_bounds(&self, value: u32) -> bool {
        value < self.lower_bound || value > self.upper_bound
    }
}

/// Caller-facing monitor settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MonitorParams {
    /// Allowed drift in the source's unit: degrees Celsius for temperature sensors, mV for the
    /// battery, raw units otherwise.
    pub drift: u16,
    pub poll_interval_ms: u16,
}

/// `MonitorParams` converted for the source, fixed at configuration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DriftParameters {
    /// Half-width of the bounds, raw units.
    pub drift: u16,
    pub poll_interval_ticks: u32,
}

impl DriftParameters {
    /// Fails with `InvalidParams` unless `poll_interval_ms` is a positive multiple of
    /// [`RTC_PDC_EVENT_PERIOD_MS`].
    pub fn for_source(drv: &DriverConfig, params: MonitorParams) -> Result<Self, MonitorError> {
        let interval_ms = params.poll_interval_ms as u32;
        if interval_ms == 0 || interval_ms % RTC_PDC_EVENT_PERIOD_MS != 0 {
            return Err(MonitorError::InvalidParams);
        }

        let drift = if drv.is_temperature() {
            let degrees = i16::try_from(params.drift).map_err(|_| MonitorError::InvalidParams)?;
            let zero = temperature_to_raw(drv, 0).ok_or(MonitorError::InvalidParams)?;
            let shifted = temperature_to_raw(drv, degrees).ok_or(MonitorError::InvalidParams)?;
            zero.abs_diff(shifted)
        } else if drv.is_battery() {
            battery_drift(params.drift)?
        } else {
            params.drift
        };

        Ok(Self { drift, poll_interval_ticks: poll_ticks(interval_ms) })
    }
}

/// mV to left-aligned raw units over the 5 V battery range.
fn battery_drift(mv: u16) -> Result<u16, MonitorError> {
    u16::try_from(mv as u32 * 0xFFFF / 5000).map_err(|_| MonitorError::InvalidParams)
}

/// Number of periodic events in `interval_ms`, at least one.
pub const fn poll_ticks(interval_ms: u32) -> u32 {
    let ticks = interval_ms / RTC_PDC_EVENT_PERIOD_MS;
    if ticks == 0 { 1 } else { ticks }
}

/// Counts periodic events and opens once every `interval` of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TickGate {
    count: u32,
    interval: u32,
}

impl TickGate {
    pub const fn new(interval: u32) -> Self {
        Self { count: 0, interval: if interval == 0 { 1 } else { interval } }
    }

    /// Count one event. Returns `true` when the interval is reached, resetting the count.
    pub fn tick(&mut self) -> bool {
        self.count += 1;
        if self.count < self.interval {
            return false;
        }
        self.count = 0;
        true
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn interval(&self) -> u32 {
        self.interval
    }
}

/// Shared objects a single-source monitor works with. All of them live in statics.
pub struct MonitorResources<H: 'static, const N: usize> {
    pub gpadc: &'static Gpadc<H>,
    pub snc: &'static SncControl<N>,
    pub periodic: &'static dyn PeriodicEvent,
    pub state: &'static SncMutex<MonitorState>,
}

impl<H: 'static, const N: usize> Clone for MonitorResources<H, N> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<H: 'static, const N: usize> Copy for MonitorResources<H, N> {}

/// Read one raw reference sample from the main CPU.
pub(crate) fn reference_reading<H: GpadcHw>(
    gpadc: &Gpadc<H>,
    conf: &'static crate::gpadc::ControllerConfig,
) -> Result<u16, MonitorError> {
    let handle = gpadc.open(MONITOR_OWNER, conf)?;
    let value = gpadc.read_raw(&handle);
    gpadc.close(&handle, false)?;
    Ok(value?)
}
