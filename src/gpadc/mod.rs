//! General purpose ADC: configuration, the register seam and the adapter shared by the main CPU
//! and the sensor node controller.

pub mod adapter;
pub mod config;

pub use adapter::{Gpadc, ReadCallback};
pub use config::{
    conv_to_batt_mvolt, conv_to_temp, raw_to_value, source_max, temperature_to_raw, ControllerConfig,
    DriverConfig, GpadcId, Input, InputMode, IoConfig, IoPin, IoState, Oversampling, TempSensor,
    VoltageLevel, BATTERY_LEVEL_INTERNAL, TEMP_SENSOR_BANDGAP_INTERNAL,
    TEMP_SENSOR_RADIO_INTERNAL,
};

/// Register-level access to the converter and the pins it uses.
///
/// The adapter only calls these while it holds the ownership token, so implementations do not
/// need their own locking.
pub trait GpadcHw: Send {
    /// Power the peripheral and communication domains.
    fn power_up(&mut self);
    fn power_down(&mut self);
    /// Return the converter registers to their reset values.
    fn reset(&mut self);
    fn configure(&mut self, drv: &DriverConfig);
    fn disable(&mut self);
    fn configure_pin(&mut self, pin: IoPin, state: IoState);
    fn set_pad_latch(&mut self, pin: IoPin, enable: bool);
    /// Start one conversion.
    fn start(&mut self);
    fn in_progress(&self) -> bool;
    /// Last result, left-aligned to 16 bits.
    fn raw_value(&self) -> u16;
    fn clear_interrupt(&mut self);
    fn enable_interrupt(&mut self, enable: bool);
}

/// Wait budget for ownership and conversion. Timeouts are poll counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Timeout {
    Forever,
    Polls(u32),
}

impl Timeout {
    /// Consume one poll. Returns `false` once the budget is spent.
    pub(crate) fn poll(&mut self) -> bool {
        match self {
            Timeout::Forever => true,
            Timeout::Polls(0) => false,
            Timeout::Polls(n) => {
                *n -= 1;
                true
            }
        }
    }
}

/// Context holding the converter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Owner {
    /// The sensor node controller, running uCodes.
    Snc,
    /// A main-CPU task or interrupt context, identified by the application.
    Task(u8),
}

/// Token returned by `Gpadc::open`. Stale once the controller is fully closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct GpadcHandle {
    pub(crate) owner: Owner,
    pub(crate) generation: u16,
}

impl GpadcHandle {
    pub fn owner(&self) -> Owner {
        self.owner
    }
}
