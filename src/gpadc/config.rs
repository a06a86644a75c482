//! GPADC controller, driver and IO configuration, plus the unit conversions backed by the
//! per-sensor calibration table.

/// Converter instance. The DA1469x has a single general purpose ADC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum GpadcId {
    Gpadc1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum InputMode {
    Differential,
    SingleEnded,
}

/// Converter input selection.
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Input {
    P1_09,
    P0_25,
    P0_08,
    P0_09,
    Vdd,
    V30_1,
    V30_2,
    P1_13,
    P1_12,
    P1_18,
    P1_19,
    Vssa,
    Vbat,
    TempSensor,
    Diff_P1_09_P0_25,
    Diff_P0_08_P0_09,
}

impl Input {
    /// Single-ended input routed to an external pad.
    pub const fn is_external(self) -> bool {
        matches!(
            self,
            Input::P1_09
                | Input::P0_25
                | Input::P0_08
                | Input::P0_09
                | Input::P1_13
                | Input::P1_12
                | Input::P1_18
                | Input::P1_19
        )
    }

    /// Single-ended input that is routed internally and needs no pin setup.
    pub const fn is_internal(self) -> bool {
        matches!(
            self,
            Input::Vdd | Input::V30_1 | Input::V30_2 | Input::Vssa | Input::Vbat | Input::TempSensor
        )
    }
}

/// Number of conversions averaged into one result (`2^n`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Oversampling {
    Samples1 = 0,
    Samples2 = 1,
    Samples4 = 2,
    Samples8 = 3,
    Samples16 = 4,
    Samples32 = 5,
    Samples64 = 6,
    Samples128 = 7,
}

impl Oversampling {
    /// Right shift turning the left-aligned 16-bit raw result into an oversampled value.
    pub const fn shift(self) -> u32 {
        let n = self as u32;
        6 - if n < 6 { n } else { 6 }
    }
}

/// Sensor driven onto the `TempSensor` input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum TempSensor {
    ChargerGnd = 0,
    ChargerZ = 1,
    ChargerVntc = 2,
    ChargerVtemp = 3,
    None = 4,
    RadioDiode = 5,
    ChargerDiode = 6,
    BandgapDiode = 7,
}

/// One calibration point and the slope through it. ADC values are 16-bit left-aligned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Calibration {
    temp: i32,
    adc: i32,
    millislope: i32,
}

const fn cal(temp: i32, adc: i32, millislope: i32) -> Calibration {
    Calibration { temp, adc, millislope }
}

// Empirical, measured between -40 and 80 degrees Celsius.
const TEMPERATURE_CALIBRATION: [Calibration; 8] = [
    cal(0, 0, 0),
    cal(0, 0, 0),
    cal(0, 0, 0),
    cal(0, 712 << 6, 2440 << 6),
    cal(0, 0, 0),
    cal(0, 641 << 6, -(1282 << 6)),
    cal(0, 637 << 6, -(1300 << 6)),
    cal(0, 638 << 6, -(1291 << 6)),
];

impl TempSensor {
    fn calibration(self) -> Calibration {
        TEMPERATURE_CALIBRATION[self as usize]
    }

    /// Whether the table has a conversion function for this sensor.
    pub fn is_calibrated(self) -> bool {
        self.calibration().millislope != 0
    }
}

/// Converter settings applied on open and on reconfiguration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DriverConfig {
    pub input_mode: InputMode,
    pub input: Input,
    pub temp_sensor: TempSensor,
    /// Sample time in units of 8 ADC clock cycles, 0..=15.
    pub sample_time: u8,
    pub chopping: bool,
    pub oversampling: Oversampling,
}

impl DriverConfig {
    pub const fn is_temperature(&self) -> bool {
        matches!(self.input, Input::TempSensor)
    }

    pub const fn is_battery(&self) -> bool {
        matches!(self.input, Input::Vbat)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct IoPin {
    pub port: u8,
    pub pin: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum VoltageLevel {
    V3_3,
    V1_8,
}

/// Pins feeding an external input. `input1` is only used in differential mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct IoConfig {
    pub input0: IoPin,
    pub input1: Option<IoPin>,
    pub voltage_level: VoltageLevel,
}

/// Pin configuration to apply: active (converter in use) or parked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum IoState {
    On,
    Off,
}

/// Everything needed to open the adapter on one source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ControllerConfig {
    pub id: GpadcId,
    pub io: Option<IoConfig>,
    pub drv: DriverConfig,
}

/// Pins to latch while the converter is open, or `None` when the IO setup does not match the
/// input.
pub(crate) fn latched_pins(conf: &ControllerConfig) -> Option<(Option<IoPin>, Option<IoPin>)> {
    match conf.drv.input_mode {
        InputMode::SingleEnded => {
            if conf.drv.input.is_external() {
                conf.io.map(|io| (Some(io.input0), None))
            } else if conf.drv.input.is_internal() {
                Some((None, None))
            } else {
                None
            }
        }
        InputMode::Differential => conf.io.map(|io| (Some(io.input0), io.input1)),
    }
}

const fn internal(input: Input, temp_sensor: TempSensor) -> ControllerConfig {
    ControllerConfig {
        id: GpadcId::Gpadc1,
        io: None,
        drv: DriverConfig {
            input_mode: InputMode::SingleEnded,
            input,
            temp_sensor,
            sample_time: 15,
            chopping: true,
            oversampling: Oversampling::Samples64,
        },
    }
}

/// Diode near the radio.
pub static TEMP_SENSOR_RADIO_INTERNAL: ControllerConfig =
    internal(Input::TempSensor, TempSensor::RadioDiode);

/// Diode near the bandgap, tracked by the RCX calibration uCode.
pub static TEMP_SENSOR_BANDGAP_INTERNAL: ControllerConfig =
    internal(Input::TempSensor, TempSensor::BandgapDiode);

/// Battery rail through the internal divider.
pub static BATTERY_LEVEL_INTERNAL: ControllerConfig = internal(Input::Vbat, TempSensor::None);

/// Largest value `read()` can return for this driver configuration.
pub fn source_max(drv: &DriverConfig) -> u16 {
    0xFFFF >> drv.oversampling.shift()
}

/// Oversampling-corrected value from a left-aligned raw result.
pub fn raw_to_value(drv: &DriverConfig, raw: u16) -> u16 {
    raw >> drv.oversampling.shift()
}

/// Temperature in degrees Celsius for a value returned by `read()`.
///
/// Returns `None` for sensors without calibration data.
pub fn conv_to_temp(drv: &DriverConfig, value: u16) -> Option<i16> {
    let c = drv.temp_sensor.calibration();
    if c.millislope == 0 {
        return None;
    }
    let val32 = (value as u32) << drv.oversampling.shift();
    if val32 > 0xFFFF {
        return None;
    }
    let t = c.temp + (val32 as i32 - c.adc) * 1000 / c.millislope;
    i16::try_from(t).ok()
}

/// Battery voltage in mV for a value returned by `read()`. Values above the source range read
/// as full scale.
pub fn conv_to_batt_mvolt(drv: &DriverConfig, value: u16) -> u16 {
    let max = source_max(drv) as u32;
    let value = (value as u32).min(max);
    (5000 * value / max) as u16
}

/// Left-aligned raw reading the sensor produces at `temp` degrees Celsius.
///
/// Returns `None` when the sensor has no calibration data or the result does not fit in 16 bits.
pub fn temperature_to_raw(drv: &DriverConfig, temp: i16) -> Option<u16> {
    let c = drv.temp_sensor.calibration();
    if c.millislope == 0 {
        return None;
    }
    let raw = c.adc + (temp as i32 - c.temp) * c.millislope / 1000;
    u16::try_from(raw).ok()
}
