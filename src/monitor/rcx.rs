//! RCX low-power clock calibration.
//!
//! The uCode tracks two sources, the bandgap temperature and the battery voltage. When either
//! drifts out of its bounds, or once every `UNCOND_CAL_TIME_IN_SEC` polls regardless, it starts
//! the 32 MHz crystal, switches the system clock to it, runs an RCX calibration and notifies the
//! main CPU, which then reads the calibration result.

use core::hint::spin_loop;

use typed_fsm::{state_machine, Transition};

use super::{poll_ticks, reference_reading, DriftParameters, MonitorParams, MonitorState, TickGate, RTC_PDC_EVENT_PERIOD_MS};
use crate::error::MonitorError;
use crate::gpadc::{ControllerConfig, Gpadc, GpadcHw, BATTERY_LEVEL_INTERNAL, TEMP_SENSOR_BANDGAP_INTERNAL};
use crate::snc::{
    ClockCtrl, NotifyCallback, PdcEventPriority, PeriodicEvent, SncControl, SncMutex, UcodeBlock,
    UcodeConfig, UcodeId, UcodePriority, UCODE_TABLE_SIZE,
};

/// Poll interval of the calibration uCode.
pub const RCX_CAL_POLL_INT_MS: u32 = 1000;
/// Polls between unconditional calibrations.
pub const UNCOND_CAL_TIME_IN_SEC: u32 = 60;
/// Reference cycles of one calibration run.
pub const RCX_CALIBRATION_CYCLES_WUP: u32 = 25;
/// Bandgap temperature drift, degrees Celsius.
pub const BANDGAP_TEMP_DRIFT: u16 = 1;
/// Battery voltage drift, mV.
pub const VBAT_VOLTAGE_DRIFT: u16 = 800;
// 1 LSB of the 10-bit result is 4.88 mV, so 1 mV is about 13 left-aligned raw units
const VBAT_RAW_PER_MV: u16 = 13;

const BANDGAP: usize = 0;
const VBAT: usize = 1;

/// Shared objects of the calibration monitor.
pub struct RcxResources<H: 'static, const N: usize> {
    pub gpadc: &'static Gpadc<H>,
    pub snc: &'static SncControl<N>,
    pub periodic: &'static dyn PeriodicEvent,
    pub clock: &'static dyn ClockCtrl,
    /// Index 0 is the bandgap temperature, index 1 the battery voltage.
    pub state: &'static SncMutex<[MonitorState; 2]>,
}

impl<H: 'static, const N: usize> Clone for RcxResources<H, N> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<H: 'static, const N: usize> Copy for RcxResources<H, N> {}

// FSM Context
pub struct RcxContext {
    pub gate: TickGate,
    pub forced_gate: TickGate,
    pub gate_open: bool,
    pub forced: bool,
}

// FSM Events
#[derive(Clone, Copy, Debug)]
pub enum RcxEvent {
    Trigger,
    Done,
    /// A sample stored under the mutex, with the bounds it is checked against.
    Measured { value: u32, lower: u32, upper: u32 },
    /// Result of polling a hardware status flag.
    Ready(bool),
}

state_machine! {
    Name: RcxUcode,
    Context: RcxContext,
    Event: RcxEvent,
    States: {
        Idle => {
            entry: |_ctx| {}
            process: |_ctx, evt| {
                match evt {
                    RcxEvent::Trigger => Transition::To(RcxUcode::ClearEvent),
                    _ => Transition::None,
                }
            }
        },

        ClearEvent => {
            entry: |_ctx| {}
            process: |_ctx, evt| {
                match evt {
                    RcxEvent::Done => Transition::To(RcxUcode::Gate),
                    _ => Transition::None,
                }
            }
        },

        Gate => {
            entry: |ctx| {
                ctx.gate_open = ctx.gate.tick();
            }
            process: |ctx, evt| {
                match evt {
                    RcxEvent::Done if ctx.gate_open => Transition::To(RcxUcode::ForcedCheck),
                    RcxEvent::Done => Transition::To(RcxUcode::Idle),
                    _ => Transition::None,
                }
            }
        },

        // Unconditional calibration supersedes the measurements
        ForcedCheck => {
            entry: |ctx| {
                ctx.forced = ctx.forced_gate.tick();
            }
            process: |ctx, evt| {
                match evt {
                    RcxEvent::Done if ctx.forced => Transition::To(RcxUcode::RequestXtal),
                    RcxEvent::Done => Transition::To(RcxUcode::MeasureBandgap),
                    _ => Transition::None,
                }
            }
        },

        MeasureBandgap => {
            entry: |_ctx| {}
            process: |_ctx, evt| {
                match evt {
                    RcxEvent::Measured { value, lower, upper } => {
                        if value < lower || value > upper {
                            Transition::To(RcxUcode::RequestXtal)
                        } else {
                            Transition::To(RcxUcode::MeasureBattery)
                        }
                    }
                    _ => Transition::None,
                }
            }
        },

        MeasureBattery => {
            entry: |_ctx| {}
            process: |_ctx, evt| {
                match evt {
                    RcxEvent::Measured { value, lower, upper } => {
                        if value < lower || value > upper {
                            Transition::To(RcxUcode::RequestXtal)
                        } else {
                            Transition::To(RcxUcode::Idle)
                        }
                    }
                    _ => Transition::None,
                }
            }
        },

        RequestXtal => {
            entry: |_ctx| {}
            process: |_ctx, evt| {
                match evt {
                    RcxEvent::Done => Transition::To(RcxUcode::WaitXtalSettled),
                    _ => Transition::None,
                }
            }
        },

        WaitXtalSettled => {
            entry: |_ctx| {}
            process: |_ctx, evt| {
                match evt {
                    RcxEvent::Ready(true) => Transition::To(RcxUcode::SwitchClock),
                    _ => Transition::None,
                }
            }
        },

        SwitchClock => {
            entry: |_ctx| {}
            process: |_ctx, evt| {
                match evt {
                    RcxEvent::Done => Transition::To(RcxUcode::WaitRunningAtXtal),
                    _ => Transition::None,
                }
            }
        },

        WaitRunningAtXtal => {
            entry: |_ctx| {}
            process: |_ctx, evt| {
                match evt {
                    RcxEvent::Ready(true) => Transition::To(RcxUcode::StartCalibration),
                    _ => Transition::None,
                }
            }
        },

        StartCalibration => {
            entry: |_ctx| {}
            process: |_ctx, evt| {
                match evt {
                    RcxEvent::Done => Transition::To(RcxUcode::WaitCalibration),
                    _ => Transition::None,
                }
            }
        },

        WaitCalibration => {
            entry: |_ctx| {}
            process: |_ctx, evt| {
                match evt {
                    RcxEvent::Ready(true) => Transition::To(RcxUcode::Notify),
                    _ => Transition::None,
                }
            }
        },

        Notify => {
            entry: |_ctx| {}
            process: |_ctx, evt| {
                match evt {
                    RcxEvent::Done => Transition::To(RcxUcode::Idle),
                    _ => Transition::None,
                }
            }
        }
    }
}

/// Calibration program as loaded on the sensor node controller.
pub struct RcxCalibrationUcode<H: 'static, const N: usize = UCODE_TABLE_SIZE> {
    fsm: RcxUcode,
    ctx: RcxContext,
    id: UcodeId,
    res: RcxResources<H, N>,
}

impl<H: GpadcHw + 'static, const N: usize> RcxCalibrationUcode<H, N> {
    fn new(id: UcodeId, res: RcxResources<H, N>) -> Self {
        let mut ctx = RcxContext {
            gate: TickGate::new(poll_ticks(RCX_CAL_POLL_INT_MS)),
            forced_gate: TickGate::new(UNCOND_CAL_TIME_IN_SEC),
            gate_open: false,
            forced: false,
        };
        let mut fsm = RcxUcode::Idle;
        fsm.init(&mut ctx);
        Self { fsm, ctx, id, res }
    }

    pub fn id(&self) -> UcodeId {
        self.id
    }

    fn measure(gpadc: &Gpadc<H>, conf: &'static ControllerConfig, slot: &mut MonitorState) -> RcxEvent {
        let value = gpadc.snc_measure(conf) as u32;
        slot.current_value = value;
        RcxEvent::Measured { value, lower: slot.lower_bound, upper: slot.upper_bound }
    }

    fn poll(ready: bool) -> RcxEvent {
        if !ready {
            spin_loop();
        }
        RcxEvent::Ready(ready)
    }
}

impl<H: GpadcHw + 'static, const N: usize> UcodeBlock for RcxCalibrationUcode<H, N> {
    fn run(&mut self) {
        self.fsm.dispatch(&mut self.ctx, &RcxEvent::Trigger);

        while matches!(self.fsm, RcxUcode::ClearEvent | RcxUcode::Gate) {
            if matches!(self.fsm, RcxUcode::ClearEvent) {
                self.res.periodic.clear_pending();
            }
            self.fsm.dispatch(&mut self.ctx, &RcxEvent::Done);
        }
        if matches!(self.fsm, RcxUcode::Idle) {
            return;
        }

        // Held until the invocation completes, calibration included
        let mut state = self.res.state.lock_snc();
        let clock = self.res.clock;

        loop {
            let event = match self.fsm {
                RcxUcode::Idle => break,
                RcxUcode::ClearEvent | RcxUcode::Gate | RcxUcode::ForcedCheck => RcxEvent::Done,
                RcxUcode::MeasureBandgap => {
                    Self::measure(self.res.gpadc, &TEMP_SENSOR_BANDGAP_INTERNAL, &mut state[BANDGAP])
                }
                RcxUcode::MeasureBattery => {
                    Self::measure(self.res.gpadc, &BATTERY_LEVEL_INTERNAL, &mut state[VBAT])
                }
                RcxUcode::RequestXtal => {
                    clock.request_xtal32m();
                    RcxEvent::Done
                }
                RcxUcode::WaitXtalSettled => Self::poll(clock.xtal32m_settled()),
                RcxUcode::SwitchClock => {
                    clock.switch_to_xtal32m();
                    RcxEvent::Done
                }
                RcxUcode::WaitRunningAtXtal => Self::poll(clock.running_at_xtal32m()),
                RcxUcode::StartCalibration => {
                    clock.start_rcx_calibration(RCX_CALIBRATION_CYCLES_WUP);
                    RcxEvent::Done
                }
                RcxUcode::WaitCalibration => Self::poll(clock.calibration_done()),
                RcxUcode::Notify => {
                    trace!("rcx: calibration done, forced {}", self.ctx.forced);
                    self.res.snc.notify_cm33(self.id);
                    RcxEvent::Done
                }
            };
            self.fsm.dispatch(&mut self.ctx, &event);
        }
    }
}

/// Main-CPU side of the calibration monitor.
pub struct SysRcx<const N: usize = UCODE_TABLE_SIZE> {
    snc: &'static SncControl<N>,
    periodic: &'static dyn PeriodicEvent,
    state: &'static SncMutex<[MonitorState; 2]>,
    id: UcodeId,
    drift: [u16; 2],
}

impl<const N: usize> SysRcx<N> {
    /// Take reference readings of both sources, register the uCode and enable it.
    pub fn config<H: GpadcHw + 'static>(
        res: RcxResources<H, N>,
        callback: NotifyCallback,
    ) -> Result<(Self, RcxCalibrationUcode<H, N>), MonitorError> {
        let bandgap = DriftParameters::for_source(
            &TEMP_SENSOR_BANDGAP_INTERNAL.drv,
            MonitorParams { drift: BANDGAP_TEMP_DRIFT, poll_interval_ms: RCX_CAL_POLL_INT_MS as u16 },
        )?;
        let drift = [bandgap.drift, VBAT_VOLTAGE_DRIFT * VBAT_RAW_PER_MV];

        let bandgap_ref = reference_reading(res.gpadc, &TEMP_SENSOR_BANDGAP_INTERNAL)?;
        let vbat_ref = reference_reading(res.gpadc, &BATTERY_LEVEL_INTERNAL)?;

        let id = res.snc.register(UcodeConfig {
            pdc_priority: PdcEventPriority::P0,
            ucode_priority: UcodePriority::P1,
            callback: Some(callback),
        })?;
        match res.state.lock_host() {
            Ok(mut state) => {
                state[BANDGAP].set_bounds(bandgap_ref, drift[BANDGAP]);
                state[VBAT].set_bounds(vbat_ref, drift[VBAT]);
            }
            Err(e) => {
                let _ = res.snc.unregister(id);
                return Err(e);
            }
        }
        res.periodic.configure(RTC_PDC_EVENT_PERIOD_MS);
        res.snc.enable(id)?;

        info!("rcx: bandgap {} vbat {}", bandgap_ref, vbat_ref);

        let ucode = RcxCalibrationUcode::new(id, res);
        let sys = Self { snc: res.snc, periodic: res.periodic, state: res.state, id, drift };
        Ok((sys, ucode))
    }

    /// Last samples, `(bandgap, vbat)`.
    pub fn get_value(&self) -> Result<(u16, u16), MonitorError> {
        let state = self.state.lock_host()?;
        Ok((state[BANDGAP].current_value as u16, state[VBAT].current_value as u16))
    }

    pub fn set_bounds(&self, bandgap: u16, vbat: u16) -> Result<(), MonitorError> {
        let mut state = self.state.lock_host()?;
        state[BANDGAP].set_bounds(bandgap, self.drift[BANDGAP]);
        state[VBAT].set_bounds(vbat, self.drift[VBAT]);
        Ok(())
    }

    pub fn enable(&self) -> Result<(), MonitorError> {
        self.snc.enable(self.id)?;
        self.periodic.clear_pending();
        Ok(())
    }

    pub fn disable(&self) -> Result<(), MonitorError> {
        self.snc.disable(self.id)?;
        Ok(())
    }

    pub fn id(&self) -> UcodeId {
        self.id
    }

    /// Drifts in raw units, `[bandgap, vbat]`.
    pub fn drift(&self) -> [u16; 2] {
        self.drift
    }
}
