//! GPADC adapter.
//!
//! One converter is shared by the main CPU and the sensor node controller. Access is arbitrated
//! by an ownership token: `open` takes it, `close` gives it back, and every operation in between
//! holds an extra reference for its own duration. The token is reentrant for its owner.

use core::cell::RefCell;
use core::hint::spin_loop;

use critical_section::Mutex;

use super::config::{latched_pins, raw_to_value, ControllerConfig, DriverConfig, IoConfig, IoPin, IoState};
use super::{GpadcHandle, GpadcHw, Owner, Timeout};
use crate::error::GpadcError;

/// Completion of `read_async`: `(user_data, value)`.
pub type ReadCallback = fn(usize, u16);

struct Inner<H> {
    hw: H,
    owner: Option<Owner>,
    acquire_count: u32,
    conf: Option<&'static ControllerConfig>,
    drv: Option<DriverConfig>,
    latch: (Option<IoPin>, Option<IoPin>),
    open_count: u32,
    generation: u16,
    read_cb: Option<(ReadCallback, usize)>,
}

impl<H: GpadcHw> Inner<H> {
    fn try_acquire(&mut self, owner: Owner) -> bool {
        match self.owner {
            Some(current) if current != owner => false,
            _ => {
                self.owner = Some(owner);
                self.acquire_count += 1;
                true
            }
        }
    }

    fn release(&mut self) {
        self.acquire_count = self.acquire_count.saturating_sub(1);
        if self.acquire_count == 0 {
            self.owner = None;
        }
    }

    fn check(&self, handle: &GpadcHandle) -> Result<DriverConfig, GpadcError> {
        let drv = self.drv.ok_or(GpadcError::AdapterNotOpen)?;
        if self.owner != Some(handle.owner) || self.generation != handle.generation {
            return Err(GpadcError::HandleInvalid);
        }
        Ok(drv)
    }

    fn pins(&mut self, state: IoState) {
        let (input0, input1) = self.latch;
        for pin in [input0, input1].into_iter().flatten() {
            self.hw.configure_pin(pin, state);
        }
    }

    fn latches(&mut self, enable: bool) {
        let (input0, input1) = self.latch;
        for pin in [input0, input1].into_iter().flatten() {
            self.hw.set_pad_latch(pin, enable);
        }
    }

    fn activate(&mut self, conf: &'static ControllerConfig, latch: (Option<IoPin>, Option<IoPin>)) {
        self.hw.power_up();
        self.latch = latch;
        self.pins(IoState::On);
        self.hw.reset();
        self.hw.configure(&conf.drv);
        self.latches(true);
        self.conf = Some(conf);
        self.drv = Some(conf.drv);
    }

    fn deactivate(&mut self) {
        self.hw.reset();
        self.hw.disable();
        self.pins(IoState::Off);
        self.latches(false);
        self.latch = (None, None);
        self.conf = None;
        self.drv = None;
        self.hw.power_down();
    }
}

/// Adapter over one converter. Lives in a `static` and is shared by reference.
pub struct Gpadc<H> {
    inner: Mutex<RefCell<Inner<H>>>,
}

impl<H: GpadcHw> Gpadc<H> {
    pub const fn new(hw: H) -> Self {
        Self {
            inner: Mutex::new(RefCell::new(Inner {
                hw,
                owner: None,
                acquire_count: 0,
                conf: None,
                drv: None,
                latch: (None, None),
                open_count: 0,
                generation: 0,
                read_cb: None,
            })),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut Inner<H>) -> R) -> R {
        critical_section::with(|cs| f(&mut self.inner.borrow_ref_mut(cs)))
    }

    fn acquire_inner(&self, owner: Owner, timeout: &mut Timeout) -> Result<(), GpadcError> {
        loop {
            if self.with(|i| i.try_acquire(owner)) {
                return Ok(());
            }
            if !timeout.poll() {
                return Err(GpadcError::Timeout);
            }
            spin_loop();
        }
    }

    /// Take a reference on the ownership token, waiting for another owner to release it.
    pub fn acquire_to(&self, owner: Owner, timeout: Timeout) -> Result<(), GpadcError> {
        let mut timeout = timeout;
        self.acquire_inner(owner, &mut timeout)
    }

    /// Drop one reference on the ownership token.
    pub fn release(&self, owner: Owner) -> Result<(), GpadcError> {
        self.with(|i| {
            if i.owner != Some(owner) || i.acquire_count == 0 {
                return Err(GpadcError::NotOwner);
            }
            i.release();
            Ok(())
        })
    }

    /// Context currently holding the converter, if any.
    pub fn owner(&self) -> Option<Owner> {
        self.with(|i| i.owner)
    }

    pub fn is_open(&self) -> bool {
        self.with(|i| i.conf.is_some())
    }

    /// Drive the pins of `io` to their active or parked configuration.
    ///
    /// Meant for boards that need the pins set up before the converter is first opened, so it is
    /// refused while the converter is open.
    pub fn io_config(&self, io: &IoConfig, state: IoState) -> Result<(), GpadcError> {
        self.with(|i| {
            if i.conf.is_some() {
                return Err(GpadcError::ControllerBusy);
            }
            i.hw.power_up();
            for pin in [Some(io.input0), io.input1].into_iter().flatten() {
                i.hw.configure_pin(pin, state);
                i.hw.set_pad_latch(pin, true);
                i.hw.set_pad_latch(pin, false);
            }
            i.hw.power_down();
            Ok(())
        })
    }

    pub fn open(&self, owner: Owner, conf: &'static ControllerConfig) -> Result<GpadcHandle, GpadcError> {
        self.open_to(owner, conf, Timeout::Forever)
    }

    /// Open the converter on `conf`, waiting at most `timeout` for another owner to close it.
    ///
    /// Opening again from the same owner with the same configuration returns the same handle and
    /// must be matched by another `close`.
    pub fn open_to(
        &self,
        owner: Owner,
        conf: &'static ControllerConfig,
        timeout: Timeout,
    ) -> Result<GpadcHandle, GpadcError> {
        let latch = latched_pins(conf).ok_or(GpadcError::ConfigInvalid)?;
        let mut timeout = timeout;
        self.acquire_inner(owner, &mut timeout)?;

        self.with(|i| {
            if let Some(current) = i.conf {
                if *current != *conf {
                    i.release();
                    return Err(GpadcError::ChangeNotAllowed);
                }
                i.open_count += 1;
            } else {
                i.activate(conf, latch);
                i.open_count = 1;
                i.generation = i.generation.wrapping_add(1);
                debug!("gpadc: opened {:?} for {:?}", conf.drv.input, owner);
            }
            Ok(GpadcHandle { owner, generation: i.generation })
        })
    }

    /// Change driver settings of the open converter. The input cannot change.
    pub fn reconfig(&self, handle: &GpadcHandle, drv: DriverConfig) -> Result<(), GpadcError> {
        self.with(|i| {
            let current = i.check(handle)?;
            if current.input != drv.input {
                return Err(GpadcError::ChangeNotAllowed);
            }
            if i.read_cb.is_some() {
                return Err(GpadcError::AsyncReadInProgress);
            }
            i.hw.reset();
            i.hw.configure(&drv);
            i.drv = Some(drv);
            Ok(())
        })
    }

    /// Close one `open`. The converter is powered down when the last one is closed.
    ///
    /// With `force`, an outstanding asynchronous read is aborted and its callback never runs.
    pub fn close(&self, handle: &GpadcHandle, force: bool) -> Result<(), GpadcError> {
        self.with(|i| {
            i.check(handle)?;
            if i.read_cb.is_some() {
                if !force {
                    return Err(GpadcError::ControllerBusy);
                }
                i.hw.enable_interrupt(false);
                i.hw.clear_interrupt();
                i.read_cb = None;
                i.release();
                warn!("gpadc: asynchronous read aborted by close");
            }
            i.open_count = i.open_count.saturating_sub(1);
            if i.open_count == 0 {
                i.deactivate();
                debug!("gpadc: closed");
            }
            i.release();
            Ok(())
        })
    }

    pub fn read(&self, handle: &GpadcHandle) -> Result<u16, GpadcError> {
        self.read_to(handle, Timeout::Forever)
    }

    /// Oversampling-corrected conversion result.
    pub fn read_to(&self, handle: &GpadcHandle, timeout: Timeout) -> Result<u16, GpadcError> {
        let (raw, drv) = self.convert(handle, timeout)?;
        Ok(raw_to_value(&drv, raw))
    }

    pub fn read_raw(&self, handle: &GpadcHandle) -> Result<u16, GpadcError> {
        self.read_raw_to(handle, Timeout::Forever)
    }

    /// Conversion result left-aligned to 16 bits.
    pub fn read_raw_to(&self, handle: &GpadcHandle, timeout: Timeout) -> Result<u16, GpadcError> {
        self.convert(handle, timeout).map(|(raw, _)| raw)
    }

    // `timeout` covers both the token and the conversion.
    fn convert(&self, handle: &GpadcHandle, timeout: Timeout) -> Result<(u16, DriverConfig), GpadcError> {
        self.with(|i| i.check(handle))?;
        let mut timeout = timeout;
        self.acquire_inner(handle.owner, &mut timeout)?;

        let drv = self.with(|i| {
            let drv = match i.check(handle) {
                Ok(drv) if i.read_cb.is_none() => drv,
                Ok(_) => {
                    i.release();
                    return Err(GpadcError::AsyncReadInProgress);
                }
                Err(e) => {
                    i.release();
                    return Err(e);
                }
            };
            i.hw.enable_interrupt(false);
            i.hw.start();
            Ok(drv)
        })?;

        while self.with(|i| i.hw.in_progress()) {
            if !timeout.poll() {
                self.with(|i| {
                    i.hw.reset();
                    i.hw.configure(&drv);
                    i.hw.clear_interrupt();
                    i.release();
                });
                warn!("gpadc: conversion timed out");
                return Err(GpadcError::Timeout);
            }
            spin_loop();
        }

        let raw = self.with(|i| {
            let raw = i.hw.raw_value();
            i.hw.clear_interrupt();
            i.release();
            raw
        });
        Ok((raw, drv))
    }

    /// Start a conversion and return immediately. `callback(user_data, value)` runs from
    /// `on_interrupt` once the conversion completes.
    pub fn read_async(
        &self,
        handle: &GpadcHandle,
        callback: ReadCallback,
        user_data: usize,
    ) -> Result<(), GpadcError> {
        self.with(|i| {
            i.check(handle)?;
            if i.read_cb.is_some() {
                return Err(GpadcError::AsyncReadInProgress);
            }
            if !i.try_acquire(handle.owner) {
                return Err(GpadcError::HandleInvalid);
            }
            i.read_cb = Some((callback, user_data));
            i.hw.enable_interrupt(true);
            i.hw.start();
            Ok(())
        })
    }

    /// Converter interrupt handler. Completes an outstanding asynchronous read.
    pub fn on_interrupt(&self) {
        let done = self.with(|i| {
            let (callback, user_data) = match i.read_cb.take() {
                Some(cb) => cb,
                None => {
                    i.hw.clear_interrupt();
                    return None;
                }
            };
            let raw = i.hw.raw_value();
            let value = match i.drv {
                Some(drv) => raw_to_value(&drv, raw),
                None => raw,
            };
            i.hw.clear_interrupt();
            i.hw.enable_interrupt(false);
            i.release();
            Some((callback, user_data, value))
        });

        if let Some((callback, user_data, value)) = done {
            callback(user_data, value);
        }
    }

    /// One complete acquisition from the sensor node controller: open, convert, close.
    ///
    /// Waits as long as the main CPU holds the converter. Returns the left-aligned raw result.
    /// An external input without a matching IO setup is measured with no pins latched.
    pub fn snc_measure(&self, conf: &'static ControllerConfig) -> u16 {
        let latch = match latched_pins(conf) {
            Some(latch) => latch,
            None => {
                warn!("gpadc: invalid IO setup for {:?}, measuring unlatched", conf.drv.input);
                debug_assert!(false, "invalid IO setup for SNC measurement");
                (None, None)
            }
        };
        let mut forever = Timeout::Forever;
        while self.acquire_inner(Owner::Snc, &mut forever).is_err() {
            spin_loop();
        }

        self.with(|i| {
            if i.conf.is_none() {
                i.activate(conf, latch);
            } else {
                i.hw.configure(&conf.drv);
            }
            i.hw.enable_interrupt(false);
            i.hw.start();
        });

        while self.with(|i| i.hw.in_progress()) {
            spin_loop();
        }

        self.with(|i| {
            let raw = i.hw.raw_value();
            i.hw.clear_interrupt();
            if i.open_count == 0 {
                i.deactivate();
            } else if let Some(drv) = i.drv {
                // Converter was already open by the sensor node controller
                i.hw.configure(&drv);
            }
            i.release();
            raw
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::gpadc::config::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex as StdMutex};
    use std::vec::Vec;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(crate) enum Op {
        PowerUp,
        PowerDown,
        Reset,
        Configure(Input),
        Disable,
        Pin(IoPin, IoState),
        Latch(IoPin, bool),
        Start,
        ClearIrq,
        Irq(bool),
    }

    #[derive(Default)]
    pub(crate) struct FakeState {
        pub samples: VecDeque<u16>,
        /// Per-input reading once `samples` runs dry.
        pub levels: Vec<(Input, u16)>,
        pub input: Option<Input>,
        pub last: u16,
        pub busy_polls: u32,
        pub stuck: bool,
        pub ops: Vec<Op>,
        pub conversions: u32,
    }

    /// Converter model: each `start` takes the next queued sample.
    #[derive(Clone, Default)]
    pub(crate) struct FakeHw(pub Arc<StdMutex<FakeState>>);

    impl FakeHw {
        pub fn with_samples(samples: &[u16]) -> Self {
            let hw = Self::default();
            hw.push(samples);
            hw
        }

        pub fn push(&self, samples: &[u16]) {
            self.0.lock().unwrap().samples.extend(samples.iter().copied());
        }

        pub fn ops(&self) -> Vec<Op> {
            self.0.lock().unwrap().ops.clone()
        }

        pub fn set_level(&self, input: Input, value: u16) {
            let mut s = self.0.lock().unwrap();
            s.levels.retain(|(i, _)| *i != input);
            s.levels.push((input, value));
        }

        pub fn conversions(&self) -> u32 {
            self.0.lock().unwrap().conversions
        }

        fn log(&self, op: Op) {
            self.0.lock().unwrap().ops.push(op);
        }
    }

    impl GpadcHw for FakeHw {
        fn power_up(&mut self) {
            self.log(Op::PowerUp);
        }
        fn power_down(&mut self) {
            self.log(Op::PowerDown);
        }
        fn reset(&mut self) {
            self.log(Op::Reset);
        }
        fn configure(&mut self, drv: &DriverConfig) {
            let mut s = self.0.lock().unwrap();
            s.ops.push(Op::Configure(drv.input));
            s.input = Some(drv.input);
        }
        fn disable(&mut self) {
            self.log(Op::Disable);
        }
        fn configure_pin(&mut self, pin: IoPin, state: IoState) {
            self.log(Op::Pin(pin, state));
        }
        fn set_pad_latch(&mut self, pin: IoPin, enable: bool) {
            self.log(Op::Latch(pin, enable));
        }
        fn start(&mut self) {
            let mut guard = self.0.lock().unwrap();
            let s = &mut *guard;
            s.ops.push(Op::Start);
            s.conversions += 1;
            let input = s.input;
            let level = s.levels.iter().find(|(i, _)| Some(*i) == input).map(|(_, v)| *v);
            if let Some(v) = s.samples.pop_front().or(level) {
                s.last = v;
            }
            s.busy_polls = 2;
        }
        fn in_progress(&self) -> bool {
            let mut s = self.0.lock().unwrap();
            if s.stuck {
                return true;
            }
            if s.busy_polls > 0 {
                s.busy_polls -= 1;
                return true;
            }
            false
        }
        fn raw_value(&self) -> u16 {
            self.0.lock().unwrap().last
        }
        fn clear_interrupt(&mut self) {
            self.log(Op::ClearIrq);
        }
        fn enable_interrupt(&mut self, enable: bool) {
            self.log(Op::Irq(enable));
        }
    }

    const A: Owner = Owner::Task(1);
    const B: Owner = Owner::Task(2);

    const EXTERNAL_CONF: ControllerConfig = ControllerConfig {
        id: GpadcId::Gpadc1,
        io: Some(IoConfig {
            input0: IoPin { port: 1, pin: 9 },
            input1: None,
            voltage_level: VoltageLevel::V3_3,
        }),
        drv: DriverConfig {
            input_mode: InputMode::SingleEnded,
            input: Input::P1_09,
            temp_sensor: TempSensor::None,
            sample_time: 2,
            chopping: false,
            oversampling: Oversampling::Samples1,
        },
    };

    static EXTERNAL: ControllerConfig = EXTERNAL_CONF;
    static EXTERNAL_NO_IO: ControllerConfig = ControllerConfig { io: None, ..EXTERNAL_CONF };

    #[test]
    fn open_validates_io() {
        let gpadc = Gpadc::new(FakeHw::default());
        assert_eq!(gpadc.open(A, &EXTERNAL_NO_IO), Err(GpadcError::ConfigInvalid));
        assert_eq!(gpadc.owner(), None);
        assert!(gpadc.open(A, &BATTERY_LEVEL_INTERNAL).is_ok());
    }

    #[test]
    fn open_close_sequence() {
        let hw = FakeHw::default();
        let gpadc = Gpadc::new(hw.clone());
        let pin = IoPin { port: 1, pin: 9 };

        let h = gpadc.open(A, &EXTERNAL).unwrap();
        assert_eq!(gpadc.owner(), Some(A));
        gpadc.close(&h, false).unwrap();
        assert_eq!(gpadc.owner(), None);
        assert!(!gpadc.is_open());

        assert_eq!(
            hw.ops(),
            [
                Op::PowerUp,
                Op::Pin(pin, IoState::On),
                Op::Reset,
                Op::Configure(Input::P1_09),
                Op::Latch(pin, true),
                Op::Reset,
                Op::Disable,
                Op::Pin(pin, IoState::Off),
                Op::Latch(pin, false),
                Op::PowerDown,
            ]
        );
        assert_eq!(gpadc.close(&h, false), Err(GpadcError::AdapterNotOpen));
    }

    #[test]
    fn reentrant_open() {
        let gpadc = Gpadc::new(FakeHw::default());
        let h1 = gpadc.open(A, &BATTERY_LEVEL_INTERNAL).unwrap();
        let h2 = gpadc.open(A, &BATTERY_LEVEL_INTERNAL).unwrap();
        assert_eq!(h1, h2);
        assert_eq!(gpadc.open(A, &TEMP_SENSOR_RADIO_INTERNAL), Err(GpadcError::ChangeNotAllowed));

        gpadc.close(&h1, false).unwrap();
        assert!(gpadc.is_open());
        gpadc.close(&h2, false).unwrap();
        assert!(!gpadc.is_open());
        assert_eq!(gpadc.owner(), None);
    }

    #[test]
    fn stale_handle_rejected() {
        let gpadc = Gpadc::new(FakeHw::with_samples(&[0x1000]));
        let old = gpadc.open(A, &BATTERY_LEVEL_INTERNAL).unwrap();
        gpadc.close(&old, false).unwrap();
        let new = gpadc.open(A, &BATTERY_LEVEL_INTERNAL).unwrap();
        assert_eq!(gpadc.read_raw(&old), Err(GpadcError::HandleInvalid));
        assert_eq!(gpadc.read_raw(&new), Ok(0x1000));
    }

    #[test]
    fn other_owner_times_out() {
        let gpadc = Gpadc::new(FakeHw::default());
        let h = gpadc.open(A, &BATTERY_LEVEL_INTERNAL).unwrap();
        assert_eq!(
            gpadc.open_to(B, &BATTERY_LEVEL_INTERNAL, Timeout::Polls(10)),
            Err(GpadcError::Timeout)
        );
        assert_eq!(gpadc.acquire_to(B, Timeout::Polls(0)), Err(GpadcError::Timeout));
        gpadc.close(&h, false).unwrap();
        let h = gpadc.open_to(B, &BATTERY_LEVEL_INTERNAL, Timeout::Polls(10)).unwrap();
        assert_eq!(h.owner(), B);
    }

    #[test]
    fn read_applies_oversampling() {
        let gpadc = Gpadc::new(FakeHw::with_samples(&[0xFFC0, 0xFFC0]));
        let h = gpadc.open(A, &EXTERNAL).unwrap();
        assert_eq!(gpadc.read_raw(&h), Ok(0xFFC0));
        assert_eq!(gpadc.read(&h), Ok(0x3FF));
        gpadc.close(&h, false).unwrap();
    }

    #[test]
    fn conversion_timeout_releases() {
        let hw = FakeHw::default();
        let gpadc = Gpadc::new(hw.clone());
        let h = gpadc.open(A, &BATTERY_LEVEL_INTERNAL).unwrap();
        hw.0.lock().unwrap().stuck = true;
        assert_eq!(gpadc.read_to(&h, Timeout::Polls(5)), Err(GpadcError::Timeout));
        assert!(hw.ops().ends_with(&[Op::Reset, Op::Configure(Input::Vbat), Op::ClearIrq]));

        // Only the open's reference is left
        gpadc.close(&h, false).unwrap();
        assert_eq!(gpadc.owner(), None);
    }

    #[test]
    fn reconfig_rules() {
        let gpadc = Gpadc::new(FakeHw::default());
        let h = gpadc.open(A, &BATTERY_LEVEL_INTERNAL).unwrap();

        let mut drv = BATTERY_LEVEL_INTERNAL.drv;
        drv.oversampling = Oversampling::Samples1;
        gpadc.reconfig(&h, drv).unwrap();

        drv.input = Input::Vdd;
        assert_eq!(gpadc.reconfig(&h, drv), Err(GpadcError::ChangeNotAllowed));

        gpadc.close(&h, false).unwrap();
        assert_eq!(gpadc.reconfig(&h, BATTERY_LEVEL_INTERNAL.drv), Err(GpadcError::AdapterNotOpen));
    }

    static LAST_ASYNC: StdMutex<Vec<(usize, u16)>> = StdMutex::new(Vec::new());

    fn on_read(user_data: usize, value: u16) {
        LAST_ASYNC.lock().unwrap().push((user_data, value));
    }

    #[test]
    fn async_read_completes_once() {
        let gpadc = Gpadc::new(FakeHw::with_samples(&[0x8000]));
        let h = gpadc.open(A, &BATTERY_LEVEL_INTERNAL).unwrap();
        gpadc.read_async(&h, on_read, 7).unwrap();
        assert_eq!(gpadc.read_async(&h, on_read, 8), Err(GpadcError::AsyncReadInProgress));
        assert_eq!(gpadc.read_raw(&h), Err(GpadcError::AsyncReadInProgress));
        assert_eq!(gpadc.close(&h, false), Err(GpadcError::ControllerBusy));

        gpadc.on_interrupt();
        gpadc.on_interrupt();
        let seen: Vec<_> = LAST_ASYNC.lock().unwrap().iter().filter(|(d, _)| *d == 7).copied().collect();
        assert_eq!(seen, [(7, 0x8000)]);

        gpadc.close(&h, false).unwrap();
        assert_eq!(gpadc.owner(), None);
    }

    #[test]
    fn force_close_aborts_async_read() {
        let gpadc = Gpadc::new(FakeHw::with_samples(&[0x1234]));
        let h = gpadc.open(A, &BATTERY_LEVEL_INTERNAL).unwrap();
        gpadc.read_async(&h, on_read, 99).unwrap();
        gpadc.close(&h, true).unwrap();
        assert_eq!(gpadc.owner(), None);

        gpadc.on_interrupt();
        assert!(LAST_ASYNC.lock().unwrap().iter().all(|(d, _)| *d != 99));
    }

    #[test]
    fn release_by_non_owner() {
        let gpadc = Gpadc::new(FakeHw::default());
        assert_eq!(gpadc.release(A), Err(GpadcError::NotOwner));
        gpadc.acquire_to(A, Timeout::Forever).unwrap();
        assert_eq!(gpadc.release(B), Err(GpadcError::NotOwner));
        gpadc.release(A).unwrap();
        assert_eq!(gpadc.release(A), Err(GpadcError::NotOwner));
    }

    #[test]
    fn io_config_refused_while_open() {
        let hw = FakeHw::default();
        let gpadc = Gpadc::new(hw.clone());
        let io = EXTERNAL.io.unwrap();
        gpadc.io_config(&io, IoState::Off).unwrap();
        assert!(hw.ops().contains(&Op::Pin(io.input0, IoState::Off)));

        let h = gpadc.open(A, &BATTERY_LEVEL_INTERNAL).unwrap();
        assert_eq!(gpadc.io_config(&io, IoState::On), Err(GpadcError::ControllerBusy));
        gpadc.close(&h, false).unwrap();
    }

    #[test]
    fn snc_measure_is_self_contained() {
        let hw = FakeHw::with_samples(&[0xA000]);
        let gpadc = Gpadc::new(hw.clone());
        assert_eq!(gpadc.snc_measure(&TEMP_SENSOR_RADIO_INTERNAL), 0xA000);
        assert_eq!(gpadc.owner(), None);
        assert!(!gpadc.is_open());
        assert_eq!(hw.conversions(), 1);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "invalid IO setup")]
    fn snc_measure_flags_missing_io() {
        let gpadc = Gpadc::new(FakeHw::with_samples(&[0x4000]));
        gpadc.snc_measure(&EXTERNAL_NO_IO);
    }

    #[test]
    #[cfg(not(debug_assertions))]
    fn snc_measure_without_io_latches_nothing() {
        let hw = FakeHw::with_samples(&[0x4000]);
        let gpadc = Gpadc::new(hw.clone());
        assert_eq!(gpadc.snc_measure(&EXTERNAL_NO_IO), 0x4000);
        assert!(!hw.ops().iter().any(|op| matches!(op, Op::Latch(_, true))));
        assert_eq!(gpadc.owner(), None);
    }
}
