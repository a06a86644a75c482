//! Single-source GPADC drift monitor, main-CPU side.
//!
//! `config` takes a reference reading, centres the bounds on it and registers the monitor uCode.
//! The uCode then samples the source every poll interval and notifies the main CPU whenever a
//! sample leaves the bounds. The callback typically reads the new value with
//! [`SysAdc::get_value`] and re-centres with [`SysAdc::set_bounds`].

use super::ucode::GpadcMonitorUcode;
use super::{reference_reading, DriftParameters, MonitorParams, MonitorResources, MonitorState, RTC_PDC_EVENT_PERIOD_MS};
use crate::error::MonitorError;
use crate::gpadc::{ControllerConfig, GpadcHw};
use crate::snc::{
    NotifyCallback, PdcEventPriority, PeriodicEvent, SncControl, SncMutex, UcodeConfig, UcodeId,
    UcodePriority, UCODE_TABLE_SIZE,
};

pub struct SysAdc<const N: usize = UCODE_TABLE_SIZE> {
    snc: &'static SncControl<N>,
    periodic: &'static dyn PeriodicEvent,
    state: &'static SncMutex<MonitorState>,
    id: UcodeId,
    params: DriftParameters,
}

impl<const N: usize> SysAdc<N> {
    /// Configure a monitor on `conf`.
    ///
    /// Returns the main-CPU handle and the uCode to load on the controller. The uCode is
    /// registered but not enabled.
    pub fn config<H: GpadcHw + 'static>(
        res: MonitorResources<H, N>,
        conf: &'static ControllerConfig,
        callback: NotifyCallback,
        params: MonitorParams,
    ) -> Result<(Self, GpadcMonitorUcode<H, N>), MonitorError> {
        let drift = DriftParameters::for_source(&conf.drv, params)?;
        let reference = reference_reading(res.gpadc, conf)?;

        let id = res.snc.register(UcodeConfig {
            pdc_priority: PdcEventPriority::P0,
            ucode_priority: UcodePriority::P1,
            callback: Some(callback),
        })?;
        match res.state.lock_host() {
            Ok(mut state) => state.set_bounds(reference, drift.drift),
            Err(e) => {
                let _ = res.snc.unregister(id);
                return Err(e);
            }
        }
        res.periodic.configure(RTC_PDC_EVENT_PERIOD_MS);

        info!(
            "sys_adc: reference {} drift {} every {} events",
            reference,
            drift.drift,
            drift.poll_interval_ticks
        );

        let ucode = GpadcMonitorUcode::new(id, conf, drift.poll_interval_ticks, res);
        let sys = Self { snc: res.snc, periodic: res.periodic, state: res.state, id, params: drift };
        Ok((sys, ucode))
    }

    /// Start monitoring. Events that fired while disabled are discarded.
    pub fn enable(&self) -> Result<(), MonitorError> {
        self.snc.enable(self.id)?;
        self.periodic.clear_pending();
        Ok(())
    }

    pub fn disable(&self) -> Result<(), MonitorError> {
        self.snc.disable(self.id)?;
        Ok(())
    }

    /// Last value sampled by the uCode, raw units.
    pub fn get_value(&self) -> Result<u32, MonitorError> {
        Ok(self.state.lock_host()?.current_value)
    }

    pub fn get_value_to(&self, polls: u32) -> Result<u32, MonitorError> {
        Ok(self.state.lock_host_to(polls)?.current_value)
    }

    /// Re-centre the bounds on `reference`, raw units.
    pub fn set_bounds(&self, reference: u16) -> Result<(), MonitorError> {
        self.state.lock_host()?.set_bounds(reference, self.params.drift);
        Ok(())
    }

    pub fn set_bounds_to(&self, reference: u16, polls: u32) -> Result<(), MonitorError> {
        self.state.lock_host_to(polls)?.set_bounds(reference, self.params.drift);
        Ok(())
    }

    /// Current bounds, `(lower, upper)`.
    pub fn bounds(&self) -> Result<(u32, u32), MonitorError> {
        let state = self.state.lock_host()?;
        Ok((state.lower_bound, state.upper_bound))
    }

    pub fn id(&self) -> UcodeId {
        self.id
    }

    pub fn drift(&self) -> DriftParameters {
        self.params
    }

    /// Disable and unregister. The uCode must be unloaded from the controller as well.
    pub fn teardown(self) -> Result<(), MonitorError> {
        self.snc.disable(self.id)?;
        self.snc.unregister(self.id)?;
        debug!("sys_adc: uCode {} removed", self.id.index());
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::{GpadcError, SncError};
    use crate::gpadc::adapter::tests::FakeHw;
    use crate::gpadc::{
        DriverConfig, Gpadc, GpadcId, Input, InputMode, Oversampling, TempSensor,
        BATTERY_LEVEL_INTERNAL, TEMP_SENSOR_RADIO_INTERNAL,
    };
    use crate::snc::{SncCore, UcodeBlock};
    use std::boxed::Box;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Periodic event model counting configurations and acknowledgements.
    #[derive(Default)]
    pub(crate) struct FakeEvent {
        pub period_ms: AtomicU32,
        pub cleared: AtomicU32,
    }

    impl PeriodicEvent for FakeEvent {
        fn configure(&self, period_ms: u32) {
            self.period_ms.store(period_ms, Ordering::SeqCst);
        }
        fn clear_pending(&self) {
            self.cleared.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub(crate) fn leak<T>(value: T) -> &'static T {
        Box::leak(Box::new(value))
    }

    struct Rig {
        hw: FakeHw,
        res: MonitorResources<FakeHw, 4>,
        event: &'static FakeEvent,
    }

    fn rig(samples: &[u16]) -> Rig {
        let hw = FakeHw::with_samples(samples);
        let event = leak(FakeEvent::default());
        let res = MonitorResources {
            gpadc: leak(Gpadc::new(hw.clone())),
            snc: leak(SncControl::new()),
            periodic: event,
            state: leak(SncMutex::new(MonitorState::new())),
        };
        Rig { hw, res, event }
    }

    fn nop() {}

    fn raw(drift: u16, poll_interval_ms: u16) -> MonitorParams {
        MonitorParams { drift, poll_interval_ms }
    }

    // VDD drift is taken as raw units
    static VDD: ControllerConfig = ControllerConfig {
        id: GpadcId::Gpadc1,
        io: None,
        drv: DriverConfig {
            input_mode: InputMode::SingleEnded,
            input: Input::Vdd,
            temp_sensor: TempSensor::None,
            sample_time: 15,
            chopping: true,
            oversampling: Oversampling::Samples64,
        },
    };

    #[test]
    fn config_reads_reference_and_registers() {
        let r = rig(&[2048]);
        let (sys, ucode) = SysAdc::config(r.res, &VDD, nop, raw(50, 100)).unwrap();

        assert_eq!(sys.bounds(), Ok((1998, 2098)));
        assert_eq!(ucode.id(), sys.id());
        assert!(!r.res.snc.is_enabled(sys.id()));
        assert_eq!(r.event.period_ms.load(Ordering::SeqCst), RTC_PDC_EVENT_PERIOD_MS);
        assert_eq!(r.res.gpadc.owner(), None);

        sys.enable().unwrap();
        assert!(r.res.snc.is_enabled(sys.id()));
        assert_eq!(r.event.cleared.load(Ordering::SeqCst), 1);
        sys.disable().unwrap();
        assert!(!r.res.snc.is_enabled(sys.id()));
    }

    // Pin input without IO configuration
    static UNWIRED: ControllerConfig = ControllerConfig {
        id: GpadcId::Gpadc1,
        io: None,
        drv: DriverConfig {
            input_mode: InputMode::SingleEnded,
            input: Input::P0_08,
            temp_sensor: TempSensor::None,
            sample_time: 15,
            chopping: false,
            oversampling: Oversampling::Samples1,
        },
    };

    #[test]
    fn config_propagates_adapter_errors() {
        let r = rig(&[2048]);
        let err = SysAdc::config(r.res, &UNWIRED, nop, raw(50, 100)).err();
        assert_eq!(err, Some(MonitorError::Adapter(GpadcError::ConfigInvalid)));
        assert_eq!(r.hw.conversions(), 0);

        // Nothing was registered by the failed attempt
        let (sys, _ucode) = SysAdc::config(r.res, &VDD, nop, raw(50, 100)).unwrap();
        assert_eq!(sys.id().index(), 0);
    }

    #[test]
    fn full_table_leaves_record_untouched() {
        let r = rig(&[2048]);
        let cfg = UcodeConfig {
            pdc_priority: PdcEventPriority::P0,
            ucode_priority: UcodePriority::P1,
            callback: None,
        };
        for _ in 0..4 {
            r.res.snc.register(cfg).unwrap();
        }

        let err = SysAdc::config(r.res, &VDD, nop, raw(50, 100)).err();
        assert_eq!(err, Some(MonitorError::Snc(SncError::NoFreeSlot)));
        assert_eq!(*r.res.state.lock_host().unwrap(), MonitorState::new());
        assert_eq!(r.event.period_ms.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn config_rejects_invalid_drift() {
        let r = rig(&[2048]);
        let err = SysAdc::config(r.res, &BATTERY_LEVEL_INTERNAL, nop, raw(6000, 100)).err();
        assert_eq!(err, Some(MonitorError::InvalidParams));
        assert_eq!(r.hw.conversions(), 0);
    }

    #[test]
    fn temperature_drift_uses_calibration() {
        let r = rig(&[641 << 6]);
        let (sys, _ucode) =
            SysAdc::config(r.res, &TEMP_SENSOR_RADIO_INTERNAL, nop, raw(2, 1000)).unwrap();
        assert_eq!(sys.drift().drift, 164);
        assert_eq!(sys.drift().poll_interval_ticks, 10);
        let reference = 641u32 << 6;
        assert_eq!(sys.bounds(), Ok((reference - 164, reference + 164)));
    }

    #[test]
    fn tick_gate_defers_measurement() {
        // 300 ms at the event period gives a gate of three events
        let r = rig(&[2048, 2100]);
        let (sys, mut ucode) = SysAdc::config(r.res, &VDD, nop, raw(50, 300)).unwrap();
        sys.enable().unwrap();
        let before = r.hw.conversions();

        ucode.run();
        ucode.run();
        assert_eq!(r.hw.conversions(), before);
        assert_eq!(ucode.tick_gate().count(), 2);
        assert_eq!(sys.get_value(), Ok(0));
        assert_eq!(r.res.snc.pending(), 0);

        ucode.run();
        assert_eq!(r.hw.conversions(), before + 1);
        assert_eq!(ucode.tick_gate().count(), 0);
        assert_eq!(sys.get_value(), Ok(2100));
        // Every invocation acknowledges the event, plus the one from enable()
        assert_eq!(r.event.cleared.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn notifies_only_out_of_bounds() {
        let r = rig(&[2048, 2000, 1997, 2099, 2098]);
        let (sys, mut ucode) = SysAdc::config(r.res, &VDD, nop, raw(50, 100)).unwrap();
        let bit = sys.id().bit();

        ucode.run();
        assert_eq!(r.res.snc.handle_interrupt(), 0);
        ucode.run();
        assert_eq!(r.res.snc.handle_interrupt(), bit);
        assert_eq!(sys.get_value(), Ok(1997));
        ucode.run();
        assert_eq!(r.res.snc.handle_interrupt(), bit);
        assert_eq!(sys.get_value(), Ok(2099));
        ucode.run();
        assert_eq!(r.res.snc.handle_interrupt(), 0);
    }

    static NOTIFIED: AtomicU32 = AtomicU32::new(0);

    fn count_notification() {
        NOTIFIED.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn reference_2048_drift_50() {
        let r = rig(&[2048, 2100, 2050]);
        let (sys, mut ucode) =
            SysAdc::config(r.res, &VDD, count_notification, raw(50, 100)).unwrap();
        assert_eq!(sys.bounds(), Ok((1998, 2098)));
        sys.enable().unwrap();

        let mut core = SncCore::new(r.res.snc);
        core.load(ucode.id(), &mut ucode).unwrap();

        assert_eq!(core.on_event(), 1);
        assert_eq!(r.res.snc.handle_interrupt(), sys.id().bit());
        assert_eq!(NOTIFIED.load(Ordering::SeqCst), 1);
        assert_eq!(sys.get_value(), Ok(2100));

        assert_eq!(core.on_event(), 1);
        assert_eq!(r.res.snc.handle_interrupt(), 0);
        assert_eq!(NOTIFIED.load(Ordering::SeqCst), 1);
        assert_eq!(sys.get_value(), Ok(2050));
    }

    #[test]
    fn disabled_monitor_does_not_run() {
        let r = rig(&[2048, 3000]);
        let (sys, mut ucode) = SysAdc::config(r.res, &VDD, nop, raw(50, 100)).unwrap();
        let mut core = SncCore::new(r.res.snc);
        core.load(ucode.id(), &mut ucode).unwrap();

        assert_eq!(core.on_event(), 0);
        sys.enable().unwrap();
        assert_eq!(core.on_event(), 1);
        sys.disable().unwrap();
        assert_eq!(core.on_event(), 0);
    }

    #[test]
    fn set_bounds_recentres() {
        let r = rig(&[2048]);
        let (sys, _ucode) = SysAdc::config(r.res, &VDD, nop, raw(50, 100)).unwrap();
        sys.set_bounds(30).unwrap();
        assert_eq!(sys.bounds(), Ok((0, 80)));
        sys.set_bounds_to(4000, 10).unwrap();
        assert_eq!(sys.bounds(), Ok((3950, 4050)));
    }

    #[test]
    fn host_access_times_out_while_snc_holds_state() {
        let r = rig(&[2048]);
        let (sys, _ucode) = SysAdc::config(r.res, &VDD, nop, raw(50, 100)).unwrap();
        let guard = r.res.state.lock_snc();
        assert_eq!(sys.get_value_to(10), Err(MonitorError::LockTimeout));
        assert_eq!(sys.set_bounds_to(100, 10), Err(MonitorError::LockTimeout));
        drop(guard);
        assert_eq!(sys.get_value_to(10), Ok(0));
    }

    #[test]
    fn get_value_never_sees_torn_state() {
        let r = rig(&[]);
        let state = r.res.state;

        std::thread::scope(|s| {
            s.spawn(|| {
                for v in 0..2_000u32 {
                    let mut g = state.lock_snc();
                    g.current_value = v;
                    std::thread::yield_now();
                    g.lower_bound = v;
                    g.upper_bound = v;
                }
            });
            s.spawn(|| {
                for _ in 0..2_000 {
                    if let Ok(g) = state.lock_host_to(u32::MAX) {
                        assert_eq!(g.current_value, g.lower_bound);
                        assert_eq!(g.current_value, g.upper_bound);
                    }
                }
            });
        });
    }

    #[test]
    fn teardown_unregisters() {
        let r = rig(&[2048]);
        let (sys, _ucode) = SysAdc::config(r.res, &VDD, nop, raw(50, 100)).unwrap();
        let id = sys.id();
        sys.enable().unwrap();
        sys.teardown().unwrap();
        assert!(!r.res.snc.is_enabled(id));
        assert_eq!(r.res.snc.enable(id), Err(crate::error::SncError::UnknownUcode));
    }
}
