//! SPDX-License-Identifier: MIT OR Apache-2.0
//!
//! # SNC GPADC Monitor Demo
//!
//! Runs the drift monitors on a dual-core part:
//! - **Core 1** plays the sensor node controller. It raises the periodic event from the timer and
//!   runs the loaded uCodes (`SncCore`), then rings core 0 through the SIO FIFO.
//! - **Core 0** is the main CPU. It configures the monitors, dispatches notifications to their
//!   callbacks and reports values over USB serial (`usb_module.rs`).
//! - **Hardware Module:** the RP2350 implementations of the platform seams (`hardware.rs`).
//!
//! Target: Raspberry Pi Pico 2 W (RP2350).

#![no_std]
#![no_main]

// --- Imports ---
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use defmt::*;
use defmt_rtt as _;
use panic_probe as _;

use snc_gpadc::gpadc::{
    conv_to_batt_mvolt, conv_to_temp, raw_to_value, Gpadc, GpadcHandle, Owner,
    BATTERY_LEVEL_INTERNAL, TEMP_SENSOR_RADIO_INTERNAL,
};
use snc_gpadc::monitor::{
    GpadcMonitorUcode, MonitorParams, MonitorResources, MonitorState, RcxCalibrationUcode,
    RcxResources, SysAdc, SysRcx,
};
use snc_gpadc::snc::{SncControl, SncCore, SncMutex};
use snc_gpadc::MonitorError;

// --- Modules ---
mod hardware;
mod usb_module;

use hardware::{RoscCalibration, Rp2350Adc, TimerEvent};

// --- HAL Selection ---
use rp235x_hal as hal;
use hal::entry;
use hal::multicore::{Multicore, Stack};
use hal::pac;

use rp235x_hal::pac::interrupt;

// --- Bootloader Configuration ---

#[unsafe(link_section = ".start_block")]
#[used]
pub static IMAGE_DEF: hal::block::ImageDef = hal::block::ImageDef::secure_exe();

// --- Monitor Settings ---

/// Allowed temperature drift before the main CPU is woken, degrees Celsius.
const TEMP_DRIFT_C: u16 = 2;
const TEMP_POLL_MS: u16 = 1000;

/// Owner of the battery reads done from core 0.
const APP_OWNER: Owner = Owner::Task(1);

// --- Shared State ---

static GPADC: Gpadc<Rp2350Adc> = Gpadc::new(Rp2350Adc::new());
static SNC: SncControl = SncControl::new();
static EVENT: TimerEvent = TimerEvent::new();
static CLOCK: RoscCalibration = RoscCalibration;

static TEMP_STATE: SncMutex<MonitorState> = SncMutex::new(MonitorState::new());
static RCX_STATE: SncMutex<[MonitorState; 2]> = SncMutex::new([MonitorState::new(); 2]);

// Set by the notification callbacks, consumed by the main loop
static TEMP_ALERT: AtomicBool = AtomicBool::new(false);
static RCX_DONE: AtomicBool = AtomicBool::new(false);
static BATTERY_READY: AtomicBool = AtomicBool::new(false);
static BATTERY_RAW: AtomicU32 = AtomicU32::new(0);

static CORE1_STACK: Stack<4096> = Stack::new();

fn on_temperature() {
    TEMP_ALERT.store(true, Ordering::SeqCst);
}

fn on_rcx_calibrated() {
    RCX_DONE.store(true, Ordering::SeqCst);
}

fn on_battery(_user_data: usize, value: u16) {
    BATTERY_RAW.store(value as u32, Ordering::SeqCst);
    BATTERY_READY.store(true, Ordering::SeqCst);
}

fn halt(err: MonitorError) -> ! {
    error!("monitor setup failed: {}", err);
    loop {
        cortex_m::asm::wfe();
    }
}

/// Entry point.
#[entry]
fn main() -> ! {
    info!("Program start");

    // 1. Initialize Hardware Stack (Clocks, Timer, ADC, USB)
    let mut hw = hardware::init();

    // 2. Configure the monitors. Both uCodes come back ready to load on core 1.
    let res = MonitorResources { gpadc: &GPADC, snc: &SNC, periodic: &EVENT, state: &TEMP_STATE };
    let params = MonitorParams { drift: TEMP_DRIFT_C, poll_interval_ms: TEMP_POLL_MS };
    let (sys_adc, adc_ucode) =
        match SysAdc::config(res, &TEMP_SENSOR_RADIO_INTERNAL, on_temperature, params) {
            Ok(pair) => pair,
            Err(e) => halt(e),
        };
    if let Err(e) = sys_adc.enable() {
        halt(e);
    }

    let res = RcxResources {
        gpadc: &GPADC,
        snc: &SNC,
        periodic: &EVENT,
        clock: &CLOCK,
        state: &RCX_STATE,
    };
    let (sys_rcx, rcx_ucode) = match SysRcx::config(res, on_rcx_calibrated) {
        Ok(pair) => pair,
        Err(e) => halt(e),
    };

    // 3. Hand the uCodes to core 1
    let timer = hw.timer;
    {
        let mut mc = Multicore::new(&mut hw.psm, &mut hw.ppb, &mut hw.sio.fifo);
        let cores = mc.cores();
        let core1 = &mut cores[1];
        let _ = core1.spawn(CORE1_STACK.take().unwrap(), move || {
            snc_main(timer, adc_ucode, rcx_ucode)
        });
    }
    info!("SNC core running");

    // 4. One asynchronous battery read, completed from ADC_IRQ_FIFO
    let mut battery: Option<GpadcHandle> = match GPADC.open(APP_OWNER, &BATTERY_LEVEL_INTERNAL) {
        Ok(handle) => match GPADC.read_async(&handle, on_battery, 0) {
            Ok(()) => Some(handle),
            Err(e) => {
                warn!("battery read: {}", e);
                let _ = GPADC.close(&handle, true);
                None
            }
        },
        Err(e) => {
            warn!("battery open: {}", e);
            None
        }
    };

    // 5. Main Application Loop
    loop {
        // Doorbell from core 1: run the notification handler
        if hw.sio.fifo.read().is_some() {
            while hw.sio.fifo.read().is_some() {}
            SNC.handle_interrupt();
        }

        if TEMP_ALERT.swap(false, Ordering::SeqCst) {
            match sys_adc.get_value() {
                Ok(raw) => {
                    let drv = &TEMP_SENSOR_RADIO_INTERNAL.drv;
                    let temp = conv_to_temp(drv, raw_to_value(drv, raw as u16)).unwrap_or(i16::MIN);
                    usb_module::report(format_args!("Temperature: {} C (raw {})", temp, raw));
                    // Follow the drift: recentre on the new value
                    if let Err(e) = sys_adc.set_bounds(raw as u16) {
                        warn!("set_bounds: {}", e);
                    }
                }
                Err(e) => warn!("get_value: {}", e),
            }
        }

        if RCX_DONE.swap(false, Ordering::SeqCst) {
            let khz = CLOCK.result_khz();
            match sys_rcx.get_value() {
                Ok((bandgap, vbat)) => {
                    usb_module::report(format_args!(
                        "Calibrated: {} kHz (bandgap {}, vbat {})",
                        khz, bandgap, vbat
                    ));
                    if let Err(e) = sys_rcx.set_bounds(bandgap, vbat) {
                        warn!("set_bounds: {}", e);
                    }
                }
                Err(e) => warn!("get_value: {}", e),
            }
        }

        if BATTERY_READY.swap(false, Ordering::SeqCst) {
            if let Some(handle) = battery.take() {
                let _ = GPADC.close(&handle, false);
            }
            let value = BATTERY_RAW.load(Ordering::SeqCst) as u16;
            let mv = conv_to_batt_mvolt(&BATTERY_LEVEL_INTERNAL.drv, value);
            usb_module::report(format_args!("Battery: {} mV", mv));
        }
    }
}

/// Sensor node controller loop on core 1.
fn snc_main(
    timer: hal::Timer<hal::timer::CopyableTimer0>,
    mut adc_ucode: GpadcMonitorUcode<Rp2350Adc>,
    mut rcx_ucode: RcxCalibrationUcode<Rp2350Adc>,
) -> ! {
    let pac = unsafe { pac::Peripherals::steal() };
    let mut sio = hal::Sio::new(pac.SIO);

    let adc_id = adc_ucode.id();
    let rcx_id = rcx_ucode.id();
    let mut snc_core = SncCore::new(&SNC);
    if let Err(e) = snc_core.load(adc_id, &mut adc_ucode) {
        error!("load {}: {}", adc_id.index(), e);
    }
    if let Err(e) = snc_core.load(rcx_id, &mut rcx_ucode) {
        error!("load {}: {}", rcx_id.index(), e);
    }

    let mut last_event = timer.get_counter();
    loop {
        let now = timer.get_counter();
        if now.ticks().saturating_sub(last_event.ticks()) >= EVENT.period_us() {
            last_event = now;
            EVENT.raise();
        }

        if EVENT.is_pending() {
            // Nothing enabled to acknowledge the event
            if snc_core.on_event() == 0 {
                EVENT.clear_pending();
            } else if SNC.pending() != 0 {
                sio.fifo.write(SNC.pending());
            }
        }
    }
}

// --- Interrupt Handlers ---

#[allow(non_snake_case)]
#[interrupt]
fn ADC_IRQ_FIFO() {
    GPADC.on_interrupt();
}

// --- Metadata ---

#[unsafe(link_section = ".bi_entries")]
#[used]
pub static PICOTOOL_ENTRIES: [hal::binary_info::EntryAddr; 4] = [
    hal::binary_info::rp_cargo_bin_name!(),
    hal::binary_info::rp_cargo_version!(),
    hal::binary_info::rp_program_description!(c"SNC GPADC Monitor"),
    hal::binary_info::rp_program_build_attribute!()
];
