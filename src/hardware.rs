//! Hardware Abstraction Module
//!
//! RP2350 bring-up for the demo, and the platform seams the monitor library runs on:
//! - [`Rp2350Adc`]: the `GpadcHw` register interface over the SAR ADC.
//! - [`TimerEvent`]: the periodic event, raised from the microsecond timer.
//! - [`RoscCalibration`]: the clock controller. The ring oscillator stands in for the RCX and is
//!   measured against the crystal with frequency counter 0.

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use rp235x_hal as hal;
use hal::pac;

use snc_gpadc::gpadc::{DriverConfig, GpadcHw, Input, IoPin, IoState};
use snc_gpadc::snc::{rtc_period, ClockCtrl, PeriodicEvent};

use crate::usb_module;

/// External crystal frequency used by the Raspberry Pi Pico 2 W.
const XTAL_FREQ_HZ: u32 = 12_000_000u32;

/// Internal temperature sensor channel.
const TEMP_CHANNEL: u8 = 4;
/// VSYS / 3 on the Pico 2 W.
const VSYS_CHANNEL: u8 = 3;

// FC0_SRC selector of the ring oscillator
const FC0_SRC_ROSC: u32 = 0x03;
// One-hot CLK_REF_SELECTED value for the crystal
const CLK_REF_XOSC_SELECTED: u32 = 1 << 2;

/// Peripherals `main` keeps after initialization.
pub struct Hardware {
    pub timer: hal::Timer<hal::timer::CopyableTimer0>,
    pub sio: hal::Sio,
    pub psm: pac::PSM,
    pub ppb: pac::PPB,
}

/// Initializes the hardware stack.
///
/// This function:
/// 1.  Takes ownership of the raw PAC peripherals.
/// 2.  Configures the Watchdog and Clocks (System & USB).
/// 3.  Initializes the Microsecond Timer.
/// 4.  Brings the ADC out of reset and unmasks its FIFO interrupt. The adapter configures it
///     on every open.
/// 5.  Initializes the USB Serial module.
pub fn init() -> Hardware {
    // 1. Take ownership of raw peripherals
    let mut pac = pac::Peripherals::take().unwrap();
    let mut watchdog = hal::Watchdog::new(pac.WATCHDOG);

    // 2. Configure Clocks
    let clocks = hal::clocks::init_clocks_and_plls(
        XTAL_FREQ_HZ,
        pac.XOSC,
        pac.CLOCKS,
        pac.PLL_SYS,
        pac.PLL_USB,
        &mut pac.RESETS,
        &mut watchdog,
    )
    .unwrap();

    // 3. Configure Timer (Microsecond precision)
    let timer = hal::Timer::new_timer0(pac.TIMER0, &mut pac.RESETS, &clocks);

    let sio = hal::Sio::new(pac.SIO);

    // 4. ADC out of reset, left powered down until the first open
    let _adc = hal::Adc::new(pac.ADC, &mut pac.RESETS);
    unsafe {
        let adc_regs = &(*pac::ADC::ptr());
        adc_regs.cs().write(|w| w.bits(0));
        cortex_m::peripheral::NVIC::unmask(pac::Interrupt::ADC_IRQ_FIFO);
    }

    // 5. Configure USB Serial (via module)
    usb_module::init(pac.USB, pac.USB_DPRAM, clocks.usb_clock, &mut pac.RESETS);

    Hardware { timer, sio, psm: pac.PSM, ppb: pac.PPB }
}

/// SAR ADC seen through the adapter's register interface.
///
/// The converter is 12 bits wide; results are shifted up to the adapter's left-aligned 16-bit
/// format. Sample time and chopping have no counterpart here.
pub struct Rp2350Adc;

impl Rp2350Adc {
    pub const fn new() -> Self {
        Self
    }

    fn regs(&self) -> &'static pac::adc::RegisterBlock {
        unsafe { &*pac::ADC::ptr() }
    }

    fn pad(pin: IoPin) -> &'static pac::pads_bank0::GPIO {
        unsafe { (*pac::PADS_BANK0::ptr()).gpio(pin.pin as usize) }
    }

    fn channel(drv: &DriverConfig) -> u8 {
        match drv.input {
            Input::TempSensor => TEMP_CHANNEL,
            Input::Vbat => VSYS_CHANNEL,
            Input::P0_09 => 1,
            Input::P0_25 | Input::Diff_P1_09_P0_25 => 2,
            // No internal rail taps; everything else reads GPIO26
            _ => 0,
        }
    }
}

impl GpadcHw for Rp2350Adc {
    fn power_up(&mut self) {
        let adc = self.regs();
        adc.cs().modify(|_, w| w.en().set_bit());
        while adc.cs().read().ready().bit_is_clear() {
            core::hint::spin_loop();
        }
    }

    fn power_down(&mut self) {
        self.regs().cs().modify(|_, w| w.en().clear_bit().ts_en().clear_bit());
    }

    fn reset(&mut self) {
        let adc = self.regs();
        adc.cs().modify(|_, w| unsafe { w.start_many().clear_bit().rrobin().bits(0).ainsel().bits(0) });
        adc.fcs().write(|w| unsafe { w.bits(0) });
        while adc.fcs().read().level().bits() > 0 {
            let _ = adc.fifo().read();
        }
    }

    fn configure(&mut self, drv: &DriverConfig) {
        let adc = self.regs();
        let temp = matches!(drv.input, Input::TempSensor);
        adc.cs().modify(|_, w| unsafe {
            w.ainsel().bits(Self::channel(drv)).ts_en().bit(temp).en().set_bit()
        });
        // FIFO Control: Enable, Threshold=1, No DMA
        adc.fcs().modify(|_, w| unsafe {
            w.en().set_bit().thresh().bits(1).dreq_en().clear_bit().shift().clear_bit()
        });
    }

    fn disable(&mut self) {
        self.regs().cs().modify(|_, w| w.en().clear_bit());
    }

    fn configure_pin(&mut self, pin: IoPin, state: IoState) {
        let analogue = state == IoState::On;
        Self::pad(pin).modify(|_, w| {
            w.ie().bit(!analogue).od().bit(analogue).pue().clear_bit().pde().clear_bit()
        });
    }

    fn set_pad_latch(&mut self, pin: IoPin, enable: bool) {
        Self::pad(pin).modify(|_, w| w.iso().bit(enable));
    }

    fn start(&mut self) {
        self.regs().cs().modify(|_, w| w.start_once().set_bit());
    }

    fn in_progress(&self) -> bool {
        self.regs().cs().read().ready().bit_is_clear()
    }

    fn raw_value(&self) -> u16 {
        self.regs().result().read().result().bits() << 4
    }

    fn clear_interrupt(&mut self) {
        let adc = self.regs();
        while adc.fcs().read().level().bits() > 0 {
            let _ = adc.fifo().read();
        }
    }

    fn enable_interrupt(&mut self, enable: bool) {
        self.regs().inte().modify(|_, w| w.fifo().bit(enable));
    }
}

/// Periodic event in RTC units, raised by core 1 from the microsecond timer.
pub struct TimerEvent {
    period: AtomicU32,
    pending: AtomicBool,
}

impl TimerEvent {
    pub const fn new() -> Self {
        Self { period: AtomicU32::new(0), pending: AtomicBool::new(false) }
    }

    pub fn period_us(&self) -> u64 {
        (self.period.load(Ordering::SeqCst) as u64 + 1) * 10_000
    }

    pub fn raise(&self) {
        self.pending.store(true, Ordering::SeqCst);
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::SeqCst)
    }
}

impl PeriodicEvent for TimerEvent {
    fn configure(&self, period_ms: u32) {
        self.period.store(rtc_period(period_ms), Ordering::SeqCst);
    }

    fn clear_pending(&self) {
        self.pending.store(false, Ordering::SeqCst);
    }
}

/// Ring oscillator calibration against the crystal.
pub struct RoscCalibration;

impl RoscCalibration {
    fn clocks(&self) -> &'static pac::clocks::RegisterBlock {
        unsafe { &*pac::CLOCKS::ptr() }
    }

    /// Frequency measured by the last calibration, kHz.
    pub fn result_khz(&self) -> u32 {
        self.clocks().fc0_result().read().khz().bits()
    }
}

impl ClockCtrl for RoscCalibration {
    fn request_xtal32m(&self) {
        let xosc = unsafe { &*pac::XOSC::ptr() };
        xosc.ctrl().modify(|_, w| w.enable().enable());
    }

    fn xtal32m_settled(&self) -> bool {
        let xosc = unsafe { &*pac::XOSC::ptr() };
        xosc.status().read().stable().bit_is_set()
    }

    fn switch_to_xtal32m(&self) {
        self.clocks().clk_ref_ctrl().modify(|_, w| w.src().xosc_clksrc());
    }

    fn running_at_xtal32m(&self) -> bool {
        self.clocks().clk_ref_selected().read().bits() == CLK_REF_XOSC_SELECTED
    }

    fn start_rcx_calibration(&self, cycles: u32) {
        let clocks = self.clocks();
        clocks.fc0_ref_khz().write(|w| unsafe { w.fc0_ref_khz().bits(XTAL_FREQ_HZ / 1000) });
        // Test interval is 2^n reference microseconds, n up to 15
        clocks.fc0_interval().write(|w| unsafe { w.fc0_interval().bits(cycles.min(15) as u8) });
        clocks.fc0_src().write(|w| unsafe { w.bits(FC0_SRC_ROSC) });
    }

    fn calibration_done(&self) -> bool {
        self.clocks().fc0_status().read().done().bit_is_set()
    }
}
