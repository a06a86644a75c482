//! USB Module
//!
//! Output-only CDC serial console. Core 0 sends one text line per monitor report; the
//! `USBCTRL_IRQ` handler services the device so it stays enumerated while both cores are busy.

use core::cell::RefCell;
use core::fmt::Write as _;
use critical_section::Mutex;
use heapless::String;
use usb_device::bus::UsbBusAllocator;
use usb_device::prelude::*;
use usbd_serial::SerialPort;

use rp235x_hal as hal;
use hal::pac;
use hal::usb::UsbBus;

use rp235x_hal::pac::interrupt;

/// Longest report line, terminator included.
const LINE_LEN: usize = 96;

struct Console {
    device: UsbDevice<'static, UsbBus>,
    serial: SerialPort<'static, UsbBus>,
}

impl Console {
    fn service(&mut self) {
        if self.device.poll(&mut [&mut self.serial]) {
            // Host input is discarded
            let mut sink = [0u8; 64];
            let _ = self.serial.read(&mut sink);
        }
    }
}

static CONSOLE: Mutex<RefCell<Option<Console>>> = Mutex::new(RefCell::new(None));

/// Bring up the console and unmask its interrupt. Called once, from `hardware::init`.
pub fn init(
    usb: pac::USB,
    dpram: pac::USB_DPRAM,
    clock: hal::clocks::UsbClock,
    resets: &mut pac::RESETS,
) {
    static mut BUS: Option<UsbBusAllocator<UsbBus>> = None;

    // Safety: single call before USBCTRL_IRQ is unmasked, nothing else touches BUS.
    let bus: &'static UsbBusAllocator<UsbBus> = unsafe {
        let slot = &mut *core::ptr::addr_of_mut!(BUS);
        slot.insert(UsbBusAllocator::new(UsbBus::new(usb, dpram, clock, true, resets)))
    };

    let serial = SerialPort::new(bus);
    let strings = StringDescriptors::default()
        .manufacturer("Raspberry Pi")
        .product("Pico 2 W SNC Monitor")
        .serial_number("SNC001");
    let device = match UsbDeviceBuilder::new(bus, UsbVidPid(0x16c0, 0x27dd)).strings(&[strings]) {
        Ok(builder) => builder.device_class(usbd_serial::USB_CLASS_CDC).build(),
        Err(_) => {
            defmt::warn!("usb: descriptor setup failed, console disabled");
            return;
        }
    };

    critical_section::with(|cs| CONSOLE.borrow_ref_mut(cs).replace(Console { device, serial }));
    unsafe {
        cortex_m::peripheral::NVIC::unmask(pac::Interrupt::USBCTRL_IRQ);
    }
}

/// Send one formatted line. Dropped when it does not fit or no host is attached.
pub fn report(args: core::fmt::Arguments) {
    let mut line: String<LINE_LEN> = String::new();
    if line.write_fmt(args).is_err() || line.push_str("\r\n").is_err() {
        defmt::warn!("usb: report line too long");
        return;
    }
    critical_section::with(|cs| {
        if let Some(console) = CONSOLE.borrow_ref_mut(cs).as_mut() {
            let _ = console.serial.write(line.as_bytes());
        }
    });
}

#[allow(non_snake_case)]
#[interrupt]
fn USBCTRL_IRQ() {
    critical_section::with(|cs| {
        if let Some(console) = CONSOLE.borrow_ref_mut(cs).as_mut() {
            console.service();
        }
    });
}
