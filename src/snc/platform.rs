//! Platform services the uCodes depend on besides the converter.

/// RTC to PDC periodic event that wakes the sensor node controller.
pub trait PeriodicEvent: Sync {
    /// Program the event period. The RTC counts in 10 ms units, so the period is rounded down to
    /// a multiple of 10 ms.
    fn configure(&self, period_ms: u32);
    /// Acknowledge the event so the next period can trigger again.
    fn clear_pending(&self);
}

/// Clock controller, for RCX calibration against the 32 MHz crystal.
pub trait ClockCtrl: Sync {
    /// Set the crystal's PDC entry pending so the crystal gets started.
    fn request_xtal32m(&self);
    fn xtal32m_settled(&self) -> bool;
    fn switch_to_xtal32m(&self);
    fn running_at_xtal32m(&self) -> bool;
    /// Start an RCX calibration over `cycles` reference cycles.
    fn start_rcx_calibration(&self, cycles: u32);
    fn calibration_done(&self) -> bool;
}

/// RTC event period register value for a poll interval, in 10 ms units minus one.
pub const fn rtc_period(poll_interval_ms: u32) -> u32 {
    (poll_interval_ms / 10).saturating_sub(1)
}
