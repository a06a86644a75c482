//! uCode registration, SNC to main-CPU notifications, and the executor that runs uCodes on the
//! sensor node controller.

use core::cell::RefCell;

use critical_section::Mutex;
use heapless::Vec;

use crate::error::SncError;

/// Size of the uCode table.
pub const UCODE_TABLE_SIZE: usize = 16;

/// Called on the main CPU when a uCode raises its notification.
pub type NotifyCallback = fn();

/// Registration handle. Doubles as the bit position in the notification mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct UcodeId(u8);

impl UcodeId {
    pub const fn bit(self) -> u32 {
        1 << self.0
    }

    pub const fn index(self) -> u8 {
        self.0
    }
}

/// Execution priority among uCodes triggered by the same event. `P1` runs first, `P0` means no
/// priority and runs after all others.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UcodePriority {
    P0,
    P1,
    P2,
    P3,
    P4,
    P5,
    P6,
    P7,
    P8,
    P9,
    P10,
    P11,
    P12,
    P13,
    P14,
    P15,
}

impl UcodePriority {
    fn rank(self) -> u8 {
        match self {
            UcodePriority::P0 => 16,
            p => p as u8,
        }
    }
}

/// Priority of the triggering event in the power domain controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PdcEventPriority {
    /// No priority, round robin.
    P0,
    P1,
    P2,
    P3,
}

#[derive(Debug, Clone, Copy)]
pub struct UcodeConfig {
    pub pdc_priority: PdcEventPriority,
    pub ucode_priority: UcodePriority,
    pub callback: Option<NotifyCallback>,
}

/// A uCode program as loaded on the sensor node controller.
pub trait UcodeBlock {
    /// One invocation, triggered by the periodic event. Must return in bounded time.
    fn run(&mut self);
}

#[derive(Debug, Clone, Copy)]
struct Registration {
    id: UcodeId,
    cfg: UcodeConfig,
    enabled: bool,
}

struct Table<const N: usize> {
    entries: Vec<Registration, N>,
    pending: u32,
}

impl<const N: usize> Table<N> {
    fn find(&mut self, id: UcodeId) -> Result<&mut Registration, SncError> {
        self.entries.iter_mut().find(|r| r.id == id).ok_or(SncError::UnknownUcode)
    }
}

/// Control block shared by both cores.
pub struct SncControl<const N: usize = UCODE_TABLE_SIZE> {
    table: Mutex<RefCell<Table<N>>>,
}

impl<const N: usize> SncControl<N> {
    pub const fn new() -> Self {
        assert!(N <= 32);
        Self {
            table: Mutex::new(RefCell::new(Table { entries: Vec::new(), pending: 0 })),
        }
    }

    /// Register a uCode. It starts disabled.
    pub fn register(&self, cfg: UcodeConfig) -> Result<UcodeId, SncError> {
        critical_section::with(|cs| {
            let mut t = self.table.borrow_ref_mut(cs);
            let id = (0..N as u8)
                .map(UcodeId)
                .find(|id| t.entries.iter().all(|r| r.id != *id))
                .ok_or(SncError::NoFreeSlot)?;
            t.entries
                .push(Registration { id, cfg, enabled: false })
                .map_err(|_| SncError::NoFreeSlot)?;
            Ok(id)
        })
    }

    pub fn unregister(&self, id: UcodeId) -> Result<(), SncError> {
        critical_section::with(|cs| {
            let mut t = self.table.borrow_ref_mut(cs);
            let pos = t.entries.iter().position(|r| r.id == id).ok_or(SncError::UnknownUcode)?;
            t.entries.swap_remove(pos);
            t.pending &= !id.bit();
            Ok(())
        })
    }

    pub fn enable(&self, id: UcodeId) -> Result<(), SncError> {
        self.set_enabled(id, true)
    }

    pub fn disable(&self, id: UcodeId) -> Result<(), SncError> {
        self.set_enabled(id, false)
    }

    fn set_enabled(&self, id: UcodeId, enabled: bool) -> Result<(), SncError> {
        critical_section::with(|cs| {
            self.table.borrow_ref_mut(cs).find(id)?.enabled = enabled;
            Ok(())
        })
    }

    pub fn is_enabled(&self, id: UcodeId) -> bool {
        critical_section::with(|cs| {
            self.table.borrow_ref(cs).entries.iter().any(|r| r.id == id && r.enabled)
        })
    }

    /// Raise the notification of `id` towards the main CPU. Called from uCode context.
    pub fn notify_cm33(&self, id: UcodeId) {
        critical_section::with(|cs| self.table.borrow_ref_mut(cs).pending |= id.bit());
    }

    /// Notifications not yet handled.
    pub fn pending(&self) -> u32 {
        critical_section::with(|cs| self.table.borrow_ref(cs).pending)
    }

    /// Main-CPU interrupt handler: clears the pending notifications and runs their callbacks.
    ///
    /// Returns the mask that was handled.
    pub fn handle_interrupt(&self) -> u32 {
        let mut callbacks: Vec<NotifyCallback, N> = Vec::new();
        let mask = critical_section::with(|cs| {
            let mut t = self.table.borrow_ref_mut(cs);
            let mask = core::mem::take(&mut t.pending);
            for r in t.entries.iter().filter(|r| mask & r.id.bit() != 0) {
                if let Some(cb) = r.cfg.callback {
                    // Capacity matches the table
                    let _ = callbacks.push(cb);
                }
            }
            mask
        });

        for cb in callbacks {
            cb();
        }
        mask
    }

    /// Enabled uCodes in execution order.
    fn schedule(&self) -> Vec<UcodeId, N> {
        let mut order: Vec<(u8, UcodeId), N> = critical_section::with(|cs| {
            self.table
                .borrow_ref(cs)
                .entries
                .iter()
                .filter(|r| r.enabled)
                .map(|r| (r.cfg.ucode_priority.rank(), r.id))
                .collect()
        });
        order.sort_unstable();
        order.into_iter().map(|(_, id)| id).collect()
    }
}

impl<const N: usize> Default for SncControl<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Executor running on the sensor node controller. Owns the loaded programs.
pub struct SncCore<'a, const N: usize = UCODE_TABLE_SIZE> {
    control: &'a SncControl<N>,
    programs: Vec<(UcodeId, &'a mut dyn UcodeBlock), N>,
}

impl<'a, const N: usize> SncCore<'a, N> {
    pub fn new(control: &'a SncControl<N>) -> Self {
        Self { control, programs: Vec::new() }
    }

    /// Attach the program registered as `id`.
    pub fn load(&mut self, id: UcodeId, program: &'a mut dyn UcodeBlock) -> Result<(), SncError> {
        if self.programs.iter().any(|(loaded, _)| *loaded == id) {
            return Err(SncError::AlreadyLoaded);
        }
        self.programs.push((id, program)).map_err(|_| SncError::NoFreeSlot)
    }

    pub fn unload(&mut self, id: UcodeId) -> Result<&'a mut dyn UcodeBlock, SncError> {
        let pos = self
            .programs
            .iter()
            .position(|(loaded, _)| *loaded == id)
            .ok_or(SncError::UnknownUcode)?;
        Ok(self.programs.swap_remove(pos).1)
    }

    /// Periodic event handler. Runs every enabled, loaded program once, highest priority first.
    ///
    /// Returns how many programs ran.
    pub fn on_event(&mut self) -> usize {
        let mut ran = 0;
        for id in self.control.schedule() {
            if let Some((_, program)) = self.programs.iter_mut().find(|(loaded, _)| *loaded == id) {
                trace!("snc: running uCode {}", id.index());
                program.run();
                ran += 1;
            }
        }
        ran
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use std::vec::Vec as StdVec;

    fn cfg(ucode_priority: UcodePriority, callback: Option<NotifyCallback>) -> UcodeConfig {
        UcodeConfig { pdc_priority: PdcEventPriority::P0, ucode_priority, callback }
    }

    struct Recorder<'a> {
        tag: u8,
        log: &'a StdMutex<StdVec<u8>>,
    }

    impl UcodeBlock for Recorder<'_> {
        fn run(&mut self) {
            self.log.lock().unwrap().push(self.tag);
        }
    }

    #[test]
    fn table_capacity() {
        let control: SncControl<2> = SncControl::new();
        let a = control.register(cfg(UcodePriority::P1, None)).unwrap();
        control.register(cfg(UcodePriority::P1, None)).unwrap();
        assert_eq!(control.register(cfg(UcodePriority::P1, None)), Err(SncError::NoFreeSlot));
        control.unregister(a).unwrap();
        assert_eq!(control.register(cfg(UcodePriority::P1, None)), Ok(a));
        assert_eq!(control.unregister(UcodeId(1)), Ok(()));
        assert_eq!(control.enable(UcodeId(1)), Err(SncError::UnknownUcode));
    }

    #[test]
    fn runs_enabled_programs_by_priority() {
        let control: SncControl = SncControl::new();
        let log = StdMutex::new(StdVec::new());
        let low = control.register(cfg(UcodePriority::P15, None)).unwrap();
        let none = control.register(cfg(UcodePriority::P0, None)).unwrap();
        let high = control.register(cfg(UcodePriority::P1, None)).unwrap();
        let off = control.register(cfg(UcodePriority::P1, None)).unwrap();

        let mut p_low = Recorder { tag: 15, log: &log };
        let mut p_none = Recorder { tag: 0, log: &log };
        let mut p_high = Recorder { tag: 1, log: &log };
        let mut p_off = Recorder { tag: 99, log: &log };
        let mut p_dup = Recorder { tag: 7, log: &log };

        let mut core = SncCore::new(&control);
        core.load(low, &mut p_low).unwrap();
        core.load(none, &mut p_none).unwrap();
        core.load(high, &mut p_high).unwrap();
        core.load(off, &mut p_off).unwrap();
        assert_eq!(core.load(off, &mut p_dup).err(), Some(SncError::AlreadyLoaded));

        for id in [low, none, high] {
            control.enable(id).unwrap();
        }
        assert!(!control.is_enabled(off));

        assert_eq!(core.on_event(), 3);
        assert_eq!(*log.lock().unwrap(), [1, 15, 0]);

        control.disable(low).unwrap();
        core.unload(high).unwrap();
        log.lock().unwrap().clear();
        assert_eq!(core.on_event(), 1);
        assert_eq!(*log.lock().unwrap(), [0]);
    }

    static HITS: StdMutex<StdVec<&'static str>> = StdMutex::new(StdVec::new());

    fn first() {
        HITS.lock().unwrap().push("first");
    }

    fn second() {
        HITS.lock().unwrap().push("second");
    }

    #[test]
    fn notifications_reach_callbacks_once() {
        let control: SncControl<4> = SncControl::new();
        let a = control.register(cfg(UcodePriority::P1, Some(first))).unwrap();
        let b = control.register(cfg(UcodePriority::P1, Some(second))).unwrap();

        control.notify_cm33(b);
        control.notify_cm33(b);
        assert_eq!(control.pending(), b.bit());
        assert_eq!(control.handle_interrupt(), b.bit());
        assert_eq!(control.handle_interrupt(), 0);
        assert_eq!(*HITS.lock().unwrap(), ["second"]);

        control.notify_cm33(a);
        control.unregister(a).unwrap();
        assert_eq!(control.pending(), 0);
    }
}
