//! Mutex shared between the sensor node controller and the main CPU.
//!
//! Two flags, one per side. The controller raises its flag and waits for the main CPU to drop
//! its own; it never backs off, so a uCode always gets through. The main CPU raises its flag,
//! and backs off if the controller's flag is up. Only plain loads and stores are used, which is
//! all the controller's bus supports.
//!
//! Contexts on each side are serialised among themselves by a claim token before touching the
//! flags, so at most one guard exists at a time.

use core::cell::{Cell, UnsafeCell};
use core::hint::spin_loop;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

use critical_section::Mutex;

use crate::error::MonitorError;

/// Wait budget of `lock_host`, in polls.
pub const HOST_LOCK_POLLS: u32 = 1_000_000;

pub struct SncMutex<T> {
    cm33: AtomicBool,
    snc: AtomicBool,
    snc_claim: Mutex<Cell<bool>>,
    host: Mutex<Cell<bool>>,
    value: UnsafeCell<T>,
}

// Access to `value` is serialised by the flag protocol.
unsafe impl<T: Send> Sync for SncMutex<T> {}

impl<T> SncMutex<T> {
    pub const fn new(value: T) -> Self {
        Self {
            cm33: AtomicBool::new(false),
            snc: AtomicBool::new(false),
            snc_claim: Mutex::new(Cell::new(false)),
            host: Mutex::new(Cell::new(false)),
            value: UnsafeCell::new(value),
        }
    }

    /// Controller side. Never fails; waits while another controller-side guard is alive.
    pub fn lock_snc(&self) -> SncGuard<'_, T> {
        loop {
            if let Some(guard) = self.try_lock_snc() {
                return guard;
            }
            spin_loop();
        }
    }

    /// Controller side. `None` if another controller-side guard is alive; otherwise waits for
    /// the main CPU to drop its flag.
    pub fn try_lock_snc(&self) -> Option<SncGuard<'_, T>> {
        let claimed = critical_section::with(|cs| !self.snc_claim.borrow(cs).replace(true));
        if !claimed {
            return None;
        }
        self.snc.store(true, Ordering::SeqCst);
        while self.cm33.load(Ordering::SeqCst) {
            spin_loop();
        }
        Some(SncGuard { mutex: self })
    }

    /// Main-CPU side with the default budget.
    pub fn lock_host(&self) -> Result<HostGuard<'_, T>, MonitorError> {
        self.lock_host_to(HOST_LOCK_POLLS)
    }

    /// Main-CPU side. Gives up with `LockTimeout` after `polls` failed attempts.
    pub fn lock_host_to(&self, polls: u32) -> Result<HostGuard<'_, T>, MonitorError> {
        let mut budget = polls;
        let mut spend = || {
            if budget == 0 {
                return false;
            }
            budget -= 1;
            spin_loop();
            true
        };

        loop {
            let claimed = critical_section::with(|cs| {
                let token = self.host.borrow(cs);
                !token.replace(true)
            });
            if claimed {
                break;
            }
            if !spend() {
                return Err(MonitorError::LockTimeout);
            }
        }

        loop {
            self.cm33.store(true, Ordering::SeqCst);
            if !self.snc.load(Ordering::SeqCst) {
                return Ok(HostGuard { mutex: self });
            }
            self.cm33.store(false, Ordering::SeqCst);
            while self.snc.load(Ordering::SeqCst) {
                if !spend() {
                    self.release_host_token();
                    return Err(MonitorError::LockTimeout);
                }
            }
        }
    }

    fn release_host_token(&self) {
        critical_section::with(|cs| self.host.borrow(cs).set(false));
    }

    /// Exclusive access without locking.
    pub fn get_mut(&mut self) -> &mut T {
        self.value.get_mut()
    }
}

/// Held by the sensor node controller.
pub struct SncGuard<'a, T> {
    mutex: &'a SncMutex<T>,
}

impl<T> Deref for SncGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.mutex.value.get() }
    }
}

impl<T> DerefMut for SncGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.mutex.value.get() }
    }
}

impl<T> Drop for SncGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.snc.store(false, Ordering::SeqCst);
        critical_section::with(|cs| self.mutex.snc_claim.borrow(cs).set(false));
    }
}

/// Held by a main-CPU context.
pub struct HostGuard<'a, T> {
    mutex: &'a SncMutex<T>,
}

impl<T> Deref for HostGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.mutex.value.get() }
    }
}

impl<T> DerefMut for HostGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.mutex.value.get() }
    }
}

impl<T> Drop for HostGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.cm33.store(false, Ordering::SeqCst);
        self.mutex.release_host_token();
    }
}
