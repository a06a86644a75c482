//! Single-source monitor uCode.
//!
//! The state machine only decides; [`GpadcMonitorUcode`] carries out each state's effect on the
//! controller and feeds the outcome back as an event. One invocation goes from `Idle` back to
//! `Idle` in at most six dispatches.

use typed_fsm::{state_machine, Transition};

use super::{MonitorResources, TickGate};
use crate::gpadc::{ControllerConfig, GpadcHw};
use crate::snc::{UcodeBlock, UcodeId, UCODE_TABLE_SIZE};

// FSM Context
pub struct UcodeContext {
    pub gate: TickGate,
    pub gate_open: bool,
    pub sample: u32,
}

// FSM Events
#[derive(Clone, Copy, Debug)]
pub enum UcodeEvent {
    /// Periodic event fired.
    Trigger,
    /// The current state's effect completed.
    Done,
    Sampled(u16),
    /// Bounds read under the mutex, after the sample was stored.
    Bounds { lower: u32, upper: u32 },
}

state_machine! {
    Name: GpadcUcode,
    Context: UcodeContext,
    Event: UcodeEvent,
    States: {
        Idle => {
            entry: |_ctx| {}
            process: |_ctx, evt| {
                match evt {
                    UcodeEvent::Trigger => Transition::To(GpadcUcode::ClearEvent),
                    _ => Transition::None,
                }
            }
        },

        // Acknowledge the periodic event
        ClearEvent => {
            entry: |_ctx| {}
            process: |_ctx, evt| {
                match evt {
                    UcodeEvent::Done => Transition::To(GpadcUcode::Gate),
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
                    UcodeEvent::Done if ctx.gate_open => Transition::To(GpadcUcode::Measure),
                    UcodeEvent::Done => Transition::To(GpadcUcode::Idle),
                    _ => Transition::None,
                }
            }
        },

        Measure => {
            entry: |_ctx| {}
            process: |ctx, evt| {
                match evt {
                    UcodeEvent::Sampled(v) => {
                        ctx.sample = *v as u32;
                        Transition::To(GpadcUcode::BoundsCheck)
                    }
                    _ => Transition::None,
                }
            }
        },

        BoundsCheck => {
            entry: |_ctx| {}
            process: |ctx, evt| {
                match evt {
                    UcodeEvent::Bounds { lower, upper } => {
                        if ctx.sample < *lower || ctx.sample > *upper {
                            Transition::To(GpadcUcode::Notify)
                        } else {
                            Transition::To(GpadcUcode::Idle)
                        }
                    }
                    _ => Transition::None,
                }
            }
        },

        Notify => {
            entry: |_ctx| {}
            process: |_ctx, evt| {
                match evt {
                    UcodeEvent::Done => Transition::To(GpadcUcode::Idle),
                    _ => Transition::None,
                }
            }
        }
    }
}

/// Monitor program as loaded on the sensor node controller.
pub struct GpadcMonitorUcode<H: 'static, const N: usize = UCODE_TABLE_SIZE> {
    fsm: GpadcUcode,
    ctx: UcodeContext,
    id: UcodeId,
    conf: &'static ControllerConfig,
    res: MonitorResources<H, N>,
}

impl<H: GpadcHw + 'static, const N: usize> GpadcMonitorUcode<H, N> {
    pub(crate) fn new(
        id: UcodeId,
        conf: &'static ControllerConfig,
        poll_interval_ticks: u32,
        res: MonitorResources<H, N>,
    ) -> Self {
        let mut ctx = UcodeContext {
            gate: TickGate::new(poll_interval_ticks),
            gate_open: false,
            sample: 0,
        };
        let mut fsm = GpadcUcode::Idle;
        fsm.init(&mut ctx);
        Self { fsm, ctx, id, conf, res }
    }

    /// Registration this program belongs to, for `SncCore::load`.
    pub fn id(&self) -> UcodeId {
        self.id
    }

    pub fn tick_gate(&self) -> TickGate {
        self.ctx.gate
    }
}

impl<H: GpadcHw + 'static, const N: usize> UcodeBlock for GpadcMonitorUcode<H, N> {
    fn run(&mut self) {
        self.fsm.dispatch(&mut self.ctx, &UcodeEvent::Trigger);

        loop {
            let event = match self.fsm {
                GpadcUcode::Idle => break,
                GpadcUcode::ClearEvent => {
                    self.res.periodic.clear_pending();
                    UcodeEvent::Done
                }
                GpadcUcode::Gate => UcodeEvent::Done,
                GpadcUcode::Measure => UcodeEvent::Sampled(self.res.gpadc.snc_measure(self.conf)),
                GpadcUcode::BoundsCheck => {
                    let mut state = self.res.state.lock_snc();
                    state.current_value = self.ctx.sample;
                    UcodeEvent::Bounds { lower: state.lower_bound, upper: state.upper_bound }
                }
                GpadcUcode::Notify => {
                    trace!("monitor: value {} out of bounds", self.ctx.sample);
                    self.res.snc.notify_cm33(self.id);
                    UcodeEvent::Done
                }
            };
            self.fsm.dispatch(&mut self.ctx, &event);
        }
    }
}
