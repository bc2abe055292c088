//! Time slices and preemption
//!
//! Compiled code counts down a tick counter at loop back-edges and call sites. When a slice
//! expires the interrupted location is saved in a continuation resuming at [`TICK_RESUME`] and
//! control passes to [`PREEMPT_DISPATCHER`], which runs at most one signal or timer callback
//! before returning to it.

use std::time::{Duration, Instant};

use crate::boxed::refs::Gc;
use crate::boxed::{DebugInfo, Procedure};
use crate::engine::{signal, Callee, Engine, State, MAX_SIGNAL};
use crate::error::Fatal;
use crate::value::Value;

static DISPATCHER_DEBUG_INFO: DebugInfo = DebugInfo::new("<preempt>");
static TICK_RESUME_DEBUG_INFO: DebugInfo = DebugInfo::new("<resume>");

/// Entry point servicing pending signals and timers
pub static PREEMPT_DISPATCHER: Procedure =
    Procedure::native(dispatch_preemption, &DISPATCHER_DEBUG_INFO, 0);

/// Resume point returning to the location interrupted by a tick
pub static TICK_RESUME: Procedure =
    Procedure::native(resume_after_tick, &TICK_RESUME_DEBUG_INFO, 0);

impl Engine {
    /// Counts down one tick, returning true when the time slice has expired
    pub fn checkpoint(&mut self) -> bool {
        self.ticks_remaining = self.ticks_remaining.saturating_sub(1);
        self.ticks_remaining == 0
    }

    pub(crate) fn reset_slice(&mut self) {
        self.ticks_remaining = self.config.time_slice.max(1);
        self.slice_started = Instant::now();
    }

    /// Records an expired time slice
    pub(crate) fn account_slice(&mut self) {
        self.stats.slices += 1;
        log::trace!(
            "time slice {} expired after {:?}",
            self.stats.slices,
            self.slice_started.elapsed()
        );
    }

    /// Suspends the current location and enters the dispatcher if anything needs servicing
    pub(crate) fn enter_preemption(&mut self) -> Result<(), Fatal> {
        self.set_state(State::Tick);
        self.pending_signals |= signal::take(self.installed_signals);

        if self.pending_signals == 0 && !self.timer_is_due() {
            self.reset_slice();
            self.set_state(State::Running);
            return Ok(());
        }

        self.stats.ticks_serviced += 1;

        let acc = self.regs.acc;
        let pc = self.regs.pc;
        self.regs.stack.push(acc);
        self.regs.stack.push(pc);

        let depth = self.regs.stack.len();
        self.save_continuation(TICK_RESUME.as_value(), depth)?;

        self.regs.pc = PREEMPT_DISPATCHER.as_value();
        self.set_state(State::Running);
        Ok(())
    }

    /// Installs a closure to be called with the signal number when `signo` arrives
    ///
    /// Panics if `signo` is outside `1..=MAX_SIGNAL`.
    pub fn set_signal_handler(&mut self, signo: i32, handler: Value) {
        assert!(
            (1..=MAX_SIGNAL as i32).contains(&signo),
            "invalid signal number {}",
            signo
        );

        self.regs.signal_handlers[signo as usize] = handler;

        let bit = 1 << signo;
        if self.installed_signals & bit == 0 {
            if let Err(err) = signal::install(signo) {
                log::warn!("cannot install handler for signal {}: {}", signo, err);
            }

            self.installed_signals |= bit;
        }
    }

    /// Marks a signal as pending for this engine only
    pub fn deliver_signal(&mut self, signo: i32) {
        assert!(
            (1..=MAX_SIGNAL as i32).contains(&signo),
            "invalid signal number {}",
            signo
        );

        self.pending_signals |= 1 << signo;
    }

    /// Schedules a one shot timer callback
    pub fn set_timer(&mut self, delay: Duration, handler: Value) {
        self.regs.timer_handler = handler;
        self.timer_due = Some(Instant::now() + delay);
    }

    fn timer_is_due(&self) -> bool {
        match self.timer_due {
            Some(due) => Instant::now() >= due,
            None => false,
        }
    }

    fn take_pending_signal(&mut self) -> Option<usize> {
        if self.pending_signals == 0 {
            return None;
        }

        let signo = self.pending_signals.trailing_zeros() as usize;
        self.pending_signals &= !(1 << signo);
        Some(signo)
    }
}

fn dispatch_preemption(engine: &mut Engine, _: Gc<Procedure>) -> Result<bool, Fatal> {
    engine.reset_slice();

    if let Some(signo) = engine.take_pending_signal() {
        let handler = engine.regs.signal_handlers[signo];

        if !handler.is_null() {
            log::debug!("delivering signal {}", signo);
            engine.stats.signals_delivered += 1;

            engine.regs.stack.push(Value::from_int(signo as i64));
            engine.regs.acc = handler;
            // The handler returns through the tick continuation
            engine.call(Callee::Closure, 1, None)?;
            return Ok(false);
        }

        log::debug!("ignoring signal {} without a handler", signo);
    }

    if engine.timer_is_due() {
        let handler = engine.regs.timer_handler;
        engine.regs.timer_handler = Value::NULL;
        engine.timer_due = None;

        if !handler.is_null() {
            log::debug!("running timer callback");
            engine.stats.timer_callbacks += 1;

            engine.regs.acc = handler;
            engine.call(Callee::Closure, 0, None)?;
            return Ok(false);
        }
    }

    engine.return_to_caller();
    Ok(false)
}

fn resume_after_tick(engine: &mut Engine, _: Gc<Procedure>) -> Result<bool, Fatal> {
    let pc = engine.pop();
    let acc = engine.pop();

    engine.regs.pc = pc;
    engine.regs.acc = acc;
    Ok(false)
}
