//! Moore-style state machine interpreter
//!
//! Stateful components declare a `Copy` state enum with one designated
//! `undefined()` state and implement [`FsmState`]: an optional `on_entry`
//! side effect plus a `run` step that returns the next state. The
//! interpreter executes exactly one step per component per control phase.
//!
//! Handlers must not block or retry internally; their side effect is the
//! control action itself (channel writes), and retries belong to the
//! protocol bridge. A handler that fails, or an input combination the
//! handler does not cover, degrades to the `undefined()` state instead of
//! halting the cycle: a malfunctioning sensor reads as "we don't know",
//! never as a crash or a stale confident state.

use std::fmt;

use thiserror::Error;
use tracing::warn;

/// Error raised by a state handler
///
/// Never escapes [`StateMachine::step`]; it is converted into a transition
/// to the undefined state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FsmError {
    #[error("State handler failed: {0}")]
    Handler(String),
}

impl FsmError {
    pub fn handler(msg: impl Into<String>) -> Self {
        FsmError::Handler(msg.into())
    }
}

/// A state in a component state machine
///
/// `Context` bundles the read-only channel snapshot plus any parameters
/// computed earlier in the cycle (set-points etc.).
pub trait FsmState: Copy + Eq + fmt::Debug + Send {
    type Context;

    /// The designated safe state for unknown situations
    fn undefined() -> Self;

    /// Side effect executed once when the machine enters this state
    fn on_entry(&self, _ctx: &mut Self::Context) -> Result<(), FsmError> {
        Ok(())
    }

    /// One step: read the context, act, return the next state
    fn run(&self, ctx: &mut Self::Context) -> Result<Self, FsmError>;
}

/// Interpreter holding the current state of one component
#[derive(Debug)]
pub struct StateMachine<S: FsmState> {
    current: S,
    entry_pending: bool,
}

impl<S: FsmState> StateMachine<S> {
    /// Create a machine in `initial`; its `on_entry` fires on the first step
    pub fn new(initial: S) -> Self {
        Self {
            current: initial,
            entry_pending: true,
        }
    }

    /// Current state
    pub fn state(&self) -> S {
        self.current
    }

    /// Force a state, arming its `on_entry` for the next step
    pub fn force(&mut self, state: S) {
        self.current = state;
        self.entry_pending = true;
    }

    /// Execute one cycle step: `on_entry` (once per entry) then `run`
    ///
    /// Any handler error transitions to `S::undefined()`. Returns the state
    /// the machine is in after the step.
    pub fn step(&mut self, ctx: &mut S::Context) -> S {
        if self.entry_pending {
            self.entry_pending = false;
            if let Err(e) = self.current.on_entry(ctx) {
                warn!(state = ?self.current, error = %e, "on_entry failed, degrading to undefined");
                self.transition(S::undefined());
                return self.current;
            }
        }

        match self.current.run(ctx) {
            Ok(next) => self.transition(next),
            Err(e) => {
                warn!(state = ?self.current, error = %e, "state handler failed, degrading to undefined");
                self.transition(S::undefined());
            }
        }
        self.current
    }

    fn transition(&mut self, next: S) {
        if next != self.current {
            self.current = next;
            self.entry_pending = true;
        }
    }
}
