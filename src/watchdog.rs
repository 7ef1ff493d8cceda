//! This module contains the type definitions necessary to support the
//! monitoring functionality for the analyzer, and the stop strategies that end
//! an exploration early.
//!
//! # Best-Effort Monitoring
//!
//! Note that the monitoring provided by the watchdog is a best-effort approach.
//! The exploration polls it between steps, so a single step (including the
//! solver queries it makes) always runs to completion before a stop takes
//! effect.

use std::{
    collections::BTreeSet,
    fmt::Debug,
    rc::Rc,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use crate::{constant::DEFAULT_WATCHDOG_POLL_LOOP_ITERATIONS, vm::result::TerminalResult};

/// A dynamically dispatched [`Watchdog`] instance.
pub type DynWatchdog = Rc<dyn Watchdog>;

/// The interface to an object that can be polled to see if the analyzer needs
/// to abort processing.
///
/// The interface is simple, but it can encapsulate arbitrary logic as far as
/// the analyzer is concerned, allowing the client to implement complex stop
/// logic.
pub trait Watchdog
where
    Self: Debug,
{
    /// Checks if the analyzer should halt its exploration.
    #[must_use]
    fn should_stop(&self) -> bool;

    /// Gets the number of steps the analyzer should wait before polling the
    /// watchdog.
    #[must_use]
    fn poll_every(&self) -> usize;
}

/// An implementation of the [`Watchdog`] trait that does not place any
/// restrictions on the execution of the analyzer.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct LazyWatchdog;

impl LazyWatchdog {
    /// Wraps `self` into an [`Rc`].
    #[must_use]
    pub fn in_rc(self) -> Rc<dyn Watchdog> {
        Rc::new(self)
    }
}

impl Watchdog for LazyWatchdog {
    fn should_stop(&self) -> bool {
        false
    }

    fn poll_every(&self) -> usize {
        // Something ridiculously huge so it basically never gets checked.
        1_000_000_000_000
    }
}

/// A watchdog that tells the analyzer when to stop based on a flag in the form
/// of an atomic boolean.
///
/// By default, it requests that the analyzer poll for watchdog status every
/// [`DEFAULT_WATCHDOG_POLL_LOOP_ITERATIONS`] steps. This is configurable by
/// calling [`Self::polling_every`].
#[derive(Clone, Debug)]
pub struct FlagWatchdog {
    /// The flag that should be mutated externally to stop the analyzer by this
    /// watchdog.
    flag: Arc<AtomicBool>,

    /// The number of steps the analyzer should wait before polling the
    /// watchdog.
    poll_loop_iterations: usize,
}

impl FlagWatchdog {
    /// Constructs a new `FlagWatchdog` wrapping the provided `flag`.
    #[must_use]
    pub fn new(flag: Arc<AtomicBool>) -> Self {
        let poll_loop_iterations = DEFAULT_WATCHDOG_POLL_LOOP_ITERATIONS;
        Self {
            flag,
            poll_loop_iterations,
        }
    }

    /// Specifies the number of steps that the analyzer should wait before
    /// polling the watchdog for status.
    #[must_use]
    pub fn polling_every(mut self, iterations: usize) -> Self {
        self.poll_loop_iterations = iterations;
        self
    }

    /// Wraps the watchdog into an [`Rc`].
    #[must_use]
    pub fn in_rc(self) -> Rc<dyn Watchdog> {
        Rc::new(self)
    }
}

impl Watchdog for FlagWatchdog {
    fn should_stop(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    fn poll_every(&self) -> usize {
        self.poll_loop_iterations
    }
}

/// A watchdog that stops the analyzer once a wall-clock deadline has passed.
#[derive(Clone, Debug)]
pub struct TimeoutWatchdog {
    deadline:             Instant,
    poll_loop_iterations: usize,
}

impl TimeoutWatchdog {
    /// Constructs a watchdog expiring `timeout` from now.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            deadline:             Instant::now() + timeout,
            poll_loop_iterations: DEFAULT_WATCHDOG_POLL_LOOP_ITERATIONS,
        }
    }

    /// Specifies the number of steps that the analyzer should wait before
    /// polling the watchdog for status.
    #[must_use]
    pub fn polling_every(mut self, iterations: usize) -> Self {
        self.poll_loop_iterations = iterations;
        self
    }

    /// Wraps the watchdog into an [`Rc`].
    #[must_use]
    pub fn in_rc(self) -> Rc<dyn Watchdog> {
        Rc::new(self)
    }
}

impl Watchdog for TimeoutWatchdog {
    fn should_stop(&self) -> bool {
        Instant::now() >= self.deadline
    }

    fn poll_every(&self) -> usize {
        self.poll_loop_iterations
    }
}

/// A policy deciding, after each terminated path, whether the exploration has
/// found what it was looking for.
pub trait StopStrategy
where
    Self: Debug,
{
    /// Observes the `result` of a path that just terminated, returning whether
    /// the exploration should stop.
    fn observe(&mut self, result: &TerminalResult) -> bool;
}

/// A dynamically dispatched [`StopStrategy`] instance.
pub type DynStopStrategy = Box<dyn StopStrategy>;

/// Explores until no paths remain.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Exhaustive;

impl StopStrategy for Exhaustive {
    fn observe(&mut self, _result: &TerminalResult) -> bool {
        false
    }
}

/// Stops at the first path that does not end in success, as when only a
/// counterexample is wanted.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct FirstFailure;

impl StopStrategy for FirstFailure {
    fn observe(&mut self, result: &TerminalResult) -> bool {
        !result.is_success()
    }
}

/// Stops once every exit code of a set has been observed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExitCodesObserved {
    remaining: BTreeSet<i32>,
}

impl ExitCodesObserved {
    #[must_use]
    pub fn new(codes: impl IntoIterator<Item = i32>) -> Self {
        Self {
            remaining: codes.into_iter().collect(),
        }
    }
}

impl StopStrategy for ExitCodesObserved {
    fn observe(&mut self, result: &TerminalResult) -> bool {
        if let Some(code) = result.exit_code() {
            self.remaining.remove(&code);
        }
        self.remaining.is_empty()
    }
}

/// Stops as soon as any of its strategies would.
///
/// Every strategy observes every result, whether or not an earlier one has
/// already asked to stop.
#[derive(Debug, Default)]
pub struct AnyOf {
    strategies: Vec<DynStopStrategy>,
}

impl AnyOf {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, strategy: impl StopStrategy + 'static) -> Self {
        self.strategies.push(Box::new(strategy));
        self
    }
}

impl StopStrategy for AnyOf {
    fn observe(&mut self, result: &TerminalResult) -> bool {
        self.strategies
            .iter_mut()
            .fold(false, |stop, strategy| strategy.observe(result) || stop)
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use crate::{
        vm::result::TerminalResult,
        watchdog::{AnyOf, ExitCodesObserved, FirstFailure, StopStrategy, TimeoutWatchdog, Watchdog},
    };

    #[test]
    fn first_failure_ignores_successes() {
        let mut strategy = FirstFailure;
        assert!(!strategy.observe(&TerminalResult::Success { exit_code: 0 }));
        assert!(strategy.observe(&TerminalResult::Failure { exit_code: 5 }));
    }

    #[test]
    fn waits_for_every_listed_exit_code() {
        let mut strategy = ExitCodesObserved::new([4, 5]);
        assert!(!strategy.observe(&TerminalResult::Failure { exit_code: 4 }));
        assert!(!strategy.observe(&TerminalResult::Success { exit_code: 0 }));
        assert!(strategy.observe(&TerminalResult::ActionFailure { exit_code: 5 }));
    }

    #[test]
    fn combined_strategies_all_observe() {
        let mut strategy = AnyOf::new()
            .with(FirstFailure)
            .with(ExitCodesObserved::new([7]));
        assert!(strategy.observe(&TerminalResult::Failure { exit_code: 7 }));
        assert!(strategy.observe(&TerminalResult::Success { exit_code: 0 }));
    }

    #[test]
    fn expired_timeouts_stop() {
        assert!(TimeoutWatchdog::new(Duration::ZERO).should_stop());
        assert!(!TimeoutWatchdog::new(Duration::from_secs(3600)).should_stop());
    }
}
