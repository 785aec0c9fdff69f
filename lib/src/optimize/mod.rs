//! Numeric optimizers that minimize an objective given its value and gradient.
//!
//! A `Minimizer` repeatedly asks a `Problem` for the loss and gradient at the
//! current parameter and updates the parameter. It reports to an `Observer`
//! once before the first iteration, after every iteration, and once when done,
//! which is where display and checkpoint side effects live. Observers can't
//! change the trajectory.

mod lbfgs;
mod momentum;

pub use lbfgs::Lbfgs;
pub use momentum::MomentumDescent;

use crate::Error;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

/// An objective to minimize over parameters of type `P`.
///
/// Evaluations only depend on the passed parameter; anything else the
/// objective needs is fixed when the problem is created.
pub trait Problem<P> {
    /// The objective value at `param`
    fn cost(&mut self, param: &P) -> Result<f64, Error>;

    /// The gradient at `param`, which points towards increasing cost, along
    /// with the objective value
    fn gradient(&mut self, param: &P) -> Result<(P, f64), Error>;
}

/// A `Problem` built from a cost closure and a gradient closure
pub struct FnProblem<C, G> {
    cost: C,
    gradient: G,
}

impl<C, G> FnProblem<C, G> {
    pub fn new<P>(cost: C, gradient: G) -> Self
    where
        C: FnMut(&P) -> Result<f64, Error>,
        G: FnMut(&P) -> Result<(P, f64), Error>,
    {
        Self { cost, gradient }
    }
}

impl<P, C, G> Problem<P> for FnProblem<C, G>
where
    C: FnMut(&P) -> Result<f64, Error>,
    G: FnMut(&P) -> Result<(P, f64), Error>,
{
    fn cost(&mut self, param: &P) -> Result<f64, Error> {
        (self.cost)(param)
    }

    fn gradient(&mut self, param: &P) -> Result<(P, f64), Error> {
        (self.gradient)(param)
    }
}

/// Receives the state of a minimization at fixed points.
pub trait Observer<P> {
    /// Called once with the initial parameter, before the first iteration
    fn init(&mut self, _param: &P) {}

    /// Called after every iteration with the updated parameter and the loss
    /// recorded for the iteration
    fn iteration(&mut self, _index: usize, _loss: f64, _param: &P) {}

    /// Called once with the final parameter and the full loss history
    fn complete(&mut self, _param: &P, _history: &[f64]) {}
}

/// An observer that ignores everything
impl<P> Observer<P> for () {}

/// Why a minimization stopped
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Termination {
    /// Every iteration of the budget was run
    Completed,
    /// The algorithm's own stopping rule was met
    Converged,
    /// A `CancelToken` was triggered
    Cancelled,
    /// The deadline passed
    TimedOut,
    /// No step along the search direction lowered the loss
    Stalled,
}

/// The result of a minimization
pub struct Outcome<P> {
    /// The final parameter
    pub param: P,
    /// The loss recorded at every iteration
    pub history: Vec<f64>,
    pub termination: Termination,
}

/// Cooperative cancellation, checked by minimizers between iterations.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// The conditions under which a minimization stops before its budget runs out
#[derive(Clone, Debug, Default)]
pub struct Interrupt {
    cancel: Option<CancelToken>,
    deadline: Option<Instant>,
}

impl Interrupt {
    /// Never interrupts
    pub fn none() -> Self {
        Self::default()
    }

    pub fn new(cancel: Option<CancelToken>, timeout: Option<Duration>) -> Self {
        Self {
            cancel,
            deadline: timeout.map(|t| Instant::now() + t),
        }
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Returns the reason to stop, if there is one
    pub fn check(&self) -> Option<Termination> {
        if self.cancel.as_ref().map_or(false, CancelToken::is_cancelled) {
            return Some(Termination::Cancelled);
        }

        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(Termination::TimedOut),
            _ => None,
        }
    }
}

/// An optimization algorithm over parameters of type `P`
pub trait Minimizer<P> {
    fn minimize(
        &self,
        init: P,
        problem: &mut dyn Problem<P>,
        observer: &mut dyn Observer<P>,
        interrupt: &Interrupt,
    ) -> Result<Outcome<P>, Error>;
}

pub(crate) fn warn_if_diverged(index: usize, loss: f64) {
    if !loss.is_finite() {
        log::warn!("loss became non-finite ({}) on iteration {}", loss, index);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn interrupt_reports_cancel() {
        let token = CancelToken::new();
        let interrupt = Interrupt::none().with_cancel(token.clone());
        assert_eq!(interrupt.check(), None);

        token.cancel();
        assert_eq!(interrupt.check(), Some(Termination::Cancelled));
    }

    #[test]
    fn interrupt_reports_deadline() {
        let interrupt = Interrupt::none().with_deadline(Instant::now());
        assert_eq!(interrupt.check(), Some(Termination::TimedOut));

        let interrupt = Interrupt::new(None, Some(Duration::from_secs(3600)));
        assert_eq!(interrupt.check(), None);
    }
}
