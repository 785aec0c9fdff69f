use super::{warn_if_diverged, Interrupt, Minimizer, Observer, Outcome, Problem, Termination};
use crate::Error;
use argmin::{
    core::{
        observers::{Observe, ObserverMode},
        CostFunction, Error as ArgminError, Executor, Gradient, State, TerminationReason,
        TerminationStatus, KV,
    },
    solver::{linesearch::MoreThuenteLineSearch, quasinewton::LBFGS},
};
use std::{
    cell::RefCell,
    fmt,
    sync::{Arc, Mutex, PoisonError},
};

type Params = Vec<f64>;
type LineSearch = MoreThuenteLineSearch<Params, Params, f64>;
type Solver = LBFGS<LineSearch, Params, Params, f64>;

/// Limited memory BFGS over a flat parameter vector, using argmin's solver
/// with a More-Thuente line search.
///
/// The loss recorded for an iteration is the loss at the accepted point.
/// Interrupts are checked before every evaluation, and an unfinished
/// iteration is discarded.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Lbfgs {
    pub iters: usize,
    pub history_size: usize,
    /// Stops once the gradient norm falls below this
    pub grad_tolerance: f64,
    /// Stops once an iteration changes the loss by less than this
    pub cost_tolerance: f64,
}

impl Lbfgs {
    pub fn new(iters: usize) -> Self {
        Self {
            iters,
            history_size: 7,
            grad_tolerance: 1e-8,
            cost_tolerance: 1e-12,
        }
    }

    pub fn with_history_size(mut self, history_size: usize) -> Self {
        self.history_size = history_size;
        self
    }

    pub fn with_tolerances(mut self, grad_tolerance: f64, cost_tolerance: f64) -> Self {
        self.grad_tolerance = grad_tolerance;
        self.cost_tolerance = cost_tolerance;
        self
    }

    fn solver(&self) -> Result<Solver, Error> {
        LBFGS::new(MoreThuenteLineSearch::new(), self.history_size)
            .with_tolerance_grad(self.grad_tolerance)
            .and_then(|solver| solver.with_tolerance_cost(self.cost_tolerance))
            .map_err(|e| Error::InvalidOption("tolerance".to_owned(), e.to_string()))
    }
}

/// Raised from inside an evaluation to unwind the solver
#[derive(Debug)]
struct Interrupted(Termination);

impl fmt::Display for Interrupted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "minimization interrupted: {:?}", self.0)
    }
}

impl std::error::Error for Interrupted {}

/// Accepted steps, queued by the solver until they are handed to the
/// `Observer`
#[derive(Clone, Default)]
struct Steps(Arc<Mutex<Vec<(f64, Params)>>>);

impl<I> Observe<I> for Steps
where
    I: State<Param = Params, Float = f64>,
{
    fn observe_iter(&mut self, state: &I, _kv: &KV) -> Result<(), ArgminError> {
        if let Some(param) = state.get_param() {
            self.0
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push((state.get_cost(), param.clone()));
        }
        Ok(())
    }
}

struct Tracker<'o> {
    observer: &'o mut dyn Observer<Params>,
    history: Vec<f64>,
    param: Params,
}

impl Tracker<'_> {
    fn deliver(&mut self, steps: &Steps) {
        let pending = std::mem::take(&mut *steps.0.lock().unwrap_or_else(PoisonError::into_inner));

        for (loss, param) in pending {
            let index = self.history.len();
            warn_if_diverged(index, loss);

            self.history.push(loss);
            self.observer.iteration(index, loss, &param);
            self.param = param;
        }
    }
}

/// A `Problem` as seen by argmin. The line search asks for the cost and the
/// gradient of the same point separately, so the last evaluation is cached.
struct Flat<'p, 't, 'o> {
    problem: RefCell<&'p mut dyn Problem<Params>>,
    tracker: &'t RefCell<Tracker<'o>>,
    interrupt: Interrupt,
    steps: Steps,
    last: RefCell<Option<(Params, Params, f64)>>,
}

impl Flat<'_, '_, '_> {
    fn evaluate(&self, param: &Params) -> Result<(Params, f64), ArgminError> {
        self.tracker.borrow_mut().deliver(&self.steps);

        if let Some(reason) = self.interrupt.check() {
            return Err(Interrupted(reason).into());
        }

        if let Some((at, grad, loss)) = &*self.last.borrow() {
            if at == param {
                return Ok((grad.clone(), *loss));
            }
        }

        let (grad, loss) = self.problem.borrow_mut().gradient(param)?;
        *self.last.borrow_mut() = Some((param.clone(), grad.clone(), loss));

        Ok((grad, loss))
    }
}

impl CostFunction for Flat<'_, '_, '_> {
    type Param = Params;
    type Output = f64;

    fn cost(&self, param: &Params) -> Result<f64, ArgminError> {
        self.evaluate(param).map(|(_, loss)| loss)
    }
}

impl Gradient for Flat<'_, '_, '_> {
    type Param = Params;
    type Gradient = Params;

    fn gradient(&self, param: &Params) -> Result<Params, ArgminError> {
        self.evaluate(param).map(|(grad, _)| grad)
    }
}

fn termination(status: &TerminationStatus) -> Termination {
    match status {
        TerminationStatus::Terminated(TerminationReason::MaxItersReached) => Termination::Completed,
        TerminationStatus::Terminated(TerminationReason::SolverConverged)
        | TerminationStatus::Terminated(TerminationReason::TargetCostReached) => {
            Termination::Converged
        }
        _ => Termination::Stalled,
    }
}

impl Minimizer<Params> for Lbfgs {
    fn minimize(
        &self,
        init: Params,
        problem: &mut dyn Problem<Params>,
        observer: &mut dyn Observer<Params>,
        interrupt: &Interrupt,
    ) -> Result<Outcome<Params>, Error> {
        let solver = self.solver()?;

        observer.init(&init);

        let steps = Steps::default();
        let tracker = RefCell::new(Tracker {
            observer,
            history: Vec::with_capacity(self.iters),
            param: init.clone(),
        });

        let flat = Flat {
            problem: RefCell::new(problem),
            tracker: &tracker,
            interrupt: interrupt.clone(),
            steps: steps.clone(),
            last: RefCell::new(None),
        };

        let iters = self.iters as u64;
        let run = Executor::new(flat, solver)
            .configure(|state| state.param(init).max_iters(iters))
            .add_observer(steps.clone(), ObserverMode::Always)
            .run();

        let termination = match run {
            Ok(result) => termination(result.state().get_termination_status()),
            Err(err) => match err.downcast::<Interrupted>() {
                Ok(Interrupted(reason)) => reason,
                Err(err) => match err.downcast::<Error>() {
                    Ok(err) => return Err(err),
                    Err(err) => {
                        log::warn!("L-BFGS stopped early: {}", err);
                        Termination::Stalled
                    }
                },
            },
        };

        let mut tracker = tracker.into_inner();
        tracker.deliver(&steps);
        tracker.observer.complete(&tracker.param, &tracker.history);

        Ok(Outcome {
            param: tracker.param,
            history: tracker.history,
            termination,
        })
    }
}
