use super::{warn_if_diverged, Interrupt, Minimizer, Observer, Outcome, Problem, Termination};
use crate::Error;
use burn::tensor::{backend::Backend, Tensor};

/// Gradient descent with a velocity accumulator.
///
/// Every iteration does `v = gamma * v + step_size * grad(theta)` followed by
/// `theta = theta - v`, with `v` starting at zero. With a `gamma` of 0 this is
/// plain gradient descent. Runs for exactly `iters` iterations unless
/// interrupted, and records the loss that was returned alongside each
/// gradient, ie. the loss before that iteration's update.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct MomentumDescent {
    pub step_size: f64,
    pub gamma: f64,
    pub iters: usize,
}

impl MomentumDescent {
    pub fn new(step_size: f64, gamma: f64, iters: usize) -> Self {
        Self {
            step_size,
            gamma,
            iters,
        }
    }
}

impl<B: Backend, const D: usize> Minimizer<Tensor<B, D>> for MomentumDescent {
    fn minimize(
        &self,
        init: Tensor<B, D>,
        problem: &mut dyn Problem<Tensor<B, D>>,
        observer: &mut dyn Observer<Tensor<B, D>>,
        interrupt: &Interrupt,
    ) -> Result<Outcome<Tensor<B, D>>, Error> {
        let mut theta = init;
        let mut velocity = theta.zeros_like();
        let mut history = Vec::with_capacity(self.iters);
        let mut termination = Termination::Completed;

        observer.init(&theta);

        for i in 0..self.iters {
            if let Some(reason) = interrupt.check() {
                log::info!("stopping after {} iterations: {:?}", i, reason);
                termination = reason;
                break;
            }

            let (gradient, loss) = problem.gradient(&theta)?;

            velocity = velocity
                .mul_scalar(self.gamma)
                .add(gradient.mul_scalar(self.step_size));
            theta = theta.sub(velocity.clone());

            warn_if_diverged(i, loss);
            history.push(loss);
            observer.iteration(i, loss, &theta);
        }

        observer.complete(&theta, &history);

        Ok(Outcome {
            param: theta,
            history,
            termination,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{optimize::CancelToken, optimize::FnProblem, utils::tensor_values};
    use burn::{backend::NdArray, tensor::TensorData};

    type B = NdArray;

    fn identity_gradient() -> impl Problem<Tensor<B, 2>> {
        FnProblem::new(
            |_: &Tensor<B, 2>| Ok(0.0),
            |theta: &Tensor<B, 2>| Ok((theta.clone(), 0.0)),
        )
    }

    #[derive(Default)]
    struct Counts {
        init: usize,
        iterations: Vec<usize>,
        complete: usize,
    }

    impl Observer<Tensor<B, 2>> for Counts {
        fn init(&mut self, _: &Tensor<B, 2>) {
            self.init += 1;
        }

        fn iteration(&mut self, index: usize, _: f64, _: &Tensor<B, 2>) {
            self.iterations.push(index);
        }

        fn complete(&mut self, _: &Tensor<B, 2>, _: &[f64]) {
            self.complete += 1;
        }
    }

    #[test]
    fn single_step_is_exact() {
        let theta = Tensor::<B, 2>::ones([2, 2], &Default::default());
        let sgd = MomentumDescent::new(1.0, 0.9, 1);

        let out = sgd
            .minimize(theta, &mut identity_gradient(), &mut (), &Interrupt::none())
            .unwrap();

        assert_eq!(tensor_values(out.param).unwrap(), vec![0.0; 4]);
        assert_eq!(out.termination, Termination::Completed);
    }

    #[test]
    fn velocity_carries_over() {
        let theta = Tensor::<B, 2>::ones([2, 2], &Default::default());
        let sgd = MomentumDescent::new(1.0, 0.5, 2);

        // v1 = 1, theta1 = 0, v2 = 0.5 * 1 + 0, theta2 = -0.5
        let out = sgd
            .minimize(theta, &mut identity_gradient(), &mut (), &Interrupt::none())
            .unwrap();

        assert_eq!(tensor_values(out.param).unwrap(), vec![-0.5; 4]);
    }

    #[test]
    fn descends_a_quadratic() {
        let device = Default::default();
        let target = Tensor::<B, 2>::from_data(
            TensorData::new(vec![0.3f32, -1.0, 2.0, 0.5], [2, 2]),
            &device,
        );

        let mut problem = FnProblem::new(
            |theta: &Tensor<B, 2>| {
                let d = theta.clone().sub(target.clone());
                Ok(f64::from(d.clone().mul(d).sum().into_scalar()))
            },
            |theta: &Tensor<B, 2>| {
                let d = theta.clone().sub(target.clone());
                let loss = f64::from(d.clone().mul(d.clone()).sum().into_scalar());
                Ok((d.mul_scalar(2.0), loss))
            },
        );

        let sgd = MomentumDescent::new(0.1, 0.0, 50);
        let mut counts = Counts::default();
        let out = sgd
            .minimize(
                Tensor::zeros([2, 2], &device),
                &mut problem,
                &mut counts,
                &Interrupt::none(),
            )
            .unwrap();

        assert_eq!(out.history.len(), 50);
        assert!(out.history[49] < out.history[0]);
        for pair in out.history.windows(2) {
            assert!(pair[1] <= pair[0]);
        }

        assert_eq!(counts.init, 1);
        assert_eq!(counts.iterations, (0..50).collect::<Vec<_>>());
        assert_eq!(counts.complete, 1);

        let got = tensor_values(out.param).unwrap();
        for (g, t) in got.iter().zip([0.3f32, -1.0, 2.0, 0.5].iter()) {
            assert!((g - t).abs() < 1e-3);
        }
    }

    #[test]
    fn cancelled_runs_stop_early() {
        let theta = Tensor::<B, 2>::ones([2, 2], &Default::default());
        let token = CancelToken::new();
        token.cancel();

        let mut counts = Counts::default();
        let out = MomentumDescent::new(1.0, 0.9, 10)
            .minimize(
                theta,
                &mut identity_gradient(),
                &mut counts,
                &Interrupt::none().with_cancel(token),
            )
            .unwrap();

        assert_eq!(out.termination, Termination::Cancelled);
        assert!(out.history.is_empty());
        assert_eq!(tensor_values(out.param).unwrap(), vec![1.0; 4]);
        assert_eq!(counts.init, 1);
        assert!(counts.iterations.is_empty());
        assert_eq!(counts.complete, 1);
    }
}
