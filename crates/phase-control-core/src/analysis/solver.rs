//! Levenberg-Marquardt least-squares solver
//!
//! Minimizes the sum of squared residuals of a vector function using a
//! forward-difference Jacobian and diagonal (Marquardt) damping. Identical
//! inputs always yield identical outputs.

use nalgebra::{DMatrix, DVector};
use thiserror::Error;

/// Errors that can occur while fitting
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FitError {
    #[error("Not enough samples to fit: {samples} samples for {parameters} free parameters")]
    Degenerate { samples: usize, parameters: usize },

    #[error("Model produced non-finite values")]
    NonFinite,

    #[error("Fit did not converge after {iterations} iterations (cost {cost:.3e})")]
    NotConverged { iterations: usize, cost: f64 },
}

/// Converged least-squares solution
#[derive(Debug, Clone)]
pub struct Solution {
    /// Best parameter vector
    pub params: Vec<f64>,
    /// Sum of squared residuals at `params`
    pub cost: f64,
    /// Iterations used
    pub iterations: usize,
}

/// Levenberg-Marquardt settings
#[derive(Debug, Clone, Copy)]
pub struct LevenbergMarquardt {
    /// Iteration cap
    pub max_iterations: usize,
    /// Relative cost reduction below which the fit is considered converged
    pub cost_tolerance: f64,
    /// Relative step size below which the fit is considered converged
    pub step_tolerance: f64,
    /// Initial damping factor
    pub initial_lambda: f64,
}

impl Default for LevenbergMarquardt {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            cost_tolerance: 1e-10,
            step_tolerance: 1e-10,
            initial_lambda: 1e-3,
        }
    }
}

/// Damping above this means no descent direction is left
const LAMBDA_CEILING: f64 = 1e12;

impl LevenbergMarquardt {
    /// Minimize `sum(r_i(x)^2)` starting from `x0`
    ///
    /// # Arguments
    /// * `x0` - Initial parameter vector
    /// * `residual_count` - Number of residuals the function writes
    /// * `residuals` - Writes `r(x)` into the output slice
    pub fn minimize<F>(&self, x0: &[f64], residual_count: usize, residuals: F) -> Result<Solution, FitError>
    where
        F: Fn(&[f64], &mut [f64]),
    {
        let n = x0.len();
        if residual_count < n || n == 0 {
            return Err(FitError::Degenerate {
                samples: residual_count,
                parameters: n,
            });
        }

        let mut x = DVector::from_column_slice(x0);
        let mut r = DVector::<f64>::zeros(residual_count);
        residuals(x.as_slice(), r.as_mut_slice());
        let mut cost = r.norm_squared();
        if !cost.is_finite() {
            return Err(FitError::NonFinite);
        }

        let mut lambda = self.initial_lambda;
        let mut jacobian = DMatrix::<f64>::zeros(residual_count, n);
        let mut trial_r = DVector::<f64>::zeros(residual_count);

        for iteration in 1..=self.max_iterations {
            self.jacobian(&x, &r, &residuals, &mut jacobian)?;

            let jt = jacobian.transpose();
            let jtj = &jt * &jacobian;
            let gradient = &jt * &r;

            // Inner loop: raise damping until a step lowers the cost
            loop {
                let mut damped = jtj.clone();
                for i in 0..n {
                    damped[(i, i)] += lambda * jtj[(i, i)].max(1e-12);
                }

                let step = match damped.cholesky() {
                    Some(chol) => chol.solve(&(-&gradient)),
                    None => {
                        lambda *= 10.0;
                        if lambda > LAMBDA_CEILING {
                            return Ok(self.finish(x, cost, iteration));
                        }
                        continue;
                    }
                };

                let trial = &x + &step;
                residuals(trial.as_slice(), trial_r.as_mut_slice());
                let trial_cost = trial_r.norm_squared();

                if trial_cost.is_finite() && trial_cost <= cost {
                    let reduction = (cost - trial_cost) / cost.max(f64::MIN_POSITIVE);
                    let step_size = step.norm() / (x.norm() + self.step_tolerance);

                    x = trial;
                    std::mem::swap(&mut r, &mut trial_r);
                    cost = trial_cost;
                    lambda = (lambda / 10.0).max(1e-15);

                    if reduction < self.cost_tolerance || step_size < self.step_tolerance {
                        return Ok(self.finish(x, cost, iteration));
                    }
                    break;
                }

                lambda *= 10.0;
                if lambda > LAMBDA_CEILING {
                    // no improving step exists: we are at a minimum
                    return Ok(self.finish(x, cost, iteration));
                }
            }
        }

        Err(FitError::NotConverged {
            iterations: self.max_iterations,
            cost,
        })
    }

    fn finish(&self, x: DVector<f64>, cost: f64, iterations: usize) -> Solution {
        tracing::trace!("Converged after {} iterations, cost {:.3e}", iterations, cost);
        Solution {
            params: x.as_slice().to_vec(),
            cost,
            iterations,
        }
    }

    /// Forward-difference Jacobian of the residual vector
    fn jacobian<F>(
        &self,
        x: &DVector<f64>,
        r: &DVector<f64>,
        residuals: &F,
        out: &mut DMatrix<f64>,
    ) -> Result<(), FitError>
    where
        F: Fn(&[f64], &mut [f64]),
    {
        let mut shifted = x.clone();
        let mut r_shifted = DVector::<f64>::zeros(r.len());

        for j in 0..x.len() {
            let h = f64::EPSILON.sqrt() * x[j].abs().max(1.0);
            shifted[j] = x[j] + h;
            residuals(shifted.as_slice(), r_shifted.as_mut_slice());
            shifted[j] = x[j];

            for i in 0..r.len() {
                let d = (r_shifted[i] - r[i]) / h;
                if !d.is_finite() {
                    return Err(FitError::NonFinite);
                }
                out[(i, j)] = d;
            }
        }
        Ok(())
    }
}
