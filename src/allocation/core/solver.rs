use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use super::constraints::{
    ConstraintSet, build_constraints, project_onto_budget_set, restore_budget_equality,
};
use super::error::AllocationError;
use super::objective::{AllocationObjective, NormalizationBasis, WeightedObjective, dot};
use super::types::{Channel, OptimizationRequest, OptimizationResult, SolveStatus, SolverMethod};

const DOMAIN_EPS: f64 = 1e-12;
const BOUND_CHECK_TOL: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AllocationSolveConfig {
    pub primary_max_iters: usize,
    pub fallback_max_iters: usize,
    /// Stationarity tolerance on `|P(y - g) - y|_inf`, in budget shares.
    pub pg_tol: f64,
    /// Relative tolerance on `sum(x) = total_budget`.
    pub equality_tol: f64,
    pub armijo_c1: f64,
    pub backtrack_beta: f64,
    pub max_line_search_trials: usize,
    pub initial_step: f64,
    pub min_step: f64,
    pub max_step: f64,
    pub curvature_eps: f64,
    pub hess_floor: f64,
    pub hess_ceiling: f64,
    /// Diagonal model shrink factor when a step shows no curvature.
    pub hess_shrink: f64,
    /// L2 pull toward the initial guess, in budget-share units. Zero disables it.
    pub l2_reg: f64,
    pub enable_fallback: bool,
    pub time_limit: Option<Duration>,
}

impl Default for AllocationSolveConfig {
    fn default() -> Self {
        Self {
            primary_max_iters: 10_000,
            fallback_max_iters: 10_000,
            pg_tol: 1e-10,
            equality_tol: 1e-9,
            armijo_c1: 1e-4,
            backtrack_beta: 0.5,
            max_line_search_trials: 60,
            initial_step: 1.0,
            min_step: 1e-10,
            max_step: 1e6,
            curvature_eps: 1e-12,
            hess_floor: 1e-8,
            hess_ceiling: 1e8,
            hess_shrink: 0.1,
            l2_reg: 0.0,
            enable_fallback: true,
            time_limit: None,
        }
    }
}

/// Shared flag checked between solver iterations.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy)]
struct SolveControl<'a> {
    deadline: Option<Instant>,
    cancel: Option<&'a CancelToken>,
}

impl SolveControl<'_> {
    fn interrupted(&self) -> Option<SolveStatus> {
        if self.cancel.is_some_and(CancelToken::is_cancelled) {
            return Some(SolveStatus::Cancelled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Some(SolveStatus::TimedOut);
        }
        None
    }
}

/// The problem in budget shares `y = x / scale`, so step sizes and tolerances
/// do not depend on the currency magnitude.
struct ShareProblem<'a, O: AllocationObjective + ?Sized> {
    objective: &'a O,
    scale: f64,
    lower: Vec<f64>,
    upper: Vec<f64>,
    target: f64,
}

impl<'a, O: AllocationObjective + ?Sized> ShareProblem<'a, O> {
    fn new(objective: &'a O, constraints: &ConstraintSet) -> Self {
        let scale = if constraints.total_budget.abs() > DOMAIN_EPS {
            constraints.total_budget.abs()
        } else {
            1.0
        };
        Self {
            objective,
            scale,
            lower: constraints.bounds.lower.iter().map(|v| v / scale).collect(),
            upper: constraints.bounds.upper.iter().map(|v| v / scale).collect(),
            target: constraints.total_budget / scale,
        }
    }

    fn to_currency(&self, y: &[f64]) -> Vec<f64> {
        y.iter().map(|v| v * self.scale).collect()
    }

    fn to_shares(&self, x: &[f64]) -> Vec<f64> {
        x.iter().map(|v| v / self.scale).collect()
    }

    fn value(&self, y: &[f64]) -> f64 {
        self.objective.value(&self.to_currency(y))
    }

    fn gradient(&self, y: &[f64], grad: &mut [f64]) {
        self.objective.gradient(&self.to_currency(y), grad);
        for g in grad.iter_mut() {
            *g *= self.scale;
        }
    }

    fn project(&self, center: &[f64], weights: Option<&[f64]>, out: &mut [f64]) -> Option<f64> {
        project_onto_budget_set(center, weights, &self.lower, &self.upper, self.target, out)
    }

    fn equality_residual(&self, y: &[f64]) -> f64 {
        y.iter().sum::<f64>() - self.target
    }
}

#[derive(Debug, Clone)]
struct SolveTrace {
    method: SolverMethod,
    y: Vec<f64>,
    f: f64,
    projected_grad_norm: f64,
    status: SolveStatus,
    objective_trace: Vec<f64>,
    iterations: usize,
    objective_evals: usize,
    gradient_evals: usize,
    line_search_trials: usize,
}

impl SolveTrace {
    fn start(method: SolverMethod, y: Vec<f64>) -> Self {
        Self {
            method,
            y,
            f: f64::NAN,
            projected_grad_norm: f64::INFINITY,
            status: SolveStatus::IterationLimit,
            objective_trace: Vec::new(),
            iterations: 0,
            objective_evals: 0,
            gradient_evals: 0,
            line_search_trials: 0,
        }
    }

    fn converged(&self) -> bool {
        self.status == SolveStatus::Converged
    }
}

/// `|P(y - g) - y|_inf`: zero exactly at KKT points of the budget problem.
fn stationarity_residual<O: AllocationObjective + ?Sized>(
    problem: &ShareProblem<'_, O>,
    y: &[f64],
    g: &[f64],
    scratch: &mut [f64],
) -> f64 {
    let center: Vec<f64> = y.iter().zip(g.iter()).map(|(yi, gi)| yi - gi).collect();
    if problem.project(&center, None, scratch).is_none() {
        return f64::INFINITY;
    }
    scratch
        .iter()
        .zip(y.iter())
        .map(|(p, yi)| (p - yi).abs())
        .fold(0.0, f64::max)
}

fn accepts_near_stationary(status: SolveStatus) -> bool {
    matches!(
        status,
        SolveStatus::IterationLimit | SolveStatus::LineSearchStalled
    )
}

fn all_finite(values: &[f64]) -> bool {
    values.iter().all(|v| v.is_finite())
}

/// Spectral projected gradient: project a Barzilai-Borwein step onto the budget
/// polytope, then backtrack along the feasible segment with an Armijo test.
fn run_projected_gradient<O: AllocationObjective + ?Sized>(
    problem: &ShareProblem<'_, O>,
    y0: &[f64],
    cfg: AllocationSolveConfig,
    control: SolveControl<'_>,
) -> SolveTrace {
    let n = y0.len();
    let mut trace = SolveTrace::start(SolverMethod::ProjectedGradient, y0.to_vec());
    let mut y = vec![0.0_f64; n];
    if problem.project(y0, None, &mut y).is_none() {
        trace.status = SolveStatus::ProjectionFailed;
        return trace;
    }

    let mut f = problem.value(&y);
    let mut g = vec![0.0_f64; n];
    problem.gradient(&y, &mut g);
    trace.objective_evals += 1;
    trace.gradient_evals += 1;
    if !f.is_finite() || !all_finite(&g) {
        trace.y = y;
        trace.status = SolveStatus::NonFiniteEvaluation;
        return trace;
    }
    trace.objective_trace.push(f);

    let mut step = cfg.initial_step;
    let mut scratch = vec![0.0_f64; n];
    let mut trial = vec![0.0_f64; n];
    let mut dir = vec![0.0_f64; n];
    let mut g_trial = vec![0.0_f64; n];
    let mut status = SolveStatus::IterationLimit;

    for _ in 0..cfg.primary_max_iters {
        if let Some(interrupt) = control.interrupted() {
            status = interrupt;
            break;
        }
        let pg = stationarity_residual(problem, &y, &g, &mut scratch);
        trace.projected_grad_norm = pg;
        if pg <= cfg.pg_tol {
            status = SolveStatus::Converged;
            break;
        }
        trace.iterations += 1;

        let center: Vec<f64> = y.iter().zip(g.iter()).map(|(yi, gi)| yi - step * gi).collect();
        if problem.project(&center, None, &mut trial).is_none() {
            status = SolveStatus::ProjectionFailed;
            break;
        }
        for i in 0..n {
            dir[i] = trial[i] - y[i];
        }
        let slope = dot(&g, &dir);
        if !slope.is_finite() || slope >= 0.0 {
            status = SolveStatus::LineSearchStalled;
            break;
        }

        let mut t = 1.0_f64;
        let mut accepted = None;
        for _ in 0..cfg.max_line_search_trials {
            trace.line_search_trials += 1;
            for i in 0..n {
                trial[i] = y[i] + t * dir[i];
            }
            let f_trial = problem.value(&trial);
            trace.objective_evals += 1;
            if f_trial.is_finite() && f_trial <= f + cfg.armijo_c1 * t * slope {
                accepted = Some(f_trial);
                break;
            }
            t *= cfg.backtrack_beta;
        }
        let Some(f_trial) = accepted else {
            status = SolveStatus::LineSearchStalled;
            break;
        };

        problem.gradient(&trial, &mut g_trial);
        trace.gradient_evals += 1;
        if !all_finite(&g_trial) {
            status = SolveStatus::NonFiniteEvaluation;
            break;
        }

        let mut ss = 0.0_f64;
        let mut sy = 0.0_f64;
        for i in 0..n {
            let s = trial[i] - y[i];
            ss += s * s;
            sy += s * (g_trial[i] - g[i]);
        }
        step = if sy > cfg.curvature_eps * ss {
            (ss / sy).clamp(cfg.min_step, cfg.max_step)
        } else {
            cfg.max_step
        };

        y.copy_from_slice(&trial);
        g.copy_from_slice(&g_trial);
        f = f_trial;
        trace.objective_trace.push(f);
    }

    // A stalled search at a numerically stationary point still counts.
    let pg = stationarity_residual(problem, &y, &g, &mut scratch);
    if accepts_near_stationary(status) && pg <= cfg.pg_tol * 10.0 {
        status = SolveStatus::Converged;
    }
    trace.projected_grad_norm = pg;
    trace.y = y;
    trace.f = f;
    trace.status = status;
    trace
}

/// Sequential quadratic programming on `f` with a diagonal quasi-Newton model
/// `H`. Each subproblem linearizes `sum(y) - target` (gradient: all ones), so the
/// start only has to satisfy the box; the merit is `f + rho * |sum(y) - target|`.
fn run_sequential_quadratic<O: AllocationObjective + ?Sized>(
    problem: &ShareProblem<'_, O>,
    y0: &[f64],
    cfg: AllocationSolveConfig,
    control: SolveControl<'_>,
) -> SolveTrace {
    let n = y0.len();
    let mut trace = SolveTrace::start(SolverMethod::SequentialQuadratic, y0.to_vec());
    let mut y: Vec<f64> = y0
        .iter()
        .zip(problem.lower.iter().zip(problem.upper.iter()))
        .map(|(&v, (&lo, &hi))| v.max(lo).min(hi))
        .collect();

    let mut f = problem.value(&y);
    let mut g = vec![0.0_f64; n];
    problem.gradient(&y, &mut g);
    trace.objective_evals += 1;
    trace.gradient_evals += 1;
    if !f.is_finite() || !all_finite(&g) {
        trace.y = y;
        trace.status = SolveStatus::NonFiniteEvaluation;
        return trace;
    }
    trace.objective_trace.push(f);

    let eq_tol = cfg.equality_tol * (1.0 + problem.target.abs());
    let mut hdiag = vec![1.0_f64; n];
    let mut penalty = 0.0_f64;
    let mut scratch = vec![0.0_f64; n];
    let mut qp = vec![0.0_f64; n];
    let mut trial = vec![0.0_f64; n];
    let mut g_trial = vec![0.0_f64; n];
    let mut status = SolveStatus::IterationLimit;

    for _ in 0..cfg.fallback_max_iters {
        if let Some(interrupt) = control.interrupted() {
            status = interrupt;
            break;
        }
        let residual = problem.equality_residual(&y);
        let pg = stationarity_residual(problem, &y, &g, &mut scratch);
        trace.projected_grad_norm = pg;
        if pg <= cfg.pg_tol && residual.abs() <= eq_tol {
            status = SolveStatus::Converged;
            break;
        }
        trace.iterations += 1;

        // min g.d + 1/2 d'Hd  s.t.  sum(y + d) = target, lower <= y + d <= upper
        let center: Vec<f64> = (0..n).map(|i| y[i] - g[i] / hdiag[i]).collect();
        let Some(multiplier) = problem.project(&center, Some(&hdiag), &mut qp) else {
            status = SolveStatus::ProjectionFailed;
            break;
        };
        penalty = penalty.max(2.0 * multiplier.abs() + DOMAIN_EPS);

        let dir: Vec<f64> = qp.iter().zip(y.iter()).map(|(z, yi)| z - yi).collect();
        let merit = f + penalty * residual.abs();
        let merit_slope = dot(&g, &dir) - penalty * residual.abs();
        if !merit_slope.is_finite() || merit_slope >= 0.0 {
            status = SolveStatus::LineSearchStalled;
            break;
        }

        let mut t = 1.0_f64;
        let mut accepted = None;
        for _ in 0..cfg.max_line_search_trials {
            trace.line_search_trials += 1;
            for i in 0..n {
                trial[i] = y[i] + t * dir[i];
            }
            let f_trial = problem.value(&trial);
            trace.objective_evals += 1;
            let merit_trial = f_trial + penalty * problem.equality_residual(&trial).abs();
            if merit_trial.is_finite() && merit_trial <= merit + cfg.armijo_c1 * t * merit_slope {
                accepted = Some(f_trial);
                break;
            }
            t *= cfg.backtrack_beta;
        }
        let Some(f_trial) = accepted else {
            status = SolveStatus::LineSearchStalled;
            break;
        };

        problem.gradient(&trial, &mut g_trial);
        trace.gradient_evals += 1;
        if !all_finite(&g_trial) {
            status = SolveStatus::NonFiniteEvaluation;
            break;
        }

        for i in 0..n {
            let s = trial[i] - y[i];
            let yk = g_trial[i] - g[i];
            if s.abs() <= DOMAIN_EPS {
                continue;
            }
            let curvature = yk / s;
            hdiag[i] = if curvature.is_finite() && curvature > cfg.curvature_eps {
                curvature.clamp(cfg.hess_floor, cfg.hess_ceiling)
            } else {
                (hdiag[i] * cfg.hess_shrink).max(cfg.hess_floor)
            };
        }

        y.copy_from_slice(&trial);
        g.copy_from_slice(&g_trial);
        f = f_trial;
        trace.objective_trace.push(f);
    }

    let pg = stationarity_residual(problem, &y, &g, &mut scratch);
    if accepts_near_stationary(status)
        && pg <= cfg.pg_tol * 10.0
        && problem.equality_residual(&y).abs() <= eq_tol
    {
        status = SolveStatus::Converged;
    }
    trace.projected_grad_norm = pg;
    trace.y = y;
    trace.f = f;
    trace.status = status;
    trace
}

fn finish_result<O: AllocationObjective + ?Sized>(
    problem: &ShareProblem<'_, O>,
    constraints: &ConstraintSet,
    trace: &SolveTrace,
    primary: Option<&SolveTrace>,
    cfg: AllocationSolveConfig,
) -> OptimizationResult {
    let mut allocation = problem.to_currency(&trace.y);
    restore_budget_equality(
        &mut allocation,
        &constraints.bounds.lower,
        &constraints.bounds.upper,
        constraints.total_budget,
    );
    let total = constraints.total_budget;
    let equality_residual =
        (allocation.iter().sum::<f64>() - total).abs() / total.abs().max(1.0);

    let mut status = trace.status;
    if status == SolveStatus::Converged
        && (equality_residual > cfg.equality_tol
            || !constraints.bounds.contains(&allocation, BOUND_CHECK_TOL))
    {
        status = SolveStatus::EqualityViolation;
    }
    let success = status == SolveStatus::Converged;

    let objective_value = if trace.f.is_finite() {
        problem.objective.value(&allocation)
    } else {
        trace.f
    };

    let message = match primary {
        None => format!(
            "{}: {} after {} iterations (projected gradient {:.3e})",
            trace.method, status, trace.iterations, trace.projected_grad_norm
        ),
        Some(p) => format!(
            "{}: {}; {}: {} after {} iterations (projected gradient {:.3e})",
            p.method,
            p.status,
            trace.method,
            status,
            trace.iterations,
            trace.projected_grad_norm
        ),
    };

    let (extra_iters, extra_evals, extra_grads, extra_trials) = primary.map_or((0, 0, 0, 0), |p| {
        (
            p.iterations,
            p.objective_evals,
            p.gradient_evals,
            p.line_search_trials,
        )
    });

    OptimizationResult {
        success,
        allocation,
        status,
        message,
        method: trace.method,
        primary_status: primary.map(|p| p.status),
        iterations: trace.iterations + extra_iters,
        objective_evaluations: trace.objective_evals + extra_evals,
        gradient_evaluations: trace.gradient_evals + extra_grads,
        line_search_trials: trace.line_search_trials + extra_trials,
        objective_value,
        projected_grad_norm: trace.projected_grad_norm,
        equality_residual,
        warnings: Vec::new(),
    }
}

/// Runs the primary method, then the fallback once if the primary did not
/// converge. Never fails: a double failure comes back with `success = false`.
pub fn solve_allocation<O: AllocationObjective + ?Sized>(
    objective: &O,
    constraints: &ConstraintSet,
    cfg: AllocationSolveConfig,
    cancel: Option<&CancelToken>,
) -> OptimizationResult {
    let control = SolveControl {
        deadline: cfg.time_limit.map(|limit| Instant::now() + limit),
        cancel,
    };
    let problem = ShareProblem::new(objective, constraints);
    let y0 = problem.to_shares(&constraints.initial_guess);

    let primary = run_projected_gradient(&problem, &y0, cfg, control);
    if primary.converged() || primary.status.is_interrupt() || !cfg.enable_fallback {
        return finish_result(&problem, constraints, &primary, None, cfg);
    }

    tracing::warn!(
        primary_status = %primary.status,
        iterations = primary.iterations,
        projected_grad_norm = primary.projected_grad_norm,
        "primary solver did not converge; retrying with sequential quadratic fallback"
    );
    let fallback = run_sequential_quadratic(&problem, &y0, cfg, control);
    let result = finish_result(&problem, constraints, &fallback, Some(&primary), cfg);
    if !result.success {
        tracing::warn!(
            fallback_status = %result.status,
            iterations = result.iterations,
            "fallback solver did not converge"
        );
    }
    result
}

/// One solve on pre-built constraints and a fixed normalization basis, so a
/// frontier sweep can re-use both across weights.
pub(super) fn solve_with_basis(
    channels: &[Channel],
    carbon_weight: f64,
    constraints: &ConstraintSet,
    basis: NormalizationBasis,
    cfg: AllocationSolveConfig,
    cancel: Option<&CancelToken>,
) -> OptimizationResult {
    let objective = WeightedObjective::new(channels, basis, carbon_weight)
        .with_regularization(cfg.l2_reg, &constraints.initial_guess);
    let mut result = solve_allocation(&objective, constraints, cfg, cancel);
    result.warnings = basis.warnings();
    tracing::debug!(
        carbon_weight,
        success = result.success,
        method = %result.method,
        iterations = result.iterations,
        objective = result.objective_value,
        "allocation solve finished"
    );
    result
}

pub fn optimize(
    request: &OptimizationRequest,
    cfg: AllocationSolveConfig,
) -> Result<OptimizationResult, AllocationError> {
    optimize_with_cancel(request, cfg, None)
}

pub fn optimize_with_cancel(
    request: &OptimizationRequest,
    cfg: AllocationSolveConfig,
    cancel: Option<&CancelToken>,
) -> Result<OptimizationResult, AllocationError> {
    let constraints = build_constraints(request)?;
    let basis = NormalizationBasis::from_channels(&request.channels);
    for warning in basis.warnings() {
        tracing::warn!(%warning, "degenerate coefficients");
    }
    let result = solve_with_basis(
        &request.channels,
        request.carbon_weight,
        &constraints,
        basis,
        cfg,
        cancel,
    );
    tracing::info!(
        carbon_weight = request.carbon_weight,
        channels = request.channels.len(),
        success = result.success,
        method = %result.method,
        status = %result.status,
        iterations = result.iterations,
        "completed allocation optimization"
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocation::core::constraints::ChannelBounds;

    /// `sum_i a_i (x_i - b_i)^2 / 2 + c . x`
    struct Quadratic {
        a: Vec<f64>,
        b: Vec<f64>,
        c: Vec<f64>,
    }

    impl AllocationObjective for Quadratic {
        fn value(&self, x: &[f64]) -> f64 {
            (0..x.len())
                .map(|i| 0.5 * self.a[i] * (x[i] - self.b[i]).powi(2) + self.c[i] * x[i])
                .sum()
        }

        fn gradient(&self, x: &[f64], grad: &mut [f64]) {
            for i in 0..x.len() {
                grad[i] = self.a[i] * (x[i] - self.b[i]) + self.c[i];
            }
        }
    }

    struct Linear(Vec<f64>);

    impl AllocationObjective for Linear {
        fn value(&self, x: &[f64]) -> f64 {
            dot(&self.0, x)
        }

        fn gradient(&self, _x: &[f64], grad: &mut [f64]) {
            grad.copy_from_slice(&self.0);
        }
    }

    fn unit_constraints(n: usize, upper: f64) -> ConstraintSet {
        ConstraintSet {
            bounds: ChannelBounds {
                lower: vec![0.0; n],
                upper: vec![upper; n],
            },
            total_budget: 1.0,
            initial_guess: vec![1.0 / n as f64; n],
        }
    }

    fn control() -> SolveControl<'static> {
        SolveControl {
            deadline: None,
            cancel: None,
        }
    }

    #[test]
    fn test_linear_objective_fills_cheapest_channels_first() {
        let objective = Linear(vec![3.0, 1.0, 2.0]);
        let constraints = unit_constraints(3, 0.6);
        let result = solve_allocation(&objective, &constraints, AllocationSolveConfig::default(), None);
        assert!(result.success, "{}", result.message);
        assert_eq!(result.method, SolverMethod::ProjectedGradient);
        assert!((result.allocation[1] - 0.6).abs() < 1e-9);
        assert!((result.allocation[2] - 0.4).abs() < 1e-9);
        assert!(result.allocation[0].abs() < 1e-9);
    }

    #[test]
    fn test_quadratic_objective_matches_closed_form() {
        // Interior optimum of sum (x_i - b_i)^2 / 2 on sum x = 1 is b shifted by a constant.
        let objective = Quadratic {
            a: vec![1.0; 3],
            b: vec![0.5, 0.3, 0.4],
            c: vec![0.0; 3],
        };
        let constraints = unit_constraints(3, 1.0);
        let result = solve_allocation(&objective, &constraints, AllocationSolveConfig::default(), None);
        assert!(result.success, "{}", result.message);
        let shift = (1.2 - 1.0) / 3.0;
        for (xi, bi) in result.allocation.iter().zip([0.5, 0.3, 0.4]) {
            assert!((xi - (bi - shift)).abs() < 1e-8, "{xi} vs {}", bi - shift);
        }
    }

    #[test]
    fn test_objective_trace_is_monotone() {
        let objective = Quadratic {
            a: vec![4.0, 1.0, 0.25, 2.0],
            b: vec![0.9, -0.2, 0.6, 0.1],
            c: vec![0.1, -0.3, 0.0, 0.2],
        };
        let constraints = unit_constraints(4, 0.7);
        let problem = ShareProblem::new(&objective, &constraints);
        let y0 = problem.to_shares(&constraints.initial_guess);

        for trace in [
            run_projected_gradient(&problem, &y0, AllocationSolveConfig::default(), control()),
            run_sequential_quadratic(&problem, &y0, AllocationSolveConfig::default(), control()),
        ] {
            assert!(trace.converged(), "{:?} ended with {}", trace.method, trace.status);
            for win in trace.objective_trace.windows(2) {
                assert!(
                    win[1] <= win[0] + 1e-12,
                    "line search must be monotone: {} -> {}",
                    win[0],
                    win[1]
                );
            }
        }
    }

    #[test]
    fn test_fallback_runs_when_primary_exhausts_iterations() {
        let objective = Linear(vec![3.0, 1.0, 2.0]);
        let constraints = unit_constraints(3, 0.6);
        let cfg = AllocationSolveConfig {
            primary_max_iters: 0,
            ..AllocationSolveConfig::default()
        };
        let result = solve_allocation(&objective, &constraints, cfg, None);
        assert!(result.success, "{}", result.message);
        assert_eq!(result.method, SolverMethod::SequentialQuadratic);
        assert_eq!(result.primary_status, Some(SolveStatus::IterationLimit));
        assert!((result.allocation[1] - 0.6).abs() < 1e-9);
        assert!((result.allocation[2] - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_fallback_restores_equality_from_an_off_budget_start() {
        let objective = Quadratic {
            a: vec![1.0, 2.0],
            b: vec![0.2, 0.2],
            c: vec![0.0, 0.0],
        };
        let constraints = unit_constraints(2, 1.0);
        let problem = ShareProblem::new(&objective, &constraints);
        let trace =
            run_sequential_quadratic(&problem, &[0.1, 0.1], AllocationSolveConfig::default(), control());
        assert!(trace.converged(), "ended with {}", trace.status);
        assert!((trace.y.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        // a_0 (x_0 - b_0) = a_1 (x_1 - b_1) with x_0 + x_1 = 1.
        assert!((trace.y[0] - 0.6).abs() < 1e-7);
        assert!((trace.y[1] - 0.4).abs() < 1e-7);
    }

    #[test]
    fn test_double_failure_reports_diagnostics_without_panicking() {
        let objective = Linear(vec![3.0, 1.0, 2.0]);
        let constraints = unit_constraints(3, 0.6);
        let cfg = AllocationSolveConfig {
            primary_max_iters: 0,
            fallback_max_iters: 0,
            ..AllocationSolveConfig::default()
        };
        let result = solve_allocation(&objective, &constraints, cfg, None);
        assert!(!result.success);
        assert_eq!(result.status, SolveStatus::IterationLimit);
        assert_eq!(result.primary_status, Some(SolveStatus::IterationLimit));
        assert!(result.message.contains("projected-gradient"));
        assert!(result.message.contains("sequential-quadratic"));
        assert_eq!(result.allocation.len(), 3);
        assert!(result.objective_evaluations >= 2);
    }

    #[test]
    fn test_cancelled_solve_skips_fallback() {
        let objective = Linear(vec![3.0, 1.0, 2.0]);
        let constraints = unit_constraints(3, 0.6);
        let token = CancelToken::new();
        token.cancel();
        let result =
            solve_allocation(&objective, &constraints, AllocationSolveConfig::default(), Some(&token));
        assert!(!result.success);
        assert_eq!(result.status, SolveStatus::Cancelled);
        assert!(!result.used_fallback());
        assert_eq!(result.iterations, 0);
    }

    #[test]
    fn test_zero_time_limit_times_out() {
        let objective = Linear(vec![3.0, 1.0, 2.0]);
        let constraints = unit_constraints(3, 0.6);
        let cfg = AllocationSolveConfig {
            time_limit: Some(Duration::ZERO),
            ..AllocationSolveConfig::default()
        };
        let result = solve_allocation(&objective, &constraints, cfg, None);
        assert_eq!(result.status, SolveStatus::TimedOut);
        assert!(!result.success);
    }

    #[test]
    fn test_stationarity_residual_vanishes_at_vertex_optimum() {
        let objective = Linear(vec![3.0, 1.0, 2.0]);
        let constraints = unit_constraints(3, 0.6);
        let problem = ShareProblem::new(&objective, &constraints);
        let mut scratch = vec![0.0; 3];
        let optimum = [0.0, 0.6, 0.4];
        let g = [3.0, 1.0, 2.0];
        assert!(stationarity_residual(&problem, &optimum, &g, &mut scratch) < 1e-12);
        let start = [1.0 / 3.0; 3];
        assert!(stationarity_residual(&problem, &start, &g, &mut scratch) > 0.1);
    }
}
