use std::fmt;

use rayon::prelude::*;
use serde::Serialize;

use super::constraints::build_constraints;
use super::error::AllocationError;
use super::objective::NormalizationBasis;
use super::solver::{AllocationSolveConfig, CancelToken, solve_with_basis};
use super::types::{Channel, OptimizationRequest, OptimizationResult, SolveStatus, SolverMethod};

pub const DEFAULT_FRONTIER_STEPS: usize = 11;
/// A point is a knee when its slope falls below this share of the next slope.
pub const KNEE_SLOPE_RATIO: f64 = 0.7;
pub const MIN_KNEE_POINTS: usize = 4;
const GRAMS_PER_KG: f64 = 1000.0;
/// Carbon changes within this share of the larger total are solver rounding.
const SLOPE_CARBON_REL_TOL: f64 = 1e-8;

/// `steps` evenly spaced carbon weights on `[0, 1]`, both ends included.
pub fn weight_grid(steps: usize) -> Vec<f64> {
    match steps {
        0 => Vec::new(),
        1 => vec![0.0],
        _ => {
            let last = (steps - 1) as f64;
            (0..steps).map(|i| i as f64 / last).collect()
        }
    }
}

pub fn default_weight_grid() -> Vec<f64> {
    weight_grid(DEFAULT_FRONTIER_STEPS)
}

/// Aggregates of the unoptimized plan.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Baseline {
    pub useful_contacts: f64,
    /// Grams.
    pub carbon: f64,
}

impl Baseline {
    pub fn from_channels(channels: &[Channel]) -> Self {
        Self {
            useful_contacts: channels.iter().map(|c| c.baseline_useful_contacts).sum(),
            carbon: channels.iter().map(|c| c.baseline_carbon).sum(),
        }
    }

    pub fn carbon_kg(&self) -> f64 {
        self.carbon / GRAMS_PER_KG
    }
}

fn pct_change(value: f64, reference: f64) -> f64 {
    if reference.abs() <= f64::EPSILON {
        0.0
    } else {
        100.0 * (value - reference) / reference
    }
}

/// Realized aggregates of an allocation, re-derived proportionally per channel.
pub fn realized_totals(channels: &[Channel], allocation: &[f64]) -> (f64, f64) {
    channels
        .iter()
        .zip(allocation.iter())
        .fold((0.0, 0.0), |(contacts, carbon), (channel, &budget)| {
            (
                contacts + channel.realized_useful_contacts(budget),
                carbon + channel.realized_carbon(budget),
            )
        })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrontierPoint {
    pub carbon_weight: f64,
    pub useful_contacts: f64,
    /// Grams.
    pub carbon: f64,
    pub allocation: Vec<f64>,
    pub method: SolverMethod,
    pub iterations: usize,
}

impl FrontierPoint {
    fn from_result(channels: &[Channel], carbon_weight: f64, result: OptimizationResult) -> Self {
        let (useful_contacts, carbon) = realized_totals(channels, &result.allocation);
        Self {
            carbon_weight,
            useful_contacts,
            carbon,
            allocation: result.allocation,
            method: result.method,
            iterations: result.iterations,
        }
    }

    pub fn carbon_kg(&self) -> f64 {
        self.carbon / GRAMS_PER_KG
    }

    pub fn delta_contacts_pct(&self, baseline: &Baseline) -> f64 {
        pct_change(self.useful_contacts, baseline.useful_contacts)
    }

    pub fn delta_carbon_pct(&self, baseline: &Baseline) -> f64 {
        pct_change(self.carbon, baseline.carbon)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum KneeUndefined {
    InsufficientPoints { points: usize },
    NoDiminishingReturns,
}

impl fmt::Display for KneeUndefined {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InsufficientPoints { points } => write!(
                f,
                "{points} converged points, at least {MIN_KNEE_POINTS} are needed"
            ),
            Self::NoDiminishingReturns => write!(f, "no point shows diminishing returns"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Knee {
    At(usize),
    Undefined(KneeUndefined),
}

impl Knee {
    pub fn index(&self) -> Option<usize> {
        match self {
            Self::At(idx) => Some(*idx),
            Self::Undefined(_) => None,
        }
    }
}

/// A weight whose solve did not converge; it is left out of the frontier.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DroppedWeight {
    pub carbon_weight: f64,
    pub status: SolveStatus,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Frontier {
    pub channel_names: Vec<String>,
    /// Converged points in ascending weight order.
    pub points: Vec<FrontierPoint>,
    pub knee: Knee,
    pub baseline: Baseline,
    pub requested_weights: Vec<f64>,
    pub dropped: Vec<DroppedWeight>,
}

impl Frontier {
    pub fn knee_point(&self) -> Option<&FrontierPoint> {
        self.knee.index().and_then(|idx| self.points.get(idx))
    }

    /// Point with the most useful contacts; the lowest weight wins ties.
    pub fn best_contacts(&self) -> Option<&FrontierPoint> {
        self.points.iter().reduce(|best, p| {
            if p.useful_contacts > best.useful_contacts {
                p
            } else {
                best
            }
        })
    }

    /// Point with the least carbon; the lowest weight wins ties.
    pub fn best_carbon(&self) -> Option<&FrontierPoint> {
        self.points
            .iter()
            .reduce(|best, p| if p.carbon < best.carbon { p } else { best })
    }

    pub fn slopes(&self) -> Vec<f64> {
        frontier_slopes(&self.points)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FrontierConfig {
    pub solve: AllocationSolveConfig,
    /// Solve weights on the rayon pool instead of sequentially.
    pub parallel: bool,
}

/// `D[0] = 0`, `D[k] = (contacts[k] - contacts[k-1]) / (carbon_kg[k] - carbon_kg[k-1])`.
/// No carbon change, down to rounding of the totals, gives 0, as does any
/// non-finite quotient.
pub fn frontier_slopes(points: &[FrontierPoint]) -> Vec<f64> {
    let mut slopes = Vec::with_capacity(points.len());
    if points.is_empty() {
        return slopes;
    }
    slopes.push(0.0);
    for pair in points.windows(2) {
        let (prev, next) = (pair[0].carbon_kg(), pair[1].carbon_kg());
        let d_carbon = next - prev;
        if d_carbon.abs() <= SLOPE_CARBON_REL_TOL * prev.abs().max(next.abs()) {
            slopes.push(0.0);
            continue;
        }
        let slope = (pair[1].useful_contacts - pair[0].useful_contacts) / d_carbon;
        slopes.push(if slope.is_finite() { slope } else { 0.0 });
    }
    slopes
}

/// Scans backward from the high-weight end for the first `j` with
/// `D[j] < 0.7 * D[j+1]` and `D[j+1] >= 0`. The last two slopes are never
/// candidates, so fewer than four points cannot have a knee.
pub fn select_knee(slopes: &[f64]) -> Knee {
    let n = slopes.len();
    if n < MIN_KNEE_POINTS {
        return Knee::Undefined(KneeUndefined::InsufficientPoints { points: n });
    }
    (0..=n - MIN_KNEE_POINTS)
        .rev()
        .find(|&j| slopes[j] < slopes[j + 1] * KNEE_SLOPE_RATIO && slopes[j + 1] >= 0.0)
        .map_or(Knee::Undefined(KneeUndefined::NoDiminishingReturns), Knee::At)
}

fn validate_weights(weights: &[f64]) -> Result<(), AllocationError> {
    match weights
        .iter()
        .find(|w| !w.is_finite() || !(0.0..=1.0).contains(*w))
    {
        Some(&value) => Err(AllocationError::InvalidParameter {
            name: "carbon_weight",
            value,
        }),
        None => Ok(()),
    }
}

pub fn sweep_frontier(
    request: &OptimizationRequest,
    weights: &[f64],
    cfg: FrontierConfig,
) -> Result<Frontier, AllocationError> {
    sweep_frontier_with_cancel(request, weights, cfg, None)
}

/// Solves every weight against one constraint set and one normalization basis.
/// Weights that fail to converge are dropped and logged; preconditions fail the
/// whole sweep before any solve.
pub fn sweep_frontier_with_cancel(
    request: &OptimizationRequest,
    weights: &[f64],
    cfg: FrontierConfig,
    cancel: Option<&CancelToken>,
) -> Result<Frontier, AllocationError> {
    validate_weights(weights)?;
    let constraints = build_constraints(request)?;
    let basis = NormalizationBasis::from_channels(&request.channels);
    for warning in basis.warnings() {
        tracing::warn!(%warning, "degenerate coefficients");
    }

    let solve_one = |&w: &f64| {
        (
            w,
            solve_with_basis(&request.channels, w, &constraints, basis, cfg.solve, cancel),
        )
    };
    let mut solved: Vec<(f64, OptimizationResult)> = if cfg.parallel {
        weights.par_iter().map(solve_one).collect()
    } else {
        weights.iter().map(solve_one).collect()
    };
    solved.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut points = Vec::with_capacity(solved.len());
    let mut dropped = Vec::new();
    for (w, result) in solved {
        if result.success {
            points.push(FrontierPoint::from_result(&request.channels, w, result));
        } else {
            tracing::warn!(
                carbon_weight = w,
                status = %result.status,
                message = %result.message,
                "dropping frontier weight"
            );
            dropped.push(DroppedWeight {
                carbon_weight: w,
                status: result.status,
                message: result.message,
            });
        }
    }

    let knee = select_knee(&frontier_slopes(&points));
    tracing::info!(
        requested = weights.len(),
        converged = points.len(),
        dropped = dropped.len(),
        knee = ?knee.index(),
        parallel = cfg.parallel,
        "frontier sweep finished"
    );

    Ok(Frontier {
        channel_names: request.channels.iter().map(|c| c.name.clone()).collect(),
        points,
        knee,
        baseline: Baseline::from_channels(&request.channels),
        requested_weights: weights.to_vec(),
        dropped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(weight: f64, contacts: f64, carbon_kg: f64) -> FrontierPoint {
        FrontierPoint {
            carbon_weight: weight,
            useful_contacts: contacts,
            carbon: carbon_kg * GRAMS_PER_KG,
            allocation: Vec::new(),
            method: SolverMethod::ProjectedGradient,
            iterations: 0,
        }
    }

    fn points_from(contacts: &[f64], carbon_kg: &[f64]) -> Vec<FrontierPoint> {
        contacts
            .iter()
            .zip(carbon_kg.iter())
            .enumerate()
            .map(|(i, (&c, &k))| point(i as f64 / 10.0, c, k))
            .collect()
    }

    #[test]
    fn test_weight_grid_is_inclusive_and_even() {
        let grid = default_weight_grid();
        assert_eq!(grid.len(), 11);
        assert_eq!(grid[0], 0.0);
        assert_eq!(grid[10], 1.0);
        assert!((grid[3] - 0.3).abs() < 1e-15);
        assert_eq!(weight_grid(2), vec![0.0, 1.0]);
        assert_eq!(weight_grid(1), vec![0.0]);
        assert!(weight_grid(0).is_empty());
    }

    #[test]
    fn test_slopes_start_at_zero_and_zero_carbon_change_is_flat() {
        let pts = points_from(&[100.0, 90.0, 95.0], &[1000.0, 990.0, 990.0]);
        assert_eq!(frontier_slopes(&pts), vec![0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_rounding_level_carbon_change_is_flat() {
        let pts = points_from(&[44_450.0, 44_450.000_000_01], &[25.85, 25.85 + 1e-12]);
        assert_eq!(frontier_slopes(&pts), vec![0.0, 0.0]);
    }

    #[test]
    fn test_knee_is_first_diminishing_point_from_the_high_weight_end() {
        let pts = points_from(
            &[1000.0, 990.0, 975.0, 950.0, 900.0],
            &[100.0, 90.0, 80.0, 70.0, 60.0],
        );
        let slopes = frontier_slopes(&pts);
        assert_eq!(slopes, vec![0.0, 1.0, 1.5, 2.5, 5.0]);
        assert_eq!(select_knee(&slopes), Knee::At(1));
    }

    #[test]
    fn test_knee_falls_back_to_first_point_when_only_it_qualifies() {
        assert_eq!(select_knee(&[0.0, 2.0, 2.2, 2.5, 5.0]), Knee::At(0));
    }

    #[test]
    fn test_knee_requires_non_negative_next_slope() {
        assert_eq!(
            select_knee(&[0.0, -3.0, -2.0, -1.0]),
            Knee::Undefined(KneeUndefined::NoDiminishingReturns)
        );
    }

    #[test]
    fn test_short_sweeps_have_no_knee() {
        for n in 0..MIN_KNEE_POINTS {
            let slopes = vec![1.0; n];
            assert_eq!(
                select_knee(&slopes),
                Knee::Undefined(KneeUndefined::InsufficientPoints { points: n })
            );
        }
    }

    #[test]
    fn test_best_points_prefer_lowest_weight_on_ties() {
        let frontier = Frontier {
            channel_names: Vec::new(),
            points: points_from(&[10.0, 10.0, 8.0], &[5.0, 4.0, 4.0]),
            knee: Knee::Undefined(KneeUndefined::InsufficientPoints { points: 3 }),
            baseline: Baseline {
                useful_contacts: 9.0,
                carbon: 4500.0,
            },
            requested_weights: vec![0.0, 0.1, 0.2],
            dropped: Vec::new(),
        };
        assert_eq!(frontier.best_contacts().map(|p| p.carbon_weight), Some(0.0));
        assert_eq!(frontier.best_carbon().map(|p| p.carbon_weight), Some(0.1));
        assert!(frontier.knee_point().is_none());
        let p = &frontier.points[0];
        assert!((p.delta_contacts_pct(&frontier.baseline) - 100.0 / 9.0).abs() < 1e-12);
        assert!((p.delta_carbon_pct(&frontier.baseline) - 100.0 / 9.0).abs() < 1e-12);
    }

    #[test]
    fn test_out_of_range_weight_is_rejected() {
        let request = OptimizationRequest::new(
            vec![
                Channel::new("a", 1_000.0, 1.0, 1.0),
                Channel::new("b", 1_000.0, 2.0, 0.5),
            ],
            Default::default(),
        );
        let err = sweep_frontier(&request, &[0.0, 1.2], FrontierConfig::default())
            .expect_err("weight above one");
        assert!(matches!(
            err,
            AllocationError::InvalidParameter {
                name: "carbon_weight",
                ..
            }
        ));
    }
}
