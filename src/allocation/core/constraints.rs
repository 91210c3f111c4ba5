use std::collections::HashSet;

use super::error::{AllocationError, InfeasibilityReason};
use super::types::OptimizationRequest;

const FEASIBILITY_REL_TOL: f64 = 1e-9;
const PROJECTION_BISECT_ITERS: usize = 200;

/// Per-channel `[lower, upper]` budget interval.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelBounds {
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

impl ChannelBounds {
    pub fn len(&self) -> usize {
        self.lower.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lower.is_empty()
    }

    pub fn floor_total(&self) -> f64 {
        self.lower.iter().sum()
    }

    pub fn ceiling_total(&self) -> f64 {
        self.upper.iter().sum()
    }

    pub fn contains(&self, x: &[f64], tol: f64) -> bool {
        x.len() == self.len()
            && x.iter()
                .zip(self.lower.iter().zip(self.upper.iter()))
                .all(|(&xi, (&lo, &hi))| {
                    xi >= lo - tol * (1.0 + lo.abs()) && xi <= hi + tol * (1.0 + hi.abs())
                })
    }
}

/// Everything the solver needs besides the objective: box bounds, the single
/// `sum(x) = total_budget` equality and a feasible starting point.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintSet {
    pub bounds: ChannelBounds,
    pub total_budget: f64,
    pub initial_guess: Vec<f64>,
}

pub fn validate_request(request: &OptimizationRequest) -> Result<(), AllocationError> {
    if request.channels.is_empty() {
        return Err(AllocationError::EmptyRequest);
    }
    if !request.carbon_weight.is_finite() || !(0.0..=1.0).contains(&request.carbon_weight) {
        return Err(AllocationError::InvalidParameter {
            name: "carbon_weight",
            value: request.carbon_weight,
        });
    }
    if !request.min_budget_per_channel.is_finite() || request.min_budget_per_channel < 0.0 {
        return Err(AllocationError::InvalidParameter {
            name: "min_budget_per_channel",
            value: request.min_budget_per_channel,
        });
    }
    if !request.max_variation.is_finite() || request.max_variation < 0.0 {
        return Err(AllocationError::InvalidParameter {
            name: "max_variation",
            value: request.max_variation,
        });
    }

    let mut seen = HashSet::new();
    for channel in &request.channels {
        if !seen.insert(channel.name.as_str()) {
            return Err(AllocationError::DuplicateChannel {
                name: channel.name.clone(),
            });
        }
        for (field, value) in [
            ("initial_budget", channel.initial_budget),
            ("efficiency_coefficient", channel.efficiency_coefficient),
            ("carbon_coefficient", channel.carbon_coefficient),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(AllocationError::InvalidChannelValue {
                    channel: channel.name.clone(),
                    field,
                    value,
                });
            }
        }
    }
    Ok(())
}

pub fn build_bounds(request: &OptimizationRequest) -> ChannelBounds {
    let v = request.max_variation;
    let (lower, upper) = request
        .channels
        .iter()
        .map(|c| {
            let lower = request
                .min_budget_per_channel
                .max(c.initial_budget * (1.0 - v));
            let upper = c.initial_budget * (1.0 + v);
            (lower, upper)
        })
        .unzip();
    ChannelBounds { lower, upper }
}

fn feasibility_tol(scale: f64) -> f64 {
    FEASIBILITY_REL_TOL * (1.0 + scale.abs())
}

/// Fails fast before any solver work when the bounds cannot hold `total_budget`.
pub fn check_feasibility(
    request: &OptimizationRequest,
    bounds: &ChannelBounds,
    total_budget: f64,
) -> Result<(), InfeasibilityReason> {
    for (channel, (&lower, &upper)) in request
        .channels
        .iter()
        .zip(bounds.lower.iter().zip(bounds.upper.iter()))
    {
        if lower > upper + feasibility_tol(upper) {
            return Err(InfeasibilityReason::InvertedChannelBounds {
                channel: channel.name.clone(),
                lower,
                upper,
            });
        }
    }

    let floor_total = bounds.floor_total();
    if floor_total > total_budget + feasibility_tol(total_budget) {
        return Err(InfeasibilityReason::FloorExceedsBudget {
            floor_total,
            total_budget,
            excess: floor_total - total_budget,
        });
    }
    let ceiling_total = bounds.ceiling_total();
    if ceiling_total < total_budget - feasibility_tol(total_budget) {
        return Err(InfeasibilityReason::CeilingBelowBudget {
            ceiling_total,
            total_budget,
            shortfall: total_budget - ceiling_total,
        });
    }
    Ok(())
}

/// Initial budgets clipped into their own interval, rescaled to the total, and
/// projected back onto the budget set if the rescale pushed a channel out.
pub fn initial_guess(
    request: &OptimizationRequest,
    bounds: &ChannelBounds,
    total_budget: f64,
) -> Option<Vec<f64>> {
    let mut x0: Vec<f64> = request
        .channels
        .iter()
        .zip(bounds.lower.iter().zip(bounds.upper.iter()))
        .map(|(c, (&lo, &hi))| c.initial_budget.clamp(lo, hi.max(lo)))
        .collect();

    let sum: f64 = x0.iter().sum();
    if (sum - total_budget).abs() > feasibility_tol(total_budget) && sum > 0.0 {
        let ratio = total_budget / sum;
        for xi in &mut x0 {
            *xi *= ratio;
        }
    }

    if !bounds.contains(&x0, FEASIBILITY_REL_TOL)
        || (x0.iter().sum::<f64>() - total_budget).abs() > feasibility_tol(total_budget)
    {
        let center = x0.clone();
        project_onto_budget_set(
            &center,
            None,
            &bounds.lower,
            &bounds.upper,
            total_budget,
            &mut x0,
        )?;
    }
    restore_budget_equality(&mut x0, &bounds.lower, &bounds.upper, total_budget);
    Some(x0)
}

fn start_point(
    request: &OptimizationRequest,
    bounds: &ChannelBounds,
    total_budget: f64,
) -> Result<Vec<f64>, InfeasibilityReason> {
    initial_guess(request, bounds, total_budget).ok_or_else(|| {
        InfeasibilityReason::NoFeasibleStart {
            floor_total: bounds.floor_total(),
            ceiling_total: bounds.ceiling_total(),
            total_budget,
        }
    })
}

pub fn build_constraints(request: &OptimizationRequest) -> Result<ConstraintSet, AllocationError> {
    validate_request(request)?;
    let total_budget = request.total_budget();
    let mut bounds = build_bounds(request);
    check_feasibility(request, &bounds, total_budget)?;
    // Bounds inverted only within tolerance collapse to a point.
    for (lo, hi) in bounds.lower.iter().zip(bounds.upper.iter_mut()) {
        if *hi < *lo {
            *hi = *lo;
        }
    }

    let initial_guess = start_point(request, &bounds, total_budget)?;

    Ok(ConstraintSet {
        bounds,
        total_budget,
        initial_guess,
    })
}

fn weighted_clamp_sum(
    center: &[f64],
    weights: Option<&[f64]>,
    lower: &[f64],
    upper: &[f64],
    nu: f64,
) -> f64 {
    (0..center.len())
        .map(|i| {
            let h = weights.map_or(1.0, |w| w[i]);
            (center[i] - nu / h).clamp(lower[i], upper[i])
        })
        .sum()
}

/// Solves `min sum_i h_i/2 (z_i - center_i)^2` subject to `lower <= z <= upper`
/// and `sum(z) = target`, writing `z` into `out`. `weights = None` means `h = 1`
/// (Euclidean projection). Returns the multiplier of the sum constraint.
///
/// `z_i(nu) = clamp(center_i - nu / h_i)` is non-increasing in `nu`; the root is
/// bracketed by bisection, then solved exactly on the final linear segment.
pub(crate) fn project_onto_budget_set(
    center: &[f64],
    weights: Option<&[f64]>,
    lower: &[f64],
    upper: &[f64],
    target: f64,
    out: &mut [f64],
) -> Option<f64> {
    let n = center.len();
    if lower.len() != n || upper.len() != n || out.len() != n {
        return None;
    }
    if let Some(w) = weights {
        if w.len() != n || w.iter().any(|h| !h.is_finite() || *h <= 0.0) {
            return None;
        }
    }
    if center.iter().any(|c| !c.is_finite()) || !target.is_finite() {
        return None;
    }
    if lower
        .iter()
        .zip(upper.iter())
        .any(|(lo, hi)| !(lo.is_finite() && hi.is_finite() && lo <= hi))
    {
        return None;
    }
    if n == 0 {
        return (target.abs() <= feasibility_tol(target)).then_some(0.0);
    }

    let floor: f64 = lower.iter().sum();
    let ceiling: f64 = upper.iter().sum();
    let tol = feasibility_tol(target.abs().max(ceiling.abs()));
    if floor > target + tol || ceiling < target - tol {
        return None;
    }

    // At nu_lo every coordinate sits on its upper bound, at nu_hi on its lower bound.
    let mut nu_lo = f64::INFINITY;
    let mut nu_hi = f64::NEG_INFINITY;
    for i in 0..n {
        let h = weights.map_or(1.0, |w| w[i]);
        nu_lo = nu_lo.min(h * (center[i] - upper[i]));
        nu_hi = nu_hi.max(h * (center[i] - lower[i]));
    }

    let mut s_lo = weighted_clamp_sum(center, weights, lower, upper, nu_lo);
    let mut s_hi = weighted_clamp_sum(center, weights, lower, upper, nu_hi);
    for _ in 0..PROJECTION_BISECT_ITERS {
        if nu_hi - nu_lo <= f64::EPSILON * (1.0 + nu_lo.abs().max(nu_hi.abs())) {
            break;
        }
        let mid = 0.5 * (nu_lo + nu_hi);
        let s_mid = weighted_clamp_sum(center, weights, lower, upper, mid);
        if s_mid >= target {
            nu_lo = mid;
            s_lo = s_mid;
        } else {
            nu_hi = mid;
            s_hi = s_mid;
        }
    }

    let nu = if s_lo - s_hi > 0.0 {
        let frac = ((s_lo - target) / (s_lo - s_hi)).clamp(0.0, 1.0);
        nu_lo + frac * (nu_hi - nu_lo)
    } else {
        nu_lo
    };

    for i in 0..n {
        let h = weights.map_or(1.0, |w| w[i]);
        out[i] = (center[i] - nu / h).clamp(lower[i], upper[i]);
    }
    restore_budget_equality(out, lower, upper, target);
    Some(nu)
}

/// Spreads the residual `target - sum(x)` over the coordinates that still have
/// slack in the needed direction, proportionally to that slack. Never leaves the box.
pub(crate) fn restore_budget_equality(x: &mut [f64], lower: &[f64], upper: &[f64], target: f64) {
    let residual = target - x.iter().sum::<f64>();
    if residual == 0.0 || !residual.is_finite() {
        return;
    }

    let slack: Vec<f64> = x
        .iter()
        .zip(lower.iter().zip(upper.iter()))
        .map(|(&xi, (&lo, &hi))| {
            if residual > 0.0 {
                (hi - xi).max(0.0)
            } else {
                (xi - lo).max(0.0)
            }
        })
        .collect();
    let total_slack: f64 = slack.iter().sum();
    if total_slack <= 0.0 {
        return;
    }

    let frac = (residual.abs() / total_slack).min(1.0);
    let sign = residual.signum();
    for ((xi, s), (&lo, &hi)) in x
        .iter_mut()
        .zip(slack.iter())
        .zip(lower.iter().zip(upper.iter()))
    {
        *xi = (*xi + sign * frac * s).max(lo).min(hi);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocation::core::types::{Channel, RequestParams};

    fn request(budgets: &[f64], min_budget: f64, max_variation: f64) -> OptimizationRequest {
        let channels = budgets
            .iter()
            .enumerate()
            .map(|(i, &b)| Channel::new(format!("ch{i}"), b, 1.0 + i as f64, 0.5 + i as f64))
            .collect();
        OptimizationRequest::new(
            channels,
            RequestParams {
                carbon_weight: 0.5,
                min_budget_per_channel: min_budget,
                max_variation,
            },
        )
    }

    #[test]
    fn test_bounds_follow_floor_and_variation_band() {
        let req = request(&[10_000.0, 5_000.0, 2_000.0], 1_000.0, 0.5);
        let bounds = build_bounds(&req);
        assert_eq!(bounds.lower, vec![5_000.0, 2_500.0, 1_000.0]);
        assert_eq!(bounds.upper, vec![15_000.0, 7_500.0, 3_000.0]);
    }

    #[test]
    fn test_floor_dominates_when_variation_is_wide() {
        let req = request(&[2_000.0, 8_000.0], 1_500.0, 0.9);
        let bounds = build_bounds(&req);
        assert_eq!(bounds.lower[0], 1_500.0);
        assert!((bounds.lower[1] - 1_500.0).abs() < 1e-9);
    }

    #[test]
    fn test_floor_above_total_is_infeasible() {
        let req = request(&[1_000.0, 1_000.0, 1_000.0], 1_200.0, 0.5);
        let err = build_constraints(&req).expect_err("floors exceed budget");
        match err {
            AllocationError::InfeasibleConstraints(InfeasibilityReason::FloorExceedsBudget {
                floor_total,
                total_budget,
                excess,
            }) => {
                assert_eq!(floor_total, 3_600.0);
                assert_eq!(total_budget, 3_000.0);
                assert!((excess - 600.0).abs() < 1e-9);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_floor_above_channel_ceiling_is_inverted() {
        let req = request(&[500.0, 10_000.0], 1_000.0, 0.2);
        let err = build_constraints(&req).expect_err("channel ceiling below floor");
        assert!(matches!(
            err,
            AllocationError::InfeasibleConstraints(InfeasibilityReason::InvertedChannelBounds {
                ref channel,
                ..
            }) if channel == "ch0"
        ));
    }

    #[test]
    fn test_missing_start_point_reports_bound_totals() {
        let req = request(&[1_000.0, 1_000.0], 0.0, 0.5);
        let bounds = ChannelBounds {
            lower: vec![1_500.0, 1_500.0],
            upper: vec![2_000.0, 2_000.0],
        };
        let reason = start_point(&req, &bounds, 2_000.0).expect_err("floors exceed budget");
        assert_eq!(
            reason,
            InfeasibilityReason::NoFeasibleStart {
                floor_total: 3_000.0,
                ceiling_total: 4_000.0,
                total_budget: 2_000.0,
            }
        );
        assert!(reason.to_string().contains("no starting allocation"));
    }

    #[test]
    fn test_invalid_weight_is_rejected() {
        let mut req = request(&[1_000.0, 2_000.0], 0.0, 0.5);
        req.carbon_weight = 1.5;
        assert!(matches!(
            validate_request(&req),
            Err(AllocationError::InvalidParameter {
                name: "carbon_weight",
                ..
            })
        ));
    }

    #[test]
    fn test_duplicate_channel_is_rejected() {
        let mut req = request(&[1_000.0, 2_000.0], 0.0, 0.5);
        req.channels[1].name = "ch0".to_string();
        assert!(matches!(
            validate_request(&req),
            Err(AllocationError::DuplicateChannel { .. })
        ));
    }

    #[test]
    fn test_initial_guess_is_feasible_after_clipping() {
        // Floor lifts the small channel above its initial budget, so clipping
        // alone breaks the sum.
        let req = request(&[400.0, 9_600.0], 1_000.0, 3.0);
        let cs = build_constraints(&req).expect("feasible");
        let sum: f64 = cs.initial_guess.iter().sum();
        assert!((sum - 10_000.0).abs() < 1e-6);
        assert!(cs.bounds.contains(&cs.initial_guess, 1e-12));
        assert!(cs.initial_guess[0] >= 1_000.0 - 1e-9);
    }

    #[test]
    fn test_initial_guess_keeps_feasible_initial_budgets() {
        let req = request(&[10_000.0, 5_000.0, 2_000.0], 1_000.0, 0.5);
        let cs = build_constraints(&req).expect("feasible");
        assert_eq!(cs.initial_guess, vec![10_000.0, 5_000.0, 2_000.0]);
    }

    #[test]
    fn test_projection_hits_target_and_box() {
        let center = [5.0, -3.0, 0.2, 0.9];
        let lower = [0.0, 0.0, 0.1, 0.0];
        let upper = [0.5, 0.5, 0.5, 0.5];
        let mut out = [0.0; 4];
        project_onto_budget_set(&center, None, &lower, &upper, 1.0, &mut out)
            .expect("target inside [floor, ceiling]");
        assert!((out.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!((out[0] - 0.5).abs() < 1e-12);
        assert!(out[1].abs() < 1e-12);
        assert!((out[3] - 0.4).abs() < 1e-12);
        for i in 0..4 {
            assert!(out[i] >= lower[i] && out[i] <= upper[i]);
        }
    }

    #[test]
    fn test_projection_of_feasible_point_is_identity() {
        let center = [0.2, 0.3, 0.5];
        let lower = [0.0; 3];
        let upper = [1.0; 3];
        let mut out = [0.0; 3];
        project_onto_budget_set(&center, None, &lower, &upper, 1.0, &mut out).expect("feasible");
        for i in 0..3 {
            assert!((out[i] - center[i]).abs() < 1e-12);
        }
    }

    #[test]
    fn test_weighted_projection_moves_stiff_coordinates_less() {
        let center = [0.0, 0.0];
        let weights = [100.0, 1.0];
        let lower = [0.0, 0.0];
        let upper = [1.0, 1.0];
        let mut out = [0.0; 2];
        let nu = project_onto_budget_set(&center, Some(&weights), &lower, &upper, 1.0, &mut out)
            .expect("feasible");
        assert!(nu < 0.0);
        assert!(out[0] < out[1]);
        assert!((out[0] * 100.0 - out[1]).abs() < 1e-9);
    }

    #[test]
    fn test_projection_rejects_unreachable_target() {
        let mut out = [0.0; 2];
        assert!(
            project_onto_budget_set(&[0.0, 0.0], None, &[0.0, 0.0], &[1.0, 1.0], 3.0, &mut out)
                .is_none()
        );
    }

    #[test]
    fn test_equality_repair_respects_bounds() {
        let mut x = [0.9, 0.05, 0.0];
        restore_budget_equality(&mut x, &[0.0; 3], &[1.0; 3], 1.0);
        assert!((x.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!(x.iter().all(|v| (0.0..=1.0).contains(v)));
    }
}
