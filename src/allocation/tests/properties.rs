use proptest::prelude::*;

use super::super::{
    AllocationObjective, AllocationSolveConfig, Channel, Knee, NormalizationBasis,
    OptimizationRequest, RequestParams, WeightedObjective, build_constraints, optimize,
    select_knee, weight_grid,
};

fn channel_strategy() -> impl Strategy<Value = (f64, f64, f64)> {
    (1_000.0f64..50_000.0, 0.1f64..5.0, 0.05f64..3.0)
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 96,
        max_shrink_iters: 512,
        .. ProptestConfig::default()
    })]

    #[test]
    fn proptest_feasible_requests_converge_within_budget_and_bounds(
        specs in prop::collection::vec(channel_strategy(), 2..61),
        carbon_weight in 0.0f64..=1.0,
        min_budget in 0.0f64..2_000.0,
        max_variation in 0.05f64..1.0,
    ) {
        let channels: Vec<Channel> = specs
            .iter()
            .enumerate()
            .map(|(i, &(budget, eff, carbon))| Channel::new(format!("ch{i}"), budget, eff, carbon))
            .collect();
        let request = OptimizationRequest::new(
            channels,
            RequestParams { carbon_weight, min_budget_per_channel: min_budget, max_variation },
        );
        let Ok(constraints) = build_constraints(&request) else {
            return Err(TestCaseError::reject("bounds cannot hold the total budget"));
        };

        let result = optimize(&request, AllocationSolveConfig::default()).unwrap();
        prop_assert_eq!(result.allocation.len(), request.channels.len());
        prop_assert!(result.success, "{}: {}", result.status, result.message);
        let total = request.total_budget();
        let sum: f64 = result.allocation.iter().sum();
        prop_assert!((sum - total).abs() <= 1e-6 * total, "sum {} vs total {}", sum, total);
        for (i, &x) in result.allocation.iter().enumerate() {
            let lo = constraints.bounds.lower[i];
            let hi = constraints.bounds.upper[i];
            prop_assert!(x >= lo - 1e-6 * lo.abs().max(1.0), "channel {} below floor: {} < {}", i, x, lo);
            prop_assert!(x <= hi + 1e-6 * hi.abs().max(1.0), "channel {} above ceiling: {} > {}", i, x, hi);
        }

        // Never worse than the feasible starting point.
        let basis = NormalizationBasis::from_channels(&request.channels);
        let objective = WeightedObjective::new(&request.channels, basis, carbon_weight);
        let start = objective.value(&constraints.initial_guess);
        let end = objective.value(&result.allocation);
        prop_assert!(end <= start + 1e-7 * (1.0 + start.abs()), "objective rose: {} -> {}", start, end);
    }

    #[test]
    fn proptest_knee_index_stays_in_range(
        slopes in prop::collection::vec(-10.0f64..10.0, 0..16),
    ) {
        match select_knee(&slopes) {
            Knee::At(j) => {
                prop_assert!(j + 3 < slopes.len());
                prop_assert!(slopes[j + 1] >= 0.0);
                prop_assert!(slopes[j] < 0.7 * slopes[j + 1]);
            }
            Knee::Undefined(_) => {}
        }
    }

    #[test]
    fn proptest_weight_grid_is_sorted_and_bounded(steps in 2usize..64) {
        let grid = weight_grid(steps);
        prop_assert_eq!(grid.len(), steps);
        prop_assert_eq!(grid[0], 0.0);
        prop_assert_eq!(grid[steps - 1], 1.0);
        for pair in grid.windows(2) {
            prop_assert!(pair[0] < pair[1]);
        }
    }
}
