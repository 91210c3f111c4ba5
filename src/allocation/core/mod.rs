pub mod diagnostics;
mod constraints;
mod error;
mod export;
mod frontier;
mod objective;
mod solver;
mod types;

pub use constraints::{
    ChannelBounds, ConstraintSet, build_bounds, build_constraints, check_feasibility,
    validate_request,
};
pub use error::{AllocationError, InfeasibilityReason};
pub use export::{
    ExportError, write_allocation_csv, write_allocation_csv_to_path, write_frontier_csv,
    write_frontier_csv_to_path, write_frontier_json, write_frontier_json_to_path,
};
pub use frontier::{
    Baseline, DEFAULT_FRONTIER_STEPS, DroppedWeight, Frontier, FrontierConfig, FrontierPoint, Knee,
    KneeUndefined, default_weight_grid, frontier_slopes, realized_totals, select_knee,
    sweep_frontier, sweep_frontier_with_cancel, weight_grid,
};
pub use objective::{AllocationObjective, NormalizationBasis, ReferenceScale, WeightedObjective};
pub use solver::{
    AllocationSolveConfig, CancelToken, optimize, optimize_with_cancel, solve_allocation,
};
pub use types::{
    Channel, CoefficientWarning, DEFAULT_CARBON_WEIGHT, DEFAULT_MAX_VARIATION,
    DEFAULT_MIN_BUDGET_PER_CHANNEL, Objective, OptimizationRequest, OptimizationResult,
    RequestParams, SolveStatus, SolverMethod,
};

#[cfg(test)]
#[path = "../tests.rs"]
mod tests;
