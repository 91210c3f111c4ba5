mod core;

pub use self::core::diagnostics::{
    AllocationReport, ChannelAllocationRow, TraceConfig, print_allocation_report,
    print_frontier_summary, print_solve_diagnostics,
};
pub use self::core::{
    AllocationError, AllocationObjective, AllocationSolveConfig, Baseline, CancelToken, Channel,
    ChannelBounds, CoefficientWarning, ConstraintSet, DEFAULT_CARBON_WEIGHT,
    DEFAULT_FRONTIER_STEPS, DEFAULT_MAX_VARIATION, DEFAULT_MIN_BUDGET_PER_CHANNEL, DroppedWeight,
    ExportError, Frontier, FrontierConfig, FrontierPoint, InfeasibilityReason, Knee,
    KneeUndefined, NormalizationBasis, Objective, OptimizationRequest, OptimizationResult,
    ReferenceScale, RequestParams, SolveStatus, SolverMethod, WeightedObjective, build_bounds,
    build_constraints, check_feasibility, default_weight_grid, frontier_slopes, optimize,
    optimize_with_cancel, realized_totals, select_knee, solve_allocation, sweep_frontier,
    sweep_frontier_with_cancel, validate_request, weight_grid, write_allocation_csv,
    write_allocation_csv_to_path, write_frontier_csv, write_frontier_csv_to_path,
    write_frontier_json, write_frontier_json_to_path,
};
