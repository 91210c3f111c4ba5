use std::error::Error;

use media_carbon_optimizer::allocation::{
    self, AllocationReport, OptimizationRequest, TraceConfig, weight_grid,
};
use media_carbon_optimizer::channels::{build_channels, load_channel_records};
use media_carbon_optimizer::config::OptimizerConfig;

fn main() -> Result<(), Box<dyn Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = OptimizerConfig::from_env()?;
    let records = load_channel_records(&config.channels_csv)?;
    if records.is_empty() {
        tracing::warn!(path = %config.channels_csv.display(), "no channel records found; nothing to optimize");
        return Ok(());
    }
    let channels = build_channels(&records)?;
    let request = OptimizationRequest::new(channels, config.params);
    let trace_config = TraceConfig::from_env();

    tracing::info!(
        channels = request.channels.len(),
        total_budget = request.total_budget(),
        carbon_weight = request.carbon_weight,
        min_budget_per_channel = request.min_budget_per_channel,
        max_variation = request.max_variation,
        "loaded media plan"
    );

    let result = allocation::optimize(&request, config.solve)?;
    allocation::print_solve_diagnostics("runtime", &result, trace_config);
    let report = AllocationReport::from_result(&request.channels, request.carbon_weight, &result);
    if result.success {
        allocation::print_allocation_report("runtime", &report, trace_config);
        if let Some(path) = &config.allocation_csv {
            allocation::write_allocation_csv_to_path(path, &report)?;
            tracing::info!(path = %path.display(), "wrote allocation csv");
        }
    } else {
        tracing::warn!(
            status = %result.status,
            "optimization did not converge; consider relaxing MAX_VARIATION or MIN_BUDGET_PER_CHANNEL"
        );
    }

    let weights = weight_grid(config.frontier_steps);
    if weights.is_empty() {
        return Ok(());
    }
    let frontier = allocation::sweep_frontier(&request, &weights, config.frontier())?;
    allocation::print_frontier_summary("runtime", &frontier, trace_config);

    if let Some(path) = &config.frontier_csv {
        allocation::write_frontier_csv_to_path(path, &frontier)?;
        tracing::info!(path = %path.display(), "wrote frontier csv");
    }
    if let Some(path) = &config.frontier_json {
        allocation::write_frontier_json_to_path(path, &frontier)?;
        tracing::info!(path = %path.display(), "wrote frontier json");
    }

    Ok(())
}
