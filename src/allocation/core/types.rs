use std::fmt;

use serde::{Deserialize, Serialize};

pub const DEFAULT_CARBON_WEIGHT: f64 = 0.5;
pub const DEFAULT_MIN_BUDGET_PER_CHANNEL: f64 = 1000.0;
pub const DEFAULT_MAX_VARIATION: f64 = 0.5;

/// One media channel with its per-currency-unit coefficients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub name: String,
    pub initial_budget: f64,
    /// Useful contacts generated per currency unit.
    pub efficiency_coefficient: f64,
    /// Emission grams generated per currency unit.
    pub carbon_coefficient: f64,
    /// Useful contacts at `initial_budget`.
    pub baseline_useful_contacts: f64,
    /// Emission grams at `initial_budget`.
    pub baseline_carbon: f64,
}

impl Channel {
    pub fn new(
        name: impl Into<String>,
        initial_budget: f64,
        efficiency_coefficient: f64,
        carbon_coefficient: f64,
    ) -> Self {
        Self {
            name: name.into(),
            initial_budget,
            efficiency_coefficient,
            carbon_coefficient,
            baseline_useful_contacts: initial_budget * efficiency_coefficient,
            baseline_carbon: initial_budget * carbon_coefficient,
        }
    }

    /// Contacts scale with the budget ratio; a zero-budget channel keeps its baseline.
    fn budget_ratio(&self, budget: f64) -> f64 {
        if self.initial_budget > 0.0 {
            budget / self.initial_budget
        } else {
            1.0
        }
    }

    pub fn realized_useful_contacts(&self, budget: f64) -> f64 {
        self.baseline_useful_contacts * self.budget_ratio(budget)
    }

    pub fn realized_carbon(&self, budget: f64) -> f64 {
        self.baseline_carbon * self.budget_ratio(budget)
    }
}

/// Scalar knobs of a request, separated from the channel list so a template
/// can be re-used across a weight sweep.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RequestParams {
    pub carbon_weight: f64,
    pub min_budget_per_channel: f64,
    pub max_variation: f64,
}

impl Default for RequestParams {
    fn default() -> Self {
        Self {
            carbon_weight: DEFAULT_CARBON_WEIGHT,
            min_budget_per_channel: DEFAULT_MIN_BUDGET_PER_CHANNEL,
            max_variation: DEFAULT_MAX_VARIATION,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationRequest {
    pub channels: Vec<Channel>,
    /// 0 focuses on useful contacts only, 1 on carbon only.
    pub carbon_weight: f64,
    pub min_budget_per_channel: f64,
    /// Fractional deviation allowed around each channel's own initial budget.
    pub max_variation: f64,
}

impl OptimizationRequest {
    pub fn new(channels: Vec<Channel>, params: RequestParams) -> Self {
        Self {
            channels,
            carbon_weight: params.carbon_weight,
            min_budget_per_channel: params.min_budget_per_channel,
            max_variation: params.max_variation,
        }
    }

    pub fn params(&self) -> RequestParams {
        RequestParams {
            carbon_weight: self.carbon_weight,
            min_budget_per_channel: self.min_budget_per_channel,
            max_variation: self.max_variation,
        }
    }

    pub fn with_carbon_weight(&self, carbon_weight: f64) -> Self {
        Self {
            carbon_weight,
            ..self.clone()
        }
    }

    /// Fixed sum every allocation must reproduce.
    pub fn total_budget(&self) -> f64 {
        self.channels.iter().map(|c| c.initial_budget).sum()
    }

    pub fn initial_budgets(&self) -> Vec<f64> {
        self.channels.iter().map(|c| c.initial_budget).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SolverMethod {
    /// Spectral projected gradient on the budget polytope.
    ProjectedGradient,
    /// Sequential quadratic programming with a diagonal quasi-Newton model.
    SequentialQuadratic,
}

impl fmt::Display for SolverMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProjectedGradient => write!(f, "projected-gradient"),
            Self::SequentialQuadratic => write!(f, "sequential-quadratic"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SolveStatus {
    Converged,
    IterationLimit,
    LineSearchStalled,
    NonFiniteEvaluation,
    ProjectionFailed,
    EqualityViolation,
    Cancelled,
    TimedOut,
}

impl SolveStatus {
    /// Interrupted solves are not retried with the fallback method.
    pub fn is_interrupt(self) -> bool {
        matches!(self, Self::Cancelled | Self::TimedOut)
    }
}

impl fmt::Display for SolveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Converged => write!(f, "converged"),
            Self::IterationLimit => write!(f, "iteration limit reached"),
            Self::LineSearchStalled => write!(f, "line search could not find a decrease"),
            Self::NonFiniteEvaluation => write!(f, "objective or gradient became non-finite"),
            Self::ProjectionFailed => write!(f, "projection onto the budget set failed"),
            Self::EqualityViolation => write!(f, "budget equality not met within tolerance"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::TimedOut => write!(f, "time limit exceeded"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Objective {
    Carbon,
    Efficiency,
}

impl fmt::Display for Objective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Carbon => write!(f, "carbon"),
            Self::Efficiency => write!(f, "efficiency"),
        }
    }
}

/// Non-fatal conditions flagged alongside a result.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum CoefficientWarning {
    /// Every channel shares the same coefficient; the objective term is a near-constant.
    DegenerateCoefficients { objective: Objective, value: f64 },
}

impl fmt::Display for CoefficientWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DegenerateCoefficients { objective, value } => write!(
                f,
                "all channels share {objective} coefficient {value}; the {objective} term is ignored"
            ),
        }
    }
}

/// Output of one solve. Never retained by the optimizer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptimizationResult {
    pub success: bool,
    /// Budget per channel, aligned with the request's channel order.
    pub allocation: Vec<f64>,
    pub status: SolveStatus,
    pub message: String,
    /// Method that produced `allocation`.
    pub method: SolverMethod,
    /// Set when the fallback ran: why the primary method gave up.
    pub primary_status: Option<SolveStatus>,
    pub iterations: usize,
    pub objective_evaluations: usize,
    pub gradient_evaluations: usize,
    pub line_search_trials: usize,
    pub objective_value: f64,
    pub projected_grad_norm: f64,
    /// |sum(allocation) - total| relative to the total budget.
    pub equality_residual: f64,
    pub warnings: Vec<CoefficientWarning>,
}

impl OptimizationResult {
    pub fn used_fallback(&self) -> bool {
        self.primary_status.is_some()
    }

    pub fn total_allocated(&self) -> f64 {
        self.allocation.iter().sum()
    }
}
