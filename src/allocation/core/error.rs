use std::fmt;

use crate::channels::ChannelError;

/// Which aggregate of the channel bounds cannot hold the fixed total budget.
#[derive(Debug, Clone, PartialEq)]
pub enum InfeasibilityReason {
    InvertedChannelBounds {
        channel: String,
        lower: f64,
        upper: f64,
    },
    FloorExceedsBudget {
        floor_total: f64,
        total_budget: f64,
        excess: f64,
    },
    CeilingBelowBudget {
        ceiling_total: f64,
        total_budget: f64,
        shortfall: f64,
    },
    /// The aggregate checks passed but no point of the bounds sums to the budget.
    NoFeasibleStart {
        floor_total: f64,
        ceiling_total: f64,
        total_budget: f64,
    },
}

impl fmt::Display for InfeasibilityReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvertedChannelBounds {
                channel,
                lower,
                upper,
            } => write!(
                f,
                "channel '{channel}' has lower bound {lower:.2} above upper bound {upper:.2}"
            ),
            Self::FloorExceedsBudget {
                floor_total,
                total_budget,
                excess,
            } => write!(
                f,
                "sum of channel floors {floor_total:.2} exceeds total budget {total_budget:.2} by {excess:.2}"
            ),
            Self::CeilingBelowBudget {
                ceiling_total,
                total_budget,
                shortfall,
            } => write!(
                f,
                "sum of channel ceilings {ceiling_total:.2} is below total budget {total_budget:.2} by {shortfall:.2}"
            ),
            Self::NoFeasibleStart {
                floor_total,
                ceiling_total,
                total_budget,
            } => write!(
                f,
                "no starting allocation sums to {total_budget:.2} within channel bounds [{floor_total:.2}, {ceiling_total:.2}]"
            ),
        }
    }
}

#[derive(Debug)]
pub enum AllocationError {
    EmptyRequest,
    DuplicateChannel {
        name: String,
    },
    InvalidParameter {
        name: &'static str,
        value: f64,
    },
    InvalidChannelValue {
        channel: String,
        field: &'static str,
        value: f64,
    },
    InfeasibleConstraints(InfeasibilityReason),
    Channel(ChannelError),
}

impl fmt::Display for AllocationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyRequest => write!(f, "optimization request has no channels"),
            Self::DuplicateChannel { name } => {
                write!(f, "channel '{name}' appears more than once in the request")
            }
            Self::InvalidParameter { name, value } => {
                write!(f, "invalid optimization parameter {name}={value}")
            }
            Self::InvalidChannelValue {
                channel,
                field,
                value,
            } => write!(f, "channel '{channel}' has invalid {field}={value}"),
            Self::InfeasibleConstraints(reason) => write!(f, "infeasible constraints: {reason}"),
            Self::Channel(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for AllocationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Channel(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ChannelError> for AllocationError {
    fn from(value: ChannelError) -> Self {
        Self::Channel(value)
    }
}

impl From<InfeasibilityReason> for AllocationError {
    fn from(value: InfeasibilityReason) -> Self {
        Self::InfeasibleConstraints(value)
    }
}
