//! Per-channel coefficients derived from aggregated plan records.

use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::allocation::{
    AllocationError, AllocationSolveConfig, Channel, OptimizationRequest, OptimizationResult,
    RequestParams, optimize,
};

/// One aggregated row per channel, as produced by the plan upload step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelRecord {
    pub channel: String,
    pub budget: f64,
    pub contacts: f64,
    /// Emission grams per contact.
    pub co2_per_contact: f64,
    /// Engagement multiplier in percent. An empty CSV cell reads as `None`.
    pub alpha: Option<f64>,
}

#[derive(Debug)]
pub enum ChannelError {
    UndefinedMultiplier { channel: String },
    DuplicateChannel { channel: String },
    NegativeValue {
        channel: String,
        field: &'static str,
        value: f64,
    },
    NonFiniteValue {
        channel: String,
        field: &'static str,
    },
    Csv(csv::Error),
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UndefinedMultiplier { channel } => write!(
                f,
                "channel '{channel}' has no engagement multiplier; optimization is disabled for the whole request"
            ),
            Self::DuplicateChannel { channel } => {
                write!(f, "channel '{channel}' appears more than once")
            }
            Self::NegativeValue {
                channel,
                field,
                value,
            } => write!(f, "channel '{channel}': {field} cannot be negative, got {value}"),
            Self::NonFiniteValue { channel, field } => {
                write!(f, "channel '{channel}': {field} is not a finite number")
            }
            Self::Csv(err) => write!(f, "failed to read channel records: {err}"),
        }
    }
}

impl std::error::Error for ChannelError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Csv(err) => Some(err),
            _ => None,
        }
    }
}

impl From<csv::Error> for ChannelError {
    fn from(value: csv::Error) -> Self {
        Self::Csv(value)
    }
}

fn check_value(channel: &str, field: &'static str, value: f64) -> Result<(), ChannelError> {
    if !value.is_finite() {
        return Err(ChannelError::NonFiniteValue {
            channel: channel.to_string(),
            field,
        });
    }
    if value < 0.0 {
        return Err(ChannelError::NegativeValue {
            channel: channel.to_string(),
            field,
            value,
        });
    }
    Ok(())
}

fn per_unit(total: f64, budget: f64) -> f64 {
    if budget > 0.0 { total / budget } else { 0.0 }
}

/// Builds optimizer channels from records. Any record without an alpha fails
/// the whole batch; no partial channel list is returned.
pub fn build_channels(records: &[ChannelRecord]) -> Result<Vec<Channel>, ChannelError> {
    if let Some(record) = records.iter().find(|r| r.alpha.is_none()) {
        return Err(ChannelError::UndefinedMultiplier {
            channel: record.channel.clone(),
        });
    }

    let mut seen = HashSet::new();
    let mut channels = Vec::with_capacity(records.len());
    for record in records {
        let name = record.channel.trim();
        if !seen.insert(name) {
            return Err(ChannelError::DuplicateChannel {
                channel: name.to_string(),
            });
        }
        let alpha = record.alpha.unwrap_or_default();
        check_value(name, "budget", record.budget)?;
        check_value(name, "contacts", record.contacts)?;
        check_value(name, "co2_per_contact", record.co2_per_contact)?;
        check_value(name, "alpha", alpha)?;

        let useful_contacts = record.contacts * alpha / 100.0;
        let carbon = record.contacts * record.co2_per_contact;
        channels.push(Channel {
            name: name.to_string(),
            initial_budget: record.budget,
            efficiency_coefficient: per_unit(useful_contacts, record.budget),
            carbon_coefficient: per_unit(record.contacts, record.budget) * record.co2_per_contact,
            baseline_useful_contacts: useful_contacts,
            baseline_carbon: carbon,
        });
    }
    Ok(channels)
}

pub fn load_channel_records(path: &Path) -> Result<Vec<ChannelRecord>, ChannelError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)?;
    let mut records = Vec::new();
    for result in reader.deserialize() {
        let record: ChannelRecord = result?;
        records.push(record);
    }
    Ok(records)
}

pub fn request_from_records(
    records: &[ChannelRecord],
    params: RequestParams,
) -> Result<OptimizationRequest, ChannelError> {
    Ok(OptimizationRequest::new(build_channels(records)?, params))
}

/// Records straight to a single solve.
pub fn optimize_records(
    records: &[ChannelRecord],
    params: RequestParams,
    cfg: AllocationSolveConfig,
) -> Result<OptimizationResult, AllocationError> {
    let request = request_from_records(records, params)?;
    optimize(&request, cfg)
}
