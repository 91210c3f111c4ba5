//! Runtime configuration of the optimizer binary, read from the environment
//! (after `.env` is loaded by `main`).

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::allocation::{
    AllocationSolveConfig, DEFAULT_CARBON_WEIGHT, DEFAULT_FRONTIER_STEPS, DEFAULT_MAX_VARIATION,
    DEFAULT_MIN_BUDGET_PER_CHANNEL, FrontierConfig, RequestParams,
};

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    MissingEnv(&'static str),
    InvalidEnvValue {
        key: &'static str,
        value: String,
        reason: &'static str,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingEnv(key) => write!(f, "{key} must be set"),
            Self::InvalidEnvValue { key, value, reason } => {
                write!(f, "invalid {key}={value:?}: {reason}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone, PartialEq)]
pub struct OptimizerConfig {
    pub channels_csv: PathBuf,
    pub params: RequestParams,
    pub frontier_steps: usize,
    pub frontier_parallel: bool,
    pub solve: AllocationSolveConfig,
    pub frontier_csv: Option<PathBuf>,
    pub allocation_csv: Option<PathBuf>,
    pub frontier_json: Option<PathBuf>,
}

impl OptimizerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env`, with an explicit variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvReader { lookup };
        let channels_csv = env
            .path("CHANNELS_CSV")
            .ok_or(ConfigError::MissingEnv("CHANNELS_CSV"))?;

        let params = RequestParams {
            carbon_weight: env.f64_in(
                "CARBON_WEIGHT",
                DEFAULT_CARBON_WEIGHT,
                |v| (0.0..=1.0).contains(&v),
                "expected a number in [0, 1]",
            )?,
            min_budget_per_channel: env.f64_in(
                "MIN_BUDGET_PER_CHANNEL",
                DEFAULT_MIN_BUDGET_PER_CHANNEL,
                |v| v >= 0.0,
                "expected a non-negative number",
            )?,
            max_variation: env.f64_in(
                "MAX_VARIATION",
                DEFAULT_MAX_VARIATION,
                |v| v >= 0.0,
                "expected a non-negative number",
            )?,
        };

        let defaults = AllocationSolveConfig::default();
        let max_iters = env.usize_in(
            "SOLVER_MAX_ITERS",
            defaults.primary_max_iters,
            |v| v > 0,
            "expected a positive integer",
        )?;
        let time_limit = env
            .u64("SOLVER_TIME_LIMIT_MS")?
            .map(Duration::from_millis);
        let l2_reg = env.f64_in(
            "SOLVER_L2_REG",
            defaults.l2_reg,
            |v| v >= 0.0,
            "expected a non-negative number",
        )?;

        Ok(Self {
            channels_csv,
            params,
            frontier_steps: env.usize_in(
                "FRONTIER_STEPS",
                DEFAULT_FRONTIER_STEPS,
                |_| true,
                "expected a non-negative integer",
            )?,
            frontier_parallel: env.bool("FRONTIER_PARALLEL", false)?,
            solve: AllocationSolveConfig {
                primary_max_iters: max_iters,
                fallback_max_iters: max_iters,
                l2_reg,
                time_limit,
                ..defaults
            },
            frontier_csv: env.path("FRONTIER_CSV"),
            allocation_csv: env.path("ALLOCATION_CSV"),
            frontier_json: env.path("FRONTIER_JSON"),
        })
    }

    pub fn frontier(&self) -> FrontierConfig {
        FrontierConfig {
            solve: self.solve,
            parallel: self.frontier_parallel,
        }
    }
}

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Unset and blank values both read as absent.
    fn raw(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|raw| raw.trim().to_string())
            .filter(|raw| !raw.is_empty())
    }

    fn path(&self, key: &str) -> Option<PathBuf> {
        self.raw(key).map(PathBuf::from)
    }

    fn f64_in(
        &self,
        key: &'static str,
        default: f64,
        accept: impl Fn(f64) -> bool,
        reason: &'static str,
    ) -> Result<f64, ConfigError> {
        let Some(raw) = self.raw(key) else {
            return Ok(default);
        };
        raw.parse::<f64>()
            .ok()
            .filter(|v| v.is_finite() && accept(*v))
            .ok_or(ConfigError::InvalidEnvValue {
                key,
                value: raw,
                reason,
            })
    }

    fn usize_in(
        &self,
        key: &'static str,
        default: usize,
        accept: impl Fn(usize) -> bool,
        reason: &'static str,
    ) -> Result<usize, ConfigError> {
        let Some(raw) = self.raw(key) else {
            return Ok(default);
        };
        raw.replace('_', "")
            .parse::<usize>()
            .ok()
            .filter(|v| accept(*v))
            .ok_or(ConfigError::InvalidEnvValue {
                key,
                value: raw,
                reason,
            })
    }

    fn u64(&self, key: &'static str) -> Result<Option<u64>, ConfigError> {
        let Some(raw) = self.raw(key) else {
            return Ok(None);
        };
        match raw.replace('_', "").parse::<u64>() {
            Ok(v) => Ok(Some(v)),
            Err(_) => Err(ConfigError::InvalidEnvValue {
                key,
                value: raw,
                reason: "expected a non-negative integer",
            }),
        }
    }

    fn bool(&self, key: &'static str, default: bool) -> Result<bool, ConfigError> {
        let Some(raw) = self.raw(key) else {
            return Ok(default);
        };
        match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidEnvValue {
                key,
                value: raw,
                reason: "expected one of 1/0, true/false, yes/no, on/off",
            }),
        }
    }
}
