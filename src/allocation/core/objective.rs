use serde::Serialize;

use super::types::{Channel, CoefficientWarning, Objective};

/// Guards the z-score denominators against zero-variance coefficient sets.
pub const NORMALIZATION_EPS: f64 = 1e-9;
const DEGENERATE_REL_TOL: f64 = 1e-12;

/// Smooth objective over a full allocation vector in currency units.
pub trait AllocationObjective {
    fn value(&self, x: &[f64]) -> f64;
    fn gradient(&self, x: &[f64], grad: &mut [f64]);
}

/// Mean and standard deviation of one coefficient vector, scaled by the
/// total budget so they are comparable to `dot(x, coeff)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ReferenceScale {
    pub coefficient_mean: f64,
    pub coefficient_std: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl ReferenceScale {
    fn from_coefficients(coeffs: &[f64], total_budget: f64) -> Self {
        let (coefficient_mean, coefficient_std) = mean_and_std(coeffs);
        Self {
            coefficient_mean,
            coefficient_std,
            mean: coefficient_mean * total_budget,
            std_dev: coefficient_std * total_budget,
        }
    }

    /// Zero for a degenerate scale: the epsilon-guarded quotient would only
    /// amplify rounding noise in an otherwise constant total.
    pub fn normalize(&self, total: f64) -> f64 {
        if self.is_degenerate() {
            return 0.0;
        }
        (total - self.mean) / (self.std_dev + NORMALIZATION_EPS)
    }

    /// d normalize / d total.
    pub fn slope(&self) -> f64 {
        if self.is_degenerate() {
            return 0.0;
        }
        1.0 / (self.std_dev + NORMALIZATION_EPS)
    }

    pub fn is_degenerate(&self) -> bool {
        self.coefficient_std <= DEGENERATE_REL_TOL * self.coefficient_mean.abs()
            || self.coefficient_std == 0.0
    }
}

/// Weight-invariant centering reference for both objectives. Built once per
/// channel set and shared by every solve of a frontier sweep.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NormalizationBasis {
    pub total_budget: f64,
    pub carbon: ReferenceScale,
    pub efficiency: ReferenceScale,
}

impl NormalizationBasis {
    pub fn from_channels(channels: &[Channel]) -> Self {
        let total_budget: f64 = channels.iter().map(|c| c.initial_budget).sum();
        let carbon: Vec<f64> = channels.iter().map(|c| c.carbon_coefficient).collect();
        let efficiency: Vec<f64> = channels.iter().map(|c| c.efficiency_coefficient).collect();
        Self {
            total_budget,
            carbon: ReferenceScale::from_coefficients(&carbon, total_budget),
            efficiency: ReferenceScale::from_coefficients(&efficiency, total_budget),
        }
    }

    pub fn warnings(&self) -> Vec<CoefficientWarning> {
        let mut warnings = Vec::new();
        if self.carbon.is_degenerate() {
            warnings.push(CoefficientWarning::DegenerateCoefficients {
                objective: Objective::Carbon,
                value: self.carbon.coefficient_mean,
            });
        }
        if self.efficiency.is_degenerate() {
            warnings.push(CoefficientWarning::DegenerateCoefficients {
                objective: Objective::Efficiency,
                value: self.efficiency.coefficient_mean,
            });
        }
        warnings
    }
}

fn mean_and_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
    (mean, var.max(0.0).sqrt())
}

pub(super) fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[derive(Debug, Clone)]
struct Regularization {
    strength: f64,
    center: Vec<f64>,
    scale_sq: f64,
}

/// `w * norm_carbon(x) - (1 - w) * norm_efficiency(x)`, minimized, with an
/// optional L2 pull toward a center allocation measured in budget shares.
#[derive(Debug, Clone)]
pub struct WeightedObjective {
    basis: NormalizationBasis,
    carbon_coeffs: Vec<f64>,
    efficiency_coeffs: Vec<f64>,
    carbon_weight: f64,
    regularization: Option<Regularization>,
}

impl WeightedObjective {
    pub fn new(channels: &[Channel], basis: NormalizationBasis, carbon_weight: f64) -> Self {
        Self {
            basis,
            carbon_coeffs: channels.iter().map(|c| c.carbon_coefficient).collect(),
            efficiency_coeffs: channels.iter().map(|c| c.efficiency_coefficient).collect(),
            carbon_weight,
            regularization: None,
        }
    }

    /// `strength` applies to `(x_i - center_i) / total_budget`; zero disables the term.
    pub fn with_regularization(mut self, strength: f64, center: &[f64]) -> Self {
        if strength > 0.0 && strength.is_finite() && center.len() == self.carbon_coeffs.len() {
            let scale = self.basis.total_budget.abs().max(1.0);
            self.regularization = Some(Regularization {
                strength,
                center: center.to_vec(),
                scale_sq: scale * scale,
            });
        }
        self
    }

    pub fn carbon_weight(&self) -> f64 {
        self.carbon_weight
    }

    pub fn total_carbon(&self, x: &[f64]) -> f64 {
        dot(x, &self.carbon_coeffs)
    }

    pub fn total_efficiency(&self, x: &[f64]) -> f64 {
        dot(x, &self.efficiency_coeffs)
    }

    pub fn norm_carbon(&self, x: &[f64]) -> f64 {
        self.basis.carbon.normalize(self.total_carbon(x))
    }

    pub fn norm_efficiency(&self, x: &[f64]) -> f64 {
        self.basis.efficiency.normalize(self.total_efficiency(x))
    }
}

impl AllocationObjective for WeightedObjective {
    fn value(&self, x: &[f64]) -> f64 {
        let w = self.carbon_weight;
        let mut f = w * self.norm_carbon(x) - (1.0 - w) * self.norm_efficiency(x);
        if let Some(reg) = &self.regularization {
            let sq: f64 = x
                .iter()
                .zip(reg.center.iter())
                .map(|(xi, ci)| (xi - ci) * (xi - ci))
                .sum();
            f += 0.5 * reg.strength * sq / reg.scale_sq;
        }
        f
    }

    fn gradient(&self, x: &[f64], grad: &mut [f64]) {
        let w = self.carbon_weight;
        let carbon_slope = w * self.basis.carbon.slope();
        let efficiency_slope = (1.0 - w) * self.basis.efficiency.slope();
        for (i, g) in grad.iter_mut().enumerate() {
            *g = carbon_slope * self.carbon_coeffs[i] - efficiency_slope * self.efficiency_coeffs[i];
        }
        if let Some(reg) = &self.regularization {
            for ((g, xi), ci) in grad.iter_mut().zip(x.iter()).zip(reg.center.iter()) {
                *g += reg.strength * (xi - ci) / reg.scale_sq;
            }
        }
    }
}
