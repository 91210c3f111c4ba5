use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::Serialize;

use super::diagnostics::AllocationReport;
use super::frontier::Frontier;

#[derive(Debug)]
pub enum ExportError {
    Io(std::io::Error),
    Csv(csv::Error),
    Json(serde_json::Error),
}

impl fmt::Display for ExportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "export i/o error: {err}"),
            Self::Csv(err) => write!(f, "csv export error: {err}"),
            Self::Json(err) => write!(f, "json export error: {err}"),
        }
    }
}

impl std::error::Error for ExportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Csv(err) => Some(err),
            Self::Json(err) => Some(err),
        }
    }
}

impl From<std::io::Error> for ExportError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<csv::Error> for ExportError {
    fn from(value: csv::Error) -> Self {
        Self::Csv(value)
    }
}

impl From<serde_json::Error> for ExportError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

#[derive(Debug, Serialize)]
struct FrontierRow {
    carbon_weight: f64,
    useful_contacts: f64,
    carbon_kg: f64,
    delta_contacts_pct: f64,
    delta_carbon_pct: f64,
    is_knee: bool,
}

#[derive(Debug, Serialize)]
struct AllocationRow<'a> {
    channel: &'a str,
    initial_budget: f64,
    optimized_budget: f64,
    delta: f64,
    delta_pct: f64,
}

/// One row per converged weight, deltas relative to the unoptimized plan.
pub fn write_frontier_csv<W: Write>(writer: W, frontier: &Frontier) -> Result<(), ExportError> {
    let mut out = csv::Writer::from_writer(writer);
    let knee = frontier.knee.index();
    for (idx, point) in frontier.points.iter().enumerate() {
        out.serialize(FrontierRow {
            carbon_weight: point.carbon_weight,
            useful_contacts: point.useful_contacts,
            carbon_kg: point.carbon_kg(),
            delta_contacts_pct: point.delta_contacts_pct(&frontier.baseline),
            delta_carbon_pct: point.delta_carbon_pct(&frontier.baseline),
            is_knee: knee == Some(idx),
        })?;
    }
    out.flush()?;
    Ok(())
}

pub fn write_allocation_csv<W: Write>(
    writer: W,
    report: &AllocationReport,
) -> Result<(), ExportError> {
    let mut out = csv::Writer::from_writer(writer);
    for row in &report.rows {
        out.serialize(AllocationRow {
            channel: &row.channel,
            initial_budget: row.initial_budget,
            optimized_budget: row.optimized_budget,
            delta: row.delta,
            delta_pct: row.delta_pct,
        })?;
    }
    out.flush()?;
    Ok(())
}

pub fn write_frontier_json<W: Write>(writer: W, frontier: &Frontier) -> Result<(), ExportError> {
    serde_json::to_writer_pretty(writer, frontier)?;
    Ok(())
}

fn create(path: &Path) -> Result<BufWriter<File>, ExportError> {
    Ok(BufWriter::new(File::create(path)?))
}

pub fn write_frontier_csv_to_path(path: &Path, frontier: &Frontier) -> Result<(), ExportError> {
    write_frontier_csv(create(path)?, frontier)
}

pub fn write_allocation_csv_to_path(
    path: &Path,
    report: &AllocationReport,
) -> Result<(), ExportError> {
    write_allocation_csv(create(path)?, report)
}

pub fn write_frontier_json_to_path(path: &Path, frontier: &Frontier) -> Result<(), ExportError> {
    let mut file = create(path)?;
    write_frontier_json(&mut file, frontier)?;
    file.flush()?;
    Ok(())
}
