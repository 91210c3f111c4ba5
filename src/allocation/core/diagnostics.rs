use std::io::IsTerminal;

use serde::Serialize;

use super::frontier::{Frontier, FrontierPoint, Knee, realized_totals};
use super::types::{Channel, OptimizationResult};

const CHANNEL_PREVIEW_ROWS: usize = 12;
const FLAT_EPS: f64 = 1e-6;

const ANSI_RESET: &str = "\x1b[0m";
const ANSI_RED: &str = "\x1b[31m";
const ANSI_GREEN: &str = "\x1b[32m";
const ANSI_CYAN: &str = "\x1b[36m";
const ANSI_YELLOW: &str = "\x1b[33m";
const ANSI_GRAY: &str = "\x1b[90m";

#[derive(Debug, Clone, Copy)]
pub struct TraceConfig {
    pub ansi_enabled: bool,
    pub full_channels: bool,
}

impl TraceConfig {
    pub fn from_env() -> Self {
        Self {
            ansi_enabled: ansi_enabled(),
            full_channels: env_flag_enabled("REPORT_FULL_CHANNELS"),
        }
    }
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelAllocationRow {
    pub channel: String,
    pub initial_budget: f64,
    pub optimized_budget: f64,
    pub delta: f64,
    pub delta_pct: f64,
}

/// Before/after comparison of one allocation against the initial plan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AllocationReport {
    pub carbon_weight: f64,
    pub rows: Vec<ChannelAllocationRow>,
    pub contacts_before: f64,
    pub contacts_after: f64,
    /// Grams.
    pub carbon_before: f64,
    pub carbon_after: f64,
}

impl AllocationReport {
    pub fn new(channels: &[Channel], carbon_weight: f64, allocation: &[f64]) -> Self {
        let rows = channels
            .iter()
            .zip(allocation.iter())
            .map(|(channel, &optimized_budget)| {
                let delta = optimized_budget - channel.initial_budget;
                ChannelAllocationRow {
                    channel: channel.name.clone(),
                    initial_budget: channel.initial_budget,
                    optimized_budget,
                    delta,
                    delta_pct: pct(delta, channel.initial_budget),
                }
            })
            .collect();
        let (contacts_after, carbon_after) = realized_totals(channels, allocation);
        Self {
            carbon_weight,
            rows,
            contacts_before: channels.iter().map(|c| c.baseline_useful_contacts).sum(),
            contacts_after,
            carbon_before: channels.iter().map(|c| c.baseline_carbon).sum(),
            carbon_after,
        }
    }

    pub fn from_result(channels: &[Channel], carbon_weight: f64, result: &OptimizationResult) -> Self {
        Self::new(channels, carbon_weight, &result.allocation)
    }

    pub fn from_point(channels: &[Channel], point: &FrontierPoint) -> Self {
        Self::new(channels, point.carbon_weight, &point.allocation)
    }

    pub fn contacts_gain_pct(&self) -> f64 {
        pct(self.contacts_after - self.contacts_before, self.contacts_before)
    }

    /// Negative when emissions went down.
    pub fn carbon_change_pct(&self) -> f64 {
        pct(self.carbon_after - self.carbon_before, self.carbon_before)
    }

    pub fn total_before(&self) -> f64 {
        self.rows.iter().map(|r| r.initial_budget).sum()
    }

    pub fn total_after(&self) -> f64 {
        self.rows.iter().map(|r| r.optimized_budget).sum()
    }
}

fn pct(delta: f64, reference: f64) -> f64 {
    if reference.abs() <= f64::EPSILON {
        0.0
    } else {
        100.0 * delta / reference
    }
}

pub fn print_solve_diagnostics(label: &str, result: &OptimizationResult, config: TraceConfig) {
    let ansi = config.ansi_enabled;
    let (color, verdict) = if result.success {
        (ANSI_GREEN, "ok")
    } else {
        (ANSI_RED, "failed")
    };
    println!(
        "[allocation][{}] solve {}: method={} status={} iters={} f_evals={} g_evals={} ls_trials={}",
        label,
        colorize(ansi, color, verdict),
        result.method,
        result.status,
        result.iterations,
        result.objective_evaluations,
        result.gradient_evaluations,
        result.line_search_trials,
    );
    println!(
        "[allocation][{}]   objective={:.9} pg_norm={:.3e} equality_residual={:.3e}",
        label, result.objective_value, result.projected_grad_norm, result.equality_residual
    );
    if let Some(primary) = result.primary_status {
        println!(
            "[allocation][{}]   {}",
            label,
            colorize(ansi, ANSI_YELLOW, &format!("fallback used; primary ended with: {primary}"))
        );
    }
    for warning in &result.warnings {
        println!(
            "[allocation][{}]   {}",
            label,
            colorize(ansi, ANSI_YELLOW, &format!("warning: {warning}"))
        );
    }
    if !result.success {
        println!("[allocation][{}]   {}", label, result.message);
    }
}

pub fn print_allocation_report(label: &str, report: &AllocationReport, config: TraceConfig) {
    let ansi = config.ansi_enabled;
    let reset = if ansi { ANSI_RESET } else { "" };
    println!(
        "[allocation][{}] carbon weight {:.2}: budget {:.2} -> {:.2}",
        label,
        report.carbon_weight,
        report.total_before(),
        report.total_after()
    );
    let header = format!(
        "{:<28} {:>14} {:>14} {:>14} {:>9}",
        "channel", "initial", "optimized", "delta", "delta%"
    );
    println!("  {}", colorize(ansi, ANSI_CYAN, &header));

    let mut rows: Vec<&ChannelAllocationRow> = report.rows.iter().collect();
    let hidden = if config.full_channels || rows.len() <= CHANNEL_PREVIEW_ROWS {
        0
    } else {
        // Largest moves first when the table is truncated.
        rows.sort_by(|lhs, rhs| {
            rhs.delta
                .abs()
                .total_cmp(&lhs.delta.abs())
                .then_with(|| lhs.channel.cmp(&rhs.channel))
        });
        let hidden = rows.len() - CHANNEL_PREVIEW_ROWS;
        rows.truncate(CHANNEL_PREVIEW_ROWS);
        hidden
    };

    for row in rows {
        let color = if row.delta > FLAT_EPS {
            ANSI_GREEN
        } else if row.delta < -FLAT_EPS {
            ANSI_RED
        } else {
            ANSI_GRAY
        };
        println!(
            "  {}{:<28} {:>14.2} {:>14.2} {:>+14.2} {:>+8.2}%{}",
            if ansi { color } else { "" },
            truncate_label(&row.channel, 28),
            row.initial_budget,
            row.optimized_budget,
            row.delta,
            row.delta_pct,
            reset
        );
    }
    if hidden > 0 {
        println!(
            "  ... {} smaller moves hidden (set REPORT_FULL_CHANNELS=1 to show all)",
            hidden
        );
    }

    println!(
        "  useful contacts: {:.0} -> {:.0} ({:+.2}%)",
        report.contacts_before,
        report.contacts_after,
        report.contacts_gain_pct()
    );
    println!(
        "  carbon: {:.2} kg -> {:.2} kg ({:+.2}%)",
        report.carbon_before / 1000.0,
        report.carbon_after / 1000.0,
        report.carbon_change_pct()
    );
}

pub fn print_frontier_summary(label: &str, frontier: &Frontier, config: TraceConfig) {
    let ansi = config.ansi_enabled;
    let reset = if ansi { ANSI_RESET } else { "" };
    println!(
        "[frontier][{}] {} of {} weights converged",
        label,
        frontier.points.len(),
        frontier.requested_weights.len()
    );
    if frontier.points.is_empty() {
        println!("[frontier][{}] no converged points", label);
        return;
    }

    let header = format!(
        "{:>6} {:>16} {:>14} {:>10} {:>10}",
        "weight", "useful_contacts", "carbon_kg", "dC%", "dCO2%"
    );
    println!("  {}", colorize(ansi, ANSI_CYAN, &header));
    let knee = frontier.knee.index();
    for (idx, p) in frontier.points.iter().enumerate() {
        let is_knee = knee == Some(idx);
        println!(
            "  {}{:>6.2} {:>16.0} {:>14.2} {:>+9.2}% {:>+9.2}%{}{}",
            if ansi && is_knee { ANSI_GREEN } else { "" },
            p.carbon_weight,
            p.useful_contacts,
            p.carbon_kg(),
            p.delta_contacts_pct(&frontier.baseline),
            p.delta_carbon_pct(&frontier.baseline),
            if is_knee { "  <- knee" } else { "" },
            if ansi && is_knee { reset } else { "" },
        );
    }
    for dropped in &frontier.dropped {
        println!(
            "  {}",
            colorize(
                ansi,
                ANSI_YELLOW,
                &format!("dropped weight {:.2}: {}", dropped.carbon_weight, dropped.status)
            )
        );
    }

    let describe = |name: &str, point: Option<&FrontierPoint>| match point {
        Some(p) => println!(
            "  {:<22} weight={:.2} useful_contacts={:.0} carbon={:.1} kg",
            name,
            p.carbon_weight,
            p.useful_contacts,
            p.carbon_kg()
        ),
        None => println!("  {:<22} n/a", name),
    };
    describe("best performance:", frontier.best_contacts());
    describe("best carbon footprint:", frontier.best_carbon());
    match (frontier.knee, frontier.knee_point()) {
        (Knee::Undefined(reason), _) => {
            println!("  {:<22} undefined ({})", "optimal compromise:", reason);
        }
        (Knee::At(_), point) => describe("optimal compromise:", point),
    }
}

fn truncate_label(label: &str, width: usize) -> String {
    if label.chars().count() <= width {
        return label.to_string();
    }
    let mut out: String = label.chars().take(width.saturating_sub(3)).collect();
    out.push_str("...");
    out
}

fn ansi_enabled() -> bool {
    if std::env::var_os("NO_COLOR").is_some() {
        return false;
    }
    if std::env::var("TERM").ok().as_deref() == Some("dumb") {
        return false;
    }
    std::io::stdout().is_terminal()
}

fn colorize(ansi: bool, color: &str, text: &str) -> String {
    if ansi {
        format!("{color}{text}{ANSI_RESET}")
    } else {
        text.to_string()
    }
}

fn env_flag_enabled(name: &str) -> bool {
    std::env::var(name)
        .ok()
        .map(|value| {
            matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_tracks_per_channel_deltas_and_totals() {
        let channels = vec![
            Channel::new("tv", 10_000.0, 2.0, 0.8),
            Channel::new("print", 2_000.0, 1.2, 0.3),
        ];
        let report = AllocationReport::new(&channels, 0.5, &[9_000.0, 3_000.0]);
        assert_eq!(report.rows[0].delta, -1_000.0);
        assert!((report.rows[0].delta_pct + 10.0).abs() < 1e-12);
        assert!((report.rows[1].delta_pct - 50.0).abs() < 1e-12);
        assert_eq!(report.total_before(), report.total_after());
        assert_eq!(report.contacts_before, 22_400.0);
        assert_eq!(report.contacts_after, 21_600.0);
        assert_eq!(report.carbon_before, 8_600.0);
        assert_eq!(report.carbon_after, 8_100.0);
        assert!(report.carbon_change_pct() < 0.0);
    }

    #[test]
    fn test_long_labels_are_truncated() {
        assert_eq!(truncate_label("short", 10), "short");
        assert_eq!(truncate_label("a-very-long-channel", 10), "a-very-...");
    }
}
