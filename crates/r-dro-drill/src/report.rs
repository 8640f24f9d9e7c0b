//! ---
//! dro_section: "06-dr-verification"
//! dro_subsection: "module"
//! dro_type: "source"
//! dro_scope: "code"
//! dro_description: "DR drill runner, RTO/RPO grading, and report rendering."
//! dro_version: "v0.1.0"
//! dro_owner: "tbd"
//! ---
use crate::DrillResult;

fn objective_line(label: &str, measured: Option<String>, target: u64, met: bool) -> String {
    let measured = measured.unwrap_or_else(|| "unknown".to_owned());
    let verdict = if met { "met" } else { "MISSED" };
    format!("  {label:<4} {measured:>10}  (target {target}s, {verdict})")
}

/// Render a drill result as the multi-line summary the CLI prints.
pub fn render_report(result: &DrillResult) -> String {
    let mut lines = Vec::new();
    lines.push(format!(
        "DR drill {} against '{}': {}",
        result.drill_id,
        result.target_region,
        if result.passed { "PASSED" } else { "FAILED" }
    ));
    lines.push(format!(
        "  started {}  finished {}",
        result.started_at.to_rfc3339(),
        result.finished_at.to_rfc3339()
    ));
    lines.push(objective_line(
        "RTO",
        result.rto_seconds.map(|rto| format!("{rto:.1}s")),
        result.rto_target_seconds,
        result.rto_met,
    ));
    lines.push(objective_line(
        "RPO",
        result.rpo_seconds.map(|rpo| format!("{rpo}s")),
        result.rpo_target_seconds,
        result.rpo_met,
    ));
    if let Some(failback) = result.failback_seconds {
        lines.push(format!("  failback completed in {failback:.1}s"));
    }
    lines.push(format!("  {}", result.narrative));
    lines.join("\n")
}
