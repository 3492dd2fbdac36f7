use std::fmt::Write;

use super::styling::{figure, label, notice, outcome, section_header};
use super::tables::usage_table;
use crate::pipeline::RunReport;

/// Prints the monthly usage table and overall statistics to stdout.
///
/// Shows, for every month with at least one build:
/// - the number of builds (or GitLab jobs)
/// - the CI minutes they consumed
///
/// followed by min/max/avg of both figures across months.
pub fn print_summary(report: &RunReport) {
    println!("{}", render_summary(report));
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars).collect()
    })
}

pub(super) fn render_summary(report: &RunReport) -> String {
    let mut output = String::new();
    let unit = report.unit;
    let stats = &report.stats;

    let _ = writeln!(output, "{}", section_header("📊", "Overview"));
    let _ = writeln!(output, "  {} {}", label("Run:"), outcome(report.outcome));
    let _ = writeln!(
        output,
        "  {} {} ({} disabled, {} failed)",
        label("Jobs found:"),
        figure(report.jobs_found),
        report.jobs_disabled,
        report.jobs_dropped
    );
    let _ = writeln!(
        output,
        "  {} {} ({} failed)",
        label(format!("{}s recorded:", capitalize(unit))),
        figure(report.builds_recorded),
        report.builds_dropped
    );
    output.push('\n');

    if stats.is_empty() {
        let _ = writeln!(output, "{}", notice(format!("No {unit}s recorded.")));
        return output;
    }

    let _ = writeln!(output, "{}", section_header("📅", "Monthly usage"));
    let table = usage_table(&format!("{} count", capitalize(unit)), stats);
    let _ = writeln!(output, "{table}\n");

    if let Some(builds) = stats.build_count_spread() {
        let _ = writeln!(output, "Overall {unit} number stats:");
        let _ = writeln!(output, "    min: {}", builds.min);
        let _ = writeln!(output, "    max: {}", builds.max);
        let _ = writeln!(output, "    avg: {:.2}\n", builds.avg);
    }

    if let Some(minutes) = stats.duration_spread() {
        let _ = writeln!(output, "Overall {unit} duration stats:");
        let _ = writeln!(output, "    min: {:.2}", minutes.min);
        let _ = writeln!(output, "    max: {:.2}", minutes.max);
        let _ = writeln!(output, "    avg: {:.2}", minutes.avg);
    }

    output
}
