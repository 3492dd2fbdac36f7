use anyhow::Result;
use std::io::Write;

use crate::config::OutputFormat;
use crate::pipeline::RunReport;

/// Writes a run report in a machine-readable format.
///
/// - CSV: one row per month, for spreadsheets
/// - JSON: the whole report including run counters
///
/// The summary format is rendered by [`super::print_summary`] instead.
pub fn export_report(
    report: &RunReport,
    format: OutputFormat,
    pretty: bool,
    output: &mut dyn Write,
) -> Result<()> {
    match format {
        OutputFormat::Summary => anyhow::bail!("Summary format is printed, not exported"),
        OutputFormat::Json => export_json(report, pretty, output),
        OutputFormat::Csv => export_csv(report, output),
    }
}

fn export_json(report: &RunReport, pretty: bool, output: &mut dyn Write) -> Result<()> {
    let json = if pretty {
        serde_json::to_string_pretty(report)?
    } else {
        serde_json::to_string(report)?
    };
    writeln!(output, "{json}")?;
    Ok(())
}

fn export_csv(report: &RunReport, output: &mut dyn Write) -> Result<()> {
    writeln!(output, "month,{}_count,ci_minutes", report.unit)?;
    for (month, bucket) in report.stats.months() {
        writeln!(
            output,
            "{month},{},{:.2}",
            bucket.build_count, bucket.total_duration
        )?;
    }
    Ok(())
}
