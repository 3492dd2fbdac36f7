use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, CellAlignment, Color, ContentArrangement, Table};

use crate::aggregate::UsageStats;

/// One row per month: month, count of `unit`s, CI minutes.
///
/// The month with the most minutes is highlighted.
pub fn usage_table(unit_header: &str, stats: &UsageStats) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(
            ["Month", unit_header, "CI minutes"]
                .into_iter()
                .map(|title| Cell::new(title).fg(Color::Cyan)),
        );

    let busiest = stats
        .duration_spread()
        .map_or(f64::INFINITY, |spread| spread.max);

    for (month, bucket) in stats.months() {
        let minutes = right_aligned(format!("{:.2}", bucket.total_duration));
        #[allow(clippy::float_cmp)]
        let minutes = if bucket.total_duration == busiest {
            minutes.fg(Color::Yellow)
        } else {
            minutes
        };
        table.add_row(vec![
            Cell::new(month),
            right_aligned(bucket.build_count),
            minutes,
        ]);
    }

    table
}

fn right_aligned(value: impl std::fmt::Display) -> Cell {
    Cell::new(value).set_alignment(CellAlignment::Right)
}
