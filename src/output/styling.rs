use std::fmt::Display;

use console::{style, StyledObject};

use crate::pipeline::Outcome;

/// Emoji followed by an underlined title, placed above each output block.
pub fn section_header(emoji: &str, title: &str) -> String {
    format!("{} {}", style(emoji).bright(), style(title).bright().underlined())
}

/// Retry notices, running stages and empty results.
pub fn notice(text: impl Display) -> StyledObject<String> {
    style(text.to_string()).bright().yellow()
}

pub fn success(text: impl Display) -> StyledObject<String> {
    style(text.to_string()).bright().green()
}

pub fn failure(text: impl Display) -> StyledObject<String> {
    style(text.to_string()).bright().red()
}

pub fn label(text: impl Display) -> StyledObject<String> {
    style(text.to_string()).dim()
}

pub fn figure(value: impl Display) -> StyledObject<String> {
    style(value.to_string()).cyan()
}

pub fn banner_title(text: impl Display) -> StyledObject<String> {
    style(text.to_string()).magenta().bold()
}

pub fn outcome(outcome: Outcome) -> StyledObject<&'static str> {
    match outcome {
        Outcome::Completed => style("completed").bright().green(),
        Outcome::Cancelled => style("cancelled (partial results)").bright().yellow(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_text() {
        console::set_colors_enabled(false);
        assert_eq!(outcome(Outcome::Completed).to_string(), "completed");
        assert_eq!(
            outcome(Outcome::Cancelled).to_string(),
            "cancelled (partial results)"
        );
    }

    #[test]
    fn test_section_header_layout() {
        console::set_colors_enabled(false);
        assert_eq!(section_header("📅", "Monthly usage"), "📅 Monthly usage");
    }
}
